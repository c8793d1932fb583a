//! Channel-backed RPC connection.
//!
//! [`ChannelConnection`] implements the request/response correlation layer on
//! top of a pair of message channels. It handles:
//! - Generating sequential request ids
//! - Correlating response frames with pending calls
//! - Splitting notifications off into the inbound stream
//! - Unwinding everything when the session's cancellation token fires
//!
//! # Message Flow
//!
//! 1. Caller invokes [`RpcConnection::call`] with a [`Request`]
//! 2. Connection assigns the next id and parks a oneshot sender under it
//! 3. The [`RequestFrame`] is pushed onto the outbound channel
//! 4. The run loop receives the matching [`ResponseFrame`] and completes the oneshot
//! 5. Frames without an id are forwarded to the [`InboundStream`]
//!
//! Framing and byte encoding live on the other side of the channels.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use keylink_protocol::{Message, Notification, Request, RequestFrame, Response, ResponseFrame};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::inbound::InboundStream;
use crate::transport::{BoxFuture, RpcConnection};

type Callbacks = Arc<Mutex<Option<HashMap<u32, oneshot::Sender<Result<Response>>>>>>;

/// RPC session over an outbound frame channel and an inbound message channel.
///
/// # Architecture
///
/// - `AtomicU32` for request id generation
/// - `Mutex<Option<HashMap>>` for pending calls; `None` once the run loop has exited
/// - `tokio::sync::oneshot` for request/response correlation
pub struct ChannelConnection {
	label: String,
	/// Sequential request id counter
	last_id: AtomicU32,
	/// Pending calls keyed by request id
	callbacks: Callbacks,
	outbound: mpsc::UnboundedSender<RequestFrame>,
	inbound: InboundStream,
	cancel: CancellationToken,
}

impl ChannelConnection {
	/// Creates the connection and spawns its run loop.
	///
	/// Must be called from within a tokio runtime. The loop ends when `cancel`
	/// fires, when `incoming` closes, or after forwarding an inbound error.
	pub fn spawn(
		label: impl Into<String>,
		outbound: mpsc::UnboundedSender<RequestFrame>,
		incoming: mpsc::UnboundedReceiver<Result<Message>>,
		cancel: CancellationToken,
	) -> Arc<Self> {
		let (notify_tx, notify_rx) = mpsc::unbounded_channel();
		let callbacks: Callbacks = Arc::new(Mutex::new(Some(HashMap::new())));
		let label = label.into();

		tokio::spawn(run(label.clone(), incoming, Arc::clone(&callbacks), notify_tx, cancel.clone()));

		Arc::new(Self {
			label,
			last_id: AtomicU32::new(0),
			callbacks,
			outbound,
			inbound: InboundStream::new(UnboundedReceiverStream::new(notify_rx)),
			cancel,
		})
	}

	/// Number of calls still waiting for a response.
	pub fn pending_calls(&self) -> usize {
		self.callbacks.lock().as_ref().map_or(0, HashMap::len)
	}

	fn closed_error(&self) -> Error {
		if self.cancel.is_cancelled() { Error::Cancelled } else { Error::ChannelClosed }
	}
}

impl RpcConnection for ChannelConnection {
	fn label(&self) -> &str {
		&self.label
	}

	fn call(&self, request: Request) -> BoxFuture<'_, Result<Response>> {
		Box::pin(async move {
			let id = self.last_id.fetch_add(1, Ordering::SeqCst);
			let (tx, rx) = oneshot::channel();

			{
				let mut guard = self.callbacks.lock();
				let Some(pending) = guard.as_mut() else {
					return Err(self.closed_error());
				};
				pending.insert(id, tx);
			}

			debug!(target = "keylink.rpc", id, kind = request.kind(), "sending request");
			if self.outbound.send(RequestFrame { request_id: id, request }).is_err() {
				let mut guard = self.callbacks.lock();
				if let Some(pending) = guard.as_mut() {
					pending.remove(&id);
				}
				return Err(Error::ChannelClosed);
			}

			match rx.await {
				Ok(result) => result,
				Err(_) => Err(self.closed_error()),
			}
		})
	}

	fn inbound(&self) -> &InboundStream {
		&self.inbound
	}
}

async fn run(
	label: String,
	mut incoming: mpsc::UnboundedReceiver<Result<Message>>,
	callbacks: Callbacks,
	notifications: mpsc::UnboundedSender<Result<Notification>>,
	cancel: CancellationToken,
) {
	loop {
		let next = tokio::select! {
			biased;
			_ = cancel.cancelled() => {
				debug!(target = "keylink.rpc", connection = %label, "session cancelled");
				break;
			}
			next = incoming.recv() => next,
		};

		match next {
			Some(Ok(Message::Response(frame))) => complete(&callbacks, frame),
			Some(Ok(Message::Notification(notification))) => {
				let _ = notifications.send(Ok(notification));
			}
			Some(Err(e)) => {
				error!(target = "keylink.rpc", connection = %label, error = %e, "inbound channel failed");
				let _ = notifications.send(Err(e));
				break;
			}
			None => {
				debug!(target = "keylink.rpc", connection = %label, "inbound channel closed");
				break;
			}
		}
	}

	let pending = callbacks.lock().take().unwrap_or_default();
	for (_, callback) in pending {
		let error = if cancel.is_cancelled() { Error::Cancelled } else { Error::ChannelClosed };
		let _ = callback.send(Err(error));
	}
}

fn complete(callbacks: &Callbacks, frame: ResponseFrame) {
	let callback = callbacks.lock().as_mut().and_then(|pending| pending.remove(&frame.request_id));
	let Some(callback) = callback else {
		warn!(target = "keylink.rpc", id = frame.request_id, "cannot find request to respond to");
		return;
	};

	let result = match (frame.error, frame.result) {
		(Some(error), _) => Err(Error::from(error)),
		(None, Some(result)) => Ok(result),
		(None, None) => Err(Error::rpc("response carried neither result nor error")),
	};

	// Receiver may have been dropped after a timeout
	let _ = callback.send(result);
}
