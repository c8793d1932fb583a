//! Connection lifecycle: connect handshake, notification loop, teardown.
//!
//! # Connect sequence
//!
//! 1. Mark the state as loading and clear any previous error
//! 2. Create a fresh cancellation token for this epoch
//! 3. Open the transport
//! 4. Open an RPC session over it, bound to the token
//! 5. Fetch device info (failure aborts the connect)
//! 6. Fetch the capability list (failure leaves `capabilities` empty)
//! 7. Publish the connected state and start the notification loop
//!
//! Failures never escape [`ConnectionManager::connect`]; they end up in
//! [`SessionState::error`].

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use keylink_protocol::{Capability, CoreRequest, DeviceInfo, Request};
use keylink_runtime::{CancellationToken, ConnectionHandle, RpcLayer, Transport, exchange};
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::dispatcher::{ConsumeOutcome, NotificationDispatcher};
use crate::error::{Error, Result};
use crate::state::{ConnectionStatus, SessionState};

struct Handshake {
	connection: ConnectionHandle,
	device_info: DeviceInfo,
	capabilities: Option<Vec<Capability>>,
}

struct Inner {
	rpc: Arc<dyn RpcLayer>,
	config: SessionConfig,
	state: watch::Sender<SessionState>,
	/// Token of the latest connect attempt, tagged with its epoch.
	cancel: Mutex<Option<(u64, CancellationToken)>>,
	/// Token of the epoch whose connection is currently published.
	published: Mutex<Option<(u64, CancellationToken)>>,
	epoch: AtomicU64,
	dispatcher: NotificationDispatcher,
}

/// Owns the single current connection and drives its lifecycle.
pub struct ConnectionManager {
	inner: Arc<Inner>,
}

impl ConnectionManager {
	pub fn new(rpc: Arc<dyn RpcLayer>, config: SessionConfig, dispatcher: NotificationDispatcher) -> Self {
		let (state, _) = watch::channel(SessionState::default());
		Self {
			inner: Arc::new(Inner {
				rpc,
				config,
				state,
				cancel: Mutex::new(None),
				published: Mutex::new(None),
				epoch: AtomicU64::new(0),
				dispatcher,
			}),
		}
	}

	/// Runs the connect sequence over the transport produced by `open`.
	///
	/// Concurrent calls are not serialized: whichever finishes last decides
	/// the published state. Publishing a connection shuts down the one it
	/// replaces. An attempt whose token was cancelled by [`disconnect`]
	/// publishes nothing.
	///
	/// [`disconnect`]: Self::disconnect
	pub async fn connect<F, Fut>(&self, open: F)
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<Box<dyn Transport>>>,
	{
		let inner = &self.inner;
		inner.state.send_modify(|state| {
			state.is_loading = true;
			state.error = None;
		});

		let epoch = inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
		let token = CancellationToken::new();
		*inner.cancel.lock() = Some((epoch, token.clone()));

		match inner.handshake(open, &token).await {
			Ok(handshake) => {
				let device = handshake.device_info.name.clone();
				let capabilities = handshake.capabilities.as_ref().map_or(0, Vec::len);
				let connection = Arc::clone(&handshake.connection);
				if !inner.publish(epoch, &token, handshake) {
					debug!(target = "keylink.session", epoch, "connect aborted by disconnect");
					return;
				}
				info!(target = "keylink.session", epoch, device = %device, capabilities, "device connected");
				inner.start_consuming(epoch, connection, token);
			}
			Err(e) if token.is_cancelled() => {
				debug!(target = "keylink.session", epoch, error = %e, "connect aborted by disconnect");
				inner.release_token(epoch);
			}
			Err(e) => {
				error!(target = "keylink.session", epoch, error = %e, "failed to connect");
				token.cancel();
				inner.release_token(epoch);
				inner.state.send_replace(SessionState {
					error: Some(e.to_string()),
					..Default::default()
				});
			}
		}
	}

	/// Cancels the current epoch, drops every listener, and resets the state.
	/// Safe to call at any time.
	pub fn disconnect(&self) {
		self.inner.disconnect();
	}

	pub fn state(&self) -> SessionState {
		self.inner.state.borrow().clone()
	}

	/// Receiver notified on every state change.
	pub fn watch(&self) -> watch::Receiver<SessionState> {
		self.inner.state.subscribe()
	}

	pub fn status(&self) -> ConnectionStatus {
		self.inner.state.borrow().status()
	}

	pub fn is_connected(&self) -> bool {
		self.inner.state.borrow().is_connected()
	}

	pub fn find_capability(&self, identifier: &str) -> Option<Capability> {
		self.inner.state.borrow().find_capability(identifier).cloned()
	}

	pub fn dispatcher(&self) -> &NotificationDispatcher {
		&self.inner.dispatcher
	}

	pub fn config(&self) -> &SessionConfig {
		&self.inner.config
	}
}

impl Drop for ConnectionManager {
	fn drop(&mut self) {
		if let Some((_, token)) = self.inner.cancel.lock().take() {
			token.cancel();
		}
		if let Some((_, token)) = self.inner.published.lock().take() {
			token.cancel();
		}
	}
}

impl Inner {
	async fn handshake<F, Fut>(&self, open: F, token: &CancellationToken) -> Result<Handshake>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<Box<dyn Transport>>>,
	{
		let transport = open().await?;
		debug!(target = "keylink.session", transport = transport.label(), "transport opened");

		let connection = self.rpc.open_session(transport, token.clone())?;
		debug!(target = "keylink.session", connection = connection.label(), "rpc session established");

		let device_info = self
			.fetch_device_info(&connection)
			.await
			.ok_or_else(|| Error::Connect("Failed to get device info".to_string()))?;
		let capabilities = self.fetch_capabilities(&connection).await;

		Ok(Handshake {
			connection,
			device_info,
			capabilities,
		})
	}

	async fn fetch_device_info(&self, connection: &ConnectionHandle) -> Option<DeviceInfo> {
		match exchange(connection, Request::Core(CoreRequest::GetDeviceInfo), self.config.request_timeout()).await {
			Ok(response) => {
				let info = response.into_device_info();
				if info.is_none() {
					warn!(target = "keylink.session", "device info response carried no payload");
				}
				info
			}
			Err(e) => {
				warn!(target = "keylink.session", error = %e, "device info request failed");
				None
			}
		}
	}

	async fn fetch_capabilities(&self, connection: &ConnectionHandle) -> Option<Vec<Capability>> {
		match exchange(connection, Request::ListCapabilities, self.config.request_timeout()).await {
			Ok(response) => response.into_capabilities().map(|list| list.capabilities),
			Err(e) => {
				warn!(target = "keylink.session", error = %e, "capability list request failed");
				None
			}
		}
	}

	/// Stores the handshake result as the current connection and cancels the
	/// previously published epoch. Returns `false` if `token` was already
	/// cancelled.
	fn publish(&self, epoch: u64, token: &CancellationToken, handshake: Handshake) -> bool {
		let mut published = self.published.lock();
		if token.is_cancelled() {
			return false;
		}

		if let Some((previous, old)) = published.replace((epoch, token.clone())) {
			old.cancel();
			debug!(target = "keylink.session", epoch, previous, "superseded connection closed");
		}
		self.state.send_replace(SessionState {
			connection: Some(handshake.connection),
			device_info: Some(handshake.device_info),
			capabilities: handshake.capabilities,
			is_loading: false,
			error: None,
		});
		true
	}

	fn start_consuming(self: &Arc<Self>, epoch: u64, connection: ConnectionHandle, token: CancellationToken) {
		let dispatcher = self.dispatcher.clone();
		let manager: Weak<Inner> = Arc::downgrade(self);

		tokio::spawn(async move {
			match dispatcher.consume(connection.as_ref(), &token).await {
				ConsumeOutcome::Failed(e) => {
					error!(target = "keylink.session", epoch, error = %e, "notification stream failed, disconnecting");
					if let Some(inner) = manager.upgrade() {
						inner.disconnect_epoch(epoch);
					}
				}
				ConsumeOutcome::Ended => debug!(target = "keylink.session", epoch, "notification stream ended"),
				ConsumeOutcome::Cancelled => debug!(target = "keylink.session", epoch, "notification loop cancelled"),
			}
		});
	}

	fn disconnect(&self) {
		let current = self.cancel.lock().take();
		if let Some((epoch, token)) = current {
			token.cancel();
			debug!(target = "keylink.session", epoch, "epoch cancelled");
		}

		let mut published = self.published.lock();
		if let Some((_, token)) = published.take() {
			token.cancel();
		}
		self.dispatcher.reset();
		let was_connected = self.state.borrow().is_connected();
		self.state.send_replace(SessionState::default());
		drop(published);
		if was_connected {
			info!(target = "keylink.session", "device disconnected");
		}
	}

	/// Tears down only if `epoch` is still the published one.
	fn disconnect_epoch(&self, epoch: u64) {
		let current = self.published.lock().as_ref().map(|(current, _)| *current);
		if current == Some(epoch) {
			self.disconnect();
		} else {
			debug!(target = "keylink.session", epoch, ?current, "ignoring teardown from stale epoch");
		}
	}

	fn release_token(&self, epoch: u64) {
		let mut slot = self.cancel.lock();
		if slot.as_ref().is_some_and(|(current, _)| *current == epoch) {
			*slot = None;
		}
	}
}
