//! Seams between the session and the RPC layer that talks to the device.
//!
//! The session never touches bytes. It asks an [`RpcLayer`] to open a session
//! over an opaque [`Transport`] handle and then exchanges typed envelopes on
//! the resulting [`RpcConnection`].

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use keylink_protocol::{Request, Response};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::inbound::InboundStream;
use crate::timeout::with_timeout;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Physical link to a device (serial port, USB endpoint, BLE characteristic...).
///
/// Opaque to the session; only the RPC layer knows how to drive it.
pub trait Transport: Send + 'static {
	/// Human-readable description for logs.
	fn label(&self) -> &str;
}

/// An open RPC session with one device.
pub trait RpcConnection: Send + Sync {
	fn label(&self) -> &str;

	/// Sends one request and resolves with its matching response.
	fn call(&self, request: Request) -> BoxFuture<'_, Result<Response>>;

	/// Inbound notification stream of this session.
	fn inbound(&self) -> &InboundStream;
}

pub type ConnectionHandle = Arc<dyn RpcConnection>;

/// Opens RPC sessions over transports.
pub trait RpcLayer: Send + Sync {
	/// Establishes a session bound to `cancel`. Triggering the token must make
	/// the session release its I/O and end its inbound stream.
	fn open_session(&self, transport: Box<dyn Transport>, cancel: CancellationToken) -> Result<ConnectionHandle>;
}

/// Performs one exchange on `connection`, bounded by `timeout`.
pub async fn exchange(connection: &ConnectionHandle, request: Request, timeout: Duration) -> Result<Response> {
	let connection = Arc::clone(connection);
	with_timeout(async move { connection.call(request).await }, timeout, None).await
}
