//! Session facade: one object for connect, state, listeners, and subsystems.

use std::future::Future;
use std::sync::Arc;

use keylink_protocol::Capability;
use keylink_runtime::{RpcLayer, Transport};
use tokio::sync::watch;

use crate::config::SessionConfig;
use crate::dispatcher::{Listener, NotificationDispatcher, Subscription};
use crate::error::Result;
use crate::lifecycle::ConnectionManager;
use crate::state::{ConnectionStatus, SessionState};
use crate::subsystem::SubsystemClient;

/// Entry point for talking to a device.
///
/// # Example
///
/// ```ignore
/// let session = Session::new(Arc::new(layer));
/// let _sub = session.subscribe(Listener::custom(0, |n| println!("{:?}", n.payload)));
/// session.connect(|| async { Ok(open_serial("/dev/ttyACM0")?) }).await;
///
/// if let Some(rgb) = session.subsystem_for("zmk__rgb") {
///     let reply = rgb.invoke(vec![0x01], None).await?;
/// }
/// session.disconnect();
/// ```
pub struct Session {
	manager: ConnectionManager,
}

impl Session {
	pub fn new(rpc: Arc<dyn RpcLayer>) -> Self {
		Self::with_config(rpc, SessionConfig::default())
	}

	pub fn with_config(rpc: Arc<dyn RpcLayer>, config: SessionConfig) -> Self {
		Self {
			manager: ConnectionManager::new(rpc, config, NotificationDispatcher::new()),
		}
	}

	/// Current snapshot of the session state.
	pub fn state(&self) -> SessionState {
		self.manager.state()
	}

	/// Receiver that is notified whenever the state changes.
	pub fn watch_state(&self) -> watch::Receiver<SessionState> {
		self.manager.watch()
	}

	pub fn status(&self) -> ConnectionStatus {
		self.manager.status()
	}

	pub fn is_connected(&self) -> bool {
		self.manager.is_connected()
	}

	/// Connects over the transport produced by `open`. Never fails directly;
	/// check [`SessionState::error`] afterwards.
	pub async fn connect<F, Fut>(&self, open: F)
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<Box<dyn Transport>>>,
	{
		self.manager.connect(open).await;
	}

	/// Tears down the connection and drops every listener.
	pub fn disconnect(&self) {
		self.manager.disconnect();
	}

	pub fn find_capability(&self, identifier: &str) -> Option<Capability> {
		self.manager.find_capability(identifier)
	}

	/// Registers a notification listener. Listeners survive until
	/// unsubscribed or until the session disconnects.
	pub fn subscribe(&self, listener: Listener) -> Subscription {
		self.manager.dispatcher().subscribe(listener)
	}

	/// Client for the subsystem at `index`, bound to the current connection
	/// (unbound when disconnected).
	pub fn subsystem(&self, index: u32) -> SubsystemClient {
		SubsystemClient::new(self.manager.state().connection, index).with_default_timeout(self.manager.config().request_timeout())
	}

	/// Client for the advertised capability named `identifier`.
	pub fn subsystem_for(&self, identifier: &str) -> Option<SubsystemClient> {
		let capability = self.find_capability(identifier)?;
		Some(self.subsystem(capability.index))
	}

	pub fn dispatcher(&self) -> &NotificationDispatcher {
		self.manager.dispatcher()
	}

	pub fn config(&self) -> &SessionConfig {
		self.manager.config()
	}
}
