//! Externally visible snapshot of a session.

use std::fmt;

use keylink_protocol::{Capability, DeviceInfo};
use keylink_runtime::ConnectionHandle;

/// Lifecycle phase derived from a [`SessionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
	Disconnected,
	Connecting,
	Connected,
}

/// What a UI needs to render the session.
///
/// `connection` is present only while connected, `is_loading` only while a
/// connect is in flight, and `error` only after a connect failed (it is
/// cleared when the next connect starts). `Default` is the disconnected state.
#[derive(Clone, Default)]
pub struct SessionState {
	pub connection: Option<ConnectionHandle>,
	pub device_info: Option<DeviceInfo>,
	/// `None` when the device did not answer the capability query.
	pub capabilities: Option<Vec<Capability>>,
	pub is_loading: bool,
	pub error: Option<String>,
}

impl SessionState {
	pub fn is_connected(&self) -> bool {
		self.connection.is_some()
	}

	pub fn status(&self) -> ConnectionStatus {
		if self.is_loading {
			ConnectionStatus::Connecting
		} else if self.connection.is_some() {
			ConnectionStatus::Connected
		} else {
			ConnectionStatus::Disconnected
		}
	}

	/// First capability whose identifier matches exactly, in fetch order.
	pub fn find_capability(&self, identifier: &str) -> Option<&Capability> {
		self.connection.as_ref()?;
		self.capabilities.as_ref()?.iter().find(|capability| capability.identifier == identifier)
	}
}

impl fmt::Debug for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SessionState")
			.field("connection", &self.connection.as_ref().map(|connection| connection.label()))
			.field("device_info", &self.device_info)
			.field("capabilities", &self.capabilities)
			.field("is_loading", &self.is_loading)
			.field("error", &self.error)
			.finish()
	}
}
