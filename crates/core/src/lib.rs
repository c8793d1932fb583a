//! Session management for keyboard firmware RPC.
//!
//! A [`Session`] owns at most one device connection at a time. Connecting
//! opens a transport, establishes an RPC session over it, and fetches the
//! device info and advertised capabilities. While connected, a background loop
//! reads the device's notification stream and fans each notification out to
//! the listeners registered with [`Session::subscribe`]. Custom subsystems are
//! reached through [`SubsystemClient`].
//!
//! The RPC layer itself is pluggable through [`RpcLayer`]; the
//! `keylink_runtime::fake` module provides an in-memory device for tests.

pub mod config;
pub mod dispatcher;
pub mod lifecycle;
pub mod session;
pub mod state;
pub mod subsystem;

pub use keylink_runtime::error;

/// Default deadline for request/response exchanges.
pub use keylink_runtime::DEFAULT_TIMEOUT;

pub use config::SessionConfig;
pub use dispatcher::{ConsumeOutcome, CoreCallback, CustomCallback, DispatchState, KeymapCallback, Listener, NotificationDispatcher, Subscription};
pub use error::{Error, Result};
pub use keylink_protocol::{
	Capability, CoreNotification, CustomNotification, DeviceInfo, KeymapNotification, LockState, Notification, Request, Response,
};
pub use keylink_runtime::{CancellationToken, ConnectionHandle, RpcConnection, RpcLayer, Transport, with_timeout};
pub use lifecycle::ConnectionManager;
pub use session::Session;
pub use state::{ConnectionStatus, SessionState};
pub use subsystem::SubsystemClient;
