//! RPC plumbing for keylink sessions.
//!
//! Everything between the session and the device lives here: the shared error
//! vocabulary, the transport/RPC-layer seams, exclusive access to the inbound
//! notification stream, the exchange timeout, and a channel-backed
//! [`ChannelConnection`] that correlates responses with requests.

pub mod connection;
pub mod error;
pub mod fake;
pub mod inbound;
pub mod timeout;
pub mod transport;

pub use connection::ChannelConnection;
pub use error::{Error, Result};
pub use inbound::{InboundStream, NotificationReader, NotificationStream};
pub use timeout::{DEFAULT_TIMEOUT, DEFAULT_TIMEOUT_MESSAGE, with_timeout};
pub use tokio_util::sync::CancellationToken;
pub use transport::{BoxFuture, ConnectionHandle, RpcConnection, RpcLayer, Transport, exchange};
