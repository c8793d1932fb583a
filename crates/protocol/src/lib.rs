//! Wire types for the keyboard firmware RPC protocol.
//!
//! This crate contains the serde-serializable envelopes exchanged with a
//! device over an RPC session. These types represent the "protocol layer":
//! the shapes of data as they appear on the wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization
//! * Tagged unions: every envelope is an externally tagged enum whose tag selects
//!   the subsystem (`core`, `keymap`, `custom`, ...)
//! * Stable: Changes only when the wire protocol changes
//!
//! Session lifecycle and notification fan-out are built on top of these types
//! in `keylink`.

pub mod bytes;
pub mod frame;
pub mod notification;
pub mod request;
pub mod response;
pub mod types;

pub use frame::*;
pub use notification::*;
pub use request::*;
pub use response::*;
pub use types::*;
