//! Request envelopes sent from the host to the device.

use serde::{Deserialize, Serialize};

/// A single logical request, tagged by the subsystem that handles it.
///
/// ```json
/// { "core": "getDeviceInfo" }
/// "listCapabilities"
/// { "custom": { "subsystemIndex": 0, "payload": "AQID" } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Request {
	/// Built-in core subsystem.
	Core(CoreRequest),
	/// Enumerate the custom subsystems the firmware exposes.
	ListCapabilities,
	/// Opaque call routed to one custom subsystem.
	Custom(CustomCall),
}

impl Request {
	/// Short name used in logs.
	pub fn kind(&self) -> &'static str {
		match self {
			Self::Core(_) => "core",
			Self::ListCapabilities => "listCapabilities",
			Self::Custom(_) => "custom",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CoreRequest {
	GetDeviceInfo,
	GetLockState,
	Lock,
}

/// Call addressed to a custom subsystem by index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomCall {
	pub subsystem_index: u32,
	#[serde(with = "crate::bytes")]
	pub payload: Vec<u8>,
}
