//! Shared value types carried inside envelopes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identity reported by the device during the connect handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
	/// Human-readable device name.
	pub name: String,
	/// Raw serial number bytes (base64 on the wire).
	#[serde(default, with = "crate::bytes")]
	pub serial_number: Vec<u8>,
}

impl DeviceInfo {
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			serial_number: Vec::new(),
		}
	}
}

/// Whether the device currently accepts privileged requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LockState {
	Locked,
	Unlocked,
}

/// A custom subsystem advertised by the firmware.
///
/// `index` addresses the subsystem on the wire; `identifier` is the stable,
/// human-readable name callers look it up by. Any additional fields the
/// firmware attaches are preserved in `extra`.
///
/// ```json
/// { "index": 1, "identifier": "rgb-underglow", "version": 2 }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
	pub index: u32,
	pub identifier: String,
	#[serde(flatten)]
	pub extra: Map<String, Value>,
}

impl Capability {
	pub fn new(index: u32, identifier: impl Into<String>) -> Self {
		Self {
			index,
			identifier: identifier.into(),
			extra: Map::new(),
		}
	}
}

/// Payload of a capability-list response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityList {
	#[serde(default)]
	pub capabilities: Vec<Capability>,
}
