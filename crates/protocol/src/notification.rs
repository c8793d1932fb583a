//! Unsolicited notifications pushed by the device.

use serde::{Deserialize, Serialize};

use crate::types::LockState;

/// One inbound notification, tagged by category.
///
/// ```json
/// { "core": { "lockStateChanged": "unlocked" } }
/// { "keymap": { "unsavedChangesStatusChanged": true } }
/// { "custom": { "subsystemIndex": 0, "payload": "AQID" } }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Notification {
	Core(CoreNotification),
	Keymap(KeymapNotification),
	Custom(CustomNotification),
}

impl Notification {
	/// Short category name used in logs.
	pub fn kind(&self) -> &'static str {
		match self {
			Self::Core(_) => "core",
			Self::Keymap(_) => "keymap",
			Self::Custom(_) => "custom",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CoreNotification {
	LockStateChanged(LockState),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeymapNotification {
	UnsavedChangesStatusChanged(bool),
}

/// Notification routed to the listeners of one custom subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomNotification {
	pub subsystem_index: u32,
	#[serde(with = "crate::bytes")]
	pub payload: Vec<u8>,
}

impl CustomNotification {
	pub fn new(subsystem_index: u32, payload: Vec<u8>) -> Self {
		Self {
			subsystem_index,
			payload,
		}
	}
}
