//! Response envelopes returned by the device for a single request.

use serde::{Deserialize, Serialize};

use crate::types::{CapabilityList, DeviceInfo, LockState};

/// Successful response payload, mirroring the [`Request`](crate::Request) tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Response {
	Core(CoreResponse),
	Capabilities(CapabilityList),
	Custom(CustomCallResponse),
}

impl Response {
	/// Returns the device info if this is a `getDeviceInfo` answer.
	pub fn into_device_info(self) -> Option<DeviceInfo> {
		match self {
			Self::Core(CoreResponse::DeviceInfo(info)) => Some(info),
			_ => None,
		}
	}

	/// Returns the capability list if this is a `listCapabilities` answer.
	pub fn into_capabilities(self) -> Option<CapabilityList> {
		match self {
			Self::Capabilities(list) => Some(list),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CoreResponse {
	DeviceInfo(DeviceInfo),
	LockState(LockState),
	Locked,
}

/// Reply from a custom subsystem. The payload may be absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomCallResponse {
	pub subsystem_index: u32,
	#[serde(default, skip_serializing_if = "Option::is_none", with = "crate::bytes::option")]
	pub payload: Option<Vec<u8>>,
}

/// Error the firmware reports instead of a result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetaError {
	pub kind: MetaErrorKind,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MetaErrorKind {
	Generic,
	UnlockRequired,
	RpcNotFound,
	MsgDecodeFailed,
	MsgEncodeFailed,
	NoResponse,
}

impl MetaErrorKind {
	/// Numeric code as enumerated by the firmware.
	pub fn code(self) -> i32 {
		match self {
			Self::Generic => 0,
			Self::UnlockRequired => 1,
			Self::RpcNotFound => 2,
			Self::MsgDecodeFailed => 3,
			Self::MsgEncodeFailed => 4,
			Self::NoResponse => 5,
		}
	}
}

impl std::fmt::Display for MetaError {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match &self.message {
			Some(message) => write!(f, "{:?}: {message}", self.kind),
			None => write!(f, "{:?}", self.kind),
		}
	}
}
