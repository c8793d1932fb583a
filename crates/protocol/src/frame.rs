//! Frames exchanged on an RPC session.
//!
//! Requests carry a `requestId` the device echoes back on the matching
//! response. Notifications carry no id, which is how inbound [`Message`]s are
//! told apart.

use serde::{Deserialize, Serialize};

use crate::notification::Notification;
use crate::request::Request;
use crate::response::{MetaError, Response};

/// Request frame sent to the device.
///
/// ```json
/// {
///   "requestId": 7,
///   "request": { "core": "getDeviceInfo" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestFrame {
	/// Id used to correlate the response
	pub request_id: u32,
	pub request: Request,
}

/// Response frame received from the device.
///
/// ```json
/// { "requestId": 7, "result": { "core": { "deviceInfo": { "name": "Corne" } } } }
/// ```
///
/// Or with error:
/// ```json
/// { "requestId": 7, "error": { "kind": "unlockRequired" } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseFrame {
	/// Request id this response correlates to
	pub request_id: u32,
	/// Success result (mutually exclusive with error)
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Response>,
	/// Error result (mutually exclusive with result)
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<MetaError>,
}

impl ResponseFrame {
	pub fn ok(request_id: u32, result: Response) -> Self {
		Self {
			request_id,
			result: Some(result),
			error: None,
		}
	}

	pub fn err(request_id: u32, error: MetaError) -> Self {
		Self {
			request_id,
			result: None,
			error: Some(error),
		}
	}
}

/// Discriminated union of inbound frames
///
/// Uses serde's `untagged` to distinguish based on presence of `requestId`:
/// - Frames with `requestId` are responses
/// - Frames without it are notifications
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
	Response(ResponseFrame),
	Notification(Notification),
}
