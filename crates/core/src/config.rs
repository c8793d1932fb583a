//! Session tuning loaded from JSON or built in code.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::DEFAULT_TIMEOUT;
use crate::error::Result;

/// Options applied to every connection a [`Session`](crate::Session) makes.
///
/// ```json
/// { "requestTimeoutMs": 5000 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
	/// Deadline for handshake exchanges and the default for subsystem calls.
	pub request_timeout_ms: u64,
}

impl SessionConfig {
	pub fn from_json_str(json: &str) -> Result<Self> {
		Ok(serde_json::from_str(json)?)
	}

	pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
		self.request_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
		self
	}

	pub fn request_timeout(&self) -> Duration {
		Duration::from_millis(self.request_timeout_ms)
	}
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			request_timeout_ms: u64::try_from(DEFAULT_TIMEOUT.as_millis()).unwrap_or(u64::MAX),
		}
	}
}
