//! Error vocabulary shared by the RPC layer and the session.

use keylink_protocol::MetaError;

/// Result alias used across keylink.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	/// Deadline elapsed before the operation settled.
	#[error("{message}")]
	Timeout { message: String },

	/// Exchange failure reported by the RPC layer or the device.
	#[error("RPC error: {message}")]
	Rpc { message: String, code: Option<i32> },

	/// Reserved for callers validating requests before sending them.
	#[error("Validation error: {0}")]
	Validation(String),

	/// Any step of the connect handshake failed.
	#[error("{0}")]
	Connect(String),

	/// The inbound notification stream failed while not cancelled.
	#[error("Notification stream failed: {0}")]
	NotificationStream(String),

	#[error("Transport error: {0}")]
	Transport(String),

	#[error("No device connection is bound")]
	NotConnected,

	#[error("Notification stream is already being read")]
	ReaderBusy,

	#[error("Connection closed before a response arrived")]
	ChannelClosed,

	#[error("Operation cancelled")]
	Cancelled,

	#[error("Serialization error: {0}")]
	Serde(#[from] serde_json::Error),
}

impl Error {
	pub fn rpc(message: impl Into<String>) -> Self {
		Self::Rpc {
			message: message.into(),
			code: None,
		}
	}

	pub fn is_timeout(&self) -> bool {
		matches!(self, Self::Timeout { .. })
	}

	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Cancelled)
	}
}

impl From<MetaError> for Error {
	fn from(error: MetaError) -> Self {
		Self::Rpc {
			message: error.to_string(),
			code: Some(error.kind.code()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use keylink_protocol::MetaErrorKind;

	#[test]
	fn meta_error_maps_to_rpc_with_code() {
		let error = Error::from(MetaError {
			kind: MetaErrorKind::UnlockRequired,
			message: None,
		});

		match error {
			Error::Rpc { message, code } => {
				assert_eq!(message, "UnlockRequired");
				assert_eq!(code, Some(1));
			}
			other => panic!("Expected Rpc error, got {other:?}"),
		}
	}

	#[test]
	fn timeout_displays_its_message() {
		let error = Error::Timeout {
			message: "Request timed out".to_string(),
		};
		assert!(error.is_timeout());
		assert_eq!(error.to_string(), "Request timed out");
	}
}
