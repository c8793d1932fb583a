//! Client for one custom subsystem on the connected device.

use std::time::Duration;

use keylink_protocol::{CustomCall, Request, Response};
use keylink_runtime::{ConnectionHandle, exchange};

use crate::DEFAULT_TIMEOUT;
use crate::error::{Error, Result};

/// Issues request/response exchanges against a fixed subsystem index.
///
/// The index is not checked against the capabilities the device advertised;
/// use [`Session::find_capability`](crate::Session::find_capability) for that.
#[derive(Clone)]
pub struct SubsystemClient {
	connection: Option<ConnectionHandle>,
	index: u32,
	default_timeout: Duration,
}

impl SubsystemClient {
	pub fn new(connection: Option<ConnectionHandle>, index: u32) -> Self {
		Self {
			connection,
			index,
			default_timeout: DEFAULT_TIMEOUT,
		}
	}

	/// Overrides the deadline used when [`invoke`](Self::invoke) gets `None`.
	pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
		self.default_timeout = timeout;
		self
	}

	/// Sends `payload` to the subsystem and returns the response payload.
	///
	/// `Ok(None)` means the device answered without a payload. Exchange
	/// failures and timeouts are returned as-is; a reply that is not a custom
	/// response for this subsystem is an [`Error::Rpc`].
	pub async fn invoke(&self, payload: impl Into<Vec<u8>>, timeout: Option<Duration>) -> Result<Option<Vec<u8>>> {
		let connection = self.connection.as_ref().ok_or(Error::NotConnected)?;
		let request = Request::Custom(CustomCall {
			subsystem_index: self.index,
			payload: payload.into(),
		});

		let response = exchange(connection, request, timeout.unwrap_or(self.default_timeout)).await?;
		match response {
			Response::Custom(reply) if reply.subsystem_index == self.index => Ok(reply.payload),
			Response::Custom(reply) => Err(Error::rpc(format!(
				"response for subsystem {} to a call on subsystem {}",
				reply.subsystem_index, self.index
			))),
			other => Err(Error::rpc(format!("unexpected response to custom call: {other:?}"))),
		}
	}

	pub fn is_bound(&self) -> bool {
		self.connection.is_some()
	}

	pub fn index(&self) -> u32 {
		self.index
	}

	/// Raw connection, for exchanges this client does not cover.
	pub fn connection(&self) -> Option<&ConnectionHandle> {
		self.connection.as_ref()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use keylink_runtime::CancellationToken;
	use keylink_runtime::RpcLayer;
	use keylink_protocol::{CoreResponse, CustomCallResponse};
	use keylink_runtime::fake::{FakeDeviceBuilder, FakeTransport};
	use keylink_runtime::{BoxFuture, InboundStream, RpcConnection};
	use std::sync::Arc;

	/// Connection that answers every call with the same response.
	struct Canned {
		response: Response,
		inbound: InboundStream,
	}

	fn canned(response: Response) -> ConnectionHandle {
		Arc::new(Canned {
			response,
			inbound: InboundStream::new(futures_util::stream::empty()),
		})
	}

	impl RpcConnection for Canned {
		fn label(&self) -> &str {
			"canned"
		}

		fn call(&self, _request: Request) -> BoxFuture<'_, Result<Response>> {
			let response = self.response.clone();
			Box::pin(async move { Ok(response) })
		}

		fn inbound(&self) -> &InboundStream {
			&self.inbound
		}
	}

	#[tokio::test]
	async fn invoke_returns_response_payload() {
		let (layer, device) = FakeDeviceBuilder::new().custom_handler(|_, payload| Some(payload.iter().rev().copied().collect())).build();
		let connection = layer.open_session(FakeTransport::boxed("usb"), CancellationToken::new()).unwrap();
		let client = SubsystemClient::new(Some(connection), 3);

		let reply = client.invoke(vec![1u8, 2, 3], None).await.unwrap();

		assert_eq!(reply, Some(vec![3, 2, 1]));
		assert_eq!(
			device.take_sent(),
			vec![Request::Custom(CustomCall {
				subsystem_index: 3,
				payload: vec![1, 2, 3],
			})]
		);
	}

	#[tokio::test]
	async fn missing_payload_is_empty_not_error() {
		let (layer, _device) = FakeDeviceBuilder::new().build();
		let connection = layer.open_session(FakeTransport::boxed("usb"), CancellationToken::new()).unwrap();
		let client = SubsystemClient::new(Some(connection), 0);

		assert_eq!(client.invoke(vec![0u8], None).await.unwrap(), None);
	}

	#[tokio::test]
	async fn silent_device_times_out() {
		let (layer, _device) = FakeDeviceBuilder::new().silent().build();
		let connection = layer.open_session(FakeTransport::boxed("usb"), CancellationToken::new()).unwrap();
		let client = SubsystemClient::new(Some(connection), 0);

		let error = client.invoke(vec![0u8], Some(Duration::from_millis(30))).await.unwrap_err();
		assert!(error.is_timeout());
	}

	#[tokio::test]
	async fn reply_from_another_subsystem_is_an_error() {
		let client = SubsystemClient::new(
			Some(canned(Response::Custom(CustomCallResponse {
				subsystem_index: 4,
				payload: Some(vec![1]),
			}))),
			2,
		);

		let error = client.invoke(vec![0u8], None).await.unwrap_err();
		assert!(matches!(error, Error::Rpc { code: None, .. }), "got {error:?}");
	}

	#[tokio::test]
	async fn non_custom_reply_is_an_error() {
		let client = SubsystemClient::new(Some(canned(Response::Core(CoreResponse::Locked))), 0);

		let error = client.invoke(vec![0u8], None).await.unwrap_err();
		assert!(matches!(&error, Error::Rpc { message, .. } if message.contains("unexpected response")), "got {error:?}");
	}

	#[tokio::test]
	async fn unbound_client_is_not_connected() {
		let client = SubsystemClient::new(None, 1);

		assert!(!client.is_bound());
		assert_eq!(client.index(), 1);
		assert!(client.connection().is_none());
		assert!(matches!(client.invoke(Vec::<u8>::new(), None).await, Err(Error::NotConnected)));
	}
}
