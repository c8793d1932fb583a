//! In-memory device for testing sessions without hardware.
//!
//! [`FakeDeviceBuilder`] scripts how the device answers requests and produces a
//! [`FakeRpcLayer`] to hand to a session, plus a [`FakeDeviceController`] for
//! pushing notifications, breaking the stream, and inspecting what was sent.
//!
//! # Example
//!
//! ```ignore
//! let (layer, device) = FakeDeviceBuilder::new()
//!     .device_info(DeviceInfo::new("Test Device"))
//!     .capabilities(vec![Capability::new(0, "a")])
//!     .build();
//! let session = Session::new(Arc::new(layer));
//! session.connect(|| async { Ok(FakeTransport::boxed("usb")) }).await;
//! device.notify(Notification::Custom(CustomNotification::new(0, vec![1, 2, 3])));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use keylink_protocol::{
	Capability, CapabilityList, CoreRequest, CoreResponse, CustomCallResponse, DeviceInfo, LockState, Message, MetaError, MetaErrorKind,
	Notification, Request, RequestFrame, Response, ResponseFrame,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::connection::ChannelConnection;
use crate::error::{Error, Result};
use crate::transport::{ConnectionHandle, RpcLayer, Transport};

type CustomHandler = Arc<dyn Fn(u32, &[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// Transport handle that carries nothing but a label.
pub struct FakeTransport {
	label: String,
}

impl FakeTransport {
	pub fn boxed(label: impl Into<String>) -> Box<dyn Transport> {
		Box::new(Self { label: label.into() })
	}
}

impl Transport for FakeTransport {
	fn label(&self) -> &str {
		&self.label
	}
}

/// Builder for scripted fake devices.
pub struct FakeDeviceBuilder {
	device_info: Option<DeviceInfo>,
	capabilities: Option<Vec<Capability>>,
	custom: Option<CustomHandler>,
	silent: bool,
	open_error: Option<String>,
}

impl FakeDeviceBuilder {
	pub fn new() -> Self {
		Self {
			device_info: Some(DeviceInfo::new("Fake Device")),
			capabilities: Some(Vec::new()),
			custom: None,
			silent: false,
			open_error: None,
		}
	}

	pub fn device_info(mut self, info: DeviceInfo) -> Self {
		self.device_info = Some(info);
		self
	}

	/// Answer `getDeviceInfo` with an error.
	pub fn without_device_info(mut self) -> Self {
		self.device_info = None;
		self
	}

	pub fn capabilities(mut self, capabilities: Vec<Capability>) -> Self {
		self.capabilities = Some(capabilities);
		self
	}

	/// Answer `listCapabilities` with an error.
	pub fn failing_capabilities(mut self) -> Self {
		self.capabilities = None;
		self
	}

	/// Handler for custom calls: `(subsystem index, payload) -> response payload`.
	pub fn custom_handler(mut self, handler: impl Fn(u32, &[u8]) -> Option<Vec<u8>> + Send + Sync + 'static) -> Self {
		self.custom = Some(Arc::new(handler));
		self
	}

	/// Record requests but never answer them.
	pub fn silent(mut self) -> Self {
		self.silent = true;
		self
	}

	/// Make `open_session` fail with a transport error.
	pub fn failing_open(mut self, message: impl Into<String>) -> Self {
		self.open_error = Some(message.into());
		self
	}

	pub fn build(self) -> (FakeRpcLayer, FakeDeviceController) {
		let shared = Arc::new(Shared {
			script: Script {
				device_info: self.device_info,
				capabilities: self.capabilities,
				custom: self.custom,
				silent: self.silent,
			},
			device: Mutex::new(None),
			sent: Mutex::new(Vec::new()),
			opened: AtomicUsize::new(0),
		});

		let layer = FakeRpcLayer {
			shared: Arc::clone(&shared),
			open_error: self.open_error,
		};
		(layer, FakeDeviceController { shared })
	}
}

impl Default for FakeDeviceBuilder {
	fn default() -> Self {
		Self::new()
	}
}

struct Script {
	device_info: Option<DeviceInfo>,
	capabilities: Option<Vec<Capability>>,
	custom: Option<CustomHandler>,
	silent: bool,
}

impl Script {
	fn reply(&self, frame: &RequestFrame) -> ResponseFrame {
		let id = frame.request_id;
		let fail = |kind| ResponseFrame::err(id, MetaError { kind, message: None });

		match &frame.request {
			Request::Core(CoreRequest::GetDeviceInfo) => match &self.device_info {
				Some(info) => ResponseFrame::ok(id, Response::Core(CoreResponse::DeviceInfo(info.clone()))),
				None => fail(MetaErrorKind::Generic),
			},
			Request::Core(CoreRequest::GetLockState) => ResponseFrame::ok(id, Response::Core(CoreResponse::LockState(LockState::Unlocked))),
			Request::Core(CoreRequest::Lock) => ResponseFrame::ok(id, Response::Core(CoreResponse::Locked)),
			Request::ListCapabilities => match &self.capabilities {
				Some(capabilities) => ResponseFrame::ok(
					id,
					Response::Capabilities(CapabilityList {
						capabilities: capabilities.clone(),
					}),
				),
				None => fail(MetaErrorKind::RpcNotFound),
			},
			Request::Custom(call) => {
				let payload = self.custom.as_ref().and_then(|handler| handler(call.subsystem_index, &call.payload));
				ResponseFrame::ok(
					id,
					Response::Custom(CustomCallResponse {
						subsystem_index: call.subsystem_index,
						payload,
					}),
				)
			}
		}
	}
}

struct Shared {
	script: Script,
	/// Device side of the current session's inbound channel.
	device: Mutex<Option<mpsc::UnboundedSender<Result<Message>>>>,
	sent: Mutex<Vec<Request>>,
	opened: AtomicUsize,
}

impl Shared {
	fn push(&self, message: Result<Message>) -> bool {
		self.device.lock().as_ref().is_some_and(|tx| tx.send(message).is_ok())
	}
}

/// [`RpcLayer`] backed by the scripted device.
pub struct FakeRpcLayer {
	shared: Arc<Shared>,
	open_error: Option<String>,
}

impl RpcLayer for FakeRpcLayer {
	fn open_session(&self, transport: Box<dyn Transport>, cancel: CancellationToken) -> Result<ConnectionHandle> {
		if let Some(message) = &self.open_error {
			return Err(Error::Transport(message.clone()));
		}

		let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<RequestFrame>();
		let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
		*self.shared.device.lock() = Some(incoming_tx);
		self.shared.opened.fetch_add(1, Ordering::SeqCst);

		let shared = Arc::clone(&self.shared);
		let device_cancel = cancel.clone();
		tokio::spawn(async move {
			loop {
				let frame = tokio::select! {
					_ = device_cancel.cancelled() => break,
					frame = outbound_rx.recv() => match frame {
						Some(frame) => frame,
						None => break,
					},
				};

				shared.sent.lock().push(frame.request.clone());
				if !shared.script.silent {
					shared.push(Ok(Message::Response(shared.script.reply(&frame))));
				}
			}
		});

		let connection = ChannelConnection::spawn(format!("fake:{}", transport.label()), outbound_tx, incoming_rx, cancel);
		Ok(connection)
	}
}

/// Controller for pushing notifications and inspecting sent requests.
#[derive(Clone)]
pub struct FakeDeviceController {
	shared: Arc<Shared>,
}

impl FakeDeviceController {
	/// Pushes a notification onto the current session. Returns `false` if no
	/// session is listening.
	pub fn notify(&self, notification: Notification) -> bool {
		self.shared.push(Ok(Message::Notification(notification)))
	}

	/// Breaks the current session's inbound stream with a transport error.
	pub fn fail_stream(&self, message: impl Into<String>) -> bool {
		self.shared.push(Err(Error::Transport(message.into())))
	}

	/// Closes the current session's inbound stream gracefully.
	pub fn end_stream(&self) {
		self.shared.device.lock().take();
	}

	/// Take all recorded requests, clearing the buffer.
	pub fn take_sent(&self) -> Vec<Request> {
		std::mem::take(&mut *self.shared.sent.lock())
	}

	/// Number of sessions opened on this device.
	pub fn sessions_opened(&self) -> usize {
		self.shared.opened.load(Ordering::SeqCst)
	}
}
