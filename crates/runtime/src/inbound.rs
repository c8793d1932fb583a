//! Exclusive access to a connection's inbound notification stream.

use std::pin::Pin;
use std::sync::Arc;

use futures_util::{Stream, StreamExt};
use keylink_protocol::Notification;
use parking_lot::Mutex;

use crate::error::{Error, Result};

pub type NotificationStream = Pin<Box<dyn Stream<Item = Result<Notification>> + Send>>;

/// Holder of the inbound stream. At most one [`NotificationReader`] exists at
/// a time.
pub struct InboundStream {
	slot: Arc<Mutex<Option<NotificationStream>>>,
}

impl InboundStream {
	pub fn new(stream: impl Stream<Item = Result<Notification>> + Send + 'static) -> Self {
		Self {
			slot: Arc::new(Mutex::new(Some(Box::pin(stream)))),
		}
	}

	/// Takes the exclusive reader. Fails with [`Error::ReaderBusy`] while
	/// another reader is alive.
	pub fn acquire(&self) -> Result<NotificationReader> {
		let stream = self.slot.lock().take().ok_or(Error::ReaderBusy)?;
		Ok(NotificationReader {
			slot: Arc::clone(&self.slot),
			stream: Some(stream),
		})
	}

	/// Returns `true` while a reader holds the stream.
	pub fn is_locked(&self) -> bool {
		self.slot.lock().is_none()
	}
}

/// Scoped reader; hands the stream back when dropped.
pub struct NotificationReader {
	slot: Arc<Mutex<Option<NotificationStream>>>,
	stream: Option<NotificationStream>,
}

impl NotificationReader {
	/// Next notification, or `None` once the stream has completed.
	pub async fn next(&mut self) -> Option<Result<Notification>> {
		self.stream.as_mut()?.next().await
	}
}

impl Drop for NotificationReader {
	fn drop(&mut self) {
		if let Some(stream) = self.stream.take() {
			*self.slot.lock() = Some(stream);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use keylink_protocol::CustomNotification;

	fn custom(index: u32) -> Result<Notification> {
		Ok(Notification::Custom(CustomNotification::new(index, vec![])))
	}

	#[tokio::test]
	async fn reader_is_exclusive_until_dropped() {
		let inbound = InboundStream::new(futures_util::stream::iter(vec![custom(0), custom(1)]));

		let mut reader = inbound.acquire().unwrap();
		assert!(inbound.is_locked());
		assert!(matches!(inbound.acquire(), Err(Error::ReaderBusy)));

		assert!(matches!(reader.next().await, Some(Ok(Notification::Custom(n))) if n.subsystem_index == 0));
		drop(reader);
		assert!(!inbound.is_locked());

		let mut reader = inbound.acquire().unwrap();
		assert!(matches!(reader.next().await, Some(Ok(Notification::Custom(n))) if n.subsystem_index == 1));
		assert!(reader.next().await.is_none());
	}
}
