//! Fan-out of inbound notifications to registered listeners.
//!
//! Listeners are kept in three registries: core, keymap, and custom. The
//! custom registry is keyed by subsystem index. Each subscription is assigned
//! a unique token; within one registry entry listeners run in subscription
//! order.
//!
//! Dispatch works on a snapshot of the matching listeners, so a callback may
//! unsubscribe itself (or anyone else) while it runs. Listeners added during a
//! dispatch only see later notifications.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use keylink_protocol::{CoreNotification, CustomNotification, KeymapNotification, Notification};
use keylink_runtime::{CancellationToken, RpcConnection};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::Error;

pub type CoreCallback = Arc<dyn Fn(&CoreNotification) + Send + Sync>;
pub type KeymapCallback = Arc<dyn Fn(&KeymapNotification) + Send + Sync>;
pub type CustomCallback = Arc<dyn Fn(&CustomNotification) + Send + Sync>;

/// A callback together with the notifications it wants.
pub enum Listener {
	Core(CoreCallback),
	Keymap(KeymapCallback),
	Custom { index: u32, callback: CustomCallback },
}

impl Listener {
	pub fn core(callback: impl Fn(&CoreNotification) + Send + Sync + 'static) -> Self {
		Self::Core(Arc::new(callback))
	}

	pub fn keymap(callback: impl Fn(&KeymapNotification) + Send + Sync + 'static) -> Self {
		Self::Keymap(Arc::new(callback))
	}

	/// Listener for notifications from the custom subsystem at `index`.
	pub fn custom(index: u32, callback: impl Fn(&CustomNotification) + Send + Sync + 'static) -> Self {
		Self::Custom {
			index,
			callback: Arc::new(callback),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
	Core,
	Keymap,
	Custom(u32),
}

#[derive(Default)]
struct Registry {
	core: BTreeMap<u64, CoreCallback>,
	keymap: BTreeMap<u64, KeymapCallback>,
	custom: HashMap<u32, BTreeMap<u64, CustomCallback>>,
}

impl Registry {
	fn remove(&mut self, slot: Slot, token: u64) -> bool {
		match slot {
			Slot::Core => self.core.remove(&token).is_some(),
			Slot::Keymap => self.keymap.remove(&token).is_some(),
			Slot::Custom(index) => {
				let Some(listeners) = self.custom.get_mut(&index) else {
					return false;
				};
				let removed = listeners.remove(&token).is_some();
				if listeners.is_empty() {
					self.custom.remove(&index);
				}
				removed
			}
		}
	}

	fn contains(&self, slot: Slot, token: u64) -> bool {
		match slot {
			Slot::Core => self.core.contains_key(&token),
			Slot::Keymap => self.keymap.contains_key(&token),
			Slot::Custom(index) => self.custom.get(&index).is_some_and(|listeners| listeners.contains_key(&token)),
		}
	}

	fn len(&self) -> usize {
		self.core.len() + self.keymap.len() + self.custom.values().map(BTreeMap::len).sum::<usize>()
	}
}

/// Where the dispatcher is in its current epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
	/// Never attached to a connection.
	Idle,
	/// Reading a connection's inbound stream.
	Consuming,
	/// Reader released; listeners kept until the next epoch or a reset.
	Stopped,
}

/// Why a consumption loop ended.
#[derive(Debug)]
pub enum ConsumeOutcome {
	/// The stream completed.
	Ended,
	/// The epoch's token was triggered.
	Cancelled,
	/// The stream failed while not cancelled.
	Failed(Error),
}

struct Inner {
	registry: Mutex<Registry>,
	next_token: AtomicU64,
	/// Consumption loops currently holding a reader.
	active: AtomicUsize,
	started: AtomicBool,
}

/// Listener registries plus the loop that feeds them.
#[derive(Clone)]
pub struct NotificationDispatcher {
	inner: Arc<Inner>,
}

impl NotificationDispatcher {
	pub fn new() -> Self {
		Self {
			inner: Arc::new(Inner {
				registry: Mutex::new(Registry::default()),
				next_token: AtomicU64::new(0),
				active: AtomicUsize::new(0),
				started: AtomicBool::new(false),
			}),
		}
	}

	/// Registers `listener` and returns the handle that removes it.
	pub fn subscribe(&self, listener: Listener) -> Subscription {
		let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed);
		let mut registry = self.inner.registry.lock();
		let slot = match listener {
			Listener::Core(callback) => {
				registry.core.insert(token, callback);
				Slot::Core
			}
			Listener::Keymap(callback) => {
				registry.keymap.insert(token, callback);
				Slot::Keymap
			}
			Listener::Custom { index, callback } => {
				registry.custom.entry(index).or_default().insert(token, callback);
				Slot::Custom(index)
			}
		};

		Subscription {
			dispatcher: Arc::downgrade(&self.inner),
			slot,
			token,
			unsubscribed: AtomicBool::new(false),
		}
	}

	/// Delivers `notification` to every listener registered for it right now.
	///
	/// Returns how many listeners were invoked.
	pub fn dispatch(&self, notification: &Notification) -> usize {
		match notification {
			Notification::Core(inner) => {
				let listeners: Vec<CoreCallback> = self.inner.registry.lock().core.values().cloned().collect();
				listeners.iter().for_each(|listener| listener(inner));
				listeners.len()
			}
			Notification::Keymap(inner) => {
				let listeners: Vec<KeymapCallback> = self.inner.registry.lock().keymap.values().cloned().collect();
				listeners.iter().for_each(|listener| listener(inner));
				listeners.len()
			}
			Notification::Custom(inner) => {
				let listeners: Vec<CustomCallback> = self
					.inner
					.registry
					.lock()
					.custom
					.get(&inner.subsystem_index)
					.map(|listeners| listeners.values().cloned().collect())
					.unwrap_or_default();
				listeners.iter().for_each(|listener| listener(inner));
				listeners.len()
			}
		}
	}

	/// Reads `connection`'s inbound stream and dispatches each notification
	/// until the stream ends, `cancel` fires, or the stream fails.
	///
	/// Each notification is fully dispatched before the next one is read. The
	/// reader is released when this returns, whatever the reason.
	pub async fn consume(&self, connection: &dyn RpcConnection, cancel: &CancellationToken) -> ConsumeOutcome {
		let mut reader = match connection.inbound().acquire() {
			Ok(reader) => reader,
			Err(e) => return ConsumeOutcome::Failed(e),
		};
		self.inner.started.store(true, Ordering::SeqCst);
		self.inner.active.fetch_add(1, Ordering::SeqCst);
		debug!(target = "keylink.dispatch", connection = connection.label(), "notification loop started");

		let outcome = loop {
			let next = tokio::select! {
				biased;
				_ = cancel.cancelled() => break ConsumeOutcome::Cancelled,
				next = reader.next() => next,
			};

			match next {
				Some(Ok(notification)) => {
					let delivered = self.dispatch(&notification);
					trace!(target = "keylink.dispatch", kind = notification.kind(), delivered, "notification dispatched");
				}
				// Reads failing because the session is being torn down are expected
				Some(Err(_)) | None if cancel.is_cancelled() => break ConsumeOutcome::Cancelled,
				Some(Err(e)) => break ConsumeOutcome::Failed(Error::NotificationStream(e.to_string())),
				None => break ConsumeOutcome::Ended,
			}
		};

		drop(reader);
		self.inner.active.fetch_sub(1, Ordering::SeqCst);
		debug!(target = "keylink.dispatch", connection = connection.label(), outcome = ?outcome, "notification loop exited");
		outcome
	}

	/// Drops every listener in every registry.
	pub fn reset(&self) {
		*self.inner.registry.lock() = Registry::default();
	}

	/// `Consuming` while any loop holds a reader, so a superseded loop
	/// exiting late does not mask the current one.
	pub fn state(&self) -> DispatchState {
		if self.inner.active.load(Ordering::SeqCst) > 0 {
			DispatchState::Consuming
		} else if self.inner.started.load(Ordering::SeqCst) {
			DispatchState::Stopped
		} else {
			DispatchState::Idle
		}
	}

	/// Total number of registered listeners.
	pub fn listener_count(&self) -> usize {
		self.inner.registry.lock().len()
	}

	/// Subsystem indices that currently have at least one listener.
	pub fn custom_indices(&self) -> Vec<u32> {
		let mut indices: Vec<u32> = self.inner.registry.lock().custom.keys().copied().collect();
		indices.sort_unstable();
		indices
	}
}

impl Default for NotificationDispatcher {
	fn default() -> Self {
		Self::new()
	}
}

/// Handle returned by [`NotificationDispatcher::subscribe`].
///
/// Dropping the handle leaves the listener registered.
pub struct Subscription {
	dispatcher: Weak<Inner>,
	slot: Slot,
	token: u64,
	unsubscribed: AtomicBool,
}

impl Subscription {
	/// Removes exactly this listener. Calling it again is a no-op.
	pub fn unsubscribe(&self) {
		if self.unsubscribed.swap(true, Ordering::SeqCst) {
			return;
		}
		if let Some(inner) = self.dispatcher.upgrade() {
			inner.registry.lock().remove(self.slot, self.token);
		}
	}

	/// Returns `true` while the listener is still registered.
	pub fn is_active(&self) -> bool {
		!self.unsubscribed.load(Ordering::SeqCst)
			&& self.dispatcher.upgrade().is_some_and(|inner| inner.registry.lock().contains(self.slot, self.token))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use futures_util::stream;
	use keylink_protocol::{LockState, Request, Response};
	use keylink_runtime::{BoxFuture, InboundStream};

	struct StreamOnly {
		inbound: InboundStream,
	}

	impl StreamOnly {
		fn new(items: impl futures_util::Stream<Item = keylink_runtime::Result<Notification>> + Send + 'static) -> Self {
			Self {
				inbound: InboundStream::new(items),
			}
		}
	}

	impl RpcConnection for StreamOnly {
		fn label(&self) -> &str {
			"stream-only"
		}

		fn call(&self, _request: Request) -> BoxFuture<'_, keylink_runtime::Result<Response>> {
			Box::pin(async { Err(Error::NotConnected) })
		}

		fn inbound(&self) -> &InboundStream {
			&self.inbound
		}
	}

	fn custom(index: u32, payload: Vec<u8>) -> Notification {
		Notification::Custom(CustomNotification::new(index, payload))
	}

	#[test]
	fn custom_listeners_are_routed_by_index() {
		let dispatcher = NotificationDispatcher::new();
		let seen = Arc::new(Mutex::new(Vec::new()));

		let sink = Arc::clone(&seen);
		dispatcher.subscribe(Listener::custom(0, move |n| sink.lock().push((0, n.payload.clone()))));
		let sink = Arc::clone(&seen);
		dispatcher.subscribe(Listener::custom(1, move |n| sink.lock().push((1, n.payload.clone()))));

		assert_eq!(dispatcher.dispatch(&custom(1, vec![7])), 1);
		assert_eq!(dispatcher.dispatch(&custom(2, vec![8])), 0);

		assert_eq!(*seen.lock(), vec![(1, vec![7])]);
	}

	#[test]
	fn categories_do_not_leak_into_each_other() {
		let dispatcher = NotificationDispatcher::new();
		let core_calls = Arc::new(AtomicUsize::new(0));
		let keymap_calls = Arc::new(AtomicUsize::new(0));

		let counter = Arc::clone(&core_calls);
		dispatcher.subscribe(Listener::core(move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
		}));
		let counter = Arc::clone(&keymap_calls);
		dispatcher.subscribe(Listener::keymap(move |n| {
			assert_eq!(*n, KeymapNotification::UnsavedChangesStatusChanged(true));
			counter.fetch_add(1, Ordering::SeqCst);
		}));

		dispatcher.dispatch(&Notification::Core(CoreNotification::LockStateChanged(LockState::Locked)));
		dispatcher.dispatch(&Notification::Keymap(KeymapNotification::UnsavedChangesStatusChanged(true)));
		dispatcher.dispatch(&custom(0, vec![]));

		assert_eq!(core_calls.load(Ordering::SeqCst), 1);
		assert_eq!(keymap_calls.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn listeners_run_in_subscription_order() {
		let dispatcher = NotificationDispatcher::new();
		let order = Arc::new(Mutex::new(Vec::new()));

		for id in 0..4 {
			let order = Arc::clone(&order);
			dispatcher.subscribe(Listener::custom(5, move |_| order.lock().push(id)));
		}
		dispatcher.dispatch(&custom(5, vec![]));

		assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
	}

	#[test]
	fn unsubscribe_is_idempotent_and_prunes_index() {
		let dispatcher = NotificationDispatcher::new();
		let calls = Arc::new(AtomicUsize::new(0));

		let counter = Arc::clone(&calls);
		let subscription = dispatcher.subscribe(Listener::custom(3, move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
		}));
		let other = dispatcher.subscribe(Listener::custom(4, |_| {}));

		assert!(subscription.is_active());
		subscription.unsubscribe();
		subscription.unsubscribe();
		assert!(!subscription.is_active());

		dispatcher.dispatch(&custom(3, vec![1]));
		assert_eq!(calls.load(Ordering::SeqCst), 0);
		assert_eq!(dispatcher.custom_indices(), vec![4]);
		assert!(other.is_active());
	}

	#[test]
	fn unsubscribe_removes_only_its_own_listener() {
		let dispatcher = NotificationDispatcher::new();
		let calls = Arc::new(AtomicUsize::new(0));

		let first = dispatcher.subscribe(Listener::core(|_| {}));
		let counter = Arc::clone(&calls);
		dispatcher.subscribe(Listener::core(move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
		}));

		first.unsubscribe();
		dispatcher.dispatch(&Notification::Core(CoreNotification::LockStateChanged(LockState::Unlocked)));

		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert_eq!(dispatcher.listener_count(), 1);
	}

	#[test]
	fn listener_may_unsubscribe_itself_mid_dispatch() {
		let dispatcher = NotificationDispatcher::new();
		let calls = Arc::new(AtomicUsize::new(0));
		let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

		let counter = Arc::clone(&calls);
		let own = Arc::clone(&slot);
		let subscription = dispatcher.subscribe(Listener::custom(0, move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
			if let Some(subscription) = own.lock().as_ref() {
				subscription.unsubscribe();
			}
		}));
		*slot.lock() = Some(subscription);

		let later = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&later);
		dispatcher.subscribe(Listener::custom(0, move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
		}));

		assert_eq!(dispatcher.dispatch(&custom(0, vec![])), 2);
		assert_eq!(dispatcher.dispatch(&custom(0, vec![])), 1);
		assert_eq!(calls.load(Ordering::SeqCst), 1);
		assert_eq!(later.load(Ordering::SeqCst), 2);
	}

	#[test]
	fn listener_added_mid_dispatch_waits_for_next_notification() {
		let dispatcher = NotificationDispatcher::new();
		let late_calls = Arc::new(AtomicUsize::new(0));
		let added = Arc::new(AtomicBool::new(false));

		let registrar = dispatcher.clone();
		let counter = Arc::clone(&late_calls);
		let flag = Arc::clone(&added);
		dispatcher.subscribe(Listener::custom(0, move |_| {
			if !flag.swap(true, Ordering::SeqCst) {
				let counter = Arc::clone(&counter);
				registrar.subscribe(Listener::custom(0, move |_| {
					counter.fetch_add(1, Ordering::SeqCst);
				}));
			}
		}));

		assert_eq!(dispatcher.dispatch(&custom(0, vec![1])), 1);
		assert_eq!(late_calls.load(Ordering::SeqCst), 0);

		assert_eq!(dispatcher.dispatch(&custom(0, vec![2])), 2);
		assert_eq!(late_calls.load(Ordering::SeqCst), 1);
		dispatcher.reset();
	}

	#[tokio::test]
	async fn consume_delivers_until_stream_ends() {
		let dispatcher = NotificationDispatcher::new();
		let seen = Arc::new(Mutex::new(Vec::new()));
		let sink = Arc::clone(&seen);
		dispatcher.subscribe(Listener::custom(1, move |n| sink.lock().push(n.payload.clone())));

		let connection = StreamOnly::new(stream::iter(vec![Ok(custom(1, vec![1])), Ok(custom(1, vec![2]))]));
		let outcome = dispatcher.consume(&connection, &CancellationToken::new()).await;

		assert!(matches!(outcome, ConsumeOutcome::Ended));
		assert_eq!(*seen.lock(), vec![vec![1u8], vec![2u8]]);
		assert_eq!(dispatcher.state(), DispatchState::Stopped);
		assert!(!connection.inbound.is_locked());
	}

	#[tokio::test]
	async fn stream_error_while_active_is_reported() {
		let dispatcher = NotificationDispatcher::new();
		let connection = StreamOnly::new(stream::iter(vec![Err::<Notification, _>(Error::Transport("unplugged".to_string()))]));

		let outcome = dispatcher.consume(&connection, &CancellationToken::new()).await;

		match outcome {
			ConsumeOutcome::Failed(Error::NotificationStream(message)) => assert!(message.contains("unplugged")),
			other => panic!("Expected stream failure, got {other:?}"),
		}
		assert!(!connection.inbound.is_locked());
	}

	#[tokio::test]
	async fn pre_cancelled_token_skips_pending_error() {
		let dispatcher = NotificationDispatcher::new();
		let connection = StreamOnly::new(stream::iter(vec![Err::<Notification, _>(Error::Transport("closed".to_string()))]));
		let cancel = CancellationToken::new();
		cancel.cancel();

		let outcome = dispatcher.consume(&connection, &cancel).await;

		assert!(matches!(outcome, ConsumeOutcome::Cancelled));
		assert_eq!(dispatcher.state(), DispatchState::Stopped);
	}

	#[tokio::test]
	async fn read_failing_during_cancellation_is_not_an_error() {
		let dispatcher = NotificationDispatcher::new();
		let cancel = CancellationToken::new();
		let tearing_down = cancel.clone();
		let connection = StreamOnly::new(stream::once(async move {
			tearing_down.cancel();
			Err::<Notification, _>(Error::ChannelClosed)
		}));

		let outcome = dispatcher.consume(&connection, &cancel).await;

		assert!(matches!(outcome, ConsumeOutcome::Cancelled));
		assert!(!connection.inbound.is_locked());
	}

	#[tokio::test]
	async fn late_exit_of_superseded_loop_keeps_state_consuming() {
		let dispatcher = NotificationDispatcher::new();
		let current = Arc::new(StreamOnly::new(stream::pending()));
		let cancel = CancellationToken::new();

		let running = {
			let dispatcher = dispatcher.clone();
			let current = Arc::clone(&current);
			let cancel = cancel.clone();
			tokio::spawn(async move { dispatcher.consume(&*current, &cancel).await })
		};
		tokio::task::yield_now().await;
		assert_eq!(dispatcher.state(), DispatchState::Consuming);

		let superseded = StreamOnly::new(stream::empty());
		assert!(matches!(dispatcher.consume(&superseded, &CancellationToken::new()).await, ConsumeOutcome::Ended));
		assert_eq!(dispatcher.state(), DispatchState::Consuming);

		cancel.cancel();
		assert!(matches!(running.await.unwrap(), ConsumeOutcome::Cancelled));
		assert_eq!(dispatcher.state(), DispatchState::Stopped);
	}

	#[tokio::test]
	async fn second_reader_fails_while_first_is_consuming() {
		let dispatcher = NotificationDispatcher::new();
		let connection = StreamOnly::new(stream::pending());
		let _reader = connection.inbound.acquire().unwrap();

		let outcome = dispatcher.consume(&connection, &CancellationToken::new()).await;

		assert!(matches!(outcome, ConsumeOutcome::Failed(Error::ReaderBusy)));
	}

	#[test]
	fn reset_clears_everything() {
		let dispatcher = NotificationDispatcher::new();
		let subscription = dispatcher.subscribe(Listener::core(|_| {}));
		dispatcher.subscribe(Listener::keymap(|_| {}));
		dispatcher.subscribe(Listener::custom(9, |_| {}));

		dispatcher.reset();

		assert_eq!(dispatcher.listener_count(), 0);
		assert!(dispatcher.custom_indices().is_empty());
		assert!(!subscription.is_active());
		subscription.unsubscribe();
	}
}
