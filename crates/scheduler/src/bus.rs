//! Ordered transition notifications.
//!
//! Every subscriber owns an unbounded queue. The scheduler publishes while it
//! still holds its state lock, so each queue sees transitions in exactly the
//! order they were committed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::resource::ResourceId;
use crate::result::{LoadState, Snapshot};

/// One state transition plus the results of every resource right after it.
#[derive(Debug, Clone)]
pub struct Notification {
	/// Global, gap-free sequence number starting at 1.
	pub seq: u64,
	pub id: ResourceId,
	pub state: LoadState,
	pub results: Snapshot,
}

struct Subscriber {
	key: u64,
	tx: mpsc::UnboundedSender<Notification>,
}

#[derive(Default)]
pub(crate) struct NotificationBus {
	next_key: AtomicU64,
	seq: AtomicU64,
	subscribers: Mutex<Vec<Subscriber>>,
}

impl NotificationBus {
	/// Publishes one transition. `results` is only evaluated when someone listens.
	pub(crate) fn publish(&self, id: &ResourceId, state: LoadState, results: impl FnOnce() -> Snapshot) {
		let seq = self.seq.fetch_add(1, Ordering::AcqRel).wrapping_add(1);
		let mut subscribers = self.subscribers.lock();
		if subscribers.is_empty() {
			return;
		}

		let notification = Notification {
			seq,
			id: id.clone(),
			state,
			results: results(),
		};
		subscribers.retain(|sub| sub.tx.send(notification.clone()).is_ok());
		tracing::trace!(seq, resource = %id, state = state.as_str(), listeners = subscribers.len(), "scheduler.bus.publish");
	}

	fn attach(self: &Arc<Self>) -> (u64, mpsc::UnboundedReceiver<Notification>) {
		let key = self.next_key.fetch_add(1, Ordering::AcqRel);
		let (tx, rx) = mpsc::unbounded_channel();
		self.subscribers.lock().push(Subscriber { key, tx });
		(key, rx)
	}

	fn detach(&self, key: u64) {
		self.subscribers.lock().retain(|sub| sub.key != key);
	}

	pub(crate) fn listener_count(&self) -> usize {
		self.subscribers.lock().len()
	}

	/// Registers a callback driven by a dispatcher task on `runtime`.
	pub(crate) fn subscribe<F>(self: &Arc<Self>, runtime: &Handle, listener: F) -> Subscription
	where
		F: Fn(&Notification) + Send + Sync + 'static,
	{
		let (key, mut rx) = self.attach();
		let dispatcher = runtime.spawn(async move {
			while let Some(notification) = rx.recv().await {
				listener(&notification);
			}
		});
		Subscription {
			key,
			bus: Arc::downgrade(self),
			dispatcher: Some(dispatcher),
		}
	}

	pub(crate) fn notifications(self: &Arc<Self>) -> Notifications {
		let (key, rx) = self.attach();
		Notifications {
			rx,
			_subscription: Subscription {
				key,
				bus: Arc::downgrade(self),
				dispatcher: None,
			},
		}
	}
}

/// Registration of one listener. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes its listener"]
pub struct Subscription {
	key: u64,
	bus: Weak<NotificationBus>,
	dispatcher: Option<JoinHandle<()>>,
}

impl Subscription {
	/// Stops delivery. Notifications still queued for this listener are dropped.
	pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(bus) = self.bus.upgrade() {
			bus.detach(self.key);
		}
		if let Some(dispatcher) = self.dispatcher.take() {
			dispatcher.abort();
		}
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription").field("key", &self.key).finish_non_exhaustive()
	}
}

/// Async stream of notifications. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Notifications {
	rx: mpsc::UnboundedReceiver<Notification>,
	_subscription: Subscription,
}

impl Notifications {
	/// Waits for the next transition.
	pub async fn recv(&mut self) -> Option<Notification> {
		self.rx.recv().await
	}

	/// Returns one already-published transition without waiting.
	pub fn try_recv(&mut self) -> Option<Notification> {
		self.rx.try_recv().ok()
	}

	/// Returns every already-published transition without waiting.
	pub fn drain(&mut self) -> Vec<Notification> {
		std::iter::from_fn(|| self.try_recv()).collect()
	}
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;
	use std::sync::atomic::AtomicUsize;

	use super::*;

	fn empty() -> Snapshot {
		Arc::new(BTreeMap::new())
	}

	#[tokio::test]
	async fn delivers_in_publish_order() {
		let bus = Arc::new(NotificationBus::default());
		let mut rx = bus.notifications();
		let id = ResourceId::from("a");
		for state in [LoadState::Loading, LoadState::Retrying, LoadState::Loading, LoadState::Success] {
			bus.publish(&id, state, empty);
		}

		let seen: Vec<_> = rx.drain().into_iter().map(|n| (n.seq, n.state)).collect();
		assert_eq!(
			seen,
			vec![(1, LoadState::Loading), (2, LoadState::Retrying), (3, LoadState::Loading), (4, LoadState::Success)]
		);
	}

	#[tokio::test]
	async fn snapshot_is_skipped_without_listeners() {
		let bus = Arc::new(NotificationBus::default());
		bus.publish(&"a".into(), LoadState::Loading, || unreachable!("no listener"));
	}

	#[tokio::test(start_paused = true)]
	async fn dropped_subscription_stops_callbacks() {
		let bus = Arc::new(NotificationBus::default());
		let hits = Arc::new(AtomicUsize::new(0));
		let counter = Arc::clone(&hits);
		let sub = bus.subscribe(&Handle::current(), move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
		});

		bus.publish(&"a".into(), LoadState::Loading, empty);
		tokio::time::sleep(std::time::Duration::from_millis(1)).await;
		assert_eq!(hits.load(Ordering::SeqCst), 1);

		sub.unsubscribe();
		assert_eq!(bus.listener_count(), 0);
		bus.publish(&"a".into(), LoadState::Success, empty);
		tokio::time::sleep(std::time::Duration::from_millis(1)).await;
		assert_eq!(hits.load(Ordering::SeqCst), 1);
	}
}
