//! The scheduler instance and its shared state.
//!
//! Invariants:
//! - at most one load cycle per resource (in-flight map, checked under the state lock)
//! - every result mutation of a cycle is accepted only while that cycle owns the in-flight entry
//! - notifications are published under the state lock, so delivery order is commit order
//! - the state lock is never held across an await

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::runtime::Handle;
use tokio::sync::{Notify, watch};

use crate::bus::{NotificationBus, Notifications, Subscription};
use crate::error::{Result, SchedulerError};
use crate::idle::{self, IdleLoader};
use crate::queue::PriorityQueues;
use crate::resource::{Descriptor, ResourceHandle, ResourceId, ResourceSpec};
use crate::result::{LoadResult, LoadState, LoadStats, Snapshot};
use crate::token::{CycleToken, GenerationClock};
use crate::visibility::{ElementId, Rect, VisibilityWatcher};
use crate::{Notification, Priority, SchedulerConfig, graph};

mod executor;

/// Completion signal of one load cycle. Resolves (with an error) when the cycle's sender is dropped.
pub(crate) type Completion = watch::Receiver<()>;

struct Entry {
	descriptor: Arc<Descriptor>,
	result: LoadResult,
}

/// A load cycle that currently owns its resource's record.
struct InFlight {
	token: CycleToken,
	done: watch::Sender<()>,
}

struct State {
	entries: FxHashMap<ResourceId, Entry>,
	queues: PriorityQueues,
	in_flight: FxHashMap<ResourceId, InFlight>,
	watcher: VisibilityWatcher,
}

impl State {
	fn owns(&self, id: &ResourceId, token: &CycleToken) -> bool {
		self.in_flight.get(id).is_some_and(|f| f.token.generation() == token.generation())
	}

	fn state_of(&self, id: &str) -> Option<LoadState> {
		self.entries.get(id).map(|e| e.result.state)
	}

	fn snapshot(&self) -> Snapshot {
		Arc::new(self.entries.iter().map(|(id, e)| (id.clone(), e.result.clone())).collect::<BTreeMap<_, _>>())
	}
}

pub(crate) struct Inner {
	pub(crate) config: SchedulerConfig,
	pub(crate) runtime: Handle,
	state: Mutex<State>,
	bus: Arc<NotificationBus>,
	clock: GenerationClock,
	/// Number of in-flight cycles; the idle loader waits for zero.
	pub(crate) quiet: watch::Sender<usize>,
	/// Signalled when an Idle-priority resource is queued.
	pub(crate) idle_enqueued: Notify,
}

impl Inner {
	/// Applies `update` to `id`'s result and publishes the transition.
	fn commit(&self, state: &mut State, id: &str, update: impl FnOnce(&mut LoadResult)) -> Option<(LoadState, u32)> {
		let entry = state.entries.get_mut(id)?;
		update(&mut entry.result);
		let (next, attempts) = (entry.result.state, entry.result.attempts);
		let key = entry.descriptor.id.clone();
		tracing::debug!(resource = %key, state = next.as_str(), attempts, "scheduler.transition");
		self.bus.publish(&key, next, || state.snapshot());
		Some((next, attempts))
	}

	/// Commits on behalf of a load cycle; refused once the cycle lost ownership.
	fn commit_cycle(&self, id: &ResourceId, token: &CycleToken, update: impl FnOnce(&mut LoadResult)) -> Option<(LoadState, u32)> {
		let mut state = self.state.lock();
		if !state.owns(id, token) {
			tracing::debug!(resource = %id, generation = token.generation(), "scheduler.load.stale");
			return None;
		}
		self.commit(&mut state, id, update)
	}

	fn state_of(&self, id: &str) -> Option<LoadState> {
		self.state.lock().state_of(id)
	}

	pub(crate) fn pop_queued(&self, priority: Priority) -> Option<ResourceId> {
		self.state.lock().queues.pop(priority)
	}

	/// Starts a load cycle for `id`, or joins the one already running.
	pub(crate) fn start(self: &Arc<Self>, id: &str) -> Result<Completion> {
		let mut state = self.state.lock();
		let Some(entry) = state.entries.get(id) else {
			return Err(SchedulerError::UnknownResource(id.into()));
		};
		if let Some(flight) = state.in_flight.get(id) {
			tracing::trace!(resource = id, generation = flight.token.generation(), "scheduler.load.join");
			return Ok(flight.done.subscribe());
		}

		let descriptor = Arc::clone(&entry.descriptor);
		let token = CycleToken::new(self.clock.next());
		let (done, completion) = watch::channel(());
		state.in_flight.insert(
			descriptor.id.clone(),
			InFlight {
				token: token.clone(),
				done,
			},
		);
		self.quiet.send_replace(state.in_flight.len());
		drop(state);

		tracing::trace!(
			resource = %descriptor.id,
			priority = descriptor.priority.as_str(),
			generation = token.generation(),
			"scheduler.load.spawn"
		);
		let inner = Arc::clone(self);
		self.runtime.spawn(async move { inner.run_cycle(descriptor, token).await });
		Ok(completion)
	}

	/// Releases the in-flight entry if `token` still owns it. Dropping it wakes joiners.
	fn finish(&self, id: &ResourceId, token: &CycleToken) {
		let mut state = self.state.lock();
		if state.owns(id, token) {
			state.in_flight.remove(id);
			self.quiet.send_replace(state.in_flight.len());
		}
	}

	fn cancel(&self, state: &mut State, id: &str) -> bool {
		let Some(flight) = state.in_flight.remove(id) else {
			return false;
		};
		flight.token.cancel();
		self.quiet.send_replace(state.in_flight.len());
		tracing::debug!(resource = id, generation = flight.token.generation(), "scheduler.load.cancel");
		self.commit(state, id, |r| *r = LoadResult::idle());
		true
	}
}

/// Progressive resource loading scheduler.
///
/// Cheap to clone; clones share one registry. Construct one per isolated
/// loading context and pass it to the code that registers or triggers loads.
#[derive(Clone)]
pub struct Scheduler {
	inner: Arc<Inner>,
}

impl std::fmt::Debug for Scheduler {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let observed = self.inner.state.lock().watcher.len();
		f.debug_struct("Scheduler")
			.field("stats", &self.stats())
			.field("observed", &observed)
			.field("listeners", &self.inner.bus.listener_count())
			.finish_non_exhaustive()
	}
}

impl Scheduler {
	/// Creates a scheduler bound to the current Tokio runtime.
	///
	/// # Panics
	///
	/// Panics if called outside a Tokio runtime.
	pub fn new(config: SchedulerConfig) -> Self {
		Self::with_runtime(config, Handle::current())
	}

	/// Creates a scheduler that spawns its load cycles on `runtime`.
	pub fn with_runtime(config: SchedulerConfig, runtime: Handle) -> Self {
		let (quiet, _) = watch::channel(0);
		let state = State {
			entries: FxHashMap::default(),
			queues: PriorityQueues::default(),
			in_flight: FxHashMap::default(),
			watcher: VisibilityWatcher::new(config.prefetch_margin),
		};
		Self {
			inner: Arc::new(Inner {
				config,
				runtime,
				state: Mutex::new(state),
				bus: Arc::new(NotificationBus::default()),
				clock: GenerationClock::default(),
				quiet,
				idle_enqueued: Notify::new(),
			}),
		}
	}

	pub fn config(&self) -> &SchedulerConfig {
		&self.inner.config
	}

	/// Registers (or replaces) a resource.
	///
	/// The id goes to the tail of its tier queue and its result is reset to
	/// idle, unless a load cycle currently owns it: then only the descriptor
	/// is replaced and the running cycle finishes with the old one.
	pub fn register<T>(&self, spec: ResourceSpec<T>) -> Result<ResourceHandle<T>>
	where
		T: Send + Sync + 'static,
	{
		let descriptor = spec.into_descriptor(self.inner.config.default_retry_attempts);
		let mut state = self.inner.state.lock();

		if let Some(cycle) = graph::find_cycle(&descriptor.id, &descriptor.dependencies, |id| {
			state.entries.get(id).map(|e| e.descriptor.dependencies.as_slice())
		}) {
			tracing::warn!(resource = %descriptor.id, "scheduler.register.cycle");
			return Err(SchedulerError::DependencyCycle(cycle));
		}

		let id = descriptor.id.clone();
		let priority = descriptor.priority;
		tracing::debug!(
			resource = %id,
			kind = descriptor.kind.as_str(),
			priority = priority.as_str(),
			dependencies = descriptor.dependencies.len(),
			retry_attempts = descriptor.retry_attempts,
			"scheduler.register"
		);
		state.queues.push(priority, id.clone());

		let owned = state.in_flight.contains_key(&id);
		let descriptor = Arc::new(descriptor);
		match state.entries.get_mut(&id) {
			Some(entry) if owned => entry.descriptor = descriptor,
			Some(entry) => {
				entry.descriptor = descriptor;
				if entry.result.state != LoadState::Idle || entry.result.attempts != 0 {
					self.inner.commit(&mut state, &id, |r| *r = LoadResult::idle());
				}
			}
			None => {
				state.entries.insert(id.clone(), Entry { descriptor, result: LoadResult::idle() });
			}
		}
		drop(state);

		if priority == Priority::Idle {
			self.inner.idle_enqueued.notify_one();
		}
		Ok(ResourceHandle::new(id))
	}

	/// Removes a resource, cancelling its load and dropping its queue placement and observers.
	pub fn unregister(&self, id: &str) -> bool {
		let mut state = self.inner.state.lock();
		self.inner.cancel(&mut state, id);
		let Some(entry) = state.entries.remove(id) else {
			return false;
		};
		state.queues.remove(&entry.descriptor.id);
		state.watcher.forget_resource(&entry.descriptor.id);
		tracing::debug!(resource = id, "scheduler.unregister");
		true
	}

	/// Loads `id` (after its dependencies) and waits until the cycle ends.
	///
	/// Joins the running cycle instead of starting another one if the
	/// resource is already in flight. Returns the state the cycle ended in;
	/// loader failures are reported through that state, never as `Err`.
	pub async fn load_resource(&self, id: &str) -> Result<LoadState> {
		let mut done = self.inner.start(id)?;
		let _ = done.changed().await;
		Ok(self.inner.state_of(id).unwrap_or(LoadState::Idle))
	}

	/// Loads every resource queued in `priority`, in queue order, and waits for all of them to settle.
	pub async fn load_by_priority(&self, priority: Priority) {
		let ids = self.inner.state.lock().queues.snapshot(priority);
		tracing::debug!(priority = priority.as_str(), count = ids.len(), "scheduler.load_by_priority");

		let pending: Vec<Completion> = ids.iter().filter_map(|id| self.inner.start(id).ok()).collect();
		for mut done in pending {
			let _ = done.changed().await;
		}
	}

	/// Loads the Critical tier, then the High tier.
	pub async fn preload_critical(&self) {
		self.load_by_priority(Priority::Critical).await;
		self.load_by_priority(Priority::High).await;
	}

	/// Cancels the running cycle of `id` and resets its result to idle.
	///
	/// Returns false (and changes nothing) if `id` is not in flight.
	pub fn cancel_resource(&self, id: &str) -> bool {
		let mut state = self.inner.state.lock();
		self.inner.cancel(&mut state, id)
	}

	/// Cancels every running cycle. Returns how many were cancelled.
	pub fn cancel_all(&self) -> usize {
		let mut state = self.inner.state.lock();
		let ids: Vec<ResourceId> = state.in_flight.keys().cloned().collect();
		ids.iter().filter(|id| self.inner.cancel(&mut state, id)).count()
	}

	/// Returns a finished (success or error) resource to idle with a fresh retry budget.
	pub fn reset(&self, id: &str) -> bool {
		let mut state = self.inner.state.lock();
		if state.in_flight.contains_key(id) || !state.state_of(id).is_some_and(LoadState::is_terminal) {
			return false;
		}
		self.inner.commit(&mut state, id, |r| *r = LoadResult::idle());
		true
	}

	/// Watches `element`; its resource loads once the element nears the viewport.
	pub fn observe_element(&self, element: ElementId, id: &str) -> Result<()> {
		let mut state = self.inner.state.lock();
		let Some(entry) = state.entries.get(id) else {
			return Err(SchedulerError::UnknownResource(id.into()));
		};
		let resource = entry.descriptor.id.clone();
		tracing::trace!(element = element.0, resource = %resource, "scheduler.visibility.observe");
		state.watcher.observe(element, resource);
		Ok(())
	}

	/// Stops watching `element` without loading anything.
	pub fn unobserve_element(&self, element: ElementId) -> bool {
		self.inner.state.lock().watcher.unobserve(element).is_some()
	}

	/// Reports a new viewport. Returns the resources whose load it triggered.
	pub fn set_viewport(&self, viewport: Rect) -> Vec<ResourceId> {
		let fired = self.inner.state.lock().watcher.set_viewport(viewport);
		for id in &fired {
			self.trigger(id);
		}
		fired
	}

	/// Reports an element's bounds. Returns the resource whose load it triggered, if any.
	pub fn report_element_bounds(&self, element: ElementId, bounds: Rect) -> Option<ResourceId> {
		let fired = self.inner.state.lock().watcher.report_bounds(element, bounds)?;
		self.trigger(&fired);
		Some(fired)
	}

	fn trigger(&self, id: &ResourceId) {
		tracing::debug!(resource = %id, "scheduler.visibility.trigger");
		if let Err(err) = self.inner.start(id) {
			tracing::warn!(resource = %id, error = %err, "scheduler.visibility.trigger_failed");
		}
	}

	/// Starts draining the Idle tier in the background. Stops when the returned loader is dropped.
	pub fn start_idle_loading(&self) -> IdleLoader {
		idle::spawn(Arc::clone(&self.inner))
	}

	/// Calls `listener` after every transition, in order, on a dispatcher task.
	pub fn subscribe<F>(&self, listener: F) -> Subscription
	where
		F: Fn(&Notification) + Send + Sync + 'static,
	{
		self.inner.bus.subscribe(&self.inner.runtime, listener)
	}

	/// Returns an ordered async stream of transitions.
	pub fn notifications(&self) -> Notifications {
		self.inner.bus.notifications()
	}

	pub fn get_result(&self, id: &str) -> Option<LoadResult> {
		self.inner.state.lock().entries.get(id).map(|e| e.result.clone())
	}

	pub fn get_all_results(&self) -> Snapshot {
		self.inner.state.lock().snapshot()
	}

	/// Returns the loaded payload of a typed resource.
	pub fn data<T>(&self, handle: &ResourceHandle<T>) -> Option<Arc<T>>
	where
		T: Send + Sync + 'static,
	{
		let state = self.inner.state.lock();
		state.entries.get(handle.id())?.result.data.as_ref()?.downcast::<T>()
	}

	/// Returns true while a load cycle owns `id`, including while it waits on dependencies or backoff.
	pub fn is_loading(&self, id: &str) -> bool {
		self.inner.state.lock().in_flight.contains_key(id)
	}

	pub fn stats(&self) -> LoadStats {
		let state = self.inner.state.lock();
		let mut stats = LoadStats {
			in_flight: state.in_flight.len(),
			..LoadStats::default()
		};
		for entry in state.entries.values() {
			stats.record(entry.result.state);
		}
		stats
	}

	/// Number of ids still queued in `priority`.
	pub fn queued(&self, priority: Priority) -> usize {
		self.inner.state.lock().queues.len(priority)
	}
}
