use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::resource::ResourceId;

/// Lifecycle state of one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadState {
	/// Registered, not loading.
	Idle,
	/// A loader attempt is running.
	Loading,
	/// The last attempt failed and the next one is waiting out its backoff.
	Retrying,
	/// Loaded; `data` is present.
	Success,
	/// Retries exhausted or a dependency failed; `error` is present.
	Error,
}

impl LoadState {
	/// Returns true for states that end a load cycle.
	pub const fn is_terminal(self) -> bool {
		matches!(self, Self::Success | Self::Error)
	}

	/// Returns true while a cycle owns the record.
	pub const fn is_in_flight(self) -> bool {
		matches!(self, Self::Loading | Self::Retrying)
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Idle => "idle",
			Self::Loading => "loading",
			Self::Retrying => "retrying",
			Self::Success => "success",
			Self::Error => "error",
		}
	}
}

impl fmt::Display for LoadState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Type-erased loader output.
///
/// Cloning is cheap; the value itself is shared.
#[derive(Clone)]
pub struct Payload(Arc<dyn Any + Send + Sync>);

impl Payload {
	pub(crate) fn new<T>(value: T) -> Self
	where
		T: Send + Sync + 'static,
	{
		Self(Arc::new(value))
	}

	/// Returns the shared value if it has type `T`.
	pub fn downcast<T>(&self) -> Option<Arc<T>>
	where
		T: Send + Sync + 'static,
	{
		Arc::clone(&self.0).downcast::<T>().ok()
	}

	/// Borrows the value if it has type `T`.
	pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
		self.0.downcast_ref::<T>()
	}
}

impl fmt::Debug for Payload {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("Payload(..)")
	}
}

/// Per-resource loading record.
#[derive(Debug, Clone)]
pub struct LoadResult {
	pub state: LoadState,
	/// Present only in [`LoadState::Success`].
	pub data: Option<Payload>,
	/// Present in [`LoadState::Error`] and while [`LoadState::Retrying`].
	pub error: Option<LoadError>,
	/// Duration of the attempt that succeeded.
	pub load_time: Option<Duration>,
	/// Attempts made in the current cycle. Reset by success and by cancel.
	pub attempts: u32,
}

impl LoadResult {
	pub(crate) fn idle() -> Self {
		Self {
			state: LoadState::Idle,
			data: None,
			error: None,
			load_time: None,
			attempts: 0,
		}
	}
}

/// Ordered view of every registered resource's result.
pub type Snapshot = Arc<BTreeMap<ResourceId, LoadResult>>;

/// Counts of resources per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
	pub total: usize,
	pub idle: usize,
	pub loading: usize,
	pub retrying: usize,
	pub success: usize,
	pub error: usize,
	/// Load cycles currently owned by the executor, including those waiting on dependencies.
	pub in_flight: usize,
}

impl LoadStats {
	pub(crate) fn record(&mut self, state: LoadState) {
		self.total += 1;
		match state {
			LoadState::Idle => self.idle += 1,
			LoadState::Loading => self.loading += 1,
			LoadState::Retrying => self.retrying += 1,
			LoadState::Success => self.success += 1,
			LoadState::Error => self.error += 1,
		}
	}
}
