use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

/// Monotonic generation clock for load cycles.
#[derive(Debug, Default, Clone)]
pub(crate) struct GenerationClock {
	next: Arc<AtomicU64>,
}

impl GenerationClock {
	/// Returns the next generation ID, starting at 1.
	pub(crate) fn next(&self) -> u64 {
		self.next.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
	}
}

/// Generation-scoped cancellation token for one load cycle.
///
/// A commit is accepted only while the in-flight entry for the resource still
/// carries the same generation, so results of cancelled cycles are discarded
/// even if their loader keeps running.
#[derive(Debug, Clone)]
pub(crate) struct CycleToken {
	generation: u64,
	cancel: CancellationToken,
}

impl CycleToken {
	pub(crate) fn new(generation: u64) -> Self {
		Self {
			generation,
			cancel: CancellationToken::new(),
		}
	}

	pub(crate) const fn generation(&self) -> u64 {
		self.generation
	}

	pub(crate) fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	pub(crate) fn cancel(&self) {
		self.cancel.cancel();
	}

	pub(crate) async fn cancelled(&self) {
		self.cancel.cancelled().await;
	}

	/// Token handed to one loader attempt; cancelled with the cycle or on timeout.
	pub(crate) fn attempt(&self) -> CancellationToken {
		self.cancel.child_token()
	}
}
