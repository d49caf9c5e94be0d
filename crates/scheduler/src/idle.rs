//! Background draining of the Idle tier.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::Priority;
use crate::scheduler::Inner;

/// Handle to the idle loader task. Dropping it stops the task.
#[must_use = "dropping an IdleLoader stops idle loading"]
#[derive(Debug)]
pub struct IdleLoader {
	cancel: CancellationToken,
	task: Option<JoinHandle<()>>,
}

impl IdleLoader {
	/// Stops the loader and waits for its task to exit. Loads it already started keep running.
	pub async fn stop(mut self) {
		self.cancel.cancel();
		if let Some(task) = self.task.take() {
			let _ = task.await;
		}
	}

	pub fn is_running(&self) -> bool {
		self.task.as_ref().is_some_and(|t| !t.is_finished())
	}
}

impl Drop for IdleLoader {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

pub(crate) fn spawn(inner: Arc<Inner>) -> IdleLoader {
	let cancel = CancellationToken::new();
	let token = cancel.clone();
	let runtime = inner.runtime.clone();
	let task = runtime.spawn(run(inner, token));
	IdleLoader { cancel, task: Some(task) }
}

/// Waits for a quiet scheduler (or the max wait), starts one Idle resource, repeats.
async fn run(inner: Arc<Inner>, cancel: CancellationToken) {
	let mut quiet = inner.quiet.subscribe();
	let max_wait = inner.config.idle_max_wait;
	tracing::debug!(max_wait_ms = max_wait.as_millis() as u64, "scheduler.idle.start");

	loop {
		tokio::select! {
			biased;
			_ = cancel.cancelled() => break,
			_ = tokio::time::timeout(max_wait, wait_quiet(&mut quiet)) => {}
		}

		let Some(id) = inner.pop_queued(Priority::Idle) else {
			tracing::trace!("scheduler.idle.empty");
			tokio::select! {
				biased;
				_ = cancel.cancelled() => break,
				_ = inner.idle_enqueued.notified() => {}
			}
			continue;
		};

		tracing::debug!(resource = %id, "scheduler.idle.load");
		if let Err(err) = inner.start(&id) {
			tracing::warn!(resource = %id, error = %err, "scheduler.idle.skip");
		}
	}

	tracing::debug!("scheduler.idle.stop");
}

/// Resolves once no load cycle is in flight.
async fn wait_quiet(quiet: &mut watch::Receiver<usize>) {
	loop {
		let in_flight = *quiet.borrow_and_update();
		if in_flight == 0 || quiet.changed().await.is_err() {
			return;
		}
	}
}
