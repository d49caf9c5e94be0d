//! One load cycle: dependencies, attempts, retry with backoff.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{Completion, Inner};
use crate::error::LoadError;
use crate::loader::Loader;
use crate::resource::Descriptor;
use crate::result::{LoadState, Payload};
use crate::token::CycleToken;

impl Inner {
	pub(super) async fn run_cycle(self: Arc<Self>, descriptor: Arc<Descriptor>, token: CycleToken) {
		if self.await_dependencies(&descriptor, &token).await && self.enter_loading(&descriptor, &token) {
			self.execute(&descriptor, &token).await;
		}
		self.finish(&descriptor.id, &token);
		if token.is_cancelled() {
			tracing::trace!(resource = %descriptor.id, generation = token.generation(), "scheduler.load.aborted");
		}
	}

	/// Starts (or joins) every dependency that is not loaded yet and waits for all of them.
	///
	/// Returns false if this cycle was cancelled while waiting.
	async fn await_dependencies(self: &Arc<Self>, descriptor: &Descriptor, token: &CycleToken) -> bool {
		let pending: Vec<Completion> = descriptor
			.dependencies
			.iter()
			.filter(|dep| self.state_of(dep) != Some(LoadState::Success))
			.filter_map(|dep| self.start(dep).ok())
			.collect();
		if pending.is_empty() {
			return true;
		}

		tracing::debug!(resource = %descriptor.id, waiting = pending.len(), "scheduler.load.dependencies");
		for mut done in pending {
			tokio::select! {
				biased;
				_ = token.cancelled() => return false,
				_ = done.changed() => {}
			}
		}
		true
	}

	/// Moves the resource to Loading if every dependency is loaded.
	///
	/// A failed or unknown dependency fails the resource without an attempt.
	/// A dependency that was cancelled meanwhile ends this cycle untouched.
	fn enter_loading(&self, descriptor: &Descriptor, token: &CycleToken) -> bool {
		let mut state = self.state.lock();
		if !state.owns(&descriptor.id, token) {
			return false;
		}

		let mut failure = None;
		for dep in &descriptor.dependencies {
			match state.state_of(dep) {
				Some(LoadState::Success) => {}
				Some(LoadState::Error) => {
					failure = Some(LoadError::Dependency { id: dep.clone() });
					break;
				}
				None => {
					failure = Some(LoadError::MissingDependency { id: dep.clone() });
					break;
				}
				Some(other) => {
					tracing::debug!(resource = %descriptor.id, dependency = %dep, state = other.as_str(), "scheduler.load.dependency_aborted");
					return false;
				}
			}
		}

		if let Some(error) = failure {
			tracing::warn!(resource = %descriptor.id, error = %error, "scheduler.load.blocked");
			self.commit(&mut state, &descriptor.id, |r| {
				r.state = LoadState::Error;
				r.error = Some(error);
				r.data = None;
				r.load_time = None;
			});
			return false;
		}

		tracing::debug!(resource = %descriptor.id, priority = descriptor.priority.as_str(), "scheduler.load.start");
		self.commit(&mut state, &descriptor.id, |r| {
			r.state = LoadState::Loading;
			r.error = None;
			r.data = None;
			r.load_time = None;
		})
		.is_some()
	}

	/// Runs attempts until success, retry exhaustion, or cancellation.
	async fn execute(&self, descriptor: &Descriptor, token: &CycleToken) {
		let id = &descriptor.id;
		loop {
			let started = Instant::now();
			let outcome = tokio::select! {
				biased;
				_ = token.cancelled() => return,
				outcome = attempt(descriptor, token.attempt()) => outcome,
			};

			let error = match outcome {
				Ok(payload) => {
					let load_time = started.elapsed();
					let committed = self.commit_cycle(id, token, |r| {
						r.state = LoadState::Success;
						r.data = Some(payload);
						r.error = None;
						r.load_time = Some(load_time);
						r.attempts = 0;
					});
					if committed.is_some() {
						tracing::debug!(resource = %id, load_ms = load_time.as_millis() as u64, "scheduler.load.success");
					}
					return;
				}
				Err(error) => error,
			};

			let max = descriptor.retry_attempts;
			let stored = error.clone();
			let Some((next, attempts)) = self.commit_cycle(id, token, |r| {
				r.attempts = r.attempts.saturating_add(1);
				r.state = if r.attempts < max { LoadState::Retrying } else { LoadState::Error };
				r.error = Some(stored);
				r.data = None;
				r.load_time = None;
			}) else {
				return;
			};

			if next == LoadState::Error {
				tracing::warn!(resource = %id, attempts, error = %error, "scheduler.load.failed");
				return;
			}

			let delay = self.config.backoff.delay(attempts);
			tracing::debug!(resource = %id, attempts, delay_ms = delay.as_millis() as u64, error = %error, "scheduler.load.retry");
			tokio::select! {
				biased;
				_ = token.cancelled() => return,
				_ = tokio::time::sleep(delay) => {}
			}

			let resumed = self.commit_cycle(id, token, |r| {
				r.state = LoadState::Loading;
				r.error = None;
			});
			if resumed.is_none() {
				return;
			}
		}
	}
}

/// Runs the loader once, racing it against the descriptor's timeout.
async fn attempt(descriptor: &Descriptor, cancel: CancellationToken) -> Result<Payload, LoadError> {
	let load = descriptor.loader.load(cancel.clone());
	let Some(limit) = descriptor.timeout else {
		return load.await.map_err(|e| LoadError::Loader(e.to_string()));
	};
	match tokio::time::timeout(limit, load).await {
		Ok(result) => result.map_err(|e| LoadError::Loader(e.to_string())),
		Err(_) => {
			cancel.cancel();
			Err(LoadError::Timeout(limit))
		}
	}
}
