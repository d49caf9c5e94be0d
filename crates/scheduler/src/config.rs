use std::time::Duration;

/// Exponential retry delay, capped.
///
/// The delay after the `n`th failed attempt is `min(base * 2^(n-1), cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
	pub base: Duration,
	pub cap: Duration,
}

impl Backoff {
	pub const fn new(base: Duration, cap: Duration) -> Self {
		Self { base, cap }
	}

	/// Delay to wait after `failed_attempts` failures. Zero failures waits nothing.
	pub fn delay(&self, failed_attempts: u32) -> Duration {
		let Some(exp) = failed_attempts.checked_sub(1) else {
			return Duration::ZERO;
		};
		let factor = 2u32.checked_pow(exp).unwrap_or(u32::MAX);
		self.base.checked_mul(factor).map_or(self.cap, |d| d.min(self.cap))
	}
}

impl Default for Backoff {
	fn default() -> Self {
		Self {
			base: Duration::from_millis(1000),
			cap: Duration::from_millis(10_000),
		}
	}
}

/// Scheduler tunables.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
	pub(crate) default_retry_attempts: u32,
	pub(crate) backoff: Backoff,
	pub(crate) prefetch_margin: f64,
	pub(crate) idle_max_wait: Duration,
}

impl SchedulerConfig {
	/// Sets the retry budget for resources that do not set their own.
	///
	/// # Panics
	///
	/// Panics if `attempts` is zero.
	#[must_use]
	pub fn default_retry_attempts(mut self, attempts: u32) -> Self {
		assert!(attempts > 0, "retry attempts must be > 0");
		self.default_retry_attempts = attempts;
		self
	}

	#[must_use]
	pub fn backoff(mut self, backoff: Backoff) -> Self {
		self.backoff = backoff;
		self
	}

	/// Sets how far outside the viewport an observed element may be and still trigger its load.
	///
	/// # Panics
	///
	/// Panics if `margin` is negative or not finite.
	#[must_use]
	pub fn prefetch_margin(mut self, margin: f64) -> Self {
		assert!(margin.is_finite() && margin >= 0.0, "prefetch margin must be finite and >= 0");
		self.prefetch_margin = margin;
		self
	}

	/// Sets the longest the idle loader waits for the scheduler to go quiet.
	#[must_use]
	pub fn idle_max_wait(mut self, wait: Duration) -> Self {
		self.idle_max_wait = wait;
		self
	}

	pub fn retry_attempts(&self) -> u32 {
		self.default_retry_attempts
	}

	pub fn backoff_policy(&self) -> Backoff {
		self.backoff
	}

	pub fn margin(&self) -> f64 {
		self.prefetch_margin
	}

	pub fn idle_wait(&self) -> Duration {
		self.idle_max_wait
	}
}

impl Default for SchedulerConfig {
	fn default() -> Self {
		Self {
			default_retry_attempts: 3,
			backoff: Backoff::default(),
			prefetch_margin: 50.0,
			idle_max_wait: Duration::from_secs(2),
		}
	}
}

#[cfg(test)]
mod tests {
	use rstest::rstest;

	use super::*;

	#[rstest]
	#[case(0, 0)]
	#[case(1, 1000)]
	#[case(2, 2000)]
	#[case(3, 4000)]
	#[case(4, 8000)]
	#[case(5, 10_000)]
	#[case(40, 10_000)]
	fn default_backoff_doubles_then_caps(#[case] failed: u32, #[case] expected_ms: u64) {
		assert_eq!(Backoff::default().delay(failed), Duration::from_millis(expected_ms));
	}

	#[test]
	fn custom_backoff_respects_cap() {
		let backoff = Backoff::new(Duration::from_millis(10), Duration::from_millis(25));
		assert_eq!(backoff.delay(2), Duration::from_millis(20));
		assert_eq!(backoff.delay(3), Duration::from_millis(25));
	}

	#[test]
	#[should_panic(expected = "retry attempts must be > 0")]
	fn zero_retry_budget_panics() {
		let _ = SchedulerConfig::default().default_retry_attempts(0);
	}
}
