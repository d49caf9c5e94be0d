//! TOML manifest of simulated resources.
//!
//! ```toml
//! [scheduler]
//! retry_attempts = 3
//! backoff_base_ms = 1000
//!
//! [[resource]]
//! id = "hero-image"
//! kind = "image"
//! priority = "critical"
//! latency_ms = 10
//! payload = "img-bytes"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rustc_hash::FxHashSet;
use serde::Deserialize;
use thiserror::Error;
use wayfarer_scheduler::{
	Backoff, CancellationToken, ParsePriorityError, Priority, ResourceKind, ResourceSpec, Scheduler, SchedulerConfig,
	SchedulerError,
};

#[derive(Debug, Error)]
pub enum ManifestError {
	#[error("failed to read {}: {source}", path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},
	#[error("failed to parse manifest: {0}")]
	Parse(#[from] toml::de::Error),
	#[error("resource {id}: {source}")]
	Priority {
		id: String,
		#[source]
		source: ParsePriorityError,
	},
	#[error("resource {id}: {reason}")]
	InvalidResource { id: String, reason: &'static str },
	#[error("[scheduler]: {0}")]
	InvalidScheduler(&'static str),
	#[error(transparent)]
	Register(#[from] SchedulerError),
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
	#[serde(default)]
	pub scheduler: SchedulerSection,
	#[serde(default, rename = "resource")]
	pub resources: Vec<ResourceEntry>,
}

/// Overrides of [`SchedulerConfig`] defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerSection {
	pub retry_attempts: Option<u32>,
	pub backoff_base_ms: Option<u64>,
	pub backoff_cap_ms: Option<u64>,
	pub prefetch_margin: Option<f64>,
	pub idle_max_wait_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceEntry {
	pub id: String,
	#[serde(default)]
	pub kind: ResourceKind,
	pub priority: String,
	/// Simulated time each attempt takes.
	#[serde(default)]
	pub latency_ms: u64,
	/// Number of leading attempts that fail.
	#[serde(default)]
	pub fail_first: u32,
	pub timeout_ms: Option<u64>,
	pub retry_attempts: Option<u32>,
	#[serde(default)]
	pub dependencies: Vec<String>,
	/// Payload returned on success; defaults to the id.
	pub payload: Option<String>,
}

/// Failure reported by a simulated loader.
#[derive(Debug, Error)]
enum SimulatedError {
	#[error("simulated failure ({remaining} more to go)")]
	Failure { remaining: u32 },
	#[error("cancelled")]
	Cancelled,
}

impl Manifest {
	pub fn load(path: &Path) -> Result<Self, ManifestError> {
		let text = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		Self::parse(&text)
	}

	pub fn parse(text: &str) -> Result<Self, ManifestError> {
		let manifest: Self = toml::from_str(text)?;
		manifest.validate()?;
		Ok(manifest)
	}

	fn validate(&self) -> Result<(), ManifestError> {
		let s = &self.scheduler;
		if s.retry_attempts == Some(0) {
			return Err(ManifestError::InvalidScheduler("retry_attempts must be > 0"));
		}
		if s.prefetch_margin.is_some_and(|m| !m.is_finite() || m < 0.0) {
			return Err(ManifestError::InvalidScheduler("prefetch_margin must be finite and >= 0"));
		}

		let mut seen = FxHashSet::default();
		for entry in &self.resources {
			let invalid = |reason| ManifestError::InvalidResource { id: entry.id.clone(), reason };
			if entry.id.trim().is_empty() {
				return Err(invalid("id must not be empty"));
			}
			if !seen.insert(entry.id.as_str()) {
				return Err(invalid("duplicate id"));
			}
			if entry.retry_attempts == Some(0) {
				return Err(invalid("retry_attempts must be > 0"));
			}
			if entry.timeout_ms == Some(0) {
				return Err(invalid("timeout_ms must be > 0"));
			}
			entry.priority()?;
		}
		Ok(())
	}

	pub fn config(&self) -> SchedulerConfig {
		let s = &self.scheduler;
		let defaults = SchedulerConfig::default();
		let base = s.backoff_base_ms.map_or(defaults.backoff_policy().base, Duration::from_millis);
		let cap = s.backoff_cap_ms.map_or(defaults.backoff_policy().cap, Duration::from_millis);

		let mut config = defaults.backoff(Backoff::new(base, cap));
		if let Some(attempts) = s.retry_attempts {
			config = config.default_retry_attempts(attempts);
		}
		if let Some(margin) = s.prefetch_margin {
			config = config.prefetch_margin(margin);
		}
		if let Some(ms) = s.idle_max_wait_ms {
			config = config.idle_max_wait(Duration::from_millis(ms));
		}
		config
	}

	/// Registers every resource with `scheduler`, in manifest order.
	pub fn register_all(&self, scheduler: &Scheduler) -> Result<(), ManifestError> {
		for entry in &self.resources {
			scheduler.register(entry.spec()?)?;
		}
		tracing::debug!(count = self.resources.len(), "preload.manifest.registered");
		Ok(())
	}
}

impl ResourceEntry {
	fn priority(&self) -> Result<Priority, ManifestError> {
		self.priority.parse().map_err(|source| ManifestError::Priority { id: self.id.clone(), source })
	}

	/// Builds a registration whose loader sleeps for `latency_ms` and fails the first `fail_first` attempts.
	pub fn spec(&self) -> Result<ResourceSpec<String>, ManifestError> {
		let failures = Arc::new(AtomicU32::new(self.fail_first));
		let latency = Duration::from_millis(self.latency_ms);
		let payload = self.payload.clone().unwrap_or_else(|| self.id.clone());

		let mut spec = ResourceSpec::from_fn(self.id.as_str(), self.priority()?, move |cancel: CancellationToken| {
			let failing = failures.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
			let payload = payload.clone();
			async move {
				tokio::select! {
					_ = cancel.cancelled() => return Err(SimulatedError::Cancelled),
					_ = tokio::time::sleep(latency) => {}
				}
				match failing {
					Ok(before) => Err(SimulatedError::Failure { remaining: before - 1 }),
					Err(_) => Ok(payload),
				}
			}
		})
		.kind(self.kind)
		.depends_on(self.dependencies.iter().map(String::as_str));

		if let Some(ms) = self.timeout_ms {
			spec = spec.timeout(Duration::from_millis(ms));
		}
		if let Some(attempts) = self.retry_attempts {
			spec = spec.retry_attempts(attempts);
		}
		Ok(spec)
	}
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use pretty_assertions::assert_eq;
	use wayfarer_scheduler::{LoadError, LoadState};

	use super::*;

	const SAMPLE: &str = r#"
[scheduler]
retry_attempts = 2
backoff_base_ms = 100
backoff_cap_ms = 400
idle_max_wait_ms = 250

[[resource]]
id = "config"
priority = "critical"
latency_ms = 5

[[resource]]
id = "feed"
kind = "component"
priority = "medium"
latency_ms = 20
fail_first = 1
dependencies = ["config"]
payload = "posts"
"#;

	#[test]
	fn parses_scheduler_overrides() {
		let manifest = Manifest::parse(SAMPLE).unwrap();
		let config = manifest.config();
		assert_eq!(config.retry_attempts(), 2);
		assert_eq!(config.backoff_policy(), Backoff::new(Duration::from_millis(100), Duration::from_millis(400)));
		assert_eq!(config.idle_wait(), Duration::from_millis(250));
		assert_eq!(config.margin(), 50.0);
		assert_eq!(manifest.resources.len(), 2);
		assert_eq!(manifest.resources[1].kind, ResourceKind::Component);
	}

	#[test]
	fn empty_manifest_uses_defaults() {
		let manifest = Manifest::parse("").unwrap();
		assert!(manifest.resources.is_empty());
		assert_eq!(manifest.config().retry_attempts(), 3);
	}

	#[test]
	fn rejects_unknown_priority() {
		let err = Manifest::parse("[[resource]]\nid = \"x\"\npriority = \"urgent\"\n").unwrap_err();
		assert!(matches!(err, ManifestError::Priority { ref id, .. } if id == "x"), "{err}");
	}

	#[test]
	fn rejects_duplicate_ids_and_zero_budgets() {
		let dup = "[[resource]]\nid = \"a\"\npriority = \"low\"\n[[resource]]\nid = \"a\"\npriority = \"low\"\n";
		assert!(matches!(Manifest::parse(dup), Err(ManifestError::InvalidResource { reason: "duplicate id", .. })));

		let zero = "[[resource]]\nid = \"a\"\npriority = \"low\"\nretry_attempts = 0\n";
		assert!(matches!(Manifest::parse(zero), Err(ManifestError::InvalidResource { .. })));

		assert!(matches!(Manifest::parse("[scheduler]\nretry_attempts = 0\n"), Err(ManifestError::InvalidScheduler(_))));
	}

	#[test]
	fn rejects_unknown_fields() {
		assert!(matches!(Manifest::parse("[[resource]]\nid = \"a\"\npriority = \"low\"\ncolour = 1\n"), Err(ManifestError::Parse(_))));
	}

	#[test]
	fn load_reports_missing_file() {
		let dir = tempfile::tempdir().unwrap();
		let err = Manifest::load(&dir.path().join("missing.toml")).unwrap_err();
		assert!(matches!(err, ManifestError::Io { .. }));
		assert!(err.to_string().contains("missing.toml"));
	}

	#[test]
	fn load_reads_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		file.write_all(SAMPLE.as_bytes()).unwrap();
		let manifest = Manifest::load(file.path()).unwrap();
		assert_eq!(manifest.resources[0].id, "config");
	}

	#[tokio::test(start_paused = true)]
	async fn simulated_loaders_fail_then_recover() {
		let manifest = Manifest::parse(SAMPLE).unwrap();
		let scheduler = Scheduler::new(manifest.config());
		manifest.register_all(&scheduler).unwrap();

		assert_eq!(scheduler.load_resource("feed").await, Ok(LoadState::Success));
		let feed = scheduler.get_result("feed").unwrap();
		assert_eq!(feed.data.as_ref().and_then(|d| d.downcast_ref::<String>()).map(String::as_str), Some("posts"));
		assert_eq!(scheduler.get_result("config").unwrap().state, LoadState::Success);
	}

	#[tokio::test(start_paused = true)]
	async fn simulated_timeout_is_reported() {
		let text = "[[resource]]\nid = \"slow\"\npriority = \"high\"\nlatency_ms = 500\ntimeout_ms = 50\nretry_attempts = 1\n";
		let manifest = Manifest::parse(text).unwrap();
		let scheduler = Scheduler::new(manifest.config());
		manifest.register_all(&scheduler).unwrap();

		scheduler.preload_critical().await;
		let slow = scheduler.get_result("slow").unwrap();
		assert_eq!(slow.state, LoadState::Error);
		assert_eq!(slow.error, Some(LoadError::Timeout(Duration::from_millis(50))));
	}

	#[tokio::test(start_paused = true)]
	async fn cyclic_manifest_is_rejected() {
		let text = "[[resource]]\nid = \"a\"\npriority = \"low\"\ndependencies = [\"b\"]\n[[resource]]\nid = \"b\"\npriority = \"low\"\ndependencies = [\"a\"]\n";
		let manifest = Manifest::parse(text).unwrap();
		let scheduler = Scheduler::new(manifest.config());
		assert!(matches!(manifest.register_all(&scheduler), Err(ManifestError::Register(SchedulerError::DependencyCycle(_)))));
	}
}
