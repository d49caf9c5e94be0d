//! Final per-resource report.

use std::fmt::Write as _;

use serde::Serialize;
use wayfarer_scheduler::{LoadResult, LoadState, Snapshot};

#[derive(Debug, Serialize)]
pub struct Report {
	pub resources: Vec<ResourceReport>,
	pub succeeded: usize,
	pub failed: usize,
	pub pending: usize,
}

#[derive(Debug, Serialize)]
pub struct ResourceReport {
	pub id: String,
	pub state: LoadState,
	pub attempts: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub load_ms: Option<u64>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub payload: Option<String>,
}

impl ResourceReport {
	fn new(id: &str, result: &LoadResult) -> Self {
		Self {
			id: id.to_string(),
			state: result.state,
			attempts: result.attempts,
			load_ms: result.load_time.map(|t| t.as_millis() as u64),
			error: result.error.as_ref().map(ToString::to_string),
			payload: result.data.as_ref().and_then(|d| d.downcast_ref::<String>()).cloned(),
		}
	}
}

impl Report {
	/// Builds the report from a results snapshot, sorted by id.
	pub fn collect(results: &Snapshot) -> Self {
		let resources: Vec<ResourceReport> = results.iter().map(|(id, r)| ResourceReport::new(id, r)).collect();
		let count = |state| resources.iter().filter(|r| r.state == state).count();
		let (succeeded, failed) = (count(LoadState::Success), count(LoadState::Error));
		let pending = resources.len() - succeeded - failed;
		Self {
			resources,
			succeeded,
			failed,
			pending,
		}
	}

	pub fn table(&self) -> String {
		let width = self.resources.iter().map(|r| r.id.len()).max().unwrap_or(0).max("RESOURCE".len());
		let mut out = String::new();
		let _ = writeln!(out, "{:<width$}  {:<8}  {:>8}  {:>8}  DETAIL", "RESOURCE", "STATE", "ATTEMPTS", "TIME");
		for r in &self.resources {
			let time = r.load_ms.map(|ms| format!("{ms}ms")).unwrap_or_else(|| "-".to_string());
			let detail = r.error.as_deref().or(r.payload.as_deref()).unwrap_or("");
			let _ = writeln!(out, "{:<width$}  {:<8}  {:>8}  {:>8}  {detail}", r.id, r.state.as_str(), r.attempts, time);
		}
		let _ = writeln!(out, "{} succeeded, {} failed, {} pending", self.succeeded, self.failed, self.pending);
		out
	}
}
