use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Scheduling tier of a resource.
///
/// Tiers govern when a resource is offered for loading, never whether its
/// result is correct. Variants are ordered from most to least urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
	/// Needed for the first meaningful paint.
	Critical,
	/// Needed shortly after first paint.
	High,
	/// Regular page content.
	Medium,
	/// Below-the-fold or secondary content.
	Low,
	/// Background work loaded only while nothing else is in flight.
	Idle,
}

impl Priority {
	/// All tiers, most urgent first.
	pub const ALL: [Self; 5] = [Self::Critical, Self::High, Self::Medium, Self::Low, Self::Idle];

	pub(crate) const fn index(self) -> usize {
		match self {
			Self::Critical => 0,
			Self::High => 1,
			Self::Medium => 2,
			Self::Low => 3,
			Self::Idle => 4,
		}
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Critical => "critical",
			Self::High => "high",
			Self::Medium => "medium",
			Self::Low => "low",
			Self::Idle => "idle",
		}
	}
}

impl fmt::Display for Priority {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Error returned when parsing an unknown tier name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown priority `{0}` (expected critical, high, medium, low or idle)")]
pub struct ParsePriorityError(pub String);

impl FromStr for Priority {
	type Err = ParsePriorityError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::ALL
			.into_iter()
			.find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
			.ok_or_else(|| ParsePriorityError(s.to_string()))
	}
}
