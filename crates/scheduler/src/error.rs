//! Error types for loading and scheduler calls.

use std::time::Duration;

use thiserror::Error;

use crate::resource::ResourceId;

/// Why a load attempt or cycle failed. Stored in [`crate::LoadResult::error`].
///
/// Cancellation is not an error: a cancelled resource is reset to idle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
	/// The loader itself returned an error.
	#[error("loader failed: {0}")]
	Loader(String),

	/// The configured timeout elapsed before the loader settled.
	#[error("load timed out after {0:?}")]
	Timeout(Duration),

	/// A dependency exhausted its retries.
	#[error("dependency `{id}` failed to load")]
	Dependency {
		/// The failed dependency.
		id: ResourceId,
	},

	/// A declared dependency was never registered.
	#[error("dependency `{id}` is not registered")]
	MissingDependency {
		/// The unknown dependency id.
		id: ResourceId,
	},
}

/// Coarse classification of [`LoadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadErrorKind {
	LoaderFailure,
	Timeout,
	DependencyFailure,
}

impl LoadError {
	pub fn kind(&self) -> LoadErrorKind {
		match self {
			Self::Loader(_) => LoadErrorKind::LoaderFailure,
			Self::Timeout(_) => LoadErrorKind::Timeout,
			Self::Dependency { .. } | Self::MissingDependency { .. } => LoadErrorKind::DependencyFailure,
		}
	}
}

/// Errors returned by scheduler API calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
	/// No resource with this id is registered.
	#[error("resource `{0}` is not registered")]
	UnknownResource(ResourceId),

	/// Registering would close a dependency cycle. The path starts and ends at the same id.
	#[error("dependency cycle: {}", format_path(.0))]
	DependencyCycle(Vec<ResourceId>),
}

fn format_path(path: &[ResourceId]) -> String {
	path.iter().map(ResourceId::as_str).collect::<Vec<_>>().join(" -> ")
}

/// Result type for scheduler API calls.
pub type Result<T> = std::result::Result<T, SchedulerError>;
