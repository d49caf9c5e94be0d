use std::borrow::Borrow;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::Priority;
use crate::loader::{BoxError, ErasedLoader, Loader};
use crate::result::Payload;

/// Unique key of a registered resource.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId(Arc<str>);

impl ResourceId {
	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ResourceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl Deref for ResourceId {
	type Target = str;

	fn deref(&self) -> &str {
		&self.0
	}
}

impl Borrow<str> for ResourceId {
	fn borrow(&self) -> &str {
		&self.0
	}
}

impl From<&str> for ResourceId {
	fn from(value: &str) -> Self {
		Self(Arc::from(value))
	}
}

impl From<String> for ResourceId {
	fn from(value: String) -> Self {
		Self(Arc::from(value))
	}
}

impl From<&ResourceId> for ResourceId {
	fn from(value: &ResourceId) -> Self {
		value.clone()
	}
}

/// Nature of a resource's payload. Informational only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
	Component,
	#[default]
	Data,
	Image,
	Script,
	Style,
}

impl ResourceKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Component => "component",
			Self::Data => "data",
			Self::Image => "image",
			Self::Script => "script",
			Self::Style => "style",
		}
	}
}

/// Builder for one resource registration.
pub struct ResourceSpec<T> {
	pub(crate) id: ResourceId,
	pub(crate) kind: ResourceKind,
	pub(crate) priority: Priority,
	pub(crate) dependencies: Vec<ResourceId>,
	pub(crate) timeout: Option<Duration>,
	pub(crate) retry_attempts: Option<u32>,
	loader: Arc<dyn Loader<T>>,
}

impl<T> ResourceSpec<T>
where
	T: Send + Sync + 'static,
{
	/// Creates a registration with no dependencies, no timeout and the scheduler's default retry budget.
	pub fn new(id: impl Into<ResourceId>, priority: Priority, loader: impl Loader<T>) -> Self {
		Self {
			id: id.into(),
			kind: ResourceKind::default(),
			priority,
			dependencies: Vec::new(),
			timeout: None,
			retry_attempts: None,
			loader: Arc::new(loader),
		}
	}

	/// Creates a registration from an async closure taking the attempt's cancellation token.
	pub fn from_fn<F, Fut, E>(id: impl Into<ResourceId>, priority: Priority, f: F) -> Self
	where
		F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<T, E>> + Send + 'static,
		E: Into<BoxError> + 'static,
	{
		Self::new(id, priority, f)
	}

	#[must_use]
	pub fn kind(mut self, kind: ResourceKind) -> Self {
		self.kind = kind;
		self
	}

	/// Appends dependencies. Duplicates are ignored; order is preserved.
	#[must_use]
	pub fn depends_on<I>(mut self, ids: I) -> Self
	where
		I: IntoIterator,
		I::Item: Into<ResourceId>,
	{
		for id in ids {
			let id = id.into();
			if !self.dependencies.contains(&id) {
				self.dependencies.push(id);
			}
		}
		self
	}

	/// Fails an attempt that has not settled after `timeout`.
	#[must_use]
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}

	/// Sets the maximum number of attempts per load cycle.
	///
	/// # Panics
	///
	/// Panics if `attempts` is zero.
	#[must_use]
	pub fn retry_attempts(mut self, attempts: u32) -> Self {
		assert!(attempts > 0, "retry attempts must be > 0");
		self.retry_attempts = Some(attempts);
		self
	}

	pub fn id(&self) -> &ResourceId {
		&self.id
	}

	pub(crate) fn into_descriptor(self, default_retry_attempts: u32) -> Descriptor {
		Descriptor {
			id: self.id,
			kind: self.kind,
			priority: self.priority,
			dependencies: self.dependencies,
			timeout: self.timeout,
			retry_attempts: self.retry_attempts.unwrap_or(default_retry_attempts),
			loader: Arc::new(ErasedLoader::new(self.loader)),
		}
	}
}

impl<T> fmt::Debug for ResourceSpec<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ResourceSpec")
			.field("id", &self.id)
			.field("kind", &self.kind)
			.field("priority", &self.priority)
			.field("dependencies", &self.dependencies)
			.field("timeout", &self.timeout)
			.field("retry_attempts", &self.retry_attempts)
			.finish_non_exhaustive()
	}
}

/// Registered, type-erased descriptor.
pub(crate) struct Descriptor {
	pub(crate) id: ResourceId,
	pub(crate) kind: ResourceKind,
	pub(crate) priority: Priority,
	pub(crate) dependencies: Vec<ResourceId>,
	pub(crate) timeout: Option<Duration>,
	pub(crate) retry_attempts: u32,
	pub(crate) loader: Arc<dyn Loader<Payload>>,
}

/// Typed reference to a registered resource.
///
/// Returned by [`crate::Scheduler::register`]; reads the payload back as `T`.
pub struct ResourceHandle<T> {
	id: ResourceId,
	_payload: PhantomData<fn() -> T>,
}

impl<T> ResourceHandle<T> {
	pub(crate) fn new(id: ResourceId) -> Self {
		Self { id, _payload: PhantomData }
	}

	pub fn id(&self) -> &ResourceId {
		&self.id
	}
}

impl<T> Clone for ResourceHandle<T> {
	fn clone(&self) -> Self {
		Self::new(self.id.clone())
	}
}

impl<T> fmt::Debug for ResourceHandle<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_tuple("ResourceHandle").field(&self.id).finish()
	}
}
