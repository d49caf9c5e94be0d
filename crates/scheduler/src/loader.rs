//! Loader contract between the scheduler and whatever actually fetches bytes.
//!
//! The scheduler never interprets what a loader produces. It only needs to
//! start the operation, race it against a timeout, and tell it to stop.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::result::Payload;

/// Boxed error returned by loaders.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// An asynchronous operation producing one resource payload.
///
/// `cancel` fires when the load is cancelled or its attempt timed out.
/// Honoring it is optional: the scheduler discards any late result anyway.
#[async_trait]
pub trait Loader<T>: Send + Sync + 'static {
	async fn load(&self, cancel: CancellationToken) -> Result<T, BoxError>;
}

#[async_trait]
impl<T, E, F, Fut> Loader<T> for F
where
	F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
	Fut: Future<Output = Result<T, E>> + Send + 'static,
	E: Into<BoxError> + 'static,
	T: Send + 'static,
{
	async fn load(&self, cancel: CancellationToken) -> Result<T, BoxError> {
		(self)(cancel).await.map_err(Into::into)
	}
}

/// Adapts a typed loader into one producing a type-erased [`Payload`].
pub(crate) struct ErasedLoader<T> {
	inner: Arc<dyn Loader<T>>,
}

impl<T> ErasedLoader<T>
where
	T: Send + Sync + 'static,
{
	pub(crate) fn new(inner: Arc<dyn Loader<T>>) -> Self {
		Self { inner }
	}
}

#[async_trait]
impl<T> Loader<Payload> for ErasedLoader<T>
where
	T: Send + Sync + 'static,
{
	async fn load(&self, cancel: CancellationToken) -> Result<Payload, BoxError> {
		self.inner.load(cancel).await.map(Payload::new)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn closures_are_loaders() {
		let loader = |_cancel: CancellationToken| async { Ok::<_, BoxError>(7u32) };
		assert_eq!(loader.load(CancellationToken::new()).await.ok(), Some(7));
	}

	#[tokio::test]
	async fn string_errors_convert() {
		let loader = |_cancel: CancellationToken| async { Err::<u32, _>("network error") };
		let err = loader.load(CancellationToken::new()).await.unwrap_err();
		assert_eq!(err.to_string(), "network error");
	}

	#[tokio::test]
	async fn erased_payload_downcasts_back() {
		let typed: Arc<dyn Loader<String>> = Arc::new(|_cancel: CancellationToken| async { Ok::<_, BoxError>(String::from("img")) });
		let erased = ErasedLoader::new(typed);
		let payload = erased.load(CancellationToken::new()).await.unwrap();
		assert_eq!(payload.downcast::<String>().as_deref().map(String::as_str), Some("img"));
		assert!(payload.downcast::<u32>().is_none());
	}
}
