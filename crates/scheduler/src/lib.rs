//! Progressive resource loading scheduler.
//!
//! Decides what to load, when, in which order, and how to recover when a
//! load fails, independent of what a resource actually is. Callers register
//! resources with a priority tier, optional dependencies, an optional timeout
//! and a retry budget, then trigger loading:
//!
//! * explicitly: [`Scheduler::load_resource`], [`Scheduler::load_by_priority`], [`Scheduler::preload_critical`]
//! * when a watched element nears the viewport: [`Scheduler::observe_element`]
//! * in the background while nothing else loads: [`Scheduler::start_idle_loading`]
//!
//! Every state transition is published, in order, to subscribers
//! ([`Scheduler::subscribe`], [`Scheduler::notifications`]). Loader failures
//! are never returned as errors; they show up as [`LoadState::Error`] results.
//!
//! ```no_run
//! # use std::time::Duration;
//! # use wayfarer_scheduler::{BoxError, Priority, ResourceSpec, Scheduler, SchedulerConfig};
//! # async fn demo() -> Result<(), wayfarer_scheduler::SchedulerError> {
//! let scheduler = Scheduler::new(SchedulerConfig::default());
//! let hero = scheduler.register(ResourceSpec::from_fn("hero-image", Priority::Critical, |_cancel| async {
//! 	tokio::time::sleep(Duration::from_millis(10)).await;
//! 	Ok::<_, BoxError>("img-bytes")
//! }))?;
//! scheduler.preload_critical().await;
//! assert_eq!(scheduler.data(&hero).as_deref(), Some(&"img-bytes"));
//! # Ok(())
//! # }
//! ```

mod bus;
mod config;
mod error;
mod graph;
mod idle;
mod loader;
mod priority;
mod queue;
mod resource;
mod result;
mod scheduler;
mod token;
mod visibility;

pub use bus::{Notification, Notifications, Subscription};
pub use config::{Backoff, SchedulerConfig};
pub use error::{LoadError, LoadErrorKind, Result, SchedulerError};
pub use idle::IdleLoader;
pub use loader::{BoxError, Loader};
pub use priority::{ParsePriorityError, Priority};
pub use resource::{ResourceHandle, ResourceId, ResourceKind, ResourceSpec};
pub use result::{LoadResult, LoadState, LoadStats, Payload, Snapshot};
pub use scheduler::Scheduler;
pub use tokio_util::sync::CancellationToken;
pub use visibility::{ElementId, Rect};
