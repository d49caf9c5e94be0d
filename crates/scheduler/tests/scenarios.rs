//! End-to-end loading scenarios against the public API.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use pretty_assertions::assert_eq;
use wayfarer_scheduler::{
	BoxError, CancellationToken, ElementId, LoadError, LoadState, Notification, Priority, Rect, ResourceId, ResourceSpec,
	Scheduler, SchedulerConfig,
};

fn position(events: &[Notification], id: &str, state: LoadState) -> usize {
	events
		.iter()
		.position(|n| n.id.as_str() == id && n.state == state)
		.unwrap_or_else(|| panic!("no {state} notification for {id}"))
}

#[tokio::test(start_paused = true)]
async fn critical_hero_image_preloads_with_data() {
	let scheduler = Scheduler::new(SchedulerConfig::default());
	let hero = scheduler
		.register(ResourceSpec::from_fn("hero-image", Priority::Critical, |_cancel| async {
			tokio::time::sleep(Duration::from_millis(10)).await;
			Ok::<_, BoxError>("img-bytes")
		}))
		.unwrap();

	scheduler.preload_critical().await;

	let result = scheduler.get_result("hero-image").unwrap();
	assert_eq!(result.state, LoadState::Success);
	assert_eq!(result.data.as_ref().and_then(|d| d.downcast_ref::<&str>()), Some(&"img-bytes"));
	assert_eq!(scheduler.data(&hero).as_deref(), Some(&"img-bytes"));
}

#[tokio::test(start_paused = true)]
async fn dependent_page_loads_strictly_after_its_dependency() {
	let scheduler = Scheduler::new(SchedulerConfig::default());
	scheduler
		.register(ResourceSpec::from_fn("list-page-1", Priority::High, |_cancel| async {
			tokio::time::sleep(Duration::from_millis(30)).await;
			Ok::<_, BoxError>(vec![1, 2, 3])
		}))
		.unwrap();
	scheduler
		.register(
			ResourceSpec::from_fn("list-page-2", Priority::Medium, |_cancel| async {
				tokio::time::sleep(Duration::from_millis(5)).await;
				Ok::<_, BoxError>(vec![4, 5, 6])
			})
			.depends_on(["list-page-1"]),
		)
		.unwrap();
	let mut events = scheduler.notifications();

	assert_eq!(scheduler.load_resource("list-page-2").await, Ok(LoadState::Success));

	let events = events.drain();
	let page1_done = position(&events, "list-page-1", LoadState::Success);
	let page2_loading = position(&events, "list-page-2", LoadState::Loading);
	assert!(page1_done < page2_loading);
	assert_eq!(
		events[page2_loading].results.get("list-page-1").map(|r| r.state),
		Some(LoadState::Success),
		"dependency must already be loaded when the dependent starts"
	);
}

#[tokio::test(start_paused = true)]
async fn flaky_resource_exhausts_its_retries() {
	let scheduler = Scheduler::new(SchedulerConfig::default());
	let calls = Arc::new(AtomicU32::new(0));
	let counter = Arc::clone(&calls);
	scheduler
		.register(
			ResourceSpec::from_fn("flaky", Priority::Low, move |_cancel| {
				counter.fetch_add(1, Ordering::SeqCst);
				async { Err::<(), _>("network error") }
			})
			.retry_attempts(2),
		)
		.unwrap();

	scheduler.load_by_priority(Priority::Low).await;

	let result = scheduler.get_result("flaky").unwrap();
	assert_eq!(result.state, LoadState::Error);
	assert_eq!(result.attempts, 2);
	assert_eq!(result.error, Some(LoadError::Loader("network error".into())));
	assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn observed_image_loads_once_when_scrolled_into_view() {
	let scheduler = Scheduler::new(SchedulerConfig::default());
	let calls = Arc::new(AtomicU32::new(0));
	let counter = Arc::clone(&calls);
	scheduler
		.register(ResourceSpec::from_fn("img-lazy", Priority::Low, move |_cancel| {
			counter.fetch_add(1, Ordering::SeqCst);
			async { Ok::<_, BoxError>(()) }
		}))
		.unwrap();

	let element = ElementId(1);
	scheduler.set_viewport(Rect::new(0.0, 0.0, 800.0, 600.0));
	scheduler.observe_element(element, "img-lazy").unwrap();
	assert_eq!(scheduler.report_element_bounds(element, Rect::new(0.0, 2000.0, 100.0, 100.0)), None);

	tokio::time::sleep(Duration::from_millis(100)).await;
	assert_eq!(scheduler.get_result("img-lazy").unwrap().state, LoadState::Idle);
	assert_eq!(calls.load(Ordering::SeqCst), 0);

	let fired = scheduler.set_viewport(Rect::new(0.0, 1500.0, 800.0, 600.0));
	assert_eq!(fired, vec![ResourceId::from("img-lazy")]);
	tokio::time::sleep(Duration::from_millis(100)).await;
	assert_eq!(scheduler.get_result("img-lazy").unwrap().state, LoadState::Success);

	assert!(scheduler.set_viewport(Rect::new(0.0, 2000.0, 800.0, 600.0)).is_empty());
	assert_eq!(scheduler.report_element_bounds(element, Rect::new(0.0, 2000.0, 100.0, 100.0)), None);
	tokio::time::sleep(Duration::from_millis(100)).await;
	assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn element_within_margin_triggers_prefetch() {
	let scheduler = Scheduler::new(SchedulerConfig::default().prefetch_margin(100.0));
	scheduler
		.register(ResourceSpec::from_fn("below-fold", Priority::Low, |_cancel| async { Ok::<_, BoxError>(()) }))
		.unwrap();
	scheduler.set_viewport(Rect::new(0.0, 0.0, 800.0, 600.0));
	scheduler.observe_element(ElementId(7), "below-fold").unwrap();

	let fired = scheduler.report_element_bounds(ElementId(7), Rect::new(0.0, 680.0, 100.0, 100.0));
	assert_eq!(fired.as_deref(), Some("below-fold"));
	tokio::time::sleep(Duration::from_millis(10)).await;
	assert_eq!(scheduler.get_result("below-fold").unwrap().state, LoadState::Success);
}

#[tokio::test(start_paused = true)]
async fn cancelled_load_never_completes() {
	let scheduler = Scheduler::new(SchedulerConfig::default());
	let completed = Arc::new(AtomicU32::new(0));
	let observed: Arc<parking_lot::Mutex<Option<CancellationToken>>> = Arc::default();
	let (counter, slot) = (Arc::clone(&completed), Arc::clone(&observed));
	scheduler
		.register(ResourceSpec::from_fn("stream", Priority::Medium, move |cancel: CancellationToken| {
			*slot.lock() = Some(cancel);
			let counter = Arc::clone(&counter);
			async move {
				tokio::time::sleep(Duration::from_secs(1)).await;
				counter.fetch_add(1, Ordering::SeqCst);
				Ok::<_, BoxError>(())
			}
		}))
		.unwrap();

	let runner = scheduler.clone();
	let load = tokio::spawn(async move { runner.load_resource("stream").await });
	tokio::time::sleep(Duration::from_millis(10)).await;
	assert!(scheduler.cancel_resource("stream"));
	assert_eq!(load.await.unwrap(), Ok(LoadState::Idle));
	assert!(observed.lock().as_ref().is_some_and(CancellationToken::is_cancelled));

	tokio::time::sleep(Duration::from_secs(2)).await;
	assert_eq!(completed.load(Ordering::SeqCst), 0);
	let result = scheduler.get_result("stream").unwrap();
	assert_eq!((result.state, result.attempts), (LoadState::Idle, 0));
}

#[tokio::test(start_paused = true)]
async fn whole_page_settles_in_tier_order() {
	let scheduler = Scheduler::new(SchedulerConfig::default());
	let specs = [
		("shell", Priority::Critical, 20),
		("nav", Priority::High, 10),
		("feed", Priority::Medium, 10),
		("footer", Priority::Low, 5),
	];
	for (id, priority, ms) in specs {
		scheduler
			.register(ResourceSpec::from_fn(id, priority, move |_cancel| async move {
				tokio::time::sleep(Duration::from_millis(ms)).await;
				Ok::<_, BoxError>(id)
			}))
			.unwrap();
	}
	scheduler.register(ResourceSpec::from_fn("analytics", Priority::Idle, |_cancel| async { Ok::<_, BoxError>(()) })).unwrap();
	let mut events = scheduler.notifications();

	scheduler.preload_critical().await;
	scheduler.load_by_priority(Priority::Medium).await;
	scheduler.load_by_priority(Priority::Low).await;
	let idle = scheduler.start_idle_loading();
	tokio::time::sleep(Duration::from_millis(50)).await;
	idle.stop().await;

	let events = events.drain();
	let order: Vec<&str> = events.iter().filter(|n| n.state == LoadState::Success).map(|n| n.id.as_str()).collect();
	assert_eq!(order, vec!["shell", "nav", "feed", "footer", "analytics"]);
	let stats = scheduler.stats();
	assert_eq!((stats.total, stats.success, stats.in_flight), (5, 5, 0));
	assert!(events.windows(2).all(|w| w[0].seq < w[1].seq));
}
