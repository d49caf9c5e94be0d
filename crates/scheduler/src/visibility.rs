//! Visibility-triggered loading.
//!
//! The host owns layout; it reports the viewport and element bounds in the
//! same coordinate space. An element whose bounds touch the viewport grown by
//! the pre-fetch margin fires its resource once, then stops being watched.

use rustc_hash::FxHashMap;

use crate::resource::ResourceId;

/// Host-assigned identifier of a view element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ElementId(pub u64);

/// Axis-aligned rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
	pub x: f64,
	pub y: f64,
	pub width: f64,
	pub height: f64,
}

impl Rect {
	pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
		Self { x, y, width, height }
	}

	fn right(&self) -> f64 {
		self.x + self.width
	}

	fn bottom(&self) -> f64 {
		self.y + self.height
	}

	/// Grows the rectangle by `margin` on every side.
	pub fn inflate(&self, margin: f64) -> Self {
		Self {
			x: self.x - margin,
			y: self.y - margin,
			width: self.width + 2.0 * margin,
			height: self.height + 2.0 * margin,
		}
	}

	/// Edge contact counts as intersecting, so zero-sized elements on the margin still fire.
	pub fn intersects(&self, other: &Rect) -> bool {
		self.x <= other.right() && other.x <= self.right() && self.y <= other.bottom() && other.y <= self.bottom()
	}
}

struct Observed {
	resource: ResourceId,
	bounds: Option<Rect>,
}

/// Element ↔ resource associations and the last known geometry.
pub(crate) struct VisibilityWatcher {
	margin: f64,
	viewport: Option<Rect>,
	observed: FxHashMap<ElementId, Observed>,
}

impl VisibilityWatcher {
	pub(crate) fn new(margin: f64) -> Self {
		Self {
			margin,
			viewport: None,
			observed: FxHashMap::default(),
		}
	}

	/// Starts watching `element`. Replaces an earlier association of the same element.
	pub(crate) fn observe(&mut self, element: ElementId, resource: ResourceId) {
		self.observed.insert(element, Observed { resource, bounds: None });
	}

	pub(crate) fn unobserve(&mut self, element: ElementId) -> Option<ResourceId> {
		self.observed.remove(&element).map(|o| o.resource)
	}

	/// Drops every association pointing at `resource`.
	pub(crate) fn forget_resource(&mut self, resource: &ResourceId) {
		self.observed.retain(|_, o| &o.resource != resource);
	}

	pub(crate) fn len(&self) -> usize {
		self.observed.len()
	}

	/// Updates the viewport and returns resources of elements that became visible.
	pub(crate) fn set_viewport(&mut self, viewport: Rect) -> Vec<ResourceId> {
		self.viewport = Some(viewport);
		let zone = viewport.inflate(self.margin);
		let mut fired: Vec<(ElementId, ResourceId)> = Vec::new();
		self.observed.retain(|element, o| match o.bounds {
			Some(bounds) if bounds.intersects(&zone) => {
				fired.push((*element, o.resource.clone()));
				false
			}
			_ => true,
		});
		fired.sort_by_key(|(element, _)| *element);
		fired.into_iter().map(|(_, resource)| resource).collect()
	}

	/// Records new bounds for `element`; returns its resource if it became visible.
	pub(crate) fn report_bounds(&mut self, element: ElementId, bounds: Rect) -> Option<ResourceId> {
		let observed = self.observed.get_mut(&element)?;
		observed.bounds = Some(bounds);
		let zone = self.viewport?.inflate(self.margin);
		if bounds.intersects(&zone) { self.unobserve(element) } else { None }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn viewport() -> Rect {
		Rect::new(0.0, 0.0, 800.0, 600.0)
	}

	#[test]
	fn element_within_margin_fires_once() {
		let mut w = VisibilityWatcher::new(50.0);
		w.set_viewport(viewport());
		w.observe(ElementId(1), "img".into());

		// 40px below the fold: inside the 50px pre-fetch margin.
		assert_eq!(w.report_bounds(ElementId(1), Rect::new(0.0, 640.0, 100.0, 100.0)), Some("img".into()));
		assert_eq!(w.report_bounds(ElementId(1), Rect::new(0.0, 0.0, 100.0, 100.0)), None);
		assert_eq!(w.len(), 0);
	}

	#[test]
	fn element_outside_margin_waits_for_scroll() {
		let mut w = VisibilityWatcher::new(50.0);
		w.set_viewport(viewport());
		w.observe(ElementId(7), "lazy".into());

		assert_eq!(w.report_bounds(ElementId(7), Rect::new(0.0, 1000.0, 100.0, 100.0)), None);
		assert!(w.set_viewport(Rect::new(0.0, 200.0, 800.0, 600.0)).is_empty());
		assert_eq!(w.set_viewport(Rect::new(0.0, 400.0, 800.0, 600.0)), vec![ResourceId::from("lazy")]);
		assert_eq!(w.len(), 0);
	}

	#[test]
	fn bounds_before_viewport_are_kept_for_later() {
		let mut w = VisibilityWatcher::new(0.0);
		w.observe(ElementId(2), "a".into());
		assert_eq!(w.report_bounds(ElementId(2), Rect::new(10.0, 10.0, 5.0, 5.0)), None);
		assert_eq!(w.set_viewport(viewport()), vec![ResourceId::from("a")]);
	}

	#[test]
	fn unobserved_elements_never_fire() {
		let mut w = VisibilityWatcher::new(50.0);
		w.set_viewport(viewport());
		w.observe(ElementId(3), "a".into());
		w.observe(ElementId(4), "b".into());
		assert_eq!(w.unobserve(ElementId(3)), Some("a".into()));
		w.forget_resource(&"b".into());
		assert_eq!(w.report_bounds(ElementId(3), Rect::new(0.0, 0.0, 1.0, 1.0)), None);
		assert_eq!(w.report_bounds(ElementId(4), Rect::new(0.0, 0.0, 1.0, 1.0)), None);
	}
}
