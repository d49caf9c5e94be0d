//! Dependency cycle detection for registrations.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::resource::ResourceId;

/// Looks for a cycle reachable from `root` once its edges become `root_deps`.
///
/// `deps_of` returns the current edges of already-registered resources;
/// unknown ids have none. Returns the cycle as a path starting and ending at
/// the same id.
pub(crate) fn find_cycle<'a, F>(root: &ResourceId, root_deps: &'a [ResourceId], deps_of: F) -> Option<Vec<ResourceId>>
where
	F: Fn(&ResourceId) -> Option<&'a [ResourceId]>,
{
	let edges = |id: &ResourceId| -> &'a [ResourceId] { if id == root { root_deps } else { deps_of(id).unwrap_or(&[]) } };

	let mut done: FxHashSet<ResourceId> = FxHashSet::default();
	let mut on_path: FxHashMap<ResourceId, usize> = FxHashMap::default();
	let mut path: Vec<ResourceId> = vec![root.clone()];
	let mut stack: Vec<(&'a [ResourceId], usize)> = vec![(edges(root), 0)];
	on_path.insert(root.clone(), 0);

	while let Some(frame) = stack.last_mut() {
		let children: &'a [ResourceId] = frame.0;
		let Some(child) = children.get(frame.1) else {
			stack.pop();
			if let Some(finished) = path.pop() {
				on_path.remove(&finished);
				done.insert(finished);
			}
			continue;
		};
		frame.1 += 1;

		if let Some(&start) = on_path.get(child) {
			let mut cycle = path[start..].to_vec();
			cycle.push(child.clone());
			return Some(cycle);
		}
		if done.contains(child) {
			continue;
		}

		on_path.insert(child.clone(), path.len());
		path.push(child.clone());
		stack.push((edges(child), 0));
	}

	None
}
