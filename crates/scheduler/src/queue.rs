use std::collections::VecDeque;

use crate::Priority;
use crate::resource::ResourceId;

/// One FIFO of resource ids per priority tier.
#[derive(Debug, Default)]
pub(crate) struct PriorityQueues {
	tiers: [VecDeque<ResourceId>; 5],
}

impl PriorityQueues {
	/// Appends `id` to the tail of `priority`, dropping any earlier placement in any tier.
	pub(crate) fn push(&mut self, priority: Priority, id: ResourceId) {
		self.remove(&id);
		tracing::trace!(resource = %id, priority = priority.as_str(), "scheduler.queue.push");
		self.tiers[priority.index()].push_back(id);
	}

	pub(crate) fn pop(&mut self, priority: Priority) -> Option<ResourceId> {
		self.tiers[priority.index()].pop_front()
	}

	pub(crate) fn remove(&mut self, id: &ResourceId) -> bool {
		let mut removed = false;
		for tier in &mut self.tiers {
			let before = tier.len();
			tier.retain(|queued| queued != id);
			removed |= tier.len() != before;
		}
		removed
	}

	/// Ids queued in `priority`, in registration order.
	pub(crate) fn snapshot(&self, priority: Priority) -> Vec<ResourceId> {
		self.tiers[priority.index()].iter().cloned().collect()
	}

	pub(crate) fn len(&self, priority: Priority) -> usize {
		self.tiers[priority.index()].len()
	}
}
