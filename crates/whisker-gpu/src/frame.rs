//! Per-frame bookkeeping of the orchestrator.

use crate::render_target::RenderTargetKey;
use crate::surface::SurfaceKey;
use ash::vk;
use hashbrown::HashSet;
use std::collections::VecDeque;
use std::hash::Hash;
use whisker_core::BindingKind;

/// Where the orchestrator is in the begin/record/end/submit/present cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramePhase {
    /// No frame open. `begin` starts one.
    Idle,
    /// Command buffer open, no render pass.
    Open,
    /// A render pass is open; draws may be recorded.
    InPass,
    /// Submitted, waiting for `present`.
    Submitted,
}

/// A surface image drawn to this frame.
#[derive(Clone, Copy, Debug)]
pub(crate) struct RecordedSurface {
    pub key: SurfaceKey,
    pub swapchain: vk::SwapchainKHR,
    pub image_index: u32,
    pub acquire_semaphore: vk::Semaphore,
    pub submit_semaphore: vk::Semaphore,
}

/// The render pass currently open.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PassInfo {
    pub render_pass: vk::RenderPass,
    /// Set for offscreen passes, whose attachments change state on `end`.
    pub target: Option<RenderTargetKey>,
}

/// The program bound inside the open pass.
#[derive(Clone, Debug)]
pub(crate) struct BoundProgram {
    pub layout: vk::PipelineLayout,
    pub slots: Vec<BindingKind>,
}

/// FIFO of keys with at most one entry per key.
#[derive(Debug)]
pub(crate) struct RetryQueue<K> {
    order: VecDeque<K>,
    members: HashSet<K>,
}

impl<K> Default for RetryQueue<K> {
    fn default() -> Self {
        Self {
            order: VecDeque::new(),
            members: HashSet::new(),
        }
    }
}

impl<K: Copy + Eq + Hash> RetryQueue<K> {
    /// Returns `false` if the key was already queued.
    pub fn push(&mut self, key: K) -> bool {
        if self.members.insert(key) {
            self.order.push_back(key);
            true
        } else {
            false
        }
    }

    /// Returns `true` if the key was queued.
    pub fn remove(&mut self, key: K) -> bool {
        if self.members.remove(&key) {
            self.order.retain(|k| *k != key);
            true
        } else {
            false
        }
    }

    /// Take every queued key in insertion order, leaving the queue empty.
    pub fn drain(&mut self) -> Vec<K> {
        self.members.clear();
        self.order.drain(..).collect()
    }

    pub fn contains(&self, key: K) -> bool {
        self.members.contains(&key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }
}

/// Everything the orchestrator tracks between `begin` and `present`.
pub(crate) struct Frame {
    pub phase: FramePhase,
    pub recorded: Vec<RecordedSurface>,
    pub pass: Option<PassInfo>,
    pub program: Option<BoundProgram>,
    pub retry: RetryQueue<SurfaceKey>,
}

impl Frame {
    pub fn new() -> Self {
        Self {
            phase: FramePhase::Idle,
            recorded: Vec::new(),
            pass: None,
            program: None,
            retry: RetryQueue::default(),
        }
    }

    pub fn was_recorded(&self, key: SurfaceKey) -> bool {
        self.recorded.iter().any(|r| r.key == key)
    }

    /// Drop the per-frame sequences; the retry queue carries over.
    pub fn clear(&mut self) {
        self.recorded.clear();
        self.pass = None;
        self.program = None;
        self.phase = FramePhase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_queue_coalesces_duplicates() {
        let mut queue = RetryQueue::default();
        assert!(queue.push(3u32));
        assert!(queue.push(1));
        assert!(!queue.push(3));
        assert_eq!(queue.len(), 2);
        assert!(queue.contains(1));

        assert_eq!(queue.drain(), vec![3, 1]);
        assert!(queue.is_empty());
        assert!(queue.push(3));
    }

    #[test]
    fn retry_queue_removal_keeps_order() {
        let mut queue = RetryQueue::default();
        for key in [5u32, 6, 7] {
            queue.push(key);
        }
        assert!(queue.remove(6));
        assert!(!queue.remove(6));
        assert_eq!(queue.iter().copied().collect::<Vec<_>>(), vec![5, 7]);
    }
}
