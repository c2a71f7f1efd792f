//! Deferred resource deletion for multi-frame-in-flight rendering.
//!
//! GPU resources referenced by a submission cannot be released until that
//! submission completes. Resources retired while frame slot `i` is recorded
//! are queued against slot `i` and released the next time slot `i`'s fence is
//! observed signaled.

use crate::buffer::Buffer;
use crate::image::Image;

/// A resource waiting for the GPU to stop using it.
#[derive(Debug)]
pub enum Retired {
    Buffer(Buffer),
    Image(Image),
}

impl From<Buffer> for Retired {
    fn from(buffer: Buffer) -> Self {
        Self::Buffer(buffer)
    }
}

impl From<Image> for Retired {
    fn from(image: Image) -> Self {
        Self::Image(image)
    }
}

/// Per-slot queue of retired resources.
#[derive(Debug)]
pub struct DeferredDeletionQueue {
    slots: Vec<Vec<Retired>>,
}

impl DeferredDeletionQueue {
    /// Create a queue with one list per frame slot.
    pub fn new(slot_count: usize) -> Self {
        assert!(slot_count >= 1, "deletion queue needs at least one slot");
        Self {
            slots: (0..slot_count).map(|_| Vec::new()).collect(),
        }
    }

    /// Number of slots.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Queue a resource used by work submitted from `slot`.
    pub fn queue(&mut self, slot: usize, resource: impl Into<Retired>) {
        self.slots[slot].push(resource.into());
    }

    /// Release everything queued against `slot`.
    ///
    /// Call only after the slot's fence has been observed signaled.
    /// Returns the number of resources released.
    pub fn process(&mut self, slot: usize) -> usize {
        let released = self.slots[slot].len();
        if released > 0 {
            tracing::trace!(slot, released, "Releasing deferred resources");
        }
        self.slots[slot].clear();
        released
    }

    /// Release every pending resource immediately.
    ///
    /// Call during shutdown after `device_wait_idle()`.
    pub fn flush(&mut self) -> usize {
        (0..self.slots.len()).map(|slot| self.process(slot)).sum()
    }

    /// Number of resources waiting across all slots.
    pub fn pending_count(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }
}
