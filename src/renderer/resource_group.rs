//! Resource Groups
//!
//! A [`ResourceGroup`] is a descriptor set plus a constant-buffer slice
//! bound for one draw, one view or one frame. The [`ResourceGroupAllocator`]
//! hands out descriptor sets and bump-allocates constant-buffer space for the
//! current frame; both are released wholesale by [`reset`](ResourceGroupAllocator::reset).
//!
//! PerFrame and PerView groups are long-lived objects owned by a
//! [`ResourceGroupEntry`] and re-prepared at most once per frame, guarded by
//! the entry's frame marker. PerDraw groups are fresh every frame.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::renderer::effect::reflection::ResourceGroupLayout;

/// Constant-buffer slice alignment, in bytes.
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

static NEXT_RESOURCE_GROUP_ID: AtomicU64 = AtomicU64::new(1);

/// How often a prepared group is expected to be bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferPoolAllocationType {
    /// Bound by a single draw.
    #[default]
    UsedOnce,
    /// Shared by many draws (PerFrame, PerView).
    UsedMultipleTime,
}

/// Handle of an allocated descriptor set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSetHandle(u64);

impl DescriptorSetHandle {
    #[inline]
    #[must_use]
    pub fn raw(self) -> u64 {
        self.0
    }
}

/// Range inside the frame's constant-buffer pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantBufferSlice {
    pub offset: u64,
    pub size: u32,
}

/// What a resource group is bound to this frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceGroupBinding {
    pub layout_hash: u64,
    pub descriptor_set: Option<DescriptorSetHandle>,
    pub constant_buffer: Option<ConstantBufferSlice>,
    pub allocation_type: BufferPoolAllocationType,
    pub frame: u64,
    /// Hash of the parameters uploaded into the group, if any.
    pub parameters_hash: u64,
}

/// Descriptor set and constant buffer bound together.
#[derive(Debug)]
pub struct ResourceGroup {
    id: u64,
    binding: Mutex<ResourceGroupBinding>,
}

impl ResourceGroup {
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: NEXT_RESOURCE_GROUP_ID.fetch_add(1, Ordering::Relaxed),
            binding: Mutex::new(ResourceGroupBinding::default()),
        }
    }

    /// Process-unique identity.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn binding(&self) -> ResourceGroupBinding {
        self.binding.lock().clone()
    }

    pub fn set_parameters_hash(&self, hash: u64) {
        self.binding.lock().parameters_hash = hash;
    }
}

impl Default for ResourceGroup {
    fn default() -> Self {
        Self::new()
    }
}

/// Long-lived resource group with a "used this frame" marker.
#[derive(Debug)]
pub struct ResourceGroupEntry {
    last_frame_used: AtomicU64,
    pub resources: Arc<ResourceGroup>,
    pub layout_hash: u64,
}

impl ResourceGroupEntry {
    #[must_use]
    pub fn new(layout_hash: u64) -> Self {
        Self {
            last_frame_used: AtomicU64::new(u64::MAX),
            resources: Arc::new(ResourceGroup::new()),
            layout_hash,
        }
    }

    /// Returns `true` exactly once per frame, for the first caller.
    pub fn mark_as_used(&self, frame: u64) -> bool {
        self.last_frame_used.swap(frame, Ordering::AcqRel) != frame
    }

    #[must_use]
    pub fn is_used_during_frame(&self, frame: u64) -> bool {
        self.last_frame_used.load(Ordering::Acquire) == frame
    }
}

/// Per-frame allocation statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    pub frame: u64,
    pub prepared_groups: usize,
    pub constant_buffer_bytes: u64,
}

/// Thread-safe per-frame allocator of descriptor sets and constant buffers.
#[derive(Debug, Default)]
pub struct ResourceGroupAllocator {
    frame: AtomicU64,
    next_descriptor_set: AtomicU64,
    constant_buffer_cursor: AtomicU64,
    prepared_groups: AtomicUsize,
    last_flush: Mutex<AllocatorStats>,
}

impl ResourceGroupAllocator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases every allocation of the previous frame.
    pub fn reset(&self, frame: u64) {
        self.frame.store(frame, Ordering::Release);
        self.constant_buffer_cursor.store(0, Ordering::Release);
        self.prepared_groups.store(0, Ordering::Release);
    }

    /// New, unprepared group for a single draw.
    #[must_use]
    pub fn allocate_resource_group(&self) -> Arc<ResourceGroup> {
        Arc::new(ResourceGroup::new())
    }

    /// Allocates a descriptor set and constant-buffer space for `group`
    /// following `layout`.
    pub fn prepare_resource_group(
        &self,
        layout: &ResourceGroupLayout,
        allocation_type: BufferPoolAllocationType,
        group: &ResourceGroup,
    ) {
        let descriptor_set = DescriptorSetHandle(
            self.next_descriptor_set.fetch_add(1, Ordering::Relaxed),
        );

        let constant_buffer = (layout.constant_buffer_size > 0).then(|| {
            let size = u64::from(layout.constant_buffer_size);
            let aligned = size.div_ceil(CONSTANT_BUFFER_ALIGNMENT) * CONSTANT_BUFFER_ALIGNMENT;
            ConstantBufferSlice {
                offset: self.constant_buffer_cursor.fetch_add(aligned, Ordering::Relaxed),
                size: layout.constant_buffer_size,
            }
        });

        self.prepared_groups.fetch_add(1, Ordering::Relaxed);

        let mut binding = group.binding.lock();
        *binding = ResourceGroupBinding {
            layout_hash: layout.descriptor_set_layout.hash(),
            descriptor_set: Some(descriptor_set),
            constant_buffer,
            allocation_type,
            frame: self.frame.load(Ordering::Acquire),
            parameters_hash: 0,
        };
    }

    /// Ends the frame's allocations and records their statistics.
    pub fn flush(&self) -> AllocatorStats {
        let stats = AllocatorStats {
            frame: self.frame.load(Ordering::Acquire),
            prepared_groups: self.prepared_groups.load(Ordering::Acquire),
            constant_buffer_bytes: self.constant_buffer_cursor.load(Ordering::Acquire),
        };
        *self.last_flush.lock() = stats;
        stats
    }

    /// Statistics recorded by the last [`flush`](Self::flush).
    #[must_use]
    pub fn last_flush(&self) -> AllocatorStats {
        *self.last_flush.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_marks_once_per_frame() {
        let entry = ResourceGroupEntry::new(0);
        assert!(entry.mark_as_used(1));
        assert!(!entry.mark_as_used(1));
        assert!(entry.is_used_during_frame(1));
        assert!(entry.mark_as_used(2));
    }

    #[test]
    fn entry_marks_once_across_threads() {
        use rayon::prelude::*;

        let entry = ResourceGroupEntry::new(0);
        let winners = (0..256)
            .into_par_iter()
            .filter(|_| entry.mark_as_used(7))
            .count();
        assert_eq!(winners, 1);
    }
}
