use std::marker::PhantomData;

use vulkanalia::prelude::v1_0::*;

use crate::util::FromVk;

pub use self::distribute::{distribute, QueueAssignment, QueueDistributionPlan};
pub use self::planner::{plan_queues, FamilySearch, QueuePlanError, QueueRequest, QueueRole};

mod distribute;
mod planner;

bitflags::bitflags! {
    /// Queue family capabilities.
    #[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
    pub struct QueueFlags: u32 {
        const GRAPHICS = 1;
        const COMPUTE = 1 << 1;
        const TRANSFER = 1 << 2;
        const SPARSE_BINDING = 1 << 3;
        const PROTECTED = 1 << 4;
    }
}

impl QueueFlags {
    pub fn supports_graphics(&self) -> bool {
        self.contains(Self::GRAPHICS)
    }

    pub fn supports_compute(&self) -> bool {
        self.contains(Self::COMPUTE)
    }

    /// Returns `true` if a family with these flags can serve a search for
    /// `required` flags while having none of the `forbidden` ones.
    pub fn satisfies(&self, required: QueueFlags, forbidden: QueueFlags) -> bool {
        self.contains(required) && !self.intersects(forbidden)
    }
}

impl FromVk<vk::QueueFlags> for QueueFlags {
    fn from_vk(flags: vk::QueueFlags) -> Self {
        let mut res = Self::empty();
        if flags.contains(vk::QueueFlags::GRAPHICS) {
            res |= Self::GRAPHICS;
        }
        if flags.contains(vk::QueueFlags::COMPUTE) {
            res |= Self::COMPUTE;
        }
        if flags.contains(vk::QueueFlags::TRANSFER) {
            res |= Self::TRANSFER;
        }
        if flags.contains(vk::QueueFlags::SPARSE_BINDING) {
            res |= Self::SPARSE_BINDING;
        }
        if flags.contains(vk::QueueFlags::PROTECTED) {
            res |= Self::PROTECTED;
        }
        res
    }
}

/// Capabilities of a single queue family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFamilyInfo {
    pub flags: QueueFlags,
    pub queue_count: u32,
}

/// A global queue id.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct QueueId {
    pub family: u32,
    pub index: u32,
}

/// A non-owning reference to a device queue.
///
/// Submissions to the same queue from multiple threads must be
/// externally synchronized by the caller.
#[derive(Debug, Clone, Copy)]
pub struct Queue<'a> {
    handle: vk::Queue,
    id: QueueId,
    _device: PhantomData<&'a crate::device::Device>,
}

impl<'a> Queue<'a> {
    pub(crate) fn new(handle: vk::Queue, id: QueueId) -> Self {
        Self {
            handle,
            id,
            _device: PhantomData,
        }
    }

    /// Returns the global queue id.
    pub fn id(&self) -> QueueId {
        self.id
    }

    /// Returns the underlying Vulkan queue.
    pub fn handle(&self) -> vk::Queue {
        self.handle
    }
}

/// Error returned when looking up a device queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue family {0} was not requested")]
    UnknownFamily(u32),
    #[error("queue {index} of family {family} was not requested")]
    UnknownQueue { family: u32, index: u32 },
}
