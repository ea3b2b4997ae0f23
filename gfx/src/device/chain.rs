use std::ffi::c_void;

use smallvec::SmallVec;
use vulkanalia::prelude::v1_0::*;

use crate::physical::{ExtensionSet, FeatureBlock, FeatureGroup, FeatureSet};

/// Common prefix of all extensible Vulkan structs.
#[repr(C)]
struct ChainHeader {
    s_type: vk::StructureType,
    next: *mut c_void,
}

/// Feature blocks passed to device creation.
///
/// Only blocks of core groups and of groups whose extension is enabled are
/// linked, in [`FeatureGroup::ALL`] order. The chain is boxed so that the
/// links stay valid for its whole lifetime.
pub(crate) struct FeatureChain {
    core: vk::PhysicalDeviceFeatures,
    v1_1: vk::PhysicalDeviceVulkan11Features,
    v1_2: vk::PhysicalDeviceVulkan12Features,
    v1_3: vk::PhysicalDeviceVulkan13Features,
    acceleration_structure: vk::PhysicalDeviceAccelerationStructureFeaturesKHR,
    ray_query: vk::PhysicalDeviceRayQueryFeaturesKHR,
    ray_tracing_pipeline: vk::PhysicalDeviceRayTracingPipelineFeaturesKHR,
    linked: SmallVec<[FeatureGroup; 8]>,
    head: *mut c_void,
}

impl FeatureChain {
    pub fn new(features: &FeatureSet, extensions: &ExtensionSet) -> Box<Self> {
        let mut chain = Box::new(Self {
            core: Default::default(),
            v1_1: Default::default(),
            v1_2: Default::default(),
            v1_3: Default::default(),
            acceleration_structure: Default::default(),
            ray_query: Default::default(),
            ray_tracing_pipeline: Default::default(),
            linked: SmallVec::new(),
            head: std::ptr::null_mut(),
        });

        chain.core.write_from(features);
        chain.v1_1.write_from(features);
        chain.v1_2.write_from(features);
        chain.v1_3.write_from(features);
        chain.acceleration_structure.write_from(features);
        chain.ray_query.write_from(features);
        chain.ray_tracing_pipeline.write_from(features);

        // 1.0 features are passed directly, not through the chain
        chain.linked = FeatureGroup::ALL
            .iter()
            .copied()
            .filter(|group| match group.extension() {
                None => *group != FeatureGroup::Core10,
                Some(extension) => extensions.contains(extension),
            })
            .collect();

        chain.link();
        chain
    }

    fn block_ptr(&mut self, group: FeatureGroup) -> *mut c_void {
        match group {
            FeatureGroup::Core10 => (&mut self.core as *mut vk::PhysicalDeviceFeatures).cast(),
            FeatureGroup::Core11 => (&mut self.v1_1 as *mut vk::PhysicalDeviceVulkan11Features).cast(),
            FeatureGroup::Core12 => (&mut self.v1_2 as *mut vk::PhysicalDeviceVulkan12Features).cast(),
            FeatureGroup::Core13 => (&mut self.v1_3 as *mut vk::PhysicalDeviceVulkan13Features).cast(),
            FeatureGroup::AccelerationStructure => (&mut self.acceleration_structure
                as *mut vk::PhysicalDeviceAccelerationStructureFeaturesKHR)
                .cast(),
            FeatureGroup::RayQuery => {
                (&mut self.ray_query as *mut vk::PhysicalDeviceRayQueryFeaturesKHR).cast()
            }
            FeatureGroup::RayTracingPipeline => (&mut self.ray_tracing_pipeline
                as *mut vk::PhysicalDeviceRayTracingPipelineFeaturesKHR)
                .cast(),
        }
    }

    fn link(&mut self) {
        let mut next = std::ptr::null_mut();
        for group in self.linked.clone().into_iter().rev() {
            debug_assert_ne!(group, FeatureGroup::Core10);

            let block = self.block_ptr(group);
            // SAFETY: every linked block is an extensible struct
            // which starts with `sType` and `pNext`.
            unsafe { (*block.cast::<ChainHeader>()).next = next };
            next = block;
        }
        self.head = next;
    }

    /// Groups linked into the chain, in order.
    #[cfg(test)]
    pub fn linked(&self) -> &[FeatureGroup] {
        &self.linked
    }

    /// Vulkan 1.0 features.
    pub fn core(&self) -> &vk::PhysicalDeviceFeatures {
        &self.core
    }

    /// The first linked block.
    pub fn head(&self) -> *const c_void {
        self.head
    }
}
