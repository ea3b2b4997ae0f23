use std::fmt;
use std::str::FromStr;

use vulkanalia::prelude::v1_0::*;

use super::extensions::{
    KHR_ACCELERATION_STRUCTURE, KHR_DEFERRED_HOST_OPERATIONS, KHR_RAY_QUERY,
    KHR_RAY_TRACING_PIPELINE,
};

/// A Vulkan feature struct whose boolean fields map onto [`Feature`]s.
pub(crate) trait FeatureBlock {
    /// Marks every enabled field of the block in `set`.
    fn read_into(&self, set: &mut FeatureSet);

    /// Overwrites every mapped field of the block from `set`.
    fn write_from(&mut self, set: &FeatureSet);
}

macro_rules! define_features {
    ($(
        $(#[$group_meta:meta])*
        $group:ident($label:literal, $block:ty) {
            $($variant:ident => $field:ident),*$(,)?
        }
    )*) => {
        /// A single boolean device capability.
        #[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
        pub enum Feature {
            $($($variant,)*)*
        }

        impl Feature {
            /// All known features in declaration order.
            pub const ALL: &'static [Feature] = &[$($(Feature::$variant,)*)*];

            /// Returns the group this feature belongs to.
            pub const fn group(self) -> FeatureGroup {
                match self {
                    $($(Feature::$variant)|* => FeatureGroup::$group,)*
                }
            }

            /// Returns the diagnostic name, e.g. `Vulkan12Features::buffer_device_address`.
            pub const fn name(self) -> &'static str {
                match self {
                    $($(Feature::$variant => concat!($label, "::", stringify!($field)),)*)*
                }
            }

            /// Returns the name of the underlying struct field.
            pub const fn field_name(self) -> &'static str {
                match self {
                    $($(Feature::$variant => stringify!($field),)*)*
                }
            }
        }

        /// A versioned block of device features.
        #[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
        pub enum FeatureGroup {
            $($(#[$group_meta])* $group,)*
        }

        impl FeatureGroup {
            /// All groups in the order their blocks are chained.
            pub const ALL: &'static [FeatureGroup] = &[$(FeatureGroup::$group,)*];

            /// Returns the name of the native feature struct.
            pub const fn label(self) -> &'static str {
                match self {
                    $(FeatureGroup::$group => $label,)*
                }
            }

            /// Returns all features of this group.
            pub const fn features(self) -> &'static [Feature] {
                match self {
                    $(FeatureGroup::$group => &[$(Feature::$variant,)*],)*
                }
            }
        }

        $(
            impl FeatureBlock for $block {
                fn read_into(&self, set: &mut FeatureSet) {
                    $(
                        if self.$field != 0 {
                            set.insert(Feature::$variant);
                        }
                    )*
                }

                fn write_from(&mut self, set: &FeatureSet) {
                    $(
                        self.$field = if set.contains(Feature::$variant) {
                            vk::TRUE
                        } else {
                            vk::FALSE
                        };
                    )*
                }
            }
        )*
    };
}

define_features! {
    /// Vulkan 1.0 core features.
    Core10("Features", vk::PhysicalDeviceFeatures) {
        RobustBufferAccess => robust_buffer_access,
        FullDrawIndexUint32 => full_draw_index_uint32,
        ImageCubeArray => image_cube_array,
        IndependentBlend => independent_blend,
        GeometryShader => geometry_shader,
        TessellationShader => tessellation_shader,
        SampleRateShading => sample_rate_shading,
        DualSrcBlend => dual_src_blend,
        LogicOp => logic_op,
        MultiDrawIndirect => multi_draw_indirect,
        DrawIndirectFirstInstance => draw_indirect_first_instance,
        DepthClamp => depth_clamp,
        DepthBiasClamp => depth_bias_clamp,
        FillModeNonSolid => fill_mode_non_solid,
        DepthBounds => depth_bounds,
        WideLines => wide_lines,
        LargePoints => large_points,
        AlphaToOne => alpha_to_one,
        MultiViewport => multi_viewport,
        SamplerAnisotropy => sampler_anisotropy,
        TextureCompressionEtc2 => texture_compression_etc2,
        TextureCompressionAstcLdr => texture_compression_astc_ldr,
        TextureCompressionBc => texture_compression_bc,
        OcclusionQueryPrecise => occlusion_query_precise,
        PipelineStatisticsQuery => pipeline_statistics_query,
        VertexPipelineStoresAndAtomics => vertex_pipeline_stores_and_atomics,
        FragmentStoresAndAtomics => fragment_stores_and_atomics,
        ShaderTessellationAndGeometryPointSize => shader_tessellation_and_geometry_point_size,
        ShaderImageGatherExtended => shader_image_gather_extended,
        ShaderStorageImageExtendedFormats => shader_storage_image_extended_formats,
        ShaderStorageImageMultisample => shader_storage_image_multisample,
        ShaderStorageImageReadWithoutFormat => shader_storage_image_read_without_format,
        ShaderStorageImageWriteWithoutFormat => shader_storage_image_write_without_format,
        ShaderUniformBufferArrayDynamicIndexing => shader_uniform_buffer_array_dynamic_indexing,
        ShaderSampledImageArrayDynamicIndexing => shader_sampled_image_array_dynamic_indexing,
        ShaderStorageBufferArrayDynamicIndexing => shader_storage_buffer_array_dynamic_indexing,
        ShaderStorageImageArrayDynamicIndexing => shader_storage_image_array_dynamic_indexing,
        ShaderClipDistance => shader_clip_distance,
        ShaderCullDistance => shader_cull_distance,
        ShaderFloat64 => shader_float64,
        ShaderInt64 => shader_int64,
        ShaderInt16 => shader_int16,
        ShaderResourceResidency => shader_resource_residency,
        ShaderResourceMinLod => shader_resource_min_lod,
        SparseBinding => sparse_binding,
        SparseResidencyBuffer => sparse_residency_buffer,
        SparseResidencyAliased => sparse_residency_aliased,
        VariableMultisampleRate => variable_multisample_rate,
        InheritedQueries => inherited_queries,
    }

    /// Vulkan 1.1 core features.
    Core11("Vulkan11Features", vk::PhysicalDeviceVulkan11Features) {
        Multiview => multiview,
        MultiviewGeometryShader => multiview_geometry_shader,
        MultiviewTessellationShader => multiview_tessellation_shader,
        VariablePointersStorageBuffer => variable_pointers_storage_buffer,
        VariablePointers => variable_pointers,
        ProtectedMemory => protected_memory,
        SamplerYcbcrConversion => sampler_ycbcr_conversion,
        ShaderDrawParameters => shader_draw_parameters,
    }

    /// Vulkan 1.2 core features.
    Core12("Vulkan12Features", vk::PhysicalDeviceVulkan12Features) {
        SamplerMirrorClampToEdge => sampler_mirror_clamp_to_edge,
        DrawIndirectCount => draw_indirect_count,
        ShaderBufferInt64Atomics => shader_buffer_int64_atomics,
        ShaderSharedInt64Atomics => shader_shared_int64_atomics,
        ShaderFloat16 => shader_float16,
        ShaderInt8 => shader_int8,
        DescriptorIndexing => descriptor_indexing,
        ShaderInputAttachmentArrayDynamicIndexing => shader_input_attachment_array_dynamic_indexing,
        ShaderUniformTexelBufferArrayDynamicIndexing => shader_uniform_texel_buffer_array_dynamic_indexing,
        ShaderStorageTexelBufferArrayDynamicIndexing => shader_storage_texel_buffer_array_dynamic_indexing,
        ShaderUniformBufferArrayNonUniformIndexing => shader_uniform_buffer_array_non_uniform_indexing,
        ShaderSampledImageArrayNonUniformIndexing => shader_sampled_image_array_non_uniform_indexing,
        ShaderStorageBufferArrayNonUniformIndexing => shader_storage_buffer_array_non_uniform_indexing,
        ShaderStorageImageArrayNonUniformIndexing => shader_storage_image_array_non_uniform_indexing,
        ShaderInputAttachmentArrayNonUniformIndexing => shader_input_attachment_array_non_uniform_indexing,
        ShaderUniformTexelBufferArrayNonUniformIndexing => shader_uniform_texel_buffer_array_non_uniform_indexing,
        ShaderStorageTexelBufferArrayNonUniformIndexing => shader_storage_texel_buffer_array_non_uniform_indexing,
        DescriptorBindingUniformBufferUpdateAfterBind => descriptor_binding_uniform_buffer_update_after_bind,
        DescriptorBindingSampledImageUpdateAfterBind => descriptor_binding_sampled_image_update_after_bind,
        DescriptorBindingStorageImageUpdateAfterBind => descriptor_binding_storage_image_update_after_bind,
        DescriptorBindingStorageBufferUpdateAfterBind => descriptor_binding_storage_buffer_update_after_bind,
        DescriptorBindingUniformTexelBufferUpdateAfterBind => descriptor_binding_uniform_texel_buffer_update_after_bind,
        DescriptorBindingStorageTexelBufferUpdateAfterBind => descriptor_binding_storage_texel_buffer_update_after_bind,
        DescriptorBindingUpdateUnusedWhilePending => descriptor_binding_update_unused_while_pending,
        DescriptorBindingPartiallyBound => descriptor_binding_partially_bound,
        DescriptorBindingVariableDescriptorCount => descriptor_binding_variable_descriptor_count,
        RuntimeDescriptorArray => runtime_descriptor_array,
        SamplerFilterMinmax => sampler_filter_minmax,
        ScalarBlockLayout => scalar_block_layout,
        ImagelessFramebuffer => imageless_framebuffer,
        UniformBufferStandardLayout => uniform_buffer_standard_layout,
        ShaderSubgroupExtendedTypes => shader_subgroup_extended_types,
        SeparateDepthStencilLayouts => separate_depth_stencil_layouts,
        HostQueryReset => host_query_reset,
        TimelineSemaphore => timeline_semaphore,
        BufferDeviceAddress => buffer_device_address,
        BufferDeviceAddressCaptureReplay => buffer_device_address_capture_replay,
        BufferDeviceAddressMultiDevice => buffer_device_address_multi_device,
        VulkanMemoryModel => vulkan_memory_model,
        VulkanMemoryModelDeviceScope => vulkan_memory_model_device_scope,
        VulkanMemoryModelAvailabilityVisibilityChains => vulkan_memory_model_availability_visibility_chains,
        ShaderOutputViewportIndex => shader_output_viewport_index,
        ShaderOutputLayer => shader_output_layer,
        SubgroupBroadcastDynamicId => subgroup_broadcast_dynamic_id,
    }

    /// Vulkan 1.3 core features.
    Core13("Vulkan13Features", vk::PhysicalDeviceVulkan13Features) {
        RobustImageAccess => robust_image_access,
        InlineUniformBlock => inline_uniform_block,
        DescriptorBindingInlineUniformBlockUpdateAfterBind => descriptor_binding_inline_uniform_block_update_after_bind,
        PipelineCreationCacheControl => pipeline_creation_cache_control,
        PrivateData => private_data,
        ShaderDemoteToHelperInvocation => shader_demote_to_helper_invocation,
        ShaderTerminateInvocation => shader_terminate_invocation,
        SubgroupSizeControl => subgroup_size_control,
        ComputeFullSubgroups => compute_full_subgroups,
        Synchronization2 => synchronization2,
        TextureCompressionAstcHdr => texture_compression_astc_hdr,
        ShaderZeroInitializeWorkgroupMemory => shader_zero_initialize_workgroup_memory,
        DynamicRendering => dynamic_rendering,
        ShaderIntegerDotProduct => shader_integer_dot_product,
        Maintenance4 => maintenance4,
    }

    /// `VK_KHR_acceleration_structure` features.
    AccelerationStructure("AccelerationStructureFeaturesKHR", vk::PhysicalDeviceAccelerationStructureFeaturesKHR) {
        AccelerationStructure => acceleration_structure,
        AccelerationStructureCaptureReplay => acceleration_structure_capture_replay,
        AccelerationStructureIndirectBuild => acceleration_structure_indirect_build,
        AccelerationStructureHostCommands => acceleration_structure_host_commands,
        DescriptorBindingAccelerationStructureUpdateAfterBind => descriptor_binding_acceleration_structure_update_after_bind,
    }

    /// `VK_KHR_ray_query` features.
    RayQuery("RayQueryFeaturesKHR", vk::PhysicalDeviceRayQueryFeaturesKHR) {
        RayQuery => ray_query,
    }

    /// `VK_KHR_ray_tracing_pipeline` features.
    RayTracingPipeline("RayTracingPipelineFeaturesKHR", vk::PhysicalDeviceRayTracingPipelineFeaturesKHR) {
        RayTracingPipeline => ray_tracing_pipeline,
        RayTracingPipelineShaderGroupHandleCaptureReplay => ray_tracing_pipeline_shader_group_handle_capture_replay,
        RayTracingPipelineShaderGroupHandleCaptureReplayMixed => ray_tracing_pipeline_shader_group_handle_capture_replay_mixed,
        RayTracingPipelineTraceRaysIndirect => ray_tracing_pipeline_trace_rays_indirect,
        RayTraversalPrimitiveCulling => ray_traversal_primitive_culling,
    }
}

impl Feature {
    /// Returns the extensions that must be enabled for this feature.
    #[inline]
    pub fn implied_extensions(self) -> &'static [&'static str] {
        self.group().implied_extensions()
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Feature {
    type Err = UnknownFeature;

    /// Parses either a full diagnostic name or a bare field name.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let found = match s.split_once("::") {
            Some((label, field)) => Feature::ALL
                .iter()
                .find(|f| f.group().label() == label && f.field_name() == field),
            None => Feature::ALL.iter().find(|f| f.field_name() == s),
        };
        found.copied().ok_or_else(|| UnknownFeature(s.to_owned()))
    }
}

/// Error returned when parsing an unknown feature name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown device feature `{0}`")]
pub struct UnknownFeature(pub String);

impl FeatureGroup {
    /// Returns the extension which owns this group, if it is not a core group.
    pub const fn extension(self) -> Option<&'static str> {
        match self {
            Self::Core10 | Self::Core11 | Self::Core12 | Self::Core13 => None,
            Self::AccelerationStructure => Some(KHR_ACCELERATION_STRUCTURE),
            Self::RayQuery => Some(KHR_RAY_QUERY),
            Self::RayTracingPipeline => Some(KHR_RAY_TRACING_PIPELINE),
        }
    }

    /// Returns all extensions that enabling any feature of this group requires.
    pub const fn implied_extensions(self) -> &'static [&'static str] {
        match self {
            Self::Core10 | Self::Core11 | Self::Core12 | Self::Core13 => &[],
            Self::AccelerationStructure => {
                &[KHR_DEFERRED_HOST_OPERATIONS, KHR_ACCELERATION_STRUCTURE]
            }
            Self::RayQuery => &[
                KHR_DEFERRED_HOST_OPERATIONS,
                KHR_ACCELERATION_STRUCTURE,
                KHR_RAY_QUERY,
            ],
            Self::RayTracingPipeline => &[
                KHR_DEFERRED_HOST_OPERATIONS,
                KHR_ACCELERATION_STRUCTURE,
                KHR_RAY_TRACING_PIPELINE,
            ],
        }
    }
}

const WORDS: usize = Feature::ALL.len().div_ceil(64);

/// A set of [`Feature`]s, one bit per feature.
#[derive(Default, Clone, Copy, Hash, PartialEq, Eq)]
pub struct FeatureSet {
    bits: [u64; WORDS],
}

impl FeatureSet {
    #[inline]
    pub const fn new() -> Self {
        Self { bits: [0; WORDS] }
    }

    /// Returns a set with all known features.
    pub fn all() -> Self {
        Feature::ALL.iter().copied().collect()
    }

    #[inline]
    const fn locate(feature: Feature) -> (usize, u64) {
        let index = feature as usize;
        (index / 64, 1 << (index % 64))
    }

    #[inline]
    pub fn insert(&mut self, feature: Feature) {
        let (word, mask) = Self::locate(feature);
        self.bits[word] |= mask;
    }

    #[inline]
    pub fn remove(&mut self, feature: Feature) {
        let (word, mask) = Self::locate(feature);
        self.bits[word] &= !mask;
    }

    #[inline]
    pub fn contains(&self, feature: Feature) -> bool {
        let (word, mask) = Self::locate(feature);
        self.bits[word] & mask != 0
    }

    /// Builder-style [`insert`](Self::insert).
    #[inline]
    pub fn with(mut self, feature: Feature) -> Self {
        self.insert(feature);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.bits.iter().all(|word| *word == 0)
    }

    pub fn len(&self) -> usize {
        self.bits.iter().map(|word| word.count_ones() as usize).sum()
    }

    pub fn union(&self, other: &Self) -> Self {
        let mut res = *self;
        res.union_with(other);
        res
    }

    pub fn union_with(&mut self, other: &Self) {
        for (a, b) in self.bits.iter_mut().zip(other.bits) {
            *a |= b;
        }
    }

    pub fn intersection(&self, other: &Self) -> Self {
        let mut res = *self;
        for (a, b) in res.bits.iter_mut().zip(other.bits) {
            *a &= b;
        }
        res
    }

    pub fn difference(&self, other: &Self) -> Self {
        let mut res = *self;
        for (a, b) in res.bits.iter_mut().zip(other.bits) {
            *a &= !b;
        }
        res
    }

    pub fn is_subset(&self, other: &Self) -> bool {
        self.bits
            .iter()
            .zip(other.bits)
            .all(|(a, b)| a & !b == 0)
    }

    /// Returns `true` if any feature of the group is in the set.
    pub fn intersects_group(&self, group: FeatureGroup) -> bool {
        group.features().iter().any(|f| self.contains(*f))
    }

    /// Iterates features in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = Feature> + '_ {
        Feature::ALL.iter().copied().filter(|f| self.contains(*f))
    }

    /// Iterates groups with at least one feature in the set.
    pub fn groups(&self) -> impl Iterator<Item = FeatureGroup> + '_ {
        FeatureGroup::ALL
            .iter()
            .copied()
            .filter(|group| self.intersects_group(*group))
    }
}

impl FromIterator<Feature> for FeatureSet {
    fn from_iter<T: IntoIterator<Item = Feature>>(iter: T) -> Self {
        let mut res = Self::new();
        res.extend(iter);
        res
    }
}

impl Extend<Feature> for FeatureSet {
    fn extend<T: IntoIterator<Item = Feature>>(&mut self, iter: T) {
        for feature in iter {
            self.insert(feature);
        }
    }
}

impl<const N: usize> From<[Feature; N]> for FeatureSet {
    fn from(features: [Feature; N]) -> Self {
        features.into_iter().collect()
    }
}

impl fmt::Debug for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter().map(Feature::name)).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_qualified_by_group() {
        assert_eq!(
            Feature::BufferDeviceAddress.name(),
            "Vulkan12Features::buffer_device_address"
        );
        assert_eq!(Feature::SamplerAnisotropy.name(), "Features::sampler_anisotropy");
        assert_eq!(Feature::RayQuery.group(), FeatureGroup::RayQuery);
        assert_eq!(
            Feature::AccelerationStructure.name(),
            "AccelerationStructureFeaturesKHR::acceleration_structure"
        );
        assert_eq!(
            "RayTracingPipelineFeaturesKHR::ray_tracing_pipeline".parse::<Feature>(),
            Ok(Feature::RayTracingPipeline)
        );
    }

    #[test]
    fn parse_feature_names() {
        assert_eq!(
            "Vulkan13Features::dynamic_rendering".parse::<Feature>(),
            Ok(Feature::DynamicRendering)
        );
        assert_eq!(
            "timeline_semaphore".parse::<Feature>(),
            Ok(Feature::TimelineSemaphore)
        );
        assert!("Vulkan11Features::dynamic_rendering"
            .parse::<Feature>()
            .is_err());
        assert!("no_such_feature".parse::<Feature>().is_err());

        for feature in Feature::ALL {
            assert_eq!(feature.name().parse::<Feature>(), Ok(*feature));
        }
    }

    #[test]
    fn every_feature_belongs_to_exactly_one_group() {
        let total: usize = FeatureGroup::ALL.iter().map(|g| g.features().len()).sum();
        assert_eq!(total, Feature::ALL.len());
        for group in FeatureGroup::ALL {
            for feature in group.features() {
                assert_eq!(feature.group(), *group);
            }
        }
    }

    #[test]
    fn set_operations() {
        let a = FeatureSet::from([Feature::GeometryShader, Feature::RayQuery]);
        let b = FeatureSet::from([Feature::RayQuery, Feature::Maintenance4]);

        assert_eq!(a.len(), 2);
        assert_eq!(a.union(&b).len(), 3);
        assert_eq!(
            a.intersection(&b),
            FeatureSet::from([Feature::RayQuery])
        );
        assert_eq!(
            a.difference(&b),
            FeatureSet::from([Feature::GeometryShader])
        );
        assert!(a.intersection(&b).is_subset(&a));
        assert!(!a.is_subset(&b));
        assert!(FeatureSet::new().is_empty());
        assert_eq!(FeatureSet::all().len(), Feature::ALL.len());

        let groups = a.union(&b).groups().collect::<Vec<_>>();
        assert_eq!(
            groups,
            [FeatureGroup::Core10, FeatureGroup::Core13, FeatureGroup::RayQuery]
        );
    }

    #[test]
    fn block_round_trip_normalizes_booleans() {
        let mut block = vk::PhysicalDeviceVulkan12Features {
            timeline_semaphore: 7,
            buffer_device_address: vk::TRUE,
            ..Default::default()
        };

        let mut set = FeatureSet::new();
        block.read_into(&mut set);
        assert_eq!(
            set,
            FeatureSet::from([Feature::TimelineSemaphore, Feature::BufferDeviceAddress])
        );

        block.write_from(&set);
        assert_eq!(block.timeline_semaphore, vk::TRUE);
        assert_eq!(block.scalar_block_layout, vk::FALSE);
    }

    #[test]
    fn ray_tracing_implies_acceleration_structure() {
        let implied = Feature::RayTracingPipeline.implied_extensions();
        assert!(implied.contains(&KHR_ACCELERATION_STRUCTURE));
        assert!(implied.contains(&KHR_DEFERRED_HOST_OPERATIONS));
        assert!(Feature::Multiview.implied_extensions().is_empty());
        assert_eq!(
            FeatureGroup::RayQuery.extension(),
            Some(KHR_RAY_QUERY)
        );
    }
}
