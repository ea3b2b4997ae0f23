use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::{InstanceV1_1, KhrSurfaceExtensionInstanceCommands};

use crate::queue::{QueueFamilyInfo, QueueFlags};
use crate::types::{ApiVersion, OutOfDeviceMemory, SurfaceLost};
use crate::util::{FromVk, ToGfx};

pub use self::extensions::*;
pub use self::features::{Feature, FeatureGroup, FeatureSet, UnknownFeature};
pub use self::negotiate::{
    check_extensions, check_features, negotiate, CapabilityRequirement, NegotiatedCapabilities,
    Pass, Unsupported,
};
pub use self::selector::{
    CandidateRejection, PhysicalDeviceSelector, Rejection, SearchPolicy, SelectError,
    SelectedPhysicalDevice, SuitabilityLimits,
};

pub(crate) use self::features::FeatureBlock;

mod extensions;
mod features;
mod negotiate;
mod selector;

/// The lowest Vulkan version a device must report to be considered.
pub const MIN_API_VERSION: u32 = vk::make_version(1, 3, 0);

/// Fails if `version` is lower than [`MIN_API_VERSION`].
pub fn check_api_version(version: ApiVersion) -> Result<(), SnapshotError> {
    if version < ApiVersion(MIN_API_VERSION) {
        return Err(SnapshotError::UnsupportedApiVersion {
            found: version,
            required: ApiVersion(MIN_API_VERSION),
        });
    }
    Ok(())
}

/// An immutable snapshot of a physical device capabilities.
#[derive(Debug, Clone)]
pub struct HardwareCandidate {
    handle: vk::PhysicalDevice,
    properties: Box<DeviceProperties>,
    extensions: ExtensionSet,
    features: FeatureSet,
    queue_families: Vec<QueueFamilyInfo>,
    presentation: Option<PresentationSupport>,
}

impl HardwareCandidate {
    /// Queries all capabilities of the physical device.
    ///
    /// Presentation support is queried only when `surface` is specified.
    ///
    /// # Safety
    ///
    /// The following must be true:
    /// - `handle` must be a physical device enumerated from `instance`
    /// - `surface` must be created from `instance`
    pub(crate) unsafe fn snapshot(
        instance: &Instance,
        handle: vk::PhysicalDevice,
        surface: Option<vk::SurfaceKHR>,
    ) -> Result<Self, SnapshotError> {
        let api_version = instance.get_physical_device_properties(handle).api_version;
        check_api_version(ApiVersion(api_version))?;

        let extensions = instance
            .enumerate_device_extension_properties(handle, None)
            .map_err(|e| match e {
                vk::ErrorCode::OUT_OF_HOST_MEMORY => crate::out_of_host_memory(),
                vk::ErrorCode::OUT_OF_DEVICE_MEMORY => SnapshotError::from(OutOfDeviceMemory),
                _ => crate::unexpected_vulkan_error(e),
            })?
            .into_iter()
            .map(|item| item.extension_name.to_string())
            .collect::<ExtensionSet>();

        let has_acceleration_structure = extensions.contains(KHR_ACCELERATION_STRUCTURE);
        let has_ray_query = extensions.contains(KHR_RAY_QUERY);
        let has_ray_tracing_pipeline = extensions.contains(KHR_RAY_TRACING_PIPELINE);

        let mut properties = Box::<DeviceProperties>::default();
        let mut acceleration_structure_properties =
            vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
        let mut ray_tracing_pipeline_properties =
            vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();

        let features_v1_0;
        let mut features_v1_1 = vk::PhysicalDeviceVulkan11Features::default();
        let mut features_v1_2 = vk::PhysicalDeviceVulkan12Features::default();
        let mut features_v1_3 = vk::PhysicalDeviceVulkan13Features::default();
        let mut acceleration_structure_features =
            vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();
        let mut ray_query_features = vk::PhysicalDeviceRayQueryFeaturesKHR::default();
        let mut ray_tracing_pipeline_features =
            vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default();

        {
            let mut features2 = vk::PhysicalDeviceFeatures2::builder()
                .push_next(&mut features_v1_1)
                .push_next(&mut features_v1_2)
                .push_next(&mut features_v1_3);
            let mut properties2 = vk::PhysicalDeviceProperties2::builder()
                .push_next(&mut properties.v1_1)
                .push_next(&mut properties.v1_2)
                .push_next(&mut properties.v1_3);

            // Extension blocks exist only if their extension is advertised
            if has_acceleration_structure {
                features2 = features2.push_next(&mut acceleration_structure_features);
                properties2 = properties2.push_next(&mut acceleration_structure_properties);
            }
            if has_ray_query {
                features2 = features2.push_next(&mut ray_query_features);
            }
            if has_ray_tracing_pipeline {
                features2 = features2.push_next(&mut ray_tracing_pipeline_features);
                properties2 = properties2.push_next(&mut ray_tracing_pipeline_properties);
            }

            instance.get_physical_device_features2(handle, &mut features2);
            instance.get_physical_device_properties2(handle, &mut properties2);

            features_v1_0 = features2.features;
            properties.v1_0 = properties2.properties;
        }

        properties.v1_1.next = std::ptr::null_mut();
        properties.v1_2.next = std::ptr::null_mut();
        properties.v1_3.next = std::ptr::null_mut();

        let mut features = FeatureSet::new();
        features_v1_0.read_into(&mut features);
        features_v1_1.read_into(&mut features);
        features_v1_2.read_into(&mut features);
        features_v1_3.read_into(&mut features);
        if has_acceleration_structure {
            acceleration_structure_features.read_into(&mut features);
            acceleration_structure_properties.next = std::ptr::null_mut();
            properties.acceleration_structure = Some(acceleration_structure_properties);
        }
        if has_ray_query {
            ray_query_features.read_into(&mut features);
        }
        if has_ray_tracing_pipeline {
            ray_tracing_pipeline_features.read_into(&mut features);
            ray_tracing_pipeline_properties.next = std::ptr::null_mut();
            properties.ray_tracing_pipeline = Some(ray_tracing_pipeline_properties);
        }

        let queue_families = instance
            .get_physical_device_queue_family_properties(handle)
            .into_iter()
            .map(|family| QueueFamilyInfo {
                flags: family.queue_flags.to_gfx(),
                queue_count: family.queue_count,
            })
            .collect::<Vec<_>>();

        let presentation = match surface {
            Some(surface) => Some(PresentationSupport::query(
                instance,
                handle,
                surface,
                queue_families.len() as u32,
            )?),
            None => None,
        };

        tracing::debug!(
            name = %properties.v1_0.device_name,
            extensions = extensions.len(),
            features = features.len(),
            queue_families = queue_families.len(),
            "collected physical device capabilities",
        );

        Ok(Self {
            handle,
            properties,
            extensions,
            features,
            queue_families,
            presentation,
        })
    }

    /// Returns the underlying Vulkan physical device.
    pub fn handle(&self) -> vk::PhysicalDevice {
        self.handle
    }

    /// Returns the device name reported by the driver.
    pub fn name(&self) -> String {
        self.properties.v1_0.device_name.to_string()
    }

    pub fn device_type(&self) -> DeviceType {
        self.properties.v1_0.device_type.to_gfx()
    }

    pub fn api_version(&self) -> ApiVersion {
        ApiVersion(self.properties.v1_0.api_version)
    }

    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.properties.v1_0.limits
    }

    /// Returns all physical device properties.
    pub fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    /// Returns all supported extensions.
    pub fn extensions(&self) -> &ExtensionSet {
        &self.extensions
    }

    pub fn supports_extension(&self, name: &str) -> bool {
        self.extensions.contains(name)
    }

    /// Returns all supported features.
    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    pub fn queue_families(&self) -> &[QueueFamilyInfo] {
        &self.queue_families
    }

    /// Returns presentation support for the surface used to create
    /// this snapshot, if any.
    pub fn presentation(&self) -> Option<&PresentationSupport> {
        self.presentation.as_ref()
    }

    /// Runs negotiation against capabilities of this device.
    pub fn negotiate(
        &self,
        requirement: &CapabilityRequirement,
        pass: Pass,
    ) -> Result<NegotiatedCapabilities, Unsupported> {
        negotiate(requirement, &self.features, &self.extensions, pass)
    }

    /// Finds the first non-empty family which has all `required` flags
    /// and none of the `forbidden` ones.
    ///
    /// # Panics
    ///
    /// Panics if `required` is empty or intersects `forbidden`.
    pub fn find_family(&self, required: QueueFlags, forbidden: QueueFlags) -> Option<u32> {
        assert!(!required.is_empty(), "required queue flags must not be empty");
        assert!(
            !required.intersects(forbidden),
            "queue flags cannot be both required and forbidden"
        );

        self.queue_families
            .iter()
            .position(|family| family.queue_count > 0 && family.flags.satisfies(required, forbidden))
            .map(|index| index as u32)
    }

    /// Finds the first non-empty family which can present to the surface.
    pub fn find_presentation_family(&self) -> Option<u32> {
        let presentation = self.presentation.as_ref()?;
        self.queue_families
            .iter()
            .zip(presentation.families.iter())
            .position(|(family, supported)| family.queue_count > 0 && *supported)
            .map(|index| index as u32)
    }
}

/// Per-family presentation support for a single surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentationSupport {
    pub families: Vec<bool>,
    pub surface_suitable: bool,
}

impl PresentationSupport {
    unsafe fn query(
        instance: &Instance,
        handle: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        family_count: u32,
    ) -> Result<Self, SnapshotError> {
        let map_err = |e: vk::ErrorCode| match e {
            vk::ErrorCode::OUT_OF_HOST_MEMORY => crate::out_of_host_memory(),
            vk::ErrorCode::OUT_OF_DEVICE_MEMORY => SnapshotError::from(OutOfDeviceMemory),
            vk::ErrorCode::SURFACE_LOST_KHR => SnapshotError::from(SurfaceLost),
            _ => crate::unexpected_vulkan_error(e),
        };

        let families = (0..family_count)
            .map(|family| instance.get_physical_device_surface_support_khr(handle, family, surface))
            .collect::<Result<Vec<_>, _>>()
            .map_err(map_err)?;

        let formats = instance
            .get_physical_device_surface_formats_khr(handle, surface)
            .map_err(map_err)?;
        let present_modes = instance
            .get_physical_device_surface_present_modes_khr(handle, surface)
            .map_err(map_err)?;

        Ok(Self {
            families,
            surface_suitable: !formats.is_empty() && !present_modes.is_empty(),
        })
    }

    pub fn supports(&self, family: u32) -> bool {
        self.families.get(family as usize).copied().unwrap_or_default()
    }
}

/// Physical device kind.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum DeviceType {
    DiscreteGpu,
    IntegratedGpu,
    VirtualGpu,
    Cpu,
    Other,
}

impl DeviceType {
    /// Returns the selection priority (higher is better).
    pub const fn priority(self) -> u32 {
        match self {
            Self::DiscreteGpu => 3,
            Self::IntegratedGpu => 2,
            Self::Cpu => 1,
            Self::VirtualGpu | Self::Other => 0,
        }
    }
}

impl FromVk<vk::PhysicalDeviceType> for DeviceType {
    fn from_vk(ty: vk::PhysicalDeviceType) -> Self {
        match ty {
            vk::PhysicalDeviceType::DISCRETE_GPU => Self::DiscreteGpu,
            vk::PhysicalDeviceType::INTEGRATED_GPU => Self::IntegratedGpu,
            vk::PhysicalDeviceType::VIRTUAL_GPU => Self::VirtualGpu,
            vk::PhysicalDeviceType::CPU => Self::Cpu,
            _ => Self::Other,
        }
    }
}

/// All physical device properties.
#[derive(Debug, Default, Clone)]
pub struct DeviceProperties {
    pub v1_0: vk::PhysicalDeviceProperties,
    pub v1_1: vk::PhysicalDeviceVulkan11Properties,
    pub v1_2: vk::PhysicalDeviceVulkan12Properties,
    pub v1_3: vk::PhysicalDeviceVulkan13Properties,
    pub acceleration_structure: Option<vk::PhysicalDeviceAccelerationStructurePropertiesKHR>,
    pub ray_tracing_pipeline: Option<vk::PhysicalDeviceRayTracingPipelinePropertiesKHR>,
}

unsafe impl Sync for DeviceProperties {}
unsafe impl Send for DeviceProperties {}

/// Error that can occur when collecting physical device capabilities.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    #[error("device supports Vulkan {found}, but at least {required} is required")]
    UnsupportedApiVersion {
        found: ApiVersion,
        required: ApiVersion,
    },
    #[error(transparent)]
    OutOfDeviceMemory(#[from] OutOfDeviceMemory),
    #[error(transparent)]
    SurfaceLost(#[from] SurfaceLost),
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_type_priority() {
        let discrete = DeviceType::from_vk(vk::PhysicalDeviceType::DISCRETE_GPU);
        let integrated = DeviceType::from_vk(vk::PhysicalDeviceType::INTEGRATED_GPU);
        let cpu = DeviceType::from_vk(vk::PhysicalDeviceType::CPU);
        let other = DeviceType::from_vk(vk::PhysicalDeviceType::OTHER);

        assert!(discrete.priority() > integrated.priority());
        assert!(integrated.priority() > cpu.priority());
        assert!(cpu.priority() > other.priority());
    }

    #[test]
    fn api_version_below_minimum_is_rejected() {
        let required = ApiVersion(MIN_API_VERSION);

        let old = ApiVersion(vk::make_version(1, 2, 198));
        assert_eq!(
            check_api_version(old),
            Err(SnapshotError::UnsupportedApiVersion {
                found: old,
                required,
            })
        );
        assert_eq!(
            check_api_version(old).unwrap_err().to_string(),
            "device supports Vulkan 1.2.198, but at least 1.3.0 is required"
        );

        assert_eq!(check_api_version(required), Ok(()));
        assert_eq!(check_api_version(ApiVersion(vk::make_version(1, 3, 250))), Ok(()));
        assert_eq!(check_api_version(ApiVersion(vk::make_version(1, 4, 0))), Ok(()));
    }

    #[test]
    fn find_family_skips_forbidden_and_empty() {
        let candidate = HardwareCandidate::fake("gpu", vk::PhysicalDeviceType::DISCRETE_GPU)
            .with_queue_families(&[
                (QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER, 16),
                (QueueFlags::TRANSFER, 0),
                (QueueFlags::COMPUTE | QueueFlags::TRANSFER, 2),
                (QueueFlags::TRANSFER, 1),
            ]);

        assert_eq!(
            candidate.find_family(QueueFlags::GRAPHICS | QueueFlags::COMPUTE, QueueFlags::empty()),
            Some(0)
        );
        assert_eq!(
            candidate.find_family(QueueFlags::COMPUTE, QueueFlags::GRAPHICS),
            Some(2)
        );
        assert_eq!(
            candidate.find_family(QueueFlags::TRANSFER, QueueFlags::GRAPHICS | QueueFlags::COMPUTE),
            Some(3)
        );
        assert_eq!(
            candidate.find_family(QueueFlags::SPARSE_BINDING, QueueFlags::empty()),
            None
        );
    }

    #[test]
    #[should_panic]
    fn find_family_rejects_conflicting_flags() {
        let candidate = HardwareCandidate::fake("gpu", vk::PhysicalDeviceType::DISCRETE_GPU);
        candidate.find_family(QueueFlags::COMPUTE, QueueFlags::COMPUTE);
    }

    #[test]
    fn presentation_family() {
        let candidate = HardwareCandidate::fake("gpu", vk::PhysicalDeviceType::DISCRETE_GPU)
            .with_queue_families(&[(QueueFlags::TRANSFER, 1), (QueueFlags::GRAPHICS, 1)]);
        assert_eq!(candidate.find_presentation_family(), None);

        let candidate = candidate.with_presentation(&[false, true], true);
        assert_eq!(candidate.find_presentation_family(), Some(1));
        assert!(candidate.presentation().is_some_and(|p| p.supports(1)));
        assert!(!candidate.presentation().is_some_and(|p| p.supports(7)));
    }
}
