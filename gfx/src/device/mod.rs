use std::collections::BTreeMap;

use vulkanalia::prelude::v1_0::*;

use self::chain::FeatureChain;
use crate::graphics::Graphics;
use crate::physical::{
    CapabilityRequirement, DeviceProperties, Feature, HardwareCandidate, NegotiatedCapabilities,
    Pass, Unsupported,
};
use crate::queue::{Queue, QueueError, QueueId};
use crate::types::{DeviceLost, OutOfDeviceMemory};
use crate::util::FastHashSet;

mod chain;

/// A wrapper around a Vulkan logical device.
///
/// Owns the native device and destroys it on drop after waiting for
/// all queues to become idle. All resources created from the device
/// must be destroyed before that.
pub struct Device {
    logical: vulkanalia::Device,
    physical: vk::PhysicalDevice,
    properties: Box<DeviceProperties>,
    capabilities: NegotiatedCapabilities,
    queues: BTreeMap<u32, Vec<vk::Queue>>,
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("handle", &self.logical.handle())
            .field("physical", &self.physical)
            .field("queues", &self.queues)
            .finish()
    }
}

impl Device {
    pub fn graphics(&self) -> &'static Graphics {
        // SAFETY: `Device` can only be created from a candidate
        // enumerated by the `Graphics` instance.
        unsafe { Graphics::get_unchecked() }
    }

    pub fn logical(&self) -> &vulkanalia::Device {
        &self.logical
    }

    pub fn physical(&self) -> vk::PhysicalDevice {
        self.physical
    }

    pub fn properties(&self) -> &DeviceProperties {
        &self.properties
    }

    pub fn limits(&self) -> &vk::PhysicalDeviceLimits {
        &self.properties.v1_0.limits
    }

    /// Returns the enabled extensions and features.
    pub fn capabilities(&self) -> &NegotiatedCapabilities {
        &self.capabilities
    }

    pub fn is_feature_enabled(&self, feature: Feature) -> bool {
        self.capabilities.enabled_features.contains(feature)
    }

    pub fn is_extension_enabled(&self, name: &str) -> bool {
        self.capabilities.enabled_extensions.contains(name)
    }

    /// Returns a queue created with the device.
    pub fn queue(&self, family: u32, index: u32) -> Result<Queue<'_>, QueueError> {
        let queues = self
            .queues
            .get(&family)
            .ok_or(QueueError::UnknownFamily(family))?;
        let handle = queues
            .get(index as usize)
            .copied()
            .ok_or(QueueError::UnknownQueue { family, index })?;
        Ok(Queue::new(handle, QueueId { family, index }))
    }

    /// Returns the number of queues created for the family.
    pub fn queue_count(&self, family: u32) -> u32 {
        self.queues
            .get(&family)
            .map(|queues| queues.len() as u32)
            .unwrap_or_default()
    }

    /// Iterates `(family, queue count)` pairs of all created queues.
    pub fn queue_families(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.queues
            .iter()
            .map(|(family, queues)| (*family, queues.len() as u32))
    }

    /// Blocks until all device queues are idle.
    pub fn wait_idle(&self) -> Result<(), WaitIdleError> {
        unsafe { self.logical.device_wait_idle() }.map_err(|e| match e {
            vk::ErrorCode::OUT_OF_HOST_MEMORY => crate::out_of_host_memory(),
            vk::ErrorCode::OUT_OF_DEVICE_MEMORY => WaitIdleError::from(OutOfDeviceMemory),
            vk::ErrorCode::DEVICE_LOST => WaitIdleError::from(DeviceLost),
            _ => crate::unexpected_vulkan_error(e),
        })
    }

    /// Same as [`wait_idle`], but only logs the error.
    ///
    /// [`wait_idle`]: Device::wait_idle
    pub fn wait_idle_noexcept(&self, context: &str) {
        if let Err(e) = self.wait_idle() {
            tracing::error!(context, "failed to wait for device idle: {e}");
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        self.wait_idle_noexcept("device teardown");

        unsafe { self.logical.destroy_device(None) };
        tracing::debug!(physical = ?self.physical, "destroyed device");
    }
}

/// Negotiates capabilities for the requirement and creates a device with
/// the specified number of queues per family.
pub fn create_device(
    candidate: &HardwareCandidate,
    queue_families: &[(u32, u32)],
    requirement: &CapabilityRequirement,
) -> Result<Device, CreateDeviceError> {
    let capabilities = candidate.negotiate(requirement, Pass::Relaxed)?;
    create_device_with(candidate, capabilities, queue_families)
}

/// Creates a device with already negotiated capabilities.
pub fn create_device_with(
    candidate: &HardwareCandidate,
    capabilities: NegotiatedCapabilities,
    queue_families: &[(u32, u32)],
) -> Result<Device, CreateDeviceError> {
    validate_queue_families(candidate, queue_families)?;

    let priorities = queue_families
        .iter()
        .map(|&(_, count)| vec![1.0f32; count as usize])
        .collect::<Vec<_>>();
    let queue_create_infos = queue_families
        .iter()
        .zip(&priorities)
        .map(|(&(family, _), priorities)| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(family)
                .queue_priorities(priorities)
        })
        .collect::<Vec<_>>();

    let extension_names = capabilities
        .enabled_extensions
        .iter()
        .map(|name| vk::ExtensionName::from_bytes(name.as_bytes()))
        .collect::<Vec<_>>();
    let extension_ptrs = extension_names
        .iter()
        .map(|name| name.as_ptr())
        .collect::<Vec<_>>();

    let chain = FeatureChain::new(&capabilities.enabled_features, &capabilities.enabled_extensions);

    let mut device_create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extension_ptrs)
        .enabled_features(chain.core());
    device_create_info.next = chain.head();

    // SAFETY: `HardwareCandidate` can only be snapshotted from `Graphics`.
    let graphics = unsafe { Graphics::get_unchecked() };
    let logical = unsafe {
        graphics
            .instance()
            .create_device(candidate.handle(), &device_create_info, None)
            .map_err(|e| match e {
                vk::ErrorCode::OUT_OF_HOST_MEMORY => crate::out_of_host_memory(),
                vk::ErrorCode::OUT_OF_DEVICE_MEMORY => CreateDeviceError::from(OutOfDeviceMemory),
                vk::ErrorCode::INITIALIZATION_FAILED => CreateDeviceError::InitializationFailed,
                vk::ErrorCode::EXTENSION_NOT_PRESENT => CreateDeviceError::ExtensionNotPresent,
                vk::ErrorCode::FEATURE_NOT_PRESENT => CreateDeviceError::FeatureNotPresent,
                vk::ErrorCode::DEVICE_LOST => CreateDeviceError::from(DeviceLost),
                _ => crate::unexpected_vulkan_error(e),
            })?
    };
    drop(chain);

    let mut device = Device {
        logical,
        physical: candidate.handle(),
        properties: Box::new(candidate.properties().clone()),
        capabilities,
        queues: BTreeMap::new(),
    };

    for &(family, count) in queue_families {
        let mut queues = Vec::with_capacity(count as usize);
        for index in 0..count {
            let handle = unsafe { device.logical.get_device_queue(family, index) };
            if handle.is_null() {
                // The device is destroyed on drop
                return Err(CreateDeviceError::NullQueueHandle { family, index });
            }
            queues.push(handle);
        }
        device.queues.insert(family, queues);
    }

    tracing::info!(
        name = %candidate.name(),
        extensions = device.capabilities.enabled_extensions.len(),
        features = device.capabilities.enabled_features.len(),
        "created device",
    );
    tracing::debug!(?device, "created device");

    Ok(device)
}

fn validate_queue_families(
    candidate: &HardwareCandidate,
    queue_families: &[(u32, u32)],
) -> Result<(), CreateDeviceError> {
    if queue_families.is_empty() {
        return Err(CreateDeviceError::NoQueues);
    }

    let mut unique = FastHashSet::default();
    for &(family, count) in queue_families {
        if !unique.insert(family) {
            return Err(CreateDeviceError::NonUniqueFamilyIndices(family));
        }

        let Some(info) = candidate.queue_families().get(family as usize) else {
            return Err(CreateDeviceError::UnknownFamilyIndex(family));
        };
        if count == 0 {
            return Err(CreateDeviceError::EmptyQueueRequest(family));
        }
        if count > info.queue_count {
            return Err(CreateDeviceError::TooManyQueues {
                family,
                requested: count,
                available: info.queue_count,
            });
        }
    }

    Ok(())
}

/// Error that can occur when creating a device.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CreateDeviceError {
    #[error(transparent)]
    Unsupported(#[from] Unsupported),
    #[error("no queues requested")]
    NoQueues,
    #[error("non unique device queue family index {0}")]
    NonUniqueFamilyIndices(u32),
    #[error("queue family {0} does not exist")]
    UnknownFamilyIndex(u32),
    #[error("no queues requested from family {0}")]
    EmptyQueueRequest(u32),
    #[error("{requested} queues requested from family {family}, but only {available} exist")]
    TooManyQueues {
        family: u32,
        requested: u32,
        available: u32,
    },
    #[error("driver returned a null handle for queue {index} of family {family}")]
    NullQueueHandle { family: u32, index: u32 },
    #[error("requested device extension is not present")]
    ExtensionNotPresent,
    #[error("requested device feature is not present")]
    FeatureNotPresent,
    #[error("device initialization failed")]
    InitializationFailed,
    #[error(transparent)]
    OutOfDeviceMemory(#[from] OutOfDeviceMemory),
    #[error(transparent)]
    DeviceLost(#[from] DeviceLost),
}

/// Error that can occur when waiting for a device to become idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum WaitIdleError {
    #[error(transparent)]
    OutOfDeviceMemory(#[from] OutOfDeviceMemory),
    #[error(transparent)]
    DeviceLost(#[from] DeviceLost),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::QueueFlags;

    fn candidate() -> HardwareCandidate {
        HardwareCandidate::fake("gpu", vk::PhysicalDeviceType::DISCRETE_GPU).with_queue_families(&[
            (QueueFlags::GRAPHICS | QueueFlags::COMPUTE, 2),
            (QueueFlags::TRANSFER, 1),
        ])
    }

    #[test]
    fn queue_family_requests_are_validated() {
        let candidate = candidate();

        assert_eq!(validate_queue_families(&candidate, &[(0, 2), (1, 1)]), Ok(()));
        assert_eq!(
            validate_queue_families(&candidate, &[]),
            Err(CreateDeviceError::NoQueues)
        );
        assert_eq!(
            validate_queue_families(&candidate, &[(0, 1), (0, 1)]),
            Err(CreateDeviceError::NonUniqueFamilyIndices(0))
        );
        assert_eq!(
            validate_queue_families(&candidate, &[(2, 1)]),
            Err(CreateDeviceError::UnknownFamilyIndex(2))
        );
        assert_eq!(
            validate_queue_families(&candidate, &[(1, 0)]),
            Err(CreateDeviceError::EmptyQueueRequest(1))
        );
        assert_eq!(
            validate_queue_families(&candidate, &[(1, 2)]),
            Err(CreateDeviceError::TooManyQueues {
                family: 1,
                requested: 2,
                available: 1,
            })
        );
    }

    #[test]
    fn unsupported_requirement_fails_before_creation() {
        let requirement = CapabilityRequirement::new().require_feature(Feature::ShaderFloat64);
        assert_eq!(
            create_device(&candidate(), &[(0, 1)], &requirement).err(),
            Some(CreateDeviceError::Unsupported(Unsupported::Feature(
                Feature::ShaderFloat64
            )))
        );
    }
}
