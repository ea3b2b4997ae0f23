pub use self::bootstrap::{
    bootstrap, plan_distribution, select_device, BootstrapConfig, BootstrapError, Bootstrapped,
};
pub use self::device::{create_device, create_device_with, CreateDeviceError, Device, WaitIdleError};
pub use self::graphics::{EnumerateError, Graphics, InstanceConfig};
pub use self::physical::{
    CandidateRejection, CapabilityRequirement, DeviceProperties, DeviceType, ExtensionSet, Feature,
    FeatureGroup, FeatureSet, HardwareCandidate, NegotiatedCapabilities, Pass,
    PhysicalDeviceSelector, PresentationSupport, Rejection, SearchPolicy, SelectError,
    SelectedPhysicalDevice, SnapshotError, SuitabilityLimits, UnknownFeature, Unsupported,
    MIN_API_VERSION,
};
pub use self::queue::{
    FamilySearch, Queue, QueueAssignment, QueueDistributionPlan, QueueError, QueueFamilyInfo,
    QueueFlags, QueueId, QueuePlanError, QueueRequest, QueueRole,
};
pub use self::types::{ApiVersion, DeviceLost, OutOfDeviceMemory, SurfaceLost};

pub mod physical;
pub mod queue;

mod bootstrap;
mod device;
mod graphics;
mod types;
mod util;

#[cold]
#[track_caller]
pub(crate) fn out_of_host_memory() -> ! {
    std::alloc::handle_alloc_error(std::alloc::Layout::new::<()>())
}

#[cold]
#[track_caller]
pub(crate) fn unexpected_vulkan_error(e: vulkanalia::vk::ErrorCode) -> ! {
    panic!("unexpected Vulkan error: {e:?}")
}
