use std::collections::BTreeSet;

/// A sorted set of device extension names.
///
/// Names are compared exactly as the driver reports them (case-sensitive).
pub type ExtensionSet = BTreeSet<String>;

pub const KHR_SWAPCHAIN: &str = "VK_KHR_swapchain";
pub const KHR_DEFERRED_HOST_OPERATIONS: &str = "VK_KHR_deferred_host_operations";
pub const KHR_ACCELERATION_STRUCTURE: &str = "VK_KHR_acceleration_structure";
pub const KHR_RAY_QUERY: &str = "VK_KHR_ray_query";
pub const KHR_RAY_TRACING_PIPELINE: &str = "VK_KHR_ray_tracing_pipeline";
