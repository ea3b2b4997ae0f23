use vulkanalia::vk;

use crate::device::{CreateDeviceError, Device};
use crate::graphics::{EnumerateError, Graphics};
use crate::physical::{
    CapabilityRequirement, HardwareCandidate, PhysicalDeviceSelector, SearchPolicy, SelectError,
    SelectedPhysicalDevice, SuitabilityLimits, KHR_SWAPCHAIN,
};
use crate::queue::{distribute, plan_queues, Queue, QueueDistributionPlan, QueuePlanError, QueueRole};

/// Everything needed to select a device and create it.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    pub policy: SearchPolicy,
    pub requirement: CapabilityRequirement,
    pub roles: Vec<QueueRole>,
    pub limits: SuitabilityLimits,
    pub surface: Option<vk::SurfaceKHR>,
}

impl BootstrapConfig {
    /// A device which renders and presents to `surface`.
    pub fn graphics(surface: vk::SurfaceKHR) -> Self {
        Self {
            policy: SearchPolicy::Best,
            requirement: CapabilityRequirement::new().require_extension(KHR_SWAPCHAIN),
            roles: vec![
                QueueRole::graphics_compute(1),
                QueueRole::compute(1),
                QueueRole::transfer(1),
                QueueRole::presentation(1),
            ],
            limits: SuitabilityLimits::default(),
            surface: Some(surface),
        }
    }

    /// A device without presentation support.
    pub fn headless_compute() -> Self {
        Self {
            policy: SearchPolicy::Best,
            requirement: CapabilityRequirement::new(),
            roles: vec![
                QueueRole::graphics_compute(1),
                QueueRole::compute(1),
                QueueRole::transfer(1),
            ],
            limits: SuitabilityLimits::default(),
            surface: None,
        }
    }

    pub fn with_policy(mut self, policy: SearchPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Merges the requirement of another subsystem.
    pub fn with_requirement(mut self, requirement: &CapabilityRequirement) -> Self {
        self.requirement.merge_with(requirement);
        self
    }

    /// Adds a queue role, replacing an existing role with the same name.
    pub fn with_role(mut self, role: QueueRole) -> Self {
        match self.roles.iter_mut().find(|r| r.name == role.name) {
            Some(existing) => *existing = role,
            None => self.roles.push(role),
        }
        self
    }

    pub fn with_limits(mut self, limits: SuitabilityLimits) -> Self {
        self.limits = limits;
        self
    }
}

/// A created device with its queue layout.
pub struct Bootstrapped {
    pub device: Device,
    pub plan: QueueDistributionPlan,
}

impl Bootstrapped {
    /// Returns the `n`-th queue assigned to the role.
    pub fn role_queue(&self, role: &str, n: usize) -> Option<Queue<'_>> {
        let assignment = self.plan.assignment(role)?;
        let index = *assignment.indices.get(n)?;
        self.device.queue(assignment.family, index).ok()
    }
}

/// Enumerates physical devices and selects one for the requirement.
///
/// # Safety
///
/// The following must be true:
/// - `surface` must be created from the `graphics` instance
pub unsafe fn select_device(
    graphics: &Graphics,
    policy: SearchPolicy,
    requirement: &CapabilityRequirement,
    limits: SuitabilityLimits,
    surface: Option<vk::SurfaceKHR>,
) -> Result<SelectedPhysicalDevice, BootstrapError> {
    let candidates = graphics.collect_candidates(surface)?;
    let selected = PhysicalDeviceSelector::new(candidates)
        .with_requirement(requirement)
        .with_limits(limits)
        .select(policy)?;
    Ok(selected)
}

/// Resolves queue roles and distributes queues of the candidate.
pub fn plan_distribution(
    candidate: &HardwareCandidate,
    roles: &[QueueRole],
) -> Result<QueueDistributionPlan, QueuePlanError> {
    let requests = plan_queues(candidate, roles)?;
    distribute(candidate, &requests)
}

/// Selects a device, plans its queues and creates it.
///
/// Selection is final: if creating the selected device fails,
/// no other candidate is tried.
///
/// # Safety
///
/// The following must be true:
/// - `config.surface` must be created from the `graphics` instance
pub unsafe fn bootstrap(
    graphics: &Graphics,
    config: &BootstrapConfig,
) -> Result<Bootstrapped, BootstrapError> {
    let selected = select_device(
        graphics,
        config.policy,
        &config.requirement,
        config.limits,
        config.surface,
    )?;

    let plan = plan_distribution(&selected.candidate, &config.roles)?;
    for assignment in plan.assignments() {
        tracing::info!(
            role = %assignment.role,
            family = assignment.family,
            indices = ?assignment.indices,
            "assigned queues",
        );
    }

    let queue_families = plan
        .family_counts()
        .iter()
        .map(|(&family, &count)| (family, count))
        .collect::<Vec<_>>();
    let device = selected.create_logical_device(&queue_families)?;

    Ok(Bootstrapped { device, plan })
}

/// Error that can occur when bootstrapping a device.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Enumerate(#[from] EnumerateError),
    #[error(transparent)]
    Select(#[from] SelectError),
    #[error(transparent)]
    QueuePlan(#[from] QueuePlanError),
    #[error(transparent)]
    CreateDevice(#[from] CreateDeviceError),
}

#[cfg(test)]
mod tests {
    use vulkanalia::vk::Handle;

    use super::*;
    use crate::physical::Feature;
    use crate::queue::QueueFlags;

    #[test]
    fn presets() {
        let config = BootstrapConfig::graphics(vk::SurfaceKHR::null());
        assert!(config.requirement.required_extensions.contains(KHR_SWAPCHAIN));
        assert!(config.roles.iter().any(|r| r.name == "presentation"));

        let config = BootstrapConfig::headless_compute()
            .with_requirement(&CapabilityRequirement::new().require_feature(Feature::TimelineSemaphore))
            .with_requirement(&CapabilityRequirement::new().request_feature(Feature::ShaderInt64))
            .with_role(QueueRole::transfer(2));
        assert!(config.surface.is_none());
        assert!(config.requirement.required_features.contains(Feature::TimelineSemaphore));
        assert!(config.requirement.optional_features.contains(Feature::ShaderInt64));
        assert_eq!(config.roles.len(), 3);
        let transfer = config.roles.iter().find(|r| r.name == "transfer").unwrap();
        assert_eq!(transfer.count, 2);

        let config = config.with_role(QueueRole::new("upload", QueueFlags::TRANSFER));
        assert_eq!(config.roles.len(), 4);
        assert_eq!(config.roles.last().map(|r| r.name.as_ref()), Some("upload"));
    }

    #[test]
    fn select_then_distribute() {
        let candidates = vec![
            HardwareCandidate::fake("igpu", vk::PhysicalDeviceType::INTEGRATED_GPU)
                .with_extensions(&[KHR_SWAPCHAIN])
                .with_queue_families(&[(QueueFlags::GRAPHICS | QueueFlags::COMPUTE, 1)])
                .with_presentation(&[true], true),
            HardwareCandidate::fake("dgpu", vk::PhysicalDeviceType::DISCRETE_GPU)
                .with_extensions(&[KHR_SWAPCHAIN])
                .with_queue_families(&[
                    (QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER, 16),
                    (QueueFlags::COMPUTE | QueueFlags::TRANSFER, 2),
                    (QueueFlags::TRANSFER, 2),
                ])
                .with_presentation(&[true, false, false], true),
        ];

        let config = BootstrapConfig::graphics(vk::SurfaceKHR::null());
        let selected = PhysicalDeviceSelector::new(candidates)
            .with_requirement(&config.requirement)
            .select(config.policy)
            .unwrap();
        assert_eq!(selected.candidate.name(), "dgpu");

        let plan = plan_distribution(&selected.candidate, &config.roles).unwrap();
        assert_eq!(
            plan.family_counts().iter().map(|(&f, &c)| (f, c)).collect::<Vec<_>>(),
            [(0, 2), (1, 1), (2, 1)]
        );
        assert_eq!(plan.assignment("graphics_compute").unwrap().indices.as_slice(), [0]);
        assert_eq!(plan.assignment("presentation").unwrap().indices.as_slice(), [1]);

        // A single shared queue on the integrated GPU
        let selected = PhysicalDeviceSelector::new(vec![HardwareCandidate::fake(
            "igpu",
            vk::PhysicalDeviceType::INTEGRATED_GPU,
        )
        .with_queue_families(&[(QueueFlags::GRAPHICS | QueueFlags::COMPUTE, 1)])])
        .find_best()
        .unwrap();
        let plan = plan_distribution(
            &selected.candidate,
            &BootstrapConfig::headless_compute().roles,
        )
        .unwrap();
        assert_eq!(plan.family_counts().get(&0), Some(&1));
        assert_eq!(plan.queue_ids().len(), 1);
    }
}
