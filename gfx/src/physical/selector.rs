use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::features::Feature;
use super::negotiate::{CapabilityRequirement, NegotiatedCapabilities, Pass, Unsupported};
use super::HardwareCandidate;
use crate::device::{CreateDeviceError, Device};
use crate::queue::QueueFlags;

/// A policy used to pick one device among suitable ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchPolicy {
    /// Highest device type priority, first seen wins ties.
    Best,
    /// Uniformly random pick, deterministic for a given seed.
    Random { seed: u64 },
}

impl SearchPolicy {
    /// Random policy with a seed from the thread-local generator.
    pub fn random() -> Self {
        Self::Random {
            seed: rand::random(),
        }
    }
}

/// Minimal hardware limits a device must meet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuitabilityLimits {
    pub min_storage_buffer_range: u32,
}

impl Default for SuitabilityLimits {
    fn default() -> Self {
        Self {
            min_storage_buffer_range: 1_000_000_000,
        }
    }
}

/// A builder for selecting a physical device.
pub struct PhysicalDeviceSelector {
    candidates: Vec<HardwareCandidate>,
    requirement: CapabilityRequirement,
    limits: SuitabilityLimits,
}

impl PhysicalDeviceSelector {
    pub fn new(candidates: Vec<HardwareCandidate>) -> Self {
        Self {
            candidates,
            requirement: CapabilityRequirement::default(),
            limits: SuitabilityLimits::default(),
        }
    }

    pub fn candidates(&self) -> &[HardwareCandidate] {
        &self.candidates
    }

    /// Merges `requirement` into the current one.
    pub fn with_requirement(mut self, requirement: &CapabilityRequirement) -> Self {
        self.requirement.merge_with(requirement);
        self
    }

    pub fn with_required_feature(mut self, feature: Feature) -> Self {
        self.requirement.required_features.insert(feature);
        self
    }

    pub fn with_optional_feature(mut self, feature: Feature) -> Self {
        self.requirement.optional_features.insert(feature);
        self
    }

    pub fn with_required_extension(mut self, name: &str) -> Self {
        self.requirement.required_extensions.insert(name.to_owned());
        self
    }

    pub fn with_optional_extension(mut self, name: &str) -> Self {
        self.requirement.optional_extensions.insert(name.to_owned());
        self
    }

    pub fn with_limits(mut self, limits: SuitabilityLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Selects a device with the highest priority.
    pub fn find_best(self) -> Result<SelectedPhysicalDevice, SelectError> {
        self.select(SearchPolicy::Best)
    }

    /// Filters candidates and picks one of the suitable ones.
    ///
    /// Candidates are first checked with all optional capabilities treated
    /// as required. Only if none passes, the check is repeated with optional
    /// capabilities enabled on a best-effort basis.
    pub fn select(mut self, policy: SearchPolicy) -> Result<SelectedPhysicalDevice, SelectError> {
        if self.candidates.is_empty() {
            return Err(SelectError::NoCandidates);
        }

        for candidate in &self.candidates {
            tracing::info!(
                name = %candidate.name(),
                ty = ?candidate.device_type(),
                api_version = %candidate.api_version(),
                "found physical device",
            );
        }

        let mut rejections = Vec::new();
        for pass in [Pass::Strict, Pass::Relaxed] {
            rejections.clear();

            let mut suitable = Vec::new();
            for (index, candidate) in self.candidates.iter().enumerate() {
                match self.check(candidate, pass) {
                    Ok(capabilities) => suitable.push((index, capabilities)),
                    Err(reason) => {
                        tracing::debug!(
                            name = %candidate.name(),
                            ?pass,
                            "rejecting physical device: {reason}",
                        );
                        rejections.push(CandidateRejection {
                            device: candidate.name(),
                            reason,
                        });
                    }
                }
            }

            let Some(picked) = pick(&self.candidates, &suitable, policy) else {
                if pass == Pass::Strict {
                    tracing::warn!(
                        "no physical device supports all optional capabilities, \
                        retrying without them"
                    );
                }
                continue;
            };

            let (index, capabilities) = suitable.swap_remove(picked);
            let candidate = self.candidates.swap_remove(index);

            tracing::info!(
                name = %candidate.name(),
                ty = ?candidate.device_type(),
                ?pass,
                ?policy,
                "selected physical device",
            );

            return Ok(SelectedPhysicalDevice {
                candidate,
                capabilities,
                requirement: self.requirement,
                pass,
            });
        }

        Err(SelectError::NoSuitableDevice { rejections })
    }

    fn check(
        &self,
        candidate: &HardwareCandidate,
        pass: Pass,
    ) -> Result<NegotiatedCapabilities, Rejection> {
        let capabilities = candidate.negotiate(&self.requirement, pass)?;

        let available = candidate.limits().max_storage_buffer_range;
        let required = self.limits.min_storage_buffer_range;
        if available < required {
            return Err(Rejection::Limit {
                name: "max_storage_buffer_range",
                required: required as u64,
                available: available as u64,
            });
        }

        if candidate
            .find_family(QueueFlags::GRAPHICS | QueueFlags::COMPUTE, QueueFlags::empty())
            .is_none()
        {
            return Err(Rejection::NoGraphicsComputeFamily);
        }

        if let Some(presentation) = candidate.presentation() {
            if candidate.find_presentation_family().is_none() {
                return Err(Rejection::NoPresentationFamily);
            }
            if !presentation.surface_suitable {
                return Err(Rejection::UnsuitableSurface);
            }
        }

        Ok(capabilities)
    }
}

/// Returns an index into `suitable`.
fn pick(
    candidates: &[HardwareCandidate],
    suitable: &[(usize, NegotiatedCapabilities)],
    policy: SearchPolicy,
) -> Option<usize> {
    if suitable.is_empty() {
        return None;
    }

    match policy {
        SearchPolicy::Best => {
            let mut best: Option<(usize, u32)> = None;
            for (i, (index, _)) in suitable.iter().enumerate() {
                let priority = candidates[*index].device_type().priority();
                match best {
                    Some((_, best_priority)) if best_priority >= priority => continue,
                    _ => best = Some((i, priority)),
                }
            }
            best.map(|(i, _)| i)
        }
        SearchPolicy::Random { seed } => {
            let mut rng = StdRng::seed_from_u64(seed);
            Some(rng.random_range(0..suitable.len()))
        }
    }
}

/// A physical device with negotiated capabilities.
pub struct SelectedPhysicalDevice {
    pub candidate: HardwareCandidate,
    pub capabilities: NegotiatedCapabilities,
    pub requirement: CapabilityRequirement,
    pub pass: Pass,
}

impl SelectedPhysicalDevice {
    /// Creates a logical device with the specified queue count per family.
    ///
    /// Capabilities negotiated during selection are enabled as is.
    pub fn create_logical_device(
        &self,
        queue_families: &[(u32, u32)],
    ) -> Result<Device, CreateDeviceError> {
        crate::device::create_device_with(
            &self.candidate,
            self.capabilities.clone(),
            queue_families,
        )
    }
}

/// The reason a candidate was not considered suitable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error(transparent)]
    Unsupported(#[from] Unsupported),
    #[error("`{name}` is {available}, but at least {required} is required")]
    Limit {
        name: &'static str,
        required: u64,
        available: u64,
    },
    #[error("no queue family supports both graphics and compute")]
    NoGraphicsComputeFamily,
    #[error("no queue family can present to the surface")]
    NoPresentationFamily,
    #[error("surface reports no formats or present modes")]
    UnsuitableSurface,
}

/// A rejected candidate with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateRejection {
    pub device: String,
    pub reason: Rejection,
}

impl fmt::Display for CandidateRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.device, self.reason)
    }
}

/// Error that can occur when selecting a physical device.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SelectError {
    #[error("no physical device found")]
    NoCandidates,
    #[error("failed to find a suitable physical device ({})", list_rejections(.rejections))]
    NoSuitableDevice { rejections: Vec<CandidateRejection> },
}

fn list_rejections(rejections: &[CandidateRejection]) -> String {
    rejections
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use vulkanalia::vk;

    use super::*;
    use crate::physical::extensions::KHR_SWAPCHAIN;

    fn discrete(name: &str) -> HardwareCandidate {
        HardwareCandidate::fake(name, vk::PhysicalDeviceType::DISCRETE_GPU)
    }

    fn integrated(name: &str) -> HardwareCandidate {
        HardwareCandidate::fake(name, vk::PhysicalDeviceType::INTEGRATED_GPU)
    }

    #[test]
    fn missing_required_extension_loses_to_weaker_device() {
        let candidates = vec![
            discrete("d1").with_features(&[Feature::SamplerAnisotropy]),
            integrated("d2")
                .with_extensions(&[KHR_SWAPCHAIN])
                .with_features(&[Feature::SamplerAnisotropy]),
        ];

        let selected = PhysicalDeviceSelector::new(candidates)
            .with_required_extension(KHR_SWAPCHAIN)
            .with_required_feature(Feature::SamplerAnisotropy)
            .find_best()
            .unwrap();
        assert_eq!(selected.candidate.name(), "d2");
        assert!(selected
            .capabilities
            .enabled_extensions
            .contains(KHR_SWAPCHAIN));
    }

    #[test]
    fn unsupported_feature_is_named_in_error() {
        let candidates = vec![
            discrete("d1").with_features(&[Feature::SamplerAnisotropy]),
            integrated("d2"),
        ];

        let err = PhysicalDeviceSelector::new(candidates)
            .with_required_feature(Feature::ShaderFloat64)
            .find_best()
            .err()
            .unwrap();

        let SelectError::NoSuitableDevice { rejections } = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(rejections.len(), 2);
        for rejection in rejections {
            assert_eq!(
                rejection.reason,
                Rejection::Unsupported(Unsupported::Feature(Feature::ShaderFloat64))
            );
        }
        assert!(err.to_string().contains("Features::shader_float64"));
    }

    #[test]
    fn best_prefers_priority_then_first_seen() {
        let candidates = vec![
            HardwareCandidate::fake("cpu", vk::PhysicalDeviceType::CPU),
            integrated("i1"),
            discrete("d1"),
            discrete("d2"),
            integrated("i2"),
        ];

        let selected = PhysicalDeviceSelector::new(candidates)
            .with_limits(SuitabilityLimits {
                min_storage_buffer_range: 0,
            })
            .find_best()
            .unwrap();
        assert_eq!(selected.candidate.name(), "d1");
        assert_eq!(selected.pass, Pass::Strict);
    }

    #[test]
    fn falls_back_to_relaxed_pass() {
        let candidates = vec![
            discrete("d1"),
            integrated("d2").with_features(&[Feature::WideLines]),
        ];

        // Nobody supports everything, so optional features are dropped
        let selected = PhysicalDeviceSelector::new(candidates.clone())
            .with_optional_feature(Feature::WideLines)
            .with_optional_feature(Feature::LargePoints)
            .find_best()
            .unwrap();
        assert_eq!(selected.pass, Pass::Relaxed);
        assert_eq!(selected.candidate.name(), "d1");
        assert!(selected.capabilities.enabled_features.is_empty());

        // Strict pass prefers full support over device type
        let selected = PhysicalDeviceSelector::new(candidates)
            .with_optional_feature(Feature::WideLines)
            .find_best()
            .unwrap();
        assert_eq!(selected.pass, Pass::Strict);
        assert_eq!(selected.candidate.name(), "d2");
    }

    #[test]
    fn random_policy_is_seeded() {
        let candidates = || {
            vec![
                discrete("d1"),
                integrated("d2"),
                discrete("d3"),
                HardwareCandidate::fake("cpu", vk::PhysicalDeviceType::CPU),
            ]
        };

        let mut seen = std::collections::BTreeSet::new();
        for seed in 0..64 {
            let first = PhysicalDeviceSelector::new(candidates())
                .select(SearchPolicy::Random { seed })
                .unwrap();
            let second = PhysicalDeviceSelector::new(candidates())
                .select(SearchPolicy::Random { seed })
                .unwrap();
            assert_eq!(first.candidate.name(), second.candidate.name());
            seen.insert(first.candidate.name());
        }
        assert!(seen.len() > 1);
    }

    #[test]
    fn presentation_is_mandatory_with_surface() {
        let candidates = vec![
            discrete("d1").with_presentation(&[false], true),
            integrated("d2").with_presentation(&[true], false),
        ];

        let err = PhysicalDeviceSelector::new(candidates)
            .with_optional_feature(Feature::WideLines)
            .find_best()
            .err()
            .unwrap();
        let SelectError::NoSuitableDevice { rejections } = err else {
            panic!("unexpected error");
        };
        assert_eq!(rejections[0].reason, Rejection::NoPresentationFamily);
        assert_eq!(rejections[1].reason, Rejection::UnsuitableSurface);
    }

    #[test]
    fn limits_and_queue_families() {
        let candidates = vec![
            discrete("small").with_storage_buffer_range(1 << 20),
            discrete("compute-only")
                .with_queue_families(&[(QueueFlags::COMPUTE | QueueFlags::TRANSFER, 4)]),
        ];

        let err = PhysicalDeviceSelector::new(candidates).find_best().err().unwrap();
        let SelectError::NoSuitableDevice { rejections } = err else {
            panic!("unexpected error");
        };
        assert_eq!(
            rejections[0].reason,
            Rejection::Limit {
                name: "max_storage_buffer_range",
                required: 1_000_000_000,
                available: 1 << 20,
            }
        );
        assert_eq!(rejections[1].reason, Rejection::NoGraphicsComputeFamily);
    }

    #[test]
    fn no_candidates() {
        assert!(matches!(
            PhysicalDeviceSelector::new(Vec::new()).find_best(),
            Err(SelectError::NoCandidates)
        ));
    }
}
