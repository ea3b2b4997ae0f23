use super::extensions::ExtensionSet;
use super::features::{Feature, FeatureSet};

/// Extensions and features requested by a subsystem.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CapabilityRequirement {
    pub required_extensions: ExtensionSet,
    pub optional_extensions: ExtensionSet,
    pub required_features: FeatureSet,
    pub optional_features: FeatureSet,
}

impl CapabilityRequirement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_extension(mut self, name: impl Into<String>) -> Self {
        self.required_extensions.insert(name.into());
        self
    }

    pub fn request_extension(mut self, name: impl Into<String>) -> Self {
        self.optional_extensions.insert(name.into());
        self
    }

    pub fn require_feature(mut self, feature: Feature) -> Self {
        self.required_features.insert(feature);
        self
    }

    pub fn require_features(mut self, features: &[Feature]) -> Self {
        self.required_features.extend(features.iter().copied());
        self
    }

    pub fn request_feature(mut self, feature: Feature) -> Self {
        self.optional_features.insert(feature);
        self
    }

    pub fn request_features(mut self, features: &[Feature]) -> Self {
        self.optional_features.extend(features.iter().copied());
        self
    }

    /// Combines two requirements.
    ///
    /// Extension sets are unioned and feature bits are OR-ed, so the
    /// operation is commutative and idempotent.
    pub fn merge(&self, other: &Self) -> Self {
        let mut res = self.clone();
        res.merge_with(other);
        res
    }

    pub fn merge_with(&mut self, other: &Self) {
        self.required_extensions
            .extend(other.required_extensions.iter().cloned());
        self.optional_extensions
            .extend(other.optional_extensions.iter().cloned());
        self.required_features.union_with(&other.required_features);
        self.optional_features.union_with(&other.optional_features);
    }

    /// Returns a requirement where everything optional is required.
    pub fn strict(&self) -> Self {
        let mut res = self.clone();
        res.required_extensions
            .extend(std::mem::take(&mut res.optional_extensions));
        res.required_features.union_with(&res.optional_features);
        res.optional_features = FeatureSet::new();
        res
    }
}

/// How optional capabilities are treated during negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Optional capabilities must be supported as well.
    Strict,
    /// Optional capabilities are enabled only when supported.
    Relaxed,
}

/// A capability which prevents negotiation from succeeding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Unsupported {
    #[error("feature `{0}` is not supported")]
    Feature(Feature),
    #[error("extension `{0}` is not supported")]
    Extension(String),
    #[error("extension `{extension}` required by feature `{feature}` is not supported")]
    FeatureExtension { feature: Feature, extension: String },
}

/// The set of capabilities to enable on a device.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NegotiatedCapabilities {
    pub enabled_extensions: ExtensionSet,
    pub enabled_features: FeatureSet,
}

impl NegotiatedCapabilities {
    /// Checks that the negotiated set still satisfies `requirement`.
    pub fn check(&self, requirement: &CapabilityRequirement) -> Result<(), Unsupported> {
        check_features(&requirement.required_features, &self.enabled_features)?;
        check_extensions(&requirement.required_extensions, &self.enabled_extensions)?;
        for feature in self.enabled_features.iter() {
            for extension in feature.implied_extensions() {
                if !self.enabled_extensions.contains(*extension) {
                    return Err(Unsupported::FeatureExtension {
                        feature,
                        extension: (*extension).to_owned(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Returns the first feature of `required` missing from `supported`.
pub fn check_features(required: &FeatureSet, supported: &FeatureSet) -> Result<(), Unsupported> {
    match required.difference(supported).iter().next() {
        Some(feature) => Err(Unsupported::Feature(feature)),
        None => Ok(()),
    }
}

/// Returns the first extension of `required` missing from `supported`.
pub fn check_extensions(
    required: &ExtensionSet,
    supported: &ExtensionSet,
) -> Result<(), Unsupported> {
    match required.difference(supported).next() {
        Some(extension) => Err(Unsupported::Extension(extension.clone())),
        None => Ok(()),
    }
}

/// Reduces a requirement and a candidate's supported capabilities to the
/// set of capabilities to enable.
///
/// Every required bit is enabled first, then each supported optional bit.
/// Features pull in the extensions they are defined by.
pub fn negotiate(
    requirement: &CapabilityRequirement,
    supported_features: &FeatureSet,
    supported_extensions: &ExtensionSet,
    pass: Pass,
) -> Result<NegotiatedCapabilities, Unsupported> {
    let strict_requirement;
    let requirement = match pass {
        Pass::Strict => {
            strict_requirement = requirement.strict();
            &strict_requirement
        }
        Pass::Relaxed => requirement,
    };

    // Required features
    check_features(&requirement.required_features, supported_features)?;
    let mut enabled_features = requirement.required_features;

    // Required extensions
    check_extensions(&requirement.required_extensions, supported_extensions)?;
    let mut enabled_extensions = requirement.required_extensions.clone();

    // Extensions implied by required features
    for feature in enabled_features.iter() {
        for extension in feature.implied_extensions() {
            if !supported_extensions.contains(*extension) {
                return Err(Unsupported::FeatureExtension {
                    feature,
                    extension: (*extension).to_owned(),
                });
            }
            enabled_extensions.insert((*extension).to_owned());
        }
    }

    // Optional features
    for feature in requirement.optional_features.iter() {
        let implied = feature.implied_extensions();
        if supported_features.contains(feature)
            && implied.iter().all(|ext| supported_extensions.contains(*ext))
        {
            enabled_features.insert(feature);
            enabled_extensions.extend(implied.iter().map(|ext| (*ext).to_owned()));
        }
    }

    // Optional extensions
    for extension in &requirement.optional_extensions {
        if supported_extensions.contains(extension) {
            enabled_extensions.insert(extension.clone());
        }
    }

    Ok(NegotiatedCapabilities {
        enabled_extensions,
        enabled_features,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physical::extensions::*;

    fn extensions(names: &[&str]) -> ExtensionSet {
        names.iter().map(|name| (*name).to_owned()).collect()
    }

    #[test]
    fn merge_is_commutative_and_idempotent() {
        let a = CapabilityRequirement::new()
            .require_extension(KHR_SWAPCHAIN)
            .require_feature(Feature::SamplerAnisotropy)
            .request_feature(Feature::RayQuery);
        let b = CapabilityRequirement::new()
            .request_extension("VK_EXT_memory_budget")
            .require_feature(Feature::TimelineSemaphore)
            .request_feature(Feature::SamplerAnisotropy);

        assert_eq!(a.merge(&b), b.merge(&a));
        assert_eq!(a.merge(&a), a);
        assert_eq!(a.merge(&b).merge(&b), a.merge(&b));

        let merged = a.merge(&b);
        assert!(merged.required_extensions.contains(KHR_SWAPCHAIN));
        assert!(merged.optional_extensions.contains("VK_EXT_memory_budget"));
        assert!(merged.required_features.contains(Feature::TimelineSemaphore));
        assert!(merged.optional_features.contains(Feature::RayQuery));
    }

    #[test]
    fn required_subset_always_negotiates() {
        let supported = FeatureSet::from([
            Feature::GeometryShader,
            Feature::BufferDeviceAddress,
            Feature::DynamicRendering,
        ]);
        let supported_extensions = extensions(&[KHR_SWAPCHAIN]);

        let requirement = CapabilityRequirement::new()
            .require_extension(KHR_SWAPCHAIN)
            .require_features(&[Feature::GeometryShader, Feature::DynamicRendering])
            .request_feature(Feature::BufferDeviceAddress)
            .request_feature(Feature::WideLines);

        let negotiated =
            negotiate(&requirement, &supported, &supported_extensions, Pass::Relaxed).unwrap();
        assert!(requirement
            .required_features
            .is_subset(&negotiated.enabled_features));
        assert!(negotiated
            .enabled_features
            .contains(Feature::BufferDeviceAddress));
        assert!(!negotiated.enabled_features.contains(Feature::WideLines));
        assert!(negotiated.enabled_features.is_subset(&supported));
        assert_eq!(negotiated.enabled_extensions, supported_extensions);

        // Negotiated capabilities always satisfy their requirement
        assert_eq!(negotiated.check(&requirement), Ok(()));

        // Deterministic
        let again =
            negotiate(&requirement, &supported, &supported_extensions, Pass::Relaxed).unwrap();
        assert_eq!(negotiated, again);
    }

    #[test]
    fn strict_pass_requires_optional() {
        let supported = FeatureSet::from([Feature::GeometryShader]);
        let requirement = CapabilityRequirement::new()
            .require_feature(Feature::GeometryShader)
            .request_feature(Feature::WideLines);

        assert_eq!(
            negotiate(&requirement, &supported, &ExtensionSet::new(), Pass::Strict),
            Err(Unsupported::Feature(Feature::WideLines))
        );

        let requirement = CapabilityRequirement::new().request_extension(KHR_SWAPCHAIN);
        assert_eq!(
            negotiate(&requirement, &supported, &ExtensionSet::new(), Pass::Strict),
            Err(Unsupported::Extension(KHR_SWAPCHAIN.to_owned()))
        );
        assert!(negotiate(&requirement, &supported, &ExtensionSet::new(), Pass::Relaxed).is_ok());
    }

    #[test]
    fn missing_required_feature_is_named() {
        let requirement = CapabilityRequirement::new()
            .require_features(&[Feature::SamplerAnisotropy, Feature::ShaderInt64]);
        let supported = FeatureSet::from([Feature::SamplerAnisotropy]);

        let err = negotiate(&requirement, &supported, &ExtensionSet::new(), Pass::Relaxed)
            .unwrap_err();
        assert_eq!(err, Unsupported::Feature(Feature::ShaderInt64));
        assert!(err.to_string().contains("Features::shader_int64"));
    }

    #[test]
    fn features_pull_in_their_extensions() {
        let supported = FeatureSet::from([
            Feature::AccelerationStructure,
            Feature::RayTracingPipeline,
            Feature::RayQuery,
        ]);
        let all = extensions(&[
            KHR_DEFERRED_HOST_OPERATIONS,
            KHR_ACCELERATION_STRUCTURE,
            KHR_RAY_TRACING_PIPELINE,
        ]);

        let requirement = CapabilityRequirement::new()
            .require_feature(Feature::RayTracingPipeline)
            .request_feature(Feature::RayQuery);
        let negotiated = negotiate(&requirement, &supported, &all, Pass::Relaxed).unwrap();
        assert_eq!(negotiated.enabled_extensions, all);

        // Ray query was requested, but its extension is missing
        assert!(!negotiated.enabled_features.contains(Feature::RayQuery));
        assert_eq!(negotiated.check(&requirement), Ok(()));

        let partial = extensions(&[KHR_ACCELERATION_STRUCTURE, KHR_RAY_TRACING_PIPELINE]);
        assert_eq!(
            negotiate(&requirement, &supported, &partial, Pass::Relaxed),
            Err(Unsupported::FeatureExtension {
                feature: Feature::RayTracingPipeline,
                extension: KHR_DEFERRED_HOST_OPERATIONS.to_owned(),
            })
        );
    }

    #[test]
    fn supported_optional_feature_enables_its_extensions() {
        let supported = FeatureSet::from([Feature::RayQuery]);
        let advertised = extensions(&[
            KHR_DEFERRED_HOST_OPERATIONS,
            KHR_ACCELERATION_STRUCTURE,
            KHR_RAY_QUERY,
            "VK_KHR_spirv_1_4",
        ]);

        let requirement = CapabilityRequirement::new().request_feature(Feature::RayQuery);
        let negotiated = negotiate(&requirement, &supported, &advertised, Pass::Relaxed).unwrap();

        assert!(negotiated.enabled_features.contains(Feature::RayQuery));
        assert_eq!(
            negotiated.enabled_extensions,
            extensions(&[
                KHR_DEFERRED_HOST_OPERATIONS,
                KHR_ACCELERATION_STRUCTURE,
                KHR_RAY_QUERY,
            ])
        );
        // Advertised, but neither requested nor implied
        assert!(!negotiated.enabled_extensions.contains("VK_KHR_spirv_1_4"));
        assert_eq!(negotiated.check(&requirement), Ok(()));

        // Same outcome in the strict pass
        let strict = negotiate(&requirement, &supported, &advertised, Pass::Strict).unwrap();
        assert_eq!(strict, negotiated);
    }

    #[test]
    fn optional_extension_support_is_reflected() {
        let requirement = CapabilityRequirement::new()
            .require_extension(KHR_SWAPCHAIN)
            .request_extension("VK_EXT_memory_budget");
        let features = FeatureSet::new();

        let with = negotiate(
            &requirement,
            &features,
            &extensions(&[KHR_SWAPCHAIN, "VK_EXT_memory_budget"]),
            Pass::Relaxed,
        )
        .unwrap();
        let without = negotiate(
            &requirement,
            &features,
            &extensions(&[KHR_SWAPCHAIN]),
            Pass::Relaxed,
        )
        .unwrap();

        let diff = with
            .enabled_extensions
            .symmetric_difference(&without.enabled_extensions)
            .collect::<Vec<_>>();
        assert_eq!(diff, ["VK_EXT_memory_budget"]);
        assert_eq!(with.enabled_features, without.enabled_features);
    }
}
