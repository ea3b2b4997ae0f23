use std::fmt;

use vulkanalia::vk;

/// A packed Vulkan API version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ApiVersion(pub u32);

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}",
            vk::version_major(self.0),
            vk::version_minor(self.0),
            vk::version_patch(self.0)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("out of device memory")]
pub struct OutOfDeviceMemory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("device lost")]
pub struct DeviceLost;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("surface lost")]
pub struct SurfaceLost;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_version_display() {
        assert_eq!(ApiVersion(vk::make_version(1, 3, 250)).to_string(), "1.3.250");
    }
}
