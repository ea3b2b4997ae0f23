use std::borrow::Cow;
use std::collections::HashSet;
use std::ffi::{c_char, c_void, CStr, CString};
use std::sync::Mutex;

use anyhow::Result;
use once_cell::sync::OnceCell;
use vulkanalia::loader::{LibloadingLoader, LIBRARY};
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::ExtDebugUtilsExtensionInstanceCommands as _;
use vulkanalia::Instance;

use crate::physical::{HardwareCandidate, SnapshotError, MIN_API_VERSION};
use crate::types::{ApiVersion, OutOfDeviceMemory};

/// Graphics instance configuration.
#[derive(Debug, Clone)]
pub struct InstanceConfig {
    pub app_name: Cow<'static, str>,
    pub app_version: (u32, u32, u32),
    pub validation_layer_enabled: bool,
    /// Enables surface extensions. Not needed for headless devices.
    pub presentation_enabled: bool,
}

/// Graphics instance.
pub struct Graphics {
    instance: Instance,
    api_version: u32,
    config: InstanceConfig,
    debug_utils_messenger: vk::DebugUtilsMessengerEXT,
    _entry: Entry,
}

impl Graphics {
    /// Sets the initial [`InstanceConfig`] to be used when initializing.
    pub fn set_init_config(config: InstanceConfig) {
        if GRAPHICS.get().is_some() {
            tracing::warn!("updating instance config after graphics initialization has no effect");
        }
        *INIT_CONFIG.lock().unwrap() = config;
    }

    /// Returns an initialized Vulkan instance wrapper or
    /// creates it using the current [`InstanceConfig`].
    ///
    /// See [`set_init_config`].
    ///
    /// [`set_init_config`]: [`Graphics::set_init_config`]
    pub fn get_or_init() -> Result<&'static Self> {
        GRAPHICS.get_or_try_init(|| unsafe { Self::new() })
    }

    /// Returns an initialized Vulkan instance wrapper.
    ///
    /// # Safety
    ///
    /// The following must be true:
    /// - [`Graphics`] must have been previously initialized
    pub unsafe fn get_unchecked() -> &'static Self {
        GRAPHICS.get_unchecked()
    }

    unsafe fn new() -> Result<Self> {
        let config = INIT_CONFIG.lock().unwrap().clone();

        let loader = LibloadingLoader::new(LIBRARY)?;
        let entry = Entry::new(loader).map_err(anyhow::Error::msg)?;

        let api_version: u32 = entry.version()?.into();
        anyhow::ensure!(
            api_version >= MIN_API_VERSION,
            "Vulkan {} is not supported, at least {} is required",
            ApiVersion(api_version),
            ApiVersion(MIN_API_VERSION)
        );

        let app_name = CString::new(config.app_name.as_ref())?;
        let (major, minor, patch) = config.app_version;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(app_name.as_bytes_with_nul())
            .application_version(vk::make_version(major, minor, patch))
            .engine_name(b"gfx\0")
            .engine_version(vk::make_version(0, 1, 0))
            .api_version(api_version);

        let enabled = InstanceLayers::select(&entry, &config)?;
        let layers = enabled.layer_ptrs();
        let extensions = enabled.extension_ptrs();

        let mut instance_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions);

        // Also capture messages from instance creation itself
        let mut debug_info = make_debug_callback_info();
        if enabled.debug_utils {
            instance_info = instance_info.push_next(&mut debug_info);
        }

        let instance = entry.create_instance(&instance_info, None)?;

        let debug_utils_messenger = if enabled.debug_utils {
            instance.create_debug_utils_messenger_ext(&make_debug_callback_info(), None)?
        } else {
            vk::DebugUtilsMessengerEXT::null()
        };

        tracing::debug!(
            api_version = %ApiVersion(api_version),
            validation_enabled = enabled.debug_utils,
            presentation_enabled = config.presentation_enabled,
            "created Vulkan instance",
        );

        Ok(Self {
            instance,
            api_version,
            config,
            debug_utils_messenger,
            _entry: entry,
        })
    }

    /// Returns the [`InstanceConfig`] used to initialize the instance.
    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    /// Returns handles of all physical devices available on the system.
    pub fn enumerate_candidates(&self) -> Result<Vec<vk::PhysicalDevice>, EnumerateError> {
        unsafe { self.instance.enumerate_physical_devices() }.map_err(|e| match e {
            vk::ErrorCode::OUT_OF_HOST_MEMORY => crate::out_of_host_memory(),
            vk::ErrorCode::OUT_OF_DEVICE_MEMORY => EnumerateError::from(OutOfDeviceMemory),
            vk::ErrorCode::INITIALIZATION_FAILED => EnumerateError::InitializationFailed,
            _ => crate::unexpected_vulkan_error(e),
        })
    }

    /// Collects capabilities of all physical devices which support
    /// the minimal API version.
    ///
    /// Presentation support is queried for `surface` if it is specified.
    ///
    /// # Safety
    ///
    /// The following must be true:
    /// - `surface` must be created from this instance
    pub unsafe fn collect_candidates(
        &self,
        surface: Option<vk::SurfaceKHR>,
    ) -> Result<Vec<HardwareCandidate>, EnumerateError> {
        let handles = self.enumerate_candidates()?;

        let snapshots = handles.into_iter().map(|handle| {
            let name = self
                .instance
                .get_physical_device_properties(handle)
                .device_name
                .to_string();
            (name, HardwareCandidate::snapshot(&self.instance, handle, surface))
        });
        filter_candidates(snapshots)
    }

    /// Returns the underlying Vulkan instance.
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Returns the Vulkan API version.
    pub fn api_version(&self) -> u32 {
        self.api_version
    }
}

impl Drop for Graphics {
    fn drop(&mut self) {
        unsafe {
            if !self.debug_utils_messenger.is_null() {
                self.instance
                    .destroy_debug_utils_messenger_ext(self.debug_utils_messenger, None);
            }

            self.instance.destroy_instance(None);
        }
    }
}

static VALIDATION_LAYERS: [vk::ExtensionName; 2] = [
    vk::ExtensionName::from_bytes(b"VK_LAYER_KHRONOS_validation"),
    vk::ExtensionName::from_bytes(b"VK_LAYER_LUNARG_standard_validation"),
];

#[cfg(any(
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "linux",
    target_os = "netbsd",
    target_os = "openbsd"
))]
const PLATFORM_SURFACE_EXTENSIONS: &[vk::Extension] = &[
    vk::KHR_XLIB_SURFACE_EXTENSION,
    vk::KHR_XCB_SURFACE_EXTENSION,
    vk::KHR_WAYLAND_SURFACE_EXTENSION,
];
#[cfg(target_os = "windows")]
const PLATFORM_SURFACE_EXTENSIONS: &[vk::Extension] = &[vk::KHR_WIN32_SURFACE_EXTENSION];
#[cfg(not(any(
    target_os = "dragonfly",
    target_os = "freebsd",
    target_os = "linux",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "windows"
)))]
const PLATFORM_SURFACE_EXTENSIONS: &[vk::Extension] = &[];

/// Instance layers and extensions to enable.
struct InstanceLayers {
    layers: Vec<&'static vk::ExtensionName>,
    extensions: Vec<&'static vk::Extension>,
    debug_utils: bool,
}

impl InstanceLayers {
    unsafe fn select(entry: &Entry, config: &InstanceConfig) -> Result<Self> {
        let available_layers = entry
            .enumerate_instance_layer_properties()?
            .into_iter()
            .map(|layer| layer.layer_name)
            .collect::<HashSet<_>>();
        let available_extensions = entry
            .enumerate_instance_extension_properties(None)?
            .into_iter()
            .map(|ext| ext.extension_name)
            .collect::<HashSet<_>>();
        let is_available = |ext: &vk::Extension| available_extensions.contains(&ext.name);

        let mut res = Self {
            layers: Vec::new(),
            extensions: Vec::new(),
            debug_utils: false,
        };

        if config.validation_layer_enabled {
            let layer = VALIDATION_LAYERS
                .iter()
                .find(|layer| available_layers.contains(*layer));

            match layer {
                Some(layer) if is_available(&vk::EXT_DEBUG_UTILS_EXTENSION) => {
                    res.layers.push(layer);
                    res.extensions.push(&vk::EXT_DEBUG_UTILS_EXTENSION);
                    res.debug_utils = true;
                }
                Some(_) => tracing::warn!("Vulkan debug utils extension is not available"),
                None => tracing::warn!("Vulkan validation layers are not available"),
            }
        }

        if config.presentation_enabled {
            anyhow::ensure!(
                is_available(&vk::KHR_SURFACE_EXTENSION),
                "Vulkan surface extension support is mandatory for presentation"
            );
            res.extensions.push(&vk::KHR_SURFACE_EXTENSION);
            res.extensions.extend(
                PLATFORM_SURFACE_EXTENSIONS
                    .iter()
                    .filter(|ext| is_available(ext)),
            );
        }

        Ok(res)
    }

    fn layer_ptrs(&self) -> Vec<*const c_char> {
        self.layers.iter().map(|name| name.as_ptr()).collect()
    }

    fn extension_ptrs(&self) -> Vec<*const c_char> {
        self.extensions.iter().map(|ext| ext.name.as_ptr()).collect()
    }
}

/// Keeps successfully captured candidates.
///
/// A device which failed to snapshot is logged and skipped. Fails only if
/// every device was skipped for reporting an unsupported API version.
pub(crate) fn filter_candidates<I>(snapshots: I) -> Result<Vec<HardwareCandidate>, EnumerateError>
where
    I: IntoIterator<Item = (String, Result<HardwareCandidate, SnapshotError>)>,
{
    let mut candidates = Vec::new();
    let mut skipped = Vec::new();
    for (name, snapshot) in snapshots {
        match snapshot {
            Ok(candidate) => candidates.push(candidate),
            Err(SnapshotError::UnsupportedApiVersion { found, .. }) => {
                tracing::warn!(
                    device = %name,
                    api_version = %found,
                    "skipping physical device with unsupported API version",
                );
                skipped.push(format!("{name} ({found})"));
            }
            Err(e) => {
                tracing::warn!(device = %name, "skipping physical device: {e}");
            }
        }
    }

    if candidates.is_empty() && !skipped.is_empty() {
        return Err(EnumerateError::NoSupportedDevices {
            required: ApiVersion(MIN_API_VERSION),
            devices: skipped,
        });
    }

    Ok(candidates)
}

/// Error that can occur when enumerating physical devices.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EnumerateError {
    #[error("no physical device supports Vulkan {required} (found: {})", .devices.join(", "))]
    NoSupportedDevices {
        required: ApiVersion,
        devices: Vec<String>,
    },
    #[error("failed to initialize physical devices")]
    InitializationFailed,
    #[error(transparent)]
    OutOfDeviceMemory(#[from] OutOfDeviceMemory),
}

fn make_debug_callback_info() -> vk::DebugUtilsMessengerCreateInfoEXTBuilder<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(vk::DebugUtilsMessageSeverityFlagsEXT::all())
        .message_type(vk::DebugUtilsMessageTypeFlagsEXT::all())
        .user_callback(Some(debug_callback))
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    ty: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _: *mut c_void,
) -> vk::Bool32 {
    type Severity = vk::DebugUtilsMessageSeverityFlagsEXT;

    if data.is_null() || (*data).message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*data).message).to_string_lossy();

    match severity {
        s if s >= Severity::ERROR => tracing::error!(target: "validation", ?ty, "{message}"),
        s if s >= Severity::WARNING => tracing::warn!(target: "validation", ?ty, "{message}"),
        s if s >= Severity::INFO => tracing::debug!(target: "validation", ?ty, "{message}"),
        _ => tracing::trace!(target: "validation", ?ty, "{message}"),
    }

    vk::FALSE
}

static GRAPHICS: OnceCell<Graphics> = OnceCell::new();
static INIT_CONFIG: Mutex<InstanceConfig> = Mutex::new(InstanceConfig {
    app_name: Cow::Borrowed("app"),
    app_version: (0, 0, 1),
    validation_layer_enabled: true,
    presentation_enabled: false,
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physical::check_api_version;
    use crate::types::SurfaceLost;

    fn unsupported(major: u32, minor: u32) -> Result<HardwareCandidate, SnapshotError> {
        Err(check_api_version(ApiVersion(vk::make_version(major, minor, 0))).unwrap_err())
    }

    fn gpu(name: &str) -> (String, Result<HardwareCandidate, SnapshotError>) {
        let candidate = HardwareCandidate::fake(name, vk::PhysicalDeviceType::DISCRETE_GPU);
        (name.to_owned(), Ok(candidate))
    }

    #[test]
    fn all_unsupported_devices_are_reported() {
        let err = filter_candidates([
            ("old".to_owned(), unsupported(1, 1)),
            ("older".to_owned(), unsupported(1, 0)),
        ])
        .unwrap_err();

        match &err {
            EnumerateError::NoSupportedDevices { required, devices } => {
                assert_eq!(*required, ApiVersion(MIN_API_VERSION));
                assert_eq!(devices, &["old (1.1.0)", "older (1.0.0)"]);
            }
            e => panic!("unexpected error: {e}"),
        }
        assert_eq!(
            err.to_string(),
            "no physical device supports Vulkan 1.3.0 (found: old (1.1.0), older (1.0.0))"
        );
    }

    #[test]
    fn unsupported_devices_are_skipped() {
        let candidates = filter_candidates([
            ("old".to_owned(), unsupported(1, 2)),
            gpu("new"),
            gpu("newer"),
        ])
        .unwrap();

        let names = candidates.iter().map(|c| c.name()).collect::<Vec<_>>();
        assert_eq!(names, ["new", "newer"]);
    }

    #[test]
    fn failed_snapshot_excludes_only_that_device() {
        let candidates = filter_candidates([
            ("lost".to_owned(), Err(SnapshotError::from(SurfaceLost))),
            gpu("gpu"),
            ("oom".to_owned(), Err(SnapshotError::from(OutOfDeviceMemory))),
        ])
        .unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name(), "gpu");

        // Failures other than the API version do not count as unsupported
        let candidates =
            filter_candidates([("lost".to_owned(), Err(SnapshotError::from(SurfaceLost)))])
                .unwrap();
        assert!(candidates.is_empty());
    }

    #[test]
    fn no_devices_is_not_an_error() {
        assert!(filter_candidates(std::iter::empty()).unwrap().is_empty());
    }
}
