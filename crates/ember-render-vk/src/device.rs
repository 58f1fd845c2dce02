// SPDX-License-Identifier: CEPL-1.0
use std::borrow::Cow;
use std::ffi::{c_char, c_void, CStr, CString};

use ash::ext::debug_utils;
use ash::khr::{surface, swapchain};
use ash::prelude::VkResult;
use ash::{vk, Entry, Instance};
use tracing::{debug, error, info, trace, warn};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, VkResultExt};
use crate::host::RenderHost;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
const REQUIRED_DEVICE_EXTENSIONS: [&CStr; 1] = [swapchain::NAME];

/// Per-family capabilities of one physical device, in family order.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilySupport {
    pub graphics: bool,
    pub present: bool,
}

/// Queue family lookup result. `None` means "not found (yet)".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

/// Both families resolved; only obtainable through [`QueueFamilyIndices::resolve`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    pub fn resolve(self) -> Option<QueueFamilies> {
        Some(QueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }

    pub fn is_complete(self) -> bool {
        self.resolve().is_some()
    }

    pub fn is_shared(self) -> bool {
        self.resolve().is_some_and(|f| f.is_shared())
    }
}

impl QueueFamilies {
    pub fn is_shared(self) -> bool {
        self.graphics == self.present
    }

    /// Distinct families, graphics first; one queue-create-info each.
    pub fn unique(self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// A family that can do both wins outright, so submissions never need a
/// queue ownership transfer. Otherwise the first graphics and the first
/// present family are paired.
pub fn find_queue_families(families: &[QueueFamilySupport]) -> QueueFamilyIndices {
    if let Some(i) = families.iter().position(|f| f.graphics && f.present) {
        let i = i as u32;
        return QueueFamilyIndices {
            graphics: Some(i),
            present: Some(i),
        };
    }
    QueueFamilyIndices {
        graphics: families.iter().position(|f| f.graphics).map(|i| i as u32),
        present: families.iter().position(|f| f.present).map(|i| i as u32),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceCandidate {
    pub name: String,
    pub queues: QueueFamilyIndices,
    pub extensions_supported: bool,
    /// At least one surface format and one present mode.
    pub surface_adequate: bool,
}

impl DeviceCandidate {
    pub fn rejection(&self) -> Option<&'static str> {
        if !self.extensions_supported {
            Some("missing VK_KHR_swapchain")
        } else if !self.surface_adequate {
            Some("no surface formats or present modes")
        } else if self.queues.graphics.is_none() {
            Some("no graphics queue family")
        } else if self.queues.present.is_none() {
            Some("cannot present to the surface")
        } else {
            None
        }
    }

    pub fn is_suitable(&self) -> bool {
        self.rejection().is_none()
    }
}

/// First suitable device with a shared graphics/present family, else the
/// first suitable device at all.
pub fn pick_device(candidates: &[DeviceCandidate]) -> Option<usize> {
    candidates
        .iter()
        .position(|c| c.is_suitable() && c.queues.is_shared())
        .or_else(|| candidates.iter().position(DeviceCandidate::is_suitable))
}

fn describe_rejections(candidates: &[DeviceCandidate]) -> String {
    if candidates.is_empty() {
        return "no Vulkan devices enumerated".to_owned();
    }
    candidates
        .iter()
        .map(|c| format!("{}: {}", c.name, c.rejection().unwrap_or("suitable")))
        .collect::<Vec<_>>()
        .join("; ")
}

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT<'_>,
    _user: *mut c_void,
) -> vk::Bool32 {
    let msg = if data.is_null() || (*data).p_message.is_null() {
        Cow::Borrowed("<no message>")
    } else {
        CStr::from_ptr((*data).p_message).to_string_lossy()
    };

    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(?types, "[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        warn!(?types, "[vulkan] {msg}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::INFO) {
        debug!(?types, "[vulkan] {msg}");
    } else {
        trace!(?types, "[vulkan] {msg}");
    }
    vk::FALSE
}

struct DebugMessenger {
    loader: debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
}

unsafe fn validation_available(entry: &Entry) -> bool {
    let has_layer = entry
        .enumerate_instance_layer_properties()
        .unwrap_or_default()
        .iter()
        .any(|l| l.layer_name_as_c_str().is_ok_and(|n| n == VALIDATION_LAYER));
    let has_ext = entry
        .enumerate_instance_extension_properties(None)
        .unwrap_or_default()
        .iter()
        .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == debug_utils::NAME));
    has_layer && has_ext
}

unsafe fn create_instance(
    entry: &Entry,
    config: &EngineConfig,
    host: &dyn RenderHost,
    validation: bool,
) -> EngineResult<Instance> {
    let app_name = CString::new(config.app_name.as_str())
        .map_err(|_| EngineError::InvalidConfig("app_name contains a NUL byte"))?;

    let app_info = vk::ApplicationInfo {
        s_type: vk::StructureType::APPLICATION_INFO,
        p_application_name: app_name.as_ptr(),
        application_version: 0,
        p_engine_name: c"Ember".as_ptr(),
        engine_version: 0,
        api_version: vk::API_VERSION_1_0,
        ..Default::default()
    };

    let mut ext_vec: Vec<*const c_char> = host
        .instance_extensions()
        .iter()
        .map(|e| e.as_ptr())
        .collect();
    if validation {
        ext_vec.push(debug_utils::NAME.as_ptr());
    }

    let layers = [VALIDATION_LAYER.as_ptr()];
    let (enabled_layer_count, pp_enabled_layer_names) = if validation {
        (layers.len() as u32, layers.as_ptr())
    } else {
        (0, std::ptr::null())
    };

    let create_info = vk::InstanceCreateInfo {
        s_type: vk::StructureType::INSTANCE_CREATE_INFO,
        p_application_info: &app_info,
        enabled_extension_count: ext_vec.len() as u32,
        pp_enabled_extension_names: ext_vec.as_ptr(),
        enabled_layer_count,
        pp_enabled_layer_names,
        ..Default::default()
    };

    entry.create_instance(&create_info, None).vk("create_instance")
}

/// Never fails the caller: a missing layer or a failed create just means no
/// validation output.
unsafe fn setup_debug_messenger(entry: &Entry, instance: &Instance) -> Option<DebugMessenger> {
    let loader = debug_utils::Instance::new(entry, instance);
    let ci = vk::DebugUtilsMessengerCreateInfoEXT {
        s_type: vk::StructureType::DEBUG_UTILS_MESSENGER_CREATE_INFO_EXT,
        message_severity: vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
            | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
            | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
            | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        message_type: vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
            | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
            | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        pfn_user_callback: Some(debug_callback),
        ..Default::default()
    };
    match loader.create_debug_utils_messenger(&ci, None) {
        Ok(handle) => Some(DebugMessenger { loader, handle }),
        Err(e) => {
            debug!("debug messenger unavailable: {e}");
            None
        }
    }
}

/// Instance-scoped objects: instance, debug messenger, surface.
struct InstanceContext {
    entry: Entry,
    instance: Instance,
    debug: Option<DebugMessenger>,
    surface_loader: surface::Instance,
    surface: vk::SurfaceKHR,
}

impl InstanceContext {
    fn new(config: &EngineConfig, host: &dyn RenderHost) -> EngineResult<Self> {
        // STRICT ORDER: instance -> debug messenger -> surface. Device
        // selection later queries present support against this surface.
        unsafe {
            let entry = Entry::load()?;

            let validation = config.validation && validation_available(&entry);
            if config.validation && !validation {
                debug!("validation requested but {VALIDATION_LAYER:?} is not installed");
            }

            let instance = create_instance(&entry, config, host, validation)?;
            let debug = if validation {
                setup_debug_messenger(&entry, &instance)
            } else {
                None
            };
            let surface_loader = surface::Instance::new(&entry, &instance);

            let mut ctx = InstanceContext {
                entry,
                instance,
                debug,
                surface_loader,
                surface: vk::SurfaceKHR::null(),
            };
            ctx.surface = host
                .create_surface(&ctx.entry, &ctx.instance)
                .map_err(EngineError::Surface)?;

            info!(
                "vk: instance ready (validation={})",
                ctx.debug.is_some()
            );
            Ok(ctx)
        }
    }
}

impl Drop for InstanceContext {
    fn drop(&mut self) {
        unsafe {
            if self.surface != vk::SurfaceKHR::null() {
                self.surface_loader.destroy_surface(self.surface, None);
            }
            if let Some(dbg) = self.debug.take() {
                dbg.loader.destroy_debug_utils_messenger(dbg.handle, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Whether every required device extension is listed. A failed query
/// counts as unsupported, so that device is rejected and the others are
/// still considered.
fn required_extensions_present(available: VkResult<Vec<vk::ExtensionProperties>>, device: &str) -> bool {
    let available = match available {
        Ok(list) => list,
        Err(e) => {
            debug!("vk: {device}: enumerate_device_extension_properties failed: {e}");
            return false;
        }
    };
    REQUIRED_DEVICE_EXTENSIONS.iter().all(|req| {
        available
            .iter()
            .any(|e| e.extension_name_as_c_str().is_ok_and(|n| n == *req))
    })
}

unsafe fn describe_device(inst: &InstanceContext, phys: vk::PhysicalDevice) -> DeviceCandidate {
    let props = inst.instance.get_physical_device_properties(phys);
    let name = props
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "<unnamed>".to_owned());

    let families: Vec<QueueFamilySupport> = inst
        .instance
        .get_physical_device_queue_family_properties(phys)
        .iter()
        .enumerate()
        .map(|(i, q)| QueueFamilySupport {
            graphics: q.queue_count > 0 && q.queue_flags.contains(vk::QueueFlags::GRAPHICS),
            present: inst
                .surface_loader
                .get_physical_device_surface_support(phys, i as u32, inst.surface)
                .unwrap_or(false),
        })
        .collect();

    let extensions_supported =
        required_extensions_present(inst.instance.enumerate_device_extension_properties(phys), &name);

    // Only meaningful once the swapchain extension is known to exist.
    let surface_adequate = extensions_supported && {
        let formats = inst
            .surface_loader
            .get_physical_device_surface_formats(phys, inst.surface)
            .unwrap_or_default();
        let modes = inst
            .surface_loader
            .get_physical_device_surface_present_modes(phys, inst.surface)
            .unwrap_or_default();
        !formats.is_empty() && !modes.is_empty()
    };

    DeviceCandidate {
        name,
        queues: find_queue_families(&families),
        extensions_supported,
        surface_adequate,
    }
}

unsafe fn select_physical_device(
    inst: &InstanceContext,
) -> EngineResult<(vk::PhysicalDevice, QueueFamilies, String)> {
    let devices = inst
        .instance
        .enumerate_physical_devices()
        .vk("enumerate_physical_devices")?;

    let candidates: Vec<DeviceCandidate> = devices.iter().map(|&phys| describe_device(inst, phys)).collect();

    let Some(index) = pick_device(&candidates) else {
        return Err(EngineError::NoSuitableDevice(describe_rejections(&candidates)));
    };
    let chosen = &candidates[index];
    let families = chosen
        .queues
        .resolve()
        .ok_or_else(|| EngineError::NoSuitableDevice(describe_rejections(&candidates)))?;
    Ok((devices[index], families, chosen.name.clone()))
}

unsafe fn create_logical_device(
    instance: &Instance,
    phys: vk::PhysicalDevice,
    families: QueueFamilies,
) -> EngineResult<ash::Device> {
    let priorities = [1.0_f32];
    let queue_infos: Vec<vk::DeviceQueueCreateInfo> = families
        .unique()
        .into_iter()
        .map(|queue_family_index| vk::DeviceQueueCreateInfo {
            s_type: vk::StructureType::DEVICE_QUEUE_CREATE_INFO,
            queue_family_index,
            queue_count: 1,
            p_queue_priorities: priorities.as_ptr(),
            ..Default::default()
        })
        .collect();

    let device_exts = REQUIRED_DEVICE_EXTENSIONS.map(CStr::as_ptr);
    let features = vk::PhysicalDeviceFeatures::default();
    let dinfo = vk::DeviceCreateInfo {
        s_type: vk::StructureType::DEVICE_CREATE_INFO,
        queue_create_info_count: queue_infos.len() as u32,
        p_queue_create_infos: queue_infos.as_ptr(),
        enabled_extension_count: device_exts.len() as u32,
        pp_enabled_extension_names: device_exts.as_ptr(),
        p_enabled_features: &features,
        ..Default::default()
    };

    instance
        .create_device(phys, &dinfo, None)
        .vk("create_device")
}

/// Instance, surface, physical + logical device and the two queues.
/// Created once per engine and destroyed last.
pub struct DeviceContext {
    // Dropped after `Drop::drop` destroyed the device.
    inst: InstanceContext,
    phys: vk::PhysicalDevice,
    device: ash::Device,
    families: QueueFamilies,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    swapchain_loader: swapchain::Device,
    name: String,
}

impl DeviceContext {
    pub fn new(config: &EngineConfig, host: &dyn RenderHost) -> EngineResult<Self> {
        let inst = InstanceContext::new(config, host)?;
        unsafe {
            let (phys, families, name) = select_physical_device(&inst)?;
            let device = create_logical_device(&inst.instance, phys, families)?;
            let graphics_queue = device.get_device_queue(families.graphics, 0);
            let present_queue = device.get_device_queue(families.present, 0);
            let swapchain_loader = swapchain::Device::new(&inst.instance, &device);

            if families.is_shared() {
                info!("vk: device {name} (queue family {})", families.graphics);
            } else {
                warn!(
                    "vk: device {name} has no shared graphics/present family \
                     (graphics={}, present={}); swapchain images use concurrent sharing",
                    families.graphics, families.present
                );
            }

            Ok(Self {
                inst,
                phys,
                device,
                families,
                graphics_queue,
                present_queue,
                swapchain_loader,
                name,
            })
        }
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn instance(&self) -> &Instance {
        &self.inst.instance
    }

    pub fn physical(&self) -> vk::PhysicalDevice {
        self.phys
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.inst.surface
    }

    pub fn surface_loader(&self) -> &surface::Instance {
        &self.inst.surface_loader
    }

    pub fn swapchain_loader(&self) -> &swapchain::Device {
        &self.swapchain_loader
    }

    pub fn families(&self) -> QueueFamilies {
        self.families
    }

    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wait_idle(&self) -> EngineResult<()> {
        unsafe { self.device.device_wait_idle() }.vk("device_wait_idle")
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            self.device.device_wait_idle().ok();
            self.device.destroy_device(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BOTH: QueueFamilySupport = QueueFamilySupport {
        graphics: true,
        present: true,
    };
    const GFX: QueueFamilySupport = QueueFamilySupport {
        graphics: true,
        present: false,
    };
    const PRESENT: QueueFamilySupport = QueueFamilySupport {
        graphics: false,
        present: true,
    };
    const NONE: QueueFamilySupport = QueueFamilySupport {
        graphics: false,
        present: false,
    };

    fn candidate(name: &str, families: &[QueueFamilySupport]) -> DeviceCandidate {
        DeviceCandidate {
            name: name.to_owned(),
            queues: find_queue_families(families),
            extensions_supported: true,
            surface_adequate: true,
        }
    }

    #[test]
    fn shared_family_preferred_over_earlier_split() {
        let q = find_queue_families(&[GFX, PRESENT, BOTH]);
        assert_eq!(q.graphics, Some(2));
        assert_eq!(q.present, Some(2));
        assert!(q.is_shared());
    }

    #[test]
    fn split_families_when_nothing_shared() {
        let q = find_queue_families(&[NONE, PRESENT, GFX]);
        let f = q.resolve().unwrap();
        assert_eq!(f, QueueFamilies { graphics: 2, present: 1 });
        assert!(!f.is_shared());
        assert_eq!(f.unique(), vec![2, 1]);
    }

    #[test]
    fn unresolved_until_both_found() {
        let q = find_queue_families(&[GFX, NONE]);
        assert_eq!(q.present, None);
        assert!(!q.is_complete());
        assert!(q.resolve().is_none());
        assert!(!find_queue_families(&[]).is_complete());
        assert_eq!(QueueFamilyIndices::default().resolve(), None);
    }

    #[test]
    fn shared_family_has_one_queue_info() {
        let f = find_queue_families(&[BOTH]).resolve().unwrap();
        assert_eq!(f.unique(), vec![0]);
    }

    #[test]
    fn device_with_shared_family_wins_tie_break() {
        let devices = [
            candidate("split", &[GFX, PRESENT]),
            candidate("shared", &[BOTH]),
        ];
        assert_eq!(pick_device(&devices), Some(1));
    }

    #[test]
    fn split_device_used_as_fallback() {
        let devices = [
            candidate("no-present", &[GFX]),
            candidate("split", &[PRESENT, GFX]),
        ];
        assert_eq!(pick_device(&devices), Some(1));
    }

    #[test]
    fn first_suitable_wins_among_equals() {
        let devices = [candidate("a", &[BOTH]), candidate("b", &[BOTH])];
        assert_eq!(pick_device(&devices), Some(0));
    }

    #[test]
    fn missing_extension_or_surface_support_rejects() {
        let mut no_ext = candidate("no-ext", &[BOTH]);
        no_ext.extensions_supported = false;
        let mut no_fmt = candidate("no-fmt", &[BOTH]);
        no_fmt.surface_adequate = false;
        let devices = [no_ext, no_fmt];
        assert_eq!(pick_device(&devices), None);

        let report = describe_rejections(&devices);
        assert!(report.contains("no-ext: missing VK_KHR_swapchain"));
        assert!(report.contains("no-fmt: no surface formats"));
    }

    #[test]
    fn empty_enumeration_is_reported() {
        assert_eq!(pick_device(&[]), None);
        assert_eq!(describe_rejections(&[]), "no Vulkan devices enumerated");
    }

    fn extension(name: &CStr) -> vk::ExtensionProperties {
        let mut props = vk::ExtensionProperties::default();
        for (dst, &b) in props.extension_name.iter_mut().zip(name.to_bytes()) {
            *dst = b as c_char;
        }
        props
    }

    #[test]
    fn failed_extension_query_rejects_only_that_device() {
        let broken = required_extensions_present(Err(vk::Result::ERROR_INITIALIZATION_FAILED), "broken");
        assert!(!broken);
        assert!(required_extensions_present(Ok(vec![extension(swapchain::NAME)]), "good"));
        assert!(!required_extensions_present(Ok(Vec::new()), "bare"));

        let mut first = candidate("broken", &[BOTH]);
        first.extensions_supported = broken;
        let devices = [first, candidate("good", &[BOTH])];
        assert_eq!(pick_device(&devices), Some(1));
    }
}
