//! Instance creation, debug messenger, adapter ranking and surface
//! creation.

use std::{
    ffi::{c_void, CStr, CString},
    sync::Arc,
};

use ash::{
    extensions::{ext, khr},
    vk,
};
use parking_lot::RwLock;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::{InstanceError, SurfaceError};

use super::{Adapter, DebugUtils, InstanceShared, Surface};

unsafe extern "system" fn debug_utils_messenger_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data_ptr: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut c_void,
) -> vk::Bool32 {
    if callback_data_ptr.is_null() {
        return vk::FALSE;
    }
    let data = *callback_data_ptr;
    let message = if data.p_message.is_null() {
        std::borrow::Cow::Borrowed("")
    } else {
        CStr::from_ptr(data.p_message).to_string_lossy()
    };

    let level = match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::Level::Error,
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::Level::Warn,
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::Level::Info,
        _ => log::Level::Trace,
    };
    log::log!(level, "vulkan[{message_type:?}]: {message}");

    vk::FALSE
}

fn instance_extensions(flags: sbt::InstanceFlags) -> Vec<&'static CStr> {
    let mut extensions = vec![khr::Surface::name()];
    if cfg!(windows) {
        extensions.push(khr::Win32Surface::name());
    } else if cfg!(target_os = "android") {
        extensions.push(khr::AndroidSurface::name());
    } else {
        extensions.push(khr::XlibSurface::name());
        extensions.push(khr::WaylandSurface::name());
    }
    if flags.contains(sbt::InstanceFlags::DEBUG_OUTPUT) {
        extensions.push(ext::DebugUtils::name());
    }
    extensions
}

fn rank(kind: sbt::DeviceKind) -> u32 {
    match kind {
        sbt::DeviceKind::Discrete => 0,
        sbt::DeviceKind::Integrated => 1,
        sbt::DeviceKind::Virtual => 2,
        sbt::DeviceKind::Cpu => 3,
        sbt::DeviceKind::Other => 4,
    }
}

fn device_kind(ty: vk::PhysicalDeviceType) -> sbt::DeviceKind {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => sbt::DeviceKind::Discrete,
        vk::PhysicalDeviceType::INTEGRATED_GPU => sbt::DeviceKind::Integrated,
        vk::PhysicalDeviceType::VIRTUAL_GPU => sbt::DeviceKind::Virtual,
        vk::PhysicalDeviceType::CPU => sbt::DeviceKind::Cpu,
        _ => sbt::DeviceKind::Other,
    }
}

impl Adapter {
    /// Create the instance, install the debug messenger, enumerate and
    /// rank adapters, and wrap the winner.
    ///
    /// Ranking prefers discrete over integrated over virtual over CPU and
    /// breaks ties towards the adapter with less total VRAM, so the weaker
    /// discrete GPU of a dual-GPU development machine is exercised.
    pub fn create(options: &sbt::InitOptions) -> Result<Self, InstanceError> {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|err| InstanceError::NotAvailable(format!("loading libvulkan: {err}")))?;

        let app_name = CString::new(options.app_name.as_str())
            .map_err(|_| InstanceError::System("application name contains a nul".to_string()))?;
        let app_version = vk::make_api_version(
            options.app_version.variant as u32,
            options.app_version.major as u32,
            options.app_version.minor as u32,
            options.app_version.patch as u32,
        );

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(app_version)
            .engine_name(CStr::from_bytes_with_nul(b"sable\0").unwrap())
            .api_version(vk::API_VERSION_1_3);

        let extensions = instance_extensions(options.flags);
        let extension_pointers: Vec<*const i8> =
            extensions.iter().map(|name| name.as_ptr()).collect();

        let mut layer_pointers = Vec::new();
        let validation_layer = CStr::from_bytes_with_nul(b"VK_LAYER_KHRONOS_validation\0").unwrap();
        if options.flags.contains(sbt::InstanceFlags::VALIDATION) {
            let available = entry
                .enumerate_instance_layer_properties()
                .unwrap_or_default();
            let has_validation = available.iter().any(|layer| {
                super::cstr_from_bytes_until_nul(&layer.layer_name) == Some(validation_layer)
            });
            if has_validation {
                layer_pointers.push(validation_layer.as_ptr());
            } else {
                log::warn!("validation requested but VK_LAYER_KHRONOS_validation is not present");
            }
        }

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_pointers)
            .enabled_layer_names(&layer_pointers);

        let raw = unsafe { entry.create_instance(&create_info, None) }
            .map_err(|err| InstanceError::NotAvailable(format!("vkCreateInstance: {err}")))?;

        let debug_utils = if options.flags.contains(sbt::InstanceFlags::DEBUG_OUTPUT) {
            let extension = ext::DebugUtils::new(&entry, &raw);
            let info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                        | vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(debug_utils_messenger_callback));
            match unsafe { extension.create_debug_utils_messenger(&info, None) } {
                Ok(messenger) => Some(DebugUtils {
                    extension,
                    messenger,
                }),
                Err(err) => {
                    log::warn!("failed to create a debug messenger: {err}");
                    None
                }
            }
        } else {
            None
        };

        let shared = Arc::new(InstanceShared {
            raw,
            entry,
            debug_utils,
            instance_api_version: vk::API_VERSION_1_3,
        });

        Self::pick_adapter(shared, options.software_fallback)
    }

    fn pick_adapter(
        shared: Arc<InstanceShared>,
        software_fallback: bool,
    ) -> Result<Self, InstanceError> {
        let raw_adapters = unsafe { shared.raw.enumerate_physical_devices() }
            .map_err(|err| InstanceError::NotAvailable(format!("enumerating adapters: {err}")))?;

        let mut candidates = Vec::with_capacity(raw_adapters.len());
        for raw in raw_adapters {
            let properties = unsafe { shared.raw.get_physical_device_properties(raw) };
            let memory = unsafe { shared.raw.get_physical_device_memory_properties(raw) };
            let kind = device_kind(properties.device_type);
            if kind == sbt::DeviceKind::Cpu && !software_fallback {
                continue;
            }
            if properties.api_version < vk::API_VERSION_1_3 {
                continue;
            }

            let video_memory = memory.memory_heaps[..memory.memory_heap_count as usize]
                .iter()
                .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
                .map(|heap| heap.size)
                .sum();
            let name = super::cstr_from_bytes_until_nul(&properties.device_name)
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();

            candidates.push((raw, properties, kind, video_memory, name));
        }

        // Smaller VRAM wins the tie inside each kind bucket.
        candidates.sort_by_key(|&(_, _, kind, video_memory, _)| (rank(kind), video_memory));

        let (raw, properties, kind, video_memory, name) = candidates
            .into_iter()
            .next()
            .ok_or(InstanceError::NoSuitableAdapter)?;

        let queue_families =
            unsafe { shared.raw.get_physical_device_queue_family_properties(raw) };

        let info = sbt::AdapterInfo {
            name,
            vendor_id: properties.vendor_id,
            device_id: properties.device_id,
            kind,
            video_memory,
        };
        log::info!(
            "selected vulkan adapter `{}` ({:?}, {} MiB)",
            info.name,
            info.kind,
            info.video_memory >> 20
        );

        Ok(Self {
            shared,
            raw,
            info,
            properties,
            queue_families,
        })
    }

    /// Wrap a native window in `VK_KHR_*_surface`.
    pub fn create_surface(
        &self,
        display_handle: RawDisplayHandle,
        window_handle: RawWindowHandle,
        width: u32,
        height: u32,
        flags: sbt::SurfaceFlags,
    ) -> Result<Surface, SurfaceError> {
        let raw = match (display_handle, window_handle) {
            (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
                let info = vk::Win32SurfaceCreateInfoKHR::builder()
                    .hinstance(handle.hinstance)
                    .hwnd(handle.hwnd);
                let functor = khr::Win32Surface::new(&self.shared.entry, &self.shared.raw);
                unsafe { functor.create_win32_surface(&info, None) }
            }
            (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
                let info = vk::WaylandSurfaceCreateInfoKHR::builder()
                    .display(display.display)
                    .surface(handle.surface);
                let functor = khr::WaylandSurface::new(&self.shared.entry, &self.shared.raw);
                unsafe { functor.create_wayland_surface(&info, None) }
            }
            (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
                if flags.contains(sbt::SurfaceFlags::WAYLAND) {
                    log::warn!("wayland surface requested but the window is X11");
                }
                let info = vk::XlibSurfaceCreateInfoKHR::builder()
                    .dpy(display.display as *mut _)
                    .window(handle.window);
                let functor = khr::XlibSurface::new(&self.shared.entry, &self.shared.raw);
                unsafe { functor.create_xlib_surface(&info, None) }
            }
            _ => return Err(SurfaceError::Other("unsupported window-system handle")),
        }
        .map_err(|err| SurfaceError::Device(err.into()))?;

        Ok(Surface {
            raw,
            functor: khr::Surface::new(&self.shared.entry, &self.shared.raw),
            instance: Arc::clone(&self.shared),
            swapchain: RwLock::new(None),
            width,
            height,
        })
    }
}

impl Surface {
    /// Size the surface was created with, updated on resize.
    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Record a new window size; the next configure rebuilds the swap
    /// chain at this extent.
    pub fn set_extent(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        if let Some(swapchain) = self.swapchain.get_mut().take() {
            let device = Arc::clone(&swapchain.device);
            unsafe { swapchain.release_resources(&device.raw) };
        }
        unsafe { self.functor.destroy_surface(self.raw, None) };
    }
}

impl Drop for InstanceShared {
    fn drop(&mut self) {
        unsafe {
            if let Some(debug_utils) = self.debug_utils.take() {
                debug_utils
                    .extension
                    .destroy_debug_utils_messenger(debug_utils.messenger, None);
            }
            self.raw.destroy_instance(None);
        }
    }
}
