//! The stable C surface.
//!
//! Every creation routine writes an opaque boxed handle through an
//! out-pointer and returns an [`ErrorCode`]; on failure the out-pointer is
//! untouched, the human-readable message lands in thread-local storage
//! behind [`SableGetLastError`], and nothing is allocated. Backend errors
//! are classified exactly here; panics never cross the boundary.

#![allow(non_snake_case, clippy::missing_safety_doc)]

use std::ffi::CStr;
use std::os::raw::{c_char, c_void};
use std::panic::{catch_unwind, AssertUnwindSafe};

use sbt::ErrorCode;

use crate::command::CommandObject;
use crate::dispatch::{
    CommandQueue, LogicalDevice, PhysicalDevice, Resource, ShaderLibrary, Surface, SwapChain,
    VideoMemory,
};
use crate::error::{last_error_ptr, Error, SableResult};
use crate::renderer::Renderer;

/// `InitOptions` as the C caller sees it.
#[repr(C)]
pub struct SableInitOptions {
    /// Application name, UTF-8, nul-terminated. May be null.
    pub app_name: *const c_char,
    /// Application version.
    pub app_version: sbt::AppVersion,
    /// Accept a software adapter when no hardware adapter survives
    /// ranking.
    pub software_fallback: bool,
}

fn code_of(result: SableResult<()>) -> ErrorCode {
    match result {
        Ok(()) => ErrorCode::Success,
        Err(err) => err.commit(),
    }
}

/// Run `body` behind a panic guard, storing the outcome through `out`.
fn create<T>(out: *mut *mut T, body: impl FnOnce() -> SableResult<T>) -> ErrorCode {
    if out.is_null() {
        return Error::new(ErrorCode::InvalidPointer, "null out-pointer").commit();
    }
    let outcome = catch_unwind(AssertUnwindSafe(body));
    match outcome {
        Ok(Ok(value)) => {
            unsafe { *out = Box::into_raw(Box::new(value)) };
            ErrorCode::Success
        }
        Ok(Err(err)) => err.commit(),
        Err(_) => Error::new(ErrorCode::UnknownError, "panic inside the RHI").commit(),
    }
}

unsafe fn required<'a, T>(ptr: *const T, what: &str) -> SableResult<&'a T> {
    ptr.as_ref()
        .ok_or_else(|| Error::new(ErrorCode::InvalidPointer, format!("null {what} handle")))
}

fn api_from_wire(api: i32) -> SableResult<sbt::Backend> {
    Ok(match api {
        0 => sbt::Backend::PlatformDefault,
        1 => sbt::Backend::Vulkan,
        2 => sbt::Backend::DirectX12,
        3 => sbt::Backend::Metal,
        4 => sbt::Backend::OpenGl,
        other => {
            return Err(Error::new(
                ErrorCode::InvalidParameter,
                format!("unknown API value {other}"),
            ))
        }
    })
}

macro_rules! wire_enum {
    ($fn_name:ident, $ty:ty, { $($value:literal => $variant:expr),+ $(,)? }) => {
        fn $fn_name(raw: i32) -> SableResult<$ty> {
            Ok(match raw {
                $($value => $variant,)+
                other => {
                    return Err(Error::new(
                        ErrorCode::InvalidParameter,
                        format!(concat!("unknown ", stringify!($ty), " value {}"), other),
                    ))
                }
            })
        }
    };
}

wire_enum!(queue_kind_from_wire, sbt::CommandObjectType, {
    0 => sbt::CommandObjectType::AllCommands,
    1 => sbt::CommandObjectType::Compute,
    2 => sbt::CommandObjectType::Copy,
});

wire_enum!(priority_from_wire, sbt::QueuePriority, {
    0 => sbt::QueuePriority::High,
    1 => sbt::QueuePriority::Medium,
    2 => sbt::QueuePriority::Low,
});

wire_enum!(memory_type_from_wire, sbt::VideoMemoryType, {
    0 => sbt::VideoMemoryType::DeviceLocal,
    1 => sbt::VideoMemoryType::HostVisible,
    2 => sbt::VideoMemoryType::DeviceReadback,
});

wire_enum!(memory_usage_from_wire, sbt::VideoMemoryUsage, {
    0 => sbt::VideoMemoryUsage::VertexBuffer,
    1 => sbt::VideoMemoryUsage::IndexBuffer,
    2 => sbt::VideoMemoryUsage::Texture1D,
    3 => sbt::VideoMemoryUsage::Texture2D,
    4 => sbt::VideoMemoryUsage::Texture3D,
});

wire_enum!(resource_type_from_wire, sbt::ResourceType, {
    0 => sbt::ResourceType::VertexBuffer,
    1 => sbt::ResourceType::IndexBuffer,
    2 => sbt::ResourceType::Texture1D,
    3 => sbt::ResourceType::Texture2D,
    4 => sbt::ResourceType::Texture3D,
});

wire_enum!(language_from_wire, sbt::ShaderLanguage, {
    0 => sbt::ShaderLanguage::Hlsl,
    1 => sbt::ShaderLanguage::Glsl,
    2 => sbt::ShaderLanguage::SpirV,
    3 => sbt::ShaderLanguage::Dxil,
});

wire_enum!(stage_from_wire, sbt::ShaderStage, {
    0 => sbt::ShaderStage::Vertex,
    1 => sbt::ShaderStage::Pixel,
    2 => sbt::ShaderStage::Compute,
    3 => sbt::ShaderStage::Geometry,
    4 => sbt::ShaderStage::Mesh,
    5 => sbt::ShaderStage::Amplification,
    6 => sbt::ShaderStage::RayGeneration,
    7 => sbt::ShaderStage::RayIntersection,
    8 => sbt::ShaderStage::RayAnyHit,
    9 => sbt::ShaderStage::RayClosestHit,
    10 => sbt::ShaderStage::RayMiss,
    11 => sbt::ShaderStage::RayCallable,
});

#[no_mangle]
pub unsafe extern "C" fn SableCreatePhysicalDevice(
    physical_device: *mut *mut PhysicalDevice,
    init_options: *const SableInitOptions,
    api: i32,
) -> ErrorCode {
    create(physical_device, || {
        let api = api_from_wire(api)?;
        let options = match init_options.as_ref() {
            Some(raw) => {
                let app_name = if raw.app_name.is_null() {
                    String::new()
                } else {
                    CStr::from_ptr(raw.app_name).to_string_lossy().into_owned()
                };
                sbt::InitOptions {
                    app_name,
                    app_version: raw.app_version,
                    software_fallback: raw.software_fallback,
                    flags: sbt::InstanceFlags::debugging(),
                }
            }
            None => sbt::InitOptions::default(),
        };
        PhysicalDevice::new(&options, api)
    })
}

#[no_mangle]
pub unsafe extern "C" fn SableDestroyPhysicalDevice(physical_device: *mut PhysicalDevice) {
    if !physical_device.is_null() {
        drop(Box::from_raw(physical_device));
    }
}

#[no_mangle]
pub unsafe extern "C" fn SableCreateLogicalDevice(
    logical_device: *mut *mut LogicalDevice,
    physical_device: *const PhysicalDevice,
) -> ErrorCode {
    create(logical_device, || {
        let physical = required(physical_device, "physical device")?;
        LogicalDevice::new(physical)
    })
}

#[no_mangle]
pub unsafe extern "C" fn SableDestroyLogicalDevice(logical_device: *mut LogicalDevice) {
    if !logical_device.is_null() {
        drop(Box::from_raw(logical_device));
    }
}

#[no_mangle]
pub unsafe extern "C" fn SableCreateCommandQueue(
    queue: *mut *mut CommandQueue,
    logical_device: *const LogicalDevice,
    queue_type: i32,
    priority: i32,
) -> ErrorCode {
    create(queue, || {
        let device = required(logical_device, "logical device")?;
        let kind = queue_kind_from_wire(queue_type)?;
        let priority = priority_from_wire(priority)?;
        CommandQueue::new(device, kind, priority)
    })
}

#[no_mangle]
pub unsafe extern "C" fn SableDestroyCommandQueue(queue: *mut CommandQueue) {
    if !queue.is_null() {
        drop(Box::from_raw(queue));
    }
}

#[no_mangle]
pub unsafe extern "C" fn SableCreateSurface(
    surface: *mut *mut Surface,
    physical_device: *const PhysicalDevice,
    width: u32,
    height: u32,
    flags: u32,
) -> ErrorCode {
    create(surface, || {
        let physical = required(physical_device, "physical device")?;
        let flags = sbt::SurfaceFlags::from_bits_truncate(flags);
        Surface::new(physical, width, height, flags)
    })
}

#[no_mangle]
pub unsafe extern "C" fn SableDestroySurface(surface: *mut Surface) {
    if !surface.is_null() {
        drop(Box::from_raw(surface));
    }
}

#[no_mangle]
pub unsafe extern "C" fn SableSetSurfaceTitle(
    surface: *const Surface,
    title: *const c_char,
) -> ErrorCode {
    code_of((|| {
        let surface = required(surface, "surface")?;
        if title.is_null() {
            return Err(Error::new(ErrorCode::InvalidPointer, "null title"));
        }
        let title = CStr::from_ptr(title).to_string_lossy();
        surface.set_title(&title)
    })())
}

#[no_mangle]
pub unsafe extern "C" fn SableCreateSwapChain(
    swap_chain: *mut *mut SwapChain,
    physical_device: *const PhysicalDevice,
    logical_device: *const LogicalDevice,
    present_queue: *const CommandQueue,
    surface: *const Surface,
    buffer_size: u32,
) -> ErrorCode {
    create(swap_chain, || {
        let physical = required(physical_device, "physical device")?;
        let device = required(logical_device, "logical device")?;
        let queue = required(present_queue, "present queue")?;
        let surface = required(surface, "surface")?;
        SwapChain::new(physical, device, queue, surface, buffer_size)
    })
}

#[no_mangle]
pub unsafe extern "C" fn SableDestroySwapChain(swap_chain: *mut SwapChain) {
    if !swap_chain.is_null() {
        drop(Box::from_raw(swap_chain));
    }
}

#[no_mangle]
pub unsafe extern "C" fn SableCreateShaderLibrary(
    shader_library: *mut *mut ShaderLibrary,
    logical_device: *const LogicalDevice,
    source: *const c_void,
    source_size_in_bytes: usize,
    shader_stage: i32,
    shader_language: i32,
) -> ErrorCode {
    create(shader_library, || {
        let device = required(logical_device, "logical device")?;
        if source.is_null() {
            return Err(Error::new(ErrorCode::InvalidPointer, "null shader source"));
        }
        if source_size_in_bytes == 0 {
            return Err(Error::new(
                ErrorCode::InvalidParameter,
                "empty shader source",
            ));
        }
        let stage = stage_from_wire(shader_stage)?;
        let language = language_from_wire(shader_language)?;
        let bytes = std::slice::from_raw_parts(source as *const u8, source_size_in_bytes);
        ShaderLibrary::new(device, bytes, stage, language)
    })
}

#[no_mangle]
pub unsafe extern "C" fn SableDestroyShaderLibrary(shader_library: *mut ShaderLibrary) {
    if !shader_library.is_null() {
        drop(Box::from_raw(shader_library));
    }
}

#[no_mangle]
pub unsafe extern "C" fn SableAllocateVideoMemory(
    video_memory: *mut *mut VideoMemory,
    logical_device: *const LogicalDevice,
    size_in_bytes: usize,
    usage: i32,
    memory_type: i32,
) -> ErrorCode {
    create(video_memory, || {
        let device = required(logical_device, "logical device")?;
        let usage = memory_usage_from_wire(usage)?;
        let memory_type = memory_type_from_wire(memory_type)?;
        VideoMemory::allocate(device, size_in_bytes as u64, usage, memory_type)
    })
}

/// Blocks while a live resource is still bound, per the exclusive-binding
/// invariant.
#[no_mangle]
pub unsafe extern "C" fn SableFreeVideoMemory(video_memory: *mut VideoMemory) {
    if !video_memory.is_null() {
        drop(Box::from_raw(video_memory));
    }
}

#[no_mangle]
pub unsafe extern "C" fn SableCreateResource(
    resource: *mut *mut Resource,
    video_memory: *const VideoMemory,
    width: usize,
    height: usize,
    depth: usize,
    resource_type: i32,
) -> ErrorCode {
    create(resource, || {
        let memory = required(video_memory, "video memory")?;
        let ty = resource_type_from_wire(resource_type)?;
        Resource::new(memory, width as u64, height as u64, depth as u64, ty)
    })
}

#[no_mangle]
pub unsafe extern "C" fn SableDestroyResource(resource: *mut Resource) {
    if !resource.is_null() {
        drop(Box::from_raw(resource));
    }
}

#[no_mangle]
pub unsafe extern "C" fn SableSetBufferData(
    resource: *mut Resource,
    logical_device: *const LogicalDevice,
    copy_queue: *const CommandQueue,
    data: *const c_void,
    size_in_bytes: usize,
    offset: usize,
) -> ErrorCode {
    code_of((|| {
        let resource = resource
            .as_mut()
            .ok_or_else(|| Error::new(ErrorCode::InvalidPointer, "null resource handle"))?;
        let device = required(logical_device, "logical device")?;
        let queue = required(copy_queue, "copy queue")?;
        if size_in_bytes == 0 {
            // Zero-byte writes are a no-op success.
            return Ok(());
        }
        if data.is_null() {
            return Err(Error::new(ErrorCode::InvalidPointer, "null data pointer"));
        }
        let bytes = std::slice::from_raw_parts(data as *const u8, size_in_bytes);
        resource.set_buffer_data(device, queue, bytes, offset as u64)
    })())
}

#[no_mangle]
pub unsafe extern "C" fn SableCreateRenderer(
    renderer: *mut *mut Renderer,
    logical_device: *const LogicalDevice,
    present_queue: *const CommandQueue,
    surface: *const Surface,
    swap_chain: *const SwapChain,
) -> ErrorCode {
    create(renderer, || {
        let device = required(logical_device, "logical device")?;
        let queue = required(present_queue, "present queue")?;
        let surface = required(surface, "surface")?;
        let swap_chain = required(swap_chain, "swap chain")?;
        Renderer::new(device, queue, surface, swap_chain)
    })
}

#[no_mangle]
pub unsafe extern "C" fn SableDestroyRenderer(renderer: *mut Renderer) {
    if !renderer.is_null() {
        drop(Box::from_raw(renderer));
    }
}

/// Open a frame; writes `true` through `out_open` when the frame is live,
/// `false` when it was skipped (iconified/occluded).
#[no_mangle]
pub unsafe extern "C" fn SableBeginFrame(
    renderer: *mut Renderer,
    out_open: *mut bool,
) -> ErrorCode {
    code_of((|| {
        let renderer = renderer
            .as_mut()
            .ok_or_else(|| Error::new(ErrorCode::InvalidPointer, "null renderer handle"))?;
        let open = renderer.begin_frame()?;
        if let Some(slot) = out_open.as_mut() {
            *slot = open;
        }
        Ok(())
    })())
}

#[no_mangle]
pub unsafe extern "C" fn SableEndFrame(renderer: *mut Renderer) -> ErrorCode {
    code_of((|| {
        let renderer = renderer
            .as_mut()
            .ok_or_else(|| Error::new(ErrorCode::InvalidPointer, "null renderer handle"))?;
        renderer.end_frame()
    })())
}

/// The calling thread's recorder for the current frame. The pointer stays
/// valid until the thread exits or the renderer is destroyed.
#[no_mangle]
pub unsafe extern "C" fn SableGetCommandObject(
    command_object: *mut *mut CommandObject,
    renderer: *const Renderer,
) -> ErrorCode {
    if command_object.is_null() {
        return Error::new(ErrorCode::InvalidPointer, "null out-pointer").commit();
    }
    code_of((|| {
        let renderer = required(renderer, "renderer")?;
        let ptr = renderer.command_object_ptr()?;
        *command_object = ptr;
        Ok(())
    })())
}

/// Last failing call's message on this thread, or null.
#[no_mangle]
pub extern "C" fn SableGetLastError() -> *const c_char {
    last_error_ptr()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_out_pointer_is_invalid_pointer() {
        let code = unsafe {
            SableCreatePhysicalDevice(std::ptr::null_mut(), std::ptr::null(), 1)
        };
        assert_eq!(code, ErrorCode::InvalidPointer);
    }

    #[test]
    fn unknown_api_is_invalid_parameter() {
        let mut out: *mut PhysicalDevice = std::ptr::null_mut();
        let code = unsafe { SableCreatePhysicalDevice(&mut out, std::ptr::null(), 99) };
        assert_eq!(code, ErrorCode::InvalidParameter);
        assert!(out.is_null());
        assert!(crate::last_error_message().is_some());
    }

    #[test]
    fn null_input_handles_are_reported() {
        let mut out: *mut LogicalDevice = std::ptr::null_mut();
        let code = unsafe { SableCreateLogicalDevice(&mut out, std::ptr::null()) };
        assert_eq!(code, ErrorCode::InvalidPointer);

        let mut queue: *mut CommandQueue = std::ptr::null_mut();
        let code = unsafe { SableCreateCommandQueue(&mut queue, std::ptr::null(), 0, 0) };
        assert_eq!(code, ErrorCode::InvalidPointer);
    }

    #[test]
    fn destroy_accepts_null() {
        unsafe {
            SableDestroyPhysicalDevice(std::ptr::null_mut());
            SableDestroyLogicalDevice(std::ptr::null_mut());
            SableDestroyRenderer(std::ptr::null_mut());
        }
    }
}
