//! The backend-dispatch layer.
//!
//! Every public object is a tagged sum over the concrete backend types.
//! Cross-object operations check that every argument carries the same tag
//! before any backend code runs; a mismatch is `Unsupported` with a
//! thread-local message, and no dynamic casts survive past this boundary.

use std::sync::Arc;

use parking_lot::Mutex;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};
use sbt::{Backend, ErrorCode};

use crate::error::{Error, SableResult};

/// Verify that every argument shares one backend tag; evaluates to the
/// common tag.
macro_rules! ensure_same_backend {
    ($op:expr, $first:expr $(, $rest:expr)* $(,)?) => {{
        let first = $first.backend();
        $(
            if $rest.backend() != first {
                return Err($crate::error::Error::backend_mismatch($op));
            }
        )*
        first
    }};
}
pub(crate) use ensure_same_backend;

pub(crate) enum AnyAdapter {
    #[cfg(feature = "vulkan")]
    Vulkan(hal::vulkan::Adapter),
    #[cfg(all(windows, feature = "dx12"))]
    Dx12(hal::dx12::Adapter),
    #[cfg(all(windows, feature = "gles"))]
    Gl(hal::gles::Adapter),
}

pub(crate) enum AnyDevice {
    #[cfg(feature = "vulkan")]
    Vulkan(hal::vulkan::Device),
    #[cfg(all(windows, feature = "dx12"))]
    Dx12(hal::dx12::Device),
    #[cfg(all(windows, feature = "gles"))]
    Gl(hal::gles::Device),
}

pub(crate) enum AnyQueue {
    #[cfg(feature = "vulkan")]
    Vulkan(hal::vulkan::Queue),
    #[cfg(all(windows, feature = "dx12"))]
    Dx12(hal::dx12::Queue),
    #[cfg(all(windows, feature = "gles"))]
    Gl(hal::gles::Queue),
}

pub(crate) enum AnySurface {
    #[cfg(feature = "vulkan")]
    Vulkan(hal::vulkan::Surface),
    #[cfg(all(windows, feature = "dx12"))]
    Dx12(hal::dx12::Surface),
    #[cfg(all(windows, feature = "gles"))]
    Gl(hal::gles::Surface),
}

pub(crate) enum AnyShaderLibrary {
    #[cfg(feature = "vulkan")]
    Vulkan(hal::vulkan::ShaderLibrary),
    #[cfg(all(windows, feature = "dx12"))]
    Dx12(hal::dx12::ShaderLibrary),
    #[cfg(all(windows, feature = "gles"))]
    Gl(hal::gles::ShaderLibrary),
}

pub(crate) enum AnyVideoMemory {
    #[cfg(feature = "vulkan")]
    Vulkan(hal::vulkan::VideoMemory),
    #[cfg(all(windows, feature = "dx12"))]
    Dx12(hal::dx12::VideoMemory),
    #[cfg(all(windows, feature = "gles"))]
    Gl(hal::gles::VideoMemory),
}

pub(crate) enum AnyResource {
    #[cfg(feature = "vulkan")]
    Vulkan(hal::vulkan::Resource),
    #[cfg(all(windows, feature = "dx12"))]
    Dx12(hal::dx12::Resource),
    #[cfg(all(windows, feature = "gles"))]
    Gl(hal::gles::Resource),
}

pub(crate) enum AnyPipeline {
    #[cfg(feature = "vulkan")]
    Vulkan(hal::vulkan::PipelineState),
    #[cfg(all(windows, feature = "dx12"))]
    Dx12(hal::dx12::PipelineState),
    #[cfg(all(windows, feature = "gles"))]
    Gl(hal::gles::PipelineState),
}

pub(crate) enum AnyEncoder {
    #[cfg(feature = "vulkan")]
    Vulkan(hal::vulkan::CommandEncoder),
    #[cfg(all(windows, feature = "dx12"))]
    Dx12(hal::dx12::CommandEncoder),
    #[cfg(all(windows, feature = "gles"))]
    Gl(hal::gles::CommandEncoder),
}

pub(crate) enum AnyCommandBuffer {
    #[cfg(feature = "vulkan")]
    Vulkan(hal::vulkan::CommandBuffer),
    #[cfg(all(windows, feature = "dx12"))]
    Dx12(hal::dx12::CommandBuffer),
    #[cfg(all(windows, feature = "gles"))]
    Gl(hal::gles::CommandBuffer),
}

/// Prefilled per-frame render-pass information produced by the renderer.
pub(crate) enum AnyFrameOutput {
    #[cfg(feature = "vulkan")]
    Vulkan(hal::vulkan::RenderPassInfo),
    #[cfg(all(windows, feature = "dx12"))]
    Dx12(hal::dx12::OutputTarget),
    #[cfg(all(windows, feature = "gles"))]
    Gl { extent: (u32, u32) },
}

/// The GPU adapter chosen by ranking, plus the instance/factory and debug
/// machinery it owns. One per process per backend.
pub struct PhysicalDevice {
    pub(crate) inner: AnyAdapter,
    backend: Backend,
}

impl PhysicalDevice {
    /// Create the backend instance for `api` and pick the best adapter.
    pub fn new(options: &sbt::InitOptions, api: Backend) -> SableResult<Self> {
        let backend = api.resolve();
        let inner = match backend {
            #[cfg(feature = "vulkan")]
            Backend::Vulkan => AnyAdapter::Vulkan(hal::vulkan::Adapter::create(options)?),
            #[cfg(all(windows, feature = "dx12"))]
            Backend::DirectX12 => AnyAdapter::Dx12(hal::dx12::Adapter::create(options)?),
            #[cfg(all(windows, feature = "gles"))]
            Backend::OpenGl => AnyAdapter::Gl(hal::gles::Adapter::create(options)?),
            other => {
                return Err(Error::new(
                    ErrorCode::Unsupported,
                    format!("no {} backend in this build", other.to_str()),
                ))
            }
        };
        log::info!("created physical device on the {} backend", backend.to_str());
        Ok(Self { inner, backend })
    }

    /// The backend tag every derived object must share.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Ranking information for the chosen adapter.
    pub fn adapter_info(&self) -> &sbt::AdapterInfo {
        match &self.inner {
            #[cfg(feature = "vulkan")]
            AnyAdapter::Vulkan(adapter) => adapter.info(),
            #[cfg(all(windows, feature = "dx12"))]
            AnyAdapter::Dx12(adapter) => adapter.info(),
            #[cfg(all(windows, feature = "gles"))]
            AnyAdapter::Gl(adapter) => adapter.info(),
        }
    }
}

/// The virtual device with its queues, allocator and watchdogs.
#[derive(Clone)]
pub struct LogicalDevice {
    pub(crate) inner: Arc<AnyDevice>,
    backend: Backend,
}

impl LogicalDevice {
    /// Open the logical device on `physical`'s adapter.
    pub fn new(physical: &PhysicalDevice) -> SableResult<Self> {
        let inner = match &physical.inner {
            #[cfg(feature = "vulkan")]
            AnyAdapter::Vulkan(adapter) => AnyDevice::Vulkan(adapter.open()?),
            #[cfg(all(windows, feature = "dx12"))]
            AnyAdapter::Dx12(adapter) => AnyDevice::Dx12(adapter.open()?),
            #[cfg(all(windows, feature = "gles"))]
            AnyAdapter::Gl(adapter) => AnyDevice::Gl(adapter.open()?),
        };
        Ok(Self {
            inner: Arc::new(inner),
            backend: physical.backend,
        })
    }

    /// The backend tag.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Whether the device observed a fatal removal event.
    pub fn is_lost(&self) -> bool {
        match &*self.inner {
            #[cfg(feature = "vulkan")]
            AnyDevice::Vulkan(device) => device.is_lost(),
            #[cfg(all(windows, feature = "dx12"))]
            AnyDevice::Dx12(device) => device.is_lost(),
            #[cfg(all(windows, feature = "gles"))]
            AnyDevice::Gl(device) => device.is_lost(),
        }
    }
}

/// A typed command queue with a fence counter and CPU-side event.
#[derive(Clone)]
pub struct CommandQueue {
    pub(crate) inner: Arc<AnyQueue>,
    backend: Backend,
    kind: sbt::CommandObjectType,
}

impl CommandQueue {
    /// Allocate a queue of `kind` at `priority` on `device`.
    pub fn new(
        device: &LogicalDevice,
        kind: sbt::CommandObjectType,
        priority: sbt::QueuePriority,
    ) -> SableResult<Self> {
        let inner = match &*device.inner {
            #[cfg(feature = "vulkan")]
            AnyDevice::Vulkan(raw) => AnyQueue::Vulkan(raw.create_queue(kind, priority)?),
            #[cfg(all(windows, feature = "dx12"))]
            AnyDevice::Dx12(raw) => AnyQueue::Dx12(raw.create_queue(kind, priority)?),
            #[cfg(all(windows, feature = "gles"))]
            AnyDevice::Gl(raw) => AnyQueue::Gl(raw.create_queue(kind, priority)?),
        };
        Ok(Self {
            inner: Arc::new(inner),
            backend: device.backend,
            kind,
        })
    }

    /// The backend tag.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// The kind of commands the queue accepts.
    pub fn kind(&self) -> sbt::CommandObjectType {
        self.kind
    }

    /// GPU-side signal of `value` on the queue's fence.
    pub fn signal(&self, value: u64) -> SableResult<()> {
        match &*self.inner {
            #[cfg(feature = "vulkan")]
            AnyQueue::Vulkan(queue) => queue.signal(value)?,
            #[cfg(all(windows, feature = "dx12"))]
            AnyQueue::Dx12(queue) => queue.signal(value)?,
            #[cfg(all(windows, feature = "gles"))]
            AnyQueue::Gl(queue) => queue.signal(value)?,
        }
        Ok(())
    }

    /// CPU-side wait until `value` completes; `false` on timeout.
    pub fn wait(&self, value: u64) -> SableResult<bool> {
        let done = match &*self.inner {
            #[cfg(feature = "vulkan")]
            AnyQueue::Vulkan(queue) => queue.wait(value, hal::vulkan::FENCE_WAIT_TIMEOUT_NS)?,
            #[cfg(all(windows, feature = "dx12"))]
            AnyQueue::Dx12(queue) => queue.wait(value, hal::dx12::FENCE_WAIT_TIMEOUT_MS)?,
            #[cfg(all(windows, feature = "gles"))]
            AnyQueue::Gl(queue) => queue.wait(value, 1_000)?,
        };
        Ok(done)
    }

    /// Drain the queue.
    pub fn flush(&self) -> SableResult<()> {
        match &*self.inner {
            #[cfg(feature = "vulkan")]
            AnyQueue::Vulkan(queue) => queue.flush()?,
            #[cfg(all(windows, feature = "dx12"))]
            AnyQueue::Dx12(queue) => queue.flush()?,
            #[cfg(all(windows, feature = "gles"))]
            AnyQueue::Gl(queue) => queue.flush()?,
        }
        Ok(())
    }
}

/// Raw handles to a platform window, provided by the windowing
/// collaborator.
#[derive(Clone, Copy)]
pub struct WindowHandles {
    /// Display/connection handle.
    pub display: RawDisplayHandle,
    /// Window handle.
    pub window: RawWindowHandle,
}

// Raw handles are plain pointers the backends consume on the main thread.
unsafe impl Send for WindowHandles {}
unsafe impl Sync for WindowHandles {}

/// A platform window wrapped in the backend's window-system interface.
pub struct Surface {
    pub(crate) inner: Arc<AnySurface>,
    backend: Backend,
    extent: Mutex<(u32, u32)>,
    pub(crate) handles: WindowHandles,
}

impl Surface {
    /// Create a window of `width`×`height` through the registered
    /// [`WindowSource`](crate::WindowSource) and wrap it.
    pub fn new(
        physical: &PhysicalDevice,
        width: u32,
        height: u32,
        flags: sbt::SurfaceFlags,
    ) -> SableResult<Self> {
        let handles = crate::window::create_window(width, height, flags)?;
        Self::from_handles(physical, handles, width, height, flags)
    }

    /// Wrap the window behind `handles`.
    pub fn from_handles(
        physical: &PhysicalDevice,
        handles: WindowHandles,
        width: u32,
        height: u32,
        flags: sbt::SurfaceFlags,
    ) -> SableResult<Self> {
        if width == 0 || height == 0 {
            return Err(Error::new(
                ErrorCode::InvalidParameter,
                "surface extent must be non-zero",
            ));
        }
        let inner = match &physical.inner {
            #[cfg(feature = "vulkan")]
            AnyAdapter::Vulkan(adapter) => AnySurface::Vulkan(adapter.create_surface(
                handles.display,
                handles.window,
                width,
                height,
                flags,
            )?),
            #[cfg(all(windows, feature = "dx12"))]
            AnyAdapter::Dx12(adapter) => {
                let RawWindowHandle::Win32(win32) = handles.window else {
                    return Err(Error::new(
                        ErrorCode::InvalidParameter,
                        "the dx12 backend needs a Win32 window handle",
                    ));
                };
                AnySurface::Dx12(adapter.create_surface(win32.hwnd, width, height)?)
            }
            #[cfg(all(windows, feature = "gles"))]
            AnyAdapter::Gl(adapter) => {
                let RawWindowHandle::Win32(win32) = handles.window else {
                    return Err(Error::new(
                        ErrorCode::InvalidParameter,
                        "the gl backend needs a Win32 window handle",
                    ));
                };
                AnySurface::Gl(adapter.create_surface(win32.hwnd, width, height)?)
            }
        };
        Ok(Self {
            inner: Arc::new(inner),
            backend: physical.backend,
            extent: Mutex::new((width, height)),
            handles,
        })
    }

    /// The backend tag.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Current window extent in pixels.
    pub fn extent(&self) -> (u32, u32) {
        *self.extent.lock()
    }

    /// Record a resize; the renderer rebuilds the swap chain on the next
    /// frame boundary.
    pub fn set_extent(&self, width: u32, height: u32) {
        *self.extent.lock() = (width, height);
    }

    /// Update the window title through the platform collaborator.
    pub fn set_title(&self, title: &str) -> SableResult<()> {
        match &*self.inner {
            #[cfg(all(windows, feature = "dx12"))]
            AnySurface::Dx12(surface) => {
                surface.set_title(title)?;
                return Ok(());
            }
            _ => {}
        }
        crate::window::set_title_via_source(&self.handles, title)
    }

    /// Whether the platform reports the window iconified.
    pub fn is_iconified(&self) -> bool {
        match &*self.inner {
            #[cfg(all(windows, feature = "dx12"))]
            AnySurface::Dx12(surface) => surface.is_iconified(),
            #[cfg(all(windows, feature = "gles"))]
            AnySurface::Gl(surface) => surface.is_iconified(),
            _ => {
                let (width, height) = self.extent();
                width == 0 || height == 0
            }
        }
    }
}

/// The ordered ring of back buffers over a surface.
pub struct SwapChain {
    backend: Backend,
    buffer_count: u32,
}

impl SwapChain {
    /// Build the ring; all four participants must share one backend.
    pub fn new(
        physical: &PhysicalDevice,
        device: &LogicalDevice,
        present_queue: &CommandQueue,
        surface: &Surface,
        buffer_count: u32,
    ) -> SableResult<Self> {
        let backend =
            ensure_same_backend!("CreateSwapChain", physical, device, present_queue, surface);
        let buffer_count = if buffer_count == 0 {
            hal::DEFAULT_BUFFER_COUNT
        } else {
            buffer_count
        };
        let (width, height) = surface.extent();
        let config = hal::SurfaceConfiguration {
            width,
            height,
            buffer_count,
            vsync: true,
        };

        match (&*device.inner, &*surface.inner) {
            #[cfg(feature = "vulkan")]
            (AnyDevice::Vulkan(device), AnySurface::Vulkan(surface)) => {
                surface.configure(device, &config)?;
            }
            #[cfg(all(windows, feature = "dx12"))]
            (AnyDevice::Dx12(device), AnySurface::Dx12(surface)) => {
                let AnyQueue::Dx12(queue) = &*present_queue.inner else {
                    return Err(Error::backend_mismatch("CreateSwapChain"));
                };
                surface.configure(device, queue, &config)?;
            }
            #[cfg(all(windows, feature = "gles"))]
            (AnyDevice::Gl(device), AnySurface::Gl(surface)) => {
                device.bind_surface(surface);
            }
            #[allow(unreachable_patterns)]
            _ => return Err(Error::backend_mismatch("CreateSwapChain")),
        }

        Ok(Self {
            backend,
            buffer_count,
        })
    }

    /// The backend tag.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Number of back buffers in the ring.
    pub fn buffer_count(&self) -> u32 {
        self.buffer_count
    }
}

/// Compiled GPU code plus reflection metadata.
pub struct ShaderLibrary {
    pub(crate) inner: Arc<AnyShaderLibrary>,
    backend: Backend,
}

impl ShaderLibrary {
    /// Compile `source` for `stage` on `device`'s backend.
    pub fn new(
        device: &LogicalDevice,
        source: &[u8],
        stage: sbt::ShaderStage,
        language: sbt::ShaderLanguage,
    ) -> SableResult<Self> {
        if source.is_empty() {
            return Err(Error::new(
                ErrorCode::InvalidParameter,
                "shader source is empty",
            ));
        }
        let inner = match &*device.inner {
            #[cfg(feature = "vulkan")]
            AnyDevice::Vulkan(raw) => {
                AnyShaderLibrary::Vulkan(raw.create_shader_library(source, stage, language)?)
            }
            #[cfg(all(windows, feature = "dx12"))]
            AnyDevice::Dx12(raw) => {
                AnyShaderLibrary::Dx12(raw.create_shader_library(source, stage, language)?)
            }
            #[cfg(all(windows, feature = "gles"))]
            AnyDevice::Gl(raw) => {
                AnyShaderLibrary::Gl(raw.create_shader_library(source, stage, language)?)
            }
        };
        Ok(Self {
            inner: Arc::new(inner),
            backend: device.backend,
        })
    }

    /// The backend tag.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Reflection of the compiled module.
    pub fn reflection(&self) -> &hal::shader::ShaderReflection {
        match &*self.inner {
            #[cfg(feature = "vulkan")]
            AnyShaderLibrary::Vulkan(library) => library.reflection(),
            #[cfg(all(windows, feature = "dx12"))]
            AnyShaderLibrary::Dx12(library) => library.reflection(),
            #[cfg(all(windows, feature = "gles"))]
            AnyShaderLibrary::Gl(library) => library.reflection(),
        }
    }
}

/// A lease on bytes from a heap pool.
pub struct VideoMemory {
    pub(crate) inner: Arc<AnyVideoMemory>,
    pub(crate) device: Arc<AnyDevice>,
    backend: Backend,
}

impl VideoMemory {
    /// Lease `size` bytes typed by `usage` and `memory_type`.
    pub fn allocate(
        device: &LogicalDevice,
        size: u64,
        usage: sbt::VideoMemoryUsage,
        memory_type: sbt::VideoMemoryType,
    ) -> SableResult<Self> {
        if size == 0 {
            return Err(Error::new(
                ErrorCode::InvalidParameter,
                "video memory size must be non-zero",
            ));
        }
        let inner = match &*device.inner {
            #[cfg(feature = "vulkan")]
            AnyDevice::Vulkan(raw) => {
                AnyVideoMemory::Vulkan(raw.allocate_video_memory(size, usage, memory_type)?)
            }
            #[cfg(all(windows, feature = "dx12"))]
            AnyDevice::Dx12(raw) => {
                AnyVideoMemory::Dx12(raw.allocate_video_memory(size, usage, memory_type)?)
            }
            #[cfg(all(windows, feature = "gles"))]
            AnyDevice::Gl(raw) => {
                AnyVideoMemory::Gl(raw.allocate_video_memory(size, usage, memory_type)?)
            }
        };
        Ok(Self {
            inner: Arc::new(inner),
            device: Arc::clone(&device.inner),
            backend: device.backend,
        })
    }

    /// The backend tag.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Number of live resources bound to the lease, `0` or `1`.
    pub fn live_resource_count(&self) -> usize {
        match &*self.inner {
            #[cfg(feature = "vulkan")]
            AnyVideoMemory::Vulkan(memory) => memory.live_resource_count(),
            #[cfg(all(windows, feature = "dx12"))]
            AnyVideoMemory::Dx12(memory) => memory.live_resource_count(),
            #[cfg(all(windows, feature = "gles"))]
            AnyVideoMemory::Gl(memory) => memory.live_resource_count(),
        }
    }
}

/// A buffer or image backed by a [`VideoMemory`] region.
pub struct Resource {
    pub(crate) inner: AnyResource,
    /// Keeps the lease (and its binding guard) alive for our lifetime.
    #[allow(dead_code)]
    memory: Arc<AnyVideoMemory>,
    backend: Backend,
}

impl Resource {
    /// Place a resource of `ty` inside `memory`.
    pub fn new(
        memory: &VideoMemory,
        width: u64,
        height: u64,
        depth: u64,
        ty: sbt::ResourceType,
    ) -> SableResult<Self> {
        let inner = match (&*memory.device, &*memory.inner) {
            #[cfg(feature = "vulkan")]
            (AnyDevice::Vulkan(device), AnyVideoMemory::Vulkan(raw)) => {
                AnyResource::Vulkan(device.create_resource(raw, width, height, depth, ty)?)
            }
            #[cfg(all(windows, feature = "dx12"))]
            (AnyDevice::Dx12(device), AnyVideoMemory::Dx12(raw)) => {
                AnyResource::Dx12(device.create_resource(raw, width, height, depth, ty)?)
            }
            #[cfg(all(windows, feature = "gles"))]
            (AnyDevice::Gl(device), AnyVideoMemory::Gl(raw)) => {
                AnyResource::Gl(device.create_resource(raw, width, height, depth, ty)?)
            }
            #[allow(unreachable_patterns)]
            _ => return Err(Error::backend_mismatch("CreateResource")),
        };
        Ok(Self {
            inner,
            memory: Arc::clone(&memory.inner),
            backend: memory.backend,
        })
    }

    /// The backend tag.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Upload `data` at `offset`. Host-visible memory takes the mapped
    /// path; device-local memory stages through `copy_queue` and blocks.
    pub fn set_buffer_data(
        &mut self,
        device: &LogicalDevice,
        copy_queue: &CommandQueue,
        data: &[u8],
        offset: u64,
    ) -> SableResult<()> {
        ensure_same_backend!("SetBufferData", self, device, copy_queue);
        match (&*device.inner, &mut self.inner, &*copy_queue.inner) {
            #[cfg(feature = "vulkan")]
            (AnyDevice::Vulkan(device), AnyResource::Vulkan(resource), AnyQueue::Vulkan(queue)) => {
                device.set_buffer_data(resource, queue, data, offset)?;
            }
            #[cfg(all(windows, feature = "dx12"))]
            (AnyDevice::Dx12(device), AnyResource::Dx12(resource), AnyQueue::Dx12(queue)) => {
                device.set_buffer_data(resource, queue, data, offset)?;
            }
            #[cfg(all(windows, feature = "gles"))]
            (AnyDevice::Gl(device), AnyResource::Gl(resource), AnyQueue::Gl(queue)) => {
                device.set_buffer_data(resource, queue, data, offset)?;
            }
            #[allow(unreachable_patterns)]
            _ => return Err(Error::backend_mismatch("SetBufferData")),
        }
        Ok(())
    }
}

/// A compiled pipeline-state object.
pub struct PipelineState {
    pub(crate) inner: Arc<AnyPipeline>,
    backend: Backend,
}

impl PipelineState {
    pub(crate) fn from_parts(inner: AnyPipeline, backend: Backend) -> Self {
        Self {
            inner: Arc::new(inner),
            backend,
        }
    }

    /// The backend tag.
    pub fn backend(&self) -> Backend {
        self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Tagged(Backend);
    impl Tagged {
        fn backend(&self) -> Backend {
            self.0
        }
    }

    fn check(op: &str, a: &Tagged, b: &Tagged) -> SableResult<Backend> {
        Ok(ensure_same_backend!(op, a, b))
    }

    #[test]
    fn mismatched_tags_are_unsupported() {
        let vulkan = Tagged(Backend::Vulkan);
        let dx12 = Tagged(Backend::DirectX12);
        let err = check("CreateSwapChain", &vulkan, &dx12).unwrap_err();
        assert_eq!(err.code, ErrorCode::Unsupported);
        assert!(err.message.contains("CreateSwapChain"));
        assert_eq!(
            check("CreateSwapChain", &vulkan, &Tagged(Backend::Vulkan)).unwrap(),
            Backend::Vulkan
        );
    }
}
