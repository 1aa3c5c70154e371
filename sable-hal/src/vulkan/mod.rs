/*!
# Vulkan API internals.

## Stack memory

Ash expects slices, which we don't generally have available. We cope by
temporarily allocating `Vec` on the heap where overhead is permitted and by
keeping fixed-size `ArrayVec`s for the submit hot path.

## Render passes

The swap chain owns one render pass and one framebuffer per back-buffer
image; recorders receive a prefilled `RenderPassInfo` from the renderer when
they open a pass. Both are rebuilt with the swap chain on resize.

## Fences

Devices target Vulkan 1.3, so queue fences are timeline semaphores 1:1 with
the renderer's monotonically increasing fence values.
*/

mod command;
mod conv;
mod device;
mod instance;
mod memory;
mod queue;
mod surface;

use std::{
    ffi::CStr,
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use ash::{
    extensions::{ext, khr},
    vk,
};
use parking_lot::{Mutex, RwLock};

use crate::{
    pool::HeapChunk, shader::ShaderReflection, shader::VertexInputLayout, BindingGuard,
    DeviceError, StateTracker,
};

pub use command::{CommandEncoder, RenderPassInfo};
pub use device::OPEN_QUEUE_PRIORITIES;
pub use memory::MemoryPool;

const MILLIS_TO_NANOS: u64 = 1_000_000;

/// One second, the ceiling every renderer-side fence wait uses.
pub const FENCE_WAIT_TIMEOUT_NS: u64 = 1_000 * MILLIS_TO_NANOS;

struct DebugUtils {
    extension: ext::DebugUtils,
    messenger: vk::DebugUtilsMessengerEXT,
}

pub(super) struct InstanceShared {
    raw: ash::Instance,
    entry: ash::Entry,
    debug_utils: Option<DebugUtils>,
    /// The instance API version; device creation requires 1.3.
    instance_api_version: u32,
}

impl fmt::Debug for InstanceShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceShared")
            .field("instance_api_version", &self.instance_api_version)
            .finish()
    }
}

/// The ranked GPU adapter together with the instance it came from.
///
/// This is the backend object behind the public `PhysicalDevice`: it owns
/// the `VkInstance` and the debug messenger and is immutable once created.
pub struct Adapter {
    shared: Arc<InstanceShared>,
    raw: vk::PhysicalDevice,
    info: sbt::AdapterInfo,
    properties: vk::PhysicalDeviceProperties,
    queue_families: Vec<vk::QueueFamilyProperties>,
}

impl Adapter {
    /// Ranking information for this adapter.
    pub fn info(&self) -> &sbt::AdapterInfo {
        &self.info
    }
}

/// One queue family's allocation book-keeping.
///
/// Queue indices are handed out first-fit in ascending order under the
/// mutex; contending allocators are served in lock-acquisition order.
struct QueueSet {
    family_index: u32,
    kind: sbt::CommandObjectType,
    priorities: Vec<f32>,
    allocated: Mutex<Vec<bool>>,
}

pub(super) struct DeviceShared {
    raw: ash::Device,
    instance: Arc<InstanceShared>,
    physical_device: vk::PhysicalDevice,
    limits: vk::PhysicalDeviceLimits,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    queue_sets: Vec<QueueSet>,
    /// Set once a submit or present observes `VK_ERROR_DEVICE_LOST`.
    lost: AtomicBool,
}

impl DeviceShared {
    pub(super) fn mark_lost(&self) {
        if !self.lost.swap(true, Ordering::AcqRel) {
            log::error!(target: "sable::fatal", "Device removal triggered!");
        }
    }

    pub(super) fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }
}

impl fmt::Debug for DeviceShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceShared")
            .field("physical_device", &self.physical_device)
            .finish()
    }
}

/// The logical device: owns the `VkDevice`, the queue sets and the heap
/// pools.
pub struct Device {
    pub(super) shared: Arc<DeviceShared>,
    pools: memory::MemoryPools,
}

/// A typed command queue with its timeline semaphore.
pub struct Queue {
    raw: vk::Queue,
    device: Arc<DeviceShared>,
    family_index: u32,
    queue_index: u32,
    kind: sbt::CommandObjectType,
    /// Timeline semaphore carrying the queue's fence values.
    timeline: vk::Semaphore,
    /// Last value passed to `signal`.
    last_signaled: Mutex<crate::FenceValue>,
    swapchain_fn: khr::Swapchain,
}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue")
            .field("family_index", &self.family_index)
            .field("queue_index", &self.queue_index)
            .field("kind", &self.kind)
            .finish()
    }
}

/// A window wrapped in `VK_KHR_surface`, plus the swap chain built on it.
pub struct Surface {
    raw: vk::SurfaceKHR,
    functor: khr::Surface,
    instance: Arc<InstanceShared>,
    pub(super) swapchain: RwLock<Option<Swapchain>>,
    width: u32,
    height: u32,
}

pub(super) struct Swapchain {
    raw: vk::SwapchainKHR,
    functor: khr::Swapchain,
    device: Arc<DeviceShared>,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
    /// One semaphore per in-flight frame, waited by the frame's submit.
    acquire_semaphores: Vec<vk::Semaphore>,
    /// One semaphore per swapchain image, waited by present.
    present_semaphores: Vec<vk::Semaphore>,
}

/// A lease on pool memory, typed by usage and memory type.
pub struct VideoMemory {
    pool: Arc<MemoryPool>,
    chunk: HeapChunk,
    memory: vk::DeviceMemory,
    /// Base of the persistent map of the owning heap, when host-visible.
    mapped_base: Option<*mut u8>,
    size: u64,
    usage: sbt::VideoMemoryUsage,
    memory_type: sbt::VideoMemoryType,
    binding: BindingGuard,
}

// The mapped base pointer is only dereferenced behind `&mut self` writes.
unsafe impl Send for VideoMemory {}
unsafe impl Sync for VideoMemory {}

impl VideoMemory {
    /// Memory type of the lease.
    pub fn memory_type(&self) -> sbt::VideoMemoryType {
        self.memory_type
    }

    /// Usage of the lease.
    pub fn usage(&self) -> sbt::VideoMemoryUsage {
        self.usage
    }

    /// Size of the lease in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Number of live resources bound to this lease (0 or 1).
    pub fn live_resource_count(&self) -> usize {
        self.binding.live_count()
    }
}

impl Drop for VideoMemory {
    fn drop(&mut self) {
        // A still-bound resource keeps destruction parked until it drops.
        self.binding.wait_until_free();
        self.pool.free(self.chunk);
    }
}

#[derive(Clone, Copy, Debug)]
enum ResourceHandle {
    Buffer(vk::Buffer),
    Texture {
        image: vk::Image,
        view: vk::ImageView,
    },
}

/// A buffer or image placed inside a [`VideoMemory`] lease.
pub struct Resource {
    device: Arc<DeviceShared>,
    handle: ResourceHandle,
    width: u64,
    height: u64,
    depth: u64,
    ty: sbt::ResourceType,
    state: StateTracker,
    /// CPU pointer to the start of the resource, when host-visible.
    mapped: Option<*mut u8>,
    memory_type: sbt::VideoMemoryType,
    /// Clears the owning lease's binding flag on drop.
    binding: *const BindingGuard,
}

unsafe impl Send for Resource {}
unsafe impl Sync for Resource {}

impl Resource {
    /// Resource kind.
    pub fn resource_type(&self) -> sbt::ResourceType {
        self.ty
    }

    /// Dimensions as `(width, height, depth)`.
    pub fn extent(&self) -> (u64, u64, u64) {
        (self.width, self.height, self.depth)
    }

    /// Tracked abstract state, used by automatic barriers.
    pub fn state(&self) -> &StateTracker {
        &self.state
    }

    fn buffer_handle(&self) -> Option<vk::Buffer> {
        match self.handle {
            ResourceHandle::Buffer(raw) => Some(raw),
            ResourceHandle::Texture { .. } => None,
        }
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        unsafe {
            match self.handle {
                ResourceHandle::Buffer(raw) => self.device.raw.destroy_buffer(raw, None),
                ResourceHandle::Texture { image, view } => {
                    self.device.raw.destroy_image_view(view, None);
                    self.device.raw.destroy_image(image, None);
                }
            }
            // SAFETY: the `VideoMemory` this points into spin-waits on the
            // flag before freeing itself, so the guard outlives us.
            (*self.binding).release();
        }
    }
}

/// Compiled SPIR-V with its module and reflection.
pub struct ShaderLibrary {
    device: Arc<DeviceShared>,
    raw: vk::ShaderModule,
    spirv: Vec<u32>,
    reflection: ShaderReflection,
}

impl ShaderLibrary {
    /// Reflection of the module.
    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }

    /// The SPIR-V words the module was created from.
    pub fn spirv(&self) -> &[u32] {
        &self.spirv
    }
}

impl Drop for ShaderLibrary {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_shader_module(self.raw, None) };
    }
}

/// A graphics pipeline with its layout and set layouts.
pub struct PipelineState {
    device: Arc<DeviceShared>,
    raw: vk::Pipeline,
    layout: vk::PipelineLayout,
    set_layouts: Vec<vk::DescriptorSetLayout>,
    /// Input layout the pipeline was derived with; kept for validation.
    pub(super) vertex_layout: VertexInputLayout,
}

impl Drop for PipelineState {
    fn drop(&mut self) {
        unsafe {
            self.device.raw.destroy_pipeline(self.raw, None);
            self.device.raw.destroy_pipeline_layout(self.layout, None);
            for layout in self.set_layouts.drain(..) {
                self.device.raw.destroy_descriptor_set_layout(layout, None);
            }
        }
    }
}

/// A finished command buffer ready for submission.
#[derive(Clone, Copy, Debug)]
pub struct CommandBuffer {
    pub(super) raw: vk::CommandBuffer,
}

impl From<vk::Result> for DeviceError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                Self::OutOfMemory
            }
            vk::Result::ERROR_DEVICE_LOST => Self::Lost,
            _ => {
                log::warn!("unrecognized device error {result:?}");
                Self::Lost
            }
        }
    }
}

pub(super) fn cstr_from_bytes_until_nul(bytes: &[std::os::raw::c_char]) -> Option<&CStr> {
    if bytes.contains(&0) {
        // SAFETY: the slice contains a nul terminator.
        Some(unsafe { CStr::from_ptr(bytes.as_ptr()) })
    } else {
        None
    }
}
