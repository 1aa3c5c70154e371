/*!
# DirectX 12 API internals.

## Swap chain

Flip-discard with a frame-latency waitable object; `BeginFrame` waits on
that handle together with the per-frame fence event in one
`WaitForMultipleObjects` all-of wait. Occlusion is probed with
`Present(0, DXGI_PRESENT_TEST)` after a present reports
`DXGI_STATUS_OCCLUDED`.

## Memory

Placed resources over `ID3D12Heap` blocks sub-allocated by the shared
best-fit pool. `UPLOAD` and `READBACK` heaps are persistently mapped at
heap granularity.

## Device removal

A watcher thread parks on a fence event signalled at `UINT64_MAX` on
removal, then walks DRED breadcrumbs and page-fault allocations at `Fatal`
severity. The DRED interfaces missing from `winapi` are declared in
[`dred`].
*/

mod command;
mod conv;
mod descriptor;
mod device;
pub(crate) mod dred;
mod instance;
mod window;

use std::{borrow::Cow, fmt, sync::Arc};

use parking_lot::Mutex;
use winapi::{
    shared::{dxgi1_4, windef, winerror},
    um::d3d12,
};

use crate::{
    pool::HeapChunk, shader::ShaderReflection, shader::VertexInputLayout, BindingGuard,
    DeviceError, StateTracker,
};

pub use command::{CommandEncoder, OutputTarget};
pub use device::MemoryPool;

/// Milliseconds every renderer-side fence wait is capped at.
pub const FENCE_WAIT_TIMEOUT_MS: u32 = 1_000;

pub(crate) trait HResult<O> {
    fn into_result(self) -> Result<O, Cow<'static, str>>;
    fn into_device_result(self, description: &str) -> Result<O, DeviceError>;
}

impl HResult<()> for i32 {
    fn into_result(self) -> Result<(), Cow<'static, str>> {
        if self >= 0 {
            return Ok(());
        }
        let description = match self {
            winerror::E_UNEXPECTED => "unexpected",
            winerror::E_NOTIMPL => "not implemented",
            winerror::E_OUTOFMEMORY => "out of memory",
            winerror::E_INVALIDARG => "invalid argument",
            _ => return Err(Cow::Owned(format!("0x{:X}", self as u32))),
        };
        Err(Cow::Borrowed(description))
    }

    fn into_device_result(self, description: &str) -> Result<(), DeviceError> {
        self.into_result().map_err(|err| {
            log::error!("{} failed: {}", description, err);
            if self == winerror::E_OUTOFMEMORY {
                DeviceError::OutOfMemory
            } else {
                DeviceError::Lost
            }
        })
    }
}

impl<T> HResult<T> for (T, i32) {
    fn into_result(self) -> Result<T, Cow<'static, str>> {
        self.1.into_result().map(|()| self.0)
    }
    fn into_device_result(self, description: &str) -> Result<T, DeviceError> {
        self.1.into_device_result(description).map(|()| self.0)
    }
}

/// The ranked DXGI adapter together with the factory it came from.
///
/// This is the backend object behind the public `PhysicalDevice`.
pub struct Adapter {
    factory: native::Factory4,
    raw: native::WeakPtr<winapi::shared::dxgi::IDXGIAdapter1>,
    library: Arc<native::D3D12Lib>,
    lib_dxgi: native::DxgiLib,
    info: sbt::AdapterInfo,
    debug_enabled: bool,
}

unsafe impl Send for Adapter {}
unsafe impl Sync for Adapter {}

impl Adapter {
    /// Ranking information for this adapter.
    pub fn info(&self) -> &sbt::AdapterInfo {
        &self.info
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        unsafe {
            self.raw.destroy();
            self.factory.destroy();
        }
    }
}

pub(super) struct DeviceShared {
    raw: native::Device,
    /// Keeps d3d12.dll loaded for the device's lifetime.
    #[allow(dead_code)]
    library: Arc<native::D3D12Lib>,
    removed_watcher: Mutex<Option<dred::RemovedWatcher>>,
    lost: std::sync::atomic::AtomicBool,
}

unsafe impl Send for DeviceShared {}
unsafe impl Sync for DeviceShared {}

impl DeviceShared {
    pub(super) fn mark_lost(&self) {
        self.lost.store(true, std::sync::atomic::Ordering::Release);
    }

    pub(super) fn is_lost(&self) -> bool {
        self.lost.load(std::sync::atomic::Ordering::Acquire)
    }
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        if let Some(watcher) = self.removed_watcher.lock().take() {
            watcher.shut_down();
        }
        unsafe { self.raw.destroy() };
    }
}

/// The logical device: `ID3D12Device`, heap pools and descriptor pools.
pub struct Device {
    pub(super) shared: Arc<DeviceShared>,
    pools: device::MemoryPools,
    rtv_pool: Mutex<descriptor::CpuPool>,
    rtv_lookup: Mutex<Vec<descriptor::Handle>>,
}

unsafe impl Send for Device {}
unsafe impl Sync for Device {}

/// A typed command queue with its fence and CPU event.
pub struct Queue {
    raw: native::CommandQueue,
    device: Arc<DeviceShared>,
    kind: sbt::CommandObjectType,
    fence: native::Fence,
    event: native::Event,
    last_signaled: Mutex<crate::FenceValue>,
}

unsafe impl Send for Queue {}
unsafe impl Sync for Queue {}

impl fmt::Debug for Queue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Queue").field("kind", &self.kind).finish()
    }
}

pub(super) struct SwapChain {
    raw: native::WeakPtr<dxgi1_4::IDXGISwapChain3>,
    resources: Vec<native::Resource>,
    rtv_handles: Vec<d3d12::D3D12_CPU_DESCRIPTOR_HANDLE>,
    waitable: winapi::um::winnt::HANDLE,
    extent: (u32, u32),
}

/// An HWND wrapped for DXGI, plus the swap chain built on it.
pub struct Surface {
    factory: native::Factory4,
    wnd_handle: windef::HWND,
    pub(super) swap_chain: parking_lot::RwLock<Option<SwapChain>>,
    width: u32,
    height: u32,
}

unsafe impl Send for Surface {}
unsafe impl Sync for Surface {}

/// A lease on pool memory.
pub struct VideoMemory {
    pool: Arc<MemoryPool>,
    chunk: HeapChunk,
    heap: native::WeakPtr<d3d12::ID3D12Heap>,
    size: u64,
    usage: sbt::VideoMemoryUsage,
    memory_type: sbt::VideoMemoryType,
    binding: BindingGuard,
}

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
        self.binding.wait_until_free();
        self.pool.free(self.chunk);
    }
}

/// A placed buffer or texture inside a [`VideoMemory`] lease.
pub struct Resource {
    raw: native::Resource,
    width: u64,
    height: u64,
    depth: u64,
    ty: sbt::ResourceType,
    state: StateTracker,
    /// CPU pointer to the resource when the lease is host-visible.
    mapped: Option<*mut u8>,
    memory_type: sbt::VideoMemoryType,
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

    fn gpu_address(&self) -> u64 {
        unsafe { self.raw.GetGPUVirtualAddress() }
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        unsafe {
            if self.mapped.is_some() {
                self.raw.Unmap(0, std::ptr::null());
            }
            self.raw.destroy();
            (*self.binding).release();
        }
    }
}

/// Compiled DXIL with its reflection; GLSL submissions carry the SPIR-V
/// they were cross-compiled from.
pub struct ShaderLibrary {
    dxil: Vec<u8>,
    reflection: ShaderReflection,
    spirv: Option<Vec<u32>>,
}

impl ShaderLibrary {
    /// Reflection of the module.
    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }

    /// The SPIR-V this module was cross-compiled from, when the source
    /// language was GLSL or SPIR-V.
    pub fn spirv(&self) -> Option<&[u32]> {
        self.spirv.as_deref()
    }

    /// The DXIL bytecode.
    pub fn dxil(&self) -> &[u8] {
        &self.dxil
    }
}

/// Root signature + pipeline state, the (root-signature, pipeline-state)
/// pair of the data model.
pub struct PipelineState {
    root_signature: native::RootSignature,
    raw: native::PipelineState,
    pub(super) vertex_layout: VertexInputLayout,
    topology: d3d12::D3D12_PRIMITIVE_TOPOLOGY,
}

unsafe impl Send for PipelineState {}
unsafe impl Sync for PipelineState {}

impl Drop for PipelineState {
    fn drop(&mut self) {
        unsafe {
            self.raw.destroy();
            self.root_signature.destroy();
        }
    }
}

/// A closed command list ready for submission.
#[derive(Clone, Copy)]
pub struct CommandBuffer {
    pub(super) raw: native::GraphicsCommandList,
}

unsafe impl Send for CommandBuffer {}
unsafe impl Sync for CommandBuffer {}

impl fmt::Debug for CommandBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandBuffer").finish()
    }
}
