/*!
# OpenGL 4.5 API internals.

## Command translation

GL has no native command lists, so recorders build a CPU-side stream of
[`GlCommand`]s that the queue replays on the context thread at submit.
Draws select one of four `glDrawElements*` entry points from the feature
triple `(instanced, base_vertex, base_instance)`.

## Context

One WGL context per device, created over the surface's window with an
overridable pixel-format request. The context is current on the thread
that created the device; submission and present must happen there.
*/

mod command;
mod device;
mod wgl;

use std::sync::Arc;

use parking_lot::Mutex;

use crate::{shader::ShaderReflection, shader::VertexInputLayout, BindingGuard, StateTracker};

pub use command::{CommandEncoder, GlCommand};
pub use wgl::PixelFormatRequest;

pub(super) struct GlShared {
    pub(super) gl: glow::Context,
    context: wgl::WglContext,
    /// Fence values are retired by `glFinish` at wait time.
    completed: Mutex<crate::FenceValue>,
}

// The context is only touched from the thread it was created on; the
// renderer upholds that contract.
unsafe impl Send for GlShared {}
unsafe impl Sync for GlShared {}

/// The "adapter": renderer/vendor strings queried from a probe context.
pub struct Adapter {
    info: sbt::AdapterInfo,
    pixel_format: PixelFormatRequest,
}

impl Adapter {
    /// Ranking information for this adapter.
    pub fn info(&self) -> &sbt::AdapterInfo {
        &self.info
    }

    /// Pixel-format attributes used for surfaces of this adapter.
    pub fn pixel_format(&self) -> &PixelFormatRequest {
        &self.pixel_format
    }

    /// Override the default pixel-format attributes.
    pub fn set_pixel_format(&mut self, request: PixelFormatRequest) {
        self.pixel_format = request;
    }
}

/// The logical device: the GL 4.5 context and function table.
pub struct Device {
    pub(super) shared: Arc<GlShared>,
}

/// A typed queue; GL serializes everything onto the context thread, so
/// the queue only carries the kind tag and the fence counter.
pub struct Queue {
    device: Arc<GlShared>,
    kind: sbt::CommandObjectType,
    last_signaled: Mutex<crate::FenceValue>,
}

/// The window the context presents into.
pub struct Surface {
    pub(super) hwnd: winapi::shared::windef::HWND,
    pub(super) hdc: winapi::shared::windef::HDC,
    width: u32,
    height: u32,
    buffer_count: u32,
}

unsafe impl Send for Surface {}
unsafe impl Sync for Surface {}

impl Surface {
    /// Size the surface was created with, updated on resize.
    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Record a new window size; GL needs only the viewport updated.
    pub fn set_extent(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    /// Number of buffers in the (driver-managed) ring.
    pub fn image_count(&self) -> usize {
        self.buffer_count as usize
    }

    /// Whether the window is iconified (minimized).
    pub fn is_iconified(&self) -> bool {
        unsafe { winapi::um::winuser::IsIconic(self.hwnd) != 0 }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        unsafe { winapi::um::winuser::ReleaseDC(self.hwnd, self.hdc) };
    }
}

/// A lease of `size` bytes; GL buffer objects own their storage, so the
/// lease only enforces the binding invariant and sizing.
pub struct VideoMemory {
    size: u64,
    usage: sbt::VideoMemoryUsage,
    memory_type: sbt::VideoMemoryType,
    binding: BindingGuard,
}

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
    }
}

#[derive(Clone, Copy, Debug)]
pub(super) enum GlHandle {
    Buffer(glow::Buffer),
    Texture(glow::Texture),
}

/// A buffer or texture object.
pub struct Resource {
    device: Arc<GlShared>,
    pub(super) handle: GlHandle,
    width: u64,
    height: u64,
    depth: u64,
    ty: sbt::ResourceType,
    state: StateTracker,
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

    /// Tracked abstract state; barriers translate to `glMemoryBarrier`
    /// or a no-op on this backend.
    pub fn state(&self) -> &StateTracker {
        &self.state
    }
}

impl Drop for Resource {
    fn drop(&mut self) {
        use glow::HasContext as _;
        unsafe {
            match self.handle {
                GlHandle::Buffer(buffer) => self.device.gl.delete_buffer(buffer),
                GlHandle::Texture(texture) => self.device.gl.delete_texture(texture),
            }
            (*self.binding).release();
        }
    }
}

/// GLSL source kept for program linking, plus reflection over the
/// SPIR-V the front-end produced for it.
pub struct ShaderLibrary {
    pub(super) source: String,
    pub(super) stage: sbt::ShaderStage,
    spirv: Vec<u32>,
    reflection: ShaderReflection,
}

impl ShaderLibrary {
    /// Reflection of the module.
    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }

    /// The SPIR-V produced for reflection and layout derivation.
    pub fn spirv(&self) -> &[u32] {
        &self.spirv
    }
}

/// A linked program plus the vertex layout its VAO applies.
pub struct PipelineState {
    device: Arc<GlShared>,
    pub(super) program: glow::Program,
    pub(super) vao: glow::VertexArray,
    pub(super) vertex_layout: VertexInputLayout,
    pub(super) topology: u32,
}

unsafe impl Send for PipelineState {}
unsafe impl Sync for PipelineState {}

impl Drop for PipelineState {
    fn drop(&mut self) {
        use glow::HasContext as _;
        unsafe {
            self.device.gl.delete_vertex_array(self.vao);
            self.device.gl.delete_program(self.program);
        }
    }
}

/// A finished command stream ready for replay at submit.
#[derive(Debug)]
pub struct CommandBuffer {
    pub(super) commands: Vec<GlCommand>,
}
