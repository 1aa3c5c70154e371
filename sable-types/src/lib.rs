/*! This library describes the API surface of sable that is independent
 *  of the chosen backend. The types here are shared between the
 *  dispatch layer, the hardware abstraction layer, and the C ABI, and
 *  their discriminants are part of the stable wire format.
 */

#![allow(
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
)]
#![warn(missing_docs, unsafe_code)]

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Integer type used for monotonically increasing fence values.
pub type FenceValue = u64;

/// Backends supported by sable.
///
/// `PlatformDefault` is resolved by [`Backend::platform_default`] before any
/// object is created; no live object ever carries it as a tag.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Backend {
    /// Pick the canonical backend for the current OS at run time.
    #[default]
    PlatformDefault = 0,
    /// Vulkan 1.3.
    Vulkan = 1,
    /// Direct3D 12.
    DirectX12 = 2,
    /// Metal. Present for ABI stability; not implemented.
    Metal = 3,
    /// OpenGL 4.5 core profile.
    OpenGl = 4,
}

impl Backend {
    /// The backend `PlatformDefault` resolves to on this OS.
    pub const fn platform_default() -> Self {
        if cfg!(windows) {
            Self::DirectX12
        } else if cfg!(any(target_os = "macos", target_os = "ios")) {
            Self::Metal
        } else {
            Self::Vulkan
        }
    }

    /// Resolve `PlatformDefault`, leaving concrete variants untouched.
    pub fn resolve(self) -> Self {
        match self {
            Self::PlatformDefault => Self::platform_default(),
            other => other,
        }
    }

    /// Lowercase name, used in log messages.
    pub const fn to_str(self) -> &'static str {
        match self {
            Self::PlatformDefault => "platform-default",
            Self::Vulkan => "vulkan",
            Self::DirectX12 => "dx12",
            Self::Metal => "metal",
            Self::OpenGl => "opengl",
        }
    }
}

/// Stable result codes of every public operation.
///
/// The discriminants are part of the C ABI and must not be reordered.
#[repr(i32)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ErrorCode {
    /// The operation completed.
    #[default]
    Success = 0,
    /// No backend implements the requested combination, or the objects
    /// passed to a cross-object operation carry different backend tags.
    Unsupported = 1,
    /// Host memory exhaustion; the output handle was not allocated.
    BadAllocation = 2,
    /// A required pointer argument was null.
    InvalidPointer = 3,
    /// An argument was non-null but semantically invalid.
    InvalidParameter = 4,
    /// The operating system refused a resource.
    SystemError = 5,
    /// A backend raised something the dispatch layer did not classify.
    UnknownError = 6,
}

impl ErrorCode {
    /// Whether this code denotes success.
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// The kind of work a command queue or command object accepts.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CommandObjectType {
    /// Graphics + compute + transfer.
    AllCommands = 0,
    /// Compute and transfer only.
    Compute = 1,
    /// Transfer only.
    Copy = 2,
}

/// Scheduling priority of a command queue.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum QueuePriority {
    /// Preferred for latency-sensitive queues (present, per-frame graphics).
    #[default]
    High = 0,
    /// Default for asynchronous compute.
    Medium = 1,
    /// Background transfers.
    Low = 2,
}

/// Where a piece of video memory lives and how the CPU may touch it.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum VideoMemoryType {
    /// GPU-only memory; uploads go through a staging copy.
    DeviceLocal = 0,
    /// CPU-writable upload memory, persistently mapped.
    HostVisible = 1,
    /// CPU-readable read-back memory (cached).
    DeviceReadback = 2,
}

/// What a piece of video memory will back.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum VideoMemoryUsage {
    /// Vertex buffer storage.
    VertexBuffer = 0,
    /// Index buffer storage.
    IndexBuffer = 1,
    /// 1D texture storage.
    Texture1D = 2,
    /// 2D texture storage.
    Texture2D = 3,
    /// 3D texture storage.
    Texture3D = 4,
}

/// Concrete resource kind created on top of a [`VideoMemoryUsage`] lease.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ResourceType {
    /// A vertex buffer.
    VertexBuffer = 0,
    /// An index buffer.
    IndexBuffer = 1,
    /// A 1D texture.
    Texture1D = 2,
    /// A 2D texture.
    Texture2D = 3,
    /// A 3D texture.
    Texture3D = 4,
}

impl ResourceType {
    /// True for the buffer-shaped variants.
    pub const fn is_buffer(self) -> bool {
        matches!(self, Self::VertexBuffer | Self::IndexBuffer)
    }
}

/// Source language of a shader submitted to `CreateShaderLibrary`.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ShaderLanguage {
    /// HLSL source text.
    Hlsl = 0,
    /// GLSL source text.
    Glsl = 1,
    /// Pre-compiled SPIR-V words.
    SpirV = 2,
    /// Pre-compiled DXIL bytes.
    Dxil = 3,
}

/// Pipeline stage a shader module is compiled for.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ShaderStage {
    /// Vertex stage.
    Vertex = 0,
    /// Pixel/fragment stage.
    Pixel = 1,
    /// Compute stage.
    Compute = 2,
    /// Geometry stage.
    Geometry = 3,
    /// Mesh stage.
    Mesh = 4,
    /// Amplification (task) stage.
    Amplification = 5,
    /// Ray generation stage.
    RayGeneration = 6,
    /// Ray intersection stage.
    RayIntersection = 7,
    /// Ray any-hit stage.
    RayAnyHit = 8,
    /// Ray closest-hit stage.
    RayClosestHit = 9,
    /// Ray miss stage.
    RayMiss = 10,
    /// Ray callable stage.
    RayCallable = 11,
}

impl ShaderStage {
    /// Whether this is one of the ray-tracing stages.
    pub const fn is_ray_tracing(self) -> bool {
        (self as u8) >= (Self::RayGeneration as u8)
    }
}

bitflags::bitflags! {
    /// Surface creation flags.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct SurfaceFlags: u32 {
        /// Prefer a Wayland surface over X11 on Linux.
        const WAYLAND = 1 << 0;
    }
}

bitflags::bitflags! {
    /// Instance-level toggles passed through `InitOptions`.
    #[repr(transparent)]
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct InstanceFlags: u32 {
        /// Enable the backend validation layer / debug layer.
        const VALIDATION = 1 << 0;
        /// Enable the debug messenger / info queue output.
        const DEBUG_OUTPUT = 1 << 1;
    }
}

impl InstanceFlags {
    /// Validation + debug output in debug builds, nothing in release.
    pub fn debugging() -> Self {
        if cfg!(debug_assertions) {
            Self::VALIDATION | Self::DEBUG_OUTPUT
        } else {
            Self::empty()
        }
    }
}

/// Four-part application version reported to the backend instance.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AppVersion {
    /// Vendor-defined variant number.
    pub variant: u8,
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Patch version.
    pub patch: u8,
}

/// Options for physical-device creation.
#[derive(Clone, Debug, Default)]
pub struct InitOptions {
    /// Application name, forwarded to the backend instance.
    pub app_name: String,
    /// Application version, forwarded to the backend instance.
    pub app_version: AppVersion,
    /// Accept a software adapter (WARP, llvmpipe) if no hardware adapter
    /// survives ranking.
    pub software_fallback: bool,
    /// Debug/validation toggles.
    pub flags: InstanceFlags,
}

/// Adapter category used for ranking, most preferred first.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DeviceKind {
    /// A discrete GPU.
    Discrete = 0,
    /// A GPU integrated with the CPU.
    Integrated = 1,
    /// A virtualized GPU.
    Virtual = 2,
    /// A software rasterizer.
    Cpu = 3,
    /// The backend did not report a recognizable type.
    Other = 4,
}

/// Information about a ranked adapter.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct AdapterInfo {
    /// Adapter name as reported by the driver.
    pub name: String,
    /// PCI vendor id.
    pub vendor_id: u32,
    /// PCI device id.
    pub device_id: u32,
    /// Adapter category.
    pub kind: DeviceKind,
    /// Total dedicated video memory in bytes.
    pub video_memory: u64,
}

/// Abstract resource states understood by `Barrier`.
///
/// Each backend translates a `(before, after)` pair from this table into its
/// native barrier; see the per-backend state tables.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum ResourceState {
    /// Undefined/common state.
    #[default]
    Common = 0,
    /// Readable as a vertex or constant buffer.
    VertexBuffer = 1,
    /// Readable as an index buffer.
    IndexBuffer = 2,
    /// Presentable by the swap chain.
    Present = 3,
    /// Writable as a color output target.
    OutputTarget = 4,
    /// Source of a copy.
    CopySrc = 5,
    /// Destination of a copy.
    CopyDest = 6,
}

/// Primitive assembly mode for draws.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PrimitiveTopology {
    /// Points.
    PointList = 0,
    /// Independent lines.
    LineList = 1,
    /// Connected lines.
    LineStrip = 2,
    /// Independent triangles.
    #[default]
    TriangleList = 3,
    /// Connected triangles.
    TriangleStrip = 4,
}

/// Viewport rectangle with a depth range.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Viewport {
    /// Left edge in pixels.
    pub x: f32,
    /// Top edge in pixels.
    pub y: f32,
    /// Width in pixels.
    pub width: f32,
    /// Height in pixels.
    pub height: f32,
    /// Near depth bound.
    pub min_depth: f32,
    /// Far depth bound.
    pub max_depth: f32,
}

impl Viewport {
    /// Full-size viewport over a `width`×`height` target with the
    /// canonical `[0, 1]` depth range.
    pub fn of_extent(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Integer scissor rectangle.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Rect {
    /// Left edge in pixels.
    pub x: i32,
    /// Top edge in pixels.
    pub y: i32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Normalized RGBA color used by clears.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Color {
    /// Red channel, `0.0..=1.0`.
    pub r: f32,
    /// Green channel, `0.0..=1.0`.
    pub g: f32,
    /// Blue channel, `0.0..=1.0`.
    pub b: f32,
    /// Alpha channel, `0.0..=1.0`.
    pub a: f32,
}

impl Color {
    /// Opaque black.
    pub const BLACK: Self = Self {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };

    /// The array form most backend clear entry points want.
    pub const fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

/// Per-slot vertex stream description for `BindVertexBuffer`.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VertexDesc {
    /// Input slot index.
    pub slot: u32,
    /// Total size of the bound range in bytes.
    pub size: u32,
    /// Stride between consecutive vertices in bytes.
    pub stride: u32,
}

/// Arguments of an indexed draw.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DrawArgs {
    /// Number of indices to read.
    pub index_count: u32,
    /// Number of instances; `1` for non-instanced draws.
    pub instance_count: u32,
    /// First index to read.
    pub start_index: u32,
    /// Signed value added to each index.
    pub base_vertex: i32,
    /// First instance id.
    pub start_instance: u32,
}

impl Default for DrawArgs {
    fn default() -> Self {
        Self {
            index_count: 0,
            instance_count: 1,
            start_index: 0,
            base_vertex: 0,
            start_instance: 0,
        }
    }
}

/// Category a heap pool serves; decides block size and memory flags.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum PoolCategory {
    /// Vertex/index/constant buffers up to the small block size.
    SmallBuffer = 0,
    /// Buffers up to the medium block size.
    MediumBuffer = 1,
    /// Buffers up to the large block size.
    LargeBuffer = 2,
    /// Small textures.
    SmallTexture = 3,
    /// Medium textures.
    MediumTexture = 4,
    /// Large textures.
    LargeTexture = 5,
    /// Render-target images.
    RenderTarget = 6,
    /// Depth/stencil images.
    DepthStencil = 7,
    /// Host-visible upload staging, persistently mapped.
    Upload = 8,
    /// Host-visible cached read-back.
    ReadBack = 9,
    /// Caller-managed block size.
    Custom = 10,
}

impl PoolCategory {
    /// Default block size in bytes for this category.
    pub const fn default_block_size(self) -> u64 {
        const MIB: u64 = 1 << 20;
        match self {
            Self::SmallBuffer | Self::SmallTexture => 4 * MIB,
            Self::MediumBuffer | Self::MediumTexture | Self::Upload | Self::ReadBack => 16 * MIB,
            Self::LargeBuffer | Self::LargeTexture => 64 * MIB,
            Self::RenderTarget | Self::DepthStencil => 128 * MIB,
            Self::Custom => 4 * MIB,
        }
    }

    /// The smallest buffer category whose block size holds `size`, used
    /// for vertex/index/constant buffer placement.
    pub fn buffer_category_for(size: u64) -> Self {
        if size <= Self::SmallBuffer.default_block_size() {
            Self::SmallBuffer
        } else if size <= Self::MediumBuffer.default_block_size() {
            Self::MediumBuffer
        } else {
            Self::LargeBuffer
        }
    }
}

/// Severity levels of the logging collaborator.
///
/// `Fatal` maps onto `log::error!` with the `sable::fatal` target; the other
/// four map 1:1 onto the `log` facade.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LogSeverity {
    /// Verbose tracing.
    Trace = 0,
    /// Debug diagnostics.
    Debug = 1,
    /// Informational messages.
    Info = 2,
    /// Recoverable problems.
    Warning = 3,
    /// Unrecoverable problems (device removal, DRED output).
    Fatal = 4,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_resolution_is_concrete() {
        let resolved = Backend::PlatformDefault.resolve();
        assert_ne!(resolved, Backend::PlatformDefault);
        assert_eq!(Backend::Vulkan.resolve(), Backend::Vulkan);
    }

    #[test]
    fn error_code_wire_values() {
        assert_eq!(ErrorCode::Success as i32, 0);
        assert_eq!(ErrorCode::Unsupported as i32, 1);
        assert_eq!(ErrorCode::BadAllocation as i32, 2);
        assert_eq!(ErrorCode::InvalidPointer as i32, 3);
        assert_eq!(ErrorCode::InvalidParameter as i32, 4);
        assert_eq!(ErrorCode::SystemError as i32, 5);
        assert_eq!(ErrorCode::UnknownError as i32, 6);
    }

    #[test]
    fn buffer_category_picks_smallest_fitting_block() {
        const MIB: u64 = 1 << 20;
        assert_eq!(
            PoolCategory::buffer_category_for(60),
            PoolCategory::SmallBuffer
        );
        assert_eq!(
            PoolCategory::buffer_category_for(4 * MIB),
            PoolCategory::SmallBuffer
        );
        assert_eq!(
            PoolCategory::buffer_category_for(4 * MIB + 1),
            PoolCategory::MediumBuffer
        );
        assert_eq!(
            PoolCategory::buffer_category_for(65 * MIB),
            PoolCategory::LargeBuffer
        );
    }

    #[test]
    fn ray_stages_need_detection() {
        assert!(ShaderStage::RayMiss.is_ray_tracing());
        assert!(!ShaderStage::Mesh.is_ray_tracing());
    }
}
