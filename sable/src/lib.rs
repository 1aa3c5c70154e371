/*! Sable: one backend-agnostic API for GPU resource management, shader
 *  compilation, command recording and frame presentation, driving Vulkan,
 *  Direct3D 12 or OpenGL 4.5 underneath with identical observable
 *  semantics.
 *
 *  Applications see handles, descriptors and a per-frame command
 *  interface; the runtime owns the device, swap chain, queues, memory
 *  pools and synchronization. Cross-object calls are checked at the
 *  dispatch boundary to come from one backend and fail with
 *  [`ErrorCode::Unsupported`] otherwise.
 *
 *  The optional `app` feature adds a small application shim: window and
 *  event pump, a worker pool recording in parallel, and YAML/JSON
 *  configuration loading.
 */

#![allow(
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
    // Need many arguments for some creation functions.
    clippy::too_many_arguments,
)]
#![warn(trivial_casts, trivial_numeric_casts, unused_qualifications)]

mod command;
mod dispatch;
mod error;
mod ffi;
mod renderer;
mod task;
mod window;

#[cfg(feature = "app")]
pub mod app;

pub use sbt::{
    AdapterInfo, AppVersion, Backend, Color, CommandObjectType, DeviceKind, DrawArgs, ErrorCode,
    InitOptions, InstanceFlags, PoolCategory, PrimitiveTopology, QueuePriority, Rect,
    ResourceState, ResourceType, ShaderLanguage, ShaderStage, SurfaceFlags, VertexDesc,
    VideoMemoryType, VideoMemoryUsage, Viewport,
};

pub use command::CommandObject;
pub use dispatch::{
    CommandQueue, LogicalDevice, PhysicalDevice, PipelineState, Resource, ShaderLibrary, Surface,
    SwapChain, VideoMemory, WindowHandles,
};
pub use error::{last_error_message, Error, SableResult};
pub use renderer::{OutputTargetInfo, Renderer};
pub use task::{AsyncTask, PipelineBuilder, Scheduler, ThreadScheduler};
pub use window::{register_window_source, unregister_window_source, WindowSource};

/// Re-exported shader reflection types for callers inspecting compiled
/// libraries.
pub mod shader {
    pub use hal::shader::{
        BindingType, PushConstantRange, ResourceBinding, ShaderReflection, Visibility,
    };
}
