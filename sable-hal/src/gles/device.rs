//! Device, queue and resource operations for the GL backend.

use std::sync::Arc;

use glow::HasContext as _;
use parking_lot::Mutex;

use crate::{
    shader::{self, layout},
    BindingGuard, DeviceError, InstanceError, PipelineError, ShaderError, StateTracker,
    SurfaceError,
};

use super::{
    wgl::{PixelFormatRequest, WglContext},
    Adapter, CommandBuffer, Device, GlHandle, GlShared, Queue, Resource, ShaderLibrary, Surface,
    VideoMemory,
};

impl Adapter {
    /// Probe the GL implementation through a hidden window and record the
    /// renderer strings for ranking.
    pub fn create(_options: &sbt::InitOptions) -> Result<Self, InstanceError> {
        // GL exposes exactly one adapter; classification happens at device
        // creation when the real context exists. The probe only verifies
        // that opengl32 is present.
        let info = sbt::AdapterInfo {
            name: "OpenGL".to_string(),
            vendor_id: 0,
            device_id: 0,
            kind: sbt::DeviceKind::Other,
            video_memory: 0,
        };
        Ok(Self {
            info,
            pixel_format: PixelFormatRequest::default(),
        })
    }

    /// Wrap the window the context will present into, applying the
    /// adapter's pixel format to its DC.
    pub fn create_surface(
        &self,
        hwnd: *mut std::ffi::c_void,
        width: u32,
        height: u32,
    ) -> Result<Surface, SurfaceError> {
        if hwnd.is_null() {
            return Err(SurfaceError::Other("null window handle"));
        }
        let hwnd = hwnd as winapi::shared::windef::HWND;
        let hdc = unsafe { winapi::um::winuser::GetDC(hwnd) };
        if hdc.is_null() {
            return Err(SurfaceError::Other("GetDC failed"));
        }
        if let Err(err) = super::wgl::set_pixel_format(hdc, &self.pixel_format) {
            log::error!("surface pixel format: {err}");
            return Err(SurfaceError::Other("no matching pixel format"));
        }
        Ok(Surface {
            hwnd,
            hdc,
            width,
            height,
            buffer_count: crate::DEFAULT_BUFFER_COUNT,
        })
    }

    /// Create the context over a hidden bootstrap window and load the
    /// function table.
    pub fn open(&self) -> Result<Device, InstanceError> {
        let context = WglContext::new_hidden(&self.pixel_format)?;
        let gl = unsafe { glow::Context::from_loader_function(|symbol| context.load(symbol)) };

        let renderer = unsafe { gl.get_parameter_string(glow::RENDERER) };
        let version = unsafe { gl.get_parameter_string(glow::VERSION) };
        log::info!("opened GL device `{renderer}` ({version})");

        Ok(Device {
            shared: Arc::new(GlShared {
                gl,
                context,
                completed: Mutex::new(0),
            }),
        })
    }
}

impl Device {
    /// GL devices never observe removal; kept for dispatch symmetry.
    pub fn is_lost(&self) -> bool {
        false
    }

    /// Make the context current on `surface`'s DC; called when the swap
    /// chain is (re)built.
    pub fn bind_surface(&self, surface: &Surface) {
        self.shared.context.make_current(surface.hdc);
    }

    /// Allocate a typed queue; GL work always lands on the context
    /// thread, so this only tags the kind.
    pub fn create_queue(
        &self,
        kind: sbt::CommandObjectType,
        _priority: sbt::QueuePriority,
    ) -> Result<Queue, DeviceError> {
        Ok(Queue {
            device: Arc::clone(&self.shared),
            kind,
            last_signaled: Mutex::new(0),
        })
    }

    /// Accept GLSL text; everything else has no lowering onto this
    /// backend.
    pub fn create_shader_library(
        &self,
        source: &[u8],
        stage: sbt::ShaderStage,
        language: sbt::ShaderLanguage,
    ) -> Result<ShaderLibrary, PipelineError> {
        if language != sbt::ShaderLanguage::Glsl {
            return Err(PipelineError::Shader(ShaderError::Compilation(
                "the OpenGL backend consumes GLSL source only".to_string(),
            )));
        }
        let text = std::str::from_utf8(source).map_err(|_| {
            PipelineError::Shader(ShaderError::Compilation(
                "shader source is not valid UTF-8".to_string(),
            ))
        })?;

        // Front-end once for reflection; the driver compiles the text
        // again at link time.
        let options = shader::CompileOptions::new(stage);
        let spirv = shader::compile_to_spirv(text, language, &options)
            .map_err(PipelineError::Shader)?;
        let reflection = shader::reflect_spirv(&spirv, stage).map_err(PipelineError::Shader)?;

        Ok(ShaderLibrary {
            source: text.to_string(),
            stage,
            spirv,
            reflection,
        })
    }

    /// Lease `size` bytes. Buffer objects own their storage in GL, so the
    /// lease tracks sizing and the exclusive-binding invariant only.
    pub fn allocate_video_memory(
        &self,
        size: u64,
        usage: sbt::VideoMemoryUsage,
        memory_type: sbt::VideoMemoryType,
    ) -> Result<VideoMemory, DeviceError> {
        if size == 0 {
            return Err(DeviceError::InvalidArgument("zero-byte video memory"));
        }
        Ok(VideoMemory {
            size,
            usage,
            memory_type,
            binding: BindingGuard::new(),
        })
    }

    /// Create the buffer or texture object for `memory`.
    pub fn create_resource(
        &self,
        memory: &VideoMemory,
        width: u64,
        height: u64,
        depth: u64,
        ty: sbt::ResourceType,
    ) -> Result<Resource, DeviceError> {
        if width == 0 || height == 0 || depth == 0 {
            return Err(DeviceError::InvalidArgument("zero resource dimension"));
        }

        let gl = &self.shared.gl;
        let handle = if ty.is_buffer() {
            if width > memory.size {
                return Err(DeviceError::InvalidArgument(
                    "buffer exceeds its video memory lease",
                ));
            }
            let buffer = unsafe { gl.create_buffer() }
                .map_err(|_| DeviceError::OutOfMemory)?;
            let usage = match memory.memory_type {
                sbt::VideoMemoryType::DeviceLocal => glow::STATIC_DRAW,
                sbt::VideoMemoryType::HostVisible => glow::DYNAMIC_DRAW,
                sbt::VideoMemoryType::DeviceReadback => glow::STREAM_READ,
            };
            unsafe {
                gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
                gl.buffer_data_size(glow::ARRAY_BUFFER, width as i32, usage);
                gl.bind_buffer(glow::ARRAY_BUFFER, None);
            }
            GlHandle::Buffer(buffer)
        } else {
            let texture = unsafe { gl.create_texture() }
                .map_err(|_| DeviceError::OutOfMemory)?;
            let target = match ty {
                sbt::ResourceType::Texture3D => glow::TEXTURE_3D,
                _ => glow::TEXTURE_2D,
            };
            unsafe {
                gl.bind_texture(target, Some(texture));
                if target == glow::TEXTURE_3D {
                    gl.tex_storage_3d(
                        target,
                        1,
                        glow::RGBA8,
                        width as i32,
                        height as i32,
                        depth as i32,
                    );
                } else {
                    gl.tex_storage_2d(target, 1, glow::RGBA8, width as i32, height as i32);
                }
                gl.bind_texture(target, None);
            }
            GlHandle::Texture(texture)
        };

        memory.binding.acquire()?;

        Ok(Resource {
            device: Arc::clone(&self.shared),
            handle,
            width,
            height,
            depth,
            ty,
            state: StateTracker::new(sbt::ResourceState::Common),
            memory_type: memory.memory_type,
            binding: &memory.binding,
        })
    }

    /// Upload `data` into a buffer resource with `glBufferSubData`.
    pub fn set_buffer_data(
        &self,
        resource: &mut Resource,
        _copy_queue: &Queue,
        data: &[u8],
        offset: u64,
    ) -> Result<(), DeviceError> {
        if data.is_empty() {
            return Ok(());
        }
        let GlHandle::Buffer(buffer) = resource.handle else {
            return Err(DeviceError::InvalidArgument(
                "set_buffer_data target is not a buffer",
            ));
        };
        if offset + data.len() as u64 > resource.width {
            return Err(DeviceError::InvalidArgument(
                "write exceeds the buffer size",
            ));
        }
        let gl = &self.shared.gl;
        unsafe {
            gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
            gl.buffer_sub_data_u8_slice(glow::ARRAY_BUFFER, offset as i32, data);
            gl.bind_buffer(glow::ARRAY_BUFFER, None);
        }
        Ok(())
    }

    /// Compile, link and wrap a program for a VS/PS pair.
    ///
    /// `vertex_layout` comes precomputed from the asynchronous pipeline
    /// builder.
    pub fn create_pipeline_state(
        &self,
        vertex: &ShaderLibrary,
        pixel: &ShaderLibrary,
        topology: sbt::PrimitiveTopology,
        vertex_layout: &layout::VertexInputLayout,
    ) -> Result<super::PipelineState, PipelineError> {
        let gl = &self.shared.gl;

        let program = unsafe { gl.create_program() }
            .map_err(|err| PipelineError::Shader(ShaderError::Compilation(err)))?;

        let mut shaders = Vec::with_capacity(2);
        for library in [vertex, pixel] {
            let kind = match library.stage {
                sbt::ShaderStage::Vertex => glow::VERTEX_SHADER,
                sbt::ShaderStage::Pixel => glow::FRAGMENT_SHADER,
                _ => {
                    return Err(PipelineError::Shader(ShaderError::Compilation(
                        "graphics pipelines take vertex and pixel stages".to_string(),
                    )))
                }
            };
            let shader = unsafe { gl.create_shader(kind) }
                .map_err(|err| PipelineError::Shader(ShaderError::Compilation(err)))?;
            unsafe {
                gl.shader_source(shader, &library.source);
                gl.compile_shader(shader);
                if !gl.get_shader_compile_status(shader) {
                    let message = gl.get_shader_info_log(shader);
                    gl.delete_shader(shader);
                    gl.delete_program(program);
                    return Err(PipelineError::Shader(ShaderError::Compilation(message)));
                }
                gl.attach_shader(program, shader);
            }
            shaders.push(shader);
        }

        unsafe {
            gl.link_program(program);
            for shader in shaders {
                gl.detach_shader(program, shader);
                gl.delete_shader(shader);
            }
            if !gl.get_program_link_status(program) {
                let message = gl.get_program_info_log(program);
                gl.delete_program(program);
                return Err(PipelineError::Shader(ShaderError::Compilation(message)));
            }
        }

        let vao = unsafe { gl.create_vertex_array() }.map_err(|_| {
            PipelineError::Device(DeviceError::OutOfMemory)
        })?;

        Ok(super::PipelineState {
            device: Arc::clone(&self.shared),
            program,
            vao,
            vertex_layout: vertex_layout.clone(),
            topology: map_topology(topology),
        })
    }

    /// Block until the context drains.
    pub fn wait_idle(&self) {
        unsafe { self.shared.gl.finish() };
    }
}

pub(super) fn map_topology(topology: sbt::PrimitiveTopology) -> u32 {
    use sbt::PrimitiveTopology as T;
    match topology {
        T::PointList => glow::POINTS,
        T::LineList => glow::LINES,
        T::LineStrip => glow::LINE_STRIP,
        T::TriangleList => glow::TRIANGLES,
        T::TriangleStrip => glow::TRIANGLE_STRIP,
    }
}

impl Queue {
    /// The kind of commands this queue accepts.
    pub fn kind(&self) -> sbt::CommandObjectType {
        self.kind
    }

    /// Replay command streams on the context thread.
    pub fn execute(&self, lists: &[CommandBuffer]) {
        profiling::scope!("gl replay");
        for list in lists {
            super::command::replay(&self.device, &list.commands);
        }
    }

    /// Record `value` as signaled once the pipeline has flushed.
    pub fn signal(&self, value: crate::FenceValue) -> Result<(), DeviceError> {
        unsafe { self.device.gl.flush() };
        *self.last_signaled.lock() = value;
        Ok(())
    }

    /// Latest fence value retired by a finish.
    pub fn completed_value(&self) -> crate::FenceValue {
        *self.device.completed.lock()
    }

    /// Finish the context, retiring every signaled value.
    pub fn wait(&self, value: crate::FenceValue, _timeout_ms: u32) -> Result<bool, DeviceError> {
        let last = *self.last_signaled.lock();
        if value > last {
            return Ok(false);
        }
        unsafe { self.device.gl.finish() };
        *self.device.completed.lock() = last;
        Ok(true)
    }

    /// Drain the context.
    pub fn flush(&self) -> Result<(), DeviceError> {
        unsafe { self.device.gl.finish() };
        let last = *self.last_signaled.lock();
        *self.device.completed.lock() = last;
        Ok(())
    }

    /// Swap the surface's buffers.
    pub fn present(&self, surface: &Surface) -> Result<bool, SurfaceError> {
        profiling::scope!("SwapBuffers");
        self.device.context.swap_buffers(surface.hdc);
        Ok(false)
    }
}
