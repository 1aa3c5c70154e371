//! The classic triangle, spinning with a push-constant angle.
//!
//! Demonstrates the whole per-frame flow: device bring-up through the app
//! shim, a vertex buffer uploaded along the staging path, an
//! asynchronously built PSO, and worker-thread recording through the
//! per-thread command objects.
//!
//! Run with `RUST_LOG=info cargo run --example triangle`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

use sable::app::{run_app, Application, ApplicationConfig, RenderContext};
use sable::{
    Color, DrawArgs, PipelineBuilder, PipelineState, Rect, Resource, ResourceState, ResourceType,
    SableResult, ThreadScheduler, VertexDesc, VideoMemory, VideoMemoryType, VideoMemoryUsage,
    Viewport,
};

const VERTEX_SHADER: &str = r#"
#version 450

layout(location = 0) in vec2 inPosition;
layout(location = 1) in vec3 inColor;

layout(push_constant) uniform Push {
    float time;
} push;

layout(location = 0) out vec3 fragColor;

void main() {
    float angle = push.time / 100.0;
    mat2 rotation = mat2(cos(angle), -sin(angle), sin(angle), cos(angle));
    gl_Position = vec4(rotation * inPosition, 0.0, 1.0);
    fragColor = inColor;
}
"#;

const FRAGMENT_SHADER: &str = r#"
#version 450

layout(location = 0) in vec3 fragColor;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(fragColor, 1.0);
}
"#;

#[repr(C)]
struct Vertex {
    position: [f32; 2],
    color: [f32; 3],
}

const VERTICES: [Vertex; 3] = [
    Vertex {
        position: [0.0, -0.5],
        color: [1.0, 0.0, 0.0],
    },
    Vertex {
        position: [0.5, 0.5],
        color: [0.0, 1.0, 0.0],
    },
    Vertex {
        position: [-0.5, 0.5],
        color: [0.0, 0.0, 1.0],
    },
];

const WIDTH: u32 = 960;
const HEIGHT: u32 = 540;

struct Scene {
    pipeline: PipelineState,
    vertex_buffer: Resource,
    index_buffer: Resource,
    // Leases outlive their resources; dropping them first would park on
    // the binding flag.
    _vertex_memory: VideoMemory,
    _index_memory: VideoMemory,
    started: Instant,
}

struct Triangle {
    scene: OnceLock<Scene>,
    frames: AtomicU64,
}

fn as_bytes<T>(value: &[T]) -> &[u8] {
    unsafe {
        std::slice::from_raw_parts(value.as_ptr() as *const u8, std::mem::size_of_val(value))
    }
}

fn build_scene(ctx: &RenderContext) -> SableResult<Scene> {
    let vertex_bytes = as_bytes(&VERTICES);
    let vertex_memory = VideoMemory::allocate(
        ctx.device,
        vertex_bytes.len() as u64,
        VideoMemoryUsage::VertexBuffer,
        VideoMemoryType::DeviceLocal,
    )?;
    let mut vertex_buffer = Resource::new(
        &vertex_memory,
        vertex_bytes.len() as u64,
        1,
        1,
        ResourceType::VertexBuffer,
    )?;
    vertex_buffer.set_buffer_data(ctx.device, ctx.queue, vertex_bytes, 0)?;

    let indices: [u32; 3] = [0, 1, 2];
    let index_bytes = as_bytes(&indices);
    let index_memory = VideoMemory::allocate(
        ctx.device,
        index_bytes.len() as u64,
        VideoMemoryUsage::IndexBuffer,
        VideoMemoryType::DeviceLocal,
    )?;
    let mut index_buffer = Resource::new(
        &index_memory,
        index_bytes.len() as u64,
        1,
        1,
        ResourceType::IndexBuffer,
    )?;
    index_buffer.set_buffer_data(ctx.device, ctx.queue, index_bytes, 0)?;

    let pipeline = PipelineBuilder::new(ctx.device, Some(ctx.surface)).build(
        &ThreadScheduler,
        VERTEX_SHADER.as_bytes().to_vec(),
        FRAGMENT_SHADER.as_bytes().to_vec(),
        sable::ShaderLanguage::Glsl,
    )?;

    Ok(Scene {
        pipeline,
        vertex_buffer,
        index_buffer,
        _vertex_memory: vertex_memory,
        _index_memory: index_memory,
        started: Instant::now(),
    })
}

impl Application for Triangle {
    fn config(&self) -> ApplicationConfig {
        ApplicationConfig {
            application_name: "sable triangle".to_string(),
            title: "sable - triangle".to_string(),
            width: WIDTH,
            height: HEIGHT,
            rendering_threads: 1,
            backend: sable::Backend::PlatformDefault,
        }
    }

    fn on_render(&self, ctx: &RenderContext) {
        let scene = match self.scene.get() {
            Some(scene) => scene,
            None => match build_scene(ctx) {
                Ok(scene) => {
                    let _ = self.scene.set(scene);
                    self.scene.get().expect("scene installed above")
                }
                Err(err) => {
                    log::error!("scene setup failed: {err}");
                    sable::app::request_stop();
                    return;
                }
            },
        };

        let Ok(output) = ctx.renderer.output_target() else {
            return;
        };
        let time = scene.started.elapsed().as_secs_f32() * 1000.0;

        let recorded = ctx
            .renderer
            .with_command_object(|cmd| -> SableResult<()> {
                cmd.begin_recording(Some(&scene.pipeline))?;
                cmd.begin_render_pass(
                    &output,
                    Color {
                        r: 0.02,
                        g: 0.02,
                        b: 0.05,
                        a: 1.0,
                    },
                )?;
                cmd.set_viewport(&Viewport::of_extent(WIDTH, HEIGHT))?;
                cmd.set_scissor_rect(&Rect {
                    x: 0,
                    y: 0,
                    width: WIDTH,
                    height: HEIGHT,
                })?;
                cmd.barrier(&scene.vertex_buffer, ResourceState::VertexBuffer)?;
                cmd.bind_vertex_buffer(
                    &scene.vertex_buffer,
                    &VertexDesc {
                        slot: 0,
                        size: std::mem::size_of_val(&VERTICES) as u32,
                        stride: std::mem::size_of::<Vertex>() as u32,
                    },
                )?;
                cmd.bind_index_buffer(&scene.index_buffer)?;
                cmd.push_constants(&scene.pipeline, as_bytes(&[time]))?;
                cmd.draw(&DrawArgs {
                    index_count: 3,
                    ..Default::default()
                })?;
                cmd.end_render_pass()?;
                cmd.end_recording()
            })
            .and_then(|inner| inner);

        if let Err(err) = recorded {
            log::error!("frame recording failed: {err}");
            return;
        }

        let frames = self.frames.fetch_add(1, Ordering::Relaxed) + 1;
        if frames % 1000 == 0 {
            log::info!(
                "{frames} frames rendered, fence value {}",
                ctx.renderer.current_fence_value()
            );
        }
    }
}

fn main() {
    env_logger::init();
    let app = Triangle {
        scene: OnceLock::new(),
        frames: AtomicU64::new(0),
    };
    std::process::exit(run_app(app));
}
