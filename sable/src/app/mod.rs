//! The optional application shim.
//!
//! Owns the window and event pump (winit), a pool of rendering worker
//! threads that record through `GetCommandObject`, and the YAML/JSON
//! configuration loader in [`config`]. The RHI core never depends on any
//! of this; hosts with their own platform layer use the library surface
//! directly.

pub mod config;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::time::Instant;

use parking_lot::RwLock;
use raw_window_handle::{HasRawDisplayHandle as _, HasRawWindowHandle as _};
use winit::{
    event::{ElementState, Event, MouseButton as WinitMouseButton, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    window::WindowBuilder,
};

use crate::dispatch::{
    CommandQueue, LogicalDevice, PhysicalDevice, Surface, SwapChain, WindowHandles,
};
use crate::error::SableResult;
use crate::renderer::Renderer;
use crate::window::WindowSource;

pub use config::{load_engine_config, ConfigError, EngineConfig};

/// Startup parameters of the shim.
#[derive(Clone, Debug)]
pub struct ApplicationConfig {
    /// Name reported to the backend instance.
    pub application_name: String,
    /// Initial window title.
    pub title: String,
    /// Initial window width in pixels.
    pub width: u32,
    /// Initial window height in pixels.
    pub height: u32,
    /// Number of rendering worker threads.
    pub rendering_threads: usize,
    /// Backend to drive.
    pub backend: sbt::Backend,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            application_name: "sable application".to_string(),
            title: "sable".to_string(),
            width: 1280,
            height: 720,
            rendering_threads: 4,
            backend: sbt::Backend::PlatformDefault,
        }
    }
}

/// Mouse buttons forwarded to the callbacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MouseButton {
    /// Left button.
    Left,
    /// Right button.
    Right,
    /// Middle button.
    Middle,
    /// Any other button, by index.
    Other(u16),
}

/// Worker-side recording context for one frame.
pub struct RenderContext<'a> {
    /// The frame-pipeline runtime; record through
    /// [`Renderer::with_command_object`].
    pub renderer: &'a Renderer,
    /// The logical device the shim created.
    pub device: &'a LogicalDevice,
    /// The shim's graphics/present queue.
    pub queue: &'a CommandQueue,
    /// The surface being presented to.
    pub surface: &'a Surface,
    /// Index of the calling worker, `0..rendering_threads`.
    pub worker_index: usize,
}

/// The callbacks an application implements; every one has a default
/// empty body.
pub trait Application: Send + Sync + 'static {
    /// Startup parameters.
    fn config(&self) -> ApplicationConfig;

    /// The window close button was pressed; return `false` to veto.
    fn on_close(&self) -> bool {
        true
    }
    /// The window was resized.
    fn on_resize(&self, _width: u32, _height: u32) {}
    /// A key went down.
    fn on_key_down(&self, _key: &str) {}
    /// A key came up.
    fn on_key_up(&self, _key: &str) {}
    /// A held key repeated.
    fn on_key_repeat(&self, _key: &str) {}
    /// The pointer moved, in window coordinates.
    fn on_mouse_move(&self, _x: f64, _y: f64) {}
    /// A mouse button went down.
    fn on_mouse_button_down(&self, _button: MouseButton) {}
    /// A mouse button came up.
    fn on_mouse_button_up(&self, _button: MouseButton) {}
    /// Per-frame simulation step on the main thread.
    fn on_update(&self, _delta_seconds: f32) {}
    /// Per-frame recording, called once per worker thread.
    fn on_render(&self, _ctx: &RenderContext) {}
}

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Ask the running [`run_app`] loop to exit after the current frame.
pub fn request_stop() {
    STOP_REQUESTED.store(true, Ordering::Release);
}

struct WinitWindowSource {
    window: Arc<winit::window::Window>,
}

impl WindowSource for WinitWindowSource {
    fn create_window(
        &self,
        width: u32,
        height: u32,
        _flags: sbt::SurfaceFlags,
    ) -> Result<WindowHandles, String> {
        let _ = self
            .window
            .request_inner_size(winit::dpi::PhysicalSize::new(width, height));
        Ok(WindowHandles {
            display: self.window.raw_display_handle(),
            window: self.window.raw_window_handle(),
        })
    }

    fn set_title(&self, _handles: &WindowHandles, title: &str) -> Result<(), String> {
        self.window.set_title(title);
        Ok(())
    }
}

fn map_button(button: WinitMouseButton) -> MouseButton {
    match button {
        WinitMouseButton::Left => MouseButton::Left,
        WinitMouseButton::Right => MouseButton::Right,
        WinitMouseButton::Middle => MouseButton::Middle,
        WinitMouseButton::Back => MouseButton::Other(3),
        WinitMouseButton::Forward => MouseButton::Other(4),
        WinitMouseButton::Other(index) => MouseButton::Other(index),
    }
}

fn key_name(key: &winit::keyboard::PhysicalKey) -> String {
    match key {
        winit::keyboard::PhysicalKey::Code(code) => format!("{code:?}"),
        winit::keyboard::PhysicalKey::Unidentified(_) => "Unidentified".to_string(),
    }
}

/// Run the application loop; returns the process exit code.
pub fn run_app(app: impl Application) -> i32 {
    match run_app_inner(Arc::new(app)) {
        Ok(()) => 0,
        Err(err) => {
            log::error!("application failed: {err}");
            1
        }
    }
}

fn run_app_inner(app: Arc<dyn Application>) -> SableResult<()> {
    let config = app.config();
    STOP_REQUESTED.store(false, Ordering::Release);

    let event_loop = EventLoop::new().map_err(|err| {
        crate::error::Error::new(sbt::ErrorCode::SystemError, format!("event loop: {err}"))
    })?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title(&config.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(config.width, config.height))
            .build(&event_loop)
            .map_err(|err| {
                crate::error::Error::new(
                    sbt::ErrorCode::SystemError,
                    format!("window creation: {err}"),
                )
            })?,
    );
    crate::window::register_window_source(Arc::new(WinitWindowSource {
        window: Arc::clone(&window),
    }));

    let options = sbt::InitOptions {
        app_name: config.application_name.clone(),
        app_version: sbt::AppVersion::default(),
        software_fallback: false,
        flags: sbt::InstanceFlags::debugging(),
    };
    let physical = PhysicalDevice::new(&options, config.backend)?;
    let device = LogicalDevice::new(&physical)?;
    let queue = CommandQueue::new(
        &device,
        sbt::CommandObjectType::AllCommands,
        sbt::QueuePriority::High,
    )?;

    let size = window.inner_size();
    let handles = WindowHandles {
        display: window.raw_display_handle(),
        window: window.raw_window_handle(),
    };
    let surface = Surface::from_handles(
        &physical,
        handles,
        size.width,
        size.height,
        sbt::SurfaceFlags::empty(),
    )?;
    let swap_chain = SwapChain::new(&physical, &device, &queue, &surface, 0)?;
    let renderer = Arc::new(RwLock::new(Renderer::new(
        &device, &queue, &surface, &swap_chain,
    )?));

    // Worker pool: each worker records once per frame between the two
    // barriers.
    let worker_count = config.rendering_threads.max(1);
    let frame_start = Arc::new(Barrier::new(worker_count + 1));
    let frame_done = Arc::new(Barrier::new(worker_count + 1));
    let workers_live = Arc::new(AtomicBool::new(true));
    let surface = Arc::new(surface);
    let mut workers = Vec::with_capacity(worker_count);
    for worker_index in 0..worker_count {
        let app = Arc::clone(&app);
        let renderer = Arc::clone(&renderer);
        let frame_start = Arc::clone(&frame_start);
        let frame_done = Arc::clone(&frame_done);
        let live = Arc::clone(&workers_live);
        let device = device.clone();
        let queue = queue.clone();
        let surface = Arc::clone(&surface);
        workers.push(
            std::thread::Builder::new()
                .name(format!("sable-render-{worker_index}"))
                .spawn(move || loop {
                    frame_start.wait();
                    if !live.load(Ordering::Acquire) {
                        break;
                    }
                    {
                        let renderer = renderer.read();
                        let ctx = RenderContext {
                            renderer: &renderer,
                            device: &device,
                            queue: &queue,
                            surface: &surface,
                            worker_index,
                        };
                        app.on_render(&ctx);
                    }
                    frame_done.wait();
                })
                .expect("worker thread spawn"),
        );
    }

    let mut last_frame = Instant::now();
    let loop_app = Arc::clone(&app);
    let loop_renderer = Arc::clone(&renderer);
    let loop_device = device.clone();
    let loop_frame_start = Arc::clone(&frame_start);
    let loop_frame_done = Arc::clone(&frame_done);

    let run_result = event_loop.run(move |event, elwt| {
        elwt.set_control_flow(ControlFlow::Poll);
        match event {
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::CloseRequested => {
                    if loop_app.on_close() {
                        request_stop();
                    }
                }
                WindowEvent::Resized(size) => {
                    loop_app.on_resize(size.width, size.height);
                    let mut renderer = loop_renderer.write();
                    if let Err(err) = renderer.resize(&loop_device, size.width, size.height) {
                        log::warn!("swap chain rebuild failed: {err}");
                    }
                }
                WindowEvent::KeyboardInput { event, .. } => {
                    let name = key_name(&event.physical_key);
                    match (event.state, event.repeat) {
                        (ElementState::Pressed, false) => loop_app.on_key_down(&name),
                        (ElementState::Pressed, true) => loop_app.on_key_repeat(&name),
                        (ElementState::Released, _) => loop_app.on_key_up(&name),
                    }
                }
                WindowEvent::CursorMoved { position, .. } => {
                    loop_app.on_mouse_move(position.x, position.y);
                }
                WindowEvent::MouseInput { state, button, .. } => match state {
                    ElementState::Pressed => loop_app.on_mouse_button_down(map_button(button)),
                    ElementState::Released => loop_app.on_mouse_button_up(map_button(button)),
                },
                _ => {}
            },
            Event::AboutToWait => {
                if STOP_REQUESTED.load(Ordering::Acquire) {
                    elwt.exit();
                    return;
                }

                let delta = last_frame.elapsed().as_secs_f32();
                last_frame = Instant::now();
                loop_app.on_update(delta);

                let opened = {
                    let mut renderer = loop_renderer.write();
                    match renderer.begin_frame() {
                        Ok(opened) => opened,
                        Err(err) => {
                            log::error!("BeginFrame failed: {err}");
                            elwt.exit();
                            return;
                        }
                    }
                };
                if !opened {
                    // Iconified or occluded; skip the frame entirely.
                    return;
                }

                loop_frame_start.wait();
                loop_frame_done.wait();

                let mut renderer = loop_renderer.write();
                if let Err(err) = renderer.end_frame() {
                    log::error!("EndFrame failed: {err}");
                    elwt.exit();
                }
            }
            _ => {}
        }
    });

    // Unpark and join the pool.
    workers_live.store(false, Ordering::Release);
    frame_start.wait();
    for worker in workers {
        let _ = worker.join();
    }
    crate::window::unregister_window_source();
    log::info!("application `{}` exited", config.application_name);

    run_result.map_err(|err| {
        crate::error::Error::new(sbt::ErrorCode::SystemError, format!("event loop: {err}"))
    })
}
