//! The frame lifecycle and submission pipeline.
//!
//! `begin_frame` waits for the target frame's fence (and the swap chain's
//! latency object on D3D12), then opens the submission window. Worker
//! threads fetch per-thread recorders with [`Renderer::with_command_object`]
//! and publish finished lists; `end_frame` closes the window, drains the
//! frame's FIFO into one submit, presents, signals the fence and advances
//! the ring.

pub(crate) mod submit;
pub(crate) mod thread_map;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sbt::{Backend, ErrorCode};

use crate::command::CommandObject;
use crate::dispatch::{
    ensure_same_backend, AnyCommandBuffer, AnyDevice, AnyEncoder, AnyFrameOutput, AnyQueue,
    AnySurface, CommandQueue, LogicalDevice, Surface, SwapChain,
};
use crate::error::{Error, SableResult};
use submit::SubmitShared;
use thread_map::ThreadMap;

static RENDERER_IDS: AtomicU64 = AtomicU64::new(1);

/// Per-frame state: fence value, acquired image and bookkeeping. The
/// ready-list FIFO lives in the shared submission block.
#[derive(Clone, Copy, Debug, Default)]
struct FrameContext {
    /// `0` = not yet signaled.
    fence_value: u64,
    /// Back-buffer image index acquired for this frame.
    image_index: u32,
    /// Lists drained into this frame's last submit, for diagnostics.
    submitted_lists: usize,
}

/// Snapshot handed to recorders that open a render pass; carries the
/// backend-specific prefilled begin info for the current back buffer.
pub struct OutputTargetInfo {
    output: AnyFrameOutput,
}

impl OutputTargetInfo {
    pub(crate) fn frame_output(&self) -> AnyFrameOutput {
        match &self.output {
            #[cfg(feature = "vulkan")]
            AnyFrameOutput::Vulkan(info) => AnyFrameOutput::Vulkan(*info),
            #[cfg(all(windows, feature = "dx12"))]
            AnyFrameOutput::Dx12(target) => AnyFrameOutput::Dx12(*target),
            #[cfg(all(windows, feature = "gles"))]
            AnyFrameOutput::Gl { extent } => AnyFrameOutput::Gl { extent: *extent },
        }
    }
}

/// The frame-pipeline runtime over one swap chain.
pub struct Renderer {
    backend: Backend,
    device: Arc<AnyDevice>,
    queue: Arc<AnyQueue>,
    surface: Arc<AnySurface>,
    surface_extent: (u32, u32),
    frames: Vec<FrameContext>,
    current_frame: usize,
    previous_frame: usize,
    fence_value: u64,
    submit: Arc<SubmitShared<AnyCommandBuffer>>,
    threads: Arc<ThreadMap>,
    occluded: bool,
    vsync: bool,
}

impl Renderer {
    /// Build the renderer over an already-configured swap chain.
    pub fn new(
        device: &LogicalDevice,
        queue: &CommandQueue,
        surface: &Surface,
        swap_chain: &SwapChain,
    ) -> SableResult<Self> {
        let backend = ensure_same_backend!("CreateRenderer", device, queue, surface, swap_chain);
        let frame_count = swap_chain.buffer_count() as usize;
        let id = RENDERER_IDS.fetch_add(1, Ordering::Relaxed);
        Ok(Self {
            backend,
            device: Arc::clone(&device.inner),
            queue: Arc::clone(&queue.inner),
            surface: Arc::clone(&surface.inner),
            surface_extent: surface.extent(),
            frames: vec![FrameContext::default(); frame_count],
            current_frame: 0,
            previous_frame: 0,
            fence_value: 0,
            submit: Arc::new(SubmitShared::new(frame_count)),
            threads: Arc::new(ThreadMap::new(id)),
            occluded: false,
            vsync: true,
        })
    }

    /// The backend tag.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Number of frames in the ring.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Index of the frame currently recording.
    pub fn current_frame_index(&self) -> usize {
        self.current_frame
    }

    /// Index of the previously submitted frame.
    pub fn previous_frame_index(&self) -> usize {
        self.previous_frame
    }

    /// The current frame's fence value (`0` before its first submit).
    pub fn current_fence_value(&self) -> u64 {
        self.frames[self.current_frame].fence_value
    }

    /// Number of worker threads with live command-object rows.
    pub fn thread_count(&self) -> usize {
        self.threads.thread_count()
    }

    /// Record a window resize; the swap chain is rebuilt before the next
    /// frame opens.
    pub fn resize(&mut self, device: &LogicalDevice, width: u32, height: u32) -> SableResult<()> {
        self.surface_extent = (width, height);
        if width == 0 || height == 0 {
            return Ok(());
        }
        let config = hal::SurfaceConfiguration {
            width,
            height,
            buffer_count: self.frames.len() as u32,
            vsync: self.vsync,
        };
        match (&*device.inner, &*self.surface) {
            #[cfg(feature = "vulkan")]
            (AnyDevice::Vulkan(device), AnySurface::Vulkan(surface)) => {
                surface.configure(device, &config)?;
            }
            #[cfg(all(windows, feature = "dx12"))]
            (AnyDevice::Dx12(device), AnySurface::Dx12(surface)) => {
                let AnyQueue::Dx12(queue) = &*self.queue else {
                    return Err(Error::backend_mismatch("Resize"));
                };
                surface.configure(device, queue, &config)?;
            }
            #[cfg(all(windows, feature = "gles"))]
            (AnyDevice::Gl(_), AnySurface::Gl(_)) => {}
            #[allow(unreachable_patterns)]
            _ => return Err(Error::backend_mismatch("Resize")),
        }
        Ok(())
    }

    /// Open a new frame.
    ///
    /// Returns `false` (frame skipped, index not advanced) when the window
    /// is iconified or the swap chain reports occlusion; otherwise waits
    /// for the target frame's fence, opens the submission window and
    /// returns `true`.
    pub fn begin_frame(&mut self) -> SableResult<bool> {
        profiling::scope!("begin_frame");
        if self.surface_extent.0 == 0 || self.surface_extent.1 == 0 {
            return Ok(false);
        }

        let frame = self.frames[self.current_frame];
        match (&*self.queue, &*self.surface) {
            #[cfg(feature = "vulkan")]
            (AnyQueue::Vulkan(queue), AnySurface::Vulkan(surface)) => {
                if !queue.wait(frame.fence_value, hal::vulkan::FENCE_WAIT_TIMEOUT_NS)? {
                    return Err(Error::new(
                        ErrorCode::SystemError,
                        "frame fence wait exceeded its deadline",
                    ));
                }
                let image_index = match surface.acquire(self.current_frame) {
                    Ok((index, _suboptimal)) => index,
                    Err(hal::SurfaceError::Occluded) | Err(hal::SurfaceError::Outdated) => {
                        self.occluded = true;
                        return Ok(false);
                    }
                    Err(err) => return Err(err.into()),
                };
                self.frames[self.current_frame].image_index = image_index;
            }
            #[cfg(all(windows, feature = "dx12"))]
            (AnyQueue::Dx12(queue), AnySurface::Dx12(surface)) => {
                if surface.is_iconified()
                    || (self.occluded && surface.test_present_occluded())
                {
                    return Ok(false);
                }
                self.occluded = false;
                // All-of wait: frame-latency waitable plus the frame fence.
                if !surface.wait_frame(queue, frame.fence_value, hal::dx12::FENCE_WAIT_TIMEOUT_MS)?
                {
                    return Err(Error::new(
                        ErrorCode::SystemError,
                        "frame wait exceeded its deadline",
                    ));
                }
                self.frames[self.current_frame].image_index =
                    surface.current_back_buffer_index();
            }
            #[cfg(all(windows, feature = "gles"))]
            (AnyQueue::Gl(queue), AnySurface::Gl(surface)) => {
                if surface.is_iconified() {
                    return Ok(false);
                }
                queue.wait(frame.fence_value, 1_000)?;
                self.frames[self.current_frame].image_index = self.current_frame as u32;
            }
            #[allow(unreachable_patterns)]
            _ => return Err(Error::backend_mismatch("BeginFrame")),
        }

        self.submit.open(self.current_frame);
        Ok(true)
    }

    /// Run `f` with the calling thread's recorder for the current frame,
    /// creating the per-frame recorders on the thread's first use.
    pub fn with_command_object<R>(
        &self,
        f: impl FnOnce(&mut CommandObject) -> R,
    ) -> SableResult<R> {
        let row = self.threads.row::<CommandObject>(self.frames.len());
        row.try_with_slot(self.current_frame, || self.create_command_object(), f)
    }

    /// Raw pointer form backing the C ABI's `GetCommandObject`; stable for
    /// the thread's lifetime with this renderer.
    pub(crate) fn command_object_ptr(&self) -> SableResult<*mut CommandObject> {
        let row = self.threads.row::<CommandObject>(self.frames.len());
        row.try_slot_ptr(self.current_frame, || self.create_command_object())
    }

    fn create_command_object(&self) -> SableResult<CommandObject> {
        let kind = sbt::CommandObjectType::AllCommands;
        let encoder = match &*self.device {
            #[cfg(feature = "vulkan")]
            AnyDevice::Vulkan(device) => AnyEncoder::Vulkan(device.create_command_encoder(kind)?),
            #[cfg(all(windows, feature = "dx12"))]
            AnyDevice::Dx12(device) => AnyEncoder::Dx12(device.create_command_encoder(kind)?),
            #[cfg(all(windows, feature = "gles"))]
            AnyDevice::Gl(device) => AnyEncoder::Gl(device.create_command_encoder(kind)?),
        };
        Ok(CommandObject::new(encoder, Arc::downgrade(&self.submit)))
    }

    /// Prefilled output-target info for the current back buffer.
    pub fn output_target(&self) -> SableResult<OutputTargetInfo> {
        let image_index = self.frames[self.current_frame].image_index;
        let output = match &*self.surface {
            #[cfg(feature = "vulkan")]
            AnySurface::Vulkan(surface) => {
                let info = surface.render_pass_info(image_index).ok_or(Error::new(
                    ErrorCode::SystemError,
                    "render pass requested with no swap chain",
                ))?;
                AnyFrameOutput::Vulkan(info)
            }
            #[cfg(all(windows, feature = "dx12"))]
            AnySurface::Dx12(surface) => {
                let target = surface.output_target(image_index).ok_or(Error::new(
                    ErrorCode::SystemError,
                    "output target requested with no swap chain",
                ))?;
                AnyFrameOutput::Dx12(target)
            }
            #[cfg(all(windows, feature = "gles"))]
            AnySurface::Gl(surface) => AnyFrameOutput::Gl {
                extent: surface.extent(),
            },
        };
        Ok(OutputTargetInfo { output })
    }

    /// Close the submission window, submit the frame's lists, present and
    /// advance the ring.
    pub fn end_frame(&mut self) -> SableResult<()> {
        profiling::scope!("end_frame");
        // 1. No further lists may be pushed into this frame.
        let ready = self.submit.close();
        let next_value = self.fence_value + 1;

        let frame = self.current_frame;
        let image_index = self.frames[frame].image_index;
        self.frames[frame].submitted_lists = ready.len();

        match (&*self.queue, &*self.surface) {
            #[cfg(feature = "vulkan")]
            (AnyQueue::Vulkan(queue), AnySurface::Vulkan(surface)) => {
                let buffers: Vec<hal::vulkan::CommandBuffer> = ready
                    .into_iter()
                    .map(|buffer| match buffer {
                        AnyCommandBuffer::Vulkan(raw) => Ok(raw),
                        #[allow(unreachable_patterns)]
                        _ => Err(Error::backend_mismatch("EndFrame")),
                    })
                    .collect::<SableResult<_>>()?;
                // One submit: waits the acquire semaphore, signals the
                // present semaphore and the fence value.
                queue.submit(&buffers, Some(surface), frame, image_index, next_value)?;
                match queue.present(surface, image_index) {
                    Ok(_suboptimal) => {}
                    Err(hal::SurfaceError::Outdated) | Err(hal::SurfaceError::Occluded) => {
                        self.occluded = true;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
            #[cfg(all(windows, feature = "dx12"))]
            (AnyQueue::Dx12(queue), AnySurface::Dx12(surface)) => {
                let buffers: Vec<hal::dx12::CommandBuffer> = ready
                    .into_iter()
                    .map(|buffer| match buffer {
                        AnyCommandBuffer::Dx12(raw) => Ok(raw),
                        #[allow(unreachable_patterns)]
                        _ => Err(Error::backend_mismatch("EndFrame")),
                    })
                    .collect::<SableResult<_>>()?;
                queue.execute(&buffers);
                self.occluded = surface.present(self.vsync)?;
                queue.signal(next_value)?;
            }
            #[cfg(all(windows, feature = "gles"))]
            (AnyQueue::Gl(queue), AnySurface::Gl(surface)) => {
                let buffers: Vec<hal::gles::CommandBuffer> = ready
                    .into_iter()
                    .map(|buffer| match buffer {
                        AnyCommandBuffer::Gl(raw) => Ok(raw),
                        #[allow(unreachable_patterns)]
                        _ => Err(Error::backend_mismatch("EndFrame")),
                    })
                    .collect::<SableResult<_>>()?;
                queue.execute(&buffers);
                queue.present(surface)?;
                queue.signal(next_value)?;
            }
            #[allow(unreachable_patterns)]
            _ => return Err(Error::backend_mismatch("EndFrame")),
        }

        // 4–5. Store the fence value, then advance the ring.
        self.fence_value = next_value;
        self.frames[frame].fence_value = next_value;
        self.previous_frame = frame;
        self.current_frame = match &*self.surface {
            #[cfg(all(windows, feature = "dx12"))]
            AnySurface::Dx12(surface) => surface.current_back_buffer_index() as usize,
            _ => (frame + 1) % self.frames.len(),
        };
        Ok(())
    }

    /// Lists drained by the most recent `end_frame` for `frame`.
    pub fn submitted_list_count(&self, frame: usize) -> usize {
        self.frames[frame].submitted_lists
    }

    /// Whether the submission window is currently open.
    pub fn submission_window_open(&self) -> bool {
        self.submit.is_open()
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // Wait on the last submitted frame before anything else dies.
        let last = self.frames[self.previous_frame].fence_value;
        if last != 0 {
            let result = match &*self.queue {
                #[cfg(feature = "vulkan")]
                AnyQueue::Vulkan(queue) => {
                    queue.wait(last, hal::vulkan::FENCE_WAIT_TIMEOUT_NS).map(|_| ())
                }
                #[cfg(all(windows, feature = "dx12"))]
                AnyQueue::Dx12(queue) => {
                    queue.wait(last, hal::dx12::FENCE_WAIT_TIMEOUT_MS).map(|_| ())
                }
                #[cfg(all(windows, feature = "gles"))]
                AnyQueue::Gl(queue) => queue.wait(last, 1_000).map(|_| ()),
            };
            if let Err(err) = result {
                log::warn!("final frame fence wait failed: {err}");
            }
        }
        // Thread-local command-object rows go before the device.
        self.threads.clear();
    }
}
