//! Slot-and-flag task joins and the asynchronous PSO builder.
//!
//! Tasks write their result into a pre-allocated slot and raise an atomic
//! flag; the await point blocks on all flags and re-raises any captured
//! panic or error. Scheduling goes through the [`Scheduler`] seam so the
//! host's worker pool can carry the work; the default spawns plain
//! threads.

use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::dispatch::{
    AnyDevice, AnyPipeline, AnyShaderLibrary, LogicalDevice, PipelineState, ShaderLibrary, Surface,
};
use crate::error::{Error, SableResult};

/// The task-submission seam to the external scheduler/worker pool.
pub trait Scheduler: Send + Sync {
    /// Run `task` at some point, on any thread.
    fn spawn(&self, task: Box<dyn FnOnce() + Send>);
}

/// Default scheduler: one OS thread per task.
pub struct ThreadScheduler;

impl Scheduler for ThreadScheduler {
    fn spawn(&self, task: Box<dyn FnOnce() + Send>) {
        std::thread::spawn(task);
    }
}

struct TaskSlot<T> {
    result: Mutex<Option<std::thread::Result<SableResult<T>>>>,
    done: AtomicBool,
    cond: Condvar,
}

/// A pending result produced by a scheduler task.
pub struct AsyncTask<T> {
    slot: Arc<TaskSlot<T>>,
}

impl<T: Send + 'static> AsyncTask<T> {
    /// Submit `work` to `scheduler`; panics and errors are captured into
    /// the slot.
    pub fn spawn(
        scheduler: &dyn Scheduler,
        work: impl FnOnce() -> SableResult<T> + Send + 'static,
    ) -> Self {
        let slot = Arc::new(TaskSlot {
            result: Mutex::new(None),
            done: AtomicBool::new(false),
            cond: Condvar::new(),
        });
        let task_slot = Arc::clone(&slot);
        scheduler.spawn(Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(work));
            *task_slot.result.lock() = Some(outcome);
            task_slot.done.store(true, Ordering::Release);
            let _guard = task_slot.result.lock();
            task_slot.cond.notify_all();
        }));
        Self { slot }
    }

    /// Block until the task finishes; re-raises a captured panic and
    /// propagates a captured error.
    pub fn wait(self) -> SableResult<T> {
        let mut result = self.slot.result.lock();
        while result.is_none() {
            self.slot.cond.wait(&mut result);
        }
        match result.take().expect("slot filled above") {
            Ok(outcome) => outcome,
            Err(panic) => resume_unwind(panic),
        }
    }

    /// Whether the task has finished.
    pub fn is_done(&self) -> bool {
        self.slot.done.load(Ordering::Acquire)
    }
}

/// Builds a graphics PSO from two shader sources.
///
/// Stage one compiles the vertex and pixel modules in two parallel tasks;
/// stage two fans out layout derivation and per-stage root-parameter
/// synthesis, then the merge, root-signature serialization and pipeline
/// creation run at the join point.
pub struct PipelineBuilder<'a> {
    device: &'a LogicalDevice,
    surface: Option<&'a Surface>,
    topology: sbt::PrimitiveTopology,
}

impl<'a> PipelineBuilder<'a> {
    /// A builder targeting `device`; Vulkan pipelines additionally need
    /// the surface whose render pass they draw into.
    pub fn new(device: &'a LogicalDevice, surface: Option<&'a Surface>) -> Self {
        Self {
            device,
            surface,
            topology: sbt::PrimitiveTopology::TriangleList,
        }
    }

    /// Override the fixed-function topology class.
    pub fn topology(mut self, topology: sbt::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Compile both stages and build the pipeline.
    pub fn build(
        &self,
        scheduler: &dyn Scheduler,
        vertex_source: Vec<u8>,
        pixel_source: Vec<u8>,
        language: sbt::ShaderLanguage,
    ) -> SableResult<PipelineState> {
        profiling::scope!("PipelineBuilder::build");

        // Stage 1: the two compile tasks, awaited jointly.
        let device_for_vs = self.device.clone();
        let vs_task = AsyncTask::spawn(scheduler, move || {
            ShaderLibrary::new(
                &device_for_vs,
                &vertex_source,
                sbt::ShaderStage::Vertex,
                language,
            )
        });
        let device_for_ps = self.device.clone();
        let ps_task = AsyncTask::spawn(scheduler, move || {
            ShaderLibrary::new(
                &device_for_ps,
                &pixel_source,
                sbt::ShaderStage::Pixel,
                language,
            )
        });
        let vertex = vs_task.wait()?;
        let pixel = ps_task.wait()?;

        // Stage 2: reflect the input layout and synthesize both stages'
        // root parameters in parallel.
        let vs_for_layout = Arc::clone(&vertex.inner);
        let layout_task = AsyncTask::spawn(scheduler, move || {
            let words = library_spirv(&vs_for_layout)?;
            hal::shader::layout::derive_vertex_inputs(&words).map_err(Error::from)
        });
        let vs_for_params = Arc::clone(&vertex.inner);
        let vs_params_task = AsyncTask::spawn(scheduler, move || {
            Ok(hal::shader::layout::synthesize_root_parameters(
                library_reflection(&vs_for_params),
            ))
        });
        let ps_for_params = Arc::clone(&pixel.inner);
        let ps_params_task = AsyncTask::spawn(scheduler, move || {
            Ok(hal::shader::layout::synthesize_root_parameters(
                library_reflection(&ps_for_params),
            ))
        });

        let vertex_layout = layout_task.wait()?;
        let vs_params = vs_params_task.wait()?;
        let ps_params = ps_params_task.wait()?;
        let parameters = hal::shader::layout::merge_root_parameters(&[vs_params, ps_params]);

        // Join: create the backend pipeline.
        let inner = match (&*self.device.inner, &*vertex.inner, &*pixel.inner) {
            #[cfg(feature = "vulkan")]
            (
                AnyDevice::Vulkan(device),
                AnyShaderLibrary::Vulkan(vs),
                AnyShaderLibrary::Vulkan(ps),
            ) => {
                let surface = self.surface.ok_or(Error::new(
                    sbt::ErrorCode::InvalidParameter,
                    "vulkan pipelines need a surface",
                ))?;
                let crate::dispatch::AnySurface::Vulkan(surface) = &*surface.inner else {
                    return Err(Error::backend_mismatch("BuildPipeline"));
                };
                AnyPipeline::Vulkan(device.create_pipeline_state(
                    vs,
                    ps,
                    self.topology,
                    surface,
                    &vertex_layout,
                )?)
            }
            #[cfg(all(windows, feature = "dx12"))]
            (AnyDevice::Dx12(device), AnyShaderLibrary::Dx12(vs), AnyShaderLibrary::Dx12(ps)) => {
                AnyPipeline::Dx12(device.create_pipeline_state(
                    vs,
                    ps,
                    self.topology,
                    &parameters,
                    &vertex_layout,
                )?)
            }
            #[cfg(all(windows, feature = "gles"))]
            (AnyDevice::Gl(device), AnyShaderLibrary::Gl(vs), AnyShaderLibrary::Gl(ps)) => {
                let _ = &parameters;
                AnyPipeline::Gl(device.create_pipeline_state(
                    vs,
                    ps,
                    self.topology,
                    &vertex_layout,
                )?)
            }
            #[allow(unreachable_patterns)]
            _ => return Err(Error::backend_mismatch("BuildPipeline")),
        };

        Ok(PipelineState::from_parts(inner, self.device.backend()))
    }
}

fn library_spirv(library: &AnyShaderLibrary) -> SableResult<Vec<u32>> {
    match library {
        #[cfg(feature = "vulkan")]
        AnyShaderLibrary::Vulkan(library) => Ok(library.spirv().to_vec()),
        #[cfg(all(windows, feature = "dx12"))]
        AnyShaderLibrary::Dx12(library) => library.spirv().map(|words| words.to_vec()).ok_or(
            Error::new(
                sbt::ErrorCode::InvalidParameter,
                "pre-compiled DXIL has no reflectable input layout",
            ),
        ),
        #[cfg(all(windows, feature = "gles"))]
        AnyShaderLibrary::Gl(library) => Ok(library.spirv().to_vec()),
    }
}

fn library_reflection(library: &AnyShaderLibrary) -> &hal::shader::ShaderReflection {
    match library {
        #[cfg(feature = "vulkan")]
        AnyShaderLibrary::Vulkan(library) => library.reflection(),
        #[cfg(all(windows, feature = "dx12"))]
        AnyShaderLibrary::Dx12(library) => library.reflection(),
        #[cfg(all(windows, feature = "gles"))]
        AnyShaderLibrary::Gl(library) => library.reflection(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_join_on_their_flags() {
        let scheduler = ThreadScheduler;
        let task = AsyncTask::spawn(&scheduler, || Ok(21u32 * 2));
        assert_eq!(task.wait().unwrap(), 42);
    }

    #[test]
    fn errors_surface_at_the_wait_site() {
        let scheduler = ThreadScheduler;
        let task: AsyncTask<u32> = AsyncTask::spawn(&scheduler, || {
            Err(Error::new(sbt::ErrorCode::InvalidParameter, "boom"))
        });
        let err = task.wait().unwrap_err();
        assert_eq!(err.code, sbt::ErrorCode::InvalidParameter);
    }

    #[test]
    fn panics_resume_at_the_wait_site() {
        let scheduler = ThreadScheduler;
        let task: AsyncTask<u32> = AsyncTask::spawn(&scheduler, || panic!("shader exploded"));
        let outcome = catch_unwind(AssertUnwindSafe(|| task.wait()));
        assert!(outcome.is_err());
    }

    #[test]
    fn many_tasks_fan_out() {
        let scheduler = ThreadScheduler;
        let tasks: Vec<AsyncTask<usize>> = (0..16)
            .map(|index| AsyncTask::spawn(&scheduler, move || Ok(index * index)))
            .collect();
        let squares: Vec<usize> = tasks
            .into_iter()
            .map(|task| task.wait().unwrap())
            .collect();
        assert_eq!(squares[7], 49);
        assert_eq!(squares.len(), 16);
    }
}
