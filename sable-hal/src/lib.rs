/*!
# Sable hardware abstraction layer.

One module per native backend, plus the pieces every backend shares: the
best-fit block allocator behind the heap pools, and the shader pipeline
(GLSL → SPIR-V → HLSL → DXIL with reflection).

Backend types are concrete; the `sable` crate wraps them in tagged variants
and performs all cross-backend dispatch. Errors below are typed per failure
domain and converted to the stable `ErrorCode` taxonomy exactly once, at the
dispatch seam.

## Threading

Devices, queues and surfaces are owned by the renderer and are touched by
the main thread only, with two exceptions: queue submission during
`EndFrame`, and command recording, which happens on worker threads through
per-thread encoders. The OpenGL backend records into a CPU-side command
stream and replays it on the context thread at submit time.
*/

#![allow(
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
    // Explicit lifetimes are often easier to reason about.
    clippy::needless_lifetimes,
    // No need for defaults in the internal types.
    clippy::new_without_default,
    // Need many arguments for some creation functions.
    clippy::too_many_arguments,
)]
#![warn(trivial_casts, trivial_numeric_casts, unused_qualifications)]

pub mod pool;
pub mod shader;

#[cfg(feature = "vulkan")]
pub mod vulkan;

#[cfg(all(feature = "dx12", windows))]
pub mod dx12;

#[cfg(all(feature = "gles", windows))]
pub mod gles;

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

pub use sbt::FenceValue;

/// Fast hash map used internally and in reflection tables.
pub type FastHashMap<K, V> =
    std::collections::HashMap<K, V, std::hash::BuildHasherDefault<rustc_hash::FxHasher>>;

/// Default number of back buffers in a swap chain.
pub const DEFAULT_BUFFER_COUNT: u32 = 3;

/// Error raised while creating a backend instance or enumerating adapters.
#[derive(Clone, Debug, thiserror::Error)]
pub enum InstanceError {
    /// The backend runtime (loader, dll, ICD) is not present on this system.
    #[error("backend is not available: {0}")]
    NotAvailable(String),
    /// No adapter survived ranking.
    #[error("no suitable adapter found")]
    NoSuitableAdapter,
    /// The OS refused a resource needed during instance setup.
    #[error("system refused a resource: {0}")]
    System(String),
}

/// Error raised by device-level operations.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum DeviceError {
    /// Host or device memory exhaustion.
    #[error("out of memory")]
    OutOfMemory,
    /// The logical device was removed or reset.
    #[error("device is lost")]
    Lost,
    /// A semantically invalid argument reached the backend.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
}

/// Error raised by surface configuration, acquire and present.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SurfaceError {
    /// The swap chain no longer matches the window and must be rebuilt.
    #[error("surface is outdated, needs to be re-configured")]
    Outdated,
    /// The surface or its window is gone.
    #[error("surface is lost")]
    Lost,
    /// The window is occluded or iconified; the frame should be skipped.
    #[error("surface is occluded")]
    Occluded,
    /// A device error surfaced through the swap chain.
    #[error(transparent)]
    Device(#[from] DeviceError),
    /// Backend-specific failure.
    #[error("surface error: {0}")]
    Other(&'static str),
}

/// Error raised along the shader pipeline.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ShaderError {
    /// The front-end rejected the source.
    #[error("shader compilation failed: {0}")]
    Compilation(String),
    /// SPIR-V → HLSL cross-compilation failed.
    #[error("shader cross-compilation failed: {0}")]
    CrossCompile(String),
    /// Reflection over the compiled module failed.
    #[error("shader reflection failed: {0}")]
    Reflection(String),
    /// The stage/language/target combination has no lowering.
    #[error("no target profile for {stage:?} at shader model {major}.{minor}")]
    UnsupportedStage {
        /// Requested stage.
        stage: sbt::ShaderStage,
        /// Shader model major version.
        major: u8,
        /// Shader model minor version.
        minor: u8,
    },
}

/// Error raised by pipeline-state creation.
#[derive(Clone, Debug, thiserror::Error)]
pub enum PipelineError {
    /// One of the shader stages failed; carries the stage report.
    #[error(transparent)]
    Shader(#[from] ShaderError),
    /// The backend rejected the pipeline description.
    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// Configuration a surface is (re)built with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SurfaceConfiguration {
    /// Width of the back buffers in pixels.
    pub width: u32,
    /// Height of the back buffers in pixels.
    pub height: u32,
    /// Number of back buffers in the ring.
    pub buffer_count: u32,
    /// Present with vertical sync.
    pub vsync: bool,
}

impl SurfaceConfiguration {
    /// Whether the configuration describes a presentable area.
    pub fn is_presentable(&self) -> bool {
        self.width != 0 && self.height != 0
    }
}

/// Tracks the abstract [`sbt::ResourceState`] of one resource so barriers
/// can infer their `before` state and update it atomically.
#[derive(Debug)]
pub struct StateTracker {
    state: AtomicU8,
}

impl StateTracker {
    /// Start tracking in `state`.
    pub fn new(state: sbt::ResourceState) -> Self {
        Self {
            state: AtomicU8::new(state as u8),
        }
    }

    /// Current state.
    pub fn load(&self) -> sbt::ResourceState {
        decode_state(self.state.load(Ordering::Acquire))
    }

    /// Swap in `after`, returning the previous state the barrier should
    /// transition out of. Lost races re-run with the fresh observation.
    pub fn transition(&self, after: sbt::ResourceState) -> sbt::ResourceState {
        let mut before = self.state.load(Ordering::Acquire);
        loop {
            match self.state.compare_exchange_weak(
                before,
                after as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return decode_state(before),
                Err(observed) => before = observed,
            }
        }
    }
}

fn decode_state(raw: u8) -> sbt::ResourceState {
    use sbt::ResourceState as S;
    match raw {
        x if x == S::Common as u8 => S::Common,
        x if x == S::VertexBuffer as u8 => S::VertexBuffer,
        x if x == S::IndexBuffer as u8 => S::IndexBuffer,
        x if x == S::Present as u8 => S::Present,
        x if x == S::OutputTarget as u8 => S::OutputTarget,
        x if x == S::CopySrc as u8 => S::CopySrc,
        _ => S::CopyDest,
    }
}

/// Guards the "at most one live `Resource` per `VideoMemory`" invariant.
///
/// `acquire` flips the binding flag and fails if a resource is already
/// bound; `release` clears it. `wait_until_free` spins a bounded number of
/// yields and then parks in short sleeps, for use by the `VideoMemory`
/// destructor.
#[derive(Debug)]
pub struct BindingGuard {
    live: AtomicUsize,
}

impl BindingGuard {
    const SPIN_LIMIT: u32 = 100;

    /// New guard with no live binding.
    pub fn new() -> Self {
        Self {
            live: AtomicUsize::new(0),
        }
    }

    /// Mark the memory as bound by a resource.
    pub fn acquire(&self) -> Result<(), DeviceError> {
        match self
            .live
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => Ok(()),
            Err(_) => Err(DeviceError::InvalidArgument(
                "video memory already has a live resource bound",
            )),
        }
    }

    /// Clear the binding flag.
    pub fn release(&self) {
        self.live.store(0, Ordering::Release);
    }

    /// Number of live bindings, `0` or `1`.
    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Block until no resource is bound.
    pub fn wait_until_free(&self) {
        let mut spins = 0u32;
        while self.live.load(Ordering::Acquire) != 0 {
            if spins < Self::SPIN_LIMIT {
                spins += 1;
                std::thread::yield_now();
            } else {
                std::thread::sleep(std::time::Duration::from_micros(100));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_tracker_infers_before() {
        let tracker = StateTracker::new(sbt::ResourceState::Present);
        assert_eq!(
            tracker.transition(sbt::ResourceState::OutputTarget),
            sbt::ResourceState::Present
        );
        assert_eq!(tracker.load(), sbt::ResourceState::OutputTarget);
        assert_eq!(
            tracker.transition(sbt::ResourceState::Present),
            sbt::ResourceState::OutputTarget
        );
    }

    #[test]
    fn binding_guard_is_exclusive() {
        let guard = BindingGuard::new();
        assert_eq!(guard.live_count(), 0);
        guard.acquire().unwrap();
        assert_eq!(guard.live_count(), 1);
        assert!(guard.acquire().is_err());
        guard.release();
        assert_eq!(guard.live_count(), 0);
        guard.acquire().unwrap();
        guard.release();
    }

    #[test]
    fn binding_guard_wait_unblocks() {
        use std::sync::Arc;
        let guard = Arc::new(BindingGuard::new());
        guard.acquire().unwrap();
        let contender = Arc::clone(&guard);
        let handle = std::thread::spawn(move || {
            contender.wait_until_free();
            contender.acquire().unwrap();
        });
        std::thread::sleep(std::time::Duration::from_millis(10));
        guard.release();
        handle.join().unwrap();
        assert_eq!(guard.live_count(), 1);
    }
}
