//! The seam to the platform windowing collaborator.
//!
//! The RHI itself never creates windows; the host (usually the app shim)
//! registers a [`WindowSource`] once, and `CreateSurface` asks it for a
//! native window of the requested size. Hosts that create windows
//! themselves can skip the registry and use
//! [`Surface::from_handles`](crate::Surface::from_handles) directly.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use sbt::ErrorCode;

use crate::dispatch::WindowHandles;
use crate::error::{Error, SableResult};

/// Provider of native windows and title updates.
pub trait WindowSource: Send + Sync {
    /// Create a window of `width`×`height`, returning its raw handles.
    fn create_window(
        &self,
        width: u32,
        height: u32,
        flags: sbt::SurfaceFlags,
    ) -> Result<WindowHandles, String>;

    /// Update a window's title.
    fn set_title(&self, handles: &WindowHandles, title: &str) -> Result<(), String>;
}

static SOURCE: Lazy<RwLock<Option<Arc<dyn WindowSource>>>> = Lazy::new(|| RwLock::new(None));

/// Install the process-wide window source; the previous one is replaced.
pub fn register_window_source(source: Arc<dyn WindowSource>) {
    *SOURCE.write() = Some(source);
}

/// Remove the installed window source.
pub fn unregister_window_source() {
    *SOURCE.write() = None;
}

pub(crate) fn create_window(
    width: u32,
    height: u32,
    flags: sbt::SurfaceFlags,
) -> SableResult<WindowHandles> {
    let source = SOURCE.read();
    let source = source.as_ref().ok_or(Error::new(
        ErrorCode::SystemError,
        "no window source registered; call register_window_source or use Surface::from_handles",
    ))?;
    source
        .create_window(width, height, flags)
        .map_err(|message| Error::new(ErrorCode::SystemError, message))
}

pub(crate) fn set_title_via_source(handles: &WindowHandles, title: &str) -> SableResult<()> {
    let source = SOURCE.read();
    let source = source.as_ref().ok_or(Error::new(
        ErrorCode::SystemError,
        "no window source registered",
    ))?;
    source
        .set_title(handles, title)
        .map_err(|message| Error::new(ErrorCode::SystemError, message))
}
