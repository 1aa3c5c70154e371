//! The error seam: typed backend errors become stable [`ErrorCode`]s
//! exactly here, and the human-readable message lands in thread-local
//! storage for `GetLastError`.

use std::cell::RefCell;
use std::ffi::CString;

use sbt::ErrorCode;

thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Store `message` as the calling thread's last error.
pub(crate) fn set_last_error(message: impl Into<String>) {
    let message = message.into();
    let stored = CString::new(message.clone())
        .unwrap_or_else(|_| CString::new("invalid error message").unwrap());
    LAST_ERROR.with(|slot| *slot.borrow_mut() = Some(stored));
    log::debug!("last error set: {message}");
}

/// The calling thread's last error message, if any non-`Success` code has
/// been returned on it.
pub fn last_error_message() -> Option<String> {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map(|message| message.to_string_lossy().into_owned())
    })
}

/// Pointer form for the C ABI; valid until the next failing call on this
/// thread.
pub(crate) fn last_error_ptr() -> *const std::os::raw::c_char {
    LAST_ERROR.with(|slot| {
        slot.borrow()
            .as_ref()
            .map_or(std::ptr::null(), |message| message.as_ptr())
    })
}

/// The crate's result type; the payload is `ErrorCode::Success` by
/// construction when `Ok`.
pub type SableResult<T> = Result<T, Error>;

/// A classified failure carrying its stable code and message.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{message}")]
pub struct Error {
    /// Stable taxonomy code.
    pub code: ErrorCode,
    /// Human-readable description.
    pub message: String,
}

impl Error {
    pub(crate) fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The `Unsupported` error used for backend-tag mismatches.
    pub(crate) fn backend_mismatch(operation: &str) -> Self {
        Self::new(
            ErrorCode::Unsupported,
            format!("{operation}: objects belong to different backends"),
        )
    }

    /// Record the message in thread-local storage and yield the code.
    pub(crate) fn commit(self) -> ErrorCode {
        set_last_error(self.message);
        self.code
    }
}

impl From<hal::InstanceError> for Error {
    fn from(err: hal::InstanceError) -> Self {
        let code = match &err {
            hal::InstanceError::NotAvailable(_) => ErrorCode::Unsupported,
            hal::InstanceError::NoSuitableAdapter => ErrorCode::Unsupported,
            hal::InstanceError::System(_) => ErrorCode::SystemError,
        };
        Self::new(code, err.to_string())
    }
}

impl From<hal::DeviceError> for Error {
    fn from(err: hal::DeviceError) -> Self {
        let code = match err {
            hal::DeviceError::OutOfMemory => ErrorCode::BadAllocation,
            hal::DeviceError::Lost => ErrorCode::SystemError,
            hal::DeviceError::InvalidArgument(_) => ErrorCode::InvalidParameter,
        };
        Self::new(code, err.to_string())
    }
}

impl From<hal::SurfaceError> for Error {
    fn from(err: hal::SurfaceError) -> Self {
        let code = match &err {
            hal::SurfaceError::Outdated | hal::SurfaceError::Occluded => ErrorCode::SystemError,
            hal::SurfaceError::Lost => ErrorCode::SystemError,
            hal::SurfaceError::Device(device) => return Self::from(*device),
            hal::SurfaceError::Other(_) => ErrorCode::UnknownError,
        };
        Self::new(code, err.to_string())
    }
}

impl From<hal::ShaderError> for Error {
    fn from(err: hal::ShaderError) -> Self {
        let code = match &err {
            hal::ShaderError::UnsupportedStage { .. } => ErrorCode::Unsupported,
            _ => ErrorCode::InvalidParameter,
        };
        Self::new(code, err.to_string())
    }
}

impl From<hal::PipelineError> for Error {
    fn from(err: hal::PipelineError) -> Self {
        match err {
            hal::PipelineError::Shader(shader) => Self::from(shader),
            hal::PipelineError::Device(device) => Self::from(device),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commit_stores_the_message_per_thread() {
        let code = Error::new(ErrorCode::InvalidParameter, "bad argument").commit();
        assert_eq!(code, ErrorCode::InvalidParameter);
        assert_eq!(last_error_message().as_deref(), Some("bad argument"));

        std::thread::spawn(|| {
            assert_eq!(last_error_message(), None);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn device_errors_classify() {
        assert_eq!(
            Error::from(hal::DeviceError::OutOfMemory).code,
            ErrorCode::BadAllocation
        );
        assert_eq!(
            Error::from(hal::DeviceError::InvalidArgument("x")).code,
            ErrorCode::InvalidParameter
        );
        assert_eq!(
            Error::backend_mismatch("CreateSwapChain").code,
            ErrorCode::Unsupported
        );
    }
}
