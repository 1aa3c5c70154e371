//! WGL context bootstrap.
//!
//! Creates a legacy context to reach `wglCreateContextAttribsARB`, then a
//! 4.5 core-profile context over the real window, and loads the function
//! table through `wglGetProcAddress` with an `opengl32.dll` fallback.

use std::ffi::CString;
use std::os::windows::ffi::OsStrExt as _;

use winapi::{
    shared::{
        minwindef::{HMODULE, PROC, UINT},
        windef::{HDC, HGLRC, HWND},
    },
    um::{libloaderapi, wingdi, winuser},
};

use crate::InstanceError;

const WGL_CONTEXT_MAJOR_VERSION_ARB: i32 = 0x2091;
const WGL_CONTEXT_MINOR_VERSION_ARB: i32 = 0x2092;
const WGL_CONTEXT_PROFILE_MASK_ARB: i32 = 0x9126;
const WGL_CONTEXT_CORE_PROFILE_BIT_ARB: i32 = 0x0001;

type CreateContextAttribs =
    unsafe extern "system" fn(HDC, HGLRC, *const i32) -> HGLRC;

/// Pixel-format attributes a surface is created with.
///
/// The defaults mirror the fixed attribute list of classic engines:
/// double-buffered hardware-accelerated RGBA with a 24-bit depth buffer
/// and 8-bit stencil. Callers may override any of them before surface
/// creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PixelFormatRequest {
    /// Request a double-buffered format.
    pub double_buffer: bool,
    /// Color depth in bits.
    pub color_bits: u8,
    /// Alpha channel depth in bits.
    pub alpha_bits: u8,
    /// Depth buffer bits.
    pub depth_bits: u8,
    /// Stencil buffer bits.
    pub stencil_bits: u8,
}

impl Default for PixelFormatRequest {
    fn default() -> Self {
        Self {
            double_buffer: true,
            color_bits: 24,
            alpha_bits: 8,
            depth_bits: 24,
            stencil_bits: 8,
        }
    }
}

impl PixelFormatRequest {
    fn descriptor(&self) -> wingdi::PIXELFORMATDESCRIPTOR {
        let mut flags = wingdi::PFD_SUPPORT_OPENGL | wingdi::PFD_DRAW_TO_WINDOW;
        if self.double_buffer {
            flags |= wingdi::PFD_DOUBLEBUFFER;
        }
        let mut desc: wingdi::PIXELFORMATDESCRIPTOR = unsafe { std::mem::zeroed() };
        desc.nSize = std::mem::size_of::<wingdi::PIXELFORMATDESCRIPTOR>() as u16;
        desc.nVersion = 1;
        desc.dwFlags = flags;
        desc.iPixelType = wingdi::PFD_TYPE_RGBA;
        desc.cColorBits = self.color_bits;
        desc.cAlphaBits = self.alpha_bits;
        desc.cDepthBits = self.depth_bits;
        desc.cStencilBits = self.stencil_bits;
        desc.iLayerType = wingdi::PFD_MAIN_PLANE;
        desc
    }
}

/// Apply `request` to a window's DC; required before the context can make
/// that DC current.
pub(super) fn set_pixel_format(hdc: HDC, request: &PixelFormatRequest) -> Result<(), String> {
    unsafe {
        let desc = request.descriptor();
        let format = wingdi::ChoosePixelFormat(hdc, &desc);
        if format == 0 || wingdi::SetPixelFormat(hdc, format, &desc) == 0 {
            return Err("no matching pixel format".to_string());
        }
    }
    Ok(())
}

pub(super) struct WglContext {
    hidden_window: HWND,
    hdc: HDC,
    hglrc: HGLRC,
    library: HMODULE,
}

impl WglContext {
    /// Create a 4.5 core context over a hidden bootstrap window; real
    /// surfaces are made current later with a compatible pixel format.
    pub(super) fn new_hidden(request: &PixelFormatRequest) -> Result<Self, InstanceError> {
        unsafe {
            let instance = libloaderapi::GetModuleHandleW(std::ptr::null());
            let class_name: Vec<u16> = std::ffi::OsStr::new("sable wgl")
                .encode_wide()
                .chain(Some(0))
                .collect();

            let mut class: winuser::WNDCLASSEXW = std::mem::zeroed();
            class.cbSize = std::mem::size_of::<winuser::WNDCLASSEXW>() as UINT;
            class.lpszClassName = class_name.as_ptr();
            class.lpfnWndProc = Some(winuser::DefWindowProcW);
            winuser::RegisterClassExW(&class);

            let hwnd = winuser::CreateWindowExW(
                0,
                class_name.as_ptr(),
                std::ptr::null(),
                0,
                winuser::CW_USEDEFAULT,
                winuser::CW_USEDEFAULT,
                winuser::CW_USEDEFAULT,
                winuser::CW_USEDEFAULT,
                std::ptr::null_mut(),
                std::ptr::null_mut(),
                instance,
                std::ptr::null_mut(),
            );
            if hwnd.is_null() {
                return Err(InstanceError::System(
                    "bootstrap window creation failed".to_string(),
                ));
            }

            let hdc = winuser::GetDC(hwnd);
            if hdc.is_null() {
                return Err(InstanceError::System("GetDC failed".to_string()));
            }

            set_pixel_format(hdc, request).map_err(InstanceError::System)?;

            // Legacy context first; the ARB entry point only exists once a
            // context is current.
            let legacy = wingdi::wglCreateContext(hdc);
            if legacy.is_null() {
                return Err(InstanceError::NotAvailable(
                    "wglCreateContext failed".to_string(),
                ));
            }
            wingdi::wglMakeCurrent(hdc, legacy);

            let name = CString::new("wglCreateContextAttribsARB").unwrap();
            let create_attribs = wingdi::wglGetProcAddress(name.as_ptr());
            let hglrc = if create_attribs.is_null() {
                log::warn!("wglCreateContextAttribsARB unavailable, keeping the legacy context");
                legacy
            } else {
                let create_attribs: CreateContextAttribs = std::mem::transmute(create_attribs);
                let attribs = [
                    WGL_CONTEXT_MAJOR_VERSION_ARB,
                    4,
                    WGL_CONTEXT_MINOR_VERSION_ARB,
                    5,
                    WGL_CONTEXT_PROFILE_MASK_ARB,
                    WGL_CONTEXT_CORE_PROFILE_BIT_ARB,
                    0,
                ];
                let core = create_attribs(hdc, std::ptr::null_mut(), attribs.as_ptr());
                if core.is_null() {
                    log::warn!("4.5 core context creation failed, keeping the legacy context");
                    legacy
                } else {
                    wingdi::wglMakeCurrent(hdc, core);
                    wingdi::wglDeleteContext(legacy);
                    core
                }
            };

            let library_name = CString::new("opengl32.dll").unwrap();
            let library = libloaderapi::LoadLibraryA(library_name.as_ptr());
            if library.is_null() {
                return Err(InstanceError::NotAvailable(
                    "opengl32.dll failed to load".to_string(),
                ));
            }

            Ok(Self {
                hidden_window: hwnd,
                hdc,
                hglrc,
                library,
            })
        }
    }

    /// Make the context current on `hdc` (a surface DC or the bootstrap
    /// DC when null).
    pub(super) fn make_current(&self, hdc: HDC) {
        let target = if hdc.is_null() { self.hdc } else { hdc };
        unsafe { wingdi::wglMakeCurrent(target, self.hglrc) };
    }

    /// Resolve a GL entry point; core 1.1 functions only resolve through
    /// the module handle.
    pub(super) fn load(&self, symbol: &str) -> *const std::ffi::c_void {
        let name = CString::new(symbol).unwrap();
        unsafe {
            let proc: PROC = wingdi::wglGetProcAddress(name.as_ptr());
            if !proc.is_null() && (proc as isize) > 3 && (proc as isize) != -1 {
                return proc as *const _;
            }
            libloaderapi::GetProcAddress(self.library, name.as_ptr()) as *const _
        }
    }

    /// Swap the window's buffers.
    pub(super) fn swap_buffers(&self, hdc: HDC) {
        unsafe { wingdi::SwapBuffers(hdc) };
    }
}

impl Drop for WglContext {
    fn drop(&mut self) {
        unsafe {
            wingdi::wglMakeCurrent(std::ptr::null_mut(), std::ptr::null_mut());
            wingdi::wglDeleteContext(self.hglrc);
            winuser::DestroyWindow(self.hidden_window);
            libloaderapi::FreeLibrary(self.library);
        }
    }
}
