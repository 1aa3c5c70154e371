//! Factory creation, adapter ranking and surface wrapping.

use std::sync::Arc;

use winapi::{
    shared::{dxgi, winerror},
    um::winuser,
    Interface,
};

use crate::{InstanceError, SurfaceError};

use super::{Adapter, HResult as _, Surface};

fn adapter_kind(desc: &dxgi::DXGI_ADAPTER_DESC1) -> sbt::DeviceKind {
    if desc.Flags & dxgi::DXGI_ADAPTER_FLAG_SOFTWARE != 0 {
        sbt::DeviceKind::Cpu
    } else if desc.DedicatedVideoMemory == 0 {
        sbt::DeviceKind::Integrated
    } else {
        sbt::DeviceKind::Discrete
    }
}

fn rank(kind: sbt::DeviceKind) -> u32 {
    match kind {
        sbt::DeviceKind::Discrete => 0,
        sbt::DeviceKind::Integrated => 1,
        sbt::DeviceKind::Virtual => 2,
        sbt::DeviceKind::Cpu => 3,
        sbt::DeviceKind::Other => 4,
    }
}

fn describe(desc: &dxgi::DXGI_ADAPTER_DESC1) -> sbt::AdapterInfo {
    let len = desc
        .Description
        .iter()
        .position(|&ch| ch == 0)
        .unwrap_or(desc.Description.len());
    sbt::AdapterInfo {
        name: String::from_utf16_lossy(&desc.Description[..len]),
        vendor_id: desc.VendorId,
        device_id: desc.DeviceId,
        kind: adapter_kind(desc),
        video_memory: desc.DedicatedVideoMemory as u64,
    }
}

impl Adapter {
    /// Load dxgi/d3d12, enable the debug layer and DRED when requested,
    /// then enumerate and rank the hardware adapters.
    pub fn create(options: &sbt::InitOptions) -> Result<Self, InstanceError> {
        let lib_dxgi = native::DxgiLib::new()
            .map_err(|err| InstanceError::NotAvailable(format!("loading dxgi.dll: {err}")))?;
        let library = Arc::new(
            native::D3D12Lib::new()
                .map_err(|err| InstanceError::NotAvailable(format!("loading d3d12.dll: {err}")))?,
        );

        let debug_enabled = options.flags.contains(sbt::InstanceFlags::VALIDATION);
        if debug_enabled {
            match library.get_debug_interface() {
                Ok(pair) => match pair.into_result() {
                    Ok(debug) => {
                        unsafe { debug.enable_layer() };
                        unsafe { debug.destroy() };
                    }
                    Err(err) => log::warn!("debug layer is unavailable: {err}"),
                },
                Err(err) => log::warn!("debug layer symbols missing: {err}"),
            }
            // Breadcrumbs and page-fault data must be opted into before
            // device creation.
            super::dred::enable_dred();
        }

        let factory_flags = if debug_enabled {
            native::FactoryCreationFlags::DEBUG
        } else {
            native::FactoryCreationFlags::empty()
        };
        let factory = match lib_dxgi.create_factory2(factory_flags) {
            Ok(pair) => pair
                .into_result()
                .map_err(|err| InstanceError::NotAvailable(format!("CreateDXGIFactory2: {err}")))?,
            Err(err) => {
                return Err(InstanceError::NotAvailable(format!(
                    "dxgi factory symbols missing: {err}"
                )))
            }
        };

        let mut candidates = Vec::new();
        let mut index = 0;
        loop {
            let mut adapter = native::WeakPtr::<dxgi::IDXGIAdapter1>::null();
            let hr = unsafe { factory.EnumAdapters1(index, adapter.mut_void() as *mut *mut _) };
            if hr == winerror::DXGI_ERROR_NOT_FOUND {
                break;
            }
            index += 1;

            let mut desc = unsafe { std::mem::zeroed::<dxgi::DXGI_ADAPTER_DESC1>() };
            unsafe { adapter.GetDesc1(&mut desc) };
            let info = describe(&desc);
            if info.kind == sbt::DeviceKind::Cpu && !options.software_fallback {
                unsafe { adapter.destroy() };
                continue;
            }
            candidates.push((adapter, info));
        }

        if candidates.is_empty() && options.software_fallback {
            let mut adapter = native::WeakPtr::<dxgi::IDXGIAdapter1>::null();
            let hr = unsafe {
                factory.EnumWarpAdapter(&dxgi::IDXGIAdapter1::uuidof(), adapter.mut_void())
            };
            if winerror::SUCCEEDED(hr) {
                let mut desc = unsafe { std::mem::zeroed::<dxgi::DXGI_ADAPTER_DESC1>() };
                unsafe { adapter.GetDesc1(&mut desc) };
                candidates.push((adapter, describe(&desc)));
            }
        }

        // Smaller VRAM wins the tie inside each kind bucket.
        candidates.sort_by_key(|(_, info)| (rank(info.kind), info.video_memory));

        let mut iter = candidates.into_iter();
        let (raw, info) = iter.next().ok_or(InstanceError::NoSuitableAdapter)?;
        for (loser, _) in iter {
            unsafe { loser.destroy() };
        }

        log::info!(
            "selected dx12 adapter `{}` ({:?}, {} MiB)",
            info.name,
            info.kind,
            info.video_memory >> 20
        );

        Ok(Self {
            factory,
            raw,
            library,
            lib_dxgi,
            info,
            debug_enabled,
        })
    }

    /// Wrap an HWND for the swap chain.
    pub fn create_surface(
        &self,
        hwnd: *mut std::ffi::c_void,
        width: u32,
        height: u32,
    ) -> Result<Surface, SurfaceError> {
        if hwnd.is_null() {
            return Err(SurfaceError::Other("null window handle"));
        }
        Ok(Surface {
            factory: self.factory,
            wnd_handle: hwnd as *mut _,
            swap_chain: parking_lot::RwLock::new(None),
            width,
            height,
        })
    }
}

impl Surface {
    /// Size the surface was created with, updated on resize.
    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Record a new window size; the next configure resizes the buffers.
    pub fn set_extent(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    /// Update the window title.
    pub fn set_title(&self, title: &str) -> Result<(), SurfaceError> {
        let wide: Vec<u16> = title.encode_utf16().chain(Some(0)).collect();
        let ok = unsafe { winuser::SetWindowTextW(self.wnd_handle, wide.as_ptr()) };
        if ok == 0 {
            return Err(SurfaceError::Other("SetWindowTextW failed"));
        }
        Ok(())
    }

    /// Whether the window is iconified (minimized).
    pub fn is_iconified(&self) -> bool {
        unsafe { winuser::IsIconic(self.wnd_handle) != 0 }
    }
}
