//! Device-Removed Extended Data.
//!
//! `winapi` predates DRED, so the two interfaces and their payload structs
//! are declared here. [`enable_dred`] opts into breadcrumbs and page-fault
//! collection before device creation; [`RemovedWatcher`] parks a thread on
//! a fence event signalled at `UINT64_MAX` when the device is removed and
//! walks the DRED output at `Fatal` severity. Recovery is not attempted.

#![allow(non_snake_case, non_camel_case_types, clippy::upper_case_acronyms)]

use std::sync::Arc;

use winapi::{
    shared::{guiddef::REFIID, ntdef::HRESULT, winerror},
    um::{d3d12, handleapi, synchapi, unknwnbase::{IUnknown, IUnknownVtbl}, winbase, winnt},
    Interface, RIDL,
};

use super::{DeviceShared, HResult as _};

pub type D3D12_AUTO_BREADCRUMB_OP = u32;
pub type D3D12_DRED_ALLOCATION_TYPE = u32;
pub type D3D12_DRED_ENABLEMENT = u32;

pub const D3D12_DRED_ENABLEMENT_FORCED_ON: D3D12_DRED_ENABLEMENT = 2;

#[repr(C)]
pub struct D3D12_AUTO_BREADCRUMB_NODE {
    pub pCommandListDebugNameA: *const std::os::raw::c_char,
    pub pCommandListDebugNameW: *const u16,
    pub pCommandQueueDebugNameA: *const std::os::raw::c_char,
    pub pCommandQueueDebugNameW: *const u16,
    pub pCommandList: *mut d3d12::ID3D12GraphicsCommandList,
    pub pCommandQueue: *mut d3d12::ID3D12CommandQueue,
    pub BreadcrumbCount: u32,
    pub pLastBreadcrumbValue: *const u32,
    pub pCommandHistory: *const D3D12_AUTO_BREADCRUMB_OP,
    pub pNext: *const D3D12_AUTO_BREADCRUMB_NODE,
}

#[repr(C)]
pub struct D3D12_DRED_AUTO_BREADCRUMBS_OUTPUT {
    pub pHeadAutoBreadcrumbNode: *const D3D12_AUTO_BREADCRUMB_NODE,
}

#[repr(C)]
pub struct D3D12_DRED_ALLOCATION_NODE {
    pub ObjectNameA: *const std::os::raw::c_char,
    pub ObjectNameW: *const u16,
    pub AllocationType: D3D12_DRED_ALLOCATION_TYPE,
    pub pNext: *const D3D12_DRED_ALLOCATION_NODE,
}

#[repr(C)]
pub struct D3D12_DRED_PAGE_FAULT_OUTPUT {
    pub PageFaultVA: u64,
    pub pHeadExistingAllocationNode: *const D3D12_DRED_ALLOCATION_NODE,
    pub pHeadRecentFreedAllocationNode: *const D3D12_DRED_ALLOCATION_NODE,
}

RIDL! {#[uuid(0x82bc481c, 0x6b9b, 0x4030, 0xae, 0xdb, 0x7e, 0xe3, 0xd1, 0xdf, 0x1e, 0x63)]
interface ID3D12DeviceRemovedExtendedDataSettings(ID3D12DeviceRemovedExtendedDataSettingsVtbl):
    IUnknown(IUnknownVtbl) {
    fn SetAutoBreadcrumbsEnablement(
        Enablement: D3D12_DRED_ENABLEMENT,
    ) -> (),
    fn SetPageFaultEnablement(
        Enablement: D3D12_DRED_ENABLEMENT,
    ) -> (),
    fn SetWatsonDumpEnablement(
        Enablement: D3D12_DRED_ENABLEMENT,
    ) -> (),
}}

RIDL! {#[uuid(0x98931d33, 0x5ae8, 0x4791, 0xaa, 0x3c, 0x1a, 0x73, 0xa2, 0x93, 0x4e, 0x71)]
interface ID3D12DeviceRemovedExtendedData(ID3D12DeviceRemovedExtendedDataVtbl):
    IUnknown(IUnknownVtbl) {
    fn GetAutoBreadcrumbsOutput(
        pOutput: *mut D3D12_DRED_AUTO_BREADCRUMBS_OUTPUT,
    ) -> HRESULT,
    fn GetPageFaultAllocationOutput(
        pOutput: *mut D3D12_DRED_PAGE_FAULT_OUTPUT,
    ) -> HRESULT,
}}

/// Turn on auto-breadcrumbs and page-fault collection. Must run before
/// `D3D12CreateDevice`.
pub(super) fn enable_dred() {
    type GetDebugInterface =
        unsafe extern "system" fn(REFIID, *mut *mut std::ffi::c_void) -> HRESULT;

    let library = match unsafe { libloading::Library::new("d3d12.dll") } {
        Ok(library) => library,
        Err(err) => {
            log::warn!("DRED unavailable, d3d12.dll failed to load: {err}");
            return;
        }
    };
    let get_debug_interface: libloading::Symbol<GetDebugInterface> =
        match unsafe { library.get(b"D3D12GetDebugInterface") } {
            Ok(symbol) => symbol,
            Err(err) => {
                log::warn!("DRED unavailable, D3D12GetDebugInterface missing: {err}");
                return;
            }
        };

    let mut settings: *mut ID3D12DeviceRemovedExtendedDataSettings = std::ptr::null_mut();
    let hr = unsafe {
        get_debug_interface(
            &ID3D12DeviceRemovedExtendedDataSettings::uuidof(),
            &mut settings as *mut *mut _ as *mut *mut _,
        )
    };
    if !winerror::SUCCEEDED(hr) || settings.is_null() {
        log::warn!("DRED settings interface is unavailable (0x{:x})", hr as u32);
        return;
    }
    unsafe {
        (*settings).SetAutoBreadcrumbsEnablement(D3D12_DRED_ENABLEMENT_FORCED_ON);
        (*settings).SetPageFaultEnablement(D3D12_DRED_ENABLEMENT_FORCED_ON);
        (*settings).Release();
    }
    log::debug!("DRED breadcrumbs and page-fault collection enabled");
    // The library stays resident once the process has created the device.
    std::mem::forget(library);
}

fn breadcrumb_op_name(op: D3D12_AUTO_BREADCRUMB_OP) -> &'static str {
    match op {
        0 => "SETMARKER",
        1 => "BEGINEVENT",
        2 => "ENDEVENT",
        3 => "DRAWINSTANCED",
        4 => "DRAWINDEXEDINSTANCED",
        5 => "EXECUTEINDIRECT",
        6 => "DISPATCH",
        7 => "COPYBUFFERREGION",
        8 => "COPYTEXTUREREGION",
        9 => "COPYRESOURCE",
        10 => "COPYTILES",
        11 => "RESOLVESUBRESOURCE",
        12 => "CLEARRENDERTARGETVIEW",
        13 => "CLEARUNORDEREDACCESSVIEW",
        14 => "CLEARDEPTHSTENCILVIEW",
        15 => "RESOURCEBARRIER",
        16 => "EXECUTEBUNDLE",
        17 => "PRESENT",
        18 => "RESOLVEQUERYDATA",
        19 => "BEGINSUBMISSION",
        20 => "ENDSUBMISSION",
        21 => "DECODEFRAME",
        22 => "PROCESSFRAMES",
        23 => "ATOMICCOPYBUFFERUINT",
        24 => "ATOMICCOPYBUFFERUINT64",
        25 => "RESOLVESUBRESOURCEREGION",
        26 => "WRITEBUFFERIMMEDIATE",
        27 => "DECODEFRAME1",
        28 => "SETPROTECTEDRESOURCESESSION",
        29 => "DECODEFRAME2",
        30 => "PROCESSFRAMES1",
        31 => "BUILDRAYTRACINGACCELERATIONSTRUCTURE",
        32 => "EMITRAYTRACINGACCELERATIONSTRUCTUREPOSTBUILDINFO",
        33 => "COPYRAYTRACINGACCELERATIONSTRUCTURE",
        34 => "DISPATCHRAYS",
        35 => "INITIALIZEMETACOMMAND",
        36 => "EXECUTEMETACOMMAND",
        37 => "ESTIMATEMOTION",
        38 => "RESOLVEMOTIONVECTORHEAP",
        39 => "SETPIPELINESTATE1",
        40 => "INITIALIZEEXTENSIONCOMMAND",
        41 => "EXECUTEEXTENSIONCOMMAND",
        42 => "DISPATCHMESH",
        43 => "ENCODEFRAME",
        44 => "RESOLVEENCODEROUTPUTMETADATA",
        _ => "Unknown D3D12_AUTO_BREADCRUMB_OP",
    }
}

fn allocation_type_name(ty: D3D12_DRED_ALLOCATION_TYPE) -> &'static str {
    match ty {
        19 => "COMMAND_QUEUE",
        20 => "COMMAND_ALLOCATOR",
        21 => "PIPELINE_STATE",
        22 => "COMMAND_LIST",
        23 => "FENCE",
        24 => "DESCRIPTOR_HEAP",
        25 => "HEAP",
        27 => "QUERY_HEAP",
        28 => "COMMAND_SIGNATURE",
        29 => "PIPELINE_LIBRARY",
        30 => "VIDEO_DECODER",
        32 => "VIDEO_PROCESSOR",
        34 => "RESOURCE",
        35 => "PASS",
        36 => "CRYPTOSESSION",
        37 => "CRYPTOSESSIONPOLICY",
        38 => "PROTECTEDRESOURCESESSION",
        39 => "VIDEO_DECODER_HEAP",
        40 => "COMMAND_POOL",
        41 => "COMMAND_RECORDER",
        42 => "STATE_OBJECT",
        43 => "METACOMMAND",
        44 => "SCHEDULINGGROUP",
        45 => "VIDEO_MOTION_ESTIMATOR",
        46 => "VIDEO_MOTION_VECTOR_HEAP",
        47 => "VIDEO_EXTENSION_COMMAND",
        _ => "Unknown D3D12_DRED_ALLOCATION_TYPE",
    }
}

unsafe fn c_str_or<'a>(ptr: *const std::os::raw::c_char, fallback: &'a str) -> std::borrow::Cow<'a, str> {
    if ptr.is_null() {
        std::borrow::Cow::Borrowed(fallback)
    } else {
        std::ffi::CStr::from_ptr(ptr).to_string_lossy()
    }
}

unsafe fn report(device: native::Device) {
    let reason = device.GetDeviceRemovedReason();
    if reason == winerror::S_OK {
        // Proper shutdown, nothing to report.
        return;
    }

    log::error!(target: "sable::fatal", "Device removal triggered!");
    log::error!(
        target: "sable::fatal",
        "device removed reason: 0x{:08x}",
        reason as u32
    );

    let mut dred: *mut ID3D12DeviceRemovedExtendedData = std::ptr::null_mut();
    let hr = device.QueryInterface(
        &ID3D12DeviceRemovedExtendedData::uuidof(),
        &mut dred as *mut *mut _ as *mut *mut _,
    );
    if !winerror::SUCCEEDED(hr) || dred.is_null() {
        log::error!(target: "sable::fatal", "DRED data is unavailable (0x{:x})", hr as u32);
        return;
    }

    let mut breadcrumbs = std::mem::zeroed::<D3D12_DRED_AUTO_BREADCRUMBS_OUTPUT>();
    if winerror::SUCCEEDED((*dred).GetAutoBreadcrumbsOutput(&mut breadcrumbs)) {
        let mut node = breadcrumbs.pHeadAutoBreadcrumbNode;
        while !node.is_null() {
            let n = &*node;
            log::error!(
                target: "sable::fatal",
                "DRED breadcrumb data: command list `{}`, command queue `{}`",
                c_str_or(n.pCommandListDebugNameA, "[Unnamed CommandList]"),
                c_str_or(n.pCommandQueueDebugNameA, "[Unnamed CommandQueue]"),
            );
            let last = if n.pLastBreadcrumbValue.is_null() {
                0
            } else {
                *n.pLastBreadcrumbValue
            };
            for index in 0..n.BreadcrumbCount {
                let op = *n.pCommandHistory.add(index as usize);
                let suffix = if index == last { " <- failed" } else { "" };
                log::error!(
                    target: "sable::fatal",
                    "    {}{}",
                    breadcrumb_op_name(op),
                    suffix
                );
            }
            node = n.pNext;
        }
    }

    let mut page_fault = std::mem::zeroed::<D3D12_DRED_PAGE_FAULT_OUTPUT>();
    if winerror::SUCCEEDED((*dred).GetPageFaultAllocationOutput(&mut page_fault)) {
        log::error!(
            target: "sable::fatal",
            "DRED page fault output: virtual address {:X}",
            page_fault.PageFaultVA
        );
        for (head, label) in [
            (page_fault.pHeadExistingAllocationNode, "existing"),
            (page_fault.pHeadRecentFreedAllocationNode, "recently freed"),
        ] {
            let mut node = head;
            while !node.is_null() {
                let n = &*node;
                log::error!(
                    target: "sable::fatal",
                    "    {} allocation `{}` ({})",
                    label,
                    c_str_or(n.ObjectNameA, "[Unnamed Object]"),
                    allocation_type_name(n.AllocationType),
                );
                node = n.pNext;
            }
        }
    }

    (*dred).Release();
}

/// The installed device-removed watcher: a fence armed at `UINT64_MAX` and
/// a thread parked on its event.
pub(super) struct RemovedWatcher {
    fence: native::Fence,
    event: winnt::HANDLE,
    thread: Option<std::thread::JoinHandle<()>>,
}

unsafe impl Send for RemovedWatcher {}

impl RemovedWatcher {
    pub(super) fn install(shared: &Arc<DeviceShared>) -> Option<Self> {
        let fence = match shared.raw.create_fence(0).into_result() {
            Ok(fence) => fence,
            Err(err) => {
                log::warn!("device-removed fence creation failed: {err}");
                return None;
            }
        };
        let event = unsafe {
            synchapi::CreateEventW(std::ptr::null_mut(), 0, 0, std::ptr::null())
        };
        if event.is_null() {
            unsafe { fence.destroy() };
            return None;
        }
        // A fence signals UINT64_MAX exactly once: on device removal.
        let hr = fence.set_event_on_completion(native::Event(event), u64::MAX);
        if let Err(err) = hr.into_result() {
            log::warn!("device-removed event registration failed: {err}");
            unsafe {
                handleapi::CloseHandle(event);
                fence.destroy();
            }
            return None;
        }

        // Raw COM pointers are not Send; the watcher only touches them
        // after the event fires, while the device is still alive or during
        // its orderly shutdown.
        struct Watched(native::Device);
        unsafe impl Send for Watched {}

        let device = Watched(shared.raw);
        let watched = Arc::downgrade(shared);
        let wait_event = event as usize;
        let thread = std::thread::Builder::new()
            .name("sable-device-removed".to_string())
            .spawn(move || {
                let status = unsafe {
                    synchapi::WaitForSingleObject(wait_event as winnt::HANDLE, winbase::INFINITE)
                };
                if status != winbase::WAIT_OBJECT_0 {
                    return;
                }
                unsafe { report(device.0) };
                if let Some(shared) = watched.upgrade() {
                    shared.mark_lost();
                }
            })
            .ok()?;

        Some(Self {
            fence,
            event,
            thread: Some(thread),
        })
    }

    /// Wake the watcher for an orderly exit (the removal reason reads
    /// `S_OK` on a live device) and reclaim its resources.
    pub(super) fn shut_down(mut self) {
        unsafe { synchapi::SetEvent(self.event) };
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        unsafe {
            handleapi::CloseHandle(self.event);
            self.fence.destroy();
        }
    }
}
