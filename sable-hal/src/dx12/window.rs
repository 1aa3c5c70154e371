//! Swap chain construction, latency waits, acquire and present.

use winapi::{
    shared::{dxgi, dxgi1_2, dxgi1_4, dxgiformat, dxgitype, winerror},
    um::{d3d12, handleapi, synchapi, winbase, winnt},
    Interface,
};

use crate::{SurfaceError, SurfaceConfiguration};

use super::{CommandEncoder, Device, HResult as _, OutputTarget, Queue, Surface, SwapChain};

const BACK_BUFFER_FORMAT: dxgiformat::DXGI_FORMAT = dxgiformat::DXGI_FORMAT_B8G8R8A8_UNORM;

impl SwapChain {
    unsafe fn release_resources(mut self, device: &Device) -> native::WeakPtr<dxgi1_4::IDXGISwapChain3> {
        for handle in self.rtv_handles.drain(..) {
            device.free_rtv(handle);
        }
        for resource in self.resources.drain(..) {
            resource.destroy();
        }
        handleapi::CloseHandle(self.waitable);
        self.raw
    }
}

impl Surface {
    /// Build (or resize) the flip-discard swap chain.
    pub fn configure(
        &self,
        device: &Device,
        queue: &Queue,
        config: &SurfaceConfiguration,
    ) -> Result<(), SurfaceError> {
        if !config.is_presentable() {
            return Err(SurfaceError::Occluded);
        }
        let flags = dxgi::DXGI_SWAP_CHAIN_FLAG_FRAME_LATENCY_WAITABLE_OBJECT;

        let mut swap_chain_slot = self.swap_chain.write();
        let raw = match swap_chain_slot.take() {
            Some(old) => {
                // Can't resize with image resources in flight.
                queue.flush().map_err(SurfaceError::Device)?;
                let raw = unsafe { old.release_resources(device) };
                let hr = unsafe {
                    raw.ResizeBuffers(
                        config.buffer_count,
                        config.width,
                        config.height,
                        BACK_BUFFER_FORMAT,
                        flags,
                    )
                };
                if let Err(err) = hr.into_result() {
                    log::error!("ResizeBuffers failed: {err}");
                    return Err(SurfaceError::Other("window is in use"));
                }
                raw
            }
            None => {
                let desc = dxgi1_2::DXGI_SWAP_CHAIN_DESC1 {
                    Width: config.width,
                    Height: config.height,
                    Format: BACK_BUFFER_FORMAT,
                    Stereo: 0,
                    SampleDesc: dxgitype::DXGI_SAMPLE_DESC {
                        Count: 1,
                        Quality: 0,
                    },
                    BufferUsage: dxgitype::DXGI_USAGE_RENDER_TARGET_OUTPUT,
                    BufferCount: config.buffer_count,
                    Scaling: dxgi1_2::DXGI_SCALING_STRETCH,
                    SwapEffect: dxgi::DXGI_SWAP_EFFECT_FLIP_DISCARD,
                    AlphaMode: dxgi1_2::DXGI_ALPHA_MODE_IGNORE,
                    Flags: flags,
                };

                let mut swap_chain1 = native::WeakPtr::<dxgi1_2::IDXGISwapChain1>::null();
                let hr = unsafe {
                    self.factory.CreateSwapChainForHwnd(
                        queue.raw.as_mut_ptr() as *mut _,
                        self.wnd_handle,
                        &desc,
                        std::ptr::null(),
                        std::ptr::null_mut(),
                        swap_chain1.mut_void() as *mut *mut _,
                    )
                };
                if let Err(err) = hr.into_result() {
                    log::error!("swap chain creation failed: {err}");
                    return Err(SurfaceError::Other("swap chain creation"));
                }

                match unsafe { swap_chain1.cast::<dxgi1_4::IDXGISwapChain3>() }.into_result() {
                    Ok(swap_chain3) => {
                        unsafe { swap_chain1.destroy() };
                        swap_chain3
                    }
                    Err(err) => {
                        log::error!("unable to cast the swap chain: {err}");
                        return Err(SurfaceError::Other("swap chain cast to 3"));
                    }
                }
            }
        };

        // Disable automatic Alt+Enter handling by DXGI.
        const DXGI_MWA_NO_WINDOW_CHANGES: u32 = 1;
        const DXGI_MWA_NO_ALT_ENTER: u32 = 2;
        unsafe {
            self.factory.MakeWindowAssociation(
                self.wnd_handle,
                DXGI_MWA_NO_WINDOW_CHANGES | DXGI_MWA_NO_ALT_ENTER,
            );
            raw.SetMaximumFrameLatency(config.buffer_count);
        }
        let waitable = unsafe { raw.GetFrameLatencyWaitableObject() };

        let mut resources = vec![native::Resource::null(); config.buffer_count as usize];
        for (index, resource) in resources.iter_mut().enumerate() {
            unsafe {
                raw.GetBuffer(
                    index as u32,
                    &d3d12::ID3D12Resource::uuidof(),
                    resource.mut_void(),
                )
            };
        }

        let rtv_handles = resources
            .iter()
            .map(|resource| device.create_rtv(*resource, BACK_BUFFER_FORMAT))
            .collect::<Result<Vec<_>, _>>()
            .map_err(SurfaceError::Device)?;

        log::debug!(
            "configured dx12 swapchain: {}x{}, {} buffers",
            config.width,
            config.height,
            config.buffer_count
        );

        *swap_chain_slot = Some(SwapChain {
            raw,
            resources,
            rtv_handles,
            waitable,
            extent: (config.width, config.height),
        });
        Ok(())
    }

    /// Destroy the swap chain; required before the surface itself drops.
    pub fn unconfigure(&self, device: &Device, queue: &Queue) {
        if let Some(swap_chain) = self.swap_chain.write().take() {
            let _ = queue.flush();
            let raw = unsafe { swap_chain.release_resources(device) };
            unsafe { raw.destroy() };
        }
    }

    /// Index of the buffer the next present targets.
    pub fn current_back_buffer_index(&self) -> u32 {
        self.swap_chain
            .read()
            .as_ref()
            .map_or(0, |sc| unsafe { sc.raw.GetCurrentBackBufferIndex() })
    }

    /// Number of buffers in the ring.
    pub fn image_count(&self) -> usize {
        self.swap_chain
            .read()
            .as_ref()
            .map_or(0, |sc| sc.resources.len())
    }

    /// Combined all-of wait on the frame-latency waitable and, when
    /// `fence_value` has not yet completed, the queue's fence event.
    pub fn wait_frame(
        &self,
        queue: &Queue,
        fence_value: crate::FenceValue,
        timeout_ms: u32,
    ) -> Result<bool, SurfaceError> {
        let swap_chain = self.swap_chain.read();
        let sc = swap_chain
            .as_ref()
            .ok_or(SurfaceError::Other("wait on an unconfigured surface"))?;

        let mut handles: [winnt::HANDLE; 2] = [sc.waitable, std::ptr::null_mut()];
        let mut count = 1;
        if fence_value != 0 && queue.completed_value() < fence_value {
            queue
                .arm_event(fence_value)
                .map_err(SurfaceError::Device)?;
            handles[1] = queue.event.0;
            count = 2;
        }

        let status = unsafe {
            synchapi::WaitForMultipleObjects(count, handles.as_ptr(), 1, timeout_ms)
        };
        match status {
            winbase::WAIT_OBJECT_0 => Ok(true),
            winerror::WAIT_TIMEOUT => Ok(false),
            other => {
                log::error!("unexpected frame wait status: 0x{other:x}");
                Err(SurfaceError::Lost)
            }
        }
    }

    /// Present the current back buffer. Returns `true` when DXGI reports
    /// the window occluded.
    pub fn present(&self, vsync: bool) -> Result<bool, SurfaceError> {
        let swap_chain = self.swap_chain.read();
        let sc = swap_chain
            .as_ref()
            .ok_or(SurfaceError::Other("present on an unconfigured surface"))?;

        profiling::scope!("IDXGISwapChain::Present");
        let hr = unsafe { sc.raw.Present(vsync as u32, 0) };
        if hr == winerror::DXGI_STATUS_OCCLUDED {
            return Ok(true);
        }
        hr.into_result().map_err(|err| {
            log::error!("Present failed: {err}");
            SurfaceError::Lost
        })?;
        Ok(false)
    }

    /// Re-probe occlusion without presenting.
    pub fn test_present_occluded(&self) -> bool {
        let swap_chain = self.swap_chain.read();
        match swap_chain.as_ref() {
            Some(sc) => {
                let hr = unsafe { sc.raw.Present(0, dxgi::DXGI_PRESENT_TEST) };
                hr == winerror::DXGI_STATUS_OCCLUDED
            }
            None => false,
        }
    }

    /// The render target the renderer hands to recorders for
    /// `image_index`.
    pub fn output_target(&self, image_index: u32) -> Option<OutputTarget> {
        let swap_chain = self.swap_chain.read();
        let sc = swap_chain.as_ref()?;
        Some(OutputTarget {
            resource: *sc.resources.get(image_index as usize)?,
            rtv: *sc.rtv_handles.get(image_index as usize)?,
            extent: sc.extent,
        })
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // The owning device may already be gone, so only the DXGI side is
        // reclaimed here; RTV slots return with their descriptor pool.
        if let Some(mut swap_chain) = self.swap_chain.get_mut().take() {
            for resource in swap_chain.resources.drain(..) {
                unsafe { resource.destroy() };
            }
            unsafe {
                handleapi::CloseHandle(swap_chain.waitable);
                swap_chain.raw.destroy();
            }
        }
    }
}

impl CommandEncoder {
    pub(super) fn transition(
        &mut self,
        resource: native::Resource,
        before: d3d12::D3D12_RESOURCE_STATES,
        after: d3d12::D3D12_RESOURCE_STATES,
    ) {
        if before == after {
            return;
        }
        let mut barrier = d3d12::D3D12_RESOURCE_BARRIER {
            Type: d3d12::D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
            Flags: d3d12::D3D12_RESOURCE_BARRIER_FLAG_NONE,
            u: unsafe { std::mem::zeroed() },
        };
        unsafe {
            *barrier.u.Transition_mut() = d3d12::D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: resource.as_mut_ptr(),
                Subresource: d3d12::D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                StateBefore: before,
                StateAfter: after,
            };
            self.list.ResourceBarrier(1, &barrier);
        }
    }
}
