//! Queue submission, presentation and fence-value bookkeeping.
//!
//! Fence values ride a timeline semaphore: one `signal` per `EndFrame`,
//! host waits through `vkWaitSemaphores`. Devices target Vulkan 1.3 where
//! timeline semaphores are core.

use arrayvec::ArrayVec;
use ash::vk;

use crate::{DeviceError, FenceValue, SurfaceError};

use super::{CommandBuffer, Queue, Surface, FENCE_WAIT_TIMEOUT_NS};

impl Queue {
    /// The kind of commands this queue accepts.
    pub fn kind(&self) -> sbt::CommandObjectType {
        self.kind
    }

    /// Submit `command_buffers` in one batch.
    ///
    /// `wait_acquire` is the swap chain's acquire semaphore for the frame;
    /// `signal_value` is the renderer's fence value for this submission and
    /// is signaled on the queue's timeline together with the per-image
    /// present semaphore.
    pub fn submit(
        &self,
        command_buffers: &[CommandBuffer],
        surface: Option<&Surface>,
        frame_index: usize,
        image_index: u32,
        signal_value: FenceValue,
    ) -> Result<(), DeviceError> {
        let mut wait_semaphores = ArrayVec::<vk::Semaphore, 1>::new();
        let mut wait_stage_masks = ArrayVec::<vk::PipelineStageFlags, 1>::new();
        let mut signal_semaphores = ArrayVec::<vk::Semaphore, 2>::new();
        let mut signal_values = ArrayVec::<u64, 2>::new();

        if let Some(surface) = surface {
            let swapchain = surface.swapchain.read();
            let sc = swapchain.as_ref().ok_or(DeviceError::InvalidArgument(
                "submit with an unconfigured surface",
            ))?;
            wait_semaphores.push(sc.acquire_semaphores[frame_index % sc.acquire_semaphores.len()]);
            wait_stage_masks.push(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
            signal_semaphores.push(sc.present_semaphores[image_index as usize]);
            // Binary semaphores ignore their slot in the timeline values.
            signal_values.push(0);
        }

        signal_semaphores.push(self.timeline);
        signal_values.push(signal_value);

        let raw_buffers: Vec<vk::CommandBuffer> =
            command_buffers.iter().map(|cmd| cmd.raw).collect();

        let mut timeline_info =
            vk::TimelineSemaphoreSubmitInfo::builder().signal_semaphore_values(&signal_values);
        let submit_info = vk::SubmitInfo::builder()
            .command_buffers(&raw_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stage_masks)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        profiling::scope!("vkQueueSubmit");
        let result = unsafe {
            self.device
                .raw
                .queue_submit(self.raw, &[submit_info.build()], vk::Fence::null())
        };
        if let Err(err) = result {
            if err == vk::Result::ERROR_DEVICE_LOST {
                self.device.mark_lost();
            }
            return Err(err.into());
        }
        *self.last_signaled.lock() = signal_value;
        Ok(())
    }

    /// Present `image_index`, waiting on the image's present semaphore.
    pub fn present(&self, surface: &Surface, image_index: u32) -> Result<bool, SurfaceError> {
        let swapchain = surface.swapchain.read();
        let sc = swapchain
            .as_ref()
            .ok_or(SurfaceError::Other("present with an unconfigured surface"))?;

        let swapchains = [sc.raw];
        let image_indices = [image_index];
        let wait_semaphores = [sc.present_semaphores[image_index as usize]];
        let info = vk::PresentInfoKHR::builder()
            .swapchains(&swapchains)
            .image_indices(&image_indices)
            .wait_semaphores(&wait_semaphores);

        profiling::scope!("vkQueuePresentKHR");
        let suboptimal = unsafe { self.swapchain_fn.queue_present(self.raw, &info) }.map_err(
            |error| match error {
                vk::Result::ERROR_OUT_OF_DATE_KHR => SurfaceError::Outdated,
                vk::Result::ERROR_SURFACE_LOST_KHR => SurfaceError::Lost,
                vk::Result::ERROR_DEVICE_LOST => {
                    self.device.mark_lost();
                    SurfaceError::Device(DeviceError::Lost)
                }
                other => SurfaceError::Device(DeviceError::from(other)),
            },
        )?;
        if suboptimal {
            log::warn!("suboptimal present of image {image_index}");
        }
        Ok(suboptimal)
    }

    /// Signal `value` on the queue's timeline from the GPU side, with no
    /// work attached.
    pub fn signal(&self, value: FenceValue) -> Result<(), DeviceError> {
        let signal_semaphores = [self.timeline];
        let signal_values = [value];
        let mut timeline_info =
            vk::TimelineSemaphoreSubmitInfo::builder().signal_semaphore_values(&signal_values);
        let submit_info = vk::SubmitInfo::builder()
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);
        unsafe {
            self.device
                .raw
                .queue_submit(self.raw, &[submit_info.build()], vk::Fence::null())
        }?;
        *self.last_signaled.lock() = value;
        Ok(())
    }

    /// Latest fence value the GPU has completed.
    pub fn completed_value(&self) -> Result<FenceValue, DeviceError> {
        let value = unsafe { self.device.raw.get_semaphore_counter_value(self.timeline) }?;
        Ok(value)
    }

    /// Block the CPU until `value` completes or `timeout_ns` expires.
    /// Returns `false` on timeout.
    pub fn wait(&self, value: FenceValue, timeout_ns: u64) -> Result<bool, DeviceError> {
        if value == 0 {
            return Ok(true);
        }
        let semaphores = [self.timeline];
        let values = [value];
        let info = vk::SemaphoreWaitInfo::builder()
            .semaphores(&semaphores)
            .values(&values);
        profiling::scope!("vkWaitSemaphores");
        match unsafe { self.device.raw.wait_semaphores(&info, timeout_ns) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => Ok(false),
            Err(err) => {
                if err == vk::Result::ERROR_DEVICE_LOST {
                    self.device.mark_lost();
                }
                Err(err.into())
            }
        }
    }

    /// Drain the queue: wait for the last signaled value, then idle.
    pub fn flush(&self) -> Result<(), DeviceError> {
        let last = *self.last_signaled.lock();
        if last != 0 {
            self.wait(last, FENCE_WAIT_TIMEOUT_NS)?;
        }
        unsafe { self.device.raw.queue_wait_idle(self.raw) }?;
        Ok(())
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.raw.queue_wait_idle(self.raw);
            self.device.raw.destroy_semaphore(self.timeline, None);
        }
        // Return the queue index to its set.
        for set in self.device.queue_sets.iter() {
            if set.family_index == self.family_index {
                let mut allocated = set.allocated.lock();
                if let Some(slot) = allocated.get_mut(self.queue_index as usize) {
                    *slot = false;
                }
            }
        }
    }
}
