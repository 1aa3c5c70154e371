//! Swap chain construction, acquire and teardown.

use std::sync::Arc;

use ash::{extensions::khr, vk};

use crate::{DeviceError, SurfaceError};

use super::{command::RenderPassInfo, Device, Surface, Swapchain};

impl Swapchain {
    /// # Safety
    ///
    /// The device must have been made idle before calling this.
    pub(super) unsafe fn release_resources(mut self, device: &ash::Device) {
        profiling::scope!("Swapchain::release_resources");
        {
            profiling::scope!("vkDeviceWaitIdle");
            // There is no portable way to wait for presentation work, so
            // the device idles before any swapchain object dies.
            let _ = device.device_wait_idle();
        }
        for framebuffer in self.framebuffers.drain(..) {
            device.destroy_framebuffer(framebuffer, None);
        }
        for view in self.views.drain(..) {
            device.destroy_image_view(view, None);
        }
        for semaphore in self.acquire_semaphores.drain(..) {
            device.destroy_semaphore(semaphore, None);
        }
        for semaphore in self.present_semaphores.drain(..) {
            device.destroy_semaphore(semaphore, None);
        }
        device.destroy_render_pass(self.render_pass, None);
        self.functor.destroy_swapchain(self.raw, None);
    }
}

impl Surface {
    /// Build (or rebuild, on resize) the swap chain ring.
    pub fn configure(
        &self,
        device: &Device,
        config: &crate::SurfaceConfiguration,
    ) -> Result<(), SurfaceError> {
        if !config.is_presentable() {
            return Err(SurfaceError::Occluded);
        }

        let mut swapchain_slot = self.swapchain.write();
        if let Some(old) = swapchain_slot.take() {
            unsafe { old.release_resources(&device.shared.raw) };
        }

        let physical_device = device.shared.physical_device;
        let capabilities = unsafe {
            self.functor
                .get_physical_device_surface_capabilities(physical_device, self.raw)
        }
        .map_err(|err| SurfaceError::Device(err.into()))?;

        let formats = unsafe {
            self.functor
                .get_physical_device_surface_formats(physical_device, self.raw)
        }
        .map_err(|err| SurfaceError::Device(err.into()))?;
        let surface_format = formats
            .iter()
            .find(|format| {
                format.format == vk::Format::B8G8R8A8_UNORM
                    && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .or_else(|| formats.first())
            .copied()
            .ok_or(SurfaceError::Other("surface reports no formats"))?;

        let present_mode = if config.vsync {
            vk::PresentModeKHR::FIFO
        } else {
            let modes = unsafe {
                self.functor
                    .get_physical_device_surface_present_modes(physical_device, self.raw)
            }
            .map_err(|err| SurfaceError::Device(err.into()))?;
            if modes.contains(&vk::PresentModeKHR::MAILBOX) {
                vk::PresentModeKHR::MAILBOX
            } else {
                vk::PresentModeKHR::IMMEDIATE
            }
        };

        let mut image_count = config.buffer_count.max(capabilities.min_image_count);
        if capabilities.max_image_count != 0 {
            image_count = image_count.min(capabilities.max_image_count);
        }

        let extent = if capabilities.current_extent.width != u32::MAX {
            capabilities.current_extent
        } else {
            vk::Extent2D {
                width: config.width.clamp(
                    capabilities.min_image_extent.width,
                    capabilities.max_image_extent.width,
                ),
                height: config.height.clamp(
                    capabilities.min_image_extent.height,
                    capabilities.max_image_extent.height,
                ),
            }
        };
        if extent.width == 0 || extent.height == 0 {
            return Err(SurfaceError::Occluded);
        }

        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.raw)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(vk::SurfaceTransformFlagsKHR::IDENTITY)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let functor = khr::Swapchain::new(&self.instance.raw, &device.shared.raw);
        let raw = unsafe { functor.create_swapchain(&info, None) }
            .map_err(|err| SurfaceError::Device(err.into()))?;
        let images = unsafe { functor.get_swapchain_images(raw) }
            .map_err(|err| SurfaceError::Device(err.into()))?;

        let render_pass = create_render_pass(&device.shared.raw, surface_format.format)
            .map_err(SurfaceError::Device)?;

        let mut views = Vec::with_capacity(images.len());
        let mut framebuffers = Vec::with_capacity(images.len());
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe { device.shared.raw.create_image_view(&view_info, None) }
                .map_err(|err| SurfaceError::Device(err.into()))?;
            views.push(view);

            let attachments = [view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(&attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);
            let framebuffer =
                unsafe { device.shared.raw.create_framebuffer(&framebuffer_info, None) }
                    .map_err(|err| SurfaceError::Device(err.into()))?;
            framebuffers.push(framebuffer);
        }

        let make_semaphores = |count: usize| -> Result<Vec<vk::Semaphore>, DeviceError> {
            (0..count)
                .map(|_| {
                    unsafe {
                        device
                            .shared
                            .raw
                            .create_semaphore(&vk::SemaphoreCreateInfo::builder(), None)
                    }
                    .map_err(DeviceError::from)
                })
                .collect()
        };
        let acquire_semaphores =
            make_semaphores(config.buffer_count as usize).map_err(SurfaceError::Device)?;
        let present_semaphores = make_semaphores(images.len()).map_err(SurfaceError::Device)?;

        log::debug!(
            "configured vulkan swapchain: {}x{}, {} images, {:?}",
            extent.width,
            extent.height,
            images.len(),
            present_mode
        );

        *swapchain_slot = Some(Swapchain {
            raw,
            functor,
            device: Arc::clone(&device.shared),
            images,
            views,
            framebuffers,
            render_pass,
            extent,
            acquire_semaphores,
            present_semaphores,
        });
        Ok(())
    }

    /// Destroy the swap chain; required before the surface itself drops.
    pub fn unconfigure(&self, device: &Device) {
        if let Some(swapchain) = self.swapchain.write().take() {
            unsafe { swapchain.release_resources(&device.shared.raw) };
        }
    }

    /// Acquire the next back-buffer image, blocking on `frame_index`'s
    /// acquire semaphore slot. Returns `(image_index, suboptimal)`.
    pub fn acquire(&self, frame_index: usize) -> Result<(u32, bool), SurfaceError> {
        let swapchain = self.swapchain.read();
        let sc = swapchain
            .as_ref()
            .ok_or(SurfaceError::Other("acquire with an unconfigured surface"))?;
        let semaphore = sc.acquire_semaphores[frame_index % sc.acquire_semaphores.len()];

        match unsafe {
            sc.functor
                .acquire_next_image(sc.raw, u64::MAX, semaphore, vk::Fence::null())
        } {
            Ok(pair) => Ok(pair),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) | Err(vk::Result::NOT_READY) => {
                Err(SurfaceError::Outdated)
            }
            Err(vk::Result::ERROR_SURFACE_LOST_KHR) => Err(SurfaceError::Lost),
            Err(other) => Err(SurfaceError::Device(other.into())),
        }
    }

    /// Number of images in the ring.
    pub fn image_count(&self) -> usize {
        self.swapchain
            .read()
            .as_ref()
            .map_or(0, |sc| sc.images.len())
    }

    /// Prefilled render-pass begin info for `image_index`, handed to
    /// recorders that open a pass on the back buffer.
    pub fn render_pass_info(&self, image_index: u32) -> Option<RenderPassInfo> {
        let swapchain = self.swapchain.read();
        let sc = swapchain.as_ref()?;
        Some(RenderPassInfo {
            render_pass: sc.render_pass,
            framebuffer: *sc.framebuffers.get(image_index as usize)?,
            extent: sc.extent,
        })
    }

    /// The render pass pipelines targeting this surface must be built
    /// against.
    pub fn render_pass(&self) -> Option<vk::RenderPass> {
        self.swapchain.read().as_ref().map(|sc| sc.render_pass)
    }
}

fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass, DeviceError> {
    let attachments = [vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    }];
    let color_refs = [vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    }];
    let subpasses = [vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs)
        .build()];
    let dependencies = [vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        dependency_flags: vk::DependencyFlags::empty(),
    }];

    let info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses)
        .dependencies(&dependencies);
    let render_pass = unsafe { device.create_render_pass(&info, None) }?;
    Ok(render_pass)
}
