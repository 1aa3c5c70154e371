//! Per-thread, per-frame command recording.
//!
//! Each encoder owns one `VkCommandPool` and one primary command buffer.
//! `begin` resets the pool, `end` closes the buffer and hands it back as a
//! [`CommandBuffer`] for the renderer's ready queue.

use std::sync::Arc;

use ash::vk;

use crate::DeviceError;

use super::{conv, CommandBuffer, Device, PipelineState, Resource};

/// Prefilled render-pass begin information, produced by the renderer for
/// the current back buffer.
#[derive(Clone, Copy, Debug)]
pub struct RenderPassInfo {
    pub(super) render_pass: vk::RenderPass,
    pub(super) framebuffer: vk::Framebuffer,
    pub(super) extent: vk::Extent2D,
}

/// A command recorder bound to one queue family.
pub struct CommandEncoder {
    device: Arc<super::DeviceShared>,
    raw: vk::CommandPool,
    active: vk::CommandBuffer,
    recording: bool,
}

impl Device {
    /// Create an encoder for recorders of `kind`.
    pub fn create_command_encoder(
        &self,
        kind: sbt::CommandObjectType,
    ) -> Result<CommandEncoder, DeviceError> {
        let family_index = self
            .shared
            .queue_sets
            .iter()
            .find(|set| set.kind == kind)
            .or_else(|| {
                self.shared
                    .queue_sets
                    .iter()
                    .find(|set| set.kind == sbt::CommandObjectType::AllCommands)
            })
            .map(|set| set.family_index)
            .ok_or(DeviceError::InvalidArgument("no queue family for kind"))?;

        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(family_index)
            .flags(vk::CommandPoolCreateFlags::TRANSIENT);
        let raw = unsafe { self.shared.raw.create_command_pool(&pool_info, None) }?;

        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(raw)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let buffers = unsafe { self.shared.raw.allocate_command_buffers(&alloc_info) }
            .map_err(|err| {
                unsafe { self.shared.raw.destroy_command_pool(raw, None) };
                DeviceError::from(err)
            })?;

        Ok(CommandEncoder {
            device: Arc::clone(&self.shared),
            raw,
            active: buffers[0],
            recording: false,
        })
    }
}

impl CommandEncoder {
    /// Reset the pool and open the command buffer.
    pub fn begin(&mut self) -> Result<(), DeviceError> {
        unsafe {
            self.device
                .raw
                .reset_command_pool(self.raw, vk::CommandPoolResetFlags::empty())?;
            let info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            self.device.raw.begin_command_buffer(self.active, &info)?;
        }
        self.recording = true;
        Ok(())
    }

    /// Close the buffer and return it for submission.
    pub fn end(&mut self) -> Result<CommandBuffer, DeviceError> {
        unsafe { self.device.raw.end_command_buffer(self.active) }?;
        self.recording = false;
        Ok(CommandBuffer { raw: self.active })
    }

    /// Whether `begin` has been called without a matching `end`.
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn bind_pipeline(&mut self, pipeline: &PipelineState) {
        unsafe {
            self.device.raw.cmd_bind_pipeline(
                self.active,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.raw,
            )
        };
    }

    pub fn set_viewport(&mut self, viewport: &sbt::Viewport) {
        unsafe {
            self.device
                .raw
                .cmd_set_viewport(self.active, 0, &[conv::map_viewport(viewport)])
        };
    }

    pub fn set_scissor_rect(&mut self, rect: &sbt::Rect) {
        unsafe {
            self.device
                .raw
                .cmd_set_scissor(self.active, 0, &[conv::map_rect(rect)])
        };
    }

    /// Emit a pipeline barrier transitioning `resource` between two
    /// abstract states.
    pub fn barrier(
        &mut self,
        resource: &Resource,
        before: sbt::ResourceState,
        after: sbt::ResourceState,
    ) {
        let src = conv::map_resource_state(before);
        let dst = conv::map_resource_state(after);

        match resource.handle {
            super::ResourceHandle::Buffer(buffer) => {
                let barrier = vk::BufferMemoryBarrier::builder()
                    .src_access_mask(src.access)
                    .dst_access_mask(dst.access)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(buffer)
                    .offset(0)
                    .size(vk::WHOLE_SIZE);
                unsafe {
                    self.device.raw.cmd_pipeline_barrier(
                        self.active,
                        src.stage,
                        dst.stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[barrier.build()],
                        &[],
                    )
                };
            }
            super::ResourceHandle::Texture { image, .. } => {
                let barrier = vk::ImageMemoryBarrier::builder()
                    .src_access_mask(src.access)
                    .dst_access_mask(dst.access)
                    .old_layout(src.layout)
                    .new_layout(dst.layout)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    });
                unsafe {
                    self.device.raw.cmd_pipeline_barrier(
                        self.active,
                        src.stage,
                        dst.stage,
                        vk::DependencyFlags::empty(),
                        &[],
                        &[],
                        &[barrier.build()],
                    )
                };
            }
        }
    }

    /// Open the render pass with begin info the renderer prefilled.
    pub fn begin_render_pass(&mut self, info: &RenderPassInfo, clear: sbt::Color) {
        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: clear.to_array(),
            },
        }];
        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(info.render_pass)
            .framebuffer(info.framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: info.extent,
            })
            .clear_values(&clear_values);
        unsafe {
            self.device.raw.cmd_begin_render_pass(
                self.active,
                &begin_info,
                vk::SubpassContents::INLINE,
            )
        };
    }

    pub fn end_render_pass(&mut self) {
        unsafe { self.device.raw.cmd_end_render_pass(self.active) };
    }

    pub fn bind_vertex_buffer(&mut self, buffer: &Resource, desc: &sbt::VertexDesc) {
        let Some(raw) = buffer.buffer_handle() else {
            log::warn!("bind_vertex_buffer called with a non-buffer resource");
            return;
        };
        unsafe {
            self.device
                .raw
                .cmd_bind_vertex_buffers(self.active, desc.slot, &[raw], &[0])
        };
    }

    pub fn bind_index_buffer(&mut self, buffer: &Resource) {
        let Some(raw) = buffer.buffer_handle() else {
            log::warn!("bind_index_buffer called with a non-buffer resource");
            return;
        };
        unsafe {
            self.device
                .raw
                .cmd_bind_index_buffer(self.active, raw, 0, vk::IndexType::UINT32)
        };
    }

    pub fn set_primitive_topology(&mut self, topology: sbt::PrimitiveTopology) {
        // The pipeline fixes the topology class; the dynamic state covers
        // the list/strip switch inside it.
        unsafe {
            self.device
                .raw
                .cmd_set_primitive_topology(self.active, conv::map_topology(topology))
        };
    }

    pub fn push_constants(&mut self, pipeline: &PipelineState, data: &[u8]) {
        unsafe {
            self.device.raw.cmd_push_constants(
                self.active,
                pipeline.layout,
                vk::ShaderStageFlags::ALL,
                0,
                data,
            )
        };
    }

    pub fn draw(&mut self, args: &sbt::DrawArgs) {
        unsafe {
            self.device.raw.cmd_draw_indexed(
                self.active,
                args.index_count,
                args.instance_count.max(1),
                args.start_index,
                args.base_vertex,
                args.start_instance,
            )
        };
    }

    /// Non-indexed draw used by clients without an index buffer.
    pub fn draw_vertices(&mut self, vertex_count: u32, instance_count: u32) {
        unsafe {
            self.device
                .raw
                .cmd_draw(self.active, vertex_count, instance_count.max(1), 0, 0)
        };
    }

    /// Clear a texture resource outside a render pass.
    pub fn clear(&mut self, target: &Resource, color: sbt::Color) {
        let super::ResourceHandle::Texture { image, .. } = target.handle else {
            log::warn!("clear called with a buffer resource");
            return;
        };
        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        unsafe {
            self.device.raw.cmd_clear_color_image(
                self.active,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &vk::ClearColorValue {
                    float32: color.to_array(),
                },
                &[range],
            )
        };
    }

    /// Copy the whole of `src` into `dst`.
    pub fn copy_buffer(&mut self, src: &Resource, dst: &Resource) {
        let (Some(src_raw), Some(dst_raw)) = (src.buffer_handle(), dst.buffer_handle()) else {
            log::warn!("copy_buffer called with a non-buffer resource");
            return;
        };
        let size = src.width.min(dst.width);
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe {
            self.device
                .raw
                .cmd_copy_buffer(self.active, src_raw, dst_raw, &[region])
        };
    }
}

impl Drop for CommandEncoder {
    fn drop(&mut self) {
        unsafe { self.device.raw.destroy_command_pool(self.raw, None) };
    }
}
