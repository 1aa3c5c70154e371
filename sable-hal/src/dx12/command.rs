//! Command allocator/list recording.

use winapi::um::d3d12;

use crate::DeviceError;

use super::{conv, CommandBuffer, Device, HResult as _, PipelineState, Resource};

/// The back-buffer target a render pass draws into, prefilled by the
/// renderer for the current frame.
#[derive(Clone, Copy)]
pub struct OutputTarget {
    pub(super) resource: native::Resource,
    pub(super) rtv: d3d12::D3D12_CPU_DESCRIPTOR_HANDLE,
    pub(super) extent: (u32, u32),
}

unsafe impl Send for OutputTarget {}
unsafe impl Sync for OutputTarget {}

/// A command recorder wrapping one allocator and one reusable list.
pub struct CommandEncoder {
    pub(super) allocator: native::CommandAllocator,
    pub(super) list: native::GraphicsCommandList,
    recording: bool,
}

unsafe impl Send for CommandEncoder {}
unsafe impl Sync for CommandEncoder {}

impl Device {
    /// Create a recorder for command objects of `kind`.
    pub fn create_command_encoder(
        &self,
        kind: sbt::CommandObjectType,
    ) -> Result<CommandEncoder, DeviceError> {
        let list_type = conv::map_queue_kind(kind);
        let allocator = self
            .shared
            .raw
            .create_command_allocator(list_type)
            .into_device_result("CreateCommandAllocator")?;
        let list = self
            .shared
            .raw
            .create_graphics_command_list(list_type, allocator, native::PipelineState::null(), 0)
            .into_device_result("CreateCommandList")?;
        // Lists are created open; encoders hand them out closed.
        unsafe { list.Close() }.into_device_result("Close")?;

        Ok(CommandEncoder {
            allocator,
            list,
            recording: false,
        })
    }
}

impl CommandEncoder {
    /// Reset the allocator and reopen the list.
    pub fn begin(&mut self) -> Result<(), DeviceError> {
        unsafe {
            self.allocator.Reset().into_device_result("Allocator reset")?;
            self.list
                .Reset(self.allocator.as_mut_ptr(), std::ptr::null_mut())
                .into_device_result("List reset")?;
        }
        self.recording = true;
        Ok(())
    }

    /// Close the list and return it for submission.
    pub fn end(&mut self) -> Result<CommandBuffer, DeviceError> {
        unsafe { self.list.Close() }.into_device_result("Close")?;
        self.recording = false;
        Ok(CommandBuffer { raw: self.list })
    }

    /// Whether `begin` has been called without a matching `end`.
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn bind_pipeline(&mut self, pipeline: &PipelineState) {
        unsafe {
            self.list.SetPipelineState(pipeline.raw.as_mut_ptr());
            self.list
                .SetGraphicsRootSignature(pipeline.root_signature.as_mut_ptr());
            self.list.IASetPrimitiveTopology(pipeline.topology);
        }
    }

    pub fn set_viewport(&mut self, viewport: &sbt::Viewport) {
        let raw = d3d12::D3D12_VIEWPORT {
            TopLeftX: viewport.x,
            TopLeftY: viewport.y,
            Width: viewport.width,
            Height: viewport.height,
            MinDepth: viewport.min_depth,
            MaxDepth: viewport.max_depth,
        };
        unsafe { self.list.RSSetViewports(1, &raw) };
    }

    pub fn set_scissor_rect(&mut self, rect: &sbt::Rect) {
        let raw = d3d12::D3D12_RECT {
            left: rect.x,
            top: rect.y,
            right: rect.x + rect.width as i32,
            bottom: rect.y + rect.height as i32,
        };
        unsafe { self.list.RSSetScissorRects(1, &raw) };
    }

    /// Transition `resource` between two abstract states.
    pub fn barrier(
        &mut self,
        resource: &Resource,
        before: sbt::ResourceState,
        after: sbt::ResourceState,
    ) {
        self.transition(
            resource.raw,
            conv::map_resource_state(before),
            conv::map_resource_state(after),
        );
    }

    /// Transition the back buffer to `RENDER_TARGET`, bind it and clear.
    pub fn begin_render_pass(&mut self, target: &OutputTarget, clear: sbt::Color) {
        self.transition(
            target.resource,
            d3d12::D3D12_RESOURCE_STATE_PRESENT,
            d3d12::D3D12_RESOURCE_STATE_RENDER_TARGET,
        );
        unsafe {
            self.list
                .OMSetRenderTargets(1, &target.rtv, 0, std::ptr::null());
            self.list
                .ClearRenderTargetView(target.rtv, &clear.to_array(), 0, std::ptr::null());
        }
    }

    /// Transition the back buffer back to `PRESENT`.
    pub fn end_render_pass(&mut self, target: &OutputTarget) {
        self.transition(
            target.resource,
            d3d12::D3D12_RESOURCE_STATE_RENDER_TARGET,
            d3d12::D3D12_RESOURCE_STATE_PRESENT,
        );
    }

    pub fn bind_vertex_buffer(&mut self, buffer: &Resource, desc: &sbt::VertexDesc) {
        let view = d3d12::D3D12_VERTEX_BUFFER_VIEW {
            BufferLocation: buffer.gpu_address(),
            SizeInBytes: desc.size,
            StrideInBytes: desc.stride,
        };
        unsafe { self.list.IASetVertexBuffers(desc.slot, 1, &view) };
    }

    pub fn bind_index_buffer(&mut self, buffer: &Resource) {
        let view = d3d12::D3D12_INDEX_BUFFER_VIEW {
            BufferLocation: buffer.gpu_address(),
            SizeInBytes: buffer.width as u32,
            Format: winapi::shared::dxgiformat::DXGI_FORMAT_R32_UINT,
        };
        unsafe { self.list.IASetIndexBuffer(&view) };
    }

    pub fn set_primitive_topology(&mut self, topology: sbt::PrimitiveTopology) {
        unsafe { self.list.IASetPrimitiveTopology(conv::map_topology(topology)) };
    }

    pub fn push_constants(&mut self, _pipeline: &PipelineState, data: &[u8]) {
        // Root parameter 0 holds the root constants when the shader
        // declares a push block.
        unsafe {
            self.list.SetGraphicsRoot32BitConstants(
                0,
                (data.len() / 4) as u32,
                data.as_ptr() as *const _,
                0,
            )
        };
    }

    pub fn draw(&mut self, args: &sbt::DrawArgs) {
        unsafe {
            self.list.DrawIndexedInstanced(
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
            self.list
                .DrawInstanced(vertex_count, instance_count.max(1), 0, 0)
        };
    }

    /// Clear a render target outside a pass.
    pub fn clear(&mut self, target: &OutputTarget, color: sbt::Color, rect: Option<&sbt::Rect>) {
        let raw_rect = rect.map(|rect| d3d12::D3D12_RECT {
            left: rect.x,
            top: rect.y,
            right: rect.x + rect.width as i32,
            bottom: rect.y + rect.height as i32,
        });
        unsafe {
            self.list.ClearRenderTargetView(
                target.rtv,
                &color.to_array(),
                raw_rect.is_some() as u32,
                raw_rect
                    .as_ref()
                    .map_or(std::ptr::null(), |rect| rect as *const _),
            )
        };
    }

    /// Copy the whole of `src` into `dst`.
    pub fn copy_buffer(&mut self, src: &Resource, dst: &Resource) {
        let size = src.width.min(dst.width);
        unsafe {
            self.list.CopyBufferRegion(
                dst.raw.as_mut_ptr(),
                0,
                src.raw.as_mut_ptr(),
                0,
                size,
            )
        };
    }
}

impl Drop for CommandEncoder {
    fn drop(&mut self) {
        unsafe {
            self.list.destroy();
            self.allocator.destroy();
        }
    }
}
