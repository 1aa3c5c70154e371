//! The public command recorder.
//!
//! `Closed → Recording → Closed`; closing publishes the finished backend
//! list as `CommandReady` through the renderer's shared submission block.
//! The recorder holds only a weak handle to that block, so it never
//! extends the renderer's lifetime.

use std::sync::Weak;

use sbt::ErrorCode;

use crate::dispatch::{AnyCommandBuffer, AnyEncoder, AnyFrameOutput, PipelineState, Resource};
use crate::error::{Error, SableResult};
use crate::renderer::submit::SubmitShared;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum RecordState {
    Closed,
    Recording,
}

/// A per-thread, per-frame command recorder.
pub struct CommandObject {
    encoder: AnyEncoder,
    state: RecordState,
    submit: Weak<SubmitShared<AnyCommandBuffer>>,
    /// The frame-output info captured by `begin_render_pass`, kept while
    /// the pass is open.
    open_pass: Option<AnyFrameOutput>,
}

// Accessed only from its owning thread; the row container enforces that.
unsafe impl Send for CommandObject {}

impl CommandObject {
    pub(crate) fn new(
        encoder: AnyEncoder,
        submit: Weak<SubmitShared<AnyCommandBuffer>>,
    ) -> Self {
        Self {
            encoder,
            state: RecordState::Closed,
            submit,
            open_pass: None,
        }
    }

    fn ensure_recording(&self, operation: &str) -> SableResult<()> {
        if self.state != RecordState::Recording {
            return Err(Error::new(
                ErrorCode::InvalidParameter,
                format!("{operation} is only legal while recording"),
            ));
        }
        Ok(())
    }

    /// Reset the recorder's pool and open it, optionally binding `pso`.
    pub fn begin_recording(&mut self, pso: Option<&PipelineState>) -> SableResult<()> {
        if self.state == RecordState::Recording {
            return Err(Error::new(
                ErrorCode::InvalidParameter,
                "BeginRecording on a recorder that is already recording",
            ));
        }
        match &mut self.encoder {
            #[cfg(feature = "vulkan")]
            AnyEncoder::Vulkan(encoder) => encoder.begin()?,
            #[cfg(all(windows, feature = "dx12"))]
            AnyEncoder::Dx12(encoder) => encoder.begin()?,
            #[cfg(all(windows, feature = "gles"))]
            AnyEncoder::Gl(encoder) => encoder.begin()?,
        }
        self.state = RecordState::Recording;
        if let Some(pso) = pso {
            self.bind_pipeline(pso)?;
        }
        Ok(())
    }

    /// Close the list and publish it as `CommandReady`.
    ///
    /// Publication parks until the submission window is open; a recorder
    /// whose renderer is gone drops the list instead.
    pub fn end_recording(&mut self) -> SableResult<()> {
        self.ensure_recording("EndRecording")?;
        if self.open_pass.is_some() {
            return Err(Error::new(
                ErrorCode::InvalidParameter,
                "EndRecording with an open render pass",
            ));
        }
        let buffer = match &mut self.encoder {
            #[cfg(feature = "vulkan")]
            AnyEncoder::Vulkan(encoder) => AnyCommandBuffer::Vulkan(encoder.end()?),
            #[cfg(all(windows, feature = "dx12"))]
            AnyEncoder::Dx12(encoder) => AnyCommandBuffer::Dx12(encoder.end()?),
            #[cfg(all(windows, feature = "gles"))]
            AnyEncoder::Gl(encoder) => AnyCommandBuffer::Gl(encoder.end()?),
        };
        self.state = RecordState::Closed;

        match self.submit.upgrade() {
            Some(submit) => submit.publish(buffer),
            None => log::warn!("command list finished after its renderer was destroyed"),
        }
        Ok(())
    }

    /// Abandon the current recording without publishing.
    pub fn reset(&mut self) {
        self.state = RecordState::Closed;
        self.open_pass = None;
    }

    /// Whether the recorder is between `begin_recording` and
    /// `end_recording`.
    pub fn is_recording(&self) -> bool {
        self.state == RecordState::Recording
    }

    /// Bind a pipeline-state object.
    pub fn bind_pipeline(&mut self, pso: &PipelineState) -> SableResult<()> {
        self.ensure_recording("BindPipeline")?;
        match (&mut self.encoder, &*pso.inner) {
            #[cfg(feature = "vulkan")]
            (AnyEncoder::Vulkan(encoder), crate::dispatch::AnyPipeline::Vulkan(pipeline)) => {
                encoder.bind_pipeline(pipeline)
            }
            #[cfg(all(windows, feature = "dx12"))]
            (AnyEncoder::Dx12(encoder), crate::dispatch::AnyPipeline::Dx12(pipeline)) => {
                encoder.bind_pipeline(pipeline)
            }
            #[cfg(all(windows, feature = "gles"))]
            (AnyEncoder::Gl(encoder), crate::dispatch::AnyPipeline::Gl(pipeline)) => {
                encoder.bind_pipeline(pipeline)
            }
            #[allow(unreachable_patterns)]
            _ => return Err(Error::backend_mismatch("BindPipeline")),
        }
        Ok(())
    }

    /// Set the viewport; identical mapping on every backend.
    pub fn set_viewport(&mut self, viewport: &sbt::Viewport) -> SableResult<()> {
        self.ensure_recording("SetViewport")?;
        match &mut self.encoder {
            #[cfg(feature = "vulkan")]
            AnyEncoder::Vulkan(encoder) => encoder.set_viewport(viewport),
            #[cfg(all(windows, feature = "dx12"))]
            AnyEncoder::Dx12(encoder) => encoder.set_viewport(viewport),
            #[cfg(all(windows, feature = "gles"))]
            AnyEncoder::Gl(encoder) => encoder.set_viewport(viewport),
        }
        Ok(())
    }

    /// Set the scissor rectangle.
    pub fn set_scissor_rect(&mut self, rect: &sbt::Rect) -> SableResult<()> {
        self.ensure_recording("SetScissorRect")?;
        match &mut self.encoder {
            #[cfg(feature = "vulkan")]
            AnyEncoder::Vulkan(encoder) => encoder.set_scissor_rect(rect),
            #[cfg(all(windows, feature = "dx12"))]
            AnyEncoder::Dx12(encoder) => encoder.set_scissor_rect(rect),
            #[cfg(all(windows, feature = "gles"))]
            AnyEncoder::Gl(encoder) => encoder.set_scissor_rect(rect),
        }
        Ok(())
    }

    /// Transition `resource` into `after`.
    ///
    /// The `before` state is inferred from the resource's tracked state
    /// and swapped atomically, so callers never re-declare it.
    pub fn barrier(&mut self, resource: &Resource, after: sbt::ResourceState) -> SableResult<()> {
        self.ensure_recording("Barrier")?;
        match (&mut self.encoder, &resource.inner) {
            #[cfg(feature = "vulkan")]
            (AnyEncoder::Vulkan(encoder), crate::dispatch::AnyResource::Vulkan(raw)) => {
                let before = raw.state().transition(after);
                encoder.barrier(raw, before, after);
            }
            #[cfg(all(windows, feature = "dx12"))]
            (AnyEncoder::Dx12(encoder), crate::dispatch::AnyResource::Dx12(raw)) => {
                let before = raw.state().transition(after);
                encoder.barrier(raw, before, after);
            }
            #[cfg(all(windows, feature = "gles"))]
            (AnyEncoder::Gl(encoder), crate::dispatch::AnyResource::Gl(raw)) => {
                let before = raw.state().transition(after);
                encoder.barrier(raw, before, after);
            }
            #[allow(unreachable_patterns)]
            _ => return Err(Error::backend_mismatch("Barrier")),
        }
        Ok(())
    }

    /// Open a render pass on the frame's back buffer with a clear.
    pub fn begin_render_pass(
        &mut self,
        output: &crate::renderer::OutputTargetInfo,
        clear: sbt::Color,
    ) -> SableResult<()> {
        self.ensure_recording("BeginRenderPass")?;
        if self.open_pass.is_some() {
            return Err(Error::new(
                ErrorCode::InvalidParameter,
                "BeginRenderPass while a pass is already open",
            ));
        }
        let info = output.frame_output();
        match (&mut self.encoder, &info) {
            #[cfg(feature = "vulkan")]
            (AnyEncoder::Vulkan(encoder), AnyFrameOutput::Vulkan(pass)) => {
                encoder.begin_render_pass(pass, clear)
            }
            #[cfg(all(windows, feature = "dx12"))]
            (AnyEncoder::Dx12(encoder), AnyFrameOutput::Dx12(target)) => {
                encoder.begin_render_pass(target, clear)
            }
            #[cfg(all(windows, feature = "gles"))]
            (AnyEncoder::Gl(encoder), AnyFrameOutput::Gl { extent }) => {
                encoder.begin_render_pass(*extent, clear)
            }
            #[allow(unreachable_patterns)]
            _ => return Err(Error::backend_mismatch("BeginRenderPass")),
        }
        self.open_pass = Some(info);
        Ok(())
    }

    /// Close the open render pass.
    pub fn end_render_pass(&mut self) -> SableResult<()> {
        self.ensure_recording("EndRenderPass")?;
        let Some(info) = self.open_pass.take() else {
            return Err(Error::new(
                ErrorCode::InvalidParameter,
                "EndRenderPass without an open pass",
            ));
        };
        match (&mut self.encoder, &info) {
            #[cfg(feature = "vulkan")]
            (AnyEncoder::Vulkan(encoder), AnyFrameOutput::Vulkan(_)) => encoder.end_render_pass(),
            #[cfg(all(windows, feature = "dx12"))]
            (AnyEncoder::Dx12(encoder), AnyFrameOutput::Dx12(target)) => {
                encoder.end_render_pass(target)
            }
            #[cfg(all(windows, feature = "gles"))]
            (AnyEncoder::Gl(encoder), AnyFrameOutput::Gl { .. }) => encoder.end_render_pass(),
            #[allow(unreachable_patterns)]
            _ => return Err(Error::backend_mismatch("EndRenderPass")),
        }
        Ok(())
    }

    /// Bind a vertex buffer to `desc.slot`.
    pub fn bind_vertex_buffer(
        &mut self,
        buffer: &Resource,
        desc: &sbt::VertexDesc,
    ) -> SableResult<()> {
        self.ensure_recording("BindVertexBuffer")?;
        match (&mut self.encoder, &buffer.inner) {
            #[cfg(feature = "vulkan")]
            (AnyEncoder::Vulkan(encoder), crate::dispatch::AnyResource::Vulkan(raw)) => {
                encoder.bind_vertex_buffer(raw, desc)
            }
            #[cfg(all(windows, feature = "dx12"))]
            (AnyEncoder::Dx12(encoder), crate::dispatch::AnyResource::Dx12(raw)) => {
                encoder.bind_vertex_buffer(raw, desc)
            }
            #[cfg(all(windows, feature = "gles"))]
            (AnyEncoder::Gl(encoder), crate::dispatch::AnyResource::Gl(raw)) => {
                encoder.bind_vertex_buffer(raw, desc)
            }
            #[allow(unreachable_patterns)]
            _ => return Err(Error::backend_mismatch("BindVertexBuffer")),
        }
        Ok(())
    }

    /// Bind a 32-bit index buffer.
    pub fn bind_index_buffer(&mut self, buffer: &Resource) -> SableResult<()> {
        self.ensure_recording("BindIndexBuffer")?;
        match (&mut self.encoder, &buffer.inner) {
            #[cfg(feature = "vulkan")]
            (AnyEncoder::Vulkan(encoder), crate::dispatch::AnyResource::Vulkan(raw)) => {
                encoder.bind_index_buffer(raw)
            }
            #[cfg(all(windows, feature = "dx12"))]
            (AnyEncoder::Dx12(encoder), crate::dispatch::AnyResource::Dx12(raw)) => {
                encoder.bind_index_buffer(raw)
            }
            #[cfg(all(windows, feature = "gles"))]
            (AnyEncoder::Gl(encoder), crate::dispatch::AnyResource::Gl(raw)) => {
                encoder.bind_index_buffer(raw)
            }
            #[allow(unreachable_patterns)]
            _ => return Err(Error::backend_mismatch("BindIndexBuffer")),
        }
        Ok(())
    }

    /// Set the primitive topology.
    pub fn set_primitive_topology(&mut self, topology: sbt::PrimitiveTopology) -> SableResult<()> {
        self.ensure_recording("SetPrimitiveTopology")?;
        match &mut self.encoder {
            #[cfg(feature = "vulkan")]
            AnyEncoder::Vulkan(encoder) => encoder.set_primitive_topology(topology),
            #[cfg(all(windows, feature = "dx12"))]
            AnyEncoder::Dx12(encoder) => encoder.set_primitive_topology(topology),
            #[cfg(all(windows, feature = "gles"))]
            AnyEncoder::Gl(encoder) => encoder.set_primitive_topology(topology),
        }
        Ok(())
    }

    /// Write a push-constant block visible to all stages.
    pub fn push_constants(&mut self, pso: &PipelineState, data: &[u8]) -> SableResult<()> {
        self.ensure_recording("PushConstants")?;
        match (&mut self.encoder, &*pso.inner) {
            #[cfg(feature = "vulkan")]
            (AnyEncoder::Vulkan(encoder), crate::dispatch::AnyPipeline::Vulkan(pipeline)) => {
                encoder.push_constants(pipeline, data)
            }
            #[cfg(all(windows, feature = "dx12"))]
            (AnyEncoder::Dx12(encoder), crate::dispatch::AnyPipeline::Dx12(pipeline)) => {
                encoder.push_constants(pipeline, data)
            }
            #[cfg(all(windows, feature = "gles"))]
            (AnyEncoder::Gl(_), crate::dispatch::AnyPipeline::Gl(_)) => {
                // GLSL under GL has no push-constant storage; uniforms
                // cover this path.
                log::debug!("push constants ignored on the OpenGL backend");
            }
            #[allow(unreachable_patterns)]
            _ => return Err(Error::backend_mismatch("PushConstants")),
        }
        Ok(())
    }

    /// Indexed, optionally instanced draw.
    pub fn draw(&mut self, args: &sbt::DrawArgs) -> SableResult<()> {
        self.ensure_recording("Draw")?;
        match &mut self.encoder {
            #[cfg(feature = "vulkan")]
            AnyEncoder::Vulkan(encoder) => encoder.draw(args),
            #[cfg(all(windows, feature = "dx12"))]
            AnyEncoder::Dx12(encoder) => encoder.draw(args),
            #[cfg(all(windows, feature = "gles"))]
            AnyEncoder::Gl(encoder) => encoder.draw(args),
        }
        Ok(())
    }

    /// Non-indexed draw.
    pub fn draw_vertices(&mut self, vertex_count: u32, instance_count: u32) -> SableResult<()> {
        self.ensure_recording("Draw")?;
        match &mut self.encoder {
            #[cfg(feature = "vulkan")]
            AnyEncoder::Vulkan(encoder) => encoder.draw_vertices(vertex_count, instance_count),
            #[cfg(all(windows, feature = "dx12"))]
            AnyEncoder::Dx12(encoder) => encoder.draw_vertices(vertex_count, instance_count),
            #[cfg(all(windows, feature = "gles"))]
            AnyEncoder::Gl(encoder) => encoder.draw_vertices(vertex_count, instance_count),
        }
        Ok(())
    }

    /// Clear the frame's output target outside a pass.
    pub fn clear(
        &mut self,
        output: &crate::renderer::OutputTargetInfo,
        color: sbt::Color,
        rect: Option<&sbt::Rect>,
    ) -> SableResult<()> {
        self.ensure_recording("Clear")?;
        match (&mut self.encoder, &output.frame_output()) {
            #[cfg(feature = "vulkan")]
            (AnyEncoder::Vulkan(encoder), AnyFrameOutput::Vulkan(pass)) => {
                // Vulkan clears inside a pass; open a throwaway pass over
                // the same target.
                encoder.begin_render_pass(pass, color);
                encoder.end_render_pass();
                let _ = rect;
            }
            #[cfg(all(windows, feature = "dx12"))]
            (AnyEncoder::Dx12(encoder), AnyFrameOutput::Dx12(target)) => {
                encoder.clear(target, color, rect)
            }
            #[cfg(all(windows, feature = "gles"))]
            (AnyEncoder::Gl(encoder), AnyFrameOutput::Gl { .. }) => encoder.clear(color, rect),
            #[allow(unreachable_patterns)]
            _ => return Err(Error::backend_mismatch("Clear")),
        }
        Ok(())
    }

    /// Copy the whole of `src` into `dst`.
    pub fn copy(&mut self, src: &Resource, dst: &Resource) -> SableResult<()> {
        self.ensure_recording("Copy")?;
        match (&mut self.encoder, &src.inner, &dst.inner) {
            #[cfg(feature = "vulkan")]
            (
                AnyEncoder::Vulkan(encoder),
                crate::dispatch::AnyResource::Vulkan(src),
                crate::dispatch::AnyResource::Vulkan(dst),
            ) => encoder.copy_buffer(src, dst),
            #[cfg(all(windows, feature = "dx12"))]
            (
                AnyEncoder::Dx12(encoder),
                crate::dispatch::AnyResource::Dx12(src),
                crate::dispatch::AnyResource::Dx12(dst),
            ) => encoder.copy_buffer(src, dst),
            #[cfg(all(windows, feature = "gles"))]
            (
                AnyEncoder::Gl(encoder),
                crate::dispatch::AnyResource::Gl(src),
                crate::dispatch::AnyResource::Gl(dst),
            ) => encoder.copy_buffer(src, dst),
            #[allow(unreachable_patterns)]
            _ => return Err(Error::backend_mismatch("Copy")),
        }
        Ok(())
    }
}
