//! CPU-side command stream and its replay.

use glow::HasContext as _;

use crate::DeviceError;

use super::{device, GlHandle, GlShared, CommandBuffer, PipelineState, Resource};

/// One recorded command; the queue replays these on the context thread.
#[derive(Clone, Debug)]
pub enum GlCommand {
    BindPipeline {
        program: glow::Program,
        vao: glow::VertexArray,
        topology: u32,
        attributes: Vec<(u32, i32, u32, i32, i32)>, // (location, size, type, stride, offset)
    },
    SetViewport {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    },
    SetScissor {
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    },
    /// Barriers degrade to `glMemoryBarrier` for written resources and a
    /// no-op otherwise.
    MemoryBarrier {
        needed: bool,
    },
    BeginRenderPass {
        clear: [f32; 4],
        extent: (u32, u32),
    },
    EndRenderPass,
    BindVertexBuffer {
        buffer: glow::Buffer,
    },
    BindIndexBuffer {
        buffer: glow::Buffer,
    },
    SetTopology {
        topology: u32,
    },
    Draw {
        index_count: u32,
        instance_count: u32,
        start_index: u32,
        base_vertex: i32,
        start_instance: u32,
    },
    DrawArrays {
        vertex_count: u32,
        instance_count: u32,
    },
    Clear {
        color: [f32; 4],
        rect: Option<(i32, i32, i32, i32)>,
    },
    CopyBuffer {
        src: glow::Buffer,
        dst: glow::Buffer,
        size: i64,
    },
}

/// Records into a [`CommandBuffer`]; the state machine mirrors the other
/// backends even though GL itself has no list objects.
pub struct CommandEncoder {
    commands: Vec<GlCommand>,
    topology: u32,
    recording: bool,
}

impl super::Device {
    /// Create a recorder; `kind` has no GL distinction.
    pub fn create_command_encoder(
        &self,
        _kind: sbt::CommandObjectType,
    ) -> Result<CommandEncoder, DeviceError> {
        Ok(CommandEncoder {
            commands: Vec::new(),
            topology: glow::TRIANGLES,
            recording: false,
        })
    }
}

impl CommandEncoder {
    /// Drop any previous stream and open a fresh one.
    pub fn begin(&mut self) -> Result<(), DeviceError> {
        self.commands.clear();
        self.recording = true;
        Ok(())
    }

    /// Close and hand out the recorded stream.
    pub fn end(&mut self) -> Result<CommandBuffer, DeviceError> {
        self.recording = false;
        Ok(CommandBuffer {
            commands: std::mem::take(&mut self.commands),
        })
    }

    /// Whether `begin` has been called without a matching `end`.
    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn bind_pipeline(&mut self, pipeline: &PipelineState) {
        self.topology = pipeline.topology;
        let attributes = pipeline
            .vertex_layout
            .elements
            .iter()
            .map(|element| {
                (
                    element.semantic_index,
                    element.format.component_count() as i32,
                    attribute_type(element.format),
                    pipeline.vertex_layout.stride as i32,
                    element.aligned_byte_offset as i32,
                )
            })
            .collect();
        self.commands.push(GlCommand::BindPipeline {
            program: pipeline.program,
            vao: pipeline.vao,
            topology: pipeline.topology,
            attributes,
        });
    }

    pub fn set_viewport(&mut self, viewport: &sbt::Viewport) {
        self.commands.push(GlCommand::SetViewport {
            x: viewport.x as i32,
            y: viewport.y as i32,
            width: viewport.width as i32,
            height: viewport.height as i32,
        });
    }

    pub fn set_scissor_rect(&mut self, rect: &sbt::Rect) {
        self.commands.push(GlCommand::SetScissor {
            x: rect.x,
            y: rect.y,
            width: rect.width as i32,
            height: rect.height as i32,
        });
    }

    pub fn barrier(
        &mut self,
        _resource: &Resource,
        before: sbt::ResourceState,
        after: sbt::ResourceState,
    ) {
        // Only writes need visibility; read-read transitions are no-ops.
        let needed = matches!(
            before,
            sbt::ResourceState::CopyDest | sbt::ResourceState::OutputTarget
        ) || matches!(
            after,
            sbt::ResourceState::CopyDest | sbt::ResourceState::OutputTarget
        );
        self.commands.push(GlCommand::MemoryBarrier { needed });
    }

    pub fn begin_render_pass(&mut self, extent: (u32, u32), clear: sbt::Color) {
        self.commands.push(GlCommand::BeginRenderPass {
            clear: clear.to_array(),
            extent,
        });
    }

    pub fn end_render_pass(&mut self) {
        self.commands.push(GlCommand::EndRenderPass);
    }

    pub fn bind_vertex_buffer(&mut self, buffer: &Resource, _desc: &sbt::VertexDesc) {
        if let GlHandle::Buffer(raw) = buffer.handle {
            self.commands.push(GlCommand::BindVertexBuffer { buffer: raw });
        } else {
            log::warn!("bind_vertex_buffer called with a non-buffer resource");
        }
    }

    pub fn bind_index_buffer(&mut self, buffer: &Resource) {
        if let GlHandle::Buffer(raw) = buffer.handle {
            self.commands.push(GlCommand::BindIndexBuffer { buffer: raw });
        } else {
            log::warn!("bind_index_buffer called with a non-buffer resource");
        }
    }

    pub fn set_primitive_topology(&mut self, topology: sbt::PrimitiveTopology) {
        self.topology = device::map_topology(topology);
        self.commands.push(GlCommand::SetTopology {
            topology: self.topology,
        });
    }

    pub fn draw(&mut self, args: &sbt::DrawArgs) {
        self.commands.push(GlCommand::Draw {
            index_count: args.index_count,
            instance_count: args.instance_count.max(1),
            start_index: args.start_index,
            base_vertex: args.base_vertex,
            start_instance: args.start_instance,
        });
    }

    /// Non-indexed draw used by clients without an index buffer.
    pub fn draw_vertices(&mut self, vertex_count: u32, instance_count: u32) {
        self.commands.push(GlCommand::DrawArrays {
            vertex_count,
            instance_count: instance_count.max(1),
        });
    }

    pub fn clear(&mut self, color: sbt::Color, rect: Option<&sbt::Rect>) {
        self.commands.push(GlCommand::Clear {
            color: color.to_array(),
            rect: rect.map(|rect| (rect.x, rect.y, rect.width as i32, rect.height as i32)),
        });
    }

    pub fn copy_buffer(&mut self, src: &Resource, dst: &Resource) {
        let (GlHandle::Buffer(src_raw), GlHandle::Buffer(dst_raw)) = (src.handle, dst.handle)
        else {
            log::warn!("copy_buffer called with a non-buffer resource");
            return;
        };
        let (src_width, _, _) = src.extent();
        let (dst_width, _, _) = dst.extent();
        self.commands.push(GlCommand::CopyBuffer {
            src: src_raw,
            dst: dst_raw,
            size: src_width.min(dst_width) as i64,
        });
    }
}

fn attribute_type(format: crate::shader::layout::VertexAttributeFormat) -> u32 {
    use crate::shader::layout::VertexAttributeFormat as F;
    match format {
        F::R32Float | F::Rg32Float | F::Rgb32Float | F::Rgba32Float => glow::FLOAT,
        F::R32Sint | F::Rg32Sint | F::Rgb32Sint | F::Rgba32Sint => glow::INT,
        F::R32Uint | F::Rg32Uint | F::Rgb32Uint | F::Rgba32Uint => glow::UNSIGNED_INT,
    }
}

/// Replay one stream against the live context.
///
/// The draw strategy selects among the four indexed entry points from the
/// feature triple `(instanced, base_vertex, base_instance)`.
pub(super) fn replay(shared: &GlShared, commands: &[GlCommand]) {
    let gl = &shared.gl;
    let mut topology = glow::TRIANGLES;
    let mut pending_attributes: Vec<(u32, i32, u32, i32, i32)> = Vec::new();
    let mut attributes_applied = false;

    for command in commands {
        match *command {
            GlCommand::BindPipeline {
                program,
                vao,
                topology: pipeline_topology,
                ref attributes,
            } => unsafe {
                gl.use_program(Some(program));
                gl.bind_vertex_array(Some(vao));
                topology = pipeline_topology;
                pending_attributes = attributes.clone();
                attributes_applied = false;
            },
            GlCommand::SetViewport {
                x,
                y,
                width,
                height,
            } => unsafe {
                gl.viewport(x, y, width, height);
            },
            GlCommand::SetScissor {
                x,
                y,
                width,
                height,
            } => unsafe {
                gl.enable(glow::SCISSOR_TEST);
                gl.scissor(x, y, width, height);
            },
            GlCommand::MemoryBarrier { needed } => unsafe {
                if needed {
                    gl.memory_barrier(glow::ALL_BARRIER_BITS);
                }
            },
            GlCommand::BeginRenderPass { clear, extent } => unsafe {
                gl.bind_framebuffer(glow::FRAMEBUFFER, None);
                gl.viewport(0, 0, extent.0 as i32, extent.1 as i32);
                gl.clear_color(clear[0], clear[1], clear[2], clear[3]);
                gl.clear(glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT);
            },
            GlCommand::EndRenderPass => {}
            GlCommand::BindVertexBuffer { buffer } => unsafe {
                gl.bind_buffer(glow::ARRAY_BUFFER, Some(buffer));
                // Attribute pointers capture the bound buffer; apply them
                // on the first binding after a pipeline switch.
                if !attributes_applied {
                    for &(location, size, ty, stride, offset) in &pending_attributes {
                        gl.enable_vertex_attrib_array(location);
                        if ty == glow::FLOAT {
                            gl.vertex_attrib_pointer_f32(
                                location, size, ty, false, stride, offset,
                            );
                        } else {
                            gl.vertex_attrib_pointer_i32(location, size, ty, stride, offset);
                        }
                    }
                    attributes_applied = true;
                }
            },
            GlCommand::BindIndexBuffer { buffer } => unsafe {
                gl.bind_buffer(glow::ELEMENT_ARRAY_BUFFER, Some(buffer));
            },
            GlCommand::SetTopology {
                topology: new_topology,
            } => {
                topology = new_topology;
            }
            GlCommand::Draw {
                index_count,
                instance_count,
                start_index,
                base_vertex,
                start_instance,
            } => unsafe {
                let offset = (start_index as usize * std::mem::size_of::<u32>()) as i32;
                let instanced = instance_count > 1;
                let based = base_vertex != 0;
                let offset_instance = start_instance != 0;
                match (instanced, based, offset_instance) {
                    (false, false, false) => gl.draw_elements(
                        topology,
                        index_count as i32,
                        glow::UNSIGNED_INT,
                        offset,
                    ),
                    (false, true, false) => gl.draw_elements_base_vertex(
                        topology,
                        index_count as i32,
                        glow::UNSIGNED_INT,
                        offset,
                        base_vertex,
                    ),
                    (true, false, false) => gl.draw_elements_instanced(
                        topology,
                        index_count as i32,
                        glow::UNSIGNED_INT,
                        offset,
                        instance_count as i32,
                    ),
                    _ => gl.draw_elements_instanced_base_vertex_base_instance(
                        topology,
                        index_count as i32,
                        glow::UNSIGNED_INT,
                        offset,
                        instance_count as i32,
                        base_vertex,
                        start_instance,
                    ),
                }
            },
            GlCommand::DrawArrays {
                vertex_count,
                instance_count,
            } => unsafe {
                if instance_count > 1 {
                    gl.draw_arrays_instanced(
                        topology,
                        0,
                        vertex_count as i32,
                        instance_count as i32,
                    );
                } else {
                    gl.draw_arrays(topology, 0, vertex_count as i32);
                }
            },
            GlCommand::Clear { color, rect } => unsafe {
                if let Some((x, y, width, height)) = rect {
                    gl.enable(glow::SCISSOR_TEST);
                    gl.scissor(x, y, width, height);
                }
                gl.clear_color(color[0], color[1], color[2], color[3]);
                gl.clear(glow::COLOR_BUFFER_BIT);
                if rect.is_some() {
                    gl.disable(glow::SCISSOR_TEST);
                }
            },
            GlCommand::CopyBuffer { src, dst, size } => unsafe {
                gl.bind_buffer(glow::COPY_READ_BUFFER, Some(src));
                gl.bind_buffer(glow::COPY_WRITE_BUFFER, Some(dst));
                gl.copy_buffer_sub_data(
                    glow::COPY_READ_BUFFER,
                    glow::COPY_WRITE_BUFFER,
                    0,
                    0,
                    size as i32,
                );
                gl.bind_buffer(glow::COPY_READ_BUFFER, None);
                gl.bind_buffer(glow::COPY_WRITE_BUFFER, None);
            },
        }
    }
}
