//! Logical-device creation and device-level resource operations.

use std::{
    ffi::CString,
    sync::{atomic::AtomicBool, Arc},
};

use ash::{extensions::khr, vk};
use parking_lot::Mutex;

use crate::{
    shader::{self, layout, BindingType, Visibility},
    DeviceError, PipelineError, ShaderError,
};

use super::{
    memory::MemoryPools, Adapter, Device, DeviceShared, PipelineState, Queue, QueueSet, Resource,
    ResourceHandle, ShaderLibrary, Surface, VideoMemory, FENCE_WAIT_TIMEOUT_NS,
};

/// Queue priorities requested per family at device creation, indexed
/// high → medium → low.
pub const OPEN_QUEUE_PRIORITIES: [f32; 3] = [1.0, 0.67, 0.33];

fn family_kind(flags: vk::QueueFlags) -> Option<sbt::CommandObjectType> {
    if flags.contains(vk::QueueFlags::GRAPHICS) {
        Some(sbt::CommandObjectType::AllCommands)
    } else if flags.contains(vk::QueueFlags::COMPUTE) {
        Some(sbt::CommandObjectType::Compute)
    } else if flags.contains(vk::QueueFlags::TRANSFER) {
        Some(sbt::CommandObjectType::Copy)
    } else {
        None
    }
}

impl Adapter {
    /// Create the logical device with one queue set per recognized family
    /// kind.
    pub fn open(&self) -> Result<Device, DeviceError> {
        let mut set_blueprints = Vec::new();
        for (family_index, family) in self.queue_families.iter().enumerate() {
            let Some(kind) = family_kind(family.queue_flags) else {
                continue;
            };
            if set_blueprints
                .iter()
                .any(|&(_, existing, _): &(u32, sbt::CommandObjectType, usize)| existing == kind)
            {
                continue;
            }
            let count = (family.queue_count as usize).min(OPEN_QUEUE_PRIORITIES.len());
            set_blueprints.push((family_index as u32, kind, count));
        }
        if set_blueprints.is_empty() {
            return Err(DeviceError::InvalidArgument("adapter exposes no queues"));
        }

        // Priority slices must stay alive until vkCreateDevice returns.
        let priorities: Vec<Vec<f32>> = set_blueprints
            .iter()
            .map(|&(_, _, count)| OPEN_QUEUE_PRIORITIES[..count].to_vec())
            .collect();
        let queue_infos: Vec<vk::DeviceQueueCreateInfo> = set_blueprints
            .iter()
            .zip(priorities.iter())
            .map(|(&(family_index, _, _), priorities)| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(family_index)
                    .queue_priorities(priorities)
                    .build()
            })
            .collect();

        let extensions = [khr::Swapchain::name().as_ptr()];
        let mut features12 = vk::PhysicalDeviceVulkan12Features::builder()
            .timeline_semaphore(true);
        let info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&extensions)
            .push_next(&mut features12);

        profiling::scope!("vkCreateDevice");
        let raw = unsafe { self.shared.raw.create_device(self.raw, &info, None) }?;

        let queue_sets = set_blueprints
            .into_iter()
            .map(|(family_index, kind, count)| QueueSet {
                family_index,
                kind,
                priorities: OPEN_QUEUE_PRIORITIES[..count].to_vec(),
                allocated: Mutex::new(vec![false; count]),
            })
            .collect();

        let memory_properties = unsafe {
            self.shared
                .raw
                .get_physical_device_memory_properties(self.raw)
        };

        let shared = Arc::new(DeviceShared {
            raw,
            instance: Arc::clone(&self.shared),
            physical_device: self.raw,
            limits: self.properties.limits,
            memory_properties,
            queue_sets,
            lost: AtomicBool::new(false),
        });
        let pools = MemoryPools::new(Arc::clone(&shared));

        Ok(Device { shared, pools })
    }
}

impl Device {
    /// Whether a fatal device event has been observed.
    pub fn is_lost(&self) -> bool {
        self.shared.is_lost()
    }

    /// Allocate a typed queue.
    ///
    /// The set picks the first unallocated queue index whose creation
    /// priority falls in the requested bucket, in ascending index order;
    /// contention resolves in lock-acquisition order.
    pub fn create_queue(
        &self,
        kind: sbt::CommandObjectType,
        priority: sbt::QueuePriority,
    ) -> Result<Queue, DeviceError> {
        let set = self
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
            .ok_or(DeviceError::InvalidArgument("no queue family for kind"))?;

        let in_bucket = |value: f32| match priority {
            sbt::QueuePriority::High => value > 0.67,
            sbt::QueuePriority::Medium => value > 0.33 && value <= 0.67,
            sbt::QueuePriority::Low => value <= 0.33,
        };

        let queue_index = {
            let mut allocated = set.allocated.lock();
            let slot = set
                .priorities
                .iter()
                .enumerate()
                .position(|(index, &value)| in_bucket(value) && !allocated[index]);
            match slot {
                Some(index) => {
                    allocated[index] = true;
                    index as u32
                }
                None => {
                    return Err(DeviceError::InvalidArgument(
                        "no queue satisfies the priority",
                    ))
                }
            }
        };

        let raw = unsafe {
            self.shared
                .raw
                .get_device_queue(set.family_index, queue_index)
        };

        let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(0);
        let semaphore_info = vk::SemaphoreCreateInfo::builder().push_next(&mut type_info);
        let timeline = unsafe { self.shared.raw.create_semaphore(&semaphore_info, None) }?;

        Ok(Queue {
            raw,
            device: Arc::clone(&self.shared),
            family_index: set.family_index,
            queue_index,
            kind,
            timeline,
            last_signaled: Mutex::new(0),
            swapchain_fn: khr::Swapchain::new(&self.shared.instance.raw, &self.shared.raw),
        })
    }

    /// Compile `source` and wrap it in a `VkShaderModule` with reflection.
    pub fn create_shader_library(
        &self,
        source: &[u8],
        stage: sbt::ShaderStage,
        language: sbt::ShaderLanguage,
    ) -> Result<ShaderLibrary, PipelineError> {
        let spirv = match language {
            sbt::ShaderLanguage::Glsl | sbt::ShaderLanguage::Hlsl => {
                let text = std::str::from_utf8(source).map_err(|_| {
                    PipelineError::Shader(ShaderError::Compilation(
                        "shader source is not valid UTF-8".to_string(),
                    ))
                })?;
                let options = shader::CompileOptions::new(stage);
                shader::compile_to_spirv(text, language, &options)
                    .map_err(PipelineError::Shader)?
            }
            sbt::ShaderLanguage::SpirV => spirv_from_bytes(source).map_err(PipelineError::Shader)?,
            sbt::ShaderLanguage::Dxil => {
                return Err(PipelineError::Shader(ShaderError::Compilation(
                    "the Vulkan backend does not consume DXIL".to_string(),
                )))
            }
        };

        let reflection = shader::reflect_spirv(&spirv, stage).map_err(PipelineError::Shader)?;

        let info = vk::ShaderModuleCreateInfo::builder().code(&spirv);
        let raw = unsafe { self.shared.raw.create_shader_module(&info, None) }
            .map_err(DeviceError::from)?;

        Ok(ShaderLibrary {
            device: Arc::clone(&self.shared),
            raw,
            spirv,
            reflection,
        })
    }

    /// Lease `size` bytes of pool memory.
    pub fn allocate_video_memory(
        &self,
        size: u64,
        usage: sbt::VideoMemoryUsage,
        memory_type: sbt::VideoMemoryType,
    ) -> Result<VideoMemory, DeviceError> {
        self.pools.allocate(size, usage, memory_type)
    }

    /// Place a buffer or image inside `memory`.
    pub fn create_resource(
        &self,
        memory: &VideoMemory,
        width: u64,
        height: u64,
        depth: u64,
        ty: sbt::ResourceType,
    ) -> Result<Resource, DeviceError> {
        if width == 0 || height == 0 || depth == 0 {
            return Err(DeviceError::InvalidArgument("zero resource dimension"));
        }

        let handle;
        if ty.is_buffer() {
            if width > memory.size {
                return Err(DeviceError::InvalidArgument(
                    "buffer exceeds its video memory lease",
                ));
            }
            let usage = match ty {
                sbt::ResourceType::VertexBuffer => {
                    vk::BufferUsageFlags::VERTEX_BUFFER
                        | vk::BufferUsageFlags::TRANSFER_DST
                        | vk::BufferUsageFlags::TRANSFER_SRC
                }
                _ => {
                    vk::BufferUsageFlags::INDEX_BUFFER
                        | vk::BufferUsageFlags::TRANSFER_DST
                        | vk::BufferUsageFlags::TRANSFER_SRC
                }
            };
            let info = vk::BufferCreateInfo::builder()
                .size(width)
                .usage(usage)
                .sharing_mode(vk::SharingMode::EXCLUSIVE);
            let buffer = unsafe { self.shared.raw.create_buffer(&info, None) }?;

            let requirements = unsafe { self.shared.raw.get_buffer_memory_requirements(buffer) };
            if let Err(err) = self.check_placement(memory, &requirements) {
                unsafe { self.shared.raw.destroy_buffer(buffer, None) };
                return Err(err);
            }
            if let Err(err) = unsafe {
                self.shared
                    .raw
                    .bind_buffer_memory(buffer, memory.memory, memory.chunk.offset)
            } {
                unsafe { self.shared.raw.destroy_buffer(buffer, None) };
                return Err(err.into());
            }
            handle = ResourceHandle::Buffer(buffer);
        } else {
            let image_type = match ty {
                sbt::ResourceType::Texture1D => vk::ImageType::TYPE_1D,
                sbt::ResourceType::Texture3D => vk::ImageType::TYPE_3D,
                _ => vk::ImageType::TYPE_2D,
            };
            let info = vk::ImageCreateInfo::builder()
                .image_type(image_type)
                .format(vk::Format::R8G8B8A8_UNORM)
                .extent(vk::Extent3D {
                    width: width as u32,
                    height: height as u32,
                    depth: depth as u32,
                })
                .mip_levels(1)
                .array_layers(1)
                .samples(vk::SampleCountFlags::TYPE_1)
                .tiling(vk::ImageTiling::OPTIMAL)
                .usage(
                    vk::ImageUsageFlags::SAMPLED
                        | vk::ImageUsageFlags::TRANSFER_DST
                        | vk::ImageUsageFlags::COLOR_ATTACHMENT,
                )
                .sharing_mode(vk::SharingMode::EXCLUSIVE)
                .initial_layout(vk::ImageLayout::UNDEFINED);
            let image = unsafe { self.shared.raw.create_image(&info, None) }?;

            let requirements = unsafe { self.shared.raw.get_image_memory_requirements(image) };
            if let Err(err) = self.check_placement(memory, &requirements) {
                unsafe { self.shared.raw.destroy_image(image, None) };
                return Err(err);
            }
            if let Err(err) = unsafe {
                self.shared
                    .raw
                    .bind_image_memory(image, memory.memory, memory.chunk.offset)
            } {
                unsafe { self.shared.raw.destroy_image(image, None) };
                return Err(err.into());
            }

            let view_type = match image_type {
                vk::ImageType::TYPE_1D => vk::ImageViewType::TYPE_1D,
                vk::ImageType::TYPE_3D => vk::ImageViewType::TYPE_3D,
                _ => vk::ImageViewType::TYPE_2D,
            };
            let view_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(view_type)
                .format(vk::Format::R8G8B8A8_UNORM)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = match unsafe { self.shared.raw.create_image_view(&view_info, None) } {
                Ok(view) => view,
                Err(err) => {
                    unsafe { self.shared.raw.destroy_image(image, None) };
                    return Err(err.into());
                }
            };
            handle = ResourceHandle::Texture { image, view };
        }

        memory.binding.acquire()?;

        let mapped = memory
            .mapped_base
            .map(|base| unsafe { base.add(memory.chunk.offset as usize) });

        Ok(Resource {
            device: Arc::clone(&self.shared),
            handle,
            width,
            height,
            depth,
            ty,
            state: crate::StateTracker::new(sbt::ResourceState::Common),
            mapped,
            memory_type: memory.memory_type,
            binding: &memory.binding,
        })
    }

    fn check_placement(
        &self,
        memory: &VideoMemory,
        requirements: &vk::MemoryRequirements,
    ) -> Result<(), DeviceError> {
        if requirements.size > memory.size {
            return Err(DeviceError::InvalidArgument(
                "resource does not fit its video memory lease",
            ));
        }
        if memory.chunk.offset % requirements.alignment != 0 {
            return Err(DeviceError::InvalidArgument(
                "lease offset violates the resource alignment",
            ));
        }
        Ok(())
    }

    /// Upload `data` into a buffer resource.
    ///
    /// Host-visible leases take the persistent-map path; device-local ones
    /// stage through the upload pool and flush an inline copy on
    /// `copy_queue`, blocking until the transfer completes.
    pub fn set_buffer_data(
        &self,
        resource: &mut Resource,
        copy_queue: &Queue,
        data: &[u8],
        offset: u64,
    ) -> Result<(), DeviceError> {
        if data.is_empty() {
            return Ok(());
        }
        let Some(dst_buffer) = resource.buffer_handle() else {
            return Err(DeviceError::InvalidArgument(
                "set_buffer_data target is not a buffer",
            ));
        };
        if offset + data.len() as u64 > resource.width {
            return Err(DeviceError::InvalidArgument(
                "write exceeds the buffer size",
            ));
        }

        match resource.memory_type {
            sbt::VideoMemoryType::HostVisible | sbt::VideoMemoryType::DeviceReadback => {
                let mapped = resource.mapped.ok_or(DeviceError::InvalidArgument(
                    "host-visible resource is not mapped",
                ))?;
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        data.as_ptr(),
                        mapped.add(offset as usize),
                        data.len(),
                    )
                };
                Ok(())
            }
            sbt::VideoMemoryType::DeviceLocal => {
                self.staged_buffer_write(dst_buffer, copy_queue, data, offset)
            }
        }
    }

    fn staged_buffer_write(
        &self,
        dst_buffer: vk::Buffer,
        copy_queue: &Queue,
        data: &[u8],
        offset: u64,
    ) -> Result<(), DeviceError> {
        profiling::scope!("staged_buffer_write");
        let staging = self.pools.allocate(
            data.len() as u64,
            sbt::VideoMemoryUsage::VertexBuffer,
            sbt::VideoMemoryType::HostVisible,
        )?;

        let info = vk::BufferCreateInfo::builder()
            .size(data.len() as u64)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let src_buffer = unsafe { self.shared.raw.create_buffer(&info, None) }?;

        let destroy_src = |device: &DeviceShared| unsafe {
            device.raw.destroy_buffer(src_buffer, None);
        };

        let result = (|| {
            let requirements =
                unsafe { self.shared.raw.get_buffer_memory_requirements(src_buffer) };
            if staging.chunk.offset % requirements.alignment != 0 {
                return Err(DeviceError::InvalidArgument(
                    "staging offset violates alignment",
                ));
            }
            unsafe {
                self.shared.raw.bind_buffer_memory(
                    src_buffer,
                    staging.memory,
                    staging.chunk.offset,
                )
            }?;

            let base = staging.mapped_base.ok_or(DeviceError::InvalidArgument(
                "upload pool heap is not mapped",
            ))?;
            unsafe {
                std::ptr::copy_nonoverlapping(
                    data.as_ptr(),
                    base.add(staging.chunk.offset as usize),
                    data.len(),
                )
            };

            // One-shot recorder on the copy queue's family.
            let pool_info = vk::CommandPoolCreateInfo::builder()
                .queue_family_index(copy_queue.family_index)
                .flags(vk::CommandPoolCreateFlags::TRANSIENT);
            let pool = unsafe { self.shared.raw.create_command_pool(&pool_info, None) }?;

            let submit_result = (|| {
                let alloc_info = vk::CommandBufferAllocateInfo::builder()
                    .command_pool(pool)
                    .level(vk::CommandBufferLevel::PRIMARY)
                    .command_buffer_count(1);
                let cmd = unsafe { self.shared.raw.allocate_command_buffers(&alloc_info) }?[0];

                let begin = vk::CommandBufferBeginInfo::builder()
                    .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
                unsafe {
                    self.shared.raw.begin_command_buffer(cmd, &begin)?;
                    self.shared.raw.cmd_copy_buffer(
                        cmd,
                        src_buffer,
                        dst_buffer,
                        &[vk::BufferCopy {
                            src_offset: 0,
                            dst_offset: offset,
                            size: data.len() as u64,
                        }],
                    );
                    self.shared.raw.end_command_buffer(cmd)?;
                }

                let fence = unsafe {
                    self.shared
                        .raw
                        .create_fence(&vk::FenceCreateInfo::builder(), None)
                }?;
                let buffers = [cmd];
                let submit = vk::SubmitInfo::builder().command_buffers(&buffers);
                let wait_result = unsafe {
                    self.shared
                        .raw
                        .queue_submit(copy_queue.raw, &[submit.build()], fence)
                        .and_then(|()| {
                            self.shared
                                .raw
                                .wait_for_fences(&[fence], true, FENCE_WAIT_TIMEOUT_NS)
                        })
                };
                unsafe { self.shared.raw.destroy_fence(fence, None) };
                wait_result.map_err(DeviceError::from)
            })();

            unsafe { self.shared.raw.destroy_command_pool(pool, None) };
            submit_result
        })();

        destroy_src(&self.shared);
        result
    }

    /// Build a graphics pipeline against `surface`'s render pass.
    ///
    /// `vertex_layout` is derived from the vertex module's SPIR-V by the
    /// asynchronous pipeline builder before this call.
    pub fn create_pipeline_state(
        &self,
        vertex: &ShaderLibrary,
        pixel: &ShaderLibrary,
        topology: sbt::PrimitiveTopology,
        surface: &Surface,
        vertex_layout: &layout::VertexInputLayout,
    ) -> Result<PipelineState, PipelineError> {
        let render_pass = surface
            .render_pass()
            .ok_or(DeviceError::InvalidArgument("surface has no swap chain"))?;

        let (set_layouts, pipeline_layout) =
            self.create_pipeline_layout(&[vertex, pixel]).map_err(PipelineError::Device)?;

        let vs_entry = CString::new(vertex.reflection.entry_point.as_str())
            .map_err(|_| DeviceError::InvalidArgument("entry point contains a nul"))?;
        let ps_entry = CString::new(pixel.reflection.entry_point.as_str())
            .map_err(|_| DeviceError::InvalidArgument("entry point contains a nul"))?;

        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(vertex.raw)
                .name(&vs_entry)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(pixel.raw)
                .name(&ps_entry)
                .build(),
        ];

        let bindings = if vertex_layout.elements.is_empty() {
            vec![]
        } else {
            vec![vk::VertexInputBindingDescription {
                binding: 0,
                stride: vertex_layout.stride,
                input_rate: vk::VertexInputRate::VERTEX,
            }]
        };
        let attributes: Vec<vk::VertexInputAttributeDescription> = vertex_layout
            .elements
            .iter()
            .map(|element| vk::VertexInputAttributeDescription {
                location: element.semantic_index,
                binding: 0,
                format: super::conv::map_vertex_format(element.format),
                offset: element.aligned_byte_offset,
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(super::conv::map_topology(topology));

        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);

        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        let blend_attachments = [vk::PipelineColorBlendAttachmentState {
            blend_enable: vk::FALSE,
            color_write_mask: vk::ColorComponentFlags::R
                | vk::ColorComponentFlags::G
                | vk::ColorComponentFlags::B
                | vk::ColorComponentFlags::A,
            ..Default::default()
        }];
        let color_blend =
            vk::PipelineColorBlendStateCreateInfo::builder().attachments(&blend_attachments);

        let dynamic_states = [
            vk::DynamicState::VIEWPORT,
            vk::DynamicState::SCISSOR,
            vk::DynamicState::PRIMITIVE_TOPOLOGY,
        ];
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(pipeline_layout)
            .render_pass(render_pass)
            .subpass(0);

        profiling::scope!("vkCreateGraphicsPipelines");
        let pipelines = unsafe {
            self.shared.raw.create_graphics_pipelines(
                vk::PipelineCache::null(),
                &[info.build()],
                None,
            )
        };
        let raw = match pipelines {
            Ok(pipelines) => pipelines[0],
            Err((_, err)) => {
                unsafe {
                    self.shared.raw.destroy_pipeline_layout(pipeline_layout, None);
                    for layout in set_layouts {
                        self.shared.raw.destroy_descriptor_set_layout(layout, None);
                    }
                }
                return Err(PipelineError::Device(err.into()));
            }
        };

        Ok(PipelineState {
            device: Arc::clone(&self.shared),
            raw,
            layout: pipeline_layout,
            set_layouts,
            vertex_layout: vertex_layout.clone(),
        })
    }

    fn create_pipeline_layout(
        &self,
        libraries: &[&ShaderLibrary],
    ) -> Result<(Vec<vk::DescriptorSetLayout>, vk::PipelineLayout), DeviceError> {
        // (set, binding) -> (type, count, stages)
        let mut table: Vec<(u32, u32, vk::DescriptorType, u32, vk::ShaderStageFlags)> = Vec::new();
        let mut push_constant_size = 0u32;

        for library in libraries {
            let reflection = &library.reflection;
            if let Some(push) = reflection.push_constants {
                push_constant_size = push_constant_size.max(push.size_dwords * 4);
            }
            for binding in &reflection.resources {
                let descriptor_type = match binding.ty {
                    BindingType::Cbv => vk::DescriptorType::UNIFORM_BUFFER,
                    BindingType::Texture => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    BindingType::Srv => vk::DescriptorType::SAMPLED_IMAGE,
                    BindingType::Sampler => vk::DescriptorType::SAMPLER,
                    BindingType::Uav => vk::DescriptorType::STORAGE_IMAGE,
                    BindingType::StructuredBuffer | BindingType::ByteAddressBuffer => {
                        vk::DescriptorType::STORAGE_BUFFER
                    }
                };
                let stages = match binding.visibility {
                    Visibility::All => vk::ShaderStageFlags::ALL,
                    Visibility::Stage(stage) => map_stage(stage),
                };
                if let Some(entry) = table.iter_mut().find(|entry| {
                    entry.0 == binding.space && entry.1 == binding.bind_point
                }) {
                    entry.4 |= stages;
                } else {
                    table.push((
                        binding.space,
                        binding.bind_point,
                        descriptor_type,
                        binding.bind_count,
                        stages,
                    ));
                }
            }
        }

        let max_set = table.iter().map(|entry| entry.0).max().unwrap_or(0);
        let mut set_layouts = Vec::with_capacity(max_set as usize + 1);
        for set in 0..=max_set {
            let bindings: Vec<vk::DescriptorSetLayoutBinding> = table
                .iter()
                .filter(|entry| entry.0 == set)
                .map(|&(_, binding, descriptor_type, count, stages)| {
                    vk::DescriptorSetLayoutBinding {
                        binding,
                        descriptor_type,
                        descriptor_count: count,
                        stage_flags: stages,
                        ..Default::default()
                    }
                })
                .collect();
            let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
            let layout = unsafe { self.shared.raw.create_descriptor_set_layout(&info, None) }?;
            set_layouts.push(layout);
        }

        let push_ranges = if push_constant_size != 0 {
            vec![vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::ALL,
                offset: 0,
                size: push_constant_size,
            }]
        } else {
            vec![]
        };
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);
        let pipeline_layout =
            match unsafe { self.shared.raw.create_pipeline_layout(&layout_info, None) } {
                Ok(layout) => layout,
                Err(err) => {
                    for layout in set_layouts {
                        unsafe { self.shared.raw.destroy_descriptor_set_layout(layout, None) };
                    }
                    return Err(err.into());
                }
            };

        Ok((set_layouts, pipeline_layout))
    }

    /// Block until the device is idle.
    pub fn wait_idle(&self) {
        let _ = unsafe { self.shared.raw.device_wait_idle() };
    }
}

fn map_stage(stage: sbt::ShaderStage) -> vk::ShaderStageFlags {
    use sbt::ShaderStage as S;
    match stage {
        S::Vertex => vk::ShaderStageFlags::VERTEX,
        S::Pixel => vk::ShaderStageFlags::FRAGMENT,
        S::Compute => vk::ShaderStageFlags::COMPUTE,
        S::Geometry => vk::ShaderStageFlags::GEOMETRY,
        S::Mesh => vk::ShaderStageFlags::MESH_EXT,
        S::Amplification => vk::ShaderStageFlags::TASK_EXT,
        S::RayGeneration => vk::ShaderStageFlags::RAYGEN_KHR,
        S::RayIntersection => vk::ShaderStageFlags::INTERSECTION_KHR,
        S::RayAnyHit => vk::ShaderStageFlags::ANY_HIT_KHR,
        S::RayClosestHit => vk::ShaderStageFlags::CLOSEST_HIT_KHR,
        S::RayMiss => vk::ShaderStageFlags::MISS_KHR,
        S::RayCallable => vk::ShaderStageFlags::CALLABLE_KHR,
    }
}

fn spirv_from_bytes(bytes: &[u8]) -> Result<Vec<u32>, ShaderError> {
    if bytes.len() % 4 != 0 {
        return Err(ShaderError::Compilation(
            "SPIR-V byte length is not a multiple of four".to_string(),
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

impl Drop for DeviceShared {
    fn drop(&mut self) {
        unsafe {
            let _ = self.raw.device_wait_idle();
            self.raw.destroy_device(None);
        }
    }
}
