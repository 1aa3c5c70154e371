//! Device creation and device-level resource operations.

use std::{
    ffi::CString,
    sync::{atomic::AtomicBool, Arc},
};

use parking_lot::Mutex;
use winapi::{
    shared::{dxgiformat, dxgitype, winerror},
    um::{d3d12, synchapi, winbase},
    Interface,
};

use crate::{
    pool::{BlockPool, HeapChunk, Placement, PoolEntries},
    shader::{self, layout, RootParameter, Visibility},
    BindingGuard, DeviceError, PipelineError, ShaderError, StateTracker,
};

use super::{
    conv, descriptor, dred, Adapter, CommandBuffer, Device, DeviceShared, HResult as _,
    PipelineState, Queue, Resource, ShaderLibrary, VideoMemory, FENCE_WAIT_TIMEOUT_MS,
};

impl Adapter {
    /// Create the logical device and install the device-removed watcher.
    pub fn open(&self) -> Result<Device, DeviceError> {
        profiling::scope!("D3D12CreateDevice");
        let raw = match self.library.create_device(self.raw, native::FeatureLevel::L11_0) {
            Ok(pair) => pair.into_device_result("device creation")?,
            Err(err) => {
                log::error!("D3D12CreateDevice symbols missing: {err}");
                return Err(DeviceError::Lost);
            }
        };

        let shared = Arc::new(DeviceShared {
            raw,
            library: Arc::clone(&self.library),
            removed_watcher: Mutex::new(None),
            lost: AtomicBool::new(false),
        });

        if self.debug_enabled {
            *shared.removed_watcher.lock() = dred::RemovedWatcher::install(&shared);
        }

        Ok(Device {
            rtv_pool: Mutex::new(descriptor::CpuPool::new(
                shared.raw,
                native::DescriptorHeapType::Rtv,
            )),
            rtv_lookup: Mutex::new(Vec::new()),
            pools: MemoryPools::new(Arc::clone(&shared)),
            shared,
        })
    }
}

impl Device {
    /// Whether a fatal device event has been observed.
    pub fn is_lost(&self) -> bool {
        self.shared.is_lost()
    }

    /// Allocate a typed queue with its fence and CPU event.
    pub fn create_queue(
        &self,
        kind: sbt::CommandObjectType,
        priority: sbt::QueuePriority,
    ) -> Result<Queue, DeviceError> {
        let raw = self
            .shared
            .raw
            .create_command_queue(
                conv::map_queue_kind(kind),
                conv::map_queue_priority(priority),
                native::CommandQueueFlags::empty(),
                0,
            )
            .into_device_result("CreateCommandQueue")?;
        let fence = self
            .shared
            .raw
            .create_fence(0)
            .into_device_result("CreateFence")?;
        let event = native::Event::create(false, false);

        Ok(Queue {
            raw,
            device: Arc::clone(&self.shared),
            kind,
            fence,
            event,
            last_signaled: Mutex::new(0),
        })
    }

    /// Compile `source` down to DXIL with reflection.
    ///
    /// GLSL goes GLSL → SPIR-V → HLSL → DXIL with binding decorations
    /// preserved; HLSL is additionally front-ended to SPIR-V so reflection
    /// sees the same view on every path.
    pub fn create_shader_library(
        &self,
        source: &[u8],
        stage: sbt::ShaderStage,
        language: sbt::ShaderLanguage,
    ) -> Result<ShaderLibrary, PipelineError> {
        let options = shader::CompileOptions::new(stage);
        let (dxil, spirv) = match language {
            sbt::ShaderLanguage::Hlsl => {
                let text = utf8(source)?;
                let spirv = shader::compile_to_spirv(text, language, &options)
                    .map_err(PipelineError::Shader)?;
                let dxil =
                    shader::compile_hlsl_to_dxil(text, &options, shader::ShaderModel::V6_0, false)
                        .map_err(PipelineError::Shader)?;
                (dxil, Some(spirv))
            }
            sbt::ShaderLanguage::Glsl => {
                let text = utf8(source)?;
                let spirv = shader::compile_to_spirv(text, language, &options)
                    .map_err(PipelineError::Shader)?;
                let hlsl = shader::spirv_to_hlsl(&spirv, &options.entry_point)
                    .map_err(PipelineError::Shader)?;
                let dxil =
                    shader::compile_hlsl_to_dxil(&hlsl, &options, shader::ShaderModel::V6_0, false)
                        .map_err(PipelineError::Shader)?;
                (dxil, Some(spirv))
            }
            sbt::ShaderLanguage::SpirV => {
                let spirv = spirv_from_bytes(source).map_err(PipelineError::Shader)?;
                let hlsl = shader::spirv_to_hlsl(&spirv, &options.entry_point)
                    .map_err(PipelineError::Shader)?;
                let dxil =
                    shader::compile_hlsl_to_dxil(&hlsl, &options, shader::ShaderModel::V6_0, false)
                        .map_err(PipelineError::Shader)?;
                (dxil, Some(spirv))
            }
            sbt::ShaderLanguage::Dxil => (source.to_vec(), None),
        };

        let reflection = match &spirv {
            Some(words) => shader::reflect_spirv(words, stage).map_err(PipelineError::Shader)?,
            // Pre-compiled DXIL carries no reflectable metadata here.
            None => {
                let mut reflection = shader::ShaderReflection {
                    entry_point: options.entry_point.clone(),
                    stage,
                    resources: Vec::new(),
                    push_constants: None,
                    bindings: Default::default(),
                };
                reflection.index_bindings();
                reflection
            }
        };

        Ok(ShaderLibrary {
            dxil,
            reflection,
            spirv,
        })
    }

    /// Lease `size` bytes of heap-pool memory.
    pub fn allocate_video_memory(
        &self,
        size: u64,
        usage: sbt::VideoMemoryUsage,
        memory_type: sbt::VideoMemoryType,
    ) -> Result<VideoMemory, DeviceError> {
        self.pools.allocate(size, usage, memory_type)
    }

    /// Place a buffer or texture inside `memory`.
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

        let desc = if ty.is_buffer() {
            if width > memory.size {
                return Err(DeviceError::InvalidArgument(
                    "buffer exceeds its video memory lease",
                ));
            }
            d3d12::D3D12_RESOURCE_DESC {
                Dimension: d3d12::D3D12_RESOURCE_DIMENSION_BUFFER,
                Alignment: 0,
                Width: width,
                Height: 1,
                DepthOrArraySize: 1,
                MipLevels: 1,
                Format: dxgiformat::DXGI_FORMAT_UNKNOWN,
                SampleDesc: dxgitype::DXGI_SAMPLE_DESC {
                    Count: 1,
                    Quality: 0,
                },
                Layout: d3d12::D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
                Flags: d3d12::D3D12_RESOURCE_FLAG_NONE,
            }
        } else {
            let dimension = match ty {
                sbt::ResourceType::Texture1D => d3d12::D3D12_RESOURCE_DIMENSION_TEXTURE1D,
                sbt::ResourceType::Texture3D => d3d12::D3D12_RESOURCE_DIMENSION_TEXTURE3D,
                _ => d3d12::D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            };
            d3d12::D3D12_RESOURCE_DESC {
                Dimension: dimension,
                Alignment: 0,
                Width: width,
                Height: height as u32,
                DepthOrArraySize: depth as u16,
                MipLevels: 1,
                Format: dxgiformat::DXGI_FORMAT_R8G8B8A8_UNORM,
                SampleDesc: dxgitype::DXGI_SAMPLE_DESC {
                    Count: 1,
                    Quality: 0,
                },
                Layout: d3d12::D3D12_TEXTURE_LAYOUT_UNKNOWN,
                Flags: d3d12::D3D12_RESOURCE_FLAG_NONE,
            }
        };

        let initial_state = match memory.memory_type {
            sbt::VideoMemoryType::HostVisible => d3d12::D3D12_RESOURCE_STATE_GENERIC_READ,
            sbt::VideoMemoryType::DeviceReadback => d3d12::D3D12_RESOURCE_STATE_COPY_DEST,
            sbt::VideoMemoryType::DeviceLocal => d3d12::D3D12_RESOURCE_STATE_COMMON,
        };

        let mut raw = native::Resource::null();
        let hr = unsafe {
            self.shared.raw.CreatePlacedResource(
                memory.heap.as_mut_ptr(),
                memory.chunk.offset,
                &desc,
                initial_state,
                std::ptr::null(),
                &d3d12::ID3D12Resource::uuidof(),
                raw.mut_void(),
            )
        };
        hr.into_device_result("CreatePlacedResource")?;

        let mapped = if memory.memory_type != sbt::VideoMemoryType::DeviceLocal && ty.is_buffer()
        {
            let mut ptr = std::ptr::null_mut();
            let hr = unsafe { raw.Map(0, std::ptr::null(), &mut ptr) };
            if let Err(err) = hr.into_result() {
                unsafe { raw.destroy() };
                log::error!("Map failed: {err}");
                return Err(DeviceError::Lost);
            }
            Some(ptr as *mut u8)
        } else {
            None
        };

        memory.binding.acquire().map_err(|err| {
            unsafe {
                if mapped.is_some() {
                    raw.Unmap(0, std::ptr::null());
                }
                raw.destroy();
            }
            err
        })?;

        Ok(Resource {
            raw,
            width,
            height,
            depth,
            ty,
            state: StateTracker::new(sbt::ResourceState::Common),
            mapped,
            memory_type: memory.memory_type,
            binding: &memory.binding,
        })
    }

    /// Upload `data` into a buffer resource; device-local targets stage
    /// through the upload pool and flush an inline copy on `copy_queue`.
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
        if !resource.ty.is_buffer() {
            return Err(DeviceError::InvalidArgument(
                "set_buffer_data target is not a buffer",
            ));
        }
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
                let staging = self.pools.allocate(
                    data.len() as u64,
                    sbt::VideoMemoryUsage::VertexBuffer,
                    sbt::VideoMemoryType::HostVisible,
                )?;
                let staging_resource = self.create_resource(
                    &staging,
                    data.len() as u64,
                    1,
                    1,
                    sbt::ResourceType::VertexBuffer,
                )?;
                {
                    let mapped = staging_resource.mapped.ok_or(
                        DeviceError::InvalidArgument("upload resource is not mapped"),
                    )?;
                    unsafe {
                        std::ptr::copy_nonoverlapping(data.as_ptr(), mapped, data.len())
                    };
                }

                let mut encoder = self.create_command_encoder(copy_queue.kind())?;
                encoder.begin()?;
                unsafe {
                    encoder.list.CopyBufferRegion(
                        resource.raw.as_mut_ptr(),
                        offset,
                        staging_resource.raw.as_mut_ptr(),
                        0,
                        data.len() as u64,
                    );
                }
                let list = encoder.end()?;
                copy_queue.execute(&[list]);
                let value = copy_queue.bump_and_signal()?;
                if !copy_queue.wait(value, FENCE_WAIT_TIMEOUT_MS)? {
                    return Err(DeviceError::Lost);
                }
                drop(staging_resource);
                Ok(())
            }
        }
    }

    /// Serialize the merged root parameters and build the graphics PSO.
    ///
    /// `parameters` and `vertex_layout` come precomputed from the
    /// asynchronous pipeline builder's fan-out stages.
    pub fn create_pipeline_state(
        &self,
        vertex: &ShaderLibrary,
        pixel: &ShaderLibrary,
        topology: sbt::PrimitiveTopology,
        parameters: &[RootParameter],
        vertex_layout: &layout::VertexInputLayout,
    ) -> Result<PipelineState, PipelineError> {
        let root_signature = self
            .create_root_signature(parameters)
            .map_err(PipelineError::Device)?;

        // Semantic-name strings must outlive the PSO creation call.
        let semantic_names: Vec<CString> = vertex_layout
            .elements
            .iter()
            .map(|element| CString::new(element.semantic_name.as_str()).unwrap())
            .collect();
        let input_elements: Vec<d3d12::D3D12_INPUT_ELEMENT_DESC> = vertex_layout
            .elements
            .iter()
            .zip(semantic_names.iter())
            .map(|(element, name)| d3d12::D3D12_INPUT_ELEMENT_DESC {
                SemanticName: name.as_ptr(),
                SemanticIndex: element.semantic_index,
                Format: element.format.dxgi_format(),
                InputSlot: 0,
                AlignedByteOffset: element.aligned_byte_offset,
                InputSlotClass: d3d12::D3D12_INPUT_CLASSIFICATION_PER_VERTEX_DATA,
                InstanceDataStepRate: 0,
            })
            .collect();

        let mut desc = unsafe { std::mem::zeroed::<d3d12::D3D12_GRAPHICS_PIPELINE_STATE_DESC>() };
        desc.pRootSignature = root_signature.as_mut_ptr();
        desc.VS = d3d12::D3D12_SHADER_BYTECODE {
            pShaderBytecode: vertex.dxil.as_ptr() as *const _,
            BytecodeLength: vertex.dxil.len(),
        };
        desc.PS = d3d12::D3D12_SHADER_BYTECODE {
            pShaderBytecode: pixel.dxil.as_ptr() as *const _,
            BytecodeLength: pixel.dxil.len(),
        };
        desc.BlendState.AlphaToCoverageEnable = 0;
        desc.BlendState.IndependentBlendEnable = 0;
        desc.BlendState.RenderTarget[0] = d3d12::D3D12_RENDER_TARGET_BLEND_DESC {
            BlendEnable: 0,
            LogicOpEnable: 0,
            SrcBlend: d3d12::D3D12_BLEND_ONE,
            DestBlend: d3d12::D3D12_BLEND_ZERO,
            BlendOp: d3d12::D3D12_BLEND_OP_ADD,
            SrcBlendAlpha: d3d12::D3D12_BLEND_ONE,
            DestBlendAlpha: d3d12::D3D12_BLEND_ZERO,
            BlendOpAlpha: d3d12::D3D12_BLEND_OP_ADD,
            LogicOp: d3d12::D3D12_LOGIC_OP_NOOP,
            RenderTargetWriteMask: d3d12::D3D12_COLOR_WRITE_ENABLE_ALL as u8,
        };
        desc.SampleMask = !0;
        desc.RasterizerState = d3d12::D3D12_RASTERIZER_DESC {
            FillMode: d3d12::D3D12_FILL_MODE_SOLID,
            CullMode: d3d12::D3D12_CULL_MODE_NONE,
            FrontCounterClockwise: 1,
            DepthBias: 0,
            DepthBiasClamp: 0.0,
            SlopeScaledDepthBias: 0.0,
            DepthClipEnable: 1,
            MultisampleEnable: 0,
            AntialiasedLineEnable: 0,
            ForcedSampleCount: 0,
            ConservativeRaster: d3d12::D3D12_CONSERVATIVE_RASTERIZATION_MODE_OFF,
        };
        desc.InputLayout = d3d12::D3D12_INPUT_LAYOUT_DESC {
            pInputElementDescs: if input_elements.is_empty() {
                std::ptr::null()
            } else {
                input_elements.as_ptr()
            },
            NumElements: input_elements.len() as u32,
        };
        desc.PrimitiveTopologyType = conv::map_topology_type(topology);
        desc.NumRenderTargets = 1;
        desc.RTVFormats[0] = dxgiformat::DXGI_FORMAT_B8G8R8A8_UNORM;
        desc.SampleDesc = dxgitype::DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        };

        let mut raw = native::PipelineState::null();
        profiling::scope!("CreateGraphicsPipelineState");
        let hr = unsafe {
            self.shared.raw.CreateGraphicsPipelineState(
                &desc,
                &d3d12::ID3D12PipelineState::uuidof(),
                raw.mut_void(),
            )
        };
        if let Err(err) = hr.into_result() {
            unsafe { root_signature.destroy() };
            log::error!("graphics PSO creation failed: {err}");
            return Err(PipelineError::Device(DeviceError::Lost));
        }

        Ok(PipelineState {
            root_signature,
            raw,
            vertex_layout: vertex_layout.clone(),
            topology: conv::map_topology(topology),
        })
    }

    fn create_root_signature(
        &self,
        parameters: &[RootParameter],
    ) -> Result<native::RootSignature, DeviceError> {
        fn visibility(v: Visibility) -> d3d12::D3D12_SHADER_VISIBILITY {
            match v {
                Visibility::All => d3d12::D3D12_SHADER_VISIBILITY_ALL,
                Visibility::Stage(sbt::ShaderStage::Vertex) => {
                    d3d12::D3D12_SHADER_VISIBILITY_VERTEX
                }
                Visibility::Stage(sbt::ShaderStage::Pixel) => d3d12::D3D12_SHADER_VISIBILITY_PIXEL,
                Visibility::Stage(sbt::ShaderStage::Geometry) => {
                    d3d12::D3D12_SHADER_VISIBILITY_GEOMETRY
                }
                Visibility::Stage(_) => d3d12::D3D12_SHADER_VISIBILITY_ALL,
            }
        }

        // Ranges live beside the parameters; both must survive until the
        // serialize call below.
        let mut ranges: Vec<Box<d3d12::D3D12_DESCRIPTOR_RANGE>> = Vec::new();
        let mut raw_parameters: Vec<d3d12::D3D12_ROOT_PARAMETER> = Vec::new();

        for parameter in parameters {
            let mut raw = unsafe { std::mem::zeroed::<d3d12::D3D12_ROOT_PARAMETER>() };
            match *parameter {
                RootParameter::Constants {
                    bind_point,
                    space,
                    size_dwords,
                    visibility: vis,
                } => {
                    raw.ParameterType = d3d12::D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS;
                    raw.ShaderVisibility = visibility(vis);
                    unsafe {
                        *raw.u.Constants_mut() = d3d12::D3D12_ROOT_CONSTANTS {
                            ShaderRegister: bind_point,
                            RegisterSpace: space,
                            Num32BitValues: size_dwords,
                        };
                    }
                }
                RootParameter::CbvTable {
                    bind_point,
                    space,
                    count,
                    visibility: vis,
                }
                | RootParameter::SrvTable {
                    bind_point,
                    space,
                    count,
                    visibility: vis,
                }
                | RootParameter::SamplerTable {
                    bind_point,
                    space,
                    count,
                    visibility: vis,
                } => {
                    let range_type = match parameter {
                        RootParameter::CbvTable { .. } => d3d12::D3D12_DESCRIPTOR_RANGE_TYPE_CBV,
                        RootParameter::SamplerTable { .. } => {
                            d3d12::D3D12_DESCRIPTOR_RANGE_TYPE_SAMPLER
                        }
                        _ => d3d12::D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
                    };
                    ranges.push(Box::new(d3d12::D3D12_DESCRIPTOR_RANGE {
                        RangeType: range_type,
                        NumDescriptors: count,
                        BaseShaderRegister: bind_point,
                        RegisterSpace: space,
                        OffsetInDescriptorsFromTableStart:
                            d3d12::D3D12_DESCRIPTOR_RANGE_OFFSET_APPEND,
                    }));
                    raw.ParameterType = d3d12::D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE;
                    raw.ShaderVisibility = visibility(vis);
                    unsafe {
                        *raw.u.DescriptorTable_mut() = d3d12::D3D12_ROOT_DESCRIPTOR_TABLE {
                            NumDescriptorRanges: 1,
                            pDescriptorRanges: &**ranges.last().unwrap(),
                        };
                    }
                }
            }
            raw_parameters.push(raw);
        }

        let desc = d3d12::D3D12_ROOT_SIGNATURE_DESC {
            NumParameters: raw_parameters.len() as u32,
            pParameters: if raw_parameters.is_empty() {
                std::ptr::null()
            } else {
                raw_parameters.as_ptr()
            },
            NumStaticSamplers: 0,
            pStaticSamplers: std::ptr::null(),
            Flags: d3d12::D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
        };

        let mut blob = native::Blob::null();
        let mut error = native::Blob::null();
        let hr = unsafe {
            d3d12::D3D12SerializeRootSignature(
                &desc,
                d3d12::D3D_ROOT_SIGNATURE_VERSION_1,
                blob.mut_void() as *mut *mut _,
                error.mut_void() as *mut *mut _,
            )
        };
        if !winerror::SUCCEEDED(hr) {
            let message = if error.is_null() {
                "no serializer diagnostics".to_string()
            } else {
                unsafe {
                    let slice = std::slice::from_raw_parts(
                        error.GetBufferPointer() as *const u8,
                        error.GetBufferSize(),
                    );
                    String::from_utf8_lossy(slice).into_owned()
                }
            };
            if !error.is_null() {
                unsafe { error.destroy() };
            }
            log::error!("root signature serialization failed: {message}");
            return Err(DeviceError::InvalidArgument("root signature serialization"));
        }
        if !error.is_null() {
            unsafe { error.destroy() };
        }

        let mut root_signature = native::RootSignature::null();
        let hr = unsafe {
            self.shared.raw.CreateRootSignature(
                0,
                blob.GetBufferPointer(),
                blob.GetBufferSize(),
                &d3d12::ID3D12RootSignature::uuidof(),
                root_signature.mut_void(),
            )
        };
        unsafe { blob.destroy() };
        hr.into_device_result("CreateRootSignature")?;
        Ok(root_signature)
    }

    pub(super) fn create_rtv(
        &self,
        resource: native::Resource,
        format: dxgiformat::DXGI_FORMAT,
    ) -> Result<d3d12::D3D12_CPU_DESCRIPTOR_HANDLE, DeviceError> {
        let handle = self.rtv_pool.lock().alloc_handle()?;
        let mut desc = unsafe { std::mem::zeroed::<d3d12::D3D12_RENDER_TARGET_VIEW_DESC>() };
        desc.Format = format;
        desc.ViewDimension = d3d12::D3D12_RTV_DIMENSION_TEXTURE2D;
        unsafe {
            self.shared
                .raw
                .CreateRenderTargetView(resource.as_mut_ptr(), &desc, handle.raw);
        }
        self.rtv_lookup.lock().push(handle);
        Ok(handle.raw)
    }

    pub(super) fn free_rtv(&self, raw: d3d12::D3D12_CPU_DESCRIPTOR_HANDLE) {
        let mut lookup = self.rtv_lookup.lock();
        if let Some(position) = lookup.iter().position(|handle| handle.raw.ptr == raw.ptr) {
            let handle = lookup.swap_remove(position);
            self.rtv_pool.lock().free_handle(handle);
        }
    }

    /// Block until `queue` drains.
    pub fn wait_idle(&self, queue: &Queue) -> Result<(), DeviceError> {
        queue.flush()
    }
}

impl Queue {
    /// The kind of commands this queue accepts.
    pub fn kind(&self) -> sbt::CommandObjectType {
        self.kind
    }

    /// Execute closed lists in one batch.
    pub fn execute(&self, lists: &[CommandBuffer]) {
        profiling::scope!("ExecuteCommandLists");
        let raw: Vec<*mut d3d12::ID3D12CommandList> = lists
            .iter()
            .map(|list| list.raw.as_mut_ptr() as *mut d3d12::ID3D12CommandList)
            .collect();
        unsafe {
            self.raw
                .ExecuteCommandLists(raw.len() as u32, raw.as_ptr())
        };
    }

    /// Signal `value` on the queue's fence.
    pub fn signal(&self, value: crate::FenceValue) -> Result<(), DeviceError> {
        let hr = unsafe { self.raw.Signal(self.fence.as_mut_ptr() as *mut _, value) };
        hr.into_device_result("Signal")?;
        *self.last_signaled.lock() = value;
        Ok(())
    }

    /// Signal the next value after the last one and return it.
    pub fn bump_and_signal(&self) -> Result<crate::FenceValue, DeviceError> {
        let value = {
            let mut last = self.last_signaled.lock();
            *last += 1;
            *last
        };
        let hr = unsafe { self.raw.Signal(self.fence.as_mut_ptr() as *mut _, value) };
        hr.into_device_result("Signal")?;
        Ok(value)
    }

    /// Latest fence value the GPU has completed.
    pub fn completed_value(&self) -> crate::FenceValue {
        unsafe { self.fence.GetCompletedValue() }
    }

    pub(super) fn arm_event(&self, value: crate::FenceValue) -> Result<(), DeviceError> {
        let hr = self.fence.set_event_on_completion(self.event, value);
        hr.into_device_result("SetEventOnCompletion")
    }

    /// Block the CPU until `value` completes or `timeout_ms` expires.
    /// Returns `false` on timeout.
    pub fn wait(&self, value: crate::FenceValue, timeout_ms: u32) -> Result<bool, DeviceError> {
        if value == 0 || self.completed_value() >= value {
            return Ok(true);
        }
        self.arm_event(value)?;
        match unsafe { synchapi::WaitForSingleObject(self.event.0, timeout_ms) } {
            winbase::WAIT_OBJECT_0 => Ok(true),
            winerror::WAIT_TIMEOUT => Ok(false),
            _ => {
                self.device.mark_lost();
                Err(DeviceError::Lost)
            }
        }
    }

    /// Signal a fresh value and wait for it, draining the queue.
    pub fn flush(&self) -> Result<(), DeviceError> {
        let value = self.bump_and_signal()?;
        if !self.wait(value, FENCE_WAIT_TIMEOUT_MS)? {
            return Err(DeviceError::Lost);
        }
        Ok(())
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        let _ = self.flush();
        unsafe {
            self.fence.destroy();
            winapi::um::handleapi::CloseHandle(self.event.0);
            self.raw.destroy();
        }
    }
}

struct HeapPoolInner {
    entries: PoolEntries,
    heaps: Vec<native::WeakPtr<d3d12::ID3D12Heap>>,
}

/// One category's pool of `ID3D12Heap` blocks.
pub struct MemoryPool {
    device: Arc<DeviceShared>,
    layout: BlockPool,
    category: sbt::PoolCategory,
    heap_type: d3d12::D3D12_HEAP_TYPE,
    heap_flags: d3d12::D3D12_HEAP_FLAGS,
    inner: Mutex<HeapPoolInner>,
}

unsafe impl Send for MemoryPool {}
unsafe impl Sync for MemoryPool {}

fn category_heap(category: sbt::PoolCategory) -> (d3d12::D3D12_HEAP_TYPE, d3d12::D3D12_HEAP_FLAGS) {
    use sbt::PoolCategory as C;
    match category {
        C::Upload => (
            d3d12::D3D12_HEAP_TYPE_UPLOAD,
            d3d12::D3D12_HEAP_FLAG_ALLOW_ONLY_BUFFERS,
        ),
        C::ReadBack => (
            d3d12::D3D12_HEAP_TYPE_READBACK,
            d3d12::D3D12_HEAP_FLAG_ALLOW_ONLY_BUFFERS,
        ),
        C::SmallBuffer | C::MediumBuffer | C::LargeBuffer | C::Custom => (
            d3d12::D3D12_HEAP_TYPE_DEFAULT,
            d3d12::D3D12_HEAP_FLAG_ALLOW_ONLY_BUFFERS,
        ),
        C::SmallTexture | C::MediumTexture | C::LargeTexture => (
            d3d12::D3D12_HEAP_TYPE_DEFAULT,
            d3d12::D3D12_HEAP_FLAG_ALLOW_ONLY_NON_RT_DS_TEXTURES,
        ),
        C::RenderTarget | C::DepthStencil => (
            d3d12::D3D12_HEAP_TYPE_DEFAULT,
            d3d12::D3D12_HEAP_FLAG_ALLOW_ONLY_RT_DS_TEXTURES,
        ),
    }
}

impl MemoryPool {
    fn new(device: Arc<DeviceShared>, category: sbt::PoolCategory) -> Arc<Self> {
        let (heap_type, heap_flags) = category_heap(category);
        Arc::new(Self {
            device,
            layout: BlockPool::new(
                category,
                d3d12::D3D12_DEFAULT_RESOURCE_PLACEMENT_ALIGNMENT as u64,
            ),
            category,
            heap_type,
            heap_flags,
            inner: Mutex::new(HeapPoolInner {
                entries: PoolEntries::new(),
                heaps: Vec::new(),
            }),
        })
    }

    fn allocate(
        self: &Arc<Self>,
        size: u64,
        usage: sbt::VideoMemoryUsage,
        memory_type: sbt::VideoMemoryType,
    ) -> Result<VideoMemory, DeviceError> {
        let alignment = d3d12::D3D12_DEFAULT_RESOURCE_PLACEMENT_ALIGNMENT as u64;
        let mut inner = self.inner.lock();
        let chunk: HeapChunk = loop {
            match self.layout.try_allocate(&mut inner.entries, size, alignment)? {
                Placement::Existing(chunk) => break chunk,
                Placement::NeedsHeap(heap_size) => {
                    let heap = self.create_heap(heap_size)?;
                    inner.heaps.push(heap);
                    let index = inner.entries.add_heap(heap_size);
                    debug_assert_eq!(index, inner.heaps.len() - 1);
                }
            }
        };
        let heap = inner.heaps[chunk.heap];
        drop(inner);

        Ok(VideoMemory {
            pool: Arc::clone(self),
            chunk,
            heap,
            size,
            usage,
            memory_type,
            binding: BindingGuard::new(),
        })
    }

    pub(super) fn free(&self, chunk: HeapChunk) {
        let mut inner = self.inner.lock();
        self.layout.free(&mut inner.entries, chunk);
    }

    fn create_heap(
        &self,
        size: u64,
    ) -> Result<native::WeakPtr<d3d12::ID3D12Heap>, DeviceError> {
        profiling::scope!("CreateHeap");
        let desc = d3d12::D3D12_HEAP_DESC {
            SizeInBytes: size,
            Properties: d3d12::D3D12_HEAP_PROPERTIES {
                Type: self.heap_type,
                CPUPageProperty: d3d12::D3D12_CPU_PAGE_PROPERTY_UNKNOWN,
                MemoryPoolPreference: d3d12::D3D12_MEMORY_POOL_UNKNOWN,
                CreationNodeMask: 0,
                VisibleNodeMask: 0,
            },
            Alignment: d3d12::D3D12_DEFAULT_RESOURCE_PLACEMENT_ALIGNMENT as u64,
            Flags: self.heap_flags,
        };
        let mut heap = native::WeakPtr::<d3d12::ID3D12Heap>::null();
        let hr = unsafe {
            self.device
                .raw
                .CreateHeap(&desc, &d3d12::ID3D12Heap::uuidof(), heap.mut_void())
        };
        hr.into_device_result("CreateHeap")?;
        log::debug!("created a {} MiB {:?} heap", size >> 20, self.category);
        Ok(heap)
    }
}

impl Drop for MemoryPool {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        debug_assert!(
            inner.entries.is_idle(),
            "memory pool dropped with live allocations"
        );
        for heap in inner.heaps.drain(..) {
            unsafe { heap.destroy() };
        }
    }
}

/// The per-device collection of category pools, created lazily.
pub(super) struct MemoryPools {
    device: Arc<DeviceShared>,
    pools: Mutex<crate::FastHashMap<sbt::PoolCategory, Arc<MemoryPool>>>,
}

impl MemoryPools {
    pub(super) fn new(device: Arc<DeviceShared>) -> Self {
        Self {
            device,
            pools: Mutex::new(Default::default()),
        }
    }

    fn pool(&self, category: sbt::PoolCategory) -> Arc<MemoryPool> {
        let mut pools = self.pools.lock();
        if let Some(pool) = pools.get(&category) {
            return Arc::clone(pool);
        }
        let pool = MemoryPool::new(Arc::clone(&self.device), category);
        pools.insert(category, Arc::clone(&pool));
        pool
    }

    fn allocate(
        &self,
        size: u64,
        usage: sbt::VideoMemoryUsage,
        memory_type: sbt::VideoMemoryType,
    ) -> Result<VideoMemory, DeviceError> {
        if size == 0 {
            return Err(DeviceError::InvalidArgument("zero-byte video memory"));
        }
        let category = crate::pool::select_category(usage, memory_type, size);
        self.pool(category).allocate(size, usage, memory_type)
    }
}

fn utf8(source: &[u8]) -> Result<&str, PipelineError> {
    std::str::from_utf8(source).map_err(|_| {
        PipelineError::Shader(ShaderError::Compilation(
            "shader source is not valid UTF-8".to_string(),
        ))
    })
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
