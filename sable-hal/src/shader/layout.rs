//! Vertex-input-layout derivation and root-parameter synthesis.
//!
//! Both run over reflection data so every backend sees the same contract:
//! the D3D12 backend turns [`RootParameter`]s into a root signature, the
//! Vulkan backend turns the same list into descriptor-set layouts and a
//! push-constant range.

use spirv_cross::{hlsl, spirv, ErrorCode as SpirvErrorCode};

use crate::ShaderError;

use super::{BindingType, ResourceBinding, ShaderReflection, Visibility};

/// Element formats a vertex input can reflect to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexAttributeFormat {
    /// One 32-bit float.
    R32Float,
    /// Two 32-bit floats.
    Rg32Float,
    /// Three 32-bit floats.
    Rgb32Float,
    /// Four 32-bit floats.
    Rgba32Float,
    /// One 32-bit signed integer.
    R32Sint,
    /// Two 32-bit signed integers.
    Rg32Sint,
    /// Three 32-bit signed integers.
    Rgb32Sint,
    /// Four 32-bit signed integers.
    Rgba32Sint,
    /// One 32-bit unsigned integer.
    R32Uint,
    /// Two 32-bit unsigned integers.
    Rg32Uint,
    /// Three 32-bit unsigned integers.
    Rgb32Uint,
    /// Four 32-bit unsigned integers.
    Rgba32Uint,
}

impl VertexAttributeFormat {
    /// Size of one element in bytes.
    pub const fn byte_size(self) -> u32 {
        match self {
            Self::R32Float | Self::R32Sint | Self::R32Uint => 4,
            Self::Rg32Float | Self::Rg32Sint | Self::Rg32Uint => 8,
            Self::Rgb32Float | Self::Rgb32Sint | Self::Rgb32Uint => 12,
            Self::Rgba32Float | Self::Rgba32Sint | Self::Rgba32Uint => 16,
        }
    }

    /// Number of components.
    pub const fn component_count(self) -> u32 {
        self.byte_size() / 4
    }

    /// The matching `DXGI_FORMAT` value.
    pub const fn dxgi_format(self) -> u32 {
        match self {
            Self::Rgba32Float => 2,
            Self::Rgba32Uint => 3,
            Self::Rgba32Sint => 4,
            Self::Rgb32Float => 6,
            Self::Rgb32Uint => 7,
            Self::Rgb32Sint => 8,
            Self::Rg32Float => 16,
            Self::Rg32Uint => 17,
            Self::Rg32Sint => 18,
            Self::R32Float => 41,
            Self::R32Uint => 42,
            Self::R32Sint => 43,
        }
    }
}

/// One element of a derived vertex input layout.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexInputElement {
    /// HLSL semantic name; `TEXCOORD` unless the input is decorated.
    pub semantic_name: String,
    /// HLSL semantic index, taken from the `location` decoration.
    pub semantic_index: u32,
    /// Element format.
    pub format: VertexAttributeFormat,
    /// Accumulated, element-aligned byte offset inside the vertex.
    pub aligned_byte_offset: u32,
}

/// Vertex input layout reflected from a vertex-stage module.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VertexInputLayout {
    /// Elements in location order.
    pub elements: Vec<VertexInputElement>,
    /// Total vertex stride in bytes.
    pub stride: u32,
}

fn query_error(err: SpirvErrorCode) -> ShaderError {
    ShaderError::Reflection(match err {
        SpirvErrorCode::CompilationError(msg) => msg,
        SpirvErrorCode::Unhandled => "unhandled SPIRV-Cross query error".to_string(),
    })
}

/// Derive the vertex input layout from a vertex-shader SPIR-V module.
pub fn derive_vertex_inputs(words: &[u32]) -> Result<VertexInputLayout, ShaderError> {
    let module = spirv::Module::from_words(words);
    let mut ast = spirv::Ast::<hlsl::Target>::parse(&module).map_err(query_error)?;
    let resources = ast.get_shader_resources().map_err(query_error)?;

    let mut inputs = Vec::with_capacity(resources.stage_inputs.len());
    for input in &resources.stage_inputs {
        let location = ast
            .get_decoration(input.id, spirv::Decoration::Location)
            .map_err(query_error)?;
        let format = attribute_format(&ast.get_type(input.type_id).map_err(query_error)?)?;
        inputs.push((location, format));
    }
    inputs.sort_unstable_by_key(|&(location, _)| location);

    let mut layout = VertexInputLayout::default();
    for (location, format) in inputs {
        let offset = align_offset(layout.stride, format);
        layout.elements.push(VertexInputElement {
            semantic_name: "TEXCOORD".to_string(),
            semantic_index: location,
            format,
            aligned_byte_offset: offset,
        });
        layout.stride = offset + format.byte_size();
    }
    Ok(layout)
}

fn align_offset(offset: u32, format: VertexAttributeFormat) -> u32 {
    // Elements align on their component size (4 bytes for every 32-bit
    // format here).
    let alignment = (format.byte_size() / format.component_count()).max(1);
    (offset + alignment - 1) & !(alignment - 1)
}

fn attribute_format(ty: &spirv::Type) -> Result<VertexAttributeFormat, ShaderError> {
    use VertexAttributeFormat as F;
    let (base, vecsize) = match *ty {
        spirv::Type::Float { vecsize, .. } => ('f', vecsize),
        spirv::Type::Int { vecsize, .. } => ('i', vecsize),
        spirv::Type::UInt { vecsize, .. } => ('u', vecsize),
        ref other => {
            return Err(ShaderError::Reflection(format!(
                "unsupported vertex input type {other:?}"
            )))
        }
    };
    Ok(match (base, vecsize) {
        ('f', 1) => F::R32Float,
        ('f', 2) => F::Rg32Float,
        ('f', 3) => F::Rgb32Float,
        ('f', 4) => F::Rgba32Float,
        ('i', 1) => F::R32Sint,
        ('i', 2) => F::Rg32Sint,
        ('i', 3) => F::Rgb32Sint,
        ('i', 4) => F::Rgba32Sint,
        ('u', 1) => F::R32Uint,
        ('u', 2) => F::Rg32Uint,
        ('u', 3) => F::Rgb32Uint,
        ('u', 4) => F::Rgba32Uint,
        _ => {
            return Err(ShaderError::Reflection(format!(
                "unsupported vertex input vector size {vecsize}"
            )))
        }
    })
}

/// One synthesized root parameter / descriptor-set-layout entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RootParameter {
    /// Inline root constants from a push-constant block.
    Constants {
        /// Register / binding slot.
        bind_point: u32,
        /// Register space / descriptor set.
        space: u32,
        /// Size in 32-bit values.
        size_dwords: u32,
        /// Stage visibility.
        visibility: Visibility,
    },
    /// One-descriptor CBV table.
    CbvTable {
        /// Register / binding slot.
        bind_point: u32,
        /// Register space / descriptor set.
        space: u32,
        /// Descriptor count.
        count: u32,
        /// Stage visibility.
        visibility: Visibility,
    },
    /// One-descriptor SRV table.
    SrvTable {
        /// Register / binding slot.
        bind_point: u32,
        /// Register space / descriptor set.
        space: u32,
        /// Descriptor count.
        count: u32,
        /// Stage visibility.
        visibility: Visibility,
    },
    /// Sampler table.
    SamplerTable {
        /// Register / binding slot.
        bind_point: u32,
        /// Register space / descriptor set.
        space: u32,
        /// Descriptor count.
        count: u32,
        /// Stage visibility.
        visibility: Visibility,
    },
}

/// Synthesize root parameters from one stage's reflection.
///
/// Push constants become root constants; uniform buffers, sampled images
/// and separate samplers become single-descriptor tables; visibility is the
/// reflecting stage.
pub fn synthesize_root_parameters(reflection: &ShaderReflection) -> Vec<RootParameter> {
    let visibility = Visibility::Stage(reflection.stage);
    let mut parameters = Vec::new();

    if let Some(push) = reflection.push_constants {
        parameters.push(RootParameter::Constants {
            bind_point: push.bind_point,
            space: push.space,
            size_dwords: push.size_dwords,
            visibility: Visibility::All,
        });
    }

    for binding in &reflection.resources {
        let parameter = match binding.ty {
            BindingType::Cbv => RootParameter::CbvTable {
                bind_point: binding.bind_point,
                space: binding.space,
                count: binding.bind_count,
                visibility,
            },
            BindingType::Texture | BindingType::Srv => RootParameter::SrvTable {
                bind_point: binding.bind_point,
                space: binding.space,
                count: binding.bind_count,
                visibility,
            },
            BindingType::Sampler => RootParameter::SamplerTable {
                bind_point: binding.bind_point,
                space: binding.space,
                count: binding.bind_count,
                visibility,
            },
            // Writable resources become UAV-style SRV tables on this path;
            // the graphics pipelines built here do not bind them.
            BindingType::Uav | BindingType::StructuredBuffer | BindingType::ByteAddressBuffer => {
                RootParameter::SrvTable {
                    bind_point: binding.bind_point,
                    space: binding.space,
                    count: binding.bind_count,
                    visibility,
                }
            }
        };
        parameters.push(parameter);
    }

    parameters
}

/// Merge root parameters of several stages, deduplicating identical slots
/// and widening visibility where stages share a binding.
pub fn merge_root_parameters(stages: &[Vec<RootParameter>]) -> Vec<RootParameter> {
    let mut merged: Vec<RootParameter> = Vec::new();
    for parameter in stages.iter().flatten() {
        if let Some(existing) = merged.iter_mut().find(|p| same_slot(p, parameter)) {
            widen(existing, parameter);
        } else {
            merged.push(parameter.clone());
        }
    }
    merged
}

fn same_slot(a: &RootParameter, b: &RootParameter) -> bool {
    use RootParameter as P;
    match (a, b) {
        (
            P::Constants {
                bind_point: ap,
                space: asp,
                ..
            },
            P::Constants {
                bind_point: bp,
                space: bsp,
                ..
            },
        )
        | (
            P::CbvTable {
                bind_point: ap,
                space: asp,
                ..
            },
            P::CbvTable {
                bind_point: bp,
                space: bsp,
                ..
            },
        )
        | (
            P::SrvTable {
                bind_point: ap,
                space: asp,
                ..
            },
            P::SrvTable {
                bind_point: bp,
                space: bsp,
                ..
            },
        )
        | (
            P::SamplerTable {
                bind_point: ap,
                space: asp,
                ..
            },
            P::SamplerTable {
                bind_point: bp,
                space: bsp,
                ..
            },
        ) => ap == bp && asp == bsp,
        _ => false,
    }
}

fn widen(existing: &mut RootParameter, other: &RootParameter) {
    use RootParameter as P;
    let (P::Constants { visibility, .. }
    | P::CbvTable { visibility, .. }
    | P::SrvTable { visibility, .. }
    | P::SamplerTable { visibility, .. }) = existing;
    let other_visibility = match other {
        P::Constants { visibility, .. }
        | P::CbvTable { visibility, .. }
        | P::SrvTable { visibility, .. }
        | P::SamplerTable { visibility, .. } => *visibility,
    };
    *visibility = visibility.union(other_visibility);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shader::PushConstantRange;

    fn binding(ty: BindingType, bind_point: u32) -> ResourceBinding {
        ResourceBinding {
            name: format!("binding{bind_point}"),
            bind_point,
            space: 0,
            bind_count: 1,
            ty,
            is_writable: false,
            visibility: Visibility::Stage(sbt::ShaderStage::Vertex),
        }
    }

    fn reflection(
        stage: sbt::ShaderStage,
        resources: Vec<ResourceBinding>,
        push_constants: Option<PushConstantRange>,
    ) -> ShaderReflection {
        let mut reflection = ShaderReflection {
            entry_point: "main".to_string(),
            stage,
            resources,
            push_constants,
            bindings: Default::default(),
        };
        reflection.index_bindings();
        reflection
    }

    #[test]
    fn dxgi_values_are_stable() {
        assert_eq!(VertexAttributeFormat::Rg32Float.dxgi_format(), 16);
        assert_eq!(VertexAttributeFormat::Rgb32Float.dxgi_format(), 6);
        assert_eq!(VertexAttributeFormat::Rgba32Float.dxgi_format(), 2);
        assert_eq!(VertexAttributeFormat::R32Uint.dxgi_format(), 42);
    }

    #[test]
    fn ubo_becomes_one_cbv_table() {
        let reflection = reflection(
            sbt::ShaderStage::Vertex,
            vec![binding(BindingType::Cbv, 0)],
            None,
        );
        let parameters = synthesize_root_parameters(&reflection);
        assert_eq!(
            parameters,
            vec![RootParameter::CbvTable {
                bind_point: 0,
                space: 0,
                count: 1,
                visibility: Visibility::Stage(sbt::ShaderStage::Vertex),
            }]
        );
    }

    #[test]
    fn push_constants_lead_the_parameter_list() {
        let reflection = reflection(
            sbt::ShaderStage::Vertex,
            vec![binding(BindingType::Texture, 1)],
            Some(PushConstantRange {
                bind_point: 0,
                space: 0,
                size_dwords: 4,
            }),
        );
        let parameters = synthesize_root_parameters(&reflection);
        assert!(matches!(
            parameters[0],
            RootParameter::Constants {
                size_dwords: 4,
                visibility: Visibility::All,
                ..
            }
        ));
        assert!(matches!(parameters[1], RootParameter::SrvTable { .. }));
    }

    #[test]
    fn merge_widens_shared_slots() {
        let vs = reflection(
            sbt::ShaderStage::Vertex,
            vec![binding(BindingType::Cbv, 0)],
            None,
        );
        let mut ps_binding = binding(BindingType::Cbv, 0);
        ps_binding.visibility = Visibility::Stage(sbt::ShaderStage::Pixel);
        let ps = reflection(sbt::ShaderStage::Pixel, vec![ps_binding], None);

        let merged = merge_root_parameters(&[
            synthesize_root_parameters(&vs),
            synthesize_root_parameters(&ps),
        ]);
        assert_eq!(merged.len(), 1);
        assert!(matches!(
            merged[0],
            RootParameter::CbvTable {
                visibility: Visibility::All,
                ..
            }
        ));
    }

    #[test]
    fn distinct_slots_survive_merge() {
        let vs = reflection(
            sbt::ShaderStage::Vertex,
            vec![binding(BindingType::Cbv, 0)],
            None,
        );
        let mut sampler = binding(BindingType::Sampler, 0);
        sampler.visibility = Visibility::Stage(sbt::ShaderStage::Pixel);
        let mut texture = binding(BindingType::Texture, 1);
        texture.visibility = Visibility::Stage(sbt::ShaderStage::Pixel);
        let ps = reflection(sbt::ShaderStage::Pixel, vec![texture, sampler], None);

        let merged = merge_root_parameters(&[
            synthesize_root_parameters(&vs),
            synthesize_root_parameters(&ps),
        ]);
        assert_eq!(merged.len(), 3);
    }
}
