//! SPIR-V cross-compilation and reflection through SPIRV-Cross.
//!
//! The D3D12 backend consumes GLSL submissions as
//! GLSL → SPIR-V → HLSL → DXIL; the translation here preserves binding
//! decorations so the synthesized root signature matches the reflected
//! slots. Reflection itself is shared by every backend that starts from
//! SPIR-V.

use spirv_cross::{hlsl, spirv, ErrorCode as SpirvErrorCode};

use crate::ShaderError;

use super::{
    BindingType, PushConstantRange, ResourceBinding, ShaderReflection, Visibility,
};

fn query_error(err: SpirvErrorCode) -> ShaderError {
    ShaderError::Reflection(match err {
        SpirvErrorCode::CompilationError(msg) => msg,
        SpirvErrorCode::Unhandled => "unhandled SPIRV-Cross query error".to_string(),
    })
}

fn compile_error(err: SpirvErrorCode) -> ShaderError {
    ShaderError::CrossCompile(match err {
        SpirvErrorCode::CompilationError(msg) => msg,
        SpirvErrorCode::Unhandled => "unhandled SPIRV-Cross compile error".to_string(),
    })
}

/// Cross-compile SPIR-V words to shader-model 6 HLSL text.
pub fn spirv_to_hlsl(words: &[u32], entry_point: &str) -> Result<String, ShaderError> {
    let module = spirv::Module::from_words(words);
    let mut ast = spirv::Ast::<hlsl::Target>::parse(&module).map_err(compile_error)?;

    let mut options = hlsl::CompilerOptions::default();
    options.shader_model = hlsl::ShaderModel::V6_0;
    ast.set_compile_options(options).map_err(compile_error)?;

    let source = ast.compile().map_err(compile_error)?;
    log::trace!("SPIRV-Cross generated HLSL for `{entry_point}`:\n{source}");
    Ok(source)
}

/// Reflect a SPIR-V module into the backend-agnostic [`ShaderReflection`].
pub fn reflect_spirv(
    words: &[u32],
    stage: sbt::ShaderStage,
) -> Result<ShaderReflection, ShaderError> {
    let module = spirv::Module::from_words(words);
    let mut ast = spirv::Ast::<hlsl::Target>::parse(&module).map_err(query_error)?;

    let entry_point = ast
        .get_entry_points()
        .map_err(query_error)?
        .into_iter()
        .next()
        .map(|entry| entry.name)
        .ok_or_else(|| ShaderError::Reflection("module has no entry point".to_string()))?;

    let resources = ast.get_shader_resources().map_err(query_error)?;
    let visibility = Visibility::Stage(stage);

    let mut bindings = Vec::new();
    collect(&mut ast, &resources.uniform_buffers, BindingType::Cbv, false, visibility, &mut bindings)?;
    collect(&mut ast, &resources.storage_buffers, BindingType::StructuredBuffer, true, visibility, &mut bindings)?;
    collect(&mut ast, &resources.separate_images, BindingType::Srv, false, visibility, &mut bindings)?;
    collect(&mut ast, &resources.sampled_images, BindingType::Texture, false, visibility, &mut bindings)?;
    collect(&mut ast, &resources.storage_images, BindingType::Uav, true, visibility, &mut bindings)?;
    collect(&mut ast, &resources.separate_samplers, BindingType::Sampler, false, visibility, &mut bindings)?;

    let push_constants = match resources.push_constant_buffers.first() {
        Some(block) => {
            let size = ast
                .get_declared_struct_size(block.base_type_id)
                .map_err(query_error)?;
            Some(PushConstantRange {
                bind_point: 0,
                space: 0,
                size_dwords: (size + 3) / 4,
            })
        }
        None => None,
    };

    let mut reflection = ShaderReflection {
        entry_point,
        stage,
        resources: bindings,
        push_constants,
        bindings: Default::default(),
    };
    reflection.index_bindings();
    Ok(reflection)
}

fn collect(
    ast: &mut spirv::Ast<hlsl::Target>,
    resources: &[spirv::Resource],
    ty: BindingType,
    is_writable: bool,
    visibility: Visibility,
    out: &mut Vec<ResourceBinding>,
) -> Result<(), ShaderError> {
    for resource in resources {
        let bind_point = ast
            .get_decoration(resource.id, spirv::Decoration::Binding)
            .map_err(query_error)?;
        let space = ast
            .get_decoration(resource.id, spirv::Decoration::DescriptorSet)
            .map_err(query_error)?;
        let bind_count = match ast.get_type(resource.type_id).map_err(query_error)? {
            spirv::Type::Image { array, .. }
            | spirv::Type::SampledImage { array, .. }
            | spirv::Type::Sampler { array, .. }
            | spirv::Type::Struct { array, .. } => array.first().copied().unwrap_or(1).max(1),
            _ => 1,
        };
        out.push(ResourceBinding {
            name: resource.name.clone(),
            bind_point,
            space,
            bind_count,
            ty,
            is_writable,
            visibility,
        });
    }
    Ok(())
}
