//! GLSL (and HLSL) front-end: source text to SPIR-V through shaderc.
//!
//! Targets SPIR-V 1.5 under a Vulkan 1.3 environment. Debug compiles keep
//! full debug info with the optimizer off; release compiles strip debug
//! info and optimize for size.

use crate::ShaderError;

use super::{CompileOptions, ShaderRuntime};

/// Resource limits applied to every front-end compile.
///
/// shaderc's defaults already match the reference limit table; the entries
/// below are the ones the engine raises above the defaults.
const LIMIT_OVERRIDES: &[(shaderc::Limit, i32)] = &[
    (shaderc::Limit::MaxDrawBuffers, 32),
    (shaderc::Limit::MaxCombinedShaderOutputResources, 8),
];

/// Compile GLSL or HLSL source text into SPIR-V words.
pub fn compile_to_spirv(
    source: &str,
    language: sbt::ShaderLanguage,
    options: &CompileOptions,
) -> Result<Vec<u32>, ShaderError> {
    let runtime = ShaderRuntime::get()?;

    let mut opts = shaderc::CompileOptions::new().ok_or_else(|| {
        ShaderError::Compilation("failed to allocate shaderc compile options".to_string())
    })?;

    opts.set_target_env(
        shaderc::TargetEnv::Vulkan,
        shaderc::EnvVersion::Vulkan1_3 as u32,
    );
    opts.set_target_spirv(shaderc::SpirvVersion::V1_5);
    opts.set_source_language(match language {
        sbt::ShaderLanguage::Glsl => shaderc::SourceLanguage::GLSL,
        sbt::ShaderLanguage::Hlsl => shaderc::SourceLanguage::HLSL,
        _ => {
            return Err(ShaderError::Compilation(
                "front-end accepts only GLSL or HLSL text".to_string(),
            ))
        }
    });

    for &(limit, value) in LIMIT_OVERRIDES {
        opts.set_limit(limit, value);
    }
    for define in &options.defines {
        let value = (!define.value.is_empty()).then_some(define.value.as_str());
        opts.add_macro_definition(&define.name, value);
    }

    if options.debug {
        opts.set_generate_debug_info();
        opts.set_optimization_level(shaderc::OptimizationLevel::Zero);
    } else {
        opts.set_optimization_level(shaderc::OptimizationLevel::Size);
    }

    let kind = shader_kind(options.stage);
    let artifact = runtime.with_glsl_compiler(|compiler| {
        compiler.compile_into_spirv(source, kind, "shader", &options.entry_point, Some(&opts))
    });

    match artifact {
        Ok(artifact) => {
            if artifact.get_num_warnings() != 0 {
                log::warn!(
                    "shader front-end warnings:\n{}",
                    artifact.get_warning_messages()
                );
            }
            Ok(artifact.as_binary().to_vec())
        }
        Err(shaderc::Error::CompilationError(_, message)) => {
            Err(ShaderError::Compilation(message))
        }
        Err(other) => Err(ShaderError::Compilation(other.to_string())),
    }
}

fn shader_kind(stage: sbt::ShaderStage) -> shaderc::ShaderKind {
    use sbt::ShaderStage as S;
    match stage {
        S::Vertex => shaderc::ShaderKind::Vertex,
        S::Pixel => shaderc::ShaderKind::Fragment,
        S::Compute => shaderc::ShaderKind::Compute,
        S::Geometry => shaderc::ShaderKind::Geometry,
        S::Mesh => shaderc::ShaderKind::Mesh,
        S::Amplification => shaderc::ShaderKind::Task,
        S::RayGeneration => shaderc::ShaderKind::RayGeneration,
        S::RayIntersection => shaderc::ShaderKind::Intersection,
        S::RayAnyHit => shaderc::ShaderKind::AnyHit,
        S::RayClosestHit => shaderc::ShaderKind::ClosestHit,
        S::RayMiss => shaderc::ShaderKind::Miss,
        S::RayCallable => shaderc::ShaderKind::Callable,
    }
}
