//! HLSL → DXIL through DXC.
//!
//! The target profile is derived from the pipeline stage and the requested
//! shader model; ray-tracing stages compile as libraries and require model
//! 6.6, 16-bit types require 6.2.

use crate::ShaderError;

use super::CompileOptions;

/// DXC shader-model target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ShaderModel {
    /// Major version (6 for every DXIL target).
    pub major: u8,
    /// Minor version.
    pub minor: u8,
}

impl ShaderModel {
    /// The baseline DXIL model.
    pub const V6_0: Self = Self { major: 6, minor: 0 };
    /// First model with native 16-bit types.
    pub const V6_2: Self = Self { major: 6, minor: 2 };
    /// First model with mesh and amplification stages.
    pub const V6_5: Self = Self { major: 6, minor: 5 };
    /// First model with full ray-tracing library support used here.
    pub const V6_6: Self = Self { major: 6, minor: 6 };
}

impl Default for ShaderModel {
    fn default() -> Self {
        Self::V6_0
    }
}

/// Derive the DXC target profile string for `stage` at `model`.
///
/// Fails when the stage's floor exceeds `model`.
pub fn target_profile(
    stage: sbt::ShaderStage,
    model: ShaderModel,
) -> Result<String, ShaderError> {
    use sbt::ShaderStage as S;
    let unsupported = || ShaderError::UnsupportedStage {
        stage,
        major: model.major,
        minor: model.minor,
    };

    let prefix = match stage {
        S::Vertex => "vs",
        S::Pixel => "ps",
        S::Compute => "cs",
        S::Geometry => "gs",
        S::Mesh => "ms",
        S::Amplification => "as",
        _ if stage.is_ray_tracing() => {
            if model < ShaderModel::V6_6 {
                return Err(unsupported());
            }
            "lib"
        }
        _ => return Err(unsupported()),
    };

    // Mesh/amplification shaders also have a floor, 6.5.
    if matches!(stage, S::Mesh | S::Amplification) && model < ShaderModel::V6_5 {
        return Err(unsupported());
    }

    Ok(format!("{}_{}_{}", prefix, model.major, model.minor))
}

/// Compile HLSL text into DXIL bytes.
///
/// `enable_16bit_types` raises the model floor to 6.2 and passes the
/// matching DXC flag.
pub fn compile_hlsl_to_dxil(
    source: &str,
    options: &CompileOptions,
    model: ShaderModel,
    enable_16bit_types: bool,
) -> Result<Vec<u8>, ShaderError> {
    if enable_16bit_types && model < ShaderModel::V6_2 {
        return Err(ShaderError::UnsupportedStage {
            stage: options.stage,
            major: model.major,
            minor: model.minor,
        });
    }

    let profile = target_profile(options.stage, model)?;

    let mut args: Vec<&str> = Vec::new();
    if options.debug {
        args.extend(["-Od", "-Zi"]);
    } else {
        args.push("-O3");
    }
    if enable_16bit_types {
        args.push("-enable-16bit-types");
    }

    let defines: Vec<(&str, Option<&str>)> = options
        .defines
        .iter()
        .map(|define| {
            let value = (!define.value.is_empty()).then_some(define.value.as_str());
            (define.name.as_str(), value)
        })
        .collect();

    hassle_rs::compile_hlsl(
        "shader.hlsl",
        source,
        &options.entry_point,
        &profile,
        &args,
        &defines,
    )
    .map_err(|err| ShaderError::Compilation(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_table() {
        use sbt::ShaderStage as S;
        assert_eq!(target_profile(S::Vertex, ShaderModel::V6_0).unwrap(), "vs_6_0");
        assert_eq!(target_profile(S::Pixel, ShaderModel::V6_2).unwrap(), "ps_6_2");
        assert_eq!(target_profile(S::Compute, ShaderModel::V6_0).unwrap(), "cs_6_0");
        assert_eq!(target_profile(S::Geometry, ShaderModel::V6_0).unwrap(), "gs_6_0");
        assert_eq!(target_profile(S::Mesh, ShaderModel::V6_5).unwrap(), "ms_6_5");
        assert_eq!(
            target_profile(S::RayGeneration, ShaderModel::V6_6).unwrap(),
            "lib_6_6"
        );
    }

    #[test]
    fn ray_tracing_floor_is_enforced() {
        assert!(matches!(
            target_profile(sbt::ShaderStage::RayMiss, ShaderModel::V6_2),
            Err(ShaderError::UnsupportedStage { .. })
        ));
    }

    #[test]
    fn mesh_floor_is_enforced() {
        assert!(target_profile(sbt::ShaderStage::Mesh, ShaderModel::V6_0).is_err());
        assert!(target_profile(sbt::ShaderStage::Amplification, ShaderModel::V6_2).is_err());
    }
}
