/*!
# Shader pipeline.

Accepted sources and their lowering per backend:

```text
GLSL  --shaderc-->  SPIR-V                      (Vulkan)
GLSL  --shaderc-->  SPIR-V --spirv_cross--> HLSL --DXC--> DXIL   (D3D12)
HLSL  --DXC-->      DXIL                        (D3D12)
HLSL  --shaderc-->  SPIR-V                      (Vulkan)
SPIR-V / DXIL       accepted pre-compiled
```

Reflection runs over SPIR-V through `spirv_cross` and feeds both the
Vulkan descriptor-set-layout path and the D3D12 root-signature synthesis
in [`layout`].

The process-global compiler state (the shaderc compiler instance) lives in
[`ShaderRuntime`], initialized once per process under a call-once guard and
alive until process exit.
*/

mod cross;
mod dxil;
mod glsl;
pub mod layout;

pub use cross::{reflect_spirv, spirv_to_hlsl};
pub use dxil::{compile_hlsl_to_dxil, target_profile, ShaderModel};
pub use glsl::compile_to_spirv;
pub use layout::{RootParameter, VertexInputElement, VertexInputLayout};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;

use crate::{FastHashMap, ShaderError};

/// A preprocessor definition injected into the front-end preamble
/// (GLSL) or passed as a `-D` argument (DXC).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MacroDefine {
    /// Macro name.
    pub name: String,
    /// Macro value; empty defines the name without a value.
    pub value: String,
}

/// Per-compilation options shared by every front-end.
#[derive(Clone, Debug)]
pub struct CompileOptions {
    /// Entry-point function name.
    pub entry_point: String,
    /// Pipeline stage being compiled.
    pub stage: sbt::ShaderStage,
    /// Preprocessor definitions.
    pub defines: Vec<MacroDefine>,
    /// Keep debug info and disable optimization. Release callers get
    /// stripped, size-optimized output.
    pub debug: bool,
}

impl CompileOptions {
    /// Options for `stage` with the conventional `main` entry point.
    pub fn new(stage: sbt::ShaderStage) -> Self {
        Self {
            entry_point: "main".to_string(),
            stage,
            defines: Vec::new(),
            debug: cfg!(debug_assertions),
        }
    }
}

/// Kind of resource a shader binding refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingType {
    /// Constant/uniform buffer.
    Cbv,
    /// Read-only shader resource.
    Srv,
    /// Read-write resource.
    Uav,
    /// Separate sampler.
    Sampler,
    /// Structured buffer.
    StructuredBuffer,
    /// Raw byte-address buffer.
    ByteAddressBuffer,
    /// Sampled texture.
    Texture,
}

/// Stage visibility of a binding or root parameter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Visibility {
    /// Visible to every stage.
    #[default]
    All,
    /// Visible to one stage.
    Stage(sbt::ShaderStage),
}

impl Visibility {
    /// Merge two visibilities; differing stages widen to `All`.
    pub fn union(self, other: Self) -> Self {
        match (self, other) {
            (Self::Stage(a), Self::Stage(b)) if a == b => self,
            _ => Self::All,
        }
    }
}

/// One reflected resource binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceBinding {
    /// Source-level name.
    pub name: String,
    /// Binding slot (`binding` decoration / HLSL register).
    pub bind_point: u32,
    /// Descriptor set (`set` decoration / HLSL space).
    pub space: u32,
    /// Array size; `1` for scalars.
    pub bind_count: u32,
    /// Resource kind.
    pub ty: BindingType,
    /// Whether the shader may write through the binding.
    pub is_writable: bool,
    /// Stage visibility.
    pub visibility: Visibility,
}

/// Push-constant block reflected from a module.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PushConstantRange {
    /// Binding slot assigned on the D3D12 path.
    pub bind_point: u32,
    /// Register space on the D3D12 path.
    pub space: u32,
    /// Size in 32-bit values.
    pub size_dwords: u32,
}

/// Reflection metadata of one compiled shader module.
#[derive(Clone, Debug)]
pub struct ShaderReflection {
    /// Entry-point name, preserved across every lowering.
    pub entry_point: String,
    /// Stage the module was compiled for.
    pub stage: sbt::ShaderStage,
    /// All reflected bindings.
    pub resources: Vec<ResourceBinding>,
    /// Push-constant block, if the module declares one.
    pub push_constants: Option<PushConstantRange>,
    /// Name → slot lookup over `resources`.
    pub bindings: FastHashMap<String, u32>,
}

impl ShaderReflection {
    pub(crate) fn index_bindings(&mut self) {
        self.bindings = self
            .resources
            .iter()
            .map(|binding| (binding.name.clone(), binding.bind_point))
            .collect();
    }
}

/// Process-global compiler state.
///
/// The shaderc compiler is not cheap to construct and not `Sync`, so one
/// instance is shared behind a mutex for the life of the process. DXC and
/// SPIRV-Cross hold their state per call and need no slot here.
pub struct ShaderRuntime {
    glsl_compiler: Mutex<shaderc::Compiler>,
}

static RUNTIME: OnceCell<ShaderRuntime> = OnceCell::new();

impl ShaderRuntime {
    /// The singleton, initialized on first use.
    pub fn get() -> Result<&'static Self, ShaderError> {
        RUNTIME.get_or_try_init(|| {
            let compiler = shaderc::Compiler::new().ok_or_else(|| {
                ShaderError::Compilation("failed to initialize the shaderc compiler".to_string())
            })?;
            log::debug!("shader runtime initialized");
            Ok(Self {
                glsl_compiler: Mutex::new(compiler),
            })
        })
    }

    pub(crate) fn with_glsl_compiler<R>(
        &self,
        f: impl FnOnce(&shaderc::Compiler) -> R,
    ) -> R {
        f(&self.glsl_compiler.lock())
    }
}

/// A fully lowered shader for one backend, with its reflection.
#[derive(Clone, Debug)]
pub enum ShaderBinary {
    /// SPIR-V words for the Vulkan backend.
    SpirV(Vec<u32>),
    /// DXIL bytes for the D3D12 backend.
    Dxil(Vec<u8>),
    /// GLSL source re-emitted for the OpenGL backend.
    GlslSource(String),
}

/// Compiled module plus metadata; the payload every backend's shader
/// library wraps.
#[derive(Clone, Debug)]
pub struct CompiledShader {
    /// The lowered code.
    pub binary: ShaderBinary,
    /// Reflection of the module.
    pub reflection: ShaderReflection,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn visibility_union_widens() {
        let vs = Visibility::Stage(sbt::ShaderStage::Vertex);
        let ps = Visibility::Stage(sbt::ShaderStage::Pixel);
        assert_eq!(vs.union(vs), vs);
        assert_eq!(vs.union(ps), Visibility::All);
        assert_eq!(Visibility::All.union(vs), Visibility::All);
    }

    #[test]
    fn reflection_binding_index() {
        let mut reflection = ShaderReflection {
            entry_point: "main".to_string(),
            stage: sbt::ShaderStage::Vertex,
            resources: vec![ResourceBinding {
                name: "ubo".to_string(),
                bind_point: 0,
                space: 0,
                bind_count: 1,
                ty: BindingType::Cbv,
                is_writable: false,
                visibility: Visibility::Stage(sbt::ShaderStage::Vertex),
            }],
            push_constants: None,
            bindings: Default::default(),
        };
        reflection.index_bindings();
        assert_eq!(reflection.bindings.get("ubo"), Some(&0));
    }
}
