//! End-to-end checks over the shader pipeline, no GPU required.
//!
//! A minimal GLSL vertex shader with one `vec2` input and one UBO goes
//! GLSL → SPIR-V → reflection → HLSL, and the synthesized root parameters
//! and input layout must match the binding decorations exactly.

use sable_hal::shader::{
    self, layout, BindingType, CompileOptions, Visibility,
};

const VERTEX_SHADER: &str = r#"
#version 450

layout(location = 0) in vec2 inPosition;

layout(binding = 0) uniform UBO {
    float time;
} ubo;

void main() {
    float angle = ubo.time / 100.0;
    mat2 rotation = mat2(cos(angle), -sin(angle), sin(angle), cos(angle));
    gl_Position = vec4(rotation * inPosition, 0.0, 1.0);
}
"#;

const FRAGMENT_SHADER: &str = r#"
#version 450

layout(location = 0) in vec3 fragColor;
layout(location = 0) out vec4 outColor;

void main() {
    outColor = vec4(fragColor, 1.0);
}
"#;

fn compile(source: &str, stage: sbt::ShaderStage) -> Vec<u32> {
    let options = CompileOptions {
        debug: false,
        ..CompileOptions::new(stage)
    };
    shader::compile_to_spirv(source, sbt::ShaderLanguage::Glsl, &options)
        .expect("front-end compile")
}

#[test]
fn reflection_preserves_entry_point_and_bindings() {
    let spirv = compile(VERTEX_SHADER, sbt::ShaderStage::Vertex);
    let reflection = shader::reflect_spirv(&spirv, sbt::ShaderStage::Vertex).unwrap();

    assert_eq!(reflection.entry_point, "main");
    assert_eq!(reflection.stage, sbt::ShaderStage::Vertex);
    let ubo = reflection
        .resources
        .iter()
        .find(|binding| binding.ty == BindingType::Cbv)
        .expect("the UBO reflects as a CBV");
    assert_eq!(ubo.bind_point, 0);
    assert_eq!(ubo.space, 0);
    assert_eq!(ubo.bind_count, 1);
    assert!(!ubo.is_writable);
}

#[test]
fn root_signature_has_one_vertex_cbv() {
    let spirv = compile(VERTEX_SHADER, sbt::ShaderStage::Vertex);
    let reflection = shader::reflect_spirv(&spirv, sbt::ShaderStage::Vertex).unwrap();

    let parameters = layout::synthesize_root_parameters(&reflection);
    assert_eq!(parameters.len(), 1);
    match &parameters[0] {
        layout::RootParameter::CbvTable {
            bind_point,
            space,
            count,
            visibility,
        } => {
            assert_eq!((*bind_point, *space, *count), (0, 0, 1));
            assert_eq!(*visibility, Visibility::Stage(sbt::ShaderStage::Vertex));
        }
        other => panic!("expected a CBV table, got {other:?}"),
    }
}

#[test]
fn input_layout_reflects_one_rg32_float_element() {
    let spirv = compile(VERTEX_SHADER, sbt::ShaderStage::Vertex);
    let derived = layout::derive_vertex_inputs(&spirv).unwrap();

    assert_eq!(derived.elements.len(), 1);
    let element = &derived.elements[0];
    assert_eq!(element.semantic_name, "TEXCOORD");
    assert_eq!(element.semantic_index, 0);
    assert_eq!(element.format, layout::VertexAttributeFormat::Rg32Float);
    assert_eq!(element.aligned_byte_offset, 0);
    // DXGI_FORMAT_R32G32_FLOAT
    assert_eq!(element.format.dxgi_format(), 16);
    assert_eq!(derived.stride, 8);
}

#[test]
fn cross_compiled_hlsl_keeps_the_entry_point() {
    let spirv = compile(VERTEX_SHADER, sbt::ShaderStage::Vertex);
    let hlsl = shader::spirv_to_hlsl(&spirv, "main").unwrap();
    assert!(hlsl.contains("main"), "entry point lost:\n{hlsl}");
    assert!(hlsl.contains("cbuffer") || hlsl.contains("ConstantBuffer"));
}

#[test]
fn release_front_end_is_reproducible() {
    let first = compile(FRAGMENT_SHADER, sbt::ShaderStage::Pixel);
    let second = compile(FRAGMENT_SHADER, sbt::ShaderStage::Pixel);
    assert_eq!(first, second);
}

#[test]
fn merged_stages_share_the_parameter_list() {
    let vs = shader::reflect_spirv(
        &compile(VERTEX_SHADER, sbt::ShaderStage::Vertex),
        sbt::ShaderStage::Vertex,
    )
    .unwrap();
    let ps = shader::reflect_spirv(
        &compile(FRAGMENT_SHADER, sbt::ShaderStage::Pixel),
        sbt::ShaderStage::Pixel,
    )
    .unwrap();

    let merged = layout::merge_root_parameters(&[
        layout::synthesize_root_parameters(&vs),
        layout::synthesize_root_parameters(&ps),
    ]);
    // The fragment stage declares no bindings; the merge is the vertex
    // stage's single CBV.
    assert_eq!(merged.len(), 1);
}
