//! Translation tables between the abstract API types and Vulkan.

use ash::vk;

use crate::shader::layout::VertexAttributeFormat;

/// Derived barrier half for one abstract resource state.
#[derive(Clone, Copy, Debug)]
pub struct BarrierState {
    pub access: vk::AccessFlags,
    pub stage: vk::PipelineStageFlags,
    pub layout: vk::ImageLayout,
}

/// The fixed resource-state table shared with the D3D12 backend.
pub fn map_resource_state(state: sbt::ResourceState) -> BarrierState {
    use sbt::ResourceState as S;
    match state {
        S::Common => BarrierState {
            access: vk::AccessFlags::empty(),
            stage: vk::PipelineStageFlags::TOP_OF_PIPE,
            layout: vk::ImageLayout::GENERAL,
        },
        S::VertexBuffer => BarrierState {
            access: vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
            stage: vk::PipelineStageFlags::VERTEX_INPUT,
            layout: vk::ImageLayout::UNDEFINED,
        },
        S::IndexBuffer => BarrierState {
            access: vk::AccessFlags::INDEX_READ,
            stage: vk::PipelineStageFlags::VERTEX_INPUT,
            layout: vk::ImageLayout::UNDEFINED,
        },
        S::Present => BarrierState {
            access: vk::AccessFlags::empty(),
            stage: vk::PipelineStageFlags::BOTTOM_OF_PIPE,
            layout: vk::ImageLayout::PRESENT_SRC_KHR,
        },
        S::OutputTarget => BarrierState {
            access: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
            stage: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
            layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        },
        S::CopySrc => BarrierState {
            access: vk::AccessFlags::TRANSFER_READ,
            stage: vk::PipelineStageFlags::TRANSFER,
            layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        },
        S::CopyDest => BarrierState {
            access: vk::AccessFlags::TRANSFER_WRITE,
            stage: vk::PipelineStageFlags::TRANSFER,
            layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        },
    }
}

pub fn map_topology(topology: sbt::PrimitiveTopology) -> vk::PrimitiveTopology {
    use sbt::PrimitiveTopology as T;
    match topology {
        T::PointList => vk::PrimitiveTopology::POINT_LIST,
        T::LineList => vk::PrimitiveTopology::LINE_LIST,
        T::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        T::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        T::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
    }
}

pub fn map_vertex_format(format: VertexAttributeFormat) -> vk::Format {
    use VertexAttributeFormat as F;
    match format {
        F::R32Float => vk::Format::R32_SFLOAT,
        F::Rg32Float => vk::Format::R32G32_SFLOAT,
        F::Rgb32Float => vk::Format::R32G32B32_SFLOAT,
        F::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        F::R32Sint => vk::Format::R32_SINT,
        F::Rg32Sint => vk::Format::R32G32_SINT,
        F::Rgb32Sint => vk::Format::R32G32B32_SINT,
        F::Rgba32Sint => vk::Format::R32G32B32A32_SINT,
        F::R32Uint => vk::Format::R32_UINT,
        F::Rg32Uint => vk::Format::R32G32_UINT,
        F::Rgb32Uint => vk::Format::R32G32B32_UINT,
        F::Rgba32Uint => vk::Format::R32G32B32A32_UINT,
    }
}

pub fn map_viewport(viewport: &sbt::Viewport) -> vk::Viewport {
    vk::Viewport {
        x: viewport.x,
        y: viewport.y,
        width: viewport.width,
        height: viewport.height,
        min_depth: viewport.min_depth,
        max_depth: viewport.max_depth,
    }
}

pub fn map_rect(rect: &sbt::Rect) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D {
            x: rect.x,
            y: rect.y,
        },
        extent: vk::Extent2D {
            width: rect.width,
            height: rect.height,
        },
    }
}
