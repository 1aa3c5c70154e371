//! Translation tables between the abstract API types and D3D12.

use winapi::um::{d3d12, d3dcommon};

/// The fixed resource-state table shared with the Vulkan backend.
pub fn map_resource_state(state: sbt::ResourceState) -> d3d12::D3D12_RESOURCE_STATES {
    use sbt::ResourceState as S;
    match state {
        S::Common => d3d12::D3D12_RESOURCE_STATE_COMMON,
        S::VertexBuffer => d3d12::D3D12_RESOURCE_STATE_VERTEX_AND_CONSTANT_BUFFER,
        S::IndexBuffer => d3d12::D3D12_RESOURCE_STATE_INDEX_BUFFER,
        S::Present => d3d12::D3D12_RESOURCE_STATE_PRESENT,
        S::OutputTarget => d3d12::D3D12_RESOURCE_STATE_RENDER_TARGET,
        S::CopySrc => d3d12::D3D12_RESOURCE_STATE_COPY_SOURCE,
        S::CopyDest => d3d12::D3D12_RESOURCE_STATE_COPY_DEST,
    }
}

pub fn map_topology(topology: sbt::PrimitiveTopology) -> d3d12::D3D12_PRIMITIVE_TOPOLOGY {
    use sbt::PrimitiveTopology as T;
    match topology {
        T::PointList => d3dcommon::D3D_PRIMITIVE_TOPOLOGY_POINTLIST,
        T::LineList => d3dcommon::D3D_PRIMITIVE_TOPOLOGY_LINELIST,
        T::LineStrip => d3dcommon::D3D_PRIMITIVE_TOPOLOGY_LINESTRIP,
        T::TriangleList => d3dcommon::D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST,
        T::TriangleStrip => d3dcommon::D3D_PRIMITIVE_TOPOLOGY_TRIANGLESTRIP,
    }
}

pub fn map_topology_type(
    topology: sbt::PrimitiveTopology,
) -> d3d12::D3D12_PRIMITIVE_TOPOLOGY_TYPE {
    use sbt::PrimitiveTopology as T;
    match topology {
        T::PointList => d3d12::D3D12_PRIMITIVE_TOPOLOGY_TYPE_POINT,
        T::LineList | T::LineStrip => d3d12::D3D12_PRIMITIVE_TOPOLOGY_TYPE_LINE,
        T::TriangleList | T::TriangleStrip => d3d12::D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
    }
}

pub fn map_queue_kind(kind: sbt::CommandObjectType) -> native::CmdListType {
    match kind {
        sbt::CommandObjectType::AllCommands => native::CmdListType::Direct,
        sbt::CommandObjectType::Compute => native::CmdListType::Compute,
        sbt::CommandObjectType::Copy => native::CmdListType::Copy,
    }
}

pub fn map_queue_priority(priority: sbt::QueuePriority) -> native::Priority {
    match priority {
        sbt::QueuePriority::High => native::Priority::High,
        sbt::QueuePriority::Medium => native::Priority::Normal,
        sbt::QueuePriority::Low => native::Priority::Normal,
    }
}
