//! Fixed-function pipeline settings and vertex input layouts.

use super::Format;

/// Primitive topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Topology {
    Point,
    Line,
    #[default]
    Triangle,
    LineStrip,
    TriangleStrip,
    TriangleFan,
}

/// Rasterization fill mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PolygonMode {
    #[default]
    Fill,
    Line,
    Point,
}

/// Face culling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
    /// Front and back.
    Any,
}

/// Front face winding order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Winding {
    Clockwise,
    #[default]
    CounterClockwise,
}

/// How a vertex input advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum VertexStepMode {
    /// Once per vertex.
    #[default]
    Vertex,
    /// Once per instance.
    Instance,
}

/// One attribute fetched from a vertex input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    /// Shader location.
    pub location: u32,
    /// Attribute format.
    pub format: Format,
    /// Byte offset inside an element.
    pub offset: u32,
}

impl VertexAttribute {
    /// Create a new vertex attribute.
    pub fn new(location: u32, format: Format, offset: u32) -> Self {
        Self {
            location,
            format,
            offset,
        }
    }
}

/// A vertex buffer binding layout. Its index in the state's input list is its slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexInput {
    /// Attributes read from this input.
    pub attributes: Vec<VertexAttribute>,
    /// Byte stride between consecutive elements.
    pub stride: u32,
    /// Step function.
    pub step_mode: VertexStepMode,
}

impl VertexInput {
    /// Create a per-vertex input.
    pub fn new(stride: u32, attributes: Vec<VertexAttribute>) -> Self {
        Self {
            attributes,
            stride,
            step_mode: VertexStepMode::Vertex,
        }
    }

    /// Step once per instance instead of once per vertex.
    pub fn per_instance(mut self) -> Self {
        self.step_mode = VertexStepMode::Instance;
        self
    }
}
