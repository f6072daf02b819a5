//! Fixed-function pipeline state.

use serde::{Deserialize, Serialize};

/// Programmable shader stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Primitive assembly mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Topology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

/// Faces discarded by the rasterizer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
    Both,
}

/// Winding order of front-facing triangles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrontFace {
    Clockwise,
    #[default]
    CounterClockwise,
}

/// Step rate of a vertex buffer binding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VertexInputRate {
    #[default]
    Vertex,
    Instance,
}

/// Kind of resource bound at a program slot.
///
/// A program's slots are ordered; slot `i` is descriptor set `i`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindingKind {
    Texture,
    UniformBuffer,
    StorageBuffer,
}

impl BindingKind {
    pub const ALL: [Self; 3] = [Self::Texture, Self::UniformBuffer, Self::StorageBuffer];

    /// Index into per-kind tables.
    #[inline]
    pub const fn index(self) -> usize {
        match self {
            Self::Texture => 0,
            Self::UniformBuffer => 1,
            Self::StorageBuffer => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_kind_indices_are_dense() {
        for (i, kind) in BindingKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }
}
