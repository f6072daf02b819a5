//! Core types for the Whisker rendering hardware interface.
//!
//! This crate provides the backend-neutral vocabulary shared by the GPU and
//! platform crates:
//! - Backend tags and versions
//! - Resource descriptors (formats, buffer kinds, image usage, samplers)
//! - Fixed-function pipeline state (topology, culling, binding slots)
//! - Clear colors

pub mod color;
pub mod pipeline;
pub mod types;

pub use color::ClearColor;
pub use pipeline::{BindingKind, CullMode, FrontFace, ShaderStage, Topology, VertexInputRate};
pub use types::{
    AddressMode, Backend, BufferKind, Extent2D, Filter, Format, ImageDesc, ImageTiling, ImageUsage,
    IndexType, SamplerDesc, Version,
};
