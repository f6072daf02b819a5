//! Rendering hardware interface for the Whisker stack.
//!
//! This crate provides:
//! - Device and queue ownership on Vulkan, or on an in-process headless driver
//! - Buffers, images, samplers, shaders and programs
//! - Staged uploads and read-backs with image access-state tracking
//! - Window surfaces with swapchain recreation, and offscreen render targets
//! - The per-frame begin/record/submit/present protocol

pub mod access;
mod backend;
pub mod buffer;
pub mod context;
mod device;
pub mod error;
pub mod frame;
pub mod image;
pub mod program;
mod render_target;
pub mod sampler;
pub mod shader;
pub mod surface;
pub mod window;

pub use access::AccessState;
pub use backend::headless::{HeadlessDriver, PresentRecord, SubmissionRecord};
pub use backend::Command;
pub use buffer::Buffer;
pub use context::{Context, ContextBuilder, PassTarget, RenderTargetId, SurfaceId};
pub use error::{GpuError, Result, UsageError};
pub use frame::FramePhase;
pub use image::Image;
pub use program::{Program, ProgramDesc, VertexAttribute, VertexLayout};
pub use sampler::Sampler;
pub use shader::Shader;
pub use surface::SurfaceState;
pub use window::{EventPump, HeadlessWindow, NativeWindow};
