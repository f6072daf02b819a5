//! GPU error types.

use ash::vk;
use thiserror::Error;
use whisker_core::{BindingKind, BufferKind};

/// Configuration, environment and driver failures.
///
/// These are unrecoverable for the current device: construction fails and the
/// caller cannot proceed with it.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// The Vulkan loader could not be found or initialized.
    #[error("Failed to load Vulkan: {0}")]
    Loader(String),

    /// Required layers or extensions are missing.
    #[error("Following {what} were absent: {}", .names.join(", "))]
    NotPresent { what: &'static str, names: Vec<String> },

    /// No physical device satisfies the requirements.
    #[error("{0}")]
    NoSuitableDevice(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// The surface offers no 8-bit BGRA/RGBA sRGB-nonlinear format.
    #[error("Surface exposes no supported format")]
    UnsupportedSurfaceFormat,

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Shader module creation failed.
    #[error("Shader compilation failed: {0}")]
    ShaderCompilation(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Driver reached a state it cannot continue from.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The API was called out of order or with the wrong object.
    #[error("Invalid use: {0}")]
    InvalidUse(#[from] UsageError),
}

/// Precondition violations of the rendering API.
///
/// These are bugs in the calling code, never retried. Each variant names the
/// call that was made out of order.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsageError {
    #[error("{call}() called before begin()")]
    FrameNotBegun { call: &'static str },

    #[error("{call}() called while the previous frame is still being built")]
    FrameInProgress { call: &'static str },

    #[error("{call}() called without an open render pass; record() must succeed first")]
    NotRecording { call: &'static str },

    #[error("{call}() called while a render pass is still open; call end() first")]
    RenderPassOpen { call: &'static str },

    #[error("record() called twice for the same surface in one frame")]
    SurfaceAlreadyRecorded,

    #[error("{call}(): {object} belongs to a different backend or context")]
    ForeignObject {
        call: &'static str,
        object: &'static str,
    },

    #[error("{call}() expects a {expected:?} buffer, got {actual:?}")]
    WrongBufferKind {
        call: &'static str,
        expected: BufferKind,
        actual: BufferKind,
    },

    #[error("use_texture_image() requires an image created with texture usage and a sampler")]
    NotATexture,

    #[error("{call}() requires a program; call use_program() first")]
    NoProgramBound { call: &'static str },

    #[error("use_program(): program was built for a different render pass")]
    IncompatibleProgram,

    #[error("{call}(): program slot {index} is {expected:?}, not {actual:?}")]
    SlotMismatch {
        call: &'static str,
        index: u32,
        expected: Option<BindingKind>,
        actual: BindingKind,
    },

    #[error("surface does not exist (already destroyed?)")]
    UnknownSurface,

    #[error("render target does not exist (already destroyed?)")]
    UnknownRenderTarget,

    #[error("{object} of zero size")]
    ZeroSized { object: &'static str },

    #[error("copy of {len} bytes at offset {offset} exceeds capacity {capacity}")]
    CopyOutOfBounds { offset: u64, len: u64, capacity: u64 },

    #[error("image data is {actual} bytes, region needs {expected}")]
    ImageDataSize { expected: u64, actual: u64 },

    #[error("render target attachments must be created with render-target usage")]
    NotARenderTargetImage,

    #[error("render target needs at least one attachment")]
    EmptyRenderTarget,

    #[error("render target attachments must share one extent")]
    MismatchedAttachments,

    #[error("render target has no attachment {0}")]
    NoSuchAttachment(usize),

    #[error("program needs a vertex shader")]
    NoVertexShader,

    #[error("images can never be moved into the undefined layout")]
    InvalidTransitionTarget,
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_present_names_every_missing_item() {
        let err = GpuError::NotPresent {
            what: "layers",
            names: vec!["VK_LAYER_A".into(), "VK_LAYER_B".into()],
        };
        assert_eq!(
            err.to_string(),
            "Following layers were absent: VK_LAYER_A, VK_LAYER_B"
        );
    }

    #[test]
    fn usage_errors_name_the_call() {
        let err: GpuError = UsageError::NotRecording { call: "draw" }.into();
        assert!(err.to_string().contains("draw()"));
        assert!(matches!(
            err,
            GpuError::InvalidUse(UsageError::NotRecording { call: "draw" })
        ));
    }
}
