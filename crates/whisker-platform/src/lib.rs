//! Platform layer for Whisker.
//!
//! Provides window creation, the input/resize/close event stream and a
//! blocking event wait via winit, plus logging setup.

pub mod event;
pub mod platform;
pub mod window;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub use event::PlatformEvent;
pub use platform::Platform;
pub use window::{PlatformWindow, WindowConfig};

#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Window creation failed: {0}")]
    WindowCreation(String),
    #[error("Event loop error: {0}")]
    EventLoop(String),
}

pub type Result<T> = std::result::Result<T, PlatformError>;

/// Install a `fmt` subscriber filtered by `RUST_LOG`, defaulting to `info`.
///
/// Does nothing if a global subscriber is already set.
pub fn init_logging() {
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
    if installed.is_err() {
        tracing::debug!("Global subscriber already installed");
    }
}
