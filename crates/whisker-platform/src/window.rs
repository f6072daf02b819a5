//! Native windows.

use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use std::sync::atomic::{AtomicBool, Ordering};
use whisker_core::Extent2D;
use whisker_gpu::NativeWindow;
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::window::{Window, WindowAttributes, WindowId};

/// Window configuration.
#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
    /// Top-left corner in physical pixels; platform default when `None`.
    pub position: Option<(i32, i32)>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Whisker".to_string(),
            width: 1280,
            height: 720,
            resizable: true,
            position: None,
        }
    }
}

impl WindowConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    #[must_use]
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    #[must_use]
    pub fn with_resizable(mut self, resizable: bool) -> Self {
        self.resizable = resizable;
        self
    }

    #[must_use]
    pub fn with_position(mut self, x: i32, y: i32) -> Self {
        self.position = Some((x, y));
        self
    }

    pub(crate) fn attributes(&self) -> WindowAttributes {
        let attributes = Window::default_attributes()
            .with_title(self.title.clone())
            .with_inner_size(PhysicalSize::new(self.width, self.height))
            .with_resizable(self.resizable);
        match self.position {
            Some((x, y)) => attributes.with_position(PhysicalPosition::new(x, y)),
            None => attributes,
        }
    }
}

/// A window created by [`Platform`](crate::Platform).
///
/// Surfaces are created from it through [`NativeWindow`].
pub struct PlatformWindow {
    window: Window,
    should_close: AtomicBool,
}

impl PlatformWindow {
    pub(crate) fn new(window: Window) -> Self {
        Self {
            window,
            should_close: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> WindowId {
        self.window.id()
    }

    /// Set once the user asked to close the window.
    pub fn should_close(&self) -> bool {
        self.should_close.load(Ordering::Relaxed)
    }

    pub fn set_should_close(&self, value: bool) {
        self.should_close.store(value, Ordering::Relaxed);
    }

    /// Outer position in physical pixels, if the platform reports one.
    pub fn position(&self) -> Option<(i32, i32)> {
        self.window.outer_position().ok().map(|p| (p.x, p.y))
    }

    /// Inner size in physical pixels, regardless of minimization.
    pub fn size(&self) -> Extent2D {
        let size = self.window.inner_size();
        Extent2D::new(size.width, size.height)
    }

    pub fn set_title(&self, title: &str) {
        self.window.set_title(title);
    }

    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }
}

impl NativeWindow for PlatformWindow {
    fn client_size(&self) -> Extent2D {
        // Some platforms keep reporting the last size while minimized.
        if self.window.is_minimized() == Some(true) {
            Extent2D::default()
        } else {
            self.size()
        }
    }
}

impl HasWindowHandle for PlatformWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.window.window_handle()
    }
}

impl HasDisplayHandle for PlatformWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.window.display_handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = WindowConfig::new("demo")
            .with_size(800, 600)
            .with_resizable(false)
            .with_position(10, 20);
        assert_eq!(config.title, "demo");
        assert_eq!((config.width, config.height), (800, 600));
        assert!(!config.resizable);
        assert_eq!(config.position, Some((10, 20)));

        let default = WindowConfig::default();
        assert!(default.resizable);
        assert_eq!(default.position, None);
    }
}
