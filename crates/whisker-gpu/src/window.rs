//! What the renderer needs from a windowing layer.
//!
//! The platform crate implements these for real windows; [`HeadlessWindow`]
//! stands in for one when running on the headless backend.

use parking_lot::Mutex;
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use whisker_core::Extent2D;

/// A native window a presentation surface can be created for.
pub trait NativeWindow: HasDisplayHandle + HasWindowHandle {
    /// Current client area in physical pixels. Zero while minimized.
    fn client_size(&self) -> Extent2D;
}

/// Blocking wait on the platform event queue.
///
/// `Context::present` calls this instead of spinning while every pending
/// surface is minimized.
pub trait EventPump {
    fn wait_for_events(&self);
}

/// A window without a native handle, driven by hand.
///
/// Only the headless backend can create surfaces for it.
#[derive(Debug)]
pub struct HeadlessWindow {
    size: Mutex<Extent2D>,
}

impl HeadlessWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: Mutex::new(Extent2D::new(width, height)),
        }
    }

    /// Simulate the user resizing (or minimizing, with 0x0) the window.
    pub fn resize(&self, width: u32, height: u32) {
        *self.size.lock() = Extent2D::new(width, height);
    }
}

impl NativeWindow for HeadlessWindow {
    fn client_size(&self) -> Extent2D {
        *self.size.lock()
    }
}

impl HasDisplayHandle for HeadlessWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        Err(HandleError::Unavailable)
    }
}

impl HasWindowHandle for HeadlessWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        Err(HandleError::Unavailable)
    }
}
