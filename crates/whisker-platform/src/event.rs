//! Window events, reduced to what applications on top of the RHI consume.

use winit::event::{MouseButton, MouseScrollDelta, WindowEvent};
use winit::keyboard::PhysicalKey;
use winit::window::WindowId;

/// Pixels per scroll line when a device reports pixel deltas.
const PIXELS_PER_LINE: f32 = 100.0;

#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    CloseRequested {
        window: WindowId,
    },
    Resized {
        window: WindowId,
        width: u32,
        height: u32,
    },
    Moved {
        window: WindowId,
        x: i32,
        y: i32,
    },
    Focused {
        window: WindowId,
        focused: bool,
    },
    MouseMoved {
        window: WindowId,
        x: f64,
        y: f64,
    },
    MouseButton {
        window: WindowId,
        button: MouseButton,
        pressed: bool,
    },
    /// Scroll amount in lines.
    MouseWheel {
        window: WindowId,
        dx: f32,
        dy: f32,
    },
    Key {
        window: WindowId,
        key: PhysicalKey,
        pressed: bool,
        repeat: bool,
    },
}

impl PlatformEvent {
    pub fn window(&self) -> WindowId {
        match *self {
            Self::CloseRequested { window }
            | Self::Resized { window, .. }
            | Self::Moved { window, .. }
            | Self::Focused { window, .. }
            | Self::MouseMoved { window, .. }
            | Self::MouseButton { window, .. }
            | Self::MouseWheel { window, .. }
            | Self::Key { window, .. } => window,
        }
    }
}

/// Translate a winit event; `None` for events with no counterpart.
pub(crate) fn translate(window: WindowId, event: &WindowEvent) -> Option<PlatformEvent> {
    let event = match event {
        WindowEvent::CloseRequested => PlatformEvent::CloseRequested { window },
        WindowEvent::Resized(size) => PlatformEvent::Resized {
            window,
            width: size.width,
            height: size.height,
        },
        WindowEvent::Moved(position) => PlatformEvent::Moved {
            window,
            x: position.x,
            y: position.y,
        },
        WindowEvent::Focused(focused) => PlatformEvent::Focused {
            window,
            focused: *focused,
        },
        WindowEvent::CursorMoved { position, .. } => PlatformEvent::MouseMoved {
            window,
            x: position.x,
            y: position.y,
        },
        WindowEvent::MouseInput { state, button, .. } => PlatformEvent::MouseButton {
            window,
            button: *button,
            pressed: state.is_pressed(),
        },
        WindowEvent::MouseWheel { delta, .. } => {
            let (dx, dy) = match *delta {
                MouseScrollDelta::LineDelta(x, y) => (x, y),
                #[allow(clippy::cast_possible_truncation)]
                MouseScrollDelta::PixelDelta(p) => {
                    (p.x as f32 / PIXELS_PER_LINE, p.y as f32 / PIXELS_PER_LINE)
                }
            };
            PlatformEvent::MouseWheel { window, dx, dy }
        }
        WindowEvent::KeyboardInput { event, .. } => PlatformEvent::Key {
            window,
            key: event.physical_key,
            pressed: event.state.is_pressed(),
            repeat: event.repeat,
        },
        _ => return None,
    };
    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use winit::dpi::{PhysicalPosition, PhysicalSize};
    use winit::event::{DeviceId, ElementState, TouchPhase};

    fn ids() -> (WindowId, DeviceId) {
        // SAFETY: dummy ids are only compared, never passed to the platform.
        unsafe { (WindowId::dummy(), DeviceId::dummy()) }
    }

    #[test]
    fn resize_move_and_close() {
        let (window, _) = ids();
        assert_eq!(
            translate(window, &WindowEvent::Resized(PhysicalSize::new(400, 300))),
            Some(PlatformEvent::Resized {
                window,
                width: 400,
                height: 300
            })
        );
        assert_eq!(
            translate(window, &WindowEvent::Moved(PhysicalPosition::new(-5, 12))),
            Some(PlatformEvent::Moved {
                window,
                x: -5,
                y: 12
            })
        );
        let close = translate(window, &WindowEvent::CloseRequested).unwrap();
        assert_eq!(close.window(), window);
        assert_eq!(translate(window, &WindowEvent::RedrawRequested), None);
    }

    #[test]
    fn mouse_events() {
        let (window, device_id) = ids();
        let pressed = WindowEvent::MouseInput {
            device_id,
            state: ElementState::Pressed,
            button: MouseButton::Left,
        };
        assert_eq!(
            translate(window, &pressed),
            Some(PlatformEvent::MouseButton {
                window,
                button: MouseButton::Left,
                pressed: true
            })
        );

        let wheel = WindowEvent::MouseWheel {
            device_id,
            delta: MouseScrollDelta::PixelDelta(PhysicalPosition::new(0.0, 250.0)),
            phase: TouchPhase::Moved,
        };
        assert_eq!(
            translate(window, &wheel),
            Some(PlatformEvent::MouseWheel {
                window,
                dx: 0.0,
                dy: 2.5
            })
        );
    }
}
