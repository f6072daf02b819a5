//! The event loop owner.

use crate::event::{translate, PlatformEvent};
use crate::window::{PlatformWindow, WindowConfig};
use crate::{PlatformError, Result};
use hashbrown::HashMap;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use whisker_gpu::EventPump;
use winit::application::ApplicationHandler;
use winit::event::{StartCause, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{WindowAttributes, WindowId};

type Registry = HashMap<WindowId, Weak<PlatformWindow>>;

/// Forget windows whose last handle was dropped.
fn prune_dropped(windows: &mut Registry) {
    windows.retain(|_, window| window.strong_count() > 0);
}

/// Receives callbacks for one pump of the event loop.
struct Pump<'a> {
    windows: &'a Registry,
    events: &'a mut VecDeque<PlatformEvent>,
    create: Option<WindowAttributes>,
    created: Option<std::result::Result<winit::window::Window, winit::error::OsError>>,
}

impl Pump<'_> {
    fn create_pending(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(attributes) = self.create.take() {
            self.created = Some(event_loop.create_window(attributes));
        }
    }
}

impl ApplicationHandler for Pump<'_> {
    fn new_events(&mut self, event_loop: &ActiveEventLoop, _cause: StartCause) {
        self.create_pending(event_loop);
    }

    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        self.create_pending(event_loop);
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, id: WindowId, event: WindowEvent) {
        let window = self.windows.get(&id).and_then(Weak::upgrade);
        if matches!(event, WindowEvent::CloseRequested) {
            if let Some(window) = &window {
                window.set_should_close(true);
            }
        }
        if window.is_some() {
            if let Some(event) = translate(id, &event) {
                self.events.push_back(event);
            }
        }
    }
}

/// Owns the event loop and every window created from it.
///
/// Single-threaded: it lives on the thread that created it, like the loop.
pub struct Platform {
    event_loop: RefCell<EventLoop<()>>,
    windows: RefCell<Registry>,
    events: RefCell<VecDeque<PlatformEvent>>,
    exited: Cell<bool>,
    start: Instant,
}

impl Platform {
    pub fn new() -> Result<Self> {
        let event_loop = EventLoop::new().map_err(|e| PlatformError::EventLoop(e.to_string()))?;
        Ok(Self {
            event_loop: RefCell::new(event_loop),
            windows: RefCell::new(HashMap::new()),
            events: RefCell::new(VecDeque::new()),
            exited: Cell::new(false),
            start: Instant::now(),
        })
    }

    /// Open a window.
    pub fn create_window(&self, config: &WindowConfig) -> Result<Arc<PlatformWindow>> {
        let mut created = None;
        // Window creation needs an active loop; it happens on the next
        // iteration.
        for _ in 0..2 {
            created = self.pump_once(Some(Duration::ZERO), Some(config.attributes()));
            if created.is_some() {
                break;
            }
        }
        let window = created
            .ok_or_else(|| PlatformError::WindowCreation("event loop did not run".to_string()))?
            .map_err(|e| PlatformError::WindowCreation(e.to_string()))?;

        let window = Arc::new(PlatformWindow::new(window));
        self.windows
            .borrow_mut()
            .insert(window.id(), Arc::downgrade(&window));
        tracing::debug!(
            "Created window \"{}\" ({}x{})",
            config.title,
            config.width,
            config.height
        );
        Ok(window)
    }

    /// Run one loop iteration; returns the window created in it, if asked to.
    fn pump_once(
        &self,
        timeout: Option<Duration>,
        create: Option<WindowAttributes>,
    ) -> Option<std::result::Result<winit::window::Window, winit::error::OsError>> {
        let windows = self.windows.borrow();
        let mut events = self.events.borrow_mut();
        let mut pump = Pump {
            windows: &windows,
            events: &mut events,
            create,
            created: None,
        };
        let status = self
            .event_loop
            .borrow_mut()
            .pump_app_events(timeout, &mut pump);
        if let PumpStatus::Exit(code) = status {
            tracing::debug!("Event loop exited with code {}", code);
            self.exited.set(true);
        }
        pump.created
    }

    /// Process pending events without blocking and return everything
    /// queued so far.
    pub fn poll_events(&self) -> Vec<PlatformEvent> {
        self.pump_once(Some(Duration::ZERO), None);
        prune_dropped(&mut self.windows.borrow_mut());
        self.events.borrow_mut().drain(..).collect()
    }

    /// Block until at least one event arrives. The events are returned by
    /// the next [`Platform::poll_events`].
    pub fn wait_events(&self) {
        self.pump_once(None, None);
    }

    /// Whether the event loop has shut down.
    pub fn exited(&self) -> bool {
        self.exited.get()
    }

    /// Seconds since the platform was created.
    pub fn time(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl EventPump for Platform {
    fn wait_for_events(&self) {
        self.wait_events();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dropped_windows_are_pruned() {
        // SAFETY: the dummy id is only used as a map key.
        let id = unsafe { WindowId::dummy() };
        let mut windows = Registry::new();
        windows.insert(id, Weak::new());
        prune_dropped(&mut windows);
        assert!(windows.is_empty());
    }
}
