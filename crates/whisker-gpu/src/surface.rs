//! Presentation surfaces and their swapchain rings.

use crate::device::Device;
use crate::error::Result;
use crate::window::NativeWindow;
use ash::vk;
use slotmap::new_key_type;
use std::sync::Arc;
use whisker_core::Extent2D;

new_key_type! {
    pub(crate) struct SurfaceKey;
}

/// Whether a surface can currently be drawn to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SurfaceState {
    /// The ring matches the window.
    Live,
    /// The ring is out of date (or missing while minimized) and waits for
    /// recreation in `present`.
    Stale,
}

/// Per-image resources of one swapchain plus the semaphores that order
/// acquire, render and present. Everything here is rebuilt on resize.
pub(crate) struct SwapchainRing {
    swapchain: vk::SwapchainKHR,
    acquire_semaphore: vk::Semaphore,
    images: Vec<vk::Image>,
    views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    submit_semaphores: Vec<vk::Semaphore>,
    extent: Extent2D,
}

impl SwapchainRing {
    fn build(
        device: &Device,
        surface: vk::SurfaceKHR,
        format: vk::SurfaceFormatKHR,
        render_pass: vk::RenderPass,
        desired: Extent2D,
    ) -> Result<Option<Self>> {
        let driver = device.driver();
        let Some(parts) = driver.create_swapchain(surface, format, desired)? else {
            return Ok(None);
        };

        let mut ring = Self {
            swapchain: parts.swapchain,
            acquire_semaphore: vk::Semaphore::null(),
            views: Vec::with_capacity(parts.images.len()),
            framebuffers: Vec::with_capacity(parts.images.len()),
            submit_semaphores: Vec::with_capacity(parts.images.len()),
            images: parts.images,
            extent: parts.extent,
        };
        if let Err(e) = ring.populate(device, format.format, render_pass) {
            ring.destroy(device);
            return Err(e);
        }
        Ok(Some(ring))
    }

    fn populate(
        &mut self,
        device: &Device,
        format: vk::Format,
        render_pass: vk::RenderPass,
    ) -> Result<()> {
        let driver = device.driver();
        self.acquire_semaphore = driver.create_semaphore()?;
        for &image in &self.images {
            let view = driver.create_image_view(image, format)?;
            self.views.push(view);
            self.framebuffers
                .push(driver.create_framebuffer(render_pass, &[view], self.extent)?);
            self.submit_semaphores.push(driver.create_semaphore()?);
        }
        Ok(())
    }

    /// Releases whatever was created, including partially built rings.
    fn destroy(self, device: &Device) {
        let driver = device.driver();
        if self.acquire_semaphore != vk::Semaphore::null() {
            driver.destroy_semaphore(self.acquire_semaphore);
        }
        for semaphore in self.submit_semaphores {
            driver.destroy_semaphore(semaphore);
        }
        for framebuffer in self.framebuffers {
            driver.destroy_framebuffer(framebuffer);
        }
        for view in self.views {
            driver.destroy_image_view(view);
        }
        driver.destroy_swapchain(self.swapchain);
    }
}

/// An image acquired from a surface for the current frame.
#[derive(Clone, Copy, Debug)]
pub(crate) struct AcquiredImage {
    pub swapchain: vk::SwapchainKHR,
    pub image_index: u32,
    pub image: vk::Image,
    pub framebuffer: vk::Framebuffer,
    pub extent: Extent2D,
    pub acquire_semaphore: vk::Semaphore,
    pub submit_semaphore: vk::Semaphore,
}

/// A window surface. The surface handle, format and render pass live as
/// long as the surface; the ring is replaced on resize.
pub(crate) struct Surface {
    window: Arc<dyn NativeWindow>,
    raw: vk::SurfaceKHR,
    format: vk::SurfaceFormatKHR,
    pub(crate) render_pass: vk::RenderPass,
    ring: Option<SwapchainRing>,
    state: SurfaceState,
}

impl Surface {
    /// Create the surface and its first ring. A window that is minimized at
    /// this point yields a `Stale` surface without a ring.
    pub fn new(device: &Device, window: Arc<dyn NativeWindow>) -> Result<Self> {
        let driver = device.driver();
        let raw = driver.create_surface(&window)?;

        let setup = driver.surface_format(raw).and_then(|format| {
            let render_pass =
                driver.create_render_pass(&[format.format], vk::ImageLayout::PRESENT_SRC_KHR)?;
            Ok((format, render_pass))
        });
        let (format, render_pass) = match setup {
            Ok(setup) => setup,
            Err(e) => {
                driver.destroy_surface(raw);
                return Err(e);
            }
        };

        let mut surface = Self {
            window,
            raw,
            format,
            render_pass,
            ring: None,
            state: SurfaceState::Stale,
        };
        if let Err(e) = surface.recreate(device) {
            surface.destroy(device);
            return Err(e);
        }
        Ok(surface)
    }

    pub fn state(&self) -> SurfaceState {
        self.state
    }

    pub fn raw(&self) -> vk::SurfaceKHR {
        self.raw
    }

    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    /// Ring extent, or zero while no ring exists.
    pub fn extent(&self) -> Extent2D {
        self.ring.as_ref().map_or(Extent2D::default(), |r| r.extent)
    }

    pub fn mark_stale(&mut self) {
        self.state = SurfaceState::Stale;
    }

    /// Replace the ring with one matching the window's current size.
    ///
    /// The device must be idle. Returns `false`, leaving the surface `Stale`
    /// without a ring, while the window has a zero client area. The window is
    /// asked first: the driver may still report the pre-minimize extent.
    pub fn recreate(&mut self, device: &Device) -> Result<bool> {
        if let Some(ring) = self.ring.take() {
            ring.destroy(device);
        }

        let desired = self.window.client_size();
        let ring = if desired.is_empty() {
            None
        } else {
            SwapchainRing::build(device, self.raw, self.format, self.render_pass, desired)?
        };
        match ring {
            Some(ring) => {
                tracing::debug!(
                    "Swapchain for {:?} built at {}x{} with {} images",
                    self.raw,
                    ring.extent.width,
                    ring.extent.height,
                    ring.images.len()
                );
                self.ring = Some(ring);
                self.state = SurfaceState::Live;
                Ok(true)
            }
            None => {
                tracing::debug!("Swapchain for {:?} deferred: window has no area", self.raw);
                self.state = SurfaceState::Stale;
                Ok(false)
            }
        }
    }

    /// Acquire the next presentable image. `None` marks the surface stale.
    pub fn acquire(&mut self, device: &Device) -> Result<Option<AcquiredImage>> {
        let Some(ring) = self.ring.as_ref() else {
            self.state = SurfaceState::Stale;
            return Ok(None);
        };

        match device
            .driver()
            .acquire_next_image(ring.swapchain, ring.acquire_semaphore)?
        {
            crate::backend::Acquire::Image { index, .. } => {
                let slot = index as usize;
                Ok(Some(AcquiredImage {
                    swapchain: ring.swapchain,
                    image_index: index,
                    image: ring.images[slot],
                    framebuffer: ring.framebuffers[slot],
                    extent: ring.extent,
                    acquire_semaphore: ring.acquire_semaphore,
                    submit_semaphore: ring.submit_semaphores[slot],
                }))
            }
            crate::backend::Acquire::Stale => {
                self.state = SurfaceState::Stale;
                Ok(None)
            }
        }
    }

    /// The device must be idle.
    pub fn destroy(mut self, device: &Device) {
        let driver = device.driver();
        if let Some(ring) = self.ring.take() {
            ring.destroy(device);
        }
        driver.destroy_render_pass(self.render_pass);
        driver.destroy_surface(self.raw);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::HeadlessWindow;

    #[test]
    fn minimized_windows_get_no_ring() {
        let device = Device::headless();
        let window = Arc::new(HeadlessWindow::new(0, 0));
        let mut surface = Surface::new(&device, window.clone()).unwrap();
        assert_eq!(surface.state(), SurfaceState::Stale);
        assert!(surface.acquire(&device).unwrap().is_none());

        window.resize(320, 200);
        assert!(surface.recreate(&device).unwrap());
        assert_eq!(surface.state(), SurfaceState::Live);
        assert_eq!(surface.extent(), Extent2D::new(320, 200));
        surface.destroy(&device);
        assert_eq!(device.headless_driver().unwrap().live_objects(), 0);
    }

    #[test]
    fn minimized_window_is_not_rebuilt_at_the_driver_extent() {
        let device = Device::headless();
        let window = Arc::new(HeadlessWindow::new(64, 64));
        let mut surface = Surface::new(&device, window.clone()).unwrap();
        let headless = device.headless_driver().unwrap();
        headless.pin_surface_extent(surface.raw(), Some(Extent2D::new(64, 64)));

        window.resize(0, 0);
        surface.mark_stale();
        assert!(!surface.recreate(&device).unwrap());
        assert_eq!(surface.state(), SurfaceState::Stale);
        assert!(surface.extent().is_empty());
        assert!(surface.acquire(&device).unwrap().is_none());

        headless.pin_surface_extent(surface.raw(), None);
        window.resize(48, 32);
        assert!(surface.recreate(&device).unwrap());
        assert_eq!(surface.extent(), Extent2D::new(48, 32));
        surface.destroy(&device);
        assert_eq!(headless.live_objects(), 0);
    }

    #[test]
    fn acquire_walks_the_ring() {
        let device = Device::headless();
        let window = Arc::new(HeadlessWindow::new(64, 64));
        let mut surface = Surface::new(&device, window.clone()).unwrap();

        let first = surface.acquire(&device).unwrap().unwrap();
        let second = surface.acquire(&device).unwrap().unwrap();
        assert_ne!(first.image_index, second.image_index);
        assert_ne!(first.submit_semaphore, second.submit_semaphore);
        assert_eq!(first.acquire_semaphore, second.acquire_semaphore);

        window.resize(32, 32);
        assert!(surface.recreate(&device).unwrap());
        let third = surface.acquire(&device).unwrap().unwrap();
        assert_ne!(third.acquire_semaphore, first.acquire_semaphore);

        window.resize(16, 16);
        assert!(surface.acquire(&device).unwrap().is_none());
        assert_eq!(surface.state(), SurfaceState::Stale);
    }

    #[test]
    fn recreation_keeps_render_pass_and_drops_old_ring() {
        let device = Device::headless();
        let window = Arc::new(HeadlessWindow::new(64, 64));
        let mut surface = Surface::new(&device, window.clone()).unwrap();
        let render_pass = surface.render_pass;
        let live = device.headless_driver().unwrap().live_objects();

        window.resize(128, 96);
        assert!(surface.recreate(&device).unwrap());
        assert_eq!(surface.render_pass, render_pass);
        assert_eq!(surface.extent(), Extent2D::new(128, 96));
        assert_eq!(device.headless_driver().unwrap().live_objects(), live);
    }
}
