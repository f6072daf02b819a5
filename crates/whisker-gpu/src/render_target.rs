//! Offscreen render targets.

use crate::access::AccessState;
use crate::backend::{convert, Command};
use crate::device::Device;
use crate::error::{GpuError, Result, UsageError};
use crate::image::Image;
use ash::vk;
use slotmap::new_key_type;
use whisker_core::{ClearColor, Extent2D};

new_key_type! {
    pub(crate) struct RenderTargetKey;
}

/// A render pass and framebuffer over images it owns.
pub(crate) struct RenderTarget {
    images: Vec<Image>,
    pub(crate) render_pass: vk::RenderPass,
    framebuffer: vk::Framebuffer,
    extent: Extent2D,
}

fn validate(device: &Device, images: &[Image]) -> std::result::Result<Extent2D, UsageError> {
    let first = images.first().ok_or(UsageError::EmptyRenderTarget)?;
    for image in images {
        device.check(image.tag, "create_render_target", "image")?;
        if !image.desc().usage.render_target() {
            return Err(UsageError::NotARenderTargetImage);
        }
        if image.extent() != first.extent() {
            return Err(UsageError::MismatchedAttachments);
        }
    }
    Ok(first.extent())
}

impl RenderTarget {
    /// Takes ownership of `images`; they are destroyed if construction fails.
    pub fn new(device: &Device, images: Vec<Image>) -> Result<Self> {
        let extent = match validate(device, &images) {
            Ok(extent) => extent,
            Err(e) => {
                destroy_images(device, images);
                return Err(e.into());
            }
        };

        let driver = device.driver();
        let formats: Vec<vk::Format> = images
            .iter()
            .map(|i| convert::format(i.desc().format))
            .collect();
        let views: Vec<vk::ImageView> = images.iter().map(Image::view).collect();

        let render_pass =
            match driver.create_render_pass(&formats, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL) {
                Ok(render_pass) => render_pass,
                Err(e) => {
                    destroy_images(device, images);
                    return Err(e);
                }
            };
        let framebuffer = match driver.create_framebuffer(render_pass, &views, extent) {
            Ok(framebuffer) => framebuffer,
            Err(e) => {
                driver.destroy_render_pass(render_pass);
                destroy_images(device, images);
                return Err(e);
            }
        };

        tracing::debug!(
            "Created {}x{} render target with {} attachments",
            extent.width,
            extent.height,
            images.len()
        );
        Ok(Self {
            images,
            render_pass,
            framebuffer,
            extent,
        })
    }

    pub fn extent(&self) -> Extent2D {
        self.extent
    }

    pub fn attachment_count(&self) -> usize {
        self.images.len()
    }

    pub fn attachment(&self, index: usize) -> Result<&Image> {
        self.images
            .get(index)
            .ok_or(GpuError::InvalidUse(UsageError::NoSuchAttachment(index)))
    }

    /// Commands opening the pass. Missing clear colors repeat the last one
    /// given, or black.
    pub fn begin_commands(&self, clears: &[ClearColor]) -> [Command; 2] {
        let fallback = clears.last().copied().unwrap_or(ClearColor::BLACK);
        let clear_colors = (0..self.images.len())
            .map(|i| clears.get(i).copied().unwrap_or(fallback))
            .collect();
        [
            Command::BeginRenderPass {
                render_pass: self.render_pass,
                framebuffer: self.framebuffer,
                extent: self.extent,
                clear_colors,
            },
            Command::SetViewportScissor {
                extent: self.extent,
            },
        ]
    }

    /// The pass leaves every attachment as a color attachment.
    pub fn finish_pass(&self) {
        for image in &self.images {
            image.set_access_state(AccessState::COLOR_ATTACHMENT);
        }
    }

    pub fn destroy(self, device: &Device) -> Result<()> {
        let driver = device.driver();
        driver.destroy_framebuffer(self.framebuffer);
        driver.destroy_render_pass(self.render_pass);
        self.images
            .into_iter()
            .try_for_each(|image| image.destroy(device))
    }
}

fn destroy_images(device: &Device, images: Vec<Image>) {
    for image in images {
        if let Err(e) = image.destroy(device) {
            tracing::error!("Failed to release render target image: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whisker_core::{Format, ImageDesc};

    fn target_image(device: &Device, w: u32, h: u32) -> Image {
        Image::new(device, ImageDesc::render_target(w, h, Format::Rgba8Unorm), None).unwrap()
    }

    #[test]
    fn attachments_must_match() {
        let device = Device::headless();
        assert!(matches!(
            RenderTarget::new(&device, Vec::new()),
            Err(GpuError::InvalidUse(UsageError::EmptyRenderTarget))
        ));

        let images = vec![target_image(&device, 4, 4), target_image(&device, 8, 4)];
        assert!(matches!(
            RenderTarget::new(&device, images),
            Err(GpuError::InvalidUse(UsageError::MismatchedAttachments))
        ));

        let texture =
            Image::new(&device, ImageDesc::texture(4, 4, Format::Rgba8Unorm), None).unwrap();
        assert!(matches!(
            RenderTarget::new(&device, vec![texture]),
            Err(GpuError::InvalidUse(UsageError::NotARenderTargetImage))
        ));

        // Rejected images are released with the error.
        assert_eq!(device.headless_driver().unwrap().live_objects(), 0);
    }

    #[test]
    fn clear_colors_are_padded() {
        let device = Device::headless();
        let images = vec![target_image(&device, 2, 2), target_image(&device, 2, 2)];
        let target = RenderTarget::new(&device, images).unwrap();
        let red = ClearColor::rgba(1.0, 0.0, 0.0, 1.0);

        let [begin, viewport] = target.begin_commands(&[red]);
        match begin {
            Command::BeginRenderPass { clear_colors, .. } => assert_eq!(clear_colors, vec![red, red]),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            viewport,
            Command::SetViewportScissor {
                extent: Extent2D::new(2, 2)
            }
        );
        assert!(target.attachment(2).is_err());

        target.finish_pass();
        assert_eq!(
            target.attachment(1).unwrap().access_state(),
            AccessState::COLOR_ATTACHMENT
        );
        target.destroy(&device).unwrap();
        assert_eq!(device.headless_driver().unwrap().live_objects(), 0);
    }
}
