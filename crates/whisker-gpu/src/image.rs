//! Device-local images, their access-state bookkeeping and staged copies.

use crate::access::AccessState;
use crate::backend::{Command, GpuImage};
use crate::device::{Device, ObjectTag};
use crate::error::{Result, UsageError};
use crate::sampler::Sampler;
use ash::vk;
use gpu_allocator::MemoryLocation;
use std::cell::Cell;
use whisker_core::{BindingKind, Extent2D, ImageDesc};

/// Push the barrier moving `image` from `*current` to `to` and update
/// `*current`. Pushes nothing when the states already match.
pub(crate) fn push_transition(
    image: vk::Image,
    current: &mut AccessState,
    to: AccessState,
    out: &mut Vec<Command>,
) {
    if *current == to {
        return;
    }
    out.push(Command::ImageBarrier {
        image,
        from: *current,
        to,
    });
    *current = to;
}

/// Where an image goes back to after a transfer: its prior state, or the
/// transfer state itself when the prior state is `UNDEFINED`.
fn restore_target(prior: AccessState, transfer: AccessState) -> AccessState {
    if prior.is_valid_target() {
        prior
    } else {
        transfer
    }
}

/// A device-local 2D image with one view.
///
/// Created with texture usage and a sampler, it also owns a descriptor set
/// and starts out ready for sampling.
pub struct Image {
    pub(crate) tag: ObjectTag,
    desc: ImageDesc,
    raw: GpuImage,
    pub(crate) descriptor: Option<vk::DescriptorSet>,
    state: Cell<AccessState>,
}

impl Image {
    pub(crate) fn new(device: &Device, desc: ImageDesc, sampler: Option<&Sampler>) -> Result<Self> {
        if desc.extent.is_empty() {
            return Err(UsageError::ZeroSized { object: "image" }.into());
        }
        if let Some(sampler) = sampler {
            device.check(sampler.tag, "create_image", "sampler")?;
        }

        let driver = device.driver();
        let raw = driver.create_image(&desc, "image")?;
        let image = Self {
            tag: device.tag(),
            desc,
            raw,
            descriptor: None,
            state: Cell::new(AccessState::UNDEFINED),
        };

        match sampler {
            Some(sampler) if desc.usage.texture() => {
                let result = driver
                    .allocate_descriptor_set(BindingKind::Texture)
                    .and_then(|set| {
                        driver.write_image_descriptor(set, image.raw.view, sampler.raw);
                        Ok(set)
                    });
                let mut image = image;
                match result {
                    Ok(set) => image.descriptor = Some(set),
                    Err(e) => {
                        image.destroy(device)?;
                        return Err(e);
                    }
                }
                if let Err(e) = image.transition(device, AccessState::SHADER_READ) {
                    image.destroy(device)?;
                    return Err(e);
                }
                tracing::debug!(
                    "Created {}x{} {:?} texture",
                    desc.extent.width,
                    desc.extent.height,
                    desc.format
                );
                Ok(image)
            }
            _ => {
                if sampler.is_some() {
                    tracing::debug!("Sampler ignored for an image without texture usage");
                }
                tracing::debug!(
                    "Created {}x{} {:?} image",
                    desc.extent.width,
                    desc.extent.height,
                    desc.format
                );
                Ok(image)
            }
        }
    }

    pub fn desc(&self) -> &ImageDesc {
        &self.desc
    }

    pub fn extent(&self) -> Extent2D {
        self.desc.extent
    }

    /// Native handle.
    pub fn handle(&self) -> vk::Image {
        self.raw.image
    }

    pub(crate) fn view(&self) -> vk::ImageView {
        self.raw.view
    }

    /// Access state the image is currently tracked in.
    pub fn access_state(&self) -> AccessState {
        self.state.get()
    }

    pub(crate) fn set_access_state(&self, state: AccessState) {
        self.state.set(state);
    }

    /// Barrier commands to reach `to`; the tracked state is updated.
    pub(crate) fn transition_commands(&self, to: AccessState) -> Result<Vec<Command>> {
        if !to.is_valid_target() {
            return Err(UsageError::InvalidTransitionTarget.into());
        }
        let mut state = self.state.get();
        let mut commands = Vec::new();
        push_transition(self.raw.image, &mut state, to, &mut commands);
        self.state.set(state);
        Ok(commands)
    }

    /// Move to `to` through a one-shot command buffer.
    pub(crate) fn transition(&self, device: &Device, to: AccessState) -> Result<()> {
        let prior = self.state.get();
        let commands = self.transition_commands(to)?;
        if commands.is_empty() {
            return Ok(());
        }
        device.one_shot(&commands).inspect_err(|_| self.state.set(prior))
    }

    /// Upload a tightly packed `width` x `height` region at the origin.
    pub(crate) fn write(&self, device: &Device, width: u32, height: u32, data: &[u8]) -> Result<()> {
        let region = Extent2D::new(width, height);
        if region.is_empty() {
            return Err(UsageError::ZeroSized { object: "image region" }.into());
        }
        let expected = self.desc.format.region_size(region);
        if width > self.desc.extent.width || height > self.desc.extent.height {
            return Err(UsageError::CopyOutOfBounds {
                offset: 0,
                len: expected,
                capacity: self.desc.byte_size(),
            }
            .into());
        }
        if data.len() as u64 != expected {
            return Err(UsageError::ImageDataSize {
                expected,
                actual: data.len() as u64,
            }
            .into());
        }

        let driver = device.driver();
        let staging = driver.create_buffer(
            expected,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "staging image upload",
        )?;

        let prior = self.state.get();
        let mut state = prior;
        let mut commands = Vec::with_capacity(3);
        push_transition(self.raw.image, &mut state, AccessState::TRANSFER_DST, &mut commands);
        commands.push(Command::CopyBufferToImage {
            src: staging.buffer,
            dst: self.raw.image,
            extent: region,
        });
        push_transition(
            self.raw.image,
            &mut state,
            restore_target(prior, AccessState::TRANSFER_DST),
            &mut commands,
        );

        let copied = driver
            .write_mapped(&staging, 0, data)
            .and_then(|()| device.one_shot(&commands));
        if copied.is_ok() {
            self.state.set(state);
        }
        let freed = driver.destroy_buffer(staging);
        copied.and(freed)
    }

    /// Download the whole image, tightly packed.
    pub(crate) fn read(&self, device: &Device) -> Result<Vec<u8>> {
        let size = self.desc.byte_size();
        let driver = device.driver();
        let staging = driver.create_buffer(
            size,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            "staging image readback",
        )?;

        let prior = self.state.get();
        let mut state = prior;
        let mut commands = Vec::with_capacity(3);
        push_transition(self.raw.image, &mut state, AccessState::TRANSFER_SRC, &mut commands);
        commands.push(Command::CopyImageToBuffer {
            src: self.raw.image,
            dst: staging.buffer,
            extent: self.desc.extent,
        });
        push_transition(
            self.raw.image,
            &mut state,
            restore_target(prior, AccessState::TRANSFER_SRC),
            &mut commands,
        );

        let mut out = vec![0; size as usize];
        let copied = device
            .one_shot(&commands)
            .and_then(|()| driver.read_mapped(&staging, 0, &mut out));
        if copied.is_ok() {
            self.state.set(state);
        }
        let freed = driver.destroy_buffer(staging);
        copied.and(freed).map(|()| out)
    }

    pub(crate) fn destroy(self, device: &Device) -> Result<()> {
        let driver = device.driver();
        if let Some(set) = self.descriptor {
            driver.free_descriptor_set(set)?;
        }
        driver.destroy_image(self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use whisker_core::{Format, ImageUsage, SamplerDesc};

    fn barriers(device: &Device) -> usize {
        device.headless_driver().unwrap().barrier_count()
    }

    #[test]
    fn transition_to_current_state_emits_nothing() {
        let device = Device::headless();
        let image = Image::new(&device, ImageDesc::texture(4, 4, Format::Rgba8Unorm), None).unwrap();
        assert_eq!(image.access_state(), AccessState::UNDEFINED);

        image.transition(&device, AccessState::SHADER_READ).unwrap();
        image.transition(&device, AccessState::SHADER_READ).unwrap();
        assert_eq!(barriers(&device), 1);
        assert_eq!(image.access_state(), AccessState::SHADER_READ);

        assert!(image.transition_commands(AccessState::UNDEFINED).is_err());
        image.destroy(&device).unwrap();
    }

    #[test]
    fn textures_start_ready_for_sampling() {
        let device = Device::headless();
        let sampler = Sampler::new(&device, SamplerDesc::default()).unwrap();
        let image = Image::new(
            &device,
            ImageDesc::texture(2, 2, Format::Rgba8Unorm),
            Some(&sampler),
        )
        .unwrap();
        assert!(image.descriptor.is_some());
        assert_eq!(image.access_state(), AccessState::SHADER_READ);
        assert_eq!(barriers(&device), 1);

        let plain = Image::new(
            &device,
            ImageDesc::render_target(2, 2, Format::Rgba8Unorm),
            Some(&sampler),
        )
        .unwrap();
        assert!(plain.descriptor.is_none());

        image.destroy(&device).unwrap();
        plain.destroy(&device).unwrap();
        sampler.destroy(&device);
        assert_eq!(device.headless_driver().unwrap().live_objects(), 0);
    }

    #[test]
    fn write_restores_the_prior_state() {
        let device = Device::headless();
        let sampler = Sampler::new(&device, SamplerDesc::default()).unwrap();
        let image = Image::new(
            &device,
            ImageDesc::texture(2, 2, Format::R8Unorm),
            Some(&sampler),
        )
        .unwrap();
        let before = barriers(&device);

        image.write(&device, 2, 2, &[1, 2, 3, 4]).unwrap();
        assert_eq!(barriers(&device) - before, 2);
        assert_eq!(image.access_state(), AccessState::SHADER_READ);
        assert_eq!(image.read(&device).unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(image.access_state(), AccessState::SHADER_READ);
    }

    #[test]
    fn write_from_undefined_stays_in_transfer_dst() {
        let device = Device::headless();
        let desc = ImageDesc::texture(2, 1, Format::Rg8Unorm).with_usage(ImageUsage::empty());
        let image = Image::new(&device, desc, None).unwrap();

        image.write(&device, 1, 1, &[9, 9]).unwrap();
        assert_eq!(image.access_state(), AccessState::TRANSFER_DST);
        assert_eq!(barriers(&device), 1);
        assert_eq!(
            device
                .headless_driver()
                .unwrap()
                .image_contents(image.handle())
                .unwrap(),
            vec![9, 9, 0, 0]
        );
    }

    #[test]
    fn write_validates_region_and_length() {
        let device = Device::headless();
        let image = Image::new(&device, ImageDesc::texture(2, 2, Format::Rgba8Unorm), None).unwrap();
        assert!(matches!(
            image.write(&device, 2, 2, &[0; 15]),
            Err(crate::GpuError::InvalidUse(UsageError::ImageDataSize {
                expected: 16,
                actual: 15
            }))
        ));
        assert!(matches!(
            image.write(&device, 3, 1, &[0; 12]),
            Err(crate::GpuError::InvalidUse(UsageError::CopyOutOfBounds { .. }))
        ));
        assert_eq!(image.access_state(), AccessState::UNDEFINED);
    }
}
