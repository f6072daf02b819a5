//! Device-local buffers and the staged copy path.

use crate::backend::convert;
use crate::backend::{Command, GpuBuffer};
use crate::device::{Device, ObjectTag};
use crate::error::{Result, UsageError};
use ash::vk;
use gpu_allocator::MemoryLocation;
use whisker_core::{BindingKind, BufferKind};

/// A device-local buffer.
///
/// Uniform and storage buffers own a descriptor set covering the whole
/// buffer, allocated here and freed by [`Context::destroy_buffer`].
///
/// [`Context::destroy_buffer`]: crate::Context::destroy_buffer
pub struct Buffer {
    pub(crate) tag: ObjectTag,
    kind: BufferKind,
    raw: GpuBuffer,
    pub(crate) descriptor: Option<vk::DescriptorSet>,
}

fn binding_kind(kind: BufferKind) -> Option<BindingKind> {
    match kind {
        BufferKind::Uniform => Some(BindingKind::UniformBuffer),
        BufferKind::Storage => Some(BindingKind::StorageBuffer),
        BufferKind::Vertex | BufferKind::Index => None,
    }
}

impl Buffer {
    pub(crate) fn new(device: &Device, kind: BufferKind, size: u64) -> Result<Self> {
        if size == 0 {
            return Err(UsageError::ZeroSized { object: "buffer" }.into());
        }
        let driver = device.driver();
        let raw = driver.create_buffer(
            size,
            convert::buffer_usage(kind),
            MemoryLocation::GpuOnly,
            "buffer",
        )?;

        let descriptor = match binding_kind(kind) {
            Some(binding) => match driver.allocate_descriptor_set(binding) {
                Ok(set) => {
                    driver.write_buffer_descriptor(set, binding, raw.buffer, size);
                    Some(set)
                }
                Err(e) => {
                    driver.destroy_buffer(raw)?;
                    return Err(e);
                }
            },
            None => None,
        };

        tracing::debug!("Created {:?} buffer of {} bytes", kind, size);
        Ok(Self {
            tag: device.tag(),
            kind,
            raw,
            descriptor,
        })
    }

    pub fn kind(&self) -> BufferKind {
        self.kind
    }

    pub fn size(&self) -> u64 {
        self.raw.size
    }

    /// Native handle.
    pub fn handle(&self) -> vk::Buffer {
        self.raw.buffer
    }

    pub(crate) fn check_range(&self, offset: u64, len: u64) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.raw.size => Ok(()),
            _ => Err(UsageError::CopyOutOfBounds {
                offset,
                len,
                capacity: self.raw.size,
            }
            .into()),
        }
    }

    /// Upload through a host-visible staging buffer. Blocks until the copy
    /// has completed on the device.
    pub(crate) fn write(&self, device: &Device, offset: u64, data: &[u8]) -> Result<()> {
        let len = data.len() as u64;
        self.check_range(offset, len)?;
        if len == 0 {
            return Ok(());
        }

        let driver = device.driver();
        let staging = driver.create_buffer(
            len,
            vk::BufferUsageFlags::TRANSFER_SRC,
            MemoryLocation::CpuToGpu,
            "staging upload",
        )?;
        let copied = driver.write_mapped(&staging, 0, data).and_then(|()| {
            device.one_shot(&[Command::CopyBuffer {
                src: staging.buffer,
                dst: self.raw.buffer,
                src_offset: 0,
                dst_offset: offset,
                size: len,
            }])
        });
        let freed = driver.destroy_buffer(staging);
        copied.and(freed)
    }

    /// Download `len` bytes at `offset` through a staging buffer.
    pub(crate) fn read(&self, device: &Device, offset: u64, len: u64) -> Result<Vec<u8>> {
        self.check_range(offset, len)?;
        if len == 0 {
            return Ok(Vec::new());
        }

        let driver = device.driver();
        let staging = driver.create_buffer(
            len,
            vk::BufferUsageFlags::TRANSFER_DST,
            MemoryLocation::GpuToCpu,
            "staging readback",
        )?;
        let mut out = vec![0; len as usize];
        let copied = device
            .one_shot(&[Command::CopyBuffer {
                src: self.raw.buffer,
                dst: staging.buffer,
                src_offset: offset,
                dst_offset: 0,
                size: len,
            }])
            .and_then(|()| driver.read_mapped(&staging, 0, &mut out));
        let freed = driver.destroy_buffer(staging);
        copied.and(freed).map(|()| out)
    }

    pub(crate) fn destroy(self, device: &Device) -> Result<()> {
        let driver = device.driver();
        if let Some(set) = self.descriptor {
            driver.free_descriptor_set(set)?;
        }
        driver.destroy_buffer(self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_uniform_and_storage_buffers_get_descriptors() {
        let device = Device::headless();
        for kind in [
            BufferKind::Vertex,
            BufferKind::Index,
            BufferKind::Uniform,
            BufferKind::Storage,
        ] {
            let buffer = Buffer::new(&device, kind, 64).unwrap();
            assert_eq!(buffer.descriptor.is_some(), kind.has_descriptor());
            buffer.destroy(&device).unwrap();
        }
        assert_eq!(device.headless_driver().unwrap().live_objects(), 0);
    }

    #[test]
    fn staged_write_lands_at_offset() {
        let device = Device::headless();
        let buffer = Buffer::new(&device, BufferKind::Vertex, 8).unwrap();
        buffer.write(&device, 2, &[7, 8, 9]).unwrap();

        let headless = device.headless_driver().unwrap();
        assert_eq!(
            headless.buffer_contents(buffer.handle()).unwrap(),
            vec![0, 0, 7, 8, 9, 0, 0, 0]
        );
        assert_eq!(buffer.read(&device, 2, 3).unwrap(), vec![7, 8, 9]);

        // Staging buffers and one-shot command buffers are gone again.
        assert_eq!(headless.live_objects(), 1);
        buffer.destroy(&device).unwrap();
    }

    #[test]
    fn out_of_bounds_copies_are_rejected() {
        let device = Device::headless();
        let buffer = Buffer::new(&device, BufferKind::Storage, 4).unwrap();
        let err = buffer.write(&device, 2, &[0; 4]).unwrap_err();
        assert!(matches!(
            err,
            crate::GpuError::InvalidUse(UsageError::CopyOutOfBounds {
                offset: 2,
                len: 4,
                capacity: 4
            })
        ));
        assert!(buffer.read(&device, u64::MAX, 1).is_err());
    }

    #[test]
    fn zero_sized_buffers_are_rejected() {
        let device = Device::headless();
        assert!(matches!(
            Buffer::new(&device, BufferKind::Index, 0),
            Err(crate::GpuError::InvalidUse(UsageError::ZeroSized { .. }))
        ));
    }
}
