//! Device memory through `gpu-allocator`.

use crate::backend::GpuBuffer;
use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;

/// Allocator wrapper that binds memory to buffers and images.
pub(crate) struct GpuAllocator {
    allocator: Option<Allocator>,
    device: ash::Device,
}

impl GpuAllocator {
    /// # Safety
    /// The instance, device and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: &ash::Device,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: device.clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            allocator: Some(allocator),
            device: device.clone(),
        })
    }

    fn inner(&mut self) -> Result<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator already shut down".to_string()))
    }

    pub fn create_buffer(
        &mut self,
        size: u64,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
        name: &str,
    ) -> Result<GpuBuffer> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = self.inner().and_then(|allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location,
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        if let Err(e) =
            unsafe { self.device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
        {
            self.release(allocation)?;
            unsafe { self.device.destroy_buffer(buffer, None) };
            return Err(e.into());
        }

        Ok(GpuBuffer {
            buffer,
            allocation: Some(allocation),
            size,
        })
    }

    pub fn free_buffer(&mut self, mut buffer: GpuBuffer) -> Result<()> {
        if let Some(allocation) = buffer.allocation.take() {
            self.release(allocation)?;
        }
        unsafe { self.device.destroy_buffer(buffer.buffer, None) };
        Ok(())
    }

    /// Create a device-local image and bind memory to it.
    pub fn create_image(
        &mut self,
        create_info: &vk::ImageCreateInfo<'_>,
        name: &str,
    ) -> Result<(vk::Image, Allocation)> {
        let image = unsafe { self.device.create_image(create_info, None)? };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = self.inner().and_then(|allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: create_info.tiling == vk::ImageTiling::LINEAR,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(|e| GpuError::AllocationFailed(e.to_string()))
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        if let Err(e) =
            unsafe { self.device.bind_image_memory(image, allocation.memory(), allocation.offset()) }
        {
            self.release(allocation)?;
            unsafe { self.device.destroy_image(image, None) };
            return Err(e.into());
        }

        Ok((image, allocation))
    }

    pub fn free_image(&mut self, image: vk::Image, allocation: Option<Allocation>) -> Result<()> {
        if let Some(allocation) = allocation {
            self.release(allocation)?;
        }
        unsafe { self.device.destroy_image(image, None) };
        Ok(())
    }

    fn release(&mut self, allocation: Allocation) -> Result<()> {
        self.inner()?
            .free(allocation)
            .map_err(|e| GpuError::AllocationFailed(e.to_string()))
    }

    /// Free every remaining allocation. Must run before the device is destroyed.
    pub fn shutdown(&mut self) {
        if let Some(allocator) = self.allocator.take() {
            drop(allocator);
        }
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Byte range `[offset, offset + len)` of a host-visible buffer's mapping.
fn mapped_range(buffer: &GpuBuffer, offset: u64, len: usize) -> Result<std::ops::Range<usize>> {
    let end = offset
        .checked_add(len as u64)
        .ok_or_else(|| GpuError::InvalidState("Offset overflow".to_string()))?;
    if end > buffer.size {
        return Err(GpuError::InvalidState(
            "Data range too large for buffer".to_string(),
        ));
    }
    Ok(offset as usize..end as usize)
}

pub(crate) fn write_mapped(buffer: &GpuBuffer, offset: u64, data: &[u8]) -> Result<()> {
    let range = mapped_range(buffer, offset, data.len())?;
    let ptr = buffer
        .allocation
        .as_ref()
        .and_then(|a| a.mapped_ptr())
        .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;
    // In bounds of the mapping: `range` was checked against the buffer size.
    unsafe {
        std::ptr::copy_nonoverlapping(
            data.as_ptr(),
            ptr.as_ptr().cast::<u8>().add(range.start),
            data.len(),
        );
    }
    Ok(())
}

pub(crate) fn read_mapped(buffer: &GpuBuffer, offset: u64, out: &mut [u8]) -> Result<()> {
    let range = mapped_range(buffer, offset, out.len())?;
    let mapped = buffer
        .allocation
        .as_ref()
        .and_then(|a| a.mapped_slice())
        .ok_or_else(|| GpuError::InvalidState("Buffer not mapped".to_string()))?;
    out.copy_from_slice(&mapped[range]);
    Ok(())
}
