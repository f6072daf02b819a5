//! Descriptor pool and the per-kind set layouts.

use crate::backend::convert;
use crate::error::Result;
use ash::vk;
use whisker_core::BindingKind;

/// Sets of each kind the pool can hold at once.
pub(crate) const SETS_PER_KIND: u32 = 1024;

/// One pool for the whole device plus a single-binding layout per
/// [`BindingKind`], all at binding 0.
pub(crate) struct Descriptors {
    pool: vk::DescriptorPool,
    layouts: [vk::DescriptorSetLayout; BindingKind::ALL.len()],
}

impl Descriptors {
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device) -> Result<Self> {
        let pool_sizes: Vec<vk::DescriptorPoolSize> = BindingKind::ALL
            .iter()
            .map(|&kind| vk::DescriptorPoolSize {
                ty: convert::descriptor_type(kind),
                descriptor_count: SETS_PER_KIND,
            })
            .collect();
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(SETS_PER_KIND)
            .pool_sizes(&pool_sizes);
        let pool = device.create_descriptor_pool(&pool_info, None)?;

        let mut layouts = [vk::DescriptorSetLayout::null(); BindingKind::ALL.len()];
        for kind in BindingKind::ALL {
            let binding = vk::DescriptorSetLayoutBinding::default()
                .binding(0)
                .descriptor_type(convert::descriptor_type(kind))
                .descriptor_count(1)
                .stage_flags(convert::descriptor_stages(kind));
            let info = vk::DescriptorSetLayoutCreateInfo::default()
                .bindings(std::slice::from_ref(&binding));
            match device.create_descriptor_set_layout(&info, None) {
                Ok(layout) => layouts[kind.index()] = layout,
                Err(e) => {
                    for layout in layouts.iter().filter(|l| **l != vk::DescriptorSetLayout::null()) {
                        device.destroy_descriptor_set_layout(*layout, None);
                    }
                    device.destroy_descriptor_pool(pool, None);
                    return Err(e.into());
                }
            }
        }

        Ok(Self { pool, layouts })
    }

    pub fn layout(&self, kind: BindingKind) -> vk::DescriptorSetLayout {
        self.layouts[kind.index()]
    }

    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate(
        &self,
        device: &ash::Device,
        kind: BindingKind,
    ) -> Result<vk::DescriptorSet> {
        let layouts = [self.layout(kind)];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);
        let sets = device.allocate_descriptor_sets(&info)?;
        sets.into_iter()
            .next()
            .ok_or(crate::error::GpuError::Vulkan(vk::Result::ERROR_OUT_OF_POOL_MEMORY))
    }

    /// # Safety
    /// The set must come from this pool and not be in use.
    pub unsafe fn free(&self, device: &ash::Device, set: vk::DescriptorSet) -> Result<()> {
        device.free_descriptor_sets(self.pool, &[set])?;
        Ok(())
    }

    /// # Safety
    /// The set and buffer must be valid.
    pub unsafe fn write_buffer(
        device: &ash::Device,
        set: vk::DescriptorSet,
        kind: BindingKind,
        buffer: vk::Buffer,
        range: u64,
    ) {
        let info = vk::DescriptorBufferInfo::default()
            .buffer(buffer)
            .offset(0)
            .range(range);
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(convert::descriptor_type(kind))
            .buffer_info(std::slice::from_ref(&info));
        device.update_descriptor_sets(&[write], &[]);
    }

    /// # Safety
    /// The set, view and sampler must be valid.
    pub unsafe fn write_image(
        device: &ash::Device,
        set: vk::DescriptorSet,
        view: vk::ImageView,
        sampler: vk::Sampler,
    ) {
        let info = vk::DescriptorImageInfo::default()
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
            .image_view(view)
            .sampler(sampler);
        let write = vk::WriteDescriptorSet::default()
            .dst_set(set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
            .image_info(std::slice::from_ref(&info));
        device.update_descriptor_sets(&[write], &[]);
    }

    /// # Safety
    /// No set from the pool may still be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        for layout in self.layouts {
            device.destroy_descriptor_set_layout(layout, None);
        }
        device.destroy_descriptor_pool(self.pool, None);
    }
}
