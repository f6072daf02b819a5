//! Translation of backend-neutral types into Vulkan enums.

use ash::vk;
use whisker_core::{
    AddressMode, BindingKind, BufferKind, CullMode, Filter, Format, FrontFace, ImageTiling,
    ImageUsage, IndexType, ShaderStage, Topology, VertexInputRate,
};

pub(crate) const fn format(format: Format) -> vk::Format {
    match format {
        Format::R8Unorm => vk::Format::R8_UNORM,
        Format::Rg8Unorm => vk::Format::R8G8_UNORM,
        Format::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        Format::Rgba8Srgb => vk::Format::R8G8B8A8_SRGB,
        Format::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        Format::Bgra8Srgb => vk::Format::B8G8R8A8_SRGB,
        Format::R32Uint => vk::Format::R32_UINT,
        Format::R32Sfloat => vk::Format::R32_SFLOAT,
        Format::Rg32Sfloat => vk::Format::R32G32_SFLOAT,
        Format::Rgb32Sfloat => vk::Format::R32G32B32_SFLOAT,
        Format::Rgba32Sfloat => vk::Format::R32G32B32A32_SFLOAT,
    }
}

pub(crate) fn format_from_vk(format: vk::Format) -> Option<Format> {
    Some(match format {
        vk::Format::R8_UNORM => Format::R8Unorm,
        vk::Format::R8G8_UNORM => Format::Rg8Unorm,
        vk::Format::R8G8B8A8_UNORM => Format::Rgba8Unorm,
        vk::Format::R8G8B8A8_SRGB => Format::Rgba8Srgb,
        vk::Format::B8G8R8A8_UNORM => Format::Bgra8Unorm,
        vk::Format::B8G8R8A8_SRGB => Format::Bgra8Srgb,
        vk::Format::R32_UINT => Format::R32Uint,
        vk::Format::R32_SFLOAT => Format::R32Sfloat,
        vk::Format::R32G32_SFLOAT => Format::Rg32Sfloat,
        vk::Format::R32G32B32_SFLOAT => Format::Rgb32Sfloat,
        vk::Format::R32G32B32A32_SFLOAT => Format::Rgba32Sfloat,
        _ => return None,
    })
}

pub(crate) fn buffer_usage(kind: BufferKind) -> vk::BufferUsageFlags {
    let base = vk::BufferUsageFlags::TRANSFER_DST | vk::BufferUsageFlags::TRANSFER_SRC;
    base | match kind {
        BufferKind::Vertex => vk::BufferUsageFlags::VERTEX_BUFFER,
        BufferKind::Index => vk::BufferUsageFlags::INDEX_BUFFER,
        BufferKind::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
        BufferKind::Storage => vk::BufferUsageFlags::STORAGE_BUFFER,
    }
}

pub(crate) fn image_usage(usage: ImageUsage) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::TRANSFER_SRC | vk::ImageUsageFlags::TRANSFER_DST;
    if usage.texture() {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.render_target() {
        flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    flags
}

pub(crate) const fn tiling(tiling: ImageTiling) -> vk::ImageTiling {
    match tiling {
        ImageTiling::Linear => vk::ImageTiling::LINEAR,
        ImageTiling::Optimal => vk::ImageTiling::OPTIMAL,
    }
}

pub(crate) const fn index_type(index_type: IndexType) -> vk::IndexType {
    match index_type {
        IndexType::U16 => vk::IndexType::UINT16,
        IndexType::U32 => vk::IndexType::UINT32,
    }
}

pub(crate) const fn descriptor_type(kind: BindingKind) -> vk::DescriptorType {
    match kind {
        BindingKind::Texture => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        BindingKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        BindingKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
    }
}

pub(crate) fn descriptor_stages(kind: BindingKind) -> vk::ShaderStageFlags {
    match kind {
        BindingKind::Texture => vk::ShaderStageFlags::FRAGMENT,
        BindingKind::UniformBuffer | BindingKind::StorageBuffer => {
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT
        }
    }
}

pub(crate) const fn filter(filter: Filter) -> vk::Filter {
    match filter {
        Filter::Nearest => vk::Filter::NEAREST,
        Filter::Linear => vk::Filter::LINEAR,
    }
}

pub(crate) const fn mipmap_mode(filter: Filter) -> vk::SamplerMipmapMode {
    match filter {
        Filter::Nearest => vk::SamplerMipmapMode::NEAREST,
        Filter::Linear => vk::SamplerMipmapMode::LINEAR,
    }
}

pub(crate) const fn address_mode(mode: AddressMode) -> vk::SamplerAddressMode {
    match mode {
        AddressMode::Repeat => vk::SamplerAddressMode::REPEAT,
        AddressMode::MirroredRepeat => vk::SamplerAddressMode::MIRRORED_REPEAT,
        AddressMode::ClampToEdge => vk::SamplerAddressMode::CLAMP_TO_EDGE,
        AddressMode::ClampToBorder => vk::SamplerAddressMode::CLAMP_TO_BORDER,
    }
}

pub(crate) const fn shader_stage(stage: ShaderStage) -> vk::ShaderStageFlags {
    match stage {
        ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
        ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
    }
}

pub(crate) const fn topology(topology: Topology) -> vk::PrimitiveTopology {
    match topology {
        Topology::PointList => vk::PrimitiveTopology::POINT_LIST,
        Topology::LineList => vk::PrimitiveTopology::LINE_LIST,
        Topology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
        Topology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
        Topology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
    }
}

pub(crate) const fn cull_mode(mode: CullMode) -> vk::CullModeFlags {
    match mode {
        CullMode::None => vk::CullModeFlags::NONE,
        CullMode::Front => vk::CullModeFlags::FRONT,
        CullMode::Back => vk::CullModeFlags::BACK,
        CullMode::Both => vk::CullModeFlags::FRONT_AND_BACK,
    }
}

pub(crate) const fn front_face(face: FrontFace) -> vk::FrontFace {
    match face {
        FrontFace::Clockwise => vk::FrontFace::CLOCKWISE,
        FrontFace::CounterClockwise => vk::FrontFace::COUNTER_CLOCKWISE,
    }
}

pub(crate) const fn input_rate(rate: VertexInputRate) -> vk::VertexInputRate {
    match rate {
        VertexInputRate::Vertex => vk::VertexInputRate::VERTEX,
        VertexInputRate::Instance => vk::VertexInputRate::INSTANCE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_round_trip() {
        for f in [
            Format::R8Unorm,
            Format::Rgba8Srgb,
            Format::Bgra8Unorm,
            Format::Rgb32Sfloat,
        ] {
            assert_eq!(format_from_vk(format(f)), Some(f));
        }
        assert_eq!(format_from_vk(vk::Format::D32_SFLOAT), None);
    }

    #[test]
    fn buffers_are_always_transfer_capable() {
        let usage = buffer_usage(BufferKind::Vertex);
        assert!(usage.contains(vk::BufferUsageFlags::TRANSFER_DST));
        assert!(usage.contains(vk::BufferUsageFlags::VERTEX_BUFFER));
        assert!(!usage.contains(vk::BufferUsageFlags::INDEX_BUFFER));
    }

    #[test]
    fn image_usage_follows_flags() {
        let flags = image_usage(ImageUsage::TEXTURE);
        assert!(flags.contains(vk::ImageUsageFlags::SAMPLED));
        assert!(!flags.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));

        let flags = image_usage(ImageUsage::RENDER_TARGET);
        assert!(flags.contains(vk::ImageUsageFlags::COLOR_ATTACHMENT));
    }
}
