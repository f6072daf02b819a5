//! Resource descriptor types.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Graphics backend that owns a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Backend {
    /// Native Vulkan driver.
    Vulkan,
    /// In-process simulated driver with no GPU.
    Headless,
}

impl Backend {
    /// Human-readable backend name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Vulkan => "vulkan",
            Self::Headless => "headless",
        }
    }
}

/// Semantic version triple used for application/engine/API versions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

/// Size of a 2D surface in pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Extent2D {
    pub width: u32,
    pub height: u32,
}

impl Extent2D {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Returns true if either dimension is zero (e.g. a minimized window).
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Number of pixels covered.
    #[inline]
    pub const fn area(self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

impl From<(u32, u32)> for Extent2D {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

/// Pixel and vertex attribute formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Format {
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Rgba8Srgb,
    Bgra8Unorm,
    Bgra8Srgb,
    R32Uint,
    R32Sfloat,
    Rg32Sfloat,
    Rgb32Sfloat,
    Rgba32Sfloat,
}

impl Format {
    /// Size of one texel (or one vertex attribute) in bytes.
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::Rg8Unorm => 2,
            Self::Rgba8Unorm
            | Self::Rgba8Srgb
            | Self::Bgra8Unorm
            | Self::Bgra8Srgb
            | Self::R32Uint
            | Self::R32Sfloat => 4,
            Self::Rg32Sfloat => 8,
            Self::Rgb32Sfloat => 12,
            Self::Rgba32Sfloat => 16,
        }
    }

    /// Number of color channels.
    pub const fn channels(self) -> u32 {
        match self {
            Self::R8Unorm | Self::R32Uint | Self::R32Sfloat => 1,
            Self::Rg8Unorm | Self::Rg32Sfloat => 2,
            Self::Rgb32Sfloat => 3,
            Self::Rgba8Unorm
            | Self::Rgba8Srgb
            | Self::Bgra8Unorm
            | Self::Bgra8Srgb
            | Self::Rgba32Sfloat => 4,
        }
    }

    /// Returns true for sRGB-encoded formats.
    pub const fn is_srgb(self) -> bool {
        matches!(self, Self::Rgba8Srgb | Self::Bgra8Srgb)
    }

    /// Returns true if the blue channel is stored before red.
    pub const fn is_bgr(self) -> bool {
        matches!(self, Self::Bgra8Unorm | Self::Bgra8Srgb)
    }

    /// Byte size of a tightly packed `width` x `height` region.
    pub const fn region_size(self, extent: Extent2D) -> u64 {
        extent.area() * self.bytes_per_pixel() as u64
    }
}

/// What a buffer is bound as.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
    Storage,
}

impl BufferKind {
    /// Uniform and storage buffers carry a descriptor set.
    pub const fn has_descriptor(self) -> bool {
        matches!(self, Self::Uniform | Self::Storage)
    }
}

/// Element type of an index buffer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexType {
    U16,
    #[default]
    U32,
}

impl IndexType {
    /// Size of a single index in bytes.
    pub const fn size(self) -> u64 {
        match self {
            Self::U16 => 2,
            Self::U32 => 4,
        }
    }
}

/// Memory tiling of an image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageTiling {
    Linear,
    #[default]
    Optimal,
}

bitflags! {
    /// How an image will be used.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ImageUsage: u8 {
        /// Sampled from shaders through a texture binding.
        const TEXTURE       = 0b0000_0001;
        /// Rendered to as a color attachment of a render target.
        const RENDER_TARGET = 0b0000_0010;
    }
}

impl ImageUsage {
    #[inline]
    pub const fn texture(self) -> bool {
        self.contains(Self::TEXTURE)
    }

    #[inline]
    pub const fn render_target(self) -> bool {
        self.contains(Self::RENDER_TARGET)
    }
}

/// Parameters for creating an image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageDesc {
    pub extent: Extent2D,
    pub format: Format,
    pub tiling: ImageTiling,
    pub usage: ImageUsage,
}

impl ImageDesc {
    /// A sampled texture with optimal tiling.
    pub const fn texture(width: u32, height: u32, format: Format) -> Self {
        Self {
            extent: Extent2D::new(width, height),
            format,
            tiling: ImageTiling::Optimal,
            usage: ImageUsage::TEXTURE,
        }
    }

    /// A color attachment for offscreen rendering.
    pub const fn render_target(width: u32, height: u32, format: Format) -> Self {
        Self {
            extent: Extent2D::new(width, height),
            format,
            tiling: ImageTiling::Optimal,
            usage: ImageUsage::RENDER_TARGET,
        }
    }

    #[must_use]
    pub const fn with_usage(mut self, usage: ImageUsage) -> Self {
        self.usage = usage;
        self
    }

    #[must_use]
    pub const fn with_tiling(mut self, tiling: ImageTiling) -> Self {
        self.tiling = tiling;
        self
    }

    /// Byte size of the full image contents.
    pub const fn byte_size(&self) -> u64 {
        self.format.region_size(self.extent)
    }
}

/// Texel filtering mode.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Filter {
    Nearest,
    #[default]
    Linear,
}

/// Behavior when sampling outside `[0, 1]`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AddressMode {
    #[default]
    Repeat,
    MirroredRepeat,
    ClampToEdge,
    ClampToBorder,
}

/// Sampler parameters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SamplerDesc {
    pub mag_filter: Filter,
    pub min_filter: Filter,
    pub mip_filter: Filter,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    pub address_w: AddressMode,
}

impl SamplerDesc {
    /// Same filter for magnification, minification and mip selection.
    pub const fn uniform(filter: Filter, address: AddressMode) -> Self {
        Self {
            mag_filter: filter,
            min_filter: filter,
            mip_filter: filter,
            address_u: address,
            address_v: address,
            address_w: address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_sizes() {
        assert_eq!(Format::R8Unorm.bytes_per_pixel(), 1);
        assert_eq!(Format::Bgra8Srgb.bytes_per_pixel(), 4);
        assert_eq!(Format::Rgb32Sfloat.bytes_per_pixel(), 12);
        assert_eq!(
            Format::Rgba8Unorm.region_size(Extent2D::new(16, 8)),
            16 * 8 * 4
        );
    }

    #[test]
    fn empty_extent() {
        assert!(Extent2D::new(0, 600).is_empty());
        assert!(Extent2D::new(800, 0).is_empty());
        assert!(!Extent2D::new(1, 1).is_empty());
    }

    #[test]
    fn only_uniform_and_storage_have_descriptors() {
        assert!(!BufferKind::Vertex.has_descriptor());
        assert!(!BufferKind::Index.has_descriptor());
        assert!(BufferKind::Uniform.has_descriptor());
        assert!(BufferKind::Storage.has_descriptor());
    }

    #[test]
    fn image_usage_flags() {
        let usage = ImageUsage::TEXTURE | ImageUsage::RENDER_TARGET;
        assert!(usage.texture());
        assert!(usage.render_target());
        assert!(!ImageUsage::empty().texture());

        let desc = ImageDesc::texture(4, 4, Format::Rgba8Unorm);
        assert_eq!(desc.byte_size(), 64);
        assert!(!desc.usage.render_target());
    }
}
