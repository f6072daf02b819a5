//! Swapchain parameter selection shared by both drivers.

use ash::vk;
use whisker_core::Extent2D;

/// Pick the first 8-bit BGRA or RGBA UNORM format with sRGB-nonlinear color space.
pub(crate) fn select_surface_format(
    available: &[vk::SurfaceFormatKHR],
) -> Option<vk::SurfaceFormatKHR> {
    available.iter().copied().find(|f| {
        matches!(
            f.format,
            vk::Format::B8G8R8A8_UNORM | vk::Format::R8G8B8A8_UNORM
        ) && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
    })
}

/// One more image than the minimum, capped at the maximum (0 means unbounded).
pub(crate) fn image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 && count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        count
    }
}

/// Swapchain extent: the surface's current extent when defined, otherwise the
/// desired size clamped to the supported range.
///
/// Empty whenever `desired` is: some window systems keep reporting the last
/// size, or clamp to a 1x1 minimum, while the window is minimized.
pub(crate) fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    desired: Extent2D,
) -> Extent2D {
    if desired.is_empty() {
        Extent2D::default()
    } else if capabilities.current_extent.width != u32::MAX {
        Extent2D::new(
            capabilities.current_extent.width,
            capabilities.current_extent.height,
        )
    } else {
        Extent2D::new(
            desired.width.clamp(
                capabilities.min_image_extent.width,
                capabilities.max_image_extent.width,
            ),
            desired.height.clamp(
                capabilities.min_image_extent.height,
                capabilities.max_image_extent.height,
            ),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32), min_images: u32, max_images: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min_images,
            max_image_count: max_images,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn surface_format_requires_srgb_nonlinear() {
        let formats = [
            vk::SurfaceFormatKHR {
                format: vk::Format::B8G8R8A8_SRGB,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
            vk::SurfaceFormatKHR {
                format: vk::Format::R8G8B8A8_UNORM,
                color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
            },
        ];
        let chosen = select_surface_format(&formats).map(|f| f.format);
        assert_eq!(chosen, Some(vk::Format::R8G8B8A8_UNORM));

        let unsupported = [vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT,
        }];
        assert!(select_surface_format(&unsupported).is_none());
    }

    #[test]
    fn image_count_is_capped() {
        assert_eq!(image_count(&caps((1, 1), 2, 0)), 3);
        assert_eq!(image_count(&caps((1, 1), 2, 8)), 3);
        assert_eq!(image_count(&caps((1, 1), 3, 3)), 3);
    }

    #[test]
    fn extent_prefers_current_then_clamps() {
        let defined = caps((800, 600), 2, 3);
        assert_eq!(
            calculate_extent(&defined, Extent2D::new(10, 10)),
            Extent2D::new(800, 600)
        );

        let undefined = caps((u32::MAX, u32::MAX), 2, 3);
        assert_eq!(
            calculate_extent(&undefined, Extent2D::new(8000, 2)),
            Extent2D::new(4096, 2)
        );
    }

    #[test]
    fn minimized_windows_get_an_empty_extent() {
        let defined = caps((800, 600), 2, 3);
        assert!(calculate_extent(&defined, Extent2D::new(0, 0)).is_empty());

        let undefined = caps((u32::MAX, u32::MAX), 2, 3);
        assert!(calculate_extent(&undefined, Extent2D::new(0, 0)).is_empty());
        assert!(calculate_extent(&undefined, Extent2D::new(640, 0)).is_empty());
    }
}
