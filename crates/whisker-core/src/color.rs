//! Clear colors.

use bytemuck::{Pod, Zeroable};
use glam::Vec4;
use serde::{Deserialize, Serialize};

/// Linear RGBA color used to clear color attachments.
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
#[repr(C)]
pub struct ClearColor {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl ClearColor {
    pub const BLACK: Self = Self::rgba(0.0, 0.0, 0.0, 1.0);
    pub const TRANSPARENT: Self = Self::rgba(0.0, 0.0, 0.0, 0.0);
    pub const WHITE: Self = Self::rgba(1.0, 1.0, 1.0, 1.0);

    pub const fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Build an opaque color from hue (degrees), saturation and value in `[0, 1]`.
    pub fn from_hsv(hue: f32, saturation: f32, value: f32) -> Self {
        let h = hue.rem_euclid(360.0) / 60.0;
        let chroma = value * saturation;
        let x = chroma * (1.0 - (h % 2.0 - 1.0).abs());
        let m = value - chroma;

        // Truncation picks the hue sector 0..=5.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let (r, g, b) = match h as u32 {
            0 => (chroma, x, 0.0),
            1 => (x, chroma, 0.0),
            2 => (0.0, chroma, x),
            3 => (0.0, x, chroma),
            4 => (x, 0.0, chroma),
            _ => (chroma, 0.0, x),
        };

        Self::rgba(r + m, g + m, b + m, 1.0)
    }

    pub const fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }
}

impl From<[f32; 4]> for ClearColor {
    fn from([r, g, b, a]: [f32; 4]) -> Self {
        Self { r, g, b, a }
    }
}

impl From<Vec4> for ClearColor {
    fn from(v: Vec4) -> Self {
        Self::rgba(v.x, v.y, v.z, v.w)
    }
}

impl From<ClearColor> for Vec4 {
    fn from(c: ClearColor) -> Self {
        Self::new(c.r, c.g, c.b, c.a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn hsv_primaries() {
        let red = ClearColor::from_hsv(0.0, 1.0, 1.0);
        assert_relative_eq!(red.r, 1.0);
        assert_relative_eq!(red.g, 0.0);
        assert_relative_eq!(red.b, 0.0);

        let green = ClearColor::from_hsv(120.0, 1.0, 1.0);
        assert_relative_eq!(green.g, 1.0);
        assert_relative_eq!(green.r, 0.0);

        let blue = ClearColor::from_hsv(240.0, 1.0, 1.0);
        assert_relative_eq!(blue.b, 1.0);
        assert_relative_eq!(blue.g, 0.0);
    }

    #[test]
    fn hsv_wraps_and_desaturates() {
        let wrapped = ClearColor::from_hsv(360.0 + 120.0, 1.0, 1.0);
        assert_relative_eq!(wrapped.g, 1.0);

        let grey = ClearColor::from_hsv(200.0, 0.0, 0.5);
        assert_relative_eq!(grey.r, 0.5);
        assert_relative_eq!(grey.g, 0.5);
        assert_relative_eq!(grey.b, 0.5);
        assert_relative_eq!(grey.a, 1.0);
    }

    #[test]
    fn vec4_conversion() {
        let c = ClearColor::from(Vec4::new(0.1, 0.2, 0.3, 0.4));
        assert_eq!(c.to_array(), [0.1, 0.2, 0.3, 0.4]);
        assert_eq!(Vec4::from(c), Vec4::new(0.1, 0.2, 0.3, 0.4));
    }
}
