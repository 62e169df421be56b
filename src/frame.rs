use std::fmt::{self, Debug};

/// Pixel layout of a [`ColorFrame`] buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorSpace {
    RGB,
    RGBA,
    BGR,
    BGRA,
}

impl ColorSpace {
    pub const fn bytes_per_pixel(&self) -> usize {
        match self {
            ColorSpace::RGB | ColorSpace::BGR => 3,
            ColorSpace::RGBA | ColorSpace::BGRA => 4,
        }
    }

    /// Byte offsets of the red, green and blue channels within one pixel.
    pub const fn rgb_offsets(&self) -> (usize, usize, usize) {
        match self {
            ColorSpace::RGB | ColorSpace::RGBA => (0, 1, 2),
            ColorSpace::BGR | ColorSpace::BGRA => (2, 1, 0),
        }
    }
}

/// Per-pixel distance grid in meters.
///
/// A pixel is invalid if its value is non-finite or not strictly positive.
#[derive(Clone)]
pub struct DepthFrame {
    pub width: usize,
    pub height: usize,
    /// Row-major depth values (meter).
    pub buffer: Vec<f32>,

    pub sequence: u32,
    pub timestamp_ms: u64,
}

impl DepthFrame {
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.buffer[x + y * self.width]
    }

    pub fn is_valid(depth: f32) -> bool {
        depth.is_finite() && depth > 0.0
    }
}

impl Debug for DepthFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DepthFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("buffer_length", &self.buffer.len())
            .field("sequence", &self.sequence)
            .field("timestamp_ms", &self.timestamp_ms)
            .finish()
    }
}

/// Packed color image, possibly with row padding (`stride` > `width` * bpp).
#[derive(Clone)]
pub struct ColorFrame {
    pub color_space: ColorSpace,
    pub width: usize,
    pub height: usize,
    /// Bytes per row, at least `width * color_space.bytes_per_pixel()`.
    pub stride: usize,
    pub buffer: Vec<u8>,

    pub sequence: u32,
    pub timestamp_ms: u64,
}

impl ColorFrame {
    /// Read one pixel as RGB, clamping the coordinates into the grid.
    /// Lookups that would land past the buffer end read as black.
    pub fn rgb_at(&self, x: usize, y: usize) -> (u8, u8, u8) {
        let x = x.min(self.width.saturating_sub(1));
        let y = y.min(self.height.saturating_sub(1));
        let bpp = self.color_space.bytes_per_pixel();
        let (ro, go, bo) = self.color_space.rgb_offsets();
        let offset = y * self.stride + x * bpp;

        if offset + bpp > self.buffer.len() {
            return (0, 0, 0);
        }

        (
            self.buffer[offset + ro],
            self.buffer[offset + go],
            self.buffer[offset + bo],
        )
    }

    /// Repack into a tight RGB8 buffer, dropping row padding and alpha.
    pub fn to_rgb8(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.width * self.height * 3);

        for y in 0..self.height {
            for x in 0..self.width {
                let (r, g, b) = self.rgb_at(x, y);
                out.push(r);
                out.push(g);
                out.push(b);
            }
        }

        out
    }
}

impl Debug for ColorFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColorFrame")
            .field("color_space", &self.color_space)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("buffer_length", &self.buffer.len())
            .field("sequence", &self.sequence)
            .field("timestamp_ms", &self.timestamp_ms)
            .finish()
    }
}

/// Pinhole camera model parameters.
///
/// `ref_width`/`ref_height` are the resolution the focal lengths and
/// principal point were calibrated at; [`CameraIntrinsics::scaled_to`]
/// rescales them to the resolution of the grid being projected. Projection
/// always rescales to the depth grid, never the color grid.
#[derive(Debug, Clone, Copy)]
pub struct CameraIntrinsics {
    /// Focal length x (pixel)
    pub fx: f32,
    /// Focal length y (pixel)
    pub fy: f32,
    /// Principal point x (pixel)
    pub cx: f32,
    /// Principal point y (pixel)
    pub cy: f32,

    pub ref_width: f32,
    pub ref_height: f32,
}

impl CameraIntrinsics {
    pub fn scaled_to(&self, width: usize, height: usize) -> CameraIntrinsics {
        let sx = width as f32 / self.ref_width;
        let sy = height as f32 / self.ref_height;

        CameraIntrinsics {
            fx: self.fx * sx,
            fy: self.fy * sy,
            cx: self.cx * sx,
            cy: self.cy * sy,
            ref_width: width as f32,
            ref_height: height as f32,
        }
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.fx.is_finite() && self.fy.is_finite() && self.fx > 0.0 && self.fy > 0.0)
            || !(self.ref_width > 0.0 && self.ref_height > 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intrinsics_rescale_to_depth_grid() {
        let intrinsics = CameraIntrinsics {
            fx: 1000.0,
            fy: 1000.0,
            cx: 320.0,
            cy: 240.0,
            ref_width: 640.0,
            ref_height: 480.0,
        };

        let scaled = intrinsics.scaled_to(320, 240);

        assert_eq!(scaled.fx, 500.0);
        assert_eq!(scaled.fy, 500.0);
        assert_eq!(scaled.cx, 160.0);
        assert_eq!(scaled.cy, 120.0);
    }

    #[test]
    fn color_lookup_clamps_to_bounds() {
        let frame = ColorFrame {
            color_space: ColorSpace::RGB,
            width: 2,
            height: 2,
            stride: 8, // 2 bytes of row padding
            buffer: vec![
                1, 2, 3, 4, 5, 6, 0, 0, //
                7, 8, 9, 10, 11, 12, 0, 0,
            ],
            sequence: 0,
            timestamp_ms: 0,
        };

        assert_eq!(frame.rgb_at(0, 0), (1, 2, 3));
        assert_eq!(frame.rgb_at(1, 1), (10, 11, 12));
        // out-of-range coordinates clamp to the last pixel
        assert_eq!(frame.rgb_at(10, 10), (10, 11, 12));
    }

    #[test]
    fn bgra_repacks_to_rgb() {
        let frame = ColorFrame {
            color_space: ColorSpace::BGRA,
            width: 1,
            height: 1,
            stride: 4,
            buffer: vec![30, 20, 10, 255],
            sequence: 0,
            timestamp_ms: 0,
        };

        assert_eq!(frame.to_rgb8(), vec![10, 20, 30]);
    }
}
