// Core types shared by every stage of the pipeline.

use serde::Serialize;

/// Pack premultiplied channels into 0xAARRGGBB.
#[inline]
pub fn pack_argb(a: u8, r: u8, g: u8, b: u8) -> u32 {
    ((a as u32) << 24) | ((r as u32) << 16) | ((g as u32) << 8) | b as u32
}

/// Split 0xAARRGGBB into (a, r, g, b).
#[inline]
pub fn unpack_argb(px: u32) -> (u8, u8, u8, u8) {
    (
        (px >> 24) as u8,
        ((px >> 16) & 0xFF) as u8,
        ((px >> 8) & 0xFF) as u8,
        (px & 0xFF) as u8,
    )
}

/// Opaque black, also what a cleared surface shows.
pub const OPAQUE_BLACK: u32 = 0xFF00_0000;

/// A pixel surface with explicit dimensions.
/// Pixels are premultiplied 0xAARRGGBB; minifb ignores the top byte, so an
/// opaque buffer can be presented directly.
#[derive(Clone, Debug, PartialEq)]
pub struct RasterBuffer {
    pub width: usize,
    pub height: usize,
    pub pixels: Vec<u32>,
}

impl RasterBuffer {
    /// Transparent buffer, each dimension clamped to at least 1px.
    pub fn new(width: usize, height: usize) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        Self {
            width,
            height,
            pixels: vec![0; width * height],
        }
    }

    pub fn filled(width: usize, height: usize, color: u32) -> Self {
        let mut buf = Self::new(width, height);
        buf.fill(color);
        buf
    }

    /// Resize to `width`×`height` (min 1px). Contents are discarded when the
    /// size actually changes; returns whether it did.
    pub fn resize(&mut self, width: usize, height: usize) -> bool {
        let (width, height) = (width.max(1), height.max(1));
        if self.width == width && self.height == height {
            return false;
        }
        self.width = width;
        self.height = height;
        self.pixels = vec![0; width * height];
        true
    }

    /// Shrink to 1×1 to give the memory back.
    pub fn release(&mut self) {
        self.width = 1;
        self.height = 1;
        self.pixels = vec![0];
    }

    pub fn is_released(&self) -> bool {
        self.width == 1 && self.height == 1
    }

    pub fn clear(&mut self) {
        self.fill(0);
    }

    pub fn fill(&mut self, color: u32) {
        for p in &mut self.pixels {
            *p = color;
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> u32 {
        self.pixels[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, color: u32) {
        let idx = y * self.width + x;
        self.pixels[idx] = color;
    }

    /// Copy contents and size from `src`, reusing the allocation when possible.
    pub fn copy_from(&mut self, src: &RasterBuffer) {
        self.width = src.width;
        self.height = src.height;
        self.pixels.clear();
        self.pixels.extend_from_slice(&src.pixels);
    }

    pub fn same_size(&self, other: &RasterBuffer) -> bool {
        self.width == other.width && self.height == other.height
    }
}

/// Alpha mask in [0,1] per pixel; 1 = fully covered by the shadow color.
#[derive(Clone, Debug, PartialEq)]
pub struct Mask {
    pub width: usize,
    pub height: usize,
    pub alpha: Vec<f32>, // length = width * height, values clamped to [0.0, 1.0]
}

impl Mask {
    pub fn new(width: usize, height: usize) -> Self {
        let (width, height) = (width.max(1), height.max(1));
        Self {
            width,
            height,
            alpha: vec![0.0; width * height],
        }
    }

    pub fn resize(&mut self, width: usize, height: usize) -> bool {
        let (width, height) = (width.max(1), height.max(1));
        if self.width == width && self.height == height {
            return false;
        }
        self.width = width;
        self.height = height;
        self.alpha = vec![0.0; width * height];
        true
    }

    pub fn clear(&mut self) {
        for a in &mut self.alpha {
            *a = 0.0;
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.alpha[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, a: f32) {
        let idx = y * self.width + x;
        self.alpha[idx] = a.clamp(0.0, 1.0);
    }
}

/// Axis-aligned rectangle in host (on-screen) pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// True when the rect has a measurable, finite area.
    pub fn is_measurable(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Same center, sides multiplied by `sx`/`sy`.
    pub fn scaled_about_center(&self, sx: f64, sy: f64) -> Rect {
        let (cx, cy) = self.center();
        let (w, h) = (self.width * sx, self.height * sy);
        Rect::new(cx - w / 2.0, cy - h / 2.0, w, h)
    }
}

/// Integer pixel dimensions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Size {
    pub w: usize,
    pub h: usize,
}

impl Size {
    pub fn new(w: usize, h: usize) -> Self {
        Self { w, h }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resize_discards_only_on_change() {
        let mut buf = RasterBuffer::filled(4, 2, OPAQUE_BLACK);
        assert!(!buf.resize(4, 2));
        assert_eq!(buf.get(3, 1), OPAQUE_BLACK);

        assert!(buf.resize(2, 2));
        assert!(buf.pixels.iter().all(|&p| p == 0));
    }

    #[test]
    fn test_zero_size_clamps_to_one_pixel() {
        let buf = RasterBuffer::new(0, 0);
        assert_eq!((buf.width, buf.height), (1, 1));
        let mask = Mask::new(0, 5);
        assert_eq!((mask.width, mask.height), (1, 5));
    }

    #[test]
    fn test_pack_roundtrip() {
        let px = pack_argb(0x80, 0x10, 0x20, 0x30);
        assert_eq!(unpack_argb(px), (0x80, 0x10, 0x20, 0x30));
    }

    #[test]
    fn test_rect_scaled_about_center() {
        let r = Rect::new(10.0, 10.0, 100.0, 50.0).scaled_about_center(2.0, 2.0);
        assert_eq!(r, Rect::new(-40.0, -15.0, 200.0, 100.0));
        assert!(!Rect::default().is_measurable());
    }
}
