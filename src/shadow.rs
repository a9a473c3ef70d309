//! Procedural shadow mask laid over the aura so it fades to black toward the
//! outer edge.
//!
//! A 257-stop strip and a radial corner tile are rendered once per easing
//! value. Each side and corner of the mask is one of those two rasters drawn
//! through a quarter-turn [`Affine`]. The result is softened, then disabled
//! directions are blacked out.

use log::debug;

use crate::error::Result;
use crate::geometry::Geometry;
use crate::raster::blur_mask;
use crate::settings::DirectionFlags;
use crate::types::{Mask, Rect, Size};

/// Gradient resolution: `STOPS + 1` samples from outer edge to fade start.
pub const STOPS: usize = 256;

/// Side length of the cached radial corner tile.
const CORNER_SIZE: usize = 128;

/// `easing = 16 / (fadeOutEasing · 0.64)`.
pub fn easing_exponent(fade_out_easing: f64) -> f64 {
    16.0 / (fade_out_easing.max(1.0) * 0.64)
}

/// Opacity of stop `i` (0 = outer edge, `STOPS` = fade start).
pub fn stop_opacity(i: usize, easing: f64) -> f32 {
    let n = STOPS as f64;
    (((n - i.min(STOPS) as f64) / n).powf(easing)) as f32
}

/// Maps normalized destination coordinates `(s, t)` to normalized source
/// coordinates `(u, v)`: `u = a·s + b·t + c`, `v = d·s + e·t + f`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Affine {
    /// Source rotated clockwise by `quarter_turns · 90°`.
    pub fn quarter_turn(quarter_turns: u8) -> Affine {
        match quarter_turns % 4 {
            0 => Affine { a: 1.0, b: 0.0, c: 0.0, d: 0.0, e: 1.0, f: 0.0 },
            1 => Affine { a: 0.0, b: 1.0, c: 0.0, d: -1.0, e: 0.0, f: 1.0 },
            2 => Affine { a: -1.0, b: 0.0, c: 1.0, d: 0.0, e: -1.0, f: 1.0 },
            _ => Affine { a: 0.0, b: -1.0, c: 1.0, d: 1.0, e: 0.0, f: 0.0 },
        }
    }

    #[inline]
    pub fn apply(&self, s: f64, t: f64) -> (f64, f64) {
        (self.a * s + self.b * t + self.c, self.d * s + self.e * t + self.f)
    }
}

#[inline]
fn sample_mask(src: &Mask, u: f64, v: f64) -> f32 {
    let fx = (u * src.width as f64 - 0.5).clamp(0.0, (src.width - 1) as f64);
    let fy = (v * src.height as f64 - 0.5).clamp(0.0, (src.height - 1) as f64);
    let (x0, y0) = (fx.floor() as usize, fy.floor() as usize);
    let (x1, y1) = ((x0 + 1).min(src.width - 1), (y0 + 1).min(src.height - 1));
    let (tx, ty) = ((fx - x0 as f64) as f32, (fy - y0 as f64) as f32);
    let top = src.get(x0, y0) + (src.get(x1, y0) - src.get(x0, y0)) * tx;
    let bottom = src.get(x0, y1) + (src.get(x1, y1) - src.get(x0, y1)) * tx;
    top + (bottom - top) * ty
}

/// Draw `src` into `dst_rect` of `dst` through `transform`. Only pixels whose
/// centers fall inside the rect are written.
pub fn draw_mask_affine(dst: &mut Mask, src: &Mask, dst_rect: Rect, transform: Affine) {
    if !dst_rect.is_measurable() {
        return;
    }
    let right = dst_rect.x + dst_rect.width;
    let bottom = dst_rect.y + dst_rect.height;
    let x_start = dst_rect.x.floor().max(0.0) as usize;
    let y_start = dst_rect.y.floor().max(0.0) as usize;
    let x_end = (right.ceil().max(0.0) as usize).min(dst.width);
    let y_end = (bottom.ceil().max(0.0) as usize).min(dst.height);

    for y in y_start..y_end {
        let cy = y as f64 + 0.5;
        if cy < dst_rect.y || cy >= bottom {
            continue;
        }
        let t = (cy - dst_rect.y) / dst_rect.height;
        for x in x_start..x_end {
            let cx = x as f64 + 0.5;
            if cx < dst_rect.x || cx >= right {
                continue;
            }
            let s = (cx - dst_rect.x) / dst_rect.width;
            let (u, v) = transform.apply(s, t);
            dst.alpha[y * dst.width + x] = sample_mask(src, u, v);
        }
    }
}

/// Everything the mask depends on.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ShadowKey {
    size: Size,
    video: Rect,
    bloom: f64,
    easing: f64,
    directions: DirectionFlags,
}

#[derive(Debug)]
pub struct ShadowMaskGenerator {
    strip: Mask,
    corner: Mask,
    rasters_easing: Option<f64>,
    pre_blur: Mask,
    tmp: Mask,
    shadow: Mask,
    key: Option<ShadowKey>,
    invalidated: bool,
    builds: u64,
}

impl Default for ShadowMaskGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShadowMaskGenerator {
    pub fn new() -> Self {
        Self {
            strip: Mask::new(STOPS + 1, 1),
            corner: Mask::new(CORNER_SIZE, CORNER_SIZE),
            rasters_easing: None,
            pre_blur: Mask::new(1, 1),
            tmp: Mask::new(1, 1),
            shadow: Mask::new(1, 1),
            key: None,
            invalidated: true,
            builds: 0,
        }
    }

    pub fn shadow(&self) -> &Mask {
        &self.shadow
    }

    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    /// Number of full rebuilds so far.
    pub fn builds(&self) -> u64 {
        self.builds
    }

    pub fn release(&mut self) {
        self.pre_blur.resize(1, 1);
        self.tmp.resize(1, 1);
        self.shadow.resize(1, 1);
        self.key = None;
        self.invalidated = true;
    }

    pub fn rebuild_if_invalidated(
        &mut self,
        geometry: &Geometry,
        bloom: f64,
        fade_out_easing: f64,
        directions: DirectionFlags,
    ) -> Result<&Mask> {
        let key = ShadowKey {
            size: geometry.projector_size,
            video: geometry.projector_video_region(),
            bloom,
            easing: easing_exponent(fade_out_easing),
            directions,
        };
        if !self.invalidated && self.key == Some(key) {
            return Ok(&self.shadow);
        }
        self.build(&key)?;
        self.key = Some(key);
        self.invalidated = false;
        self.builds += 1;
        Ok(&self.shadow)
    }

    fn build_rasters(&mut self, easing: f64) {
        if self.rasters_easing == Some(easing) {
            return;
        }
        for i in 0..=STOPS {
            self.strip.alpha[i] = stop_opacity(i, easing);
        }
        // Outer corner at (0,0), fade start at (CORNER_SIZE, CORNER_SIZE).
        let c = CORNER_SIZE as f64;
        for y in 0..CORNER_SIZE {
            for x in 0..CORNER_SIZE {
                let du = 1.0 - (x as f64 + 0.5) / c;
                let dv = 1.0 - (y as f64 + 0.5) / c;
                let r = (du * du + dv * dv).sqrt().min(1.0);
                self.corner.alpha[y * CORNER_SIZE + x] = r.powf(easing) as f32;
            }
        }
        self.rasters_easing = Some(easing);
    }

    fn build(&mut self, key: &ShadowKey) -> Result<()> {
        self.build_rasters(key.easing);

        let (w, h) = (key.size.w as f64, key.size.h as f64);
        let video = key.video;
        let fade_from = key.bloom / 100.0;
        // Fade start, measured outward from the video edge. Never further
        // inward than the video's midpoint.
        let dx = (video.x * fade_from).max(-video.width / 2.0);
        let dy = (video.y * fade_from).max(-video.height / 2.0);
        let ix0 = (video.x - dx).clamp(0.0, w / 2.0);
        let iy0 = (video.y - dy).clamp(0.0, h / 2.0);
        let ix1 = w - ix0;
        let iy1 = h - iy0;

        self.pre_blur.resize(key.size.w, key.size.h);
        self.pre_blur.clear();

        let sides = [
            (Rect::new(0.0, iy0, ix0, iy1 - iy0), 0),
            (Rect::new(ix0, 0.0, ix1 - ix0, iy0), 1),
            (Rect::new(ix1, iy0, w - ix1, iy1 - iy0), 2),
            (Rect::new(ix0, iy1, ix1 - ix0, h - iy1), 3),
        ];
        for (rect, turns) in sides {
            draw_mask_affine(&mut self.pre_blur, &self.strip, rect, Affine::quarter_turn(turns));
        }
        let corners = [
            (Rect::new(0.0, 0.0, ix0, iy0), 0),
            (Rect::new(ix1, 0.0, w - ix1, iy0), 1),
            (Rect::new(ix1, iy1, w - ix1, h - iy1), 2),
            (Rect::new(0.0, iy1, ix0, h - iy1), 3),
        ];
        for (rect, turns) in corners {
            draw_mask_affine(&mut self.pre_blur, &self.corner, rect, Affine::quarter_turn(turns));
        }

        let radius = ((key.size.w.min(key.size.h) as f64) * 0.01).round().max(1.0) as usize;
        self.tmp.resize(key.size.w, key.size.h);
        self.shadow.resize(key.size.w, key.size.h);
        blur_mask(&self.pre_blur, &mut self.tmp, &mut self.shadow, radius)?;

        black_out_disabled(&mut self.shadow, key.directions);
        debug!(
            "Shadow rebuilt: {}x{}, fade inset {:.1}x{:.1}",
            key.size.w, key.size.h, ix0, iy0
        );
        Ok(())
    }
}

/// Fill the diagonal quadrant of every disabled side with full shadow.
fn black_out_disabled(mask: &mut Mask, directions: DirectionFlags) {
    if directions.top && directions.right && directions.bottom && directions.left {
        return;
    }
    let (w, h) = (mask.width as f64, mask.height as f64);
    for y in 0..mask.height {
        let v = (y as f64 + 0.5) / h;
        for x in 0..mask.width {
            let u = (x as f64 + 0.5) / w;
            let in_top = v < u && v < 1.0 - u;
            let in_bottom = v > u && v > 1.0 - u;
            let in_left = u < v && u < 1.0 - v;
            let in_right = u > v && u > 1.0 - v;
            if (in_top && !directions.top)
                || (in_bottom && !directions.bottom)
                || (in_left && !directions.left)
                || (in_right && !directions.right)
            {
                mask.alpha[y * mask.width + x] = 1.0;
            }
        }
    }
}
