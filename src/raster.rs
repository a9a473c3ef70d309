// Software drawing primitives the pipeline is built from: scaled draws
// (canvas-style drawImage), separable box blurs for pixels and masks, shadow
// application and the CSS-like color filter.
use crate::error::{Error, Result};
use crate::types::{Mask, RasterBuffer, Rect, pack_argb, unpack_argb};

/// How a scaled draw combines with what is already in the destination.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DrawMode {
    /// Overwrite destination pixels.
    Copy,
    /// Premultiplied source-over at the given opacity.
    Over(f32),
}

fn check_same_size(op: &'static str, a: (usize, usize), b: (usize, usize)) -> Result<()> {
    if a != b {
        return Err(Error::SizeMismatch {
            op,
            expected_w: a.0,
            expected_h: a.1,
            actual_w: b.0,
            actual_h: b.1,
        });
    }
    Ok(())
}

#[inline]
fn channels(px: u32) -> [f32; 4] {
    let (a, r, g, b) = unpack_argb(px);
    [a as f32, r as f32, g as f32, b as f32]
}

#[inline]
fn to_pixel(c: [f32; 4]) -> u32 {
    let q = |v: f32| v.round().clamp(0.0, 255.0) as u8;
    let a = q(c[0]);
    // Premultiplied: color can never exceed alpha.
    pack_argb(a, q(c[1]).min(a), q(c[2]).min(a), q(c[3]).min(a))
}

/// Integer sampling bounds (inclusive) for a source rect.
fn sample_bounds(src: &RasterBuffer, r: &Rect) -> (i64, i64, i64, i64) {
    let max_x = src.width as i64 - 1;
    let max_y = src.height as i64 - 1;
    let x0 = (r.x.floor() as i64).clamp(0, max_x);
    let y0 = (r.y.floor() as i64).clamp(0, max_y);
    let x1 = ((r.x + r.width).ceil() as i64 - 1).clamp(x0, max_x);
    let y1 = ((r.y + r.height).ceil() as i64 - 1).clamp(y0, max_y);
    (x0, y0, x1, y1)
}

/// Bilinear sample at continuous coordinates (pixel centers at i + 0.5),
/// clamped to `bounds`.
#[inline]
fn sample_bilinear(src: &RasterBuffer, u: f64, v: f64, bounds: (i64, i64, i64, i64)) -> [f32; 4] {
    let (bx0, by0, bx1, by1) = bounds;
    let fx = u - 0.5;
    let fy = v - 0.5;
    let ix = fx.floor();
    let iy = fy.floor();
    let tx = (fx - ix) as f32;
    let ty = (fy - iy) as f32;

    let xa = (ix as i64).clamp(bx0, bx1) as usize;
    let xb = (ix as i64 + 1).clamp(bx0, bx1) as usize;
    let ya = (iy as i64).clamp(by0, by1) as usize;
    let yb = (iy as i64 + 1).clamp(by0, by1) as usize;

    let p00 = channels(src.get(xa, ya));
    let p10 = channels(src.get(xb, ya));
    let p01 = channels(src.get(xa, yb));
    let p11 = channels(src.get(xb, yb));

    let mut out = [0.0f32; 4];
    for c in 0..4 {
        let top = p00[c] + (p10[c] - p00[c]) * tx;
        let bottom = p01[c] + (p11[c] - p01[c]) * tx;
        out[c] = top + (bottom - top) * ty;
    }
    out
}

/// Draw the `src_rect` region of `src` stretched into `dst_rect` of `dst`
/// (both in pixel units). Pixels whose centers fall outside `dst_rect` are
/// untouched; zero-area rects draw nothing.
pub fn draw_scaled(dst: &mut RasterBuffer, src: &RasterBuffer, src_rect: Rect, dst_rect: Rect, mode: DrawMode) {
    if !src_rect.is_measurable() || !dst_rect.is_measurable() {
        return;
    }
    if let DrawMode::Over(o) = mode {
        if o <= 0.0 {
            return;
        }
    }

    let bounds = sample_bounds(src, &src_rect);
    let sx = src_rect.width / dst_rect.width;
    let sy = src_rect.height / dst_rect.height;

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
        let v = src_rect.y + (cy - dst_rect.y) * sy;
        for x in x_start..x_end {
            let cx = x as f64 + 0.5;
            if cx < dst_rect.x || cx >= right {
                continue;
            }
            let u = src_rect.x + (cx - dst_rect.x) * sx;
            let s = sample_bilinear(src, u, v, bounds);
            let idx = y * dst.width + x;
            dst.pixels[idx] = match mode {
                DrawMode::Copy => to_pixel(s),
                DrawMode::Over(opacity) => over(dst.pixels[idx], s, opacity),
            };
        }
    }
}

/// Premultiplied source-over of sampled channels onto `dst_px`.
#[inline]
fn over(dst_px: u32, s: [f32; 4], opacity: f32) -> u32 {
    let o = opacity.clamp(0.0, 1.0);
    let d = channels(dst_px);
    let inv = 1.0 - s[0] / 255.0 * o;
    to_pixel([
        s[0] * o + d[0] * inv,
        s[1] * o + d[1] * inv,
        s[2] * o + d[2] * inv,
        s[3] * o + d[3] * inv,
    ])
}

/// Whole-buffer draw: `src` stretched over all of `dst`.
pub fn draw_fit(dst: &mut RasterBuffer, src: &RasterBuffer, mode: DrawMode) {
    let src_rect = Rect::new(0.0, 0.0, src.width as f64, src.height as f64);
    let dst_rect = Rect::new(0.0, 0.0, dst.width as f64, dst.height as f64);
    draw_scaled(dst, src, src_rect, dst_rect, mode);
}

/// Same-size premultiplied source-over: `src` at `opacity` onto `dst`.
pub fn blend_over(dst: &mut RasterBuffer, src: &RasterBuffer, opacity: f32) -> Result<()> {
    check_same_size("blend_over", (dst.width, dst.height), (src.width, src.height))?;
    for (d, &s) in dst.pixels.iter_mut().zip(&src.pixels) {
        *d = over(*d, channels(s), opacity);
    }
    Ok(())
}

/// Separable box blur over all four premultiplied channels.
/// `tmp` holds the horizontal pass; `dst` receives the result.
/// Edges extend the border pixel so opaque frames don't darken at the rim.
pub fn box_blur(src: &RasterBuffer, tmp: &mut RasterBuffer, dst: &mut RasterBuffer, radius: usize) -> Result<()> {
    check_same_size("box_blur", (src.width, src.height), (dst.width, dst.height))?;
    check_same_size("box_blur tmp", (src.width, src.height), (tmp.width, tmp.height))?;
    if radius == 0 {
        dst.pixels.copy_from_slice(&src.pixels);
        return Ok(());
    }

    let w = src.width as i64;
    let h = src.height as i64;
    let r = radius as i64;
    let win = (2 * r + 1) as u32;

    let add = |sum: &mut [u32; 4], p: u32| {
        sum[0] += p >> 24;
        sum[1] += (p >> 16) & 0xFF;
        sum[2] += (p >> 8) & 0xFF;
        sum[3] += p & 0xFF;
    };
    let sub = |sum: &mut [u32; 4], p: u32| {
        sum[0] -= p >> 24;
        sum[1] -= (p >> 16) & 0xFF;
        sum[2] -= (p >> 8) & 0xFF;
        sum[3] -= p & 0xFF;
    };
    let avg = |sum: &[u32; 4]| -> u32 {
        ((sum[0] / win) << 24) | ((sum[1] / win) << 16) | ((sum[2] / win) << 8) | (sum[3] / win)
    };

    // Horizontal pass: src -> tmp.
    for y in 0..h {
        let row = (y * w) as usize;
        let mut sum = [0u32; 4];
        for _ in 0..=r {
            add(&mut sum, src.pixels[row]);
        }
        for x in 1..=r {
            add(&mut sum, src.pixels[row + x.min(w - 1) as usize]);
        }
        for x in 0..w {
            tmp.pixels[row + x as usize] = avg(&sum);
            let left = (x - r).max(0) as usize;
            let right = (x + r + 1).min(w - 1) as usize;
            add(&mut sum, src.pixels[row + right]);
            sub(&mut sum, src.pixels[row + left]);
        }
    }

    // Vertical pass: tmp -> dst.
    for x in 0..w {
        let col = x as usize;
        let mut sum = [0u32; 4];
        for _ in 0..=r {
            add(&mut sum, tmp.pixels[col]);
        }
        for y in 1..=r {
            add(&mut sum, tmp.pixels[(y.min(h - 1) * w) as usize + col]);
        }
        for y in 0..h {
            dst.pixels[(y * w) as usize + col] = avg(&sum);
            let top = (y - r).max(0);
            let bottom = (y + r + 1).min(h - 1);
            add(&mut sum, tmp.pixels[(bottom * w) as usize + col]);
            sub(&mut sum, tmp.pixels[(top * w) as usize + col]);
        }
    }

    Ok(())
}

/// Three box passes (close to a gaussian with sigma ≈ radius) in place.
pub fn soft_blur(buf: &mut RasterBuffer, tmp: &mut RasterBuffer, scratch: &mut RasterBuffer, radius: usize) -> Result<()> {
    if radius == 0 {
        return Ok(());
    }
    tmp.resize(buf.width, buf.height);
    scratch.resize(buf.width, buf.height);
    // Split the radius so three passes cover roughly the requested extent.
    let pass_radius = (radius as f64 / 3.0_f64.sqrt()).round().max(1.0) as usize;
    for _ in 0..3 {
        box_blur(buf, tmp, scratch, pass_radius)?;
        std::mem::swap(&mut buf.pixels, &mut scratch.pixels);
    }
    Ok(())
}

/// Box blur for masks, same sliding-window scheme as `box_blur`.
pub fn blur_mask(src: &Mask, tmp: &mut Mask, dst: &mut Mask, radius: usize) -> Result<()> {
    check_same_size("blur_mask", (src.width, src.height), (dst.width, dst.height))?;
    check_same_size("blur_mask tmp", (src.width, src.height), (tmp.width, tmp.height))?;
    if radius == 0 {
        dst.alpha.copy_from_slice(&src.alpha);
        return Ok(());
    }
    let w = src.width as i64;
    let h = src.height as i64;
    let r = radius as i64;
    let win = (2 * r + 1) as f32;

    for y in 0..h {
        let row = (y * w) as usize;
        let mut sum = src.alpha[row] * (r + 1) as f32;
        for x in 1..=r {
            sum += src.alpha[row + x.min(w - 1) as usize];
        }
        for x in 0..w {
            tmp.alpha[row + x as usize] = sum / win;
            let left = (x - r).max(0) as usize;
            let right = (x + r + 1).min(w - 1) as usize;
            sum += src.alpha[row + right] - src.alpha[row + left];
        }
    }
    for x in 0..w {
        let col = x as usize;
        let mut sum = tmp.alpha[col] * (r + 1) as f32;
        for y in 1..=r {
            sum += tmp.alpha[(y.min(h - 1) * w) as usize + col];
        }
        for y in 0..h {
            dst.alpha[(y * w) as usize + col] = (sum / win).clamp(0.0, 1.0);
            let top = (y - r).max(0);
            let bottom = (y + r + 1).min(h - 1);
            sum += tmp.alpha[(bottom * w) as usize + col] - tmp.alpha[(top * w) as usize + col];
        }
    }
    Ok(())
}

/// Composite opaque black at the mask's opacity over `buf`.
pub fn apply_shadow(buf: &mut RasterBuffer, shadow: &Mask) -> Result<()> {
    check_same_size("apply_shadow", (buf.width, buf.height), (shadow.width, shadow.height))?;
    for (px, &a) in buf.pixels.iter_mut().zip(&shadow.alpha) {
        if a <= 0.0 {
            continue;
        }
        let c = channels(*px);
        let inv = 1.0 - a.clamp(0.0, 1.0);
        *px = to_pixel([255.0 * a + c[0] * inv, c[1] * inv, c[2] * inv, c[3] * inv]);
    }
    Ok(())
}

/// CSS-style `brightness() contrast() saturate()` in that order, percentages
/// where 100 is identity.
pub fn apply_color_filter(buf: &mut RasterBuffer, brightness: f64, contrast: f64, saturation: f64) {
    if brightness == 100.0 && contrast == 100.0 && saturation == 100.0 {
        return;
    }
    let b = (brightness / 100.0) as f32;
    let c = (contrast / 100.0) as f32;
    let s = (saturation / 100.0) as f32;

    for px in &mut buf.pixels {
        let ch = channels(*px);
        let a = ch[0];
        if a <= 0.0 {
            continue;
        }
        // Work on straight color in 0..1.
        let mut rgb = [ch[1] / a, ch[2] / a, ch[3] / a];
        for v in &mut rgb {
            *v *= b;
            *v = (*v - 0.5) * c + 0.5;
        }
        // Luminance-preserving saturation (filter-effects matrix weights).
        let lum = 0.2126 * rgb[0] + 0.7152 * rgb[1] + 0.0722 * rgb[2];
        for v in &mut rgb {
            *v = (lum + (*v - lum) * s).clamp(0.0, 1.0);
        }
        *px = to_pixel([a, rgb[0] * a, rgb[1] * a, rgb[2] * a]);
    }
}

/// Write `buf` as an RGBA PNG (colors un-premultiplied).
pub fn save_png(buf: &RasterBuffer, path: &std::path::Path) -> Result<()> {
    let mut img = image::RgbaImage::new(buf.width as u32, buf.height as u32);
    for (px, out) in buf.pixels.iter().zip(img.pixels_mut()) {
        let (a, r, g, b) = unpack_argb(*px);
        let straight = |c: u8| {
            if a == 0 {
                0
            } else {
                ((c as u32 * 255 + a as u32 / 2) / a as u32).min(255) as u8
            }
        };
        *out = image::Rgba([straight(r), straight(g), straight(b), a]);
    }
    img.save(path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::OPAQUE_BLACK;

    fn opaque(r: u8, g: u8, b: u8) -> u32 {
        pack_argb(255, r, g, b)
    }

    #[test]
    fn test_box_blur_keeps_flat_color() {
        let src = RasterBuffer::filled(8, 6, opaque(40, 80, 120));
        let mut tmp = RasterBuffer::new(8, 6);
        let mut dst = RasterBuffer::new(8, 6);
        box_blur(&src, &mut tmp, &mut dst, 3).unwrap();
        assert!(dst.pixels.iter().all(|&p| p == opaque(40, 80, 120)));
    }

    #[test]
    fn test_box_blur_rejects_size_mismatch() {
        let src = RasterBuffer::new(4, 4);
        let mut tmp = RasterBuffer::new(4, 4);
        let mut dst = RasterBuffer::new(2, 2);
        assert!(matches!(
            box_blur(&src, &mut tmp, &mut dst, 1),
            Err(Error::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_soft_blur_spreads_into_transparency() {
        let mut buf = RasterBuffer::new(21, 21);
        buf.set(10, 10, opaque(255, 255, 255));
        let mut tmp = RasterBuffer::new(1, 1);
        let mut scratch = RasterBuffer::new(1, 1);
        soft_blur(&mut buf, &mut tmp, &mut scratch, 3).unwrap();
        let (a_center, ..) = unpack_argb(buf.get(10, 10));
        let (a_near, ..) = unpack_argb(buf.get(10, 12));
        assert!(a_center < 255);
        assert!(a_near > 0);
    }

    #[test]
    fn test_draw_scaled_copy_upscale_fills_target() {
        let src = RasterBuffer::filled(2, 2, opaque(9, 9, 9));
        let mut dst = RasterBuffer::new(10, 10);
        draw_scaled(
            &mut dst,
            &src,
            Rect::new(0.0, 0.0, 2.0, 2.0),
            Rect::new(2.0, 2.0, 6.0, 6.0),
            DrawMode::Copy,
        );
        assert_eq!(dst.get(2, 2), opaque(9, 9, 9));
        assert_eq!(dst.get(7, 7), opaque(9, 9, 9));
        assert_eq!(dst.get(1, 1), 0);
        assert_eq!(dst.get(8, 8), 0);
    }

    #[test]
    fn test_draw_scaled_interpolates_between_pixels() {
        let mut src = RasterBuffer::filled(2, 1, opaque(0, 0, 0));
        src.set(1, 0, opaque(255, 255, 255));
        let mut dst = RasterBuffer::new(4, 1);
        draw_fit(&mut dst, &src, DrawMode::Copy);
        assert_eq!(dst.get(0, 0), opaque(0, 0, 0));
        assert_eq!(dst.get(1, 0), opaque(64, 64, 64));
        assert_eq!(dst.get(2, 0), opaque(191, 191, 191));
        assert_eq!(dst.get(3, 0), opaque(255, 255, 255));
    }

    #[test]
    fn test_draw_scaled_over_respects_opacity() {
        let src = RasterBuffer::filled(1, 1, opaque(200, 0, 0));
        let mut dst = RasterBuffer::filled(1, 1, OPAQUE_BLACK);
        draw_fit(&mut dst, &src, DrawMode::Over(0.5));
        let (a, r, g, _) = unpack_argb(dst.get(0, 0));
        assert_eq!(a, 255);
        assert_eq!(r, 100);
        assert_eq!(g, 0);
    }

    #[test]
    fn test_draw_scaled_zero_area_is_noop() {
        let src = RasterBuffer::filled(2, 2, opaque(1, 2, 3));
        let mut dst = RasterBuffer::new(4, 4);
        draw_scaled(
            &mut dst,
            &src,
            Rect::new(0.0, 0.0, 2.0, 2.0),
            Rect::new(1.0, 1.0, 0.0, 3.0),
            DrawMode::Copy,
        );
        assert!(dst.pixels.iter().all(|&p| p == 0));
    }

    #[test]
    fn test_apply_shadow_darkens() {
        let mut buf = RasterBuffer::filled(2, 1, opaque(200, 100, 50));
        let mut mask = Mask::new(2, 1);
        mask.set(1, 0, 1.0);
        apply_shadow(&mut buf, &mask).unwrap();
        assert_eq!(buf.get(0, 0), opaque(200, 100, 50));
        assert_eq!(buf.get(1, 0), OPAQUE_BLACK);
    }

    #[test]
    fn test_blur_mask_keeps_constant() {
        let mut src = Mask::new(5, 5);
        for a in &mut src.alpha {
            *a = 0.5;
        }
        let mut tmp = Mask::new(5, 5);
        let mut dst = Mask::new(5, 5);
        blur_mask(&src, &mut tmp, &mut dst, 2).unwrap();
        assert!(dst.alpha.iter().all(|&a| (a - 0.5).abs() < 1e-5));
    }

    #[test]
    fn test_color_filter_identity_and_saturation() {
        let mut buf = RasterBuffer::filled(1, 1, opaque(200, 100, 50));
        apply_color_filter(&mut buf, 100.0, 100.0, 100.0);
        assert_eq!(buf.get(0, 0), opaque(200, 100, 50));

        apply_color_filter(&mut buf, 100.0, 100.0, 0.0);
        let (_, r, g, b) = unpack_argb(buf.get(0, 0));
        assert_eq!(r, g);
        assert_eq!(g, b);
    }

    #[test]
    fn test_save_png_roundtrips_through_image() {
        let mut buf = RasterBuffer::filled(3, 2, opaque(10, 20, 30));
        buf.set(2, 1, pack_argb(128, 64, 0, 0));
        let path = std::env::temp_dir().join("ambient_aura_save_png_test.png");
        save_png(&buf, &path).unwrap();
        let img = image::open(&path).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (3, 2));
        assert_eq!(img.get_pixel(0, 0).0, [10, 20, 30, 255]);
        assert_eq!(img.get_pixel(2, 1).0, [128, 0, 0, 128]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_blend_over_half_mixes_stored_values() {
        let mut dst = RasterBuffer::filled(2, 2, opaque(0, 0, 255));
        let src = RasterBuffer::filled(2, 2, opaque(255, 0, 0));
        blend_over(&mut dst, &src, 0.5).unwrap();
        assert_eq!(dst.get(1, 1), opaque(128, 0, 128));
    }

    #[test]
    fn test_blend_over_keeps_color_within_alpha() {
        let mut dst = RasterBuffer::new(3, 1);
        let src = RasterBuffer::filled(3, 1, pack_argb(128, 128, 128, 128));
        for opacity in [0.1, 0.5, 0.9] {
            blend_over(&mut dst, &src, opacity).unwrap();
            for &px in &dst.pixels {
                let (a, r, g, b) = unpack_argb(px);
                assert!(r <= a && g <= a && b <= a);
            }
        }

        let mut fresh = RasterBuffer::new(3, 1);
        blend_over(&mut fresh, &src, 0.5).unwrap();
        assert_eq!(fresh.get(0, 0), pack_argb(64, 64, 64, 64));
        assert!(blend_over(&mut fresh, &RasterBuffer::new(2, 1), 0.5).is_err());
    }
}
