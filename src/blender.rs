// Temporal cross-fade between the previous and the current aura frame, so a
// 24fps video still produces a smooth glow on a 60Hz+ display.

use crate::error::Result;
use crate::raster::blend_over;
use crate::types::RasterBuffer;

/// Blending only pays off when the display is this much faster than the video.
pub const MIN_DISPLAY_TO_VIDEO_RATIO: f64 = 1.33;

/// Blend progress for `elapsed` ms since the window started.
pub fn blend_alpha(elapsed: f64, video_frame_rate: f64, smoothness: f64) -> f32 {
    if !(video_frame_rate > 0.0) {
        return 1.0;
    }
    let smoothness = smoothness.clamp(1.0, 100.0) / 100.0;
    let duration = 1000.0 / (video_frame_rate / smoothness);
    (elapsed.max(0.0) / duration).clamp(0.0, 1.0) as f32
}

pub fn is_active(enabled: bool, video_frame_rate: f64, display_frame_rate: f64) -> bool {
    enabled && display_frame_rate >= video_frame_rate * MIN_DISPLAY_TO_VIDEO_RATIO
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BlendTick {
    pub now: f64,
    /// The projector just produced a genuinely new frame.
    pub new_frame: bool,
    pub video_frame_rate: f64,
    pub display_frame_rate: f64,
    pub aura_frame_rate: f64,
    pub smoothness: f64,
}

impl BlendTick {
    fn half_aura_frame_duration(&self) -> f64 {
        let rate = if self.aura_frame_rate > 0.0 {
            self.aura_frame_rate
        } else {
            self.display_frame_rate
        };
        if rate > 0.0 { 500.0 / rate } else { 0.0 }
    }
}

pub struct FrameBlender {
    previous: RasterBuffer,
    current: RasterBuffer,
    blended: RasterBuffer,
    blend_start: Option<f64>,
    last_alpha: f32,
}

impl Default for FrameBlender {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameBlender {
    pub fn new() -> Self {
        Self {
            previous: RasterBuffer::new(1, 1),
            current: RasterBuffer::new(1, 1),
            blended: RasterBuffer::new(1, 1),
            blend_start: None,
            last_alpha: 1.0,
        }
    }

    pub fn blended(&self) -> &RasterBuffer {
        &self.blended
    }

    /// Alpha used on the last `blend` call.
    pub fn last_alpha(&self) -> f32 {
        self.last_alpha
    }

    pub fn reset(&mut self) {
        self.blend_start = None;
        self.last_alpha = 1.0;
    }

    pub fn release(&mut self) {
        self.previous.release();
        self.current.release();
        self.blended.release();
        self.reset();
    }

    /// Cross-fade from the frame before `projector` toward `projector`.
    pub fn blend(&mut self, projector: &RasterBuffer, tick: &BlendTick) -> Result<&RasterBuffer> {
        if tick.new_frame || !self.current.same_size(projector) {
            if self.current.same_size(projector) {
                std::mem::swap(&mut self.previous, &mut self.current);
            } else {
                // New geometry: nothing meaningful to fade from.
                self.previous.copy_from(projector);
            }
            self.current.copy_from(projector);
            self.blend_start = Some(tick.now - tick.half_aura_frame_duration());
        }

        let elapsed = self.blend_start.map_or(f64::INFINITY, |start| tick.now - start);
        let mut alpha = blend_alpha(elapsed, tick.video_frame_rate, tick.smoothness);
        if tick.new_frame && self.last_alpha >= 1.0 {
            alpha = 0.0;
        }

        self.blended.copy_from(&self.previous);
        blend_over(&mut self.blended, &self.current, alpha)?;
        self.last_alpha = alpha;
        Ok(&self.blended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{pack_argb, unpack_argb};

    fn tick(now: f64, new_frame: bool) -> BlendTick {
        BlendTick {
            now,
            new_frame,
            video_frame_rate: 24.0,
            display_frame_rate: 60.0,
            aura_frame_rate: 24.0,
            smoothness: 100.0,
        }
    }

    #[test]
    fn test_alpha_stays_in_unit_range() {
        for smoothness in [1.0, 25.0, 50.0, 80.0, 100.0] {
            for elapsed in [0.0, 1.0, 10.0, 41.0, 100.0, 10_000.0] {
                for rate in [0.0, 1.0, 24.0, 60.0, 240.0] {
                    let a = blend_alpha(elapsed, rate, smoothness);
                    assert!((0.0..=1.0).contains(&a));
                }
            }
        }
    }

    #[test]
    fn test_alpha_reaches_one_after_frame_duration() {
        // 24fps at 100% smoothness: the fade spans one video frame.
        assert!((blend_alpha(1000.0 / 48.0, 24.0, 100.0) - 0.5).abs() < 1e-6);
        assert_eq!(blend_alpha(1000.0 / 24.0, 24.0, 100.0), 1.0);
    }

    #[test]
    fn test_active_only_when_display_outpaces_video() {
        assert!(is_active(true, 24.0, 60.0));
        assert!(!is_active(true, 50.0, 60.0));
        assert!(!is_active(false, 24.0, 60.0));
    }

    #[test]
    fn test_first_tick_after_full_alpha_shows_previous() {
        let red = RasterBuffer::filled(4, 4, pack_argb(255, 255, 0, 0));
        let blue = RasterBuffer::filled(4, 4, pack_argb(255, 0, 0, 255));
        let mut blender = FrameBlender::new();

        blender.blend(&red, &tick(0.0, true)).unwrap();
        let out = blender.blend(&red, &tick(100.0, false)).unwrap();
        assert_eq!(out.get(0, 0), pack_argb(255, 255, 0, 0));
        assert_eq!(blender.last_alpha(), 1.0);

        let out = blender.blend(&blue, &tick(116.0, true)).unwrap();
        assert_eq!(out.get(0, 0), pack_argb(255, 255, 0, 0));
        assert_eq!(blender.last_alpha(), 0.0);

        // Mid-window both colors contribute.
        let out = blender.blend(&blue, &tick(125.0, false)).unwrap();
        let (_, r, _, b) = unpack_argb(out.get(0, 0));
        assert!(r > 0 && b > 0);

        let out = blender.blend(&blue, &tick(200.0, false)).unwrap();
        assert_eq!(out.get(0, 0), pack_argb(255, 0, 0, 255));
    }

    #[test]
    fn test_size_change_restarts_from_current() {
        let mut blender = FrameBlender::new();
        blender
            .blend(&RasterBuffer::filled(4, 4, pack_argb(255, 1, 2, 3)), &tick(0.0, true))
            .unwrap();
        let big = RasterBuffer::filled(8, 8, pack_argb(255, 9, 9, 9));
        let out = blender.blend(&big, &tick(10.0, false)).unwrap();
        assert_eq!((out.width, out.height), (8, 8));
        assert_eq!(out.get(7, 7), pack_argb(255, 9, 9, 9));
    }

    #[test]
    fn test_half_way_mix_matches_source_over() {
        let red = RasterBuffer::filled(2, 2, pack_argb(255, 255, 0, 0));
        let blue = RasterBuffer::filled(2, 2, pack_argb(255, 0, 0, 255));
        let mut blender = FrameBlender::new();
        blender.blend(&red, &tick(0.0, true)).unwrap();
        blender.blend(&red, &tick(100.0, false)).unwrap();
        blender.blend(&blue, &tick(116.0, true)).unwrap();

        // Window started half an aura frame back, so 1000/48 ms in is alpha 0.5.
        let half_window = 116.0 - 500.0 / 24.0 + 1000.0 / 48.0;
        let out = blender.blend(&blue, &tick(half_window, false)).unwrap().clone();
        assert!((blender.last_alpha() - 0.5).abs() < 1e-6);
        let (a, r, g, b) = unpack_argb(out.get(0, 0));
        assert_eq!((a, g), (255, 0));
        assert!(r.abs_diff(128) <= 1 && b.abs_diff(128) <= 1);
    }

    #[test]
    fn test_translucent_frames_stay_premultiplied() {
        let glow = RasterBuffer::filled(3, 3, pack_argb(128, 128, 60, 10));
        let clear = RasterBuffer::new(3, 3);
        let mut blender = FrameBlender::new();
        blender.blend(&clear, &tick(0.0, true)).unwrap();
        blender.blend(&clear, &tick(100.0, false)).unwrap();
        blender.blend(&glow, &tick(116.0, true)).unwrap();
        for now in [120.0, 125.0, 130.0, 140.0] {
            let out = blender.blend(&glow, &tick(now, false)).unwrap();
            for &px in &out.pixels {
                let (a, r, g, b) = unpack_argb(px);
                assert!(r <= a && g <= a && b <= a);
            }
        }
    }
}
