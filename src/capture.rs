//! Snapshot the video into the render-size buffer and decide whether the
//! aura needs a new composite.

use log::{debug, warn};

use crate::frame_rate::FrameTimingState;
use crate::geometry::Geometry;
use crate::raster::{DrawMode, draw_scaled};
use crate::settings::SyncMode;
use crate::source::VideoSource;
use crate::types::{RasterBuffer, Rect};

/// Perfect mode trusts staleness only this long after the video was hidden.
pub const PERFECT_VISIBILITY_WINDOW_MS: f64 = 3000.0;

/// Counter jumps are only attributed to the aura after this many frames.
pub const DROPPED_FRAMES_WARMUP: u64 = 120;

const DIFF_ROWS: usize = 3;
const DIFF_SAMPLE_STEP: usize = 10;

/// Per-tick inputs that don't come from the source itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureContext {
    pub now: f64,
    /// A video-frame-presented callback arrived since the last tick.
    pub frame_presented: bool,
    /// Last time the video went from hidden to visible (or was hidden).
    pub last_invisible_at: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureOutcome {
    pub captured: bool,
    pub changed: bool,
    /// Pixel reads were blocked for the first time this session.
    pub newly_restricted: bool,
}

/// True when the sampled rows should be treated as a new frame.
pub fn is_new_frame(old: &[u32], new: &[u32]) -> bool {
    old.is_empty() || old.len() != new.len() || old != new
}

#[derive(Debug)]
pub struct FrameCapture {
    snapshot: RasterBuffer,
    sampled: Vec<u32>,
    restricted: bool,
}

impl Default for FrameCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCapture {
    pub fn new() -> Self {
        Self {
            snapshot: RasterBuffer::new(1, 1),
            sampled: Vec::new(),
            restricted: false,
        }
    }

    /// Latest capture at render resolution, letterbox already cut away.
    pub fn snapshot(&self) -> &RasterBuffer {
        &self.snapshot
    }

    /// Pixel sampling has been found blocked for this source.
    pub fn is_restricted(&self) -> bool {
        self.restricted
    }

    /// Forget the previous sample so the next capture counts as new.
    pub fn reset(&mut self) {
        self.sampled.clear();
    }

    /// A different source starts a fresh restriction check.
    pub fn new_source(&mut self) {
        self.reset();
        self.restricted = false;
    }

    pub fn release(&mut self) {
        self.snapshot.release();
        self.sampled.clear();
    }

    pub fn capture_if_needed(
        &mut self,
        source: &dyn VideoSource,
        geometry: &Geometry,
        mode: SyncMode,
        ctx: &CaptureContext,
        timing: &mut FrameTimingState,
    ) -> CaptureOutcome {
        let previous = timing.video_frame_count;
        let counter = source.frame_counter();
        let counter_advanced = counter != previous;

        if mode == SyncMode::PowerSaver && !counter_advanced {
            return CaptureOutcome::default();
        }

        if previous > DROPPED_FRAMES_WARMUP && counter > previous + 1 {
            let missed = counter - (previous + 1);
            timing.aura_dropped_frames += missed;
            if missed > 10 {
                debug!("Aura missed {missed} video frames");
            }
        }
        timing.video_frame_count = counter;

        if self.snapshot.resize(geometry.render.w, geometry.render.h) {
            debug!("Snapshot buffer resized to {}x{}", geometry.render.w, geometry.render.h);
            self.sampled.clear();
        }
        let target = Rect::new(0.0, 0.0, self.snapshot.width as f64, self.snapshot.height as f64);
        draw_scaled(&mut self.snapshot, source.frame(), geometry.source_window, target, DrawMode::Copy);

        let mut outcome = CaptureOutcome {
            captured: true,
            changed: false,
            newly_restricted: false,
        };

        let mut stale_fallback = false;
        outcome.changed = match mode {
            SyncMode::PowerSaver => true,
            SyncMode::HighPerformance => true,
            SyncMode::Balanced => {
                if !self.restricted && !source.is_origin_clean() {
                    warn!("Video pixels cannot be read (cross-origin); falling back to frame counters");
                    self.restricted = true;
                    self.sampled.clear();
                    outcome.newly_restricted = true;
                }
                if self.restricted {
                    counter_advanced
                } else {
                    self.sample_rows_changed()
                }
            }
            SyncMode::Perfect => {
                let recently_hidden = ctx
                    .last_invisible_at
                    .is_some_and(|t| ctx.now - t < PERFECT_VISIBILITY_WINDOW_MS);
                let stale = match (timing.last_video_frame_time, timing.video_frame_duration()) {
                    (Some(last), Some(duration)) => ctx.now - last > duration,
                    _ => false,
                };
                stale_fallback = recently_hidden && stale;
                counter_advanced || ctx.frame_presented || stale_fallback
            }
        };

        if counter_advanced || ctx.frame_presented || stale_fallback {
            timing.last_video_frame_time = Some(ctx.now);
        }
        outcome
    }

    /// Compare every 10th pixel of three rows against the previous capture.
    fn sample_rows_changed(&mut self) -> bool {
        let (w, h) = (self.snapshot.width, self.snapshot.height);
        let mut sampled = Vec::with_capacity(DIFF_ROWS * w.div_ceil(DIFF_SAMPLE_STEP));
        for k in 1..=DIFF_ROWS {
            let y = (h * k / (DIFF_ROWS + 1)).min(h - 1);
            let row = &self.snapshot.pixels[y * w..(y + 1) * w];
            sampled.extend(row.iter().step_by(DIFF_SAMPLE_STEP));
        }
        let changed = is_new_frame(&self.sampled, &sampled);
        self.sampled = sampled;
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{ContainerLayout, recompute};
    use crate::settings::Settings;
    use crate::source::SyntheticVideo;

    fn setup() -> (SyntheticVideo, Geometry) {
        let video = SyntheticVideo::new(480, 270, 30.0);
        let g = recompute(&video.layout(), &ContainerLayout::default(), &Settings::default()).unwrap();
        (video, g)
    }

    #[test]
    fn test_is_new_frame_bootstrap() {
        assert!(is_new_frame(&[], &[]));
        assert!(is_new_frame(&[], &[1, 2]));
        assert!(is_new_frame(&[1], &[1, 2]));
        assert!(!is_new_frame(&[1, 2], &[1, 2]));
        assert!(is_new_frame(&[1, 2], &[1, 3]));
    }

    #[test]
    fn test_scenario_power_saver_unchanged_counter() {
        let (mut video, g) = setup();
        let mut cap = FrameCapture::new();
        let mut timing = FrameTimingState::default();
        video.advance(0.0);
        video.advance(100.0);
        let ctx = CaptureContext::default();

        let first = cap.capture_if_needed(&video, &g, SyncMode::PowerSaver, &ctx, &mut timing);
        assert!(first.captured && first.changed);

        let second = cap.capture_if_needed(&video, &g, SyncMode::PowerSaver, &ctx, &mut timing);
        assert_eq!(second, CaptureOutcome::default());
    }

    #[test]
    fn test_scenario_balanced_identical_rows() {
        let (mut video, g) = setup();
        video.advance(0.0);
        let mut cap = FrameCapture::new();
        let mut timing = FrameTimingState::default();
        let ctx = CaptureContext::default();

        assert!(cap.capture_if_needed(&video, &g, SyncMode::Balanced, &ctx, &mut timing).changed);
        let again = cap.capture_if_needed(&video, &g, SyncMode::Balanced, &ctx, &mut timing);
        assert!(again.captured);
        assert!(!again.changed);

        video.advance(200.0);
        assert!(cap.capture_if_needed(&video, &g, SyncMode::Balanced, &ctx, &mut timing).changed);
    }

    #[test]
    fn test_high_performance_always_changed() {
        let (video, g) = setup();
        let mut cap = FrameCapture::new();
        let mut timing = FrameTimingState::default();
        let ctx = CaptureContext::default();
        for _ in 0..3 {
            let o = cap.capture_if_needed(&video, &g, SyncMode::HighPerformance, &ctx, &mut timing);
            assert!(o.captured && o.changed);
        }
    }

    #[test]
    fn test_restricted_source_falls_back_once() {
        let (mut video, g) = setup();
        video.set_origin_clean(false);
        video.advance(0.0);
        let mut cap = FrameCapture::new();
        let mut timing = FrameTimingState::default();
        let ctx = CaptureContext::default();

        let first = cap.capture_if_needed(&video, &g, SyncMode::Balanced, &ctx, &mut timing);
        assert!(first.newly_restricted);
        assert!(cap.is_restricted());

        video.advance(100.0);
        let second = cap.capture_if_needed(&video, &g, SyncMode::Balanced, &ctx, &mut timing);
        assert!(!second.newly_restricted);
        assert!(second.changed);
        let third = cap.capture_if_needed(&video, &g, SyncMode::Balanced, &ctx, &mut timing);
        assert!(!third.changed);

        cap.new_source();
        assert!(!cap.is_restricted());
    }

    #[test]
    fn test_perfect_mode_uses_presented_callback() {
        let (video, g) = setup();
        let mut cap = FrameCapture::new();
        let mut timing = FrameTimingState::default();
        let ctx = CaptureContext::default();
        cap.capture_if_needed(&video, &g, SyncMode::Perfect, &ctx, &mut timing);

        let idle = cap.capture_if_needed(&video, &g, SyncMode::Perfect, &ctx, &mut timing);
        assert!(idle.captured && !idle.changed);

        let presented = CaptureContext {
            frame_presented: true,
            ..ctx
        };
        assert!(cap.capture_if_needed(&video, &g, SyncMode::Perfect, &presented, &mut timing).changed);
    }

    #[test]
    fn test_perfect_mode_stale_after_hidden() {
        let (video, g) = setup();
        let mut cap = FrameCapture::new();
        let mut timing = FrameTimingState {
            video_frame_rate: 30.0,
            last_video_frame_time: Some(1000.0),
            ..Default::default()
        };
        let ctx = CaptureContext {
            now: 1100.0,
            frame_presented: false,
            last_invisible_at: Some(500.0),
        };
        // Counter equals the stored count, so only staleness can flag it.
        timing.video_frame_count = video.frame_counter();
        assert!(cap.capture_if_needed(&video, &g, SyncMode::Perfect, &ctx, &mut timing).changed);

        let long_ago = CaptureContext {
            last_invisible_at: Some(-5000.0),
            ..ctx
        };
        assert!(!cap.capture_if_needed(&video, &g, SyncMode::Perfect, &long_ago, &mut timing).changed);
    }

    #[test]
    fn test_counter_jump_counts_aura_drops() {
        let (mut video, g) = setup();
        let mut cap = FrameCapture::new();
        let mut timing = FrameTimingState {
            video_frame_count: 200,
            ..Default::default()
        };
        video.advance(0.0);
        video.advance(205.0 * 1000.0 / 30.0 + 1.0);
        cap.capture_if_needed(&video, &g, SyncMode::HighPerformance, &CaptureContext::default(), &mut timing);
        assert_eq!(timing.aura_dropped_frames, 4);
        assert_eq!(timing.video_frame_count, 205);
    }

    #[test]
    fn test_perfect_mode_stale_fallback_fires_once_per_frame() {
        let (video, g) = setup();
        let mut cap = FrameCapture::new();
        let mut timing = FrameTimingState {
            video_frame_rate: 30.0,
            last_video_frame_time: Some(1000.0),
            video_frame_count: video.frame_counter(),
            ..Default::default()
        };
        let at = |now: f64| CaptureContext {
            now,
            frame_presented: false,
            last_invisible_at: Some(1000.0),
        };

        assert!(cap.capture_if_needed(&video, &g, SyncMode::Perfect, &at(1100.0), &mut timing).changed);
        assert_eq!(timing.last_video_frame_time, Some(1100.0));

        // Within one frame duration of the refresh nothing is stale.
        assert!(!cap.capture_if_needed(&video, &g, SyncMode::Perfect, &at(1116.0), &mut timing).changed);
        assert!(!cap.capture_if_needed(&video, &g, SyncMode::Perfect, &at(1130.0), &mut timing).changed);
        assert_eq!(timing.last_video_frame_time, Some(1100.0));

        assert!(cap.capture_if_needed(&video, &g, SyncMode::Perfect, &at(1140.0), &mut timing).changed);
        assert_eq!(timing.last_video_frame_time, Some(1140.0));
    }
}
