//! Geometry engine: render resolution, letterbox clip, ring scales and buffer
//! sizes, derived from the video's measured layout and the settings.
//!
//! Everything here is a pure function of its inputs so recomputing with the
//! same inputs always yields an identical `Geometry`.

use log::debug;
use serde::Serialize;

use crate::settings::Settings;
use crate::types::{Rect, Size};

/// Baseline for the render target's short edge.
pub const MIN_RENDER_SIZE: f64 = 384.0;

/// Rings drawn inside the video edge.
pub const INNER_STRENGTH: usize = 2;

/// Video counts as filling the fullscreen container within this many px.
const FULLSCREEN_TOLERANCE_PX: f64 = 10.0;

/// On-screen blur is `height * blur * 0.0025` px.
const BLUR_PER_PERCENT: f64 = 0.0025;

/// Measured state of the video element.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct VideoLayout {
    /// Intrinsic (decoded) resolution; zero while metadata is not loaded.
    pub source: Size,
    /// Rendered rect on the host surface.
    pub rect: Rect,
}

/// Measured state of the surrounding container.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ContainerLayout {
    pub rect: Rect,
    pub is_fullscreen: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RingScale {
    pub x: f64,
    pub y: f64,
}

impl RingScale {
    pub const IDENTITY: RingScale = RingScale { x: 1.0, y: 1.0 };

    pub fn is_degenerate(&self) -> bool {
        self.x <= 0.0 || self.y <= 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Geometry {
    pub source: Size,
    /// Rendered video rect as measured.
    pub video_rect: Rect,
    /// Video rect with the letterbox clip removed top and bottom.
    pub clipped_rect: Rect,
    /// Letterbox clip as a fraction of the height, per side.
    pub clip: f64,
    /// On-screen px removed per side.
    pub clip_px: f64,
    /// `1 - 2·clip`.
    pub vertical_compression: f64,
    /// Region of the source frame that is sampled, in source px.
    pub source_window: Rect,
    /// Render target (`p`).
    pub render: Size,
    pub ratio: RingScale,
    pub spread_levels: usize,
    pub edge_step: f64,
    /// Per ring, innermost index first.
    pub ring_scales: Vec<RingScale>,
    /// Blur radius in render px.
    pub blur_radius: usize,
    /// Transparent margin around the snapshot so the blur can bleed outward.
    pub blur_padding: usize,
    /// Render target plus padding.
    pub blur_size: Size,
    /// Scale of the projector frame relative to `blur_size` (≥ 1 per axis).
    pub frame_scale: RingScale,
    pub projector_size: Size,
    /// Host video element scale (1 = untouched).
    pub video_scale: f64,
    pub is_fullscreen: bool,
    pub is_filling_fullscreen: bool,
}

/// Render target for a source resolution: short edge at 384px, or 384×384
/// for sources smaller than that.
pub fn render_size(source_w: usize, source_h: usize) -> Size {
    let (w, h) = (source_w as f64, source_h as f64);
    let scale = (w / MIN_RENDER_SIZE).min(h / MIN_RENDER_SIZE);
    if !(scale >= 1.0) {
        let s = MIN_RENDER_SIZE as usize;
        return Size::new(s, s);
    }
    Size::new(
        ((w / scale).round() as usize).max(1),
        ((h / scale).round() as usize).max(1),
    )
}

/// `max(2, round(spread/edge) + innerStrength + 1)`.
pub fn spread_levels(spread: f64, edge: f64) -> usize {
    let spread = if spread.is_finite() { spread.clamp(0.0, 200.0) } else { 0.0 };
    let edge = if edge.is_finite() { edge.max(2.0) } else { 2.0 };
    ((spread / edge).round() as usize + INNER_STRENGTH + 1).max(2)
}

/// Aspect ratio multipliers: the short on-screen axis grows faster so the
/// rings keep an even margin.
pub fn ring_ratio(width: f64, height: f64) -> RingScale {
    if width <= 0.0 || height <= 0.0 {
        return RingScale::IDENTITY;
    }
    if width > height {
        RingScale {
            x: 1.0,
            y: width / height,
        }
    } else {
        RingScale {
            x: height / width,
            y: 1.0,
        }
    }
}

/// Scale of ring `index`: linear growth outward past `INNER_STRENGTH`,
/// linear shrink (floored at 0) inward.
pub fn ring_scale(index: usize, edge_step: f64, ratio: RingScale) -> RingScale {
    let pos = index as f64 - INNER_STRENGTH as f64;
    if pos > 0.0 {
        RingScale {
            x: 1.0 + edge_step * ratio.x * pos,
            y: 1.0 + edge_step * ratio.y * pos,
        }
    } else if pos < 0.0 {
        RingScale {
            x: (1.0 - edge_step * ratio.x * -pos).max(0.0),
            y: (1.0 - edge_step * ratio.y * -pos).max(0.0),
        }
    } else {
        RingScale::IDENTITY
    }
}

/// Compute the full geometry, or `None` while the video has no measurable
/// size yet.
pub fn recompute(video: &VideoLayout, container: &ContainerLayout, settings: &Settings) -> Option<Geometry> {
    if video.source.w == 0 || video.source.h == 0 || !video.rect.is_measurable() {
        return None;
    }

    let clip = (settings.horizontal_bars_clip_percentage / 100.0).clamp(0.0, 0.49);
    let vertical_compression = 1.0 - clip * 2.0;

    let clip_px = (clip * video.rect.height).round();
    let clipped_rect = Rect::new(
        video.rect.x,
        video.rect.y + clip_px,
        video.rect.width,
        (video.rect.height - clip_px * 2.0).max(1.0),
    );

    let src_h = video.source.h as f64;
    let src_clip = (src_h * clip).round();
    let source_window = Rect::new(
        0.0,
        src_clip,
        video.source.w as f64,
        (src_h - src_clip * 2.0).max(1.0),
    );

    let render = render_size(video.source.w, video.source.h);

    let ratio = ring_ratio(clipped_rect.width, clipped_rect.height);
    let levels = spread_levels(settings.spread, settings.edge);
    let edge_step = settings.edge / 100.0;
    let ring_scales: Vec<RingScale> = (0..levels).map(|i| ring_scale(i, edge_step, ratio)).collect();

    let frame_scale = ring_scales.iter().fold(RingScale::IDENTITY, |acc, s| RingScale {
        x: acc.x.max(s.x),
        y: acc.y.max(s.y),
    });

    let blur_radius = (render.h as f64 * settings.blur.max(0.0) * BLUR_PER_PERCENT).round() as usize;
    let blur_padding = blur_radius * 2;
    let blur_size = Size::new(render.w + blur_padding * 2, render.h + blur_padding * 2);
    let projector_size = Size::new(
        ((blur_size.w as f64 * frame_scale.x).ceil() as usize).max(1),
        ((blur_size.h as f64 * frame_scale.y).ceil() as usize).max(1),
    );

    let is_fullscreen = container.is_fullscreen;
    let is_filling_fullscreen = is_fullscreen
        && (video.rect.width - container.rect.width).abs() < FULLSCREEN_TOLERANCE_PX
        && (video.rect.height - container.rect.height).abs() < FULLSCREEN_TOLERANCE_PX;

    Some(Geometry {
        source: video.source,
        video_rect: video.rect,
        clipped_rect,
        clip,
        clip_px,
        vertical_compression,
        source_window,
        render,
        ratio,
        spread_levels: levels,
        edge_step,
        ring_scales,
        blur_radius,
        blur_padding,
        blur_size,
        frame_scale,
        projector_size,
        video_scale: settings.video_scale / 100.0,
        is_fullscreen,
        is_filling_fullscreen,
    })
}

impl Geometry {
    /// Region of the projector buffer that corresponds to the (unscaled)
    /// render target, in projector px.
    pub fn projector_video_region(&self) -> Rect {
        let w = self.projector_size.w as f64;
        let h = self.projector_size.h as f64;
        let rw = self.render.w as f64;
        let rh = self.render.h as f64;
        Rect::new((w - rw) / 2.0, (h - rh) / 2.0, rw, rh)
    }

    /// On-screen rect the projector buffer must be stretched over.
    pub fn projector_screen_rect(&self) -> Rect {
        let px_per_render = self.clipped_rect.width / self.render.w as f64;
        let py_per_render = self.clipped_rect.height / self.render.h as f64;
        let (cx, cy) = self.clipped_rect.center();
        let w = self.projector_size.w as f64 * px_per_render;
        let h = self.projector_size.h as f64 * py_per_render;
        Rect::new(cx - w / 2.0, cy - h / 2.0, w, h)
    }

    /// On-screen blur the host should apply to the aura container.
    pub fn host_blur_px(&self, blur: f64) -> f64 {
        self.video_rect.height * blur * BLUR_PER_PERCENT
    }
}

/// Outcome of `GeometryEngine::ensure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeometryUpdate {
    NotReady,
    Unchanged,
    Changed,
}

/// Caches the last geometry and recomputes only when invalidated or when the
/// measured inputs moved.
#[derive(Debug, Default)]
pub struct GeometryEngine {
    current: Option<Geometry>,
    inputs: Option<(VideoLayout, ContainerLayout)>,
    invalidated: bool,
}

impl GeometryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&Geometry> {
        self.current.as_ref()
    }

    /// Force a recompute on the next `ensure`.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    /// True when `ensure` would recompute.
    pub fn needs_recompute(&self, video: &VideoLayout, container: &ContainerLayout) -> bool {
        self.invalidated
            || self.current.is_none()
            || self.inputs.as_ref() != Some(&(*video, *container))
    }

    pub fn ensure(&mut self, video: &VideoLayout, container: &ContainerLayout, settings: &Settings) -> GeometryUpdate {
        if !self.needs_recompute(video, container) {
            return GeometryUpdate::Unchanged;
        }
        match recompute(video, container, settings) {
            None => {
                // Stay invalidated so the next tick retries.
                self.invalidated = true;
                GeometryUpdate::NotReady
            }
            Some(geometry) => {
                self.invalidated = false;
                self.inputs = Some((*video, *container));
                if self.current.as_ref() == Some(&geometry) {
                    return GeometryUpdate::Unchanged;
                }
                debug!(
                    "Geometry: render {}x{}, {} rings, projector {}x{}, clip {:.3}",
                    geometry.render.w,
                    geometry.render.h,
                    geometry.spread_levels,
                    geometry.projector_size.w,
                    geometry.projector_size.h,
                    geometry.clip
                );
                self.current = Some(geometry);
                GeometryUpdate::Changed
            }
        }
    }

    pub fn clear(&mut self) {
        self.current = None;
        self.inputs = None;
        self.invalidated = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hd_video() -> VideoLayout {
        VideoLayout {
            source: Size::new(1920, 1080),
            rect: Rect::new(100.0, 50.0, 1280.0, 720.0),
        }
    }

    fn windowed() -> ContainerLayout {
        ContainerLayout {
            rect: Rect::new(0.0, 0.0, 1920.0, 1080.0),
            is_fullscreen: false,
        }
    }

    #[test]
    fn test_scenario_spread_levels() {
        assert_eq!(spread_levels(17.0, 12.0), 4);
        assert_eq!(spread_levels(0.0, 50.0), 3);
    }

    #[test]
    fn test_spread_levels_at_least_two_over_range() {
        let mut spread = 0.0;
        while spread <= 200.0 {
            let mut edge = 2.0;
            while edge <= 50.0 {
                assert!(spread_levels(spread, edge) >= 2);
                edge += 3.7;
            }
            spread += 12.5;
        }
    }

    #[test]
    fn test_scenario_render_size_1080p() {
        assert_eq!(render_size(1920, 1080), Size::new(683, 384));
        assert_eq!(render_size(200, 100), Size::new(384, 384));
        assert_eq!(render_size(1080, 1920), Size::new(384, 683));
    }

    #[test]
    fn test_render_size_never_zero() {
        for (w, h) in [(1, 1), (1, 10_000), (10_000, 1), (384, 384), (100_000, 385)] {
            let s = render_size(w, h);
            assert!(s.w >= 1 && s.h >= 1, "{w}x{h} -> {s:?}");
        }
    }

    #[test]
    fn test_ring_scales_never_negative() {
        let ratio = ring_ratio(1920.0, 200.0);
        for i in 0..20 {
            for edge in [2.0, 12.0, 50.0] {
                let s = ring_scale(i, edge / 100.0, ratio);
                assert!(s.x >= 0.0 && s.y >= 0.0);
            }
        }
        // Innermost ring with a huge step is floored, not negative.
        let s = ring_scale(0, 0.5, ring_ratio(100.0, 10.0));
        assert_eq!(s.y, 0.0);
    }

    #[test]
    fn test_ring_scale_values() {
        let ratio = RingScale { x: 1.0, y: 2.0 };
        assert_eq!(ring_scale(2, 0.1, ratio), RingScale::IDENTITY);
        let out = ring_scale(3, 0.1, ratio);
        assert!((out.x - 1.1).abs() < 1e-12 && (out.y - 1.2).abs() < 1e-12);
        let inner = ring_scale(1, 0.1, ratio);
        assert!((inner.x - 0.9).abs() < 1e-12 && (inner.y - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_scenario_clip_compression() {
        let settings = Settings {
            horizontal_bars_clip_percentage: 10.0,
            ..Settings::default()
        };
        let g = recompute(&hd_video(), &windowed(), &settings).unwrap();
        assert!((g.vertical_compression - 0.8).abs() < 1e-12);
        assert_eq!(g.clip_px, 72.0);
        assert_eq!(g.clipped_rect.height, 720.0 - 144.0);
        assert_eq!(g.source_window.y, 108.0);
        assert_eq!(g.source_window.height, 1080.0 - 216.0);
        // Clip never shrinks the render target.
        assert_eq!(g.render, Size::new(683, 384));
    }

    #[test]
    fn test_not_ready_without_metadata() {
        let mut video = hd_video();
        video.source = Size::new(0, 0);
        assert!(recompute(&video, &windowed(), &Settings::default()).is_none());

        let mut video = hd_video();
        video.rect = Rect::default();
        assert!(recompute(&video, &windowed(), &Settings::default()).is_none());
    }

    #[test]
    fn test_recompute_is_idempotent() {
        let s = Settings::default();
        let a = recompute(&hd_video(), &windowed(), &s).unwrap();
        let b = recompute(&hd_video(), &windowed(), &s).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_projector_contains_outer_ring() {
        let g = recompute(&hd_video(), &windowed(), &Settings::default()).unwrap();
        let outer = g.ring_scales.last().copied().unwrap();
        assert!(g.projector_size.w as f64 >= g.blur_size.w as f64 * outer.x);
        assert!(g.projector_size.h as f64 >= g.blur_size.h as f64 * outer.y);
        let region = g.projector_video_region();
        assert_eq!(region.width, g.render.w as f64);
    }

    #[test]
    fn test_filling_fullscreen() {
        let video = VideoLayout {
            source: Size::new(1920, 1080),
            rect: Rect::new(0.0, 0.0, 1915.0, 1078.0),
        };
        let container = ContainerLayout {
            rect: Rect::new(0.0, 0.0, 1920.0, 1080.0),
            is_fullscreen: true,
        };
        let g = recompute(&video, &container, &Settings::default()).unwrap();
        assert!(g.is_filling_fullscreen);
    }

    #[test]
    fn test_engine_caches_until_inputs_change() {
        let mut engine = GeometryEngine::new();
        let s = Settings::default();
        assert_eq!(engine.ensure(&hd_video(), &windowed(), &s), GeometryUpdate::Changed);
        assert_eq!(engine.ensure(&hd_video(), &windowed(), &s), GeometryUpdate::Unchanged);

        let mut moved = hd_video();
        moved.rect.width = 640.0;
        moved.rect.height = 360.0;
        assert_eq!(engine.ensure(&moved, &windowed(), &s), GeometryUpdate::Changed);

        engine.invalidate();
        // Same inputs after an invalidate recompute to the same geometry.
        assert_eq!(engine.ensure(&moved, &windowed(), &s), GeometryUpdate::Unchanged);
        assert!(!engine.is_invalidated());
    }

    #[test]
    fn test_engine_not_ready_stays_invalidated() {
        let mut engine = GeometryEngine::new();
        let mut video = hd_video();
        video.source = Size::new(0, 0);
        assert_eq!(
            engine.ensure(&video, &windowed(), &Settings::default()),
            GeometryUpdate::NotReady
        );
        assert!(engine.current().is_none());
        assert!(engine.is_invalidated());
    }
}
