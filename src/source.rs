//! Video source contract plus a procedural source used by the demo and tests.

use crate::error::{Error, PlatformErrorKind, Result};
use crate::geometry::{ContainerLayout, VideoLayout};
use crate::types::{RasterBuffer, Rect, Size, pack_argb};

/// What the engine needs from the thing being played.
pub trait VideoSource {
    /// Decoded resolution; zero until metadata is available.
    fn intrinsic_size(&self) -> Size;

    /// Where the video is rendered on the host surface.
    fn rect(&self) -> Rect;

    fn container(&self) -> ContainerLayout;

    /// Playback position in seconds.
    fn current_time(&self) -> f64;

    fn is_paused(&self) -> bool;

    /// Frames decoded so far (monotonic until a seek or a new source).
    fn decoded_frames(&self) -> u64;

    fn dropped_frames(&self) -> u64;

    /// Current frame at intrinsic resolution.
    fn frame(&self) -> &RasterBuffer;

    /// False when the pixels may be drawn but not read back (cross-origin).
    fn is_origin_clean(&self) -> bool {
        true
    }

    /// Decoder/platform health; platform failures surface here.
    fn health(&self) -> Result<()> {
        Ok(())
    }

    /// Counter used for change detection: every frame the decoder touched.
    fn frame_counter(&self) -> u64 {
        self.decoded_frames() + self.dropped_frames()
    }

    fn layout(&self) -> VideoLayout {
        VideoLayout {
            source: self.intrinsic_size(),
            rect: self.rect(),
        }
    }
}

/// Procedural "video": a drifting hue gradient with a bouncing block and
/// optional letterbox bars. Frames advance with wall time at `fps`.
#[derive(Debug, Clone)]
pub struct SyntheticVideo {
    size: Size,
    rect: Rect,
    container: ContainerLayout,
    fps: f64,
    started_at: Option<f64>,
    decoded: u64,
    dropped: u64,
    paused: bool,
    origin_clean: bool,
    bar_fraction: f64,
    fault: Option<PlatformErrorKind>,
    frame: RasterBuffer,
}

impl SyntheticVideo {
    pub fn new(width: usize, height: usize, fps: f64) -> Self {
        let size = Size::new(width.max(1), height.max(1));
        let rect = Rect::new(0.0, 0.0, size.w as f64, size.h as f64);
        let mut video = Self {
            size,
            rect,
            container: ContainerLayout {
                rect,
                is_fullscreen: false,
            },
            fps: fps.max(1.0),
            started_at: None,
            decoded: 0,
            dropped: 0,
            paused: false,
            origin_clean: true,
            bar_fraction: 0.0,
            fault: None,
            frame: RasterBuffer::new(size.w, size.h),
        };
        video.render();
        video
    }

    pub fn with_rect(mut self, rect: Rect) -> Self {
        self.rect = rect;
        self
    }

    pub fn with_container(mut self, container: ContainerLayout) -> Self {
        self.container = container;
        self
    }

    /// Black bars covering `fraction` of the height, top and bottom each.
    pub fn with_letterbox(mut self, fraction: f64) -> Self {
        self.bar_fraction = fraction.clamp(0.0, 0.49);
        self.render();
        self
    }

    pub fn set_rect(&mut self, rect: Rect) {
        self.rect = rect;
    }

    pub fn set_container(&mut self, container: ContainerLayout) {
        self.container = container;
    }

    pub fn set_origin_clean(&mut self, clean: bool) {
        self.origin_clean = clean;
    }

    pub fn set_paused(&mut self, paused: bool) {
        self.paused = paused;
    }

    /// Make `health()` fail with `kind` until cleared with `None`.
    pub fn set_fault(&mut self, kind: Option<PlatformErrorKind>) {
        self.fault = kind;
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    /// Report `n` more frames as dropped by the decoder.
    pub fn drop_frames(&mut self, n: u64) {
        self.dropped += n;
    }

    /// Restart numbering, as a seek does on real decoders.
    pub fn seek(&mut self, now: f64) {
        self.started_at = Some(now);
        self.decoded = 0;
        self.dropped = 0;
        self.render();
    }

    /// Move playback to `now`; returns true when a new frame was decoded.
    pub fn advance(&mut self, now: f64) -> bool {
        let start = *self.started_at.get_or_insert(now);
        if self.paused {
            return false;
        }
        let due = ((now - start).max(0.0) * self.fps / 1000.0).floor() as u64;
        if due <= self.decoded + self.dropped {
            return false;
        }
        self.decoded = due.saturating_sub(self.dropped);
        self.render();
        true
    }

    fn render(&mut self) {
        let n = self.decoded + self.dropped;
        let (w, h) = (self.size.w, self.size.h);
        let bar = (h as f64 * self.bar_fraction).round() as usize;
        let phase = n as f64 / self.fps * 0.1;

        let block = (w.min(h) / 4).max(1);
        let travel_x = w.saturating_sub(block).max(1);
        let travel_y = h.saturating_sub(2 * bar + block).max(1);
        let bx = bounce(n as usize * 3, travel_x);
        let by = bar + bounce(n as usize * 2, travel_y);

        for y in 0..h {
            for x in 0..w {
                let px = if y < bar || y >= h - bar {
                    pack_argb(255, 0, 0, 0)
                } else if x >= bx && x < bx + block && y >= by && y < by + block {
                    pack_argb(255, 250, 250, 240)
                } else {
                    let hue = (x as f64 / w as f64 + phase).fract();
                    let value = 0.35 + 0.45 * (y as f64 / h as f64);
                    hsv(hue, 0.85, value)
                };
                self.frame.set(x, y, px);
            }
        }
    }
}

fn bounce(t: usize, span: usize) -> usize {
    let period = span * 2;
    let p = t % period.max(1);
    if p < span { p } else { period - p }
}

fn hsv(h: f64, s: f64, v: f64) -> u32 {
    let i = (h * 6.0).floor();
    let f = h * 6.0 - i;
    let p = v * (1.0 - s);
    let q = v * (1.0 - f * s);
    let t = v * (1.0 - (1.0 - f) * s);
    let (r, g, b) = match i as i64 % 6 {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };
    let q8 = |c: f64| (c * 255.0).round().clamp(0.0, 255.0) as u8;
    pack_argb(255, q8(r), q8(g), q8(b))
}

impl VideoSource for SyntheticVideo {
    fn intrinsic_size(&self) -> Size {
        self.size
    }

    fn rect(&self) -> Rect {
        self.rect
    }

    fn container(&self) -> ContainerLayout {
        self.container
    }

    fn current_time(&self) -> f64 {
        (self.decoded + self.dropped) as f64 / self.fps
    }

    fn is_paused(&self) -> bool {
        self.paused
    }

    fn decoded_frames(&self) -> u64 {
        self.decoded
    }

    fn dropped_frames(&self) -> u64 {
        self.dropped
    }

    fn frame(&self) -> &RasterBuffer {
        &self.frame
    }

    fn is_origin_clean(&self) -> bool {
        self.origin_clean
    }

    fn health(&self) -> Result<()> {
        match self.fault {
            Some(kind) => Err(Error::platform(kind, "synthetic decoder fault")),
            None => Ok(()),
        }
    }
}
