//! Letterbox (horizontal bar) detection contract and the slot that keeps a
//! detector from running twice at once.
//!
//! Detectors report through a callback; the result waits in a mailbox until
//! the engine drains it at the start of its next tick.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use log::debug;

use crate::types::{RasterBuffer, unpack_argb};

/// Receives the detected clip percentage, or `None` when nothing was found.
pub type DetectCallback = Box<dyn FnOnce(Option<f64>)>;

pub trait HorizontalBarDetector {
    /// `snapshot` is the whole video frame, before any clipping, so the
    /// result is an absolute percentage and may be smaller than
    /// `current_clip_percent`.
    fn detect(
        &mut self,
        snapshot: &RasterBuffer,
        detect_colored_bars: bool,
        offset_percent: f64,
        current_clip_percent: f64,
        done: DetectCallback,
    );
}

/// Busy flag plus result mailbox shared with in-flight callbacks.
#[derive(Debug, Default)]
pub struct BarDetectionSlot {
    busy: Rc<Cell<bool>>,
    mailbox: Rc<RefCell<Option<Option<f64>>>>,
}

impl BarDetectionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.get()
    }

    /// Start a detection unless one is still running. Returns whether it ran.
    pub fn schedule(
        &self,
        detector: &mut dyn HorizontalBarDetector,
        snapshot: &RasterBuffer,
        detect_colored_bars: bool,
        offset_percent: f64,
        current_clip_percent: f64,
    ) -> bool {
        if self.busy.get() {
            return false;
        }
        self.busy.set(true);
        let busy = Rc::clone(&self.busy);
        let mailbox = Rc::clone(&self.mailbox);
        detector.detect(
            snapshot,
            detect_colored_bars,
            offset_percent,
            current_clip_percent,
            Box::new(move |result| {
                *mailbox.borrow_mut() = Some(result);
                busy.set(false);
            }),
        );
        true
    }

    /// Detected clip percentage waiting to be applied, if any.
    pub fn take_result(&self) -> Option<f64> {
        self.mailbox.borrow_mut().take().flatten()
    }

    /// Drop any pending result; an in-flight callback still clears `busy`.
    pub fn clear(&self) {
        self.mailbox.borrow_mut().take();
    }
}

/// Luma below this counts as black.
const BLACK_LUMA: f64 = 24.0;
/// Per-channel tolerance for a uniformly colored bar.
const COLOR_TOLERANCE: i32 = 12;
const SAMPLE_STEP: usize = 4;

/// Scans rows inward from the top and bottom edge while they stay uniformly
/// black (or uniformly one color) and answers synchronously.
#[derive(Debug, Default)]
pub struct RowScanDetector;

impl RowScanDetector {
    fn row_is_bar(snapshot: &RasterBuffer, y: usize, reference: u32, colored: bool) -> bool {
        let (_, rr, rg, rb) = unpack_argb(reference);
        let row = &snapshot.pixels[y * snapshot.width..(y + 1) * snapshot.width];
        row.iter().step_by(SAMPLE_STEP).all(|&px| {
            let (_, r, g, b) = unpack_argb(px);
            if colored {
                (r as i32 - rr as i32).abs() <= COLOR_TOLERANCE
                    && (g as i32 - rg as i32).abs() <= COLOR_TOLERANCE
                    && (b as i32 - rb as i32).abs() <= COLOR_TOLERANCE
            } else {
                0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64 <= BLACK_LUMA
            }
        })
    }

    /// Rows of bar at the top and bottom, the smaller of the two.
    /// `None` when no content row was found at all (a black or flat frame).
    pub fn bar_rows(snapshot: &RasterBuffer, colored: bool) -> Option<usize> {
        let h = snapshot.height;
        if h < 2 || snapshot.width == 0 {
            return None;
        }
        let top_ref = snapshot.get(0, 0);
        let bottom_ref = snapshot.get(0, h - 1);
        let limit = h / 2;
        let top = (0..limit)
            .take_while(|&y| Self::row_is_bar(snapshot, y, top_ref, colored))
            .count();
        let bottom = (0..limit)
            .take_while(|&i| Self::row_is_bar(snapshot, h - 1 - i, bottom_ref, colored))
            .count();
        if top == limit && bottom == limit {
            return None;
        }
        Some(top.min(bottom))
    }
}

impl HorizontalBarDetector for RowScanDetector {
    fn detect(
        &mut self,
        snapshot: &RasterBuffer,
        detect_colored_bars: bool,
        offset_percent: f64,
        current_clip_percent: f64,
        done: DetectCallback,
    ) {
        let Some(rows) = Self::bar_rows(snapshot, detect_colored_bars) else {
            debug!("Bar detector: no content rows, keeping clip {current_clip_percent}%");
            done(None);
            return;
        };
        let bars = rows as f64 / snapshot.height as f64 * 100.0;
        let percent = ((bars + offset_percent).clamp(0.0, 49.0) * 10.0).round() / 10.0;
        debug!("Bar detector: {rows} rows, clip {current_clip_percent}% -> {percent}%");
        done(Some(percent));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::pack_argb;

    fn letterboxed(h: usize, bar: usize, bar_color: u32) -> RasterBuffer {
        let mut buf = RasterBuffer::filled(40, h, pack_argb(255, 120, 180, 60));
        for y in (0..bar).chain(h - bar..h) {
            for x in 0..40 {
                buf.set(x, y, bar_color);
            }
        }
        buf
    }

    struct Deferred(Option<DetectCallback>);

    impl HorizontalBarDetector for Deferred {
        fn detect(&mut self, _: &RasterBuffer, _: bool, _: f64, _: f64, done: DetectCallback) {
            self.0 = Some(done);
        }
    }

    #[test]
    fn test_black_bars_detected() {
        let buf = letterboxed(100, 10, pack_argb(255, 0, 0, 0));
        assert_eq!(RowScanDetector::bar_rows(&buf, false), Some(10));

        let slot = BarDetectionSlot::new();
        assert!(slot.schedule(&mut RowScanDetector, &buf, false, 0.0, 0.0));
        assert!(!slot.is_busy());
        assert_eq!(slot.take_result(), Some(10.0));
        assert_eq!(slot.take_result(), None);
    }

    #[test]
    fn test_colored_bars_need_flag() {
        let buf = letterboxed(100, 5, pack_argb(255, 200, 0, 200));
        assert_eq!(RowScanDetector::bar_rows(&buf, false), Some(0));
        assert_eq!(RowScanDetector::bar_rows(&buf, true), Some(5));
    }

    #[test]
    fn test_black_frame_keeps_current_clip() {
        let black = RasterBuffer::filled(40, 100, pack_argb(255, 0, 0, 0));
        assert_eq!(RowScanDetector::bar_rows(&black, false), None);
        assert_eq!(RowScanDetector::bar_rows(&black, true), None);

        let slot = BarDetectionSlot::new();
        assert!(slot.schedule(&mut RowScanDetector, &black, false, 0.0, 12.0));
        assert!(!slot.is_busy());
        assert_eq!(slot.take_result(), None);
    }

    #[test]
    fn test_clip_shrinks_when_bars_go_away() {
        let slot = BarDetectionSlot::new();
        let full = letterboxed(100, 0, pack_argb(255, 0, 0, 0));
        assert!(slot.schedule(&mut RowScanDetector, &full, false, 0.0, 10.0));
        assert_eq!(slot.take_result(), Some(0.0));

        let thinner = letterboxed(100, 4, pack_argb(255, 0, 0, 0));
        assert!(slot.schedule(&mut RowScanDetector, &thinner, false, 1.0, 10.0));
        assert_eq!(slot.take_result(), Some(5.0));
    }

    #[test]
    fn test_busy_slot_skips_duplicates() {
        let buf = RasterBuffer::new(4, 4);
        let slot = BarDetectionSlot::new();
        let mut deferred = Deferred(None);
        assert!(slot.schedule(&mut deferred, &buf, false, 0.0, 0.0));
        assert!(slot.is_busy());
        assert!(!slot.schedule(&mut deferred, &buf, false, 0.0, 0.0));

        let done = deferred.0.take().unwrap();
        done(Some(3.5));
        assert!(!slot.is_busy());
        assert_eq!(slot.take_result(), Some(3.5));
    }
}
