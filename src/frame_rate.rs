//! Rolling-window frame-rate counters and the per-session timing state.

use serde::Serialize;

/// Rates are recomputed once per window of at least this many ms.
pub const RATE_WINDOW_MS: f64 = 2000.0;

/// Which rate a sample belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateKind {
    Video,
    Display,
    Aura,
}

/// One rolling-window counter.
#[derive(Debug, Clone, Default)]
struct RateCounter {
    start_time: Option<f64>,
    start_count: u64,
    rate: f64,
}

impl RateCounter {
    fn sample(&mut self, now: f64, counter: u64) -> f64 {
        let Some(start) = self.start_time else {
            self.start_time = Some(now);
            self.start_count = counter;
            return self.rate;
        };
        let elapsed = now - start;
        if elapsed >= RATE_WINDOW_MS {
            // A counter that went backwards (seek/reset) reads as 0, never negative.
            let frames = counter as f64 - self.start_count as f64;
            self.rate = (frames / (elapsed / 1000.0)).max(0.0);
            self.start_time = Some(now);
            self.start_count = counter;
        }
        self.rate
    }

    fn reset(&mut self) {
        *self = RateCounter::default();
    }
}

/// Video, display and aura frame rates.
#[derive(Debug, Clone, Default)]
pub struct FrameRateEstimator {
    video: RateCounter,
    display: RateCounter,
    aura: RateCounter,
    display_ticks: u64,
}

impl FrameRateEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the current value of a counter; returns the latest rate.
    pub fn sample(&mut self, kind: RateKind, counter: u64, now: f64) -> f64 {
        match kind {
            RateKind::Video => self.video.sample(now, counter),
            RateKind::Display => self.display.sample(now, counter),
            RateKind::Aura => self.aura.sample(now, counter),
        }
    }

    /// Count one display refresh and sample the display rate.
    pub fn tick_display(&mut self, now: f64) -> f64 {
        self.display_ticks += 1;
        self.display.sample(now, self.display_ticks)
    }

    pub fn rate(&self, kind: RateKind) -> f64 {
        match kind {
            RateKind::Video => self.video.rate,
            RateKind::Display => self.display.rate,
            RateKind::Aura => self.aura.rate,
        }
    }

    pub fn reset(&mut self) {
        self.video.reset();
        self.display.reset();
        self.aura.reset();
        self.display_ticks = 0;
    }
}

/// Counters for one playback session.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameTimingState {
    /// Decoded+dropped counter value at the last capture.
    pub video_frame_count: u64,
    /// Dropped video frames as reported by the source.
    pub dropped_video_frames: u64,
    /// Dropped frames accrued while off-screen (false positives).
    pub dropped_video_frames_correction: u64,
    pub display_frame_count: u64,
    pub aura_frame_count: u64,
    pub aura_dropped_frames: u64,
    pub last_draw_time: Option<f64>,
    /// When the last genuinely new video frame was seen.
    pub last_video_frame_time: Option<f64>,
    pub video_frame_rate: f64,
    pub display_frame_rate: f64,
    pub aura_frame_rate: f64,
}

impl FrameTimingState {
    pub fn reset(&mut self) {
        *self = FrameTimingState::default();
    }

    /// Record the source's dropped counter. Frames dropped while the video
    /// was not visible go into the correction offset instead.
    pub fn update_dropped(&mut self, dropped: u64, visible: bool) {
        if !visible && dropped > self.dropped_video_frames {
            self.dropped_video_frames_correction += dropped - self.dropped_video_frames;
        }
        self.dropped_video_frames = dropped;
    }

    /// Dropped frames that happened while the video was on screen.
    pub fn visible_dropped_frames(&self) -> u64 {
        self.dropped_video_frames
            .saturating_sub(self.dropped_video_frames_correction)
    }

    /// Expected ms between video frames, if the rate is known.
    pub fn video_frame_duration(&self) -> Option<f64> {
        (self.video_frame_rate > 0.0).then(|| 1000.0 / self.video_frame_rate)
    }

    /// Copy the estimator's latest rates in.
    pub fn refresh_rates(&mut self, estimator: &FrameRateEstimator) {
        self.video_frame_rate = estimator.rate(RateKind::Video);
        self.display_frame_rate = estimator.rate(RateKind::Display);
        self.aura_frame_rate = estimator.rate(RateKind::Aura);
    }

    /// Lines for the on-screen stats overlay.
    pub fn stats_lines(&self) -> Vec<StatsLine> {
        let display_level = if self.display_frame_rate < self.video_frame_rate {
            StatsLevel::Bad
        } else if self.display_frame_rate < self.video_frame_rate + 5.0 {
            StatsLevel::Warn
        } else {
            StatsLevel::Good
        };
        let aura_level = if self.aura_frame_rate + 1.0 < self.video_frame_rate.min(self.display_frame_rate) {
            StatsLevel::Warn
        } else {
            StatsLevel::Good
        };
        vec![
            StatsLine {
                text: format!("VIDEO: {:.2}", self.video_frame_rate),
                level: StatsLevel::Good,
            },
            StatsLine {
                text: format!("DISPLAY: {:.2}", self.display_frame_rate),
                level: display_level,
            },
            StatsLine {
                text: format!("AURA: {:.2}", self.aura_frame_rate),
                level: aura_level,
            },
            StatsLine {
                text: format!("DROPPED: {}", self.visible_dropped_frames()),
                level: if self.visible_dropped_frames() > 0 {
                    StatsLevel::Warn
                } else {
                    StatsLevel::Good
                },
            },
            StatsLine {
                text: format!("AURA DROPPED: {}", self.aura_dropped_frames),
                level: if self.aura_dropped_frames > 0 {
                    StatsLevel::Warn
                } else {
                    StatsLevel::Good
                },
            },
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsLevel {
    Good,
    Warn,
    Bad,
}

impl StatsLevel {
    /// 0x00RRGGBB text color.
    pub fn color(self) -> u32 {
        match self {
            StatsLevel::Good => 0x0033_FF33,
            StatsLevel::Warn => 0x00FF_FF00,
            StatsLevel::Bad => 0x00FF_3333,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatsLine {
    pub text: String,
    pub level: StatsLevel,
}
