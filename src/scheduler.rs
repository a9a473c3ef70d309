//! Frame scheduler: owns every pipeline stage and runs them once per display
//! refresh.
//!
//! The host drives the engine through callbacks. It asks for them via a
//! [`FrameRequester`] and then calls `on_animation_frame`,
//! `on_video_frame_presented` and `on_idle` when they fire. Time always comes
//! in as milliseconds.

use std::collections::{HashSet, VecDeque};

use log::{debug, info, warn};
use serde::Serialize;

use crate::blender::{self, BlendTick, FrameBlender};
use crate::capture::{CaptureContext, FrameCapture};
use crate::crash::{CrashReporter, DiagnosticContext, LogCrashReporter};
use crate::error::{Error, PlatformErrorKind, Result};
use crate::frame_rate::{FrameRateEstimator, FrameTimingState, RateKind, StatsLine};
use crate::geometry::{Geometry, GeometryEngine, GeometryUpdate};
use crate::letterbox::{BarDetectionSlot, HorizontalBarDetector, RowScanDetector};
use crate::projector::ProjectorCompositor;
use crate::raster::{DrawMode, draw_scaled};
use crate::settings::{
    DebouncedStore, MemoryStore, SettingKey, SettingUpdate, SettingValue, Settings, SettingsStore, SyncMode,
};
use crate::shadow::ShadowMaskGenerator;
use crate::source::VideoSource;
use crate::surface::SurfaceStyle;
use crate::types::{Mask, RasterBuffer, Rect};

/// Idle upkeep runs at most this often.
pub const IDLE_UPKEEP_INTERVAL_MS: f64 = 2000.0;

/// Transient errors inside this window count toward escalation.
pub const TRANSIENT_WINDOW_MS: f64 = 1000.0;
pub const TRANSIENT_ESCALATION_COUNT: usize = 3;

/// Host-side callback registration.
pub trait FrameRequester {
    fn request_animation_frame(&mut self);
    fn request_video_frame_callback(&mut self);
    fn request_idle_callback(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SchedulerState {
    Idle,
    Scheduled,
    Drawing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickStatus {
    /// Disabled, page inactive or video not visible.
    Inactive,
    /// Geometry could not be measured yet.
    NotReady,
    /// Hidden by the fullscreen rules.
    Hidden,
    /// Before the frame-rate cap allows a new frame; only capture ran.
    Advisory,
    /// A new aura frame was composed.
    Drawn,
    /// No new frame; the blend was advanced.
    Blended,
    /// Nothing changed.
    Unchanged,
    /// A handled error skipped the tick.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub status: TickStatus,
    pub captured: bool,
    pub changed: bool,
    pub composed: bool,
    pub blended: bool,
}

impl TickReport {
    fn new(status: TickStatus) -> Self {
        Self {
            status,
            captured: false,
            changed: false,
            composed: false,
            blended: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    /// Drop this tick and keep going.
    SkipTick,
    /// Already escalated once; swallow.
    Suppress,
    /// Report and stop.
    Propagate,
}

/// Decides what happens to an error that escaped a tick.
#[derive(Debug, Default)]
pub struct ErrorPolicy {
    transient: VecDeque<f64>,
    suppressed: HashSet<PlatformErrorKind>,
}

impl ErrorPolicy {
    pub fn classify(&mut self, err: &Error, now: f64) -> ErrorDisposition {
        let Some(kind) = err.platform_kind() else {
            return ErrorDisposition::Propagate;
        };
        if self.suppressed.contains(&kind) {
            return ErrorDisposition::Suppress;
        }
        match kind {
            PlatformErrorKind::OutOfMemory => {
                self.suppressed.insert(kind);
                ErrorDisposition::Propagate
            }
            PlatformErrorKind::ResourceUnavailable => {
                while self
                    .transient
                    .front()
                    .is_some_and(|&t| now - t >= TRANSIENT_WINDOW_MS)
                {
                    self.transient.pop_front();
                }
                self.transient.push_back(now);
                if self.transient.len() >= TRANSIENT_ESCALATION_COUNT {
                    self.transient.clear();
                    self.suppressed.insert(kind);
                    ErrorDisposition::Propagate
                } else {
                    ErrorDisposition::SkipTick
                }
            }
        }
    }

    pub fn reset(&mut self) {
        self.transient.clear();
        self.suppressed.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuraOutput {
    None,
    Projector,
    Blended,
}

pub struct Engine<S: SettingsStore = MemoryStore> {
    settings: Settings,
    store: DebouncedStore<S>,
    requester: Box<dyn FrameRequester>,
    reporter: Box<dyn CrashReporter>,
    detector: Box<dyn HorizontalBarDetector>,

    geometry: GeometryEngine,
    capture: FrameCapture,
    projector: ProjectorCompositor,
    shadow: ShadowMaskGenerator,
    blender: FrameBlender,
    estimator: FrameRateEstimator,
    timing: FrameTimingState,
    bars: BarDetectionSlot,
    /// Whole, unclipped video frame handed to the bar detector.
    detection_frame: RasterBuffer,
    errors: ErrorPolicy,

    state: SchedulerState,
    video_callback_pending: bool,
    idle_pending: bool,
    frame_presented: bool,
    page_active: bool,
    video_visible: bool,
    last_invisible_at: Option<f64>,
    /// Drops counted on the next tick happened while nobody could see them.
    missed_while_hidden: bool,
    hidden: bool,
    pending_change: bool,
    next_frame_time: Option<f64>,
    last_idle_upkeep: Option<f64>,
    restriction_reported: bool,
    output: AuraOutput,
    style: SurfaceStyle,
    style_dirty: bool,
    stats: Vec<StatsLine>,
}

impl<S: SettingsStore> Engine<S> {
    pub fn new(store: S, requester: Box<dyn FrameRequester>) -> Self {
        let store = DebouncedStore::new(store);
        let settings = Settings::load(&store);
        info!(
            "Aura engine created (enabled: {}, sync: {})",
            settings.enabled,
            settings.frame_sync.display_name()
        );
        Self {
            settings,
            store,
            requester,
            reporter: Box::new(LogCrashReporter),
            detector: Box::new(RowScanDetector),
            geometry: GeometryEngine::new(),
            capture: FrameCapture::new(),
            projector: ProjectorCompositor::new(),
            shadow: ShadowMaskGenerator::new(),
            blender: FrameBlender::new(),
            estimator: FrameRateEstimator::new(),
            timing: FrameTimingState::default(),
            bars: BarDetectionSlot::new(),
            detection_frame: RasterBuffer::new(1, 1),
            errors: ErrorPolicy::default(),
            state: SchedulerState::Idle,
            video_callback_pending: false,
            idle_pending: false,
            frame_presented: false,
            page_active: true,
            video_visible: true,
            last_invisible_at: None,
            missed_while_hidden: false,
            hidden: false,
            pending_change: false,
            next_frame_time: None,
            last_idle_upkeep: None,
            restriction_reported: false,
            output: AuraOutput::None,
            style: SurfaceStyle::hidden(),
            style_dirty: true,
            stats: Vec::new(),
        }
    }

    pub fn with_crash_reporter(mut self, reporter: Box<dyn CrashReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_bar_detector(mut self, detector: Box<dyn HorizontalBarDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn store(&self) -> &DebouncedStore<S> {
        &self.store
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn timing(&self) -> &FrameTimingState {
        &self.timing
    }

    pub fn geometry(&self) -> Option<&Geometry> {
        self.geometry.current()
    }

    pub fn style(&self) -> &SurfaceStyle {
        &self.style
    }

    /// Stats overlay lines; empty unless `showFPS` is on.
    pub fn stats(&self) -> &[StatsLine] {
        &self.stats
    }

    pub fn shadow(&self) -> &Mask {
        self.shadow.shadow()
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// Latest aura frame (blended when blending is active).
    pub fn aura(&self) -> Option<&RasterBuffer> {
        if self.hidden || !self.settings.enabled {
            return None;
        }
        match self.output {
            AuraOutput::None => None,
            AuraOutput::Projector => Some(self.projector.projector()),
            AuraOutput::Blended => Some(self.blender.blended()),
        }
    }

    fn can_run(&self) -> bool {
        self.settings.enabled && self.page_active && self.video_visible
    }

    /// Ask for the next refresh callback. Returns whether one was requested.
    pub fn schedule_next(&mut self) -> bool {
        if !self.can_run() {
            return false;
        }
        if self.settings.frame_sync == SyncMode::Perfect && !self.video_callback_pending {
            self.requester.request_video_frame_callback();
            self.video_callback_pending = true;
        }
        if self.state == SchedulerState::Scheduled {
            return false;
        }
        self.requester.request_animation_frame();
        self.state = SchedulerState::Scheduled;
        true
    }

    /// Display refresh callback.
    pub fn on_animation_frame(&mut self, now: f64, source: &dyn VideoSource) -> Result<TickReport> {
        self.state = SchedulerState::Drawing;
        self.estimator.tick_display(now);
        self.timing.display_frame_count += 1;

        let result = self.draw(now, source);
        self.state = SchedulerState::Idle;

        let report = match result {
            Ok(report) => report,
            Err(err) => match self.handle_error(err, now) {
                Some(err) => return Err(err),
                None => TickReport::new(TickStatus::Skipped),
            },
        };

        self.schedule_next();
        if !self.idle_pending && self.can_run() {
            self.requester.request_idle_callback();
            self.idle_pending = true;
        }
        Ok(report)
    }

    /// Video-frame-presented callback (requested in Perfect mode).
    pub fn on_video_frame_presented(&mut self, _now: f64) {
        self.video_callback_pending = false;
        self.frame_presented = true;
        self.schedule_next();
    }

    /// Low-priority upkeep. Returns false when skipped by the interval gate.
    pub fn on_idle(&mut self, now: f64) -> bool {
        self.idle_pending = false;
        if self
            .last_idle_upkeep
            .is_some_and(|last| now - last < IDLE_UPKEEP_INTERVAL_MS)
        {
            return false;
        }
        self.last_idle_upkeep = Some(now);
        self.timing.refresh_rates(&self.estimator);
        self.stats = if self.settings.show_fps {
            self.timing.stats_lines()
        } else {
            Vec::new()
        };
        let flushed = self.store.flush_due(now);
        self.geometry.invalidate();
        debug!(
            "Idle upkeep: video {:.2} display {:.2} aura {:.2} fps, {flushed} settings written",
            self.timing.video_frame_rate, self.timing.display_frame_rate, self.timing.aura_frame_rate
        );
        true
    }

    fn draw(&mut self, now: f64, source: &dyn VideoSource) -> Result<TickReport> {
        if !self.can_run() {
            return Ok(TickReport::new(TickStatus::Inactive));
        }
        source.health()?;
        self.apply_detected_bars(now)?;
        self.store.flush_due(now);

        match self
            .geometry
            .ensure(&source.layout(), &source.container(), &self.settings)
        {
            GeometryUpdate::NotReady => return Ok(TickReport::new(TickStatus::NotReady)),
            GeometryUpdate::Changed => {
                self.shadow.invalidate();
                self.capture.reset();
                self.blender.reset();
                self.pending_change = true;
                self.style_dirty = true;
            }
            GeometryUpdate::Unchanged => {}
        }
        let Some(geometry) = self.geometry.current().cloned() else {
            return Ok(TickReport::new(TickStatus::NotReady));
        };

        if geometry.is_filling_fullscreen || (geometry.is_fullscreen && !self.settings.enable_in_fullscreen) {
            if !self.hidden {
                info!("Aura hidden while fullscreen");
                self.hidden = true;
                self.release_buffers();
                self.style = SurfaceStyle::hidden();
            }
            return Ok(TickReport::new(TickStatus::Hidden));
        }
        if self.hidden {
            info!("Aura shown again");
            self.hidden = false;
            self.pending_change = true;
            self.style_dirty = true;
        }

        self.estimator.sample(RateKind::Video, source.frame_counter(), now);
        let seen = !std::mem::take(&mut self.missed_while_hidden);
        self.timing.update_dropped(source.dropped_frames(), seen);
        self.timing.refresh_rates(&self.estimator);

        let ctx = CaptureContext {
            now,
            frame_presented: std::mem::take(&mut self.frame_presented),
            last_invisible_at: self.last_invisible_at,
        };
        let capture =
            self.capture
                .capture_if_needed(source, &geometry, self.settings.frame_sync, &ctx, &mut self.timing);
        if capture.newly_restricted && !self.restriction_reported {
            self.restriction_reported = true;
            let err = Error::CaptureRestricted("pixel reads are blocked for this video".into());
            self.report(&err, now);
        }

        let mut report = TickReport {
            status: TickStatus::Unchanged,
            captured: capture.captured,
            changed: capture.changed,
            composed: false,
            blended: false,
        };
        self.pending_change |= capture.changed;
        if !self.frame_due(now) {
            report.status = TickStatus::Advisory;
            return Ok(report);
        }

        if std::mem::take(&mut self.pending_change) {
            self.projector.compose(self.capture.snapshot(), &geometry)?;
            self.timing.aura_frame_count += 1;
            self.timing.last_draw_time = Some(now);
            report.composed = true;
            self.advance_frame_time(now);
            if self.output == AuraOutput::None {
                self.output = AuraOutput::Projector;
            }
            self.schedule_bar_detection(source, &geometry);
        }
        self.estimator
            .sample(RateKind::Aura, self.timing.aura_frame_count, now);
        self.timing.refresh_rates(&self.estimator);

        if self.output != AuraOutput::None {
            self.shadow.rebuild_if_invalidated(
                &geometry,
                self.settings.bloom,
                self.settings.fade_out_easing,
                self.settings.directions(),
            )?;

            let blending = blender::is_active(
                self.settings.frame_blending,
                self.timing.video_frame_rate,
                self.timing.display_frame_rate,
            );
            if blending {
                let tick = BlendTick {
                    now,
                    new_frame: report.composed,
                    video_frame_rate: self.timing.video_frame_rate,
                    display_frame_rate: self.timing.display_frame_rate,
                    aura_frame_rate: self.timing.aura_frame_rate,
                    smoothness: self.settings.frame_blending_smoothness,
                };
                self.blender.blend(self.projector.projector(), &tick)?;
                self.output = AuraOutput::Blended;
                report.blended = true;
            } else {
                self.output = AuraOutput::Projector;
            }
        }

        if self.style_dirty {
            self.style = SurfaceStyle::from_geometry(&geometry, &self.settings);
            self.style_dirty = false;
        }

        report.status = if report.composed {
            TickStatus::Drawn
        } else if report.blended {
            TickStatus::Blended
        } else {
            TickStatus::Unchanged
        };
        Ok(report)
    }

    fn frame_due(&self, now: f64) -> bool {
        self.settings.framerate_limit <= 0.0 || self.next_frame_time.is_none_or(|t| now >= t)
    }

    fn advance_frame_time(&mut self, now: f64) {
        if self.settings.framerate_limit <= 0.0 {
            self.next_frame_time = None;
            return;
        }
        let interval = 1000.0 / self.settings.framerate_limit;
        let next = self.next_frame_time.unwrap_or(now) + interval;
        self.next_frame_time = Some(next.max(now));
    }

    fn schedule_bar_detection(&mut self, source: &dyn VideoSource, geometry: &Geometry) {
        if !self.settings.detect_horizontal_bar_size_enabled || self.capture.is_restricted() || self.bars.is_busy() {
            return;
        }
        let full = Rect::new(0.0, 0.0, geometry.source.w as f64, geometry.source.h as f64);
        let target = Rect::new(0.0, 0.0, geometry.render.w as f64, geometry.render.h as f64);
        self.detection_frame.resize(geometry.render.w, geometry.render.h);
        draw_scaled(&mut self.detection_frame, source.frame(), full, target, DrawMode::Copy);
        self.bars.schedule(
            self.detector.as_mut(),
            &self.detection_frame,
            self.settings.detect_colored_horizontal_bar_size_enabled,
            self.settings.detect_horizontal_bar_size_offset_percentage,
            self.settings.horizontal_bars_clip_percentage,
        );
    }

    fn apply_detected_bars(&mut self, now: f64) -> Result<()> {
        let Some(percent) = self.bars.take_result() else {
            return Ok(());
        };
        if (percent - self.settings.horizontal_bars_clip_percentage).abs() < 1e-9 {
            return Ok(());
        }
        debug!("Applying detected letterbox clip {percent}%");
        self.apply_setting(SettingKey::HorizontalBarsClipPercentage, SettingUpdate::Number(percent), now)?;
        Ok(())
    }

    /// Returns the error if it must propagate; otherwise it was handled.
    fn handle_error(&mut self, err: Error, now: f64) -> Option<Error> {
        if err.is_recoverable() {
            warn!("{err}");
            return None;
        }
        match self.errors.classify(&err, now) {
            ErrorDisposition::SkipTick => {
                warn!("Skipping frame: {err}");
                None
            }
            ErrorDisposition::Suppress => {
                debug!("Suppressed repeated error: {err}");
                None
            }
            ErrorDisposition::Propagate => {
                self.report(&err, now);
                self.state = SchedulerState::Idle;
                Some(err)
            }
        }
    }

    fn report(&mut self, err: &Error, now: f64) {
        let context = DiagnosticContext {
            label: err.label(),
            message: err.to_string(),
            now,
            enabled: self.settings.enabled,
            settings: self.settings.clone(),
            timing: self.timing.clone(),
            geometry: self.geometry.current().cloned(),
            capture_restricted: self.capture.is_restricted(),
        };
        self.reporter.report(err, &context);
    }

    fn release_buffers(&mut self) {
        self.capture.release();
        self.projector.release();
        self.blender.release();
        self.shadow.release();
        self.bars.clear();
        self.detection_frame.release();
        self.output = AuraOutput::None;
        debug!("Aura buffers released");
    }

    fn reset_session(&mut self) {
        self.timing.reset();
        self.estimator.reset();
        self.capture.reset();
        self.blender.reset();
        self.next_frame_time = None;
        self.pending_change = false;
    }

    /// New video loaded or playback (re)started.
    pub fn start(&mut self, now: f64) {
        debug!("Start at {now:.0}ms");
        self.reset_session();
        self.geometry.invalidate();
        self.schedule_next();
    }

    pub fn on_seeked(&mut self, now: f64) {
        debug!("Seeked at {now:.0}ms");
        self.reset_session();
        self.release_buffers();
        self.schedule_next();
    }

    pub fn on_ended(&mut self) {
        self.release_buffers();
    }

    /// Source emptied: drop the aura and forget the letterbox clip.
    pub fn on_emptied(&mut self, now: f64) -> Result<()> {
        self.release_buffers();
        if self.settings.horizontal_bars_clip_percentage != 0.0 {
            self.apply_setting(SettingKey::HorizontalBarsClipPercentage, SettingUpdate::Number(0.0), now)?;
        }
        Ok(())
    }

    pub fn enable(&mut self, now: f64) -> Result<()> {
        if self.settings.enabled {
            return Ok(());
        }
        self.apply_setting(SettingKey::Enabled, SettingUpdate::Bool(true), now)?;
        Ok(())
    }

    pub fn disable(&mut self, now: f64) -> Result<()> {
        if !self.settings.enabled {
            return Ok(());
        }
        self.apply_setting(SettingKey::Enabled, SettingUpdate::Bool(false), now)?;
        Ok(())
    }

    pub fn toggle_enabled(&mut self, now: f64) -> Result<()> {
        if self.settings.enabled {
            self.disable(now)
        } else {
            self.enable(now)
        }
    }

    pub fn set_page_active(&mut self, active: bool, _now: f64) {
        self.page_active = active;
        if !active {
            self.missed_while_hidden = true;
        }
        if active {
            self.schedule_next();
        }
    }

    pub fn set_video_visible(&mut self, visible: bool, now: f64) {
        // Hidden now, or just came back: both restart the visibility window.
        if !visible || !self.video_visible {
            self.last_invisible_at = Some(now);
        }
        self.video_visible = visible;
        if !visible {
            self.missed_while_hidden = true;
        }
        if visible {
            self.schedule_next();
        }
    }

    pub fn invalidate_geometry(&mut self) {
        self.geometry.invalidate();
        self.shadow.invalidate();
    }

    /// The video element got a new source.
    pub fn invalidate_video_source(&mut self) {
        self.capture.new_source();
        self.restriction_reported = false;
        self.errors.reset();
        self.reset_session();
        self.invalidate_geometry();
    }

    /// Apply a setting by its persisted name.
    pub fn update_setting(&mut self, name: &str, update: SettingUpdate, now: f64) -> Result<SettingValue> {
        let key = SettingKey::from_name(name)?;
        self.apply_setting(key, update, now)
    }

    fn apply_setting(&mut self, key: SettingKey, update: SettingUpdate, now: f64) -> Result<SettingValue> {
        let value = self.settings.set(key, update)?;
        self.store.set(&key.store_key(), &value.encode(), now);
        debug!("Setting {} = {}", key.name(), value.encode());

        if key.affects_geometry() {
            self.invalidate_geometry();
        }
        self.style_dirty = true;
        match key {
            SettingKey::Enabled => {
                if self.settings.enabled {
                    info!("Aura enabled");
                    self.geometry.invalidate();
                    self.start(now);
                } else {
                    info!("Aura disabled");
                    self.release_buffers();
                    self.style = SurfaceStyle::hidden();
                    self.style_dirty = false;
                }
            }
            SettingKey::FrameSync => {
                self.capture.reset();
                self.schedule_next();
            }
            SettingKey::FrameBlending | SettingKey::FrameBlendingSmoothness => self.blender.reset(),
            SettingKey::FramerateLimit => self.next_frame_time = None,
            SettingKey::ShowFps if !self.settings.show_fps => self.stats.clear(),
            SettingKey::Bloom
            | SettingKey::FadeOutEasing
            | SettingKey::DirectionTopEnabled
            | SettingKey::DirectionRightEnabled
            | SettingKey::DirectionBottomEnabled
            | SettingKey::DirectionLeftEnabled => self.shadow.invalidate(),
            SettingKey::DetectHorizontalBarSizeEnabled if !self.settings.detect_horizontal_bar_size_enabled => {
                self.bars.clear()
            }
            _ => {}
        }
        Ok(value)
    }

    /// Write every pending setting now (e.g. on shutdown).
    pub fn flush_settings(&mut self) {
        self.store.flush_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors_escalate_on_third() {
        let mut policy = ErrorPolicy::default();
        let err = Error::platform(PlatformErrorKind::ResourceUnavailable, "busy");
        assert_eq!(policy.classify(&err, 0.0), ErrorDisposition::SkipTick);
        assert_eq!(policy.classify(&err, 300.0), ErrorDisposition::SkipTick);
        assert_eq!(policy.classify(&err, 600.0), ErrorDisposition::Propagate);
        assert_eq!(policy.classify(&err, 700.0), ErrorDisposition::Suppress);
    }

    #[test]
    fn test_transient_errors_spread_out_never_escalate() {
        let mut policy = ErrorPolicy::default();
        let err = Error::platform(PlatformErrorKind::ResourceUnavailable, "busy");
        for i in 0..10 {
            assert_eq!(policy.classify(&err, i as f64 * 600.0), ErrorDisposition::SkipTick);
        }
    }

    #[test]
    fn test_out_of_memory_propagates_once() {
        let mut policy = ErrorPolicy::default();
        let err = Error::platform(PlatformErrorKind::OutOfMemory, "alloc");
        assert_eq!(policy.classify(&err, 0.0), ErrorDisposition::Propagate);
        assert_eq!(policy.classify(&err, 5000.0), ErrorDisposition::Suppress);
        policy.reset();
        assert_eq!(policy.classify(&err, 6000.0), ErrorDisposition::Propagate);
    }

    #[test]
    fn test_other_errors_always_propagate() {
        let mut policy = ErrorPolicy::default();
        let err = Error::UnknownSetting("x".into());
        assert_eq!(policy.classify(&err, 0.0), ErrorDisposition::Propagate);
        assert_eq!(policy.classify(&err, 1.0), ErrorDisposition::Propagate);
    }
}
