//! Settings model: a typed registry of every tunable, the per-tick
//! `Settings` snapshot, and the key-value store contract with debounced writes.

use std::collections::HashMap;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Store keys are namespaced like `ambilight-spread`.
pub const STORE_PREFIX: &str = "ambilight-";

/// Writes to the store are deferred this long per key.
pub const WRITE_DEBOUNCE_MS: f64 = 500.0;

/// Quality/cost tier governing when a capture counts as fresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub enum SyncMode {
    PowerSaver,
    #[default]
    Balanced,
    HighPerformance,
    Perfect,
}

impl SyncMode {
    pub fn value(self) -> f64 {
        match self {
            SyncMode::PowerSaver => 0.0,
            SyncMode::Balanced => 50.0,
            SyncMode::HighPerformance => 100.0,
            SyncMode::Perfect => 150.0,
        }
    }

    /// Nearest mode for a raw slider value.
    pub fn from_value(v: f64) -> Self {
        if v < 25.0 {
            SyncMode::PowerSaver
        } else if v < 75.0 {
            SyncMode::Balanced
        } else if v < 125.0 {
            SyncMode::HighPerformance
        } else {
            SyncMode::Perfect
        }
    }

    /// Next mode in slider order, wrapping around.
    pub fn next(self) -> Self {
        match self {
            SyncMode::PowerSaver => SyncMode::Balanced,
            SyncMode::Balanced => SyncMode::HighPerformance,
            SyncMode::HighPerformance => SyncMode::Perfect,
            SyncMode::Perfect => SyncMode::PowerSaver,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            SyncMode::PowerSaver => "POWER SAVER",
            SyncMode::Balanced => "BALANCED",
            SyncMode::HighPerformance => "HIGH PERFORMANCE",
            SyncMode::Perfect => "PERFECT",
        }
    }
}

impl From<f64> for SyncMode {
    fn from(v: f64) -> Self {
        SyncMode::from_value(v)
    }
}

impl From<SyncMode> for f64 {
    fn from(mode: SyncMode) -> f64 {
        mode.value()
    }
}

/// A setting's value, tagged by how it behaves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettingValue {
    Checkbox(bool),
    Range { value: f64, min: f64, max: f64, step: f64 },
    /// Menu section; the flag is whether it is collapsed.
    Section(bool),
}

impl SettingValue {
    const fn range(value: f64, min: f64, max: f64, step: f64) -> Self {
        SettingValue::Range {
            value,
            min,
            max,
            step,
        }
    }

    /// Store encoding: `true`/`false` or the number.
    pub fn encode(&self) -> String {
        match self {
            SettingValue::Checkbox(b) | SettingValue::Section(b) => b.to_string(),
            SettingValue::Range { value, .. } => value.to_string(),
        }
    }

    /// Parse a raw store string against this value's tag, clamping ranges.
    pub fn parse(&self, name: &str, raw: &str) -> Result<SettingValue> {
        let invalid = || Error::InvalidSetting {
            name: name.to_string(),
            value: raw.to_string(),
        };
        match *self {
            SettingValue::Checkbox(_) => Ok(SettingValue::Checkbox(parse_bool(raw).ok_or_else(invalid)?)),
            SettingValue::Section(_) => Ok(SettingValue::Section(parse_bool(raw).ok_or_else(invalid)?)),
            SettingValue::Range { min, max, step, .. } => {
                let v: f64 = raw.trim().parse().map_err(|_| invalid())?;
                if !v.is_finite() {
                    return Err(invalid());
                }
                Ok(SettingValue::range(snap(v, min, max, step), min, max, step))
            }
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SettingValue::Checkbox(b) | SettingValue::Section(b) => Some(*b),
            SettingValue::Range { .. } => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SettingValue::Range { value, .. } => Some(*value),
            _ => None,
        }
    }

    /// Same tag/limits with a new number (clamped, snapped to step).
    fn with_number(&self, v: f64) -> Option<SettingValue> {
        match *self {
            SettingValue::Range { min, max, step, .. } if v.is_finite() => {
                Some(SettingValue::range(snap(v, min, max, step), min, max, step))
            }
            _ => None,
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// Clamp into [min,max] and snap to the slider step.
fn snap(v: f64, min: f64, max: f64, step: f64) -> f64 {
    let clamped = v.clamp(min, max);
    if step <= 0.0 {
        return clamped;
    }
    let snapped = min + ((clamped - min) / step).round() * step;
    ((snapped.clamp(min, max)) * 1e6).round() / 1e6
}

/// Every setting the engine knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SettingKey {
    SectionQuality,
    SectionAura,
    SectionDirections,
    SectionBars,
    Enabled,
    FrameSync,
    FrameBlending,
    FrameBlendingSmoothness,
    FramerateLimit,
    ShowFps,
    EnableInFullscreen,
    Spread,
    Blur,
    Bloom,
    FadeOutEasing,
    Edge,
    Brightness,
    Contrast,
    Saturation,
    VideoScale,
    DirectionTopEnabled,
    DirectionRightEnabled,
    DirectionBottomEnabled,
    DirectionLeftEnabled,
    HorizontalBarsClipPercentage,
    DetectHorizontalBarSizeEnabled,
    DetectColoredHorizontalBarSizeEnabled,
    DetectHorizontalBarSizeOffsetPercentage,
}

/// Registry entry: name and tagged default (with limits).
#[derive(Debug, Clone, Copy)]
pub struct SettingDefinition {
    pub key: SettingKey,
    pub name: &'static str,
    pub default: SettingValue,
}

const fn def(key: SettingKey, name: &'static str, default: SettingValue) -> SettingDefinition {
    SettingDefinition { key, name, default }
}

pub const SETTING_DEFINITIONS: &[SettingDefinition] = &[
    def(SettingKey::SectionQuality, "sectionQualityCollapsed", SettingValue::Section(false)),
    def(SettingKey::Enabled, "enabled", SettingValue::Checkbox(true)),
    def(SettingKey::FrameSync, "frameSync", SettingValue::range(50.0, 0.0, 150.0, 50.0)),
    def(SettingKey::FrameBlending, "frameBlending", SettingValue::Checkbox(false)),
    def(
        SettingKey::FrameBlendingSmoothness,
        "frameBlendingSmoothness",
        SettingValue::range(80.0, 1.0, 100.0, 1.0),
    ),
    def(SettingKey::FramerateLimit, "framerateLimit", SettingValue::range(0.0, 0.0, 240.0, 1.0)),
    def(SettingKey::ShowFps, "showFPS", SettingValue::Checkbox(false)),
    def(SettingKey::EnableInFullscreen, "enableInFullscreen", SettingValue::Checkbox(true)),
    def(SettingKey::SectionAura, "sectionAmbilightCollapsed", SettingValue::Section(false)),
    def(SettingKey::Spread, "spread", SettingValue::range(17.0, 0.0, 200.0, 0.1)),
    def(SettingKey::Blur, "blur", SettingValue::range(30.0, 0.0, 100.0, 1.0)),
    def(SettingKey::Bloom, "bloom", SettingValue::range(7.0, -50.0, 100.0, 1.0)),
    def(SettingKey::FadeOutEasing, "fadeOutEasing", SettingValue::range(60.0, 1.0, 100.0, 1.0)),
    def(SettingKey::Edge, "edge", SettingValue::range(12.0, 2.0, 50.0, 0.1)),
    def(SettingKey::Brightness, "brightness", SettingValue::range(100.0, 0.0, 200.0, 1.0)),
    def(SettingKey::Contrast, "contrast", SettingValue::range(100.0, 0.0, 200.0, 1.0)),
    def(SettingKey::Saturation, "saturation", SettingValue::range(100.0, 0.0, 200.0, 1.0)),
    def(SettingKey::VideoScale, "videoScale", SettingValue::range(100.0, 25.0, 100.0, 0.1)),
    def(SettingKey::SectionDirections, "sectionDirectionsCollapsed", SettingValue::Section(true)),
    def(SettingKey::DirectionTopEnabled, "directionTopEnabled", SettingValue::Checkbox(true)),
    def(SettingKey::DirectionRightEnabled, "directionRightEnabled", SettingValue::Checkbox(true)),
    def(SettingKey::DirectionBottomEnabled, "directionBottomEnabled", SettingValue::Checkbox(true)),
    def(SettingKey::DirectionLeftEnabled, "directionLeftEnabled", SettingValue::Checkbox(true)),
    def(SettingKey::SectionBars, "sectionHorizontalBarsCollapsed", SettingValue::Section(true)),
    def(
        SettingKey::HorizontalBarsClipPercentage,
        "horizontalBarsClipPercentage",
        SettingValue::range(0.0, 0.0, 49.0, 0.1),
    ),
    def(
        SettingKey::DetectHorizontalBarSizeEnabled,
        "detectHorizontalBarSizeEnabled",
        SettingValue::Checkbox(false),
    ),
    def(
        SettingKey::DetectColoredHorizontalBarSizeEnabled,
        "detectColoredHorizontalBarSizeEnabled",
        SettingValue::Checkbox(false),
    ),
    def(
        SettingKey::DetectHorizontalBarSizeOffsetPercentage,
        "detectHorizontalBarSizeOffsetPercentage",
        SettingValue::range(0.0, -5.0, 5.0, 0.1),
    ),
];

impl SettingKey {
    pub fn definition(self) -> &'static SettingDefinition {
        SETTING_DEFINITIONS
            .iter()
            .find(|d| d.key == self)
            .unwrap_or(&SETTING_DEFINITIONS[0])
    }

    pub fn name(self) -> &'static str {
        self.definition().name
    }

    pub fn store_key(self) -> String {
        format!("{STORE_PREFIX}{}", self.name())
    }

    pub fn from_name(name: &str) -> Result<SettingKey> {
        SETTING_DEFINITIONS
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.key)
            .ok_or_else(|| Error::UnknownSetting(name.to_string()))
    }

    /// Changes to these keys invalidate the cached geometry.
    pub fn affects_geometry(self) -> bool {
        matches!(
            self,
            SettingKey::Spread
                | SettingKey::Edge
                | SettingKey::Blur
                | SettingKey::HorizontalBarsClipPercentage
                | SettingKey::VideoScale
                | SettingKey::EnableInFullscreen
        )
    }
}

/// Which sides of the aura are drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DirectionFlags {
    pub top: bool,
    pub right: bool,
    pub bottom: bool,
    pub left: bool,
}

impl Default for DirectionFlags {
    fn default() -> Self {
        Self {
            top: true,
            right: true,
            bottom: true,
            left: true,
        }
    }
}

/// Immutable-per-tick snapshot of every engine setting.
/// Only built through `Settings::load` or `Settings::set`, which clamp every
/// value into its registry range.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub enabled: bool,
    pub frame_sync: SyncMode,
    pub frame_blending: bool,
    pub frame_blending_smoothness: f64,
    /// Aura frames per second cap; 0 = uncapped.
    pub framerate_limit: f64,
    #[serde(rename = "showFPS")]
    pub show_fps: bool,
    pub enable_in_fullscreen: bool,
    pub spread: f64,
    pub blur: f64,
    pub bloom: f64,
    pub fade_out_easing: f64,
    pub edge: f64,
    pub brightness: f64,
    pub contrast: f64,
    pub saturation: f64,
    pub video_scale: f64,
    pub direction_top_enabled: bool,
    pub direction_right_enabled: bool,
    pub direction_bottom_enabled: bool,
    pub direction_left_enabled: bool,
    pub horizontal_bars_clip_percentage: f64,
    pub detect_horizontal_bar_size_enabled: bool,
    pub detect_colored_horizontal_bar_size_enabled: bool,
    pub detect_horizontal_bar_size_offset_percentage: f64,
}

impl Default for Settings {
    fn default() -> Self {
        let mut s = Settings {
            enabled: true,
            frame_sync: SyncMode::Balanced,
            frame_blending: false,
            frame_blending_smoothness: 0.0,
            framerate_limit: 0.0,
            show_fps: false,
            enable_in_fullscreen: true,
            spread: 0.0,
            blur: 0.0,
            bloom: 0.0,
            fade_out_easing: 0.0,
            edge: 0.0,
            brightness: 0.0,
            contrast: 0.0,
            saturation: 0.0,
            video_scale: 0.0,
            direction_top_enabled: true,
            direction_right_enabled: true,
            direction_bottom_enabled: true,
            direction_left_enabled: true,
            horizontal_bars_clip_percentage: 0.0,
            detect_horizontal_bar_size_enabled: false,
            detect_colored_horizontal_bar_size_enabled: false,
            detect_horizontal_bar_size_offset_percentage: 0.0,
        };
        for d in SETTING_DEFINITIONS {
            s.assign(d.key, d.default);
        }
        s
    }
}

impl Settings {
    /// Build a snapshot from the store, falling back to defaults for missing
    /// or unparsable values.
    pub fn load(store: &dyn SettingsStore) -> Settings {
        let mut settings = Settings::default();
        for d in SETTING_DEFINITIONS {
            let Some(raw) = store.get(&d.key.store_key()) else {
                continue;
            };
            match d.default.parse(d.name, &raw) {
                Ok(v) => settings.assign(d.key, v),
                Err(e) => warn!("Ignoring stored setting: {e}"),
            }
        }
        settings
    }

    /// Current value of `key`, tagged with its registry limits.
    pub fn value(&self, key: SettingKey) -> SettingValue {
        let d = key.definition();
        let number = |v: f64| d.default.with_number(v).unwrap_or(d.default);
        match key {
            SettingKey::SectionQuality
            | SettingKey::SectionAura
            | SettingKey::SectionDirections
            | SettingKey::SectionBars => d.default,
            SettingKey::Enabled => SettingValue::Checkbox(self.enabled),
            SettingKey::FrameSync => number(self.frame_sync.value()),
            SettingKey::FrameBlending => SettingValue::Checkbox(self.frame_blending),
            SettingKey::FrameBlendingSmoothness => number(self.frame_blending_smoothness),
            SettingKey::FramerateLimit => number(self.framerate_limit),
            SettingKey::ShowFps => SettingValue::Checkbox(self.show_fps),
            SettingKey::EnableInFullscreen => SettingValue::Checkbox(self.enable_in_fullscreen),
            SettingKey::Spread => number(self.spread),
            SettingKey::Blur => number(self.blur),
            SettingKey::Bloom => number(self.bloom),
            SettingKey::FadeOutEasing => number(self.fade_out_easing),
            SettingKey::Edge => number(self.edge),
            SettingKey::Brightness => number(self.brightness),
            SettingKey::Contrast => number(self.contrast),
            SettingKey::Saturation => number(self.saturation),
            SettingKey::VideoScale => number(self.video_scale),
            SettingKey::DirectionTopEnabled => SettingValue::Checkbox(self.direction_top_enabled),
            SettingKey::DirectionRightEnabled => SettingValue::Checkbox(self.direction_right_enabled),
            SettingKey::DirectionBottomEnabled => SettingValue::Checkbox(self.direction_bottom_enabled),
            SettingKey::DirectionLeftEnabled => SettingValue::Checkbox(self.direction_left_enabled),
            SettingKey::HorizontalBarsClipPercentage => number(self.horizontal_bars_clip_percentage),
            SettingKey::DetectHorizontalBarSizeEnabled => {
                SettingValue::Checkbox(self.detect_horizontal_bar_size_enabled)
            }
            SettingKey::DetectColoredHorizontalBarSizeEnabled => {
                SettingValue::Checkbox(self.detect_colored_horizontal_bar_size_enabled)
            }
            SettingKey::DetectHorizontalBarSizeOffsetPercentage => {
                number(self.detect_horizontal_bar_size_offset_percentage)
            }
        }
    }

    /// Set a value given as a bool or number; numbers are clamped and snapped.
    /// Returns the value actually stored.
    pub fn set(&mut self, key: SettingKey, update: SettingUpdate) -> Result<SettingValue> {
        let d = key.definition();
        let value = match (d.default, update) {
            (SettingValue::Checkbox(_), SettingUpdate::Bool(b)) => SettingValue::Checkbox(b),
            (SettingValue::Section(_), SettingUpdate::Bool(b)) => SettingValue::Section(b),
            (SettingValue::Range { .. }, SettingUpdate::Number(n)) => {
                d.default.with_number(n).ok_or_else(|| Error::InvalidSetting {
                    name: d.name.to_string(),
                    value: n.to_string(),
                })?
            }
            (_, update) => {
                return Err(Error::InvalidSetting {
                    name: d.name.to_string(),
                    value: format!("{update:?}"),
                });
            }
        };
        self.assign(key, value);
        Ok(value)
    }

    fn assign(&mut self, key: SettingKey, value: SettingValue) {
        let b = value.as_bool().unwrap_or(false);
        let n = value.as_f64().unwrap_or(0.0);
        match key {
            SettingKey::SectionQuality
            | SettingKey::SectionAura
            | SettingKey::SectionDirections
            | SettingKey::SectionBars => {}
            SettingKey::Enabled => self.enabled = b,
            SettingKey::FrameSync => self.frame_sync = SyncMode::from_value(n),
            SettingKey::FrameBlending => self.frame_blending = b,
            SettingKey::FrameBlendingSmoothness => self.frame_blending_smoothness = n,
            SettingKey::FramerateLimit => self.framerate_limit = n,
            SettingKey::ShowFps => self.show_fps = b,
            SettingKey::EnableInFullscreen => self.enable_in_fullscreen = b,
            SettingKey::Spread => self.spread = n,
            SettingKey::Blur => self.blur = n,
            SettingKey::Bloom => self.bloom = n,
            SettingKey::FadeOutEasing => self.fade_out_easing = n,
            SettingKey::Edge => self.edge = n,
            SettingKey::Brightness => self.brightness = n,
            SettingKey::Contrast => self.contrast = n,
            SettingKey::Saturation => self.saturation = n,
            SettingKey::VideoScale => self.video_scale = n,
            SettingKey::DirectionTopEnabled => self.direction_top_enabled = b,
            SettingKey::DirectionRightEnabled => self.direction_right_enabled = b,
            SettingKey::DirectionBottomEnabled => self.direction_bottom_enabled = b,
            SettingKey::DirectionLeftEnabled => self.direction_left_enabled = b,
            SettingKey::HorizontalBarsClipPercentage => self.horizontal_bars_clip_percentage = n,
            SettingKey::DetectHorizontalBarSizeEnabled => self.detect_horizontal_bar_size_enabled = b,
            SettingKey::DetectColoredHorizontalBarSizeEnabled => {
                self.detect_colored_horizontal_bar_size_enabled = b
            }
            SettingKey::DetectHorizontalBarSizeOffsetPercentage => {
                self.detect_horizontal_bar_size_offset_percentage = n
            }
        }
    }

    pub fn directions(&self) -> DirectionFlags {
        DirectionFlags {
            top: self.direction_top_enabled,
            right: self.direction_right_enabled,
            bottom: self.direction_bottom_enabled,
            left: self.direction_left_enabled,
        }
    }
}

/// Raw input for `Settings::set`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettingUpdate {
    Bool(bool),
    Number(f64),
}

/// Key-value persistence the engine reads settings from.
pub trait SettingsStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str);
    fn remove(&mut self, key: &str);
}

/// In-process store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from a JSON object of `{ "settingName": value }`.
    pub fn from_json(json: &str) -> Result<Self> {
        let map: serde_json::Map<String, serde_json::Value> = serde_json::from_str(json)?;
        let mut store = MemoryStore::new();
        for (name, value) in map {
            let key = SettingKey::from_name(&name)?;
            let raw = match value {
                serde_json::Value::Bool(b) => b.to_string(),
                serde_json::Value::Number(n) => n.to_string(),
                other => {
                    return Err(Error::InvalidSetting {
                        name,
                        value: other.to_string(),
                    });
                }
            };
            store.set(&key.store_key(), &raw);
        }
        Ok(store)
    }

    /// Every stored setting as the same `{ "settingName": value }` object.
    pub fn to_json(&self) -> Result<String> {
        let mut map = serde_json::Map::new();
        for d in SETTING_DEFINITIONS {
            let Some(raw) = self.get(&d.key.store_key()) else {
                continue;
            };
            let value = d.default.parse(d.name, &raw)?;
            let json = match (value.as_bool(), value.as_f64()) {
                (Some(b), _) => serde_json::Value::Bool(b),
                (None, Some(n)) => serde_json::Number::from_f64(n)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null),
                (None, None) => continue,
            };
            map.insert(d.name.to_string(), json);
        }
        Ok(serde_json::to_string_pretty(&map)?)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        self.entries.insert(key.to_string(), value.to_string());
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
    }
}

#[derive(Debug, Clone)]
struct PendingWrite {
    value: Option<String>, // None = remove
    due: f64,
}

/// Wraps a store and defers each key's write by `WRITE_DEBOUNCE_MS`; a newer
/// write to the same key restarts its timer.
pub struct DebouncedStore<S: SettingsStore> {
    inner: S,
    pending: HashMap<String, PendingWrite>,
    delay_ms: f64,
}

impl<S: SettingsStore> DebouncedStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            pending: HashMap::new(),
            delay_ms: WRITE_DEBOUNCE_MS,
        }
    }

    pub fn set(&mut self, key: &str, value: &str, now: f64) {
        self.pending.insert(
            key.to_string(),
            PendingWrite {
                value: Some(value.to_string()),
                due: now + self.delay_ms,
            },
        );
    }

    pub fn remove(&mut self, key: &str, now: f64) {
        self.pending.insert(
            key.to_string(),
            PendingWrite {
                value: None,
                due: now + self.delay_ms,
            },
        );
    }

    /// Reads see pending writes first.
    pub fn get(&self, key: &str) -> Option<String> {
        match self.pending.get(key) {
            Some(p) => p.value.clone(),
            None => self.inner.get(key),
        }
    }

    /// Commit every write whose debounce expired. Returns how many.
    pub fn flush_due(&mut self, now: f64) -> usize {
        let due: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, p)| p.due <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &due {
            if let Some(p) = self.pending.remove(key) {
                self.commit(key, p.value);
            }
        }
        due.len()
    }

    /// Commit everything immediately (shutdown).
    pub fn flush_all(&mut self) {
        let pending: Vec<(String, PendingWrite)> = self.pending.drain().collect();
        for (key, p) in pending {
            self.commit(&key, p.value);
        }
    }

    fn commit(&mut self, key: &str, value: Option<String>) {
        match value {
            Some(v) => {
                debug!("Persisting {key}={v}");
                self.inner.set(key, &v);
            }
            None => self.inner.remove(key),
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

impl<S: SettingsStore> SettingsStore for DebouncedStore<S> {
    fn get(&self, key: &str) -> Option<String> {
        DebouncedStore::get(self, key)
    }

    /// Trait writes without a clock go straight through.
    fn set(&mut self, key: &str, value: &str) {
        self.pending.remove(key);
        self.inner.set(key, value);
    }

    fn remove(&mut self, key: &str) {
        self.pending.remove(key);
        self.inner.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_registry() {
        let s = Settings::default();
        for d in SETTING_DEFINITIONS {
            if matches!(d.default, SettingValue::Section(_)) {
                continue;
            }
            assert_eq!(s.value(d.key), d.default, "{}", d.name);
        }
        assert_eq!(s.spread, 17.0);
        assert_eq!(s.edge, 12.0);
        assert_eq!(s.frame_sync, SyncMode::Balanced);
    }

    #[test]
    fn test_load_parses_clamps_and_ignores_garbage() {
        let mut store = MemoryStore::new();
        store.set("ambilight-blur", "250");
        store.set("ambilight-frameBlending", "true");
        store.set("ambilight-edge", "not-a-number");
        store.set("ambilight-frameSync", "150");
        let s = Settings::load(&store);
        assert_eq!(s.blur, 100.0);
        assert!(s.frame_blending);
        assert_eq!(s.edge, 12.0);
        assert_eq!(s.frame_sync, SyncMode::Perfect);
    }

    #[test]
    fn test_set_checks_tag() {
        let mut s = Settings::default();
        assert!(s.set(SettingKey::Blur, SettingUpdate::Bool(true)).is_err());
        let v = s.set(SettingKey::Spread, SettingUpdate::Number(17.04)).unwrap();
        assert_eq!(v.as_f64(), Some(17.0));
        let v = s.set(SettingKey::FrameSync, SettingUpdate::Number(60.0)).unwrap();
        assert_eq!(v.as_f64(), Some(50.0));
        assert_eq!(s.frame_sync, SyncMode::Balanced);
    }

    #[test]
    fn test_sync_mode_serde_as_number() {
        let json = serde_json::to_string(&SyncMode::Perfect).unwrap();
        assert_eq!(json, "150.0");
        let back: SyncMode = serde_json::from_str("0").unwrap();
        assert_eq!(back, SyncMode::PowerSaver);
    }

    #[test]
    fn test_json_settings_go_through_registry_limits() {
        let store = MemoryStore::from_json(r#"{"spread": 500, "showFPS": true}"#).unwrap();
        let s = Settings::load(&store);
        assert_eq!(s.spread, 200.0);
        assert!(s.show_fps);
        assert_eq!(s.edge, 12.0);

        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["spread"], 200.0);
        assert_eq!(json["showFPS"], true);
    }

    #[test]
    fn test_store_from_json_rejects_unknown_names() {
        assert!(MemoryStore::from_json(r#"{"bogus": 1}"#).is_err());
        let store = MemoryStore::from_json(r#"{"blur": 45, "enabled": false}"#).unwrap();
        assert_eq!(store.get("ambilight-blur").as_deref(), Some("45"));
        assert_eq!(store.get("ambilight-enabled").as_deref(), Some("false"));
    }

    #[test]
    fn test_store_json_roundtrip_keeps_values() {
        let store = MemoryStore::from_json(r#"{"blur": 45, "enabled": false}"#).unwrap();
        let json: serde_json::Value = serde_json::from_str(&store.to_json().unwrap()).unwrap();
        assert_eq!(json["blur"], 45.0);
        assert_eq!(json["enabled"], false);
        assert!(json.get("spread").is_none());
    }

    #[test]
    fn test_debounce_restarts_per_key() {
        let mut store = DebouncedStore::new(MemoryStore::new());
        store.set("ambilight-blur", "10", 0.0);
        store.set("ambilight-blur", "20", 300.0);
        assert_eq!(store.flush_due(600.0), 0);
        assert_eq!(store.get("ambilight-blur").as_deref(), Some("20"));
        assert_eq!(store.inner().get("ambilight-blur"), None);

        assert_eq!(store.flush_due(800.0), 1);
        assert_eq!(store.inner().get("ambilight-blur").as_deref(), Some("20"));
        assert_eq!(store.pending_len(), 0);
    }

    #[test]
    fn test_debounced_remove() {
        let mut inner = MemoryStore::new();
        inner.set("ambilight-edge", "5");
        let mut store = DebouncedStore::new(inner);
        store.remove("ambilight-edge", 0.0);
        assert_eq!(store.get("ambilight-edge"), None);
        store.flush_all();
        assert!(store.inner().is_empty());
    }
}
