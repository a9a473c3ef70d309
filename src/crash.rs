// Crash-report contract: what the engine hands over when an error escapes a
// tick, and a reporter that writes it to the log.

use log::error;
use serde::Serialize;

use crate::error::Error;
use crate::frame_rate::FrameTimingState;
use crate::geometry::Geometry;
use crate::settings::Settings;

/// Snapshot of engine state at the moment of failure.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticContext {
    pub label: &'static str,
    pub message: String,
    pub now: f64,
    pub enabled: bool,
    pub settings: Settings,
    pub timing: FrameTimingState,
    pub geometry: Option<Geometry>,
    pub capture_restricted: bool,
}

pub trait CrashReporter {
    fn report(&mut self, error: &Error, context: &DiagnosticContext);
}

/// Reports through the `log` facade as one JSON line.
#[derive(Debug, Default)]
pub struct LogCrashReporter;

impl CrashReporter for LogCrashReporter {
    fn report(&mut self, err: &Error, context: &DiagnosticContext) {
        match serde_json::to_string(context) {
            Ok(json) => error!("{err} | context: {json}"),
            Err(e) => error!("{err} | context unavailable: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_serializes() {
        let ctx = DiagnosticContext {
            label: "out-of-memory",
            message: "boom".into(),
            now: 12.5,
            enabled: true,
            settings: Settings::default(),
            timing: FrameTimingState::default(),
            geometry: None,
            capture_restricted: false,
        };
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["label"], "out-of-memory");
        assert_eq!(json["settings"]["frameSync"], 50.0);
        assert!(json["geometry"].is_null());
    }
}
