// Error taxonomy for the aura pipeline.
// Every variant states *where* things went wrong; the scheduler uses
// `platform_kind()` / `is_recoverable()` to decide whether a tick is skipped,
// reported once, or propagated.

use thiserror::Error;

/// Known platform failures that the scheduler treats specially.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum PlatformErrorKind {
    /// Allocation of a raster or decoder surface failed.
    OutOfMemory,
    /// Decoder/graphics resource temporarily unavailable.
    ResourceUnavailable,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Window init error: {0}")]
    WindowInit(String),

    #[error("Window update error: {0}")]
    WindowUpdate(String),

    #[error("Camera init error: {0}")]
    CameraInit(String),

    #[error("Camera frame error: {0}")]
    CameraFrame(String),

    /// Pixel sampling is blocked (cross-origin source).
    #[error("Capture restricted: {0}")]
    CaptureRestricted(String),

    #[error("Platform error ({kind:?}): {message}")]
    Platform {
        kind: PlatformErrorKind,
        message: String,
    },

    #[error("Buffer size mismatch in {op}: {expected_w}x{expected_h} vs {actual_w}x{actual_h}")]
    SizeMismatch {
        op: &'static str,
        expected_w: usize,
        expected_h: usize,
        actual_w: usize,
        actual_h: usize,
    },

    #[error("Unknown setting: {0}")]
    UnknownSetting(String),

    #[error("Invalid value for setting {name}: {value}")]
    InvalidSetting { name: String, value: String },

    #[error("Settings parse error: {0}")]
    SettingsParse(#[from] serde_json::Error),

    #[error("Image export error: {0}")]
    ImageExport(#[from] image::ImageError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn platform(kind: PlatformErrorKind, message: impl Into<String>) -> Self {
        Error::Platform {
            kind,
            message: message.into(),
        }
    }

    /// The platform failure class, if this is one of the known ones.
    pub fn platform_kind(&self) -> Option<PlatformErrorKind> {
        match self {
            Error::Platform { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Recoverable errors are handled locally (warn + report once) and never
    /// terminate a tick.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::CaptureRestricted(_))
    }

    /// Short stable label used in diagnostics.
    pub fn label(&self) -> &'static str {
        match self {
            Error::WindowInit(_) => "window-init",
            Error::WindowUpdate(_) => "window-update",
            Error::CameraInit(_) => "camera-init",
            Error::CameraFrame(_) => "camera-frame",
            Error::CaptureRestricted(_) => "capture-restricted",
            Error::Platform {
                kind: PlatformErrorKind::OutOfMemory,
                ..
            } => "out-of-memory",
            Error::Platform {
                kind: PlatformErrorKind::ResourceUnavailable,
                ..
            } => "resource-unavailable",
            Error::SizeMismatch { .. } => "size-mismatch",
            Error::UnknownSetting(_) => "unknown-setting",
            Error::InvalidSetting { .. } => "invalid-setting",
            Error::SettingsParse(_) => "settings-parse",
            Error::ImageExport(_) => "image-export",
            Error::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let oom = Error::platform(PlatformErrorKind::OutOfMemory, "alloc");
        assert_eq!(oom.platform_kind(), Some(PlatformErrorKind::OutOfMemory));
        assert!(!oom.is_recoverable());

        let restricted = Error::CaptureRestricted("tainted".into());
        assert!(restricted.is_recoverable());
        assert_eq!(restricted.platform_kind(), None);
        assert_eq!(restricted.label(), "capture-restricted");
    }

    #[test]
    fn test_display_mentions_location() {
        let e = Error::SizeMismatch {
            op: "box_blur",
            expected_w: 4,
            expected_h: 4,
            actual_w: 2,
            actual_h: 2,
        };
        assert!(e.to_string().contains("box_blur"));
    }
}
