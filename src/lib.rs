//! Real-time aura ("ambilight") pipeline: a soft, color-matched glow around a
//! video surface, computed from the video's own pixels every display refresh.
//!
//! The [`Engine`] owns every stage (capture, projector rings, shadow mask,
//! frame blending, rate estimation) and is driven by host callbacks through
//! [`FrameRequester`].

pub mod blender;
pub mod capture;
pub mod crash;
pub mod error;
pub mod frame_rate;
pub mod geometry;
pub mod letterbox;
pub mod projector;
pub mod raster;
pub mod scheduler;
pub mod settings;
pub mod shadow;
pub mod source;
pub mod surface;
pub mod types;

pub use error::{Error, PlatformErrorKind, Result};
pub use scheduler::{Engine, FrameRequester, SchedulerState, TickReport, TickStatus};
pub use settings::{MemoryStore, SettingUpdate, Settings, SettingsStore, SyncMode};
pub use source::{SyntheticVideo, VideoSource};
pub use types::{Mask, RasterBuffer, Rect, Size};
