//! Style values the host applies to its aura layers.

use serde::Serialize;

use crate::geometry::{Geometry, RingScale};
use crate::settings::Settings;
use crate::types::Rect;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SurfaceStyle {
    pub visible: bool,
    /// Per-ring transform, innermost first.
    pub ring_scales: Vec<RingScale>,
    /// Shadow layer sits just outside the outermost ring.
    pub shadow_scale: RingScale,
    pub blur_px: f64,
    pub brightness: f64,
    pub contrast: f64,
    pub saturation: f64,
    pub video_scale: f64,
    /// On-screen player rect with the letterbox cut away.
    pub clipped_rect: Rect,
    /// On-screen rect the aura buffer is stretched over.
    pub aura_rect: Rect,
}

impl SurfaceStyle {
    pub fn hidden() -> Self {
        Self {
            visible: false,
            ring_scales: Vec::new(),
            shadow_scale: RingScale::IDENTITY,
            blur_px: 0.0,
            brightness: 100.0,
            contrast: 100.0,
            saturation: 100.0,
            video_scale: 1.0,
            clipped_rect: Rect::default(),
            aura_rect: Rect::default(),
        }
    }

    pub fn from_geometry(geometry: &Geometry, settings: &Settings) -> Self {
        let last = geometry
            .ring_scales
            .last()
            .copied()
            .unwrap_or(RingScale::IDENTITY);
        Self {
            visible: true,
            ring_scales: geometry.ring_scales.clone(),
            shadow_scale: RingScale {
                x: last.x + 0.01,
                y: last.y + 0.01,
            },
            blur_px: geometry.host_blur_px(settings.blur),
            brightness: settings.brightness,
            contrast: settings.contrast,
            saturation: settings.saturation,
            video_scale: geometry.video_scale,
            clipped_rect: geometry.clipped_rect,
            aura_rect: geometry.projector_screen_rect(),
        }
    }

    /// CSS filter for the aura container; identity adjustments are left out.
    pub fn css_filter(&self) -> String {
        let mut parts = vec![format!("blur({}px)", self.blur_px)];
        if self.contrast != 100.0 {
            parts.push(format!("contrast({}%)", self.contrast));
        }
        if self.brightness != 100.0 {
            parts.push(format!("brightness({}%)", self.brightness));
        }
        if self.saturation != 100.0 {
            parts.push(format!("saturate({}%)", self.saturation));
        }
        parts.join(" ")
    }

    pub fn video_transform(&self) -> String {
        format!("scale({})", self.video_scale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{ContainerLayout, VideoLayout, recompute};
    use crate::types::Size;

    #[test]
    fn test_filter_skips_identity_values() {
        let video = VideoLayout {
            source: Size::new(1280, 720),
            rect: Rect::new(0.0, 0.0, 1280.0, 720.0),
        };
        let settings = Settings {
            saturation: 120.0,
            ..Settings::default()
        };
        let g = recompute(&video, &ContainerLayout::default(), &settings).unwrap();
        let style = SurfaceStyle::from_geometry(&g, &settings);
        assert_eq!(style.css_filter(), "blur(54px) saturate(120%)");
        assert_eq!(style.video_transform(), "scale(1)");
        assert!(style.shadow_scale.x > style.ring_scales.last().unwrap().x);
    }

    #[test]
    fn test_hidden_is_not_visible() {
        assert!(!SurfaceStyle::hidden().visible);
    }
}
