// Projector rings: blur the snapshot once, then stamp it at every ring scale
// into one buffer, outermost first so inner rings end up on top.

use log::debug;

use crate::error::Result;
use crate::geometry::Geometry;
use crate::raster::{DrawMode, draw_scaled, soft_blur};
use crate::types::{RasterBuffer, Rect};

#[derive(Debug)]
pub struct ProjectorCompositor {
    blur: RasterBuffer,
    tmp: RasterBuffer,
    scratch: RasterBuffer,
    projector_blur: RasterBuffer,
    projector: RasterBuffer,
}

impl Default for ProjectorCompositor {
    fn default() -> Self {
        Self::new()
    }
}

impl ProjectorCompositor {
    pub fn new() -> Self {
        Self {
            blur: RasterBuffer::new(1, 1),
            tmp: RasterBuffer::new(1, 1),
            scratch: RasterBuffer::new(1, 1),
            projector_blur: RasterBuffer::new(1, 1),
            projector: RasterBuffer::new(1, 1),
        }
    }

    /// Last composed aura.
    pub fn projector(&self) -> &RasterBuffer {
        &self.projector
    }

    pub fn compose(&mut self, snapshot: &RasterBuffer, geometry: &Geometry) -> Result<&RasterBuffer> {
        let pad = geometry.blur_padding as f64;
        if self.blur.resize(geometry.blur_size.w, geometry.blur_size.h) {
            debug!("Blur buffer resized to {}x{}", self.blur.width, self.blur.height);
        }
        self.blur.clear();
        let inner = Rect::new(pad, pad, geometry.render.w as f64, geometry.render.h as f64);
        let whole = Rect::new(0.0, 0.0, snapshot.width as f64, snapshot.height as f64);
        draw_scaled(&mut self.blur, snapshot, whole, inner, DrawMode::Copy);
        soft_blur(&mut self.blur, &mut self.tmp, &mut self.scratch, geometry.blur_radius)?;

        if self
            .projector_blur
            .resize(geometry.projector_size.w, geometry.projector_size.h)
        {
            debug!(
                "Projector buffer resized to {}x{}",
                geometry.projector_size.w, geometry.projector_size.h
            );
        }
        self.projector_blur.clear();

        let frame = Rect::new(
            0.0,
            0.0,
            self.projector_blur.width as f64,
            self.projector_blur.height as f64,
        );
        let base_w = self.blur.width as f64;
        let base_h = self.blur.height as f64;
        let (cx, cy) = frame.center();
        let src = Rect::new(0.0, 0.0, base_w, base_h);

        for scale in geometry.ring_scales.iter().rev() {
            if scale.is_degenerate() {
                continue;
            }
            let (w, h) = (base_w * scale.x, base_h * scale.y);
            let ring = Rect::new(cx - w / 2.0, cy - h / 2.0, w, h);
            draw_scaled(&mut self.projector_blur, &self.blur, src, ring, DrawMode::Over(1.0));
        }

        self.projector.copy_from(&self.projector_blur);
        Ok(&self.projector)
    }

    /// Shrink every buffer to 1×1.
    pub fn release(&mut self) {
        self.blur.release();
        self.tmp.release();
        self.scratch.release();
        self.projector_blur.release();
        self.projector.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{ContainerLayout, VideoLayout, recompute};
    use crate::settings::Settings;
    use crate::types::{Size, pack_argb, unpack_argb};

    fn geometry(settings: &Settings) -> Geometry {
        let video = VideoLayout {
            source: Size::new(768, 432),
            rect: Rect::new(0.0, 0.0, 768.0, 432.0),
        };
        recompute(&video, &ContainerLayout::default(), settings).unwrap()
    }

    #[test]
    fn test_compose_sizes_and_center_color() {
        let g = geometry(&Settings::default());
        let snapshot = RasterBuffer::filled(g.render.w, g.render.h, pack_argb(255, 200, 40, 40));
        let mut comp = ProjectorCompositor::new();
        let out = comp.compose(&snapshot, &g).unwrap();
        assert_eq!((out.width, out.height), (g.projector_size.w, g.projector_size.h));

        let (a, r, _, _) = unpack_argb(out.get(out.width / 2, out.height / 2));
        assert_eq!(a, 255);
        assert!(r >= 195, "got {r}");
    }

    #[test]
    fn test_outer_ring_reaches_past_video() {
        let settings = Settings {
            blur: 0.0,
            ..Settings::default()
        };
        let g = geometry(&settings);
        let snapshot = RasterBuffer::filled(g.render.w, g.render.h, pack_argb(255, 0, 0, 255));
        let mut comp = ProjectorCompositor::new();
        let out = comp.compose(&snapshot, &g).unwrap();
        let video = g.projector_video_region();
        // A pixel just left of the video region is covered by an outer ring.
        let x = (video.x - 2.0).max(0.0) as usize;
        let (a, ..) = unpack_argb(out.get(x, out.height / 2));
        assert_eq!(a, 255);
    }

    #[test]
    fn test_degenerate_rings_are_skipped() {
        let settings = Settings {
            edge: 50.0,
            spread: 0.0,
            ..Settings::default()
        };
        let mut g = geometry(&settings);
        // Narrow on-screen video pushes the inner ring to zero.
        g.ring_scales[0].y = 0.0;
        let snapshot = RasterBuffer::filled(g.render.w, g.render.h, pack_argb(255, 9, 9, 9));
        let mut comp = ProjectorCompositor::new();
        assert!(comp.compose(&snapshot, &g).is_ok());
    }

    #[test]
    fn test_release() {
        let mut comp = ProjectorCompositor::new();
        comp.release();
        assert!(comp.projector().is_released());
    }
}
