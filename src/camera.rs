// Live camera as a VideoSource for the demo (feature `camera`).
// `grab()` blocks until the camera delivers the next frame.

use ambient_aura::geometry::ContainerLayout;
use ambient_aura::types::pack_argb;
use ambient_aura::{Error, RasterBuffer, Rect, Result, Size, VideoSource};

use nokhwa::{
    Camera,
    pixel_format::RgbFormat,
    utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution},
};

pub struct CameraSource {
    cam: Camera,
    frame: RasterBuffer,
    decoded: u64,
    rect: Rect,
    container: ContainerLayout,
}

impl CameraSource {
    /// Open camera `index` near the requested resolution.
    pub fn open(index: u32, width: u32, height: u32) -> Result<Self> {
        let fmt = CameraFormat::new(Resolution::new(width, height), FrameFormat::YUYV, 30);
        let req = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(fmt));

        let mut cam = Camera::new(CameraIndex::Index(index), req)
            .map_err(|e| Error::CameraInit(format!("Create camera: {e}")))?;
        cam.open_stream()
            .map_err(|e| Error::CameraInit(format!("Open stream: {e}")))?;

        // The stream may settle on a different resolution.
        let actual = cam.resolution();
        let (w, h) = (actual.width() as usize, actual.height() as usize);
        log::info!("Camera {index} streaming at {w}x{h}");
        let rect = Rect::new(0.0, 0.0, w as f64, h as f64);
        Ok(Self {
            cam,
            frame: RasterBuffer::new(w, h),
            decoded: 0,
            rect,
            container: ContainerLayout {
                rect,
                is_fullscreen: false,
            },
        })
    }

    pub fn set_layout(&mut self, rect: Rect, container: ContainerLayout) {
        self.rect = rect;
        self.container = container;
    }

    /// Pull and convert the next camera frame.
    pub fn grab(&mut self) -> Result<()> {
        let frame = self
            .cam
            .frame()
            .map_err(|e| Error::CameraFrame(format!("Fetch frame: {e}")))?;
        let rgb = frame
            .decode_image::<RgbFormat>()
            .map_err(|e| Error::CameraFrame(format!("Decode RGB: {e}")))?;

        let (w, h) = rgb.dimensions();
        self.frame.resize(w as usize, h as usize);
        for (px, out) in rgb.pixels().zip(self.frame.pixels.iter_mut()) {
            *out = pack_argb(255, px[0], px[1], px[2]);
        }
        self.decoded += 1;
        Ok(())
    }
}

impl VideoSource for CameraSource {
    fn intrinsic_size(&self) -> Size {
        Size::new(self.frame.width, self.frame.height)
    }

    fn rect(&self) -> Rect {
        self.rect
    }

    fn container(&self) -> ContainerLayout {
        self.container
    }

    fn current_time(&self) -> f64 {
        self.decoded as f64 / 30.0
    }

    fn is_paused(&self) -> bool {
        false
    }

    fn decoded_frames(&self) -> u64 {
        self.decoded
    }

    fn dropped_frames(&self) -> u64 {
        0
    }

    fn frame(&self) -> &RasterBuffer {
        &self.frame
    }
}
