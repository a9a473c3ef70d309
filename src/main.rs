// Demo: the aura engine running around a video inside a minifb window.
//   A  toggle the aura
//   S  cycle frame sync mode
//   B  toggle frame blending
//   F  toggle the stats HUD
//   P  save a PNG of the window
//   Esc quits.
// AURA_SETTINGS=path.json seeds (and on exit saves) the settings.
// AURA_LOG (or RUST_LOG) sets the log filter.

mod draw;
#[cfg(feature = "camera")]
mod camera;

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Instant;

use ambient_aura::geometry::ContainerLayout;
use ambient_aura::raster::{DrawMode, apply_color_filter, apply_shadow, draw_scaled, save_png};
use ambient_aura::types::OPAQUE_BLACK;
use ambient_aura::{Engine, FrameRequester, MemoryStore, RasterBuffer, Rect, Result, SettingUpdate, VideoSource};
use draw::{Drawer, dim_rect, draw_text_5x7};
use log::{error, info, warn};
use minifb::Key;

const WINDOW_W: usize = 1280;
const WINDOW_H: usize = 720;

/// Callbacks the engine asked for, answered by the main loop.
#[derive(Debug, Default)]
struct Pending {
    animation_frame: bool,
    video_frame: bool,
    idle: bool,
}

struct LoopRequester(Rc<RefCell<Pending>>);

impl FrameRequester for LoopRequester {
    fn request_animation_frame(&mut self) {
        self.0.borrow_mut().animation_frame = true;
    }

    fn request_video_frame_callback(&mut self) {
        self.0.borrow_mut().video_frame = true;
    }

    fn request_idle_callback(&mut self) {
        self.0.borrow_mut().idle = true;
    }
}

fn init_logging() {
    let env = if std::env::var_os("AURA_LOG").is_some() {
        env_logger::Env::new().filter("AURA_LOG")
    } else {
        env_logger::Env::default()
    };
    env_logger::Builder::from_env(env.default_filter_or("info")).init();
}

fn load_store(path: Option<&Path>) -> Result<MemoryStore> {
    match path {
        Some(path) if path.exists() => {
            let json = std::fs::read_to_string(path)?;
            let store = MemoryStore::from_json(&json)?;
            info!("Loaded {} settings from {}", store.len(), path.display());
            Ok(store)
        }
        _ => Ok(MemoryStore::new()),
    }
}

fn video_rect() -> Rect {
    let (w, h) = (WINDOW_W as f64 * 0.5, WINDOW_H as f64 * 0.5);
    Rect::new((WINDOW_W as f64 - w) / 2.0, (WINDOW_H as f64 - h) / 2.0, w, h)
}

fn container() -> ContainerLayout {
    ContainerLayout {
        rect: Rect::new(0.0, 0.0, WINDOW_W as f64, WINDOW_H as f64),
        is_fullscreen: false,
    }
}

#[cfg(not(feature = "camera"))]
struct DemoSource(ambient_aura::SyntheticVideo);

#[cfg(not(feature = "camera"))]
impl DemoSource {
    fn open() -> Result<Self> {
        let video = ambient_aura::SyntheticVideo::new(1280, 720, 24.0)
            .with_letterbox(0.06)
            .with_rect(video_rect())
            .with_container(container());
        Ok(Self(video))
    }

    /// Returns true when a new frame is ready.
    fn advance(&mut self, now: f64) -> Result<bool> {
        Ok(self.0.advance(now))
    }

    fn source(&self) -> &dyn VideoSource {
        &self.0
    }
}

#[cfg(feature = "camera")]
struct DemoSource(camera::CameraSource);

#[cfg(feature = "camera")]
impl DemoSource {
    fn open() -> Result<Self> {
        let mut cam = camera::CameraSource::open(0, 640, 480)?;
        cam.set_layout(video_rect(), container());
        Ok(Self(cam))
    }

    fn advance(&mut self, _now: f64) -> Result<bool> {
        self.0.grab()?;
        Ok(true)
    }

    fn source(&self) -> &dyn VideoSource {
        &self.0
    }
}

/// Aura, shadow and video composed the way the host layers them.
fn compose_window(
    screen: &mut RasterBuffer,
    aura_frame: &mut RasterBuffer,
    engine: &Engine,
    source: &dyn VideoSource,
) -> Result<()> {
    screen.fill(OPAQUE_BLACK);
    let style = engine.style();

    if let Some(aura) = engine.aura() {
        aura_frame.copy_from(aura);
        apply_color_filter(aura_frame, style.brightness, style.contrast, style.saturation);
        let shadow = engine.shadow();
        if shadow.width == aura_frame.width && shadow.height == aura_frame.height {
            apply_shadow(aura_frame, shadow)?;
        }
        let src = Rect::new(0.0, 0.0, aura_frame.width as f64, aura_frame.height as f64);
        draw_scaled(screen, aura_frame, src, style.aura_rect, DrawMode::Over(1.0));
    }

    let (src_window, dst) = match engine.geometry() {
        Some(g) => (
            g.source_window,
            g.clipped_rect.scaled_about_center(g.video_scale, g.video_scale),
        ),
        None => {
            let size = source.intrinsic_size();
            (Rect::new(0.0, 0.0, size.w as f64, size.h as f64), source.rect())
        }
    };
    draw_scaled(screen, source.frame(), src_window, dst, DrawMode::Copy);
    Ok(())
}

fn draw_hud(screen: &mut RasterBuffer, engine: &Engine) {
    let s = engine.settings();
    let hint = format!(
        "A AURA {} | S SYNC {} | B BLEND {} | F STATS | P PNG",
        if s.enabled { "ON" } else { "OFF" },
        s.frame_sync.display_name(),
        if s.frame_blending { "ON" } else { "OFF" },
    );
    dim_rect(screen, 0, 0, hint.len() * 6 + 16, 20);
    draw_text_5x7(screen, 8, 7, &hint, 0xFFFF_FFFF);

    let stats = engine.stats();
    if stats.is_empty() {
        return;
    }
    let width = stats.iter().map(|l| l.text.len()).max().unwrap_or(0) * 6 + 16;
    dim_rect(screen, 0, 24, width, stats.len() * 10 + 8);
    for (i, line) in stats.iter().enumerate() {
        let y = 28 + i as i32 * 10;
        draw_text_5x7(screen, 8, y, &line.text, 0xFF00_0000 | line.level.color());
    }
}

fn handle_keys(drawer: &Drawer, engine: &mut Engine, screen: &RasterBuffer, now: f64) -> Result<()> {
    if drawer.pressed_once(Key::A) {
        engine.toggle_enabled(now)?;
    }
    if drawer.pressed_once(Key::S) {
        let next = engine.settings().frame_sync.next();
        engine.update_setting("frameSync", SettingUpdate::Number(next.value()), now)?;
        info!("Frame sync: {}", next.display_name());
    }
    if drawer.pressed_once(Key::B) {
        let on = !engine.settings().frame_blending;
        engine.update_setting("frameBlending", SettingUpdate::Bool(on), now)?;
    }
    if drawer.pressed_once(Key::F) {
        let on = !engine.settings().show_fps;
        engine.update_setting("showFPS", SettingUpdate::Bool(on), now)?;
    }
    if drawer.pressed_once(Key::P) {
        let path = Path::new("aura.png");
        save_png(screen, path)?;
        info!("Saved {}", path.display());
    }
    Ok(())
}

fn main() -> Result<()> {
    init_logging();

    let settings_path = std::env::var_os("AURA_SETTINGS").map(PathBuf::from);
    let store = load_store(settings_path.as_deref())?;

    let pending = Rc::new(RefCell::new(Pending::default()));
    let mut engine = Engine::new(store, Box::new(LoopRequester(Rc::clone(&pending))));

    let mut video = DemoSource::open()?;
    let mut drawer = Drawer::new("Ambient Aura", WINDOW_W, WINDOW_H)?;
    let mut screen = RasterBuffer::new(WINDOW_W, WINDOW_H);
    let mut aura_frame = RasterBuffer::new(1, 1);

    let clock = Instant::now();
    let now_ms = || clock.elapsed().as_secs_f64() * 1000.0;
    let mut page_active = true;
    let mut restart_at: Option<f64> = None;

    engine.start(now_ms());

    while drawer.is_open() && !drawer.esc_pressed() {
        let now = now_ms();

        let active = drawer.is_active();
        if active != page_active {
            page_active = active;
            engine.set_page_active(active, now);
        }

        if video.advance(now)? {
            let wants_video_frame = std::mem::take(&mut pending.borrow_mut().video_frame);
            if wants_video_frame {
                engine.on_video_frame_presented(now);
            }
        }

        handle_keys(&drawer, &mut engine, &screen, now)?;

        if restart_at.is_some_and(|t| now >= t) {
            restart_at = None;
            engine.start(now);
        }

        let animation_frame = std::mem::take(&mut pending.borrow_mut().animation_frame);
        if animation_frame {
            if let Err(e) = engine.on_animation_frame(now, video.source()) {
                error!("Aura stopped: {e}");
                restart_at = Some(now + 1000.0);
            }
        }

        compose_window(&mut screen, &mut aura_frame, &engine, video.source())?;
        draw_hud(&mut screen, &engine);
        drawer.present(&screen)?;

        let idle = std::mem::take(&mut pending.borrow_mut().idle);
        if idle {
            engine.on_idle(now_ms());
        }
    }

    engine.flush_settings();
    if let Some(path) = settings_path {
        match engine.store().inner().to_json() {
            Ok(json) => std::fs::write(&path, json)?,
            Err(e) => warn!("Settings not saved: {e}"),
        }
    }
    Ok(())
}
