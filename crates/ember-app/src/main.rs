// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use std::ffi::CStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use ash::vk;
use clap::Parser;
use ember_core::init_tracing;
use ember_platform::initial_render_size;
use ember_render::{FrameStatus, RenderSize, Renderer, ResizeHandle};
use ember_render_vk::{
    EngineConfig, FrameContext, PresentPreference, RenderHost, ShaderPaths, ShaderSource, Vertex, VulkanEngine,
};
use portable_atomic::{AtomicBool, Ordering};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use serde::Deserialize;
use tracing::{error, info, warn};

use ember_platform::winit::{
    application::ApplicationHandler,
    dpi::PhysicalSize,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, ControlFlow, EventLoop},
    window::{Window, WindowId},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; missing file means defaults
    #[arg(long, default_value = "ember.toml")]
    config: PathBuf,
    #[arg(long)]
    width: Option<u32>,
    #[arg(long)]
    height: Option<u32>,
    /// Force FIFO presentation
    #[arg(long)]
    vsync: bool,
    /// Compiled vertex shader (SPIR-V); default is the built-in one
    #[arg(long)]
    vert: Option<PathBuf>,
    /// Compiled fragment shader (SPIR-V); default is the built-in one
    #[arg(long)]
    frag: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum PresentCfg {
    #[default]
    LowLatency,
    Vsync,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
struct RenderCfg {
    clear_color: [f32; 4],
    width: u32,
    height: u32,
    max_frames_in_flight: usize,
    present: PresentCfg,
    validation: Option<bool>,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            width: 800,
            height: 600,
            max_frames_in_flight: ember_render_vk::DEFAULT_MAX_FRAMES_IN_FLIGHT,
            present: PresentCfg::LowLatency,
            validation: None,
        }
    }
}

/// SPIR-V files overriding the shaders built into the binary.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
struct ShaderCfg {
    vertex: Option<PathBuf>,
    fragment: Option<PathBuf>,
}

static TRIANGLE_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.vert.spv"));
static TRIANGLE_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/triangle.frag.spv"));

const TRIANGLE: [Vertex; 3] = [
    Vertex::new([0.0, -0.5, 0.0], [1.0, 0.0, 0.0, 1.0]),
    Vertex::new([0.5, 0.5, 0.0], [0.0, 1.0, 0.0, 1.0]),
    Vertex::new([-0.5, 0.5, 0.0], [0.0, 0.0, 1.0, 1.0]),
];

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
struct AppCfg {
    render: RenderCfg,
    shaders: ShaderCfg,
}

fn default_clear() -> [f32; 4] {
    [0.02, 0.02, 0.04, 1.0]
}

fn parse_cfg(text: &str) -> Result<AppCfg, toml::de::Error> {
    toml::from_str::<AppCfg>(text)
}

fn load_cfg(path: &Path) -> AppCfg {
    match fs::read_to_string(path) {
        Ok(s) => parse_cfg(&s).unwrap_or_else(|e| {
            warn!("{}: {e}; using defaults", path.display());
            AppCfg::default()
        }),
        Err(_) => AppCfg::default(),
    }
}

/// Built-in SPIR-V unless a stage is overridden; an override for one stage
/// pairs with the default file for the other.
fn shader_source(cfg: &ShaderCfg, args: &Args) -> ShaderSource {
    let vertex = args.vert.clone().or_else(|| cfg.vertex.clone());
    let fragment = args.frag.clone().or_else(|| cfg.fragment.clone());
    if vertex.is_none() && fragment.is_none() {
        return ShaderSource::Embedded {
            vertex: TRIANGLE_VERT,
            fragment: TRIANGLE_FRAG,
        };
    }
    ShaderSource::Files(ShaderPaths {
        vertex: vertex.unwrap_or_else(|| PathBuf::from("shaders/triangle.vert.spv")),
        fragment: fragment.unwrap_or_else(|| PathBuf::from("shaders/triangle.frag.spv")),
    })
}

/// File config with CLI overrides applied on top.
fn engine_config(cfg: &AppCfg, args: &Args) -> EngineConfig {
    let defaults = EngineConfig::default();
    let present = if args.vsync || cfg.render.present == PresentCfg::Vsync {
        PresentPreference::Vsync
    } else {
        PresentPreference::LowLatency
    };
    EngineConfig {
        app_name: "ember".to_owned(),
        clear_color: cfg.render.clear_color,
        initial_size: RenderSize::new(
            args.width.unwrap_or(cfg.render.width),
            args.height.unwrap_or(cfg.render.height),
        ),
        max_frames_in_flight: cfg.render.max_frames_in_flight,
        present,
        validation: cfg.render.validation.unwrap_or(defaults.validation),
        shaders: shader_source(&cfg.shaders, args),
    }
}

/// Window-side half of the engine: surface creation and the draw call.
struct WindowHost {
    window: Arc<Window>,
}

impl RenderHost for WindowHost {
    fn instance_extensions(&self) -> Vec<&'static CStr> {
        let dh = match self.window.display_handle() {
            Ok(dh) => dh.as_raw(),
            Err(e) => {
                warn!("display handle unavailable: {e}");
                return Vec::new();
            }
        };
        match ash_window::enumerate_required_extensions(dh) {
            // ash-window hands out pointers to static, NUL-terminated names
            Ok(names) => names
                .iter()
                .map(|&p| unsafe { CStr::from_ptr(p) })
                .collect(),
            Err(e) => {
                warn!("no surface extensions for this display: {e}");
                Vec::new()
            }
        }
    }

    fn create_surface(&self, entry: &ash::Entry, instance: &ash::Instance) -> Result<vk::SurfaceKHR> {
        let dh = self.window.display_handle().context("display_handle")?.as_raw();
        let wh = self.window.window_handle().context("window_handle")?.as_raw();
        let surface = unsafe { ash_window::create_surface(entry, instance, dh, wh, None) }
            .context("create_surface")?;
        Ok(surface)
    }

    fn vertices(&self) -> Vec<Vertex> {
        TRIANGLE.to_vec()
    }

    fn render(&mut self, frame: &FrameContext<'_>) {
        if frame.vertex_count == 0 {
            return;
        }
        unsafe {
            frame
                .device
                .cmd_draw(frame.command_buffer, frame.vertex_count, 1, 0, 0)
        };
    }
}

/// Render-thread body: initialize, tick until told to stop or a frame
/// fails, then release.
fn render_loop<R: Renderer>(mut renderer: R, stop: &AtomicBool) {
    if let Err(e) = renderer.initialize() {
        error!("renderer init failed: {e:#}");
        renderer.release();
        return;
    }

    let mut frames: u32 = 0;
    let mut last_fps_instant = Instant::now();

    while !stop.load(Ordering::Acquire) {
        match renderer.execute() {
            Ok(FrameStatus::Presented) => frames = frames.saturating_add(1),
            // minimized or stale chain: don't spin
            Ok(FrameStatus::Skipped) => thread::sleep(Duration::from_millis(4)),
            Err(e) => {
                error!("render error: {e:#}");
                break;
            }
        }

        let now = Instant::now();
        if now.duration_since(last_fps_instant).as_secs_f32() >= 1.0 {
            info!("fps ~ {}", frames);
            frames = 0;
            last_fps_instant = now;
        }
    }

    renderer.release();
}

struct RenderThread {
    stop: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

impl RenderThread {
    fn spawn<R: Renderer + Send + 'static>(renderer: R) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let join = thread::Builder::new()
            .name("render".to_owned())
            .spawn(move || render_loop(renderer, &flag))
            .context("spawn render thread")?;
        Ok(RenderThread { stop, join })
    }

    fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    fn stop(self) {
        self.stop.store(true, Ordering::Release);
        if self.join.join().is_err() {
            error!("render thread panicked");
        }
    }
}

struct App {
    cfg: EngineConfig,
    window: Option<Arc<Window>>,
    resize: Option<ResizeHandle>,
    render: Option<RenderThread>,
}

impl App {
    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let want = self.cfg.initial_size;
        let window = Arc::new(
            event_loop
                .create_window(
                    Window::default_attributes()
                        .with_title("ember")
                        .with_inner_size(PhysicalSize::new(want.width, want.height)),
                )
                .context("create_window")?,
        );

        let mut cfg = self.cfg.clone();
        cfg.initial_size = initial_render_size(window.inner_size(), want);
        info!(
            "window {}x{}, present = {:?}",
            cfg.initial_size.width, cfg.initial_size.height, cfg.present
        );

        let engine = VulkanEngine::new(
            cfg,
            WindowHost {
                window: Arc::clone(&window),
            },
        );
        self.resize = Some(engine.resize_handle());
        self.render = Some(RenderThread::spawn(engine)?);
        self.window = Some(window);
        Ok(())
    }

    /// Render thread first, window last: the surface must go before the
    /// native window it was created from.
    fn shutdown(&mut self) {
        if let Some(render) = self.render.take() {
            render.stop();
        }
        self.resize = None;
        self.window = None;
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            if let Err(e) = self.start(event_loop) {
                error!("startup failed: {e:#}");
                event_loop.exit();
                return;
            }
        }
        // The render thread paces itself.
        event_loop.set_control_flow(ControlFlow::Wait);
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if let Some(window) = &self.window {
            if window_id != window.id() {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.shutdown();
                event_loop.exit();
            }

            WindowEvent::Resized(new_size) => {
                info!("Resized → {}x{}", new_size.width, new_size.height);
                if let Some(resize) = &self.resize {
                    resize.request(new_size.width, new_size.height);
                }
            }

            _ => {}
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        // render thread gave up (init or frame error): nothing left to show
        if self.render.as_ref().is_some_and(RenderThread::is_finished) {
            self.shutdown();
            event_loop.exit();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.shutdown();
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = engine_config(&load_cfg(&args.config), &args);

    let event_loop: EventLoop<()> = EventLoop::new()?;
    let mut app = App {
        cfg,
        window: None,
        resize: None,
        render: None,
    };

    event_loop.run_app(&mut app)?;
    Ok(())
}
