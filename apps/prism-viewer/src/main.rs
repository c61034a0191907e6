use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use glam::Vec3;
use prism_assets::SceneManifest;
use prism_render::{Camera, Dimensions, Renderer, Scene};
use prism_render_wgpu::{FlyController, WgpuBackend};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::{DeviceEvent, ElementState, KeyEvent, MouseButton, WindowEvent};
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowId};

#[derive(Parser)]
#[command(name = "prism-viewer", about = "Interactive Prism scene viewer")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Scene manifest (YAML). A demo cube scene when omitted.
    manifest: Option<PathBuf>,

    #[arg(long, default_value = "1280")]
    width: u32,

    #[arg(long, default_value = "720")]
    height: u32,

    /// Entity spin around Y in radians per second
    #[arg(long, default_value = "0.25")]
    spin: f32,
}

/// Frames counted since the last report.
struct FpsCounter {
    frames: u32,
    draw_calls: u32,
    since: Instant,
}

impl FpsCounter {
    fn new() -> Self {
        Self {
            frames: 0,
            draw_calls: 0,
            since: Instant::now(),
        }
    }

    fn frame(&mut self, draw_calls: u32) {
        self.frames += 1;
        self.draw_calls = draw_calls;
        let elapsed = self.since.elapsed().as_secs_f32();
        if elapsed >= 1.0 {
            tracing::info!(
                fps = self.frames as f32 / elapsed,
                draw_calls = self.draw_calls,
                "frame stats"
            );
            self.frames = 0;
            self.since = Instant::now();
        }
    }
}

/// Input and scene state, independent of the GPU.
struct ViewerState {
    scene: Scene,
    fly: FlyController,
    spin: f32,
    paused: bool,
    keys_held: HashSet<KeyCode>,
    mouse_captured: bool,
    last_frame: Instant,
    fps: FpsCounter,
}

impl ViewerState {
    fn new(mut scene: Scene, spin: f32) -> Self {
        if scene.camera().is_none() {
            scene.add_camera(Camera::new());
        }
        let fly = scene
            .camera()
            .map(FlyController::from_camera)
            .unwrap_or_default();
        Self {
            scene,
            fly,
            spin,
            paused: false,
            keys_held: HashSet::new(),
            mouse_captured: false,
            last_frame: Instant::now(),
            fps: FpsCounter::new(),
        }
    }

    fn update(&mut self, dt: f32) {
        let speed_mult = if self.keys_held.contains(&KeyCode::ShiftLeft) {
            3.0
        } else {
            1.0
        };

        let mut local = Vec3::ZERO;
        for (key, axis) in [
            (KeyCode::KeyW, Vec3::Z),
            (KeyCode::KeyS, Vec3::NEG_Z),
            (KeyCode::KeyA, Vec3::NEG_X),
            (KeyCode::KeyD, Vec3::X),
            (KeyCode::Space, Vec3::Y),
            (KeyCode::ControlLeft, Vec3::NEG_Y),
        ] {
            if self.keys_held.contains(&key) {
                local += axis;
            }
        }
        if let Some(camera) = self.scene.camera_mut() {
            self.fly.fly(camera, local, dt * speed_mult);
        }

        if !self.paused {
            let angle = dt * self.spin;
            for (_, entity) in self.scene.entities_mut() {
                entity.rotate(0.0, angle, 0.0);
            }
        }
    }

    fn look(&mut self, dx: f32, dy: f32) {
        if let Some(camera) = self.scene.camera_mut() {
            self.fly.rotate(camera, dx, dy);
        }
    }

    fn handle_key<B: prism_render::Backend>(
        &mut self,
        key: KeyCode,
        pressed: bool,
        renderer: &mut Renderer<B>,
    ) {
        if pressed {
            self.keys_held.insert(key);
        } else {
            self.keys_held.remove(&key);
            return;
        }

        match key {
            KeyCode::KeyF => {
                let enabled = !renderer.wireframe();
                renderer.set_wireframe(enabled);
                tracing::info!(enabled, "wireframe toggled");
            }
            KeyCode::KeyP => {
                self.paused = !self.paused;
                tracing::info!(paused = self.paused, "spin toggled");
            }
            KeyCode::KeyR => {
                for (_, entity) in self.scene.entities_mut() {
                    entity.reset();
                }
            }
            _ => {}
        }
    }
}

struct ViewerApp {
    manifest: SceneManifest,
    dimensions: Dimensions,
    spin: f32,
    window: Option<Arc<Window>>,
    renderer: Option<Renderer<WgpuBackend>>,
    state: Option<ViewerState>,
    error: Option<anyhow::Error>,
}

impl ViewerApp {
    fn new(manifest: SceneManifest, dimensions: Dimensions, spin: f32) -> Self {
        Self {
            manifest,
            dimensions,
            spin,
            window: None,
            renderer: None,
            state: None,
            error: None,
        }
    }

    fn init(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let initial = PhysicalSize::new(self.dimensions.width, self.dimensions.height);
        let attrs = Window::default_attributes()
            .with_title("Prism")
            .with_inner_size(initial);
        let window = Arc::new(event_loop.create_window(attrs).context("create window")?);

        let size = window.inner_size();
        let dimensions = Dimensions::new(size.width, size.height);
        let backend = WgpuBackend::new(window.clone(), dimensions).context("initialize GPU")?;
        tracing::info!(adapter = %backend.adapter_info().name, "backend ready");

        let mut renderer = Renderer::new(backend, dimensions, self.manifest.renderer)
            .context("create renderer")?;
        self.manifest.configure(&mut renderer);
        let scene = match self.manifest.build_scene(renderer.backend_mut()) {
            Ok(scene) => scene,
            Err(err) => {
                drop(renderer.release());
                return Err(err).context("load scene");
            }
        };

        self.state = Some(ViewerState::new(scene, self.spin));
        self.renderer = Some(renderer);
        self.window = Some(window);
        Ok(())
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        tracing::error!("{err:#}");
        self.error = Some(err);
        event_loop.exit();
    }

    fn redraw(&mut self) -> Result<()> {
        let (Some(state), Some(renderer)) = (&mut self.state, &mut self.renderer) else {
            return Ok(());
        };
        let now = Instant::now();
        let dt = (now - state.last_frame).as_secs_f32().min(0.1);
        state.last_frame = now;
        state.update(dt);

        let stats = renderer.render(&state.scene)?;
        state.fps.frame(stats.draw_calls);
        Ok(())
    }
}

impl ApplicationHandler for ViewerApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        if let Err(err) = self.init(event_loop) {
            self.fail(event_loop, err);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                event_loop.exit();
            }
            WindowEvent::Resized(new_size) => {
                if let Some(renderer) = &mut self.renderer {
                    if let Err(err) = renderer.resize(new_size.width, new_size.height) {
                        self.fail(event_loop, err.into());
                    }
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(key),
                        state: key_state,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                if key == KeyCode::Escape {
                    event_loop.exit();
                    return;
                }
                if let (Some(state), Some(renderer)) = (&mut self.state, &mut self.renderer) {
                    state.handle_key(key, key_state == ElementState::Pressed, renderer);
                }
            }
            WindowEvent::MouseInput {
                button: MouseButton::Right,
                state: btn_state,
                ..
            } => {
                let captured = btn_state == ElementState::Pressed;
                if let Some(state) = &mut self.state {
                    state.mouse_captured = captured;
                }
                if let Some(window) = &self.window {
                    window.set_cursor_visible(!captured);
                }
            }
            WindowEvent::RedrawRequested => {
                if let Err(err) = self.redraw() {
                    self.fail(event_loop, err);
                    return;
                }
                if let Some(window) = &self.window {
                    window.request_redraw();
                }
            }
            _ => {}
        }
    }

    fn device_event(
        &mut self,
        _event_loop: &ActiveEventLoop,
        _device_id: winit::event::DeviceId,
        event: DeviceEvent,
    ) {
        if let (DeviceEvent::MouseMotion { delta }, Some(state)) = (event, &mut self.state) {
            if state.mouse_captured {
                state.look(delta.0 as f32, delta.1 as f32);
            }
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(mut renderer) = self.renderer.take() {
            if let Some(state) = self.state.take() {
                state.scene.release(renderer.backend_mut());
            }
            drop(renderer.release());
            tracing::info!("resources released");
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    tracing::info!("{} starting", prism_render::crate_info());

    let manifest = match &cli.manifest {
        Some(path) => SceneManifest::load(path)
            .with_context(|| format!("load manifest {}", path.display()))?,
        None => SceneManifest::demo(),
    };

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = ViewerApp::new(manifest, Dimensions::new(cli.width, cli.height), cli.spin);
    event_loop.run_app(&mut app)?;

    match app.error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
