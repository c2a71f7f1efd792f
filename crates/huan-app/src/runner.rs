//! Application runner and event loop.

use std::sync::Arc;
use std::time::Instant;

use huan_core::AppSettings;
use huan_gpu::{DeferredDeletionQueue, FrameLoop, TickOutcome};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::HuanApp;
use crate::context::AppContext;
use crate::presenter::FramePresenter;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` overrides the default `info` filter. Safe to call more than
/// once; later calls are ignored.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}

/// Run a [`HuanApp`] with the given settings.
///
/// Creates the window and GPU context, runs the event loop until the window
/// closes, and tears everything down. A fatal error stops the loop and is
/// returned.
pub fn run_app<A: HuanApp + 'static>(settings: AppSettings) -> anyhow::Result<()> {
    init_logging();
    settings.validate()?;

    info!("{} starting...", settings.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        settings,
        state: None,
        fatal: None,
    };
    event_loop.run_app(&mut runner)?;

    if let Some(mut state) = runner.state.take() {
        state.shutdown();
    }

    match runner.fatal {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Internal application runner that implements winit's `ApplicationHandler`.
struct AppRunner<A: HuanApp> {
    settings: AppSettings,
    state: Option<AppState<A>>,
    fatal: Option<anyhow::Error>,
}

/// Internal application state.
struct AppState<A: HuanApp> {
    // Dropped before the context
    app: Option<A>,
    ctx: Option<AppContext>,
    frame_loop: FrameLoop,
    deletion_queue: DeferredDeletionQueue,
    last_frame_time: Instant,
    stats: FrameStats,
    minimized: bool,
}

impl<A: HuanApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => self.fail(event_loop, e.context("Failed to initialize application")),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        let Some(state) = &mut self.state else {
            return;
        };

        // Let the app handle the event first
        if state.app.as_mut().is_some_and(|app| app.on_event(&event)) {
            return;
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                if let Some(mut state) = self.state.take() {
                    state.shutdown();
                }
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                state.frame_loop.request_resize();
                if size.width > 0 && size.height > 0 && state.minimized {
                    state.minimized = false;
                    event_loop.set_control_flow(ControlFlow::Poll);
                }
                info!("Resized to {}x{}", size.width, size.height);
            }
            WindowEvent::RedrawRequested => match state.render_frame() {
                Ok(TickOutcome::Minimized) => {
                    // Sleep until the next window event instead of spinning
                    state.minimized = true;
                    event_loop.set_control_flow(ControlFlow::Wait);
                }
                Ok(_) => {}
                Err(e) => self.fail(event_loop, e.context("Render error")),
            },
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            if !state.minimized {
                if let Some(ctx) = &state.ctx {
                    ctx.window.request_redraw();
                }
            }
        }
    }
}

impl<A: HuanApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.settings.title)
            .with_inner_size(PhysicalSize::new(self.settings.width, self.settings.height));
        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let mut ctx = AppContext::new(window, self.settings.clone(), A::UNIFORM_BUFFER_SIZE)?;
        info!("GPU: {}", ctx.gpu.capabilities().summary());

        let app = match A::init(&mut ctx) {
            Ok(app) => app,
            Err(e) => {
                ctx.teardown();
                return Err(e);
            }
        };

        let frames_in_flight = ctx.frames_in_flight();
        Ok(AppState {
            app: Some(app),
            ctx: Some(ctx),
            frame_loop: FrameLoop::new(frames_in_flight),
            deletion_queue: DeferredDeletionQueue::new(frames_in_flight),
            last_frame_time: Instant::now(),
            stats: FrameStats::default(),
            minimized: false,
        })
    }

    /// Log a fatal error, keep it for `run_app`, and stop the loop.
    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        error!("{err:#}");
        if let Some(mut state) = self.state.take() {
            state.shutdown();
        }
        self.fatal = Some(err);
        event_loop.exit();
    }
}

impl<A: HuanApp> AppState<A> {
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    fn render_frame(&mut self) -> anyhow::Result<TickOutcome> {
        let (Some(ctx), Some(app)) = (self.ctx.as_mut(), self.app.as_mut()) else {
            return Ok(TickOutcome::Minimized);
        };

        let now = Instant::now();
        let dt = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;

        app.update(ctx, dt);

        let mut presenter = FramePresenter {
            ctx,
            app,
            deletion_queue: &mut self.deletion_queue,
            dt,
            frame_number: self.frame_loop.frame_number(),
        };
        let outcome = self.frame_loop.tick(&mut presenter)?;

        if matches!(outcome, TickOutcome::Presented { .. }) {
            self.stats.record(dt);
        }
        Ok(outcome)
    }

    /// Tear down in order: application, deferred resources, context.
    fn shutdown(&mut self) {
        self.stats.log();

        info!("Starting cleanup...");
        let Some(mut ctx) = self.ctx.take() else {
            return;
        };
        if let Err(e) = ctx.gpu.wait_idle() {
            error!("Failed to wait idle: {e}");
        }

        if let Some(mut app) = self.app.take() {
            app.cleanup(&mut ctx);
        }
        let released = self.deletion_queue.flush();
        info!(released, "Deferred resources released");

        ctx.teardown();
        info!("Cleanup complete");
    }
}

/// Frame rate statistics collected over a run.
#[derive(Debug, Clone, Default)]
pub struct FrameStats {
    frames: u64,
    min_fps: Option<f64>,
    max_fps: f64,
    fps_sum: f64,
}

impl FrameStats {
    /// Record a presented frame that took `dt` seconds.
    pub fn record(&mut self, dt: f32) {
        self.frames += 1;
        if dt <= 0.0 {
            return;
        }
        let fps = 1.0 / f64::from(dt);
        self.min_fps = Some(self.min_fps.map_or(fps, |min| min.min(fps)));
        self.max_fps = self.max_fps.max(fps);
        self.fps_sum += fps;
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn min_fps(&self) -> Option<f64> {
        self.min_fps
    }

    pub fn max_fps(&self) -> f64 {
        self.max_fps
    }

    pub fn average_fps(&self) -> Option<f64> {
        (self.frames > 0).then(|| self.fps_sum / self.frames as f64)
    }

    fn log(&self) {
        if let (Some(min), Some(avg)) = (self.min_fps, self.average_fps()) {
            info!("FPS Statistics:");
            info!("  Min: {min:.1}");
            info!("  Max: {:.1}", self.max_fps);
            info!("  Avg: {avg:.1}");
            info!("  Total frames: {}", self.frames);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_start_empty() {
        let stats = FrameStats::default();
        assert_eq!(stats.frames(), 0);
        assert!(stats.min_fps().is_none());
        assert!(stats.average_fps().is_none());
    }

    #[test]
    fn stats_track_min_max_and_average() {
        let mut stats = FrameStats::default();
        stats.record(0.5);
        stats.record(0.25);
        stats.record(0.125);

        assert_eq!(stats.frames(), 3);
        assert_eq!(stats.min_fps(), Some(2.0));
        assert_eq!(stats.max_fps(), 8.0);
        assert_eq!(stats.average_fps(), Some(14.0 / 3.0));
    }

    #[test]
    fn zero_dt_counts_frame_only() {
        let mut stats = FrameStats::default();
        stats.record(0.0);
        assert_eq!(stats.frames(), 1);
        assert!(stats.min_fps().is_none());
    }
}
