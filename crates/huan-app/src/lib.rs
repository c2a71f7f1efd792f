//! Application framework for the Huan renderer.
//!
//! This crate provides a trait-based application framework that handles:
//! - Window creation and management
//! - GPU context initialization
//! - Swapchain and depth buffer creation and recreation
//! - Frame synchronization over a fixed number of frame slots
//! - Event loop handling and ordered teardown
//!
//! # Example
//!
//! ```no_run
//! use huan_app::{run_app, AppContext, AppSettings, FrameContext, HuanApp};
//!
//! struct MyApp;
//!
//! impl HuanApp for MyApp {
//!     fn init(_ctx: &mut AppContext) -> anyhow::Result<Self> {
//!         Ok(MyApp)
//!     }
//!
//!     fn update(&mut self, _ctx: &AppContext, _dt: f32) {}
//!
//!     fn render(&mut self, _ctx: &AppContext, _frame: &mut FrameContext<'_>) -> anyhow::Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     run_app::<MyApp>(AppSettings::default())
//! }
//! ```

mod app;
mod context;
mod depth;
mod frame;
mod presenter;
mod runner;

pub use app::HuanApp;
pub use context::AppContext;
pub use depth::DepthResources;
pub use frame::FrameContext;
pub use runner::{init_logging, run_app, FrameStats};

// Re-export commonly used types for convenience
pub use huan_core::AppSettings;
pub use huan_gpu::{GpuContext, GpuContextBuilder};
pub use winit::event::WindowEvent;
