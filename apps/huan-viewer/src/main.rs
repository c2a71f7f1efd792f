//! Huan Renderer Demo Viewer
//!
//! Clears the swapchain to a slowly cycling color and copies a bouncing
//! square into it from the frame slot's uniform buffer. Everything is done
//! with transfer commands, so no shaders are involved.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p huan-viewer -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! - `-c, --config <PATH>`: Load settings from a TOML file
//! - `-h, --help`: Print help message
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;

use std::process::ExitCode;

use huan_app::{init_logging, run_app};
use huan_core::AppSettings;

use crate::app::Viewer;

const WIDTH: u32 = 1280;
const HEIGHT: u32 = 720;

fn main() -> ExitCode {
    // Check for help flag before starting the app
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return ExitCode::SUCCESS;
    }

    init_logging();

    let result = load_settings().and_then(run_app::<Viewer>);
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_settings() -> anyhow::Result<AppSettings> {
    let args: Vec<String> = std::env::args().collect();
    let mut i = 1;
    while i < args.len() {
        if args[i] == "-c" || args[i] == "--config" {
            let path = args
                .get(i + 1)
                .ok_or_else(|| anyhow::anyhow!("{} expects a path", args[i]))?;
            return Ok(AppSettings::load(path)?);
        }
        i += 1;
    }

    Ok(AppSettings::new("Huan Renderer - Demo").with_size(WIDTH, HEIGHT))
}

fn print_help() {
    eprintln!(
        "Huan Renderer Demo Viewer

USAGE:
    cargo run -p huan-viewer -- [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Load settings from a TOML file
                            Missing keys keep their defaults
    -h, --help              Print this help message

SETTINGS (TOML):
    title = \"Huan\"
    width = 1280
    height = 720
    validation = true
    max_frames_in_flight = 2
    vsync = true
    depth_buffer = true

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}
