//! Core types for the Huan renderer.
//!
//! This crate provides the pieces every other crate reads:
//! - The startup settings record
//! - The engine-wide error type
//! - Engine-wide constants

pub mod error;
pub mod settings;

pub use error::{Error, Result};
pub use settings::AppSettings;

/// Engine-wide constants
pub mod constants {
    /// Engine name reported to the Vulkan instance.
    pub const ENGINE_NAME: &str = "Huan";
    /// Default number of frame slots allowed to have outstanding GPU work.
    pub const DEFAULT_MAX_FRAMES_IN_FLIGHT: usize = 2;
    /// Timeout used for every fence and acquire wait.
    pub const INFINITE_TIMEOUT: u64 = u64::MAX;
}
