//! Startup settings.
//!
//! Settings are read once when the application starts and are never reloaded.
//! Every field is optional in the TOML form; missing fields take the defaults.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_MAX_FRAMES_IN_FLIGHT;
use crate::error::{Error, Result};

/// Application settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Enable Vulkan validation layers.
    pub validation: bool,
    /// Number of frame slots that may have GPU work outstanding at once.
    pub max_frames_in_flight: usize,
    /// Enable vsync.
    pub vsync: bool,
    /// Create a swapchain-sized depth image alongside the swapchain.
    pub depth_buffer: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            title: "Huan Renderer".to_string(),
            width: 800,
            height: 600,
            validation: cfg!(debug_assertions),
            max_frames_in_flight: DEFAULT_MAX_FRAMES_IN_FLIGHT,
            vsync: true,
            depth_buffer: true,
        }
    }
}

impl AppSettings {
    /// Create settings with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Parse settings from a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let settings: Self = toml::from_str(source)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let settings = Self::from_toml_str(&source)?;
        tracing::info!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Check that the settings can drive a renderer.
    pub fn validate(&self) -> Result<()> {
        if self.max_frames_in_flight == 0 {
            return Err(Error::InvalidSettings(
                "max_frames_in_flight must be at least 1".to_string(),
            ));
        }
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidSettings(format!(
                "window size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        Ok(())
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the number of frames in flight.
    pub fn with_max_frames_in_flight(mut self, frames: usize) -> Self {
        self.max_frames_in_flight = frames;
        self
    }

    /// Enable or disable vsync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable the depth buffer.
    pub fn with_depth_buffer(mut self, depth_buffer: bool) -> Self {
        self.depth_buffer = depth_buffer;
        self
    }
}
