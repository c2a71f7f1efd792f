//! Error types for the engine.

use thiserror::Error;

/// Engine-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings file could not be parsed
    #[error("Settings parse error: {0}")]
    SettingsParse(#[from] toml::de::Error),

    /// Settings parsed but hold an unusable value
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
