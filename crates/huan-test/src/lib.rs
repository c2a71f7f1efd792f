//! Test harness for the Huan renderer.
//!
//! Provides a headless GPU context with upload and read-back helpers, and
//! image comparison against stored baselines.

pub mod harness;

pub use harness::{compare_images, create_diff_image, HeadlessGpu, VisualRegressionTest};

use huan_gpu::GpuError;
use thiserror::Error;

/// Errors raised by the harness.
#[derive(Error, Debug)]
pub enum TestError {
    #[error("GPU error: {0}")]
    Gpu(#[from] GpuError),
    #[error("Read back {actual} bytes, expected {expected}")]
    ReadbackSize { expected: usize, actual: usize },
    #[error("Image comparison failed: {0}")]
    ImageComparison(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, TestError>;

/// Where baselines live and how far a read-back may drift from them.
#[derive(Debug, Clone)]
pub struct VisualTestConfig {
    /// Largest accepted result of [`compare_images`].
    pub threshold: f64,
    pub baseline_dir: String,
    /// Read-backs and diff images are written here.
    pub output_dir: String,
}

impl Default for VisualTestConfig {
    fn default() -> Self {
        Self {
            threshold: 0.001,
            baseline_dir: "tests/baselines".to_string(),
            output_dir: "target/huan-test".to_string(),
        }
    }
}
