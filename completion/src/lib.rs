//! Depth completion
//!
//! Turns a sparse LiDAR projection into a dense depth map in three steps: a
//! classical synthesizer produces a pseudo-depth map, the rectification stage pulls
//! it towards trusted LiDAR returns, and a learned fusion network predicts the
//! dense map whose residual against the sparse input corrects the pseudo-depth.

pub mod checkpoint;
pub mod config;
pub mod model;
pub mod rectify;
pub mod strategy;
pub mod synthesizer;

pub use checkpoint::*;
pub use config::*;
pub use model::*;
pub use rectify::*;
pub use strategy::*;
pub use synthesizer::*;

pub type Result<T> = std::result::Result<T, CompletionError>;

#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    #[error("Unknown strategy: '{0}'")]
    UnknownStrategy(String),

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("Image processing error: {0}")]
    Imgproc(#[from] lidar_imgproc::ImgprocError),

    #[error("Network error: {0}")]
    Dnn(#[from] lidar_dnn::DnnError),

    #[error("Core error: {0}")]
    Core(#[from] lidar_core::Error),

    #[error("Runtime error: {0}")]
    Runtime(#[from] lidar_runtime::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
