//! Learned fusion stage
//!
//! This crate defines the contract the composition model expects from the fusion
//! network, a small convolutional reference implementation, the serializable
//! parameter map used for checkpoints, and helpers turning images into blobs.

pub mod blob;
pub mod fusion;
pub mod params;

pub use blob::*;
pub use fusion::*;
pub use params::*;

pub type Result<T> = std::result::Result<T, DnnError>;

#[derive(Debug, thiserror::Error)]
pub enum DnnError {
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Core error: {0}")]
    Core(#[from] lidar_core::Error),
}
