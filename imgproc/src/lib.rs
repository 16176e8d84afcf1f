pub mod bilateral;
pub mod border;
pub mod convolve;
pub mod grad;
pub mod interpolate;
pub mod median;
pub mod morph;

pub use bilateral::*;
pub use border::*;
pub use convolve::*;
pub use grad::*;
pub use interpolate::*;
pub use median::*;
pub use morph::*;

use lidar_core::Tensor;

pub type Result<T> = std::result::Result<T, ImgprocError>;

#[derive(Debug, thiserror::Error)]
pub enum ImgprocError {
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("Invalid kernel size: {0}")]
    InvalidKernelSize(String),

    #[error("Invalid padding: {0}")]
    InvalidPadding(String),

    #[error("Unsupported engine: {0}")]
    UnsupportedEngine(String),

    #[error("Degenerate normalization: {0}")]
    DegenerateNormalization(String),

    #[error("Core error: {0}")]
    Core(#[from] lidar_core::Error),
}

/// Checks for a rank-4 tensor with non-empty planes and returns its `(b, c, h, w)`.
pub(crate) fn require_nchw(tensor: &Tensor<f32>) -> Result<(usize, usize, usize, usize)> {
    let (b, c, h, w) = tensor
        .shape
        .as_nchw()
        .ok_or_else(|| ImgprocError::InvalidShape(format!("expected (B, C, H, W), got {}", tensor.shape)))?;
    if h == 0 || w == 0 {
        return Err(ImgprocError::InvalidShape(format!(
            "spatial dimensions must be non-zero, got {}",
            tensor.shape
        )));
    }
    Ok((b, c, h, w))
}
