use crate::synthesizer::require_depth_grid;
use crate::{CompletionError, Result};
use lidar_core::Tensor;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RectifyParams {
    /// Sparse cells above this depth are LiDAR returns
    pub valid_threshold: f32,
    /// Returns further than this from the pseudo-depth are treated as outliers
    pub outlier_threshold: f32,
    /// Weight of the LiDAR return, 1.0 replaces the pseudo-depth outright
    pub blend: f32,
}

impl Default for RectifyParams {
    fn default() -> Self {
        Self {
            valid_threshold: 0.1,
            outlier_threshold: 3.0,
            blend: 1.0,
        }
    }
}

impl RectifyParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.valid_threshold >= 0.0) || !(self.outlier_threshold >= 0.0) {
            return Err(CompletionError::InvalidConfig(format!(
                "rectification thresholds must be non-negative, got {:?}",
                self
            )));
        }
        if !(0.0..=1.0).contains(&self.blend) {
            return Err(CompletionError::InvalidConfig(format!(
                "rectification blend must lie in [0, 1], got {}",
                self.blend
            )));
        }
        Ok(())
    }
}

/// Pulls the pseudo-depth towards trusted LiDAR returns.
///
/// Where the sparse grid holds a return that agrees with the pseudo-depth to
/// within the outlier threshold, the output moves `blend` of the way from the
/// pseudo-depth to the return. Every other cell keeps the pseudo-depth.
pub fn rectify_depth(
    sparse: &Tensor<f32>,
    pseudo: &Tensor<f32>,
    params: &RectifyParams,
) -> Result<Tensor<f32>> {
    require_depth_grid(sparse, "sparse depth")?;
    if sparse.shape != pseudo.shape {
        return Err(CompletionError::InvalidShape(format!(
            "sparse {} and pseudo-depth {} differ",
            sparse.shape, pseudo.shape
        )));
    }
    let RectifyParams {
        valid_threshold,
        outlier_threshold,
        blend,
    } = *params;
    Ok(pseudo.zip_map(sparse, |p, s| {
        if s > valid_threshold && (s - p).abs() <= outlier_threshold {
            p + blend * (s - p)
        } else {
            p
        }
    })?)
}
