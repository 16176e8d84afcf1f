//! Bilateral Filter
//!
//! Joint spatial and range Gaussian weighting over single-channel depth grids.
//!
//! The input is standardised (zero mean, unit sample deviation) before weighting,
//! so `sigma_color` is expressed in standard deviations rather than metres. The
//! range term compares each padded sample with the mean of its padded column,
//! not with the window centre. The result is mapped back to input units.

use crate::border::{pad_plane, validate_padding, BorderMode, Padding};
use crate::convolve::{correlate_valid, gaussian_kernel, require_odd};
use crate::{require_nchw, ImgprocError, Result};
use lidar_core::Tensor;
use lidar_runtime::RuntimeRunner;

/// What to do when the range-weight normaliser underflows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NormalizationPolicy {
    /// Fail with `DegenerateNormalization`.
    #[default]
    Error,
    /// Emit NaN at the affected cells.
    Nan,
}

/// Bilateral filter parameters
#[derive(Debug, Clone)]
pub struct BilateralParams {
    /// Filter size (must be odd)
    pub kernel_size: usize,
    /// Spatial sigma (larger = more smoothing)
    pub sigma_spatial: f32,
    /// Range sigma, in standard deviations of the input
    pub sigma_color: f32,
    pub normalization: NormalizationPolicy,
    /// Denominators not above this are treated as degenerate. The default only
    /// rejects a sum that underflowed to zero.
    pub min_normalization: f32,
}

impl Default for BilateralParams {
    fn default() -> Self {
        Self {
            kernel_size: 5,
            sigma_spatial: 1.5,
            sigma_color: 2.0,
            normalization: NormalizationPolicy::Error,
            min_normalization: 0.0,
        }
    }
}

impl BilateralParams {
    pub fn fast() -> Self {
        Self {
            kernel_size: 3,
            sigma_spatial: 1.0,
            ..Self::default()
        }
    }

    pub fn high_quality() -> Self {
        Self {
            kernel_size: 9,
            sigma_spatial: 3.0,
            ..Self::default()
        }
    }
}

pub fn bilateral_filter(tensor: &Tensor<f32>, params: &BilateralParams) -> Result<Tensor<f32>> {
    bilateral_filter_ctx(tensor, params, &lidar_runtime::default_runner())
}

pub fn bilateral_filter_ctx(
    tensor: &Tensor<f32>,
    params: &BilateralParams,
    group: &RuntimeRunner,
) -> Result<Tensor<f32>> {
    let (_, c, h, w) = require_nchw(tensor)?;
    if c != 1 {
        return Err(ImgprocError::InvalidShape(format!(
            "bilateral filter expects a single channel, got {}",
            tensor.shape
        )));
    }
    require_odd(params.kernel_size, "bilateral")?;
    let pad = params.kernel_size / 2;
    let padding = Padding::uniform(pad);
    validate_padding(h, w, padding, BorderMode::Reflect101)?;

    let mean = tensor.mean();
    let std = tensor.std();
    if !(std > f32::EPSILON) {
        // nothing to weight: a flat grid filters to itself
        return Ok(tensor.clone());
    }

    let spatial = gaussian_kernel(params.sigma_spatial, params.kernel_size)?;
    let two_sigma_c2 = 2.0 * params.sigma_color * params.sigma_color;
    let (ph, pw) = padding.padded_dims(h, w);

    group.run(|| {
        let mut data = Vec::with_capacity(tensor.len());
        for (b, plane) in tensor.as_slice()?.chunks_exact(h * w).enumerate() {
            let normalized: Vec<f32> = plane.iter().map(|&v| (v - mean) / std).collect();
            let padded = pad_plane(&normalized, h, w, padding, BorderMode::Reflect101);

            let mut column_mean = vec![0.0f32; pw];
            for row in padded.chunks_exact(pw) {
                for (m, &v) in column_mean.iter_mut().zip(row) {
                    *m += v;
                }
            }
            for m in &mut column_mean {
                *m /= ph as f32;
            }

            let mut range_weight = Vec::with_capacity(ph * pw);
            let mut weighted = Vec::with_capacity(ph * pw);
            for row in padded.chunks_exact(pw) {
                for (&v, &m) in row.iter().zip(&column_mean) {
                    let d = v - m;
                    let g = (-(d * d) / two_sigma_c2).exp();
                    range_weight.push(g);
                    weighted.push(v * g);
                }
            }

            let numerator = correlate_valid(&weighted, pw, h, w, &spatial);
            let denominator = correlate_valid(&range_weight, pw, h, w, &spatial);

            for (i, (n, d)) in numerator.into_iter().zip(denominator).enumerate() {
                if !(d.abs() > params.min_normalization) {
                    match params.normalization {
                        NormalizationPolicy::Error => {
                            return Err(ImgprocError::DegenerateNormalization(format!(
                                "range weight sum {:e} at batch {}, row {}, col {}",
                                d,
                                b,
                                i / w,
                                i % w
                            )));
                        }
                        NormalizationPolicy::Nan => {
                            #[cfg(feature = "tracing")]
                            tracing::warn!("degenerate bilateral normalisation at batch {}, index {}", b, i);
                            data.push(f32::NAN);
                            continue;
                        }
                    }
                }
                data.push(mean + std * (n / d));
            }
        }
        Ok(Tensor::from_vec(data, tensor.shape.clone())?)
    })
}
