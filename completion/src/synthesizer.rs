//! Classical sparse-to-dense depth synthesis.
//!
//! Every synthesizer takes a `(B, 1, H, W)` sparse grid where values at or below
//! the validity threshold mean "no return", and produces a grid of the same shape
//! with no negative values.

use crate::{CompletionError, Result};
use lidar_core::Tensor;
use lidar_imgproc::{
    bilateral_filter_ctx, closing_ctx, dilation_ctx, gaussian_blur_ctx, interpolate_depth_map_ctx,
    median_blur_ctx, BilateralParams, BorderMode, MorphEngine, MorphParams, MorphShape,
    StructuringElement,
};
use lidar_runtime::RuntimeRunner;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Produces a dense pseudo-depth map from a sparse depth grid.
pub trait DepthSynthesizer: Send + Sync {
    /// Registry key of this synthesizer.
    fn name(&self) -> &'static str;

    fn synthesize(&self, sparse: &Tensor<f32>, runner: &RuntimeRunner) -> Result<Tensor<f32>>;
}

/// Smoothing applied by the morphology fill after the median stage. Either blur
/// is written back to valid cells only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlurKind {
    Bilateral {
        kernel_size: usize,
        sigma_spatial: f32,
        sigma_color: f32,
    },
    Gaussian { kernel_size: usize },
    None,
}

impl Default for BlurKind {
    fn default() -> Self {
        BlurKind::Bilateral {
            kernel_size: 5,
            sigma_spatial: 1.5,
            sigma_color: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FillParams {
    /// Depth used to invert valid samples so that near returns win dilations
    pub max_depth: f32,
    /// Cells at or below this depth are empty
    pub valid_threshold: f32,
    /// Carry column tops up to the first row and fill the rest with a large dilation
    pub extrapolate: bool,
    pub blur: BlurKind,
    /// Full-kernel size of the "dilation" strategy
    pub dilation_kernel: usize,
    pub median_kernel: usize,
    /// Morphology engine name, `"unfold"` or `"convolution"`
    pub morph_engine: String,
}

impl Default for FillParams {
    fn default() -> Self {
        Self {
            max_depth: 100.0,
            valid_threshold: 0.1,
            extrapolate: false,
            blur: BlurKind::default(),
            dilation_kernel: 3,
            median_kernel: 5,
            morph_engine: MorphEngine::Unfold.to_string(),
        }
    }
}

impl FillParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.max_depth > 0.0) {
            return Err(CompletionError::InvalidConfig(format!(
                "max_depth must be positive, got {}",
                self.max_depth
            )));
        }
        if !(self.valid_threshold >= 0.0) || self.valid_threshold >= self.max_depth {
            return Err(CompletionError::InvalidConfig(format!(
                "valid_threshold must lie in [0, max_depth), got {}",
                self.valid_threshold
            )));
        }
        let mut kernels = vec![
            ("dilation_kernel", self.dilation_kernel),
            ("median_kernel", self.median_kernel),
        ];
        match &self.blur {
            BlurKind::Bilateral { kernel_size, .. } | BlurKind::Gaussian { kernel_size } => {
                kernels.push(("blur kernel_size", *kernel_size))
            }
            BlurKind::None => {}
        }
        for (name, k) in kernels {
            if k == 0 || k % 2 == 0 {
                return Err(CompletionError::InvalidConfig(format!(
                    "{} must be odd and positive, got {}",
                    name, k
                )));
            }
        }
        self.engine()?;
        Ok(())
    }

    pub fn engine(&self) -> Result<MorphEngine> {
        Ok(MorphEngine::from_str(&self.morph_engine)?)
    }

    fn morph_params(&self) -> Result<MorphParams> {
        Ok(MorphParams::default().with_engine(self.engine()?))
    }
}

/// Rejects anything other than a `(B, 1, H, W)` grid.
pub fn require_depth_grid(tensor: &Tensor<f32>, what: &str) -> Result<(usize, usize, usize)> {
    match tensor.shape.as_nchw() {
        Some((b, 1, h, w)) if h > 0 && w > 0 => Ok((b, h, w)),
        _ => Err(CompletionError::InvalidShape(format!(
            "{} must be (B, 1, H, W), got {}",
            what, tensor.shape
        ))),
    }
}

#[cfg(feature = "tracing")]
fn stage<T>(name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let start = std::time::Instant::now();
    let out = f();
    tracing::trace!("{} took {:?}", name, start.elapsed());
    out
}

#[cfg(not(feature = "tracing"))]
fn stage<T>(_name: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    f()
}

/// Fast morphological fill.
///
/// Valid depths are inverted (`max_depth - d`) so that dilations favour near
/// returns, spread by a 5x5 diamond, closed with a 5x5 box, and the remaining
/// holes are taken from a 7x7 dilation. After optional extrapolation the result
/// is median filtered, smoothed and inverted back.
pub struct MorphologyFill {
    params: FillParams,
    morph: MorphParams,
    diamond5: StructuringElement,
    full5: StructuringElement,
    full7: StructuringElement,
    full31: StructuringElement,
}

impl MorphologyFill {
    pub fn new(params: FillParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            morph: params.morph_params()?,
            diamond5: StructuringElement::from_shape(MorphShape::Diamond, 5, 5)?,
            full5: StructuringElement::ones(5, 5)?,
            full7: StructuringElement::ones(7, 7)?,
            full31: StructuringElement::ones(31, 31)?,
            params,
        })
    }

    fn fill_empty(
        &self,
        depth: &Tensor<f32>,
        se: &StructuringElement,
        runner: &RuntimeRunner,
    ) -> Result<Tensor<f32>> {
        let thr = self.params.valid_threshold;
        let dilated = dilation_ctx(depth, se, &self.morph, runner)?;
        Ok(depth.zip_map(&dilated, |d, f| if d > thr { d } else { f })?)
    }
}

/// Writes `blurred` back into the valid cells of `depth` only, clamped to the
/// range of valid values each plane held before blurring.
fn write_back_valid(
    depth: &Tensor<f32>,
    blurred: &Tensor<f32>,
    valid_threshold: f32,
) -> Result<Tensor<f32>> {
    let (_, _, h, w) = depth.nchw()?;
    let mut out = depth.clone();
    let smoothed = blurred.as_slice()?;
    for (plane, smooth) in out
        .as_mut_slice()?
        .chunks_exact_mut(h * w)
        .zip(smoothed.chunks_exact(h * w))
    {
        let (lo, hi) = plane
            .iter()
            .filter(|&&d| d > valid_threshold)
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &d| {
                (lo.min(d), hi.max(d))
            });
        for (d, &b) in plane.iter_mut().zip(smooth) {
            if *d > valid_threshold {
                *d = b.clamp(lo, hi);
            }
        }
    }
    Ok(out)
}

/// Copies each column's top-most valid value into the rows above it.
fn extend_column_tops(depth: &mut Tensor<f32>, valid_threshold: f32) -> Result<()> {
    let (_, _, h, w) = depth.nchw()?;
    for plane in depth.as_mut_slice()?.chunks_exact_mut(h * w) {
        for x in 0..w {
            if let Some(top) = (0..h).find(|&y| plane[y * w + x] > valid_threshold) {
                let value = plane[top * w + x];
                for y in 0..top {
                    plane[y * w + x] = value;
                }
            }
        }
    }
    Ok(())
}

impl DepthSynthesizer for MorphologyFill {
    fn name(&self) -> &'static str {
        "morphology"
    }

    fn synthesize(&self, sparse: &Tensor<f32>, runner: &RuntimeRunner) -> Result<Tensor<f32>> {
        require_depth_grid(sparse, "sparse depth")?;
        let thr = self.params.valid_threshold;
        let max_depth = self.params.max_depth;
        let invert = |d: f32| if d > thr { max_depth - d } else { d };

        let inverted = sparse.map(invert);
        let depth = stage("diamond dilation", || {
            Ok(dilation_ctx(&inverted, &self.diamond5, &self.morph, runner)?)
        })?;
        let depth = stage("hole closing", || {
            Ok(closing_ctx(&depth, &self.full5, &self.morph, runner)?)
        })?;
        let mut depth = stage("small hole fill", || self.fill_empty(&depth, &self.full7, runner))?;

        if self.params.extrapolate {
            extend_column_tops(&mut depth, thr)?;
            depth = stage("large hole fill", || self.fill_empty(&depth, &self.full31, runner))?;
        }

        let depth = stage("median", || {
            Ok(median_blur_ctx(&depth, self.params.median_kernel, runner)?)
        })?;

        let depth = stage("blur", || match &self.params.blur {
            BlurKind::Bilateral {
                kernel_size,
                sigma_spatial,
                sigma_color,
            } => {
                let params = BilateralParams {
                    kernel_size: *kernel_size,
                    sigma_spatial: *sigma_spatial,
                    sigma_color: *sigma_color,
                    ..BilateralParams::default()
                };
                let blurred = bilateral_filter_ctx(&depth, &params, runner)?;
                write_back_valid(&depth, &blurred, thr)
            }
            BlurKind::Gaussian { kernel_size } => {
                let blurred =
                    gaussian_blur_ctx(&depth, *kernel_size, 0.0, BorderMode::Reflect101, runner)?;
                write_back_valid(&depth, &blurred, thr)
            }
            BlurKind::None => Ok(depth.clone()),
        })?;

        Ok(depth.map(invert).clamp_min(0.0))
    }
}

/// Single grey-scale dilation with a full square kernel.
pub struct DilationFill {
    morph: MorphParams,
    kernel: StructuringElement,
}

impl DilationFill {
    pub fn new(params: FillParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            morph: params.morph_params()?,
            kernel: StructuringElement::ones(params.dilation_kernel, params.dilation_kernel)?,
        })
    }
}

impl DepthSynthesizer for DilationFill {
    fn name(&self) -> &'static str {
        "dilation"
    }

    fn synthesize(&self, sparse: &Tensor<f32>, runner: &RuntimeRunner) -> Result<Tensor<f32>> {
        require_depth_grid(sparse, "sparse depth")?;
        let dilated = dilation_ctx(sparse, &self.kernel, &self.morph, runner)?;
        Ok(dilated.clamp_min(0.0))
    }
}

/// Row-wise linear interpolation followed by a median blur.
pub struct InterpolationFill {
    params: FillParams,
}

impl InterpolationFill {
    pub fn new(params: FillParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }
}

impl DepthSynthesizer for InterpolationFill {
    fn name(&self) -> &'static str {
        "interpolation"
    }

    fn synthesize(&self, sparse: &Tensor<f32>, runner: &RuntimeRunner) -> Result<Tensor<f32>> {
        require_depth_grid(sparse, "sparse depth")?;
        let filled = interpolate_depth_map_ctx(sparse, self.params.valid_threshold, runner)?;
        let smoothed = median_blur_ctx(&filled, self.params.median_kernel, runner)?;
        Ok(smoothed.clamp_min(0.0))
    }
}
