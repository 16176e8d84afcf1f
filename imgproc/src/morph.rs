//! Grey-scale dilation and erosion over batched NCHW tensors.
//!
//! A structuring element is a 2-D membership mask with an origin. Cells outside
//! the mask receive a `-max_val` bias so they can never win the reduction; a
//! non-flat element replaces the zero bias of its member cells with its values.

use crate::border::{map_coord, pad_plane, validate_padding, BorderMode, Padding};
use crate::grad::Traced;
use crate::{require_nchw, ImgprocError, Result};
use lidar_core::Tensor;
use lidar_runtime::RuntimeRunner;
use rayon::prelude::*;
use std::fmt;
use std::str::FromStr;

/// Stand-in for infinity in biases and geodesic borders.
pub const DEFAULT_MAX_VAL: f32 = 1e4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MorphShape {
    Rectangle,
    Ellipse,
    Cross,
    Diamond,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MorphOp {
    Dilate,
    Erode,
}

impl MorphOp {
    fn identity(self) -> f32 {
        match self {
            MorphOp::Dilate => f32::NEG_INFINITY,
            MorphOp::Erode => f32::INFINITY,
        }
    }

    fn combine(self, value: f32, bias: f32) -> f32 {
        match self {
            MorphOp::Dilate => value + bias,
            MorphOp::Erode => value - bias,
        }
    }

    fn better(self, candidate: f32, best: f32) -> bool {
        match self {
            MorphOp::Dilate => candidate > best,
            MorphOp::Erode => candidate < best,
        }
    }
}

/// Border policy for morphology.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum MorphBorder {
    /// Border cells are padded with `∓max_val` so they never win the reduction.
    #[default]
    Geodesic,
    Constant(f32),
    /// Mirror without repeating the edge sample (torch "reflect").
    Reflect,
    Replicate,
}

impl MorphBorder {
    pub fn resolve(self, op: MorphOp, max_val: f32) -> BorderMode {
        match self {
            MorphBorder::Geodesic => match op {
                MorphOp::Dilate => BorderMode::Constant(-max_val),
                MorphOp::Erode => BorderMode::Constant(max_val),
            },
            MorphBorder::Constant(v) => BorderMode::Constant(v),
            MorphBorder::Reflect => BorderMode::Reflect101,
            MorphBorder::Replicate => BorderMode::Replicate,
        }
    }
}

/// Evaluation strategy for the windowed reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MorphEngine {
    /// Per-pixel sliding window gather.
    #[default]
    Unfold,
    /// One shifted plane per structuring-element cell, reduced plane by plane.
    Convolution,
}

impl FromStr for MorphEngine {
    type Err = ImgprocError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "unfold" => Ok(MorphEngine::Unfold),
            "convolution" => Ok(MorphEngine::Convolution),
            other => Err(ImgprocError::UnsupportedEngine(other.to_string())),
        }
    }
}

impl fmt::Display for MorphEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MorphEngine::Unfold => write!(f, "unfold"),
            MorphEngine::Convolution => write!(f, "convolution"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MorphParams {
    pub border: MorphBorder,
    pub max_val: f32,
    pub engine: MorphEngine,
}

impl Default for MorphParams {
    fn default() -> Self {
        Self {
            border: MorphBorder::Geodesic,
            max_val: DEFAULT_MAX_VAL,
            engine: MorphEngine::Unfold,
        }
    }
}

impl MorphParams {
    pub fn with_border(mut self, border: MorphBorder) -> Self {
        self.border = border;
        self
    }

    pub fn with_engine(mut self, engine: MorphEngine) -> Self {
        self.engine = engine;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructuringElement {
    mask: Vec<f32>,
    height: usize,
    width: usize,
    values: Option<Vec<f32>>,
    origin: Option<(usize, usize)>,
}

impl StructuringElement {
    /// Flat element from a row-major membership mask (non-zero = member).
    pub fn new(mask: Vec<f32>, height: usize, width: usize) -> Result<Self> {
        if height == 0 || width == 0 || mask.len() != height * width {
            return Err(ImgprocError::InvalidKernelSize(format!(
                "mask of length {} does not describe a {}x{} structuring element",
                mask.len(),
                height,
                width
            )));
        }
        Ok(Self {
            mask,
            height,
            width,
            values: None,
            origin: None,
        })
    }

    /// Builds an element from a rank-2 `(kh, kw)` tensor.
    pub fn from_tensor(kernel: &Tensor<f32>) -> Result<Self> {
        match *kernel.dims() {
            [h, w] => Self::new(kernel.as_slice()?.to_vec(), h, w),
            _ => Err(ImgprocError::InvalidShape(format!(
                "kernel must have 2 dimensions, got {} {}",
                kernel.rank(),
                kernel.shape
            ))),
        }
    }

    pub fn ones(height: usize, width: usize) -> Result<Self> {
        Self::new(vec![1.0; height * width], height, width)
    }

    pub fn from_shape(shape: MorphShape, width: usize, height: usize) -> Result<Self> {
        let cx = (width / 2) as isize;
        let cy = (height / 2) as isize;
        let rx = width as f32 / 2.0;
        let ry = height as f32 / 2.0;
        let radius = cx.min(cy);

        let mut mask = Vec::with_capacity(width * height);
        for y in 0..height as isize {
            for x in 0..width as isize {
                let (dx, dy) = (x - cx, y - cy);
                let member = match shape {
                    MorphShape::Rectangle => true,
                    MorphShape::Ellipse => {
                        let (fx, fy) = (dx as f32, dy as f32);
                        (fx * fx) / (rx * rx) + (fy * fy) / (ry * ry) <= 1.0
                    }
                    MorphShape::Cross => dx == 0 || dy == 0,
                    MorphShape::Diamond => dx.abs() + dy.abs() <= radius,
                };
                mask.push(if member { 1.0 } else { 0.0 });
            }
        }
        Self::new(mask, height, width)
    }

    /// Overrides the origin as `(row, col)`.
    pub fn with_origin(mut self, row: usize, col: usize) -> Self {
        self.origin = Some((row, col));
        self
    }

    /// Turns the element non-flat: member cells contribute `values` as bias.
    pub fn with_values(mut self, values: Vec<f32>) -> Result<Self> {
        if values.len() != self.mask.len() {
            return Err(ImgprocError::InvalidKernelSize(format!(
                "structuring element values of length {} for a {}x{} mask",
                values.len(),
                self.height,
                self.width
            )));
        }
        self.values = Some(values);
        Ok(self)
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn mask(&self) -> &[f32] {
        &self.mask
    }

    /// `(row, col)` origin, defaulting to the floor-rounded centre.
    pub fn origin(&self) -> Result<(usize, usize)> {
        let (oy, ox) = self.origin.unwrap_or((self.height / 2, self.width / 2));
        if oy >= self.height || ox >= self.width {
            return Err(ImgprocError::InvalidKernelSize(format!(
                "origin ({}, {}) lies outside the {}x{} structuring element",
                oy, ox, self.height, self.width
            )));
        }
        Ok((oy, ox))
    }

    pub fn padding(&self) -> Result<Padding> {
        let (oy, ox) = self.origin()?;
        Ok(Padding {
            left: ox,
            right: self.width - ox - 1,
            top: oy,
            bottom: self.height - oy - 1,
        })
    }

    /// Additive bias per cell: member cells get 0 (or their value), others `-max_val`.
    pub fn neighborhood(&self, max_val: f32) -> Vec<f32> {
        self.mask
            .iter()
            .enumerate()
            .map(|(i, &m)| {
                if m == 0.0 {
                    -max_val
                } else {
                    self.values.as_ref().map_or(0.0, |v| v[i])
                }
            })
            .collect()
    }

    /// Dilation works with the reflected element.
    fn bias(&self, op: MorphOp, max_val: f32) -> Vec<f32> {
        let nb = self.neighborhood(max_val);
        match op {
            MorphOp::Dilate => nb.into_iter().rev().collect(),
            MorphOp::Erode => nb,
        }
    }
}

/// Everything resolved before touching pixel data.
struct MorphPlan {
    op: MorphOp,
    height: usize,
    width: usize,
    kh: usize,
    kw: usize,
    padding: Padding,
    border: BorderMode,
    bias: Vec<f32>,
}

impl MorphPlan {
    fn new(
        tensor: &Tensor<f32>,
        se: &StructuringElement,
        params: &MorphParams,
        op: MorphOp,
    ) -> Result<Self> {
        let (_, _, height, width) = require_nchw(tensor)?;
        let padding = se.padding()?;
        let border = params.border.resolve(op, params.max_val);
        validate_padding(height, width, padding, border)?;

        #[cfg(feature = "tracing")]
        tracing::trace!(
            "{:?} {} with {}x{} element, {:?}, engine {}",
            op,
            tensor.shape,
            se.height,
            se.width,
            border,
            params.engine
        );

        Ok(Self {
            op,
            height,
            width,
            kh: se.height,
            kw: se.width,
            padding,
            border,
            bias: se.bias(op, params.max_val),
        })
    }

    fn padded_width(&self) -> usize {
        self.width + self.padding.left + self.padding.right
    }

    /// Sliding-window reduction. Also returns the winning padded index per output.
    fn unfold(&self, padded: &[f32]) -> (Vec<f32>, Vec<usize>) {
        let (w, pw) = (self.width, self.padded_width());
        let mut out = vec![0.0f32; self.height * w];
        let mut arg = vec![0usize; self.height * w];

        out.par_chunks_mut(w)
            .zip(arg.par_chunks_mut(w))
            .enumerate()
            .for_each(|(y, (row, arg_row))| {
                for x in 0..w {
                    let mut best = self.op.identity();
                    let mut best_idx = (y + self.padding.top) * pw + x + self.padding.left;
                    for i in 0..self.kh {
                        let base = (y + i) * pw + x;
                        let bias_row = &self.bias[i * self.kw..(i + 1) * self.kw];
                        for (j, &b) in bias_row.iter().enumerate() {
                            let candidate = self.op.combine(padded[base + j], b);
                            if self.op.better(candidate, best) {
                                best = candidate;
                                best_idx = base + j;
                            }
                        }
                    }
                    row[x] = best;
                    arg_row[x] = best_idx;
                }
            });

        (out, arg)
    }

    /// Channels-as-neighbours reduction: each element cell contributes one
    /// shifted copy of the padded plane plus its bias.
    fn neighbor_stack(&self, padded: &[f32]) -> Vec<f32> {
        let (w, pw) = (self.width, self.padded_width());
        let mut out = vec![self.op.identity(); self.height * w];

        for (n, &b) in self.bias.iter().enumerate() {
            let (i, j) = (n / self.kw, n % self.kw);
            out.par_chunks_mut(w).enumerate().for_each(|(y, row)| {
                let start = (y + i) * pw + j;
                for (o, &v) in row.iter_mut().zip(&padded[start..start + w]) {
                    let candidate = self.op.combine(v, b);
                    if self.op.better(candidate, *o) {
                        *o = candidate;
                    }
                }
            });
        }

        out
    }

    /// Input index (within one plane) that a padded index was copied from.
    fn source_of(&self, padded_index: usize) -> Option<usize> {
        let pw = self.padded_width();
        let (py, px) = (padded_index / pw, padded_index % pw);
        let sy = map_coord(py as isize - self.padding.top as isize, self.height, self.border)?;
        let sx = map_coord(px as isize - self.padding.left as isize, self.width, self.border)?;
        Some(sy * self.width + sx)
    }
}

pub fn morph_ctx(
    tensor: &Tensor<f32>,
    se: &StructuringElement,
    params: &MorphParams,
    op: MorphOp,
    group: &RuntimeRunner,
) -> Result<Tensor<f32>> {
    let plan = MorphPlan::new(tensor, se, params, op)?;
    let plane_len = plan.height * plan.width;

    group.run(|| {
        let mut data = Vec::with_capacity(tensor.len());
        for plane in tensor.as_slice()?.chunks_exact(plane_len) {
            let padded = pad_plane(plane, plan.height, plan.width, plan.padding, plan.border);
            match params.engine {
                MorphEngine::Unfold => data.extend(plan.unfold(&padded).0),
                MorphEngine::Convolution => data.extend(plan.neighbor_stack(&padded)),
            }
        }
        Ok(Tensor::from_vec(data, tensor.shape.clone())?)
    })
}

/// Like [`morph_ctx`] but records which input sample each output came from.
/// Always evaluated with the unfold engine.
pub fn morph_traced_ctx(
    tensor: &Tensor<f32>,
    se: &StructuringElement,
    params: &MorphParams,
    op: MorphOp,
    group: &RuntimeRunner,
) -> Result<Traced> {
    let plan = MorphPlan::new(tensor, se, params, op)?;
    let plane_len = plan.height * plan.width;

    group.run(|| {
        let mut data = Vec::with_capacity(tensor.len());
        let mut source = Vec::with_capacity(tensor.len());
        for (p, plane) in tensor.as_slice()?.chunks_exact(plane_len).enumerate() {
            let padded = pad_plane(plane, plan.height, plan.width, plan.padding, plan.border);
            let (out, arg) = plan.unfold(&padded);
            let base = p * plane_len;
            source.extend(arg.into_iter().map(|a| plan.source_of(a).map(|s| base + s)));
            data.extend(out);
        }
        let output = Tensor::from_vec(data, tensor.shape.clone())?;
        Ok(Traced::new(output, source, tensor.shape.clone()))
    })
}

pub fn dilation_ctx(
    tensor: &Tensor<f32>,
    se: &StructuringElement,
    params: &MorphParams,
    group: &RuntimeRunner,
) -> Result<Tensor<f32>> {
    morph_ctx(tensor, se, params, MorphOp::Dilate, group)
}

pub fn erosion_ctx(
    tensor: &Tensor<f32>,
    se: &StructuringElement,
    params: &MorphParams,
    group: &RuntimeRunner,
) -> Result<Tensor<f32>> {
    morph_ctx(tensor, se, params, MorphOp::Erode, group)
}

pub fn dilation(
    tensor: &Tensor<f32>,
    se: &StructuringElement,
    params: &MorphParams,
) -> Result<Tensor<f32>> {
    dilation_ctx(tensor, se, params, &lidar_runtime::default_runner())
}

pub fn erosion(
    tensor: &Tensor<f32>,
    se: &StructuringElement,
    params: &MorphParams,
) -> Result<Tensor<f32>> {
    erosion_ctx(tensor, se, params, &lidar_runtime::default_runner())
}

pub fn dilation_traced_ctx(
    tensor: &Tensor<f32>,
    se: &StructuringElement,
    params: &MorphParams,
    group: &RuntimeRunner,
) -> Result<Traced> {
    morph_traced_ctx(tensor, se, params, MorphOp::Dilate, group)
}

pub fn erosion_traced_ctx(
    tensor: &Tensor<f32>,
    se: &StructuringElement,
    params: &MorphParams,
    group: &RuntimeRunner,
) -> Result<Traced> {
    morph_traced_ctx(tensor, se, params, MorphOp::Erode, group)
}

/// Erosion followed by dilation.
pub fn opening_ctx(
    tensor: &Tensor<f32>,
    se: &StructuringElement,
    params: &MorphParams,
    group: &RuntimeRunner,
) -> Result<Tensor<f32>> {
    let eroded = erosion_ctx(tensor, se, params, group)?;
    dilation_ctx(&eroded, se, params, group)
}

/// Dilation followed by erosion; fills gaps narrower than the element.
pub fn closing_ctx(
    tensor: &Tensor<f32>,
    se: &StructuringElement,
    params: &MorphParams,
    group: &RuntimeRunner,
) -> Result<Tensor<f32>> {
    let dilated = dilation_ctx(tensor, se, params, group)?;
    erosion_ctx(&dilated, se, params, group)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lidar_core::TensorShape;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn random_grid(seed: u64, b: usize, c: usize, h: usize, w: usize) -> Tensor<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..b * c * h * w).map(|_| rng.gen_range(0.0..80.0)).collect();
        Tensor::from_vec(data, TensorShape::nchw(b, c, h, w)).unwrap()
    }

    fn identity_element(size: usize) -> StructuringElement {
        let mut mask = vec![0.0; size * size];
        mask[(size / 2) * size + size / 2] = 1.0;
        StructuringElement::new(mask, size, size).unwrap()
    }

    #[test]
    fn identity_element_is_a_noop() {
        let t = random_grid(1, 2, 3, 6, 7);
        let se = identity_element(3);
        let runner = RuntimeRunner::default();
        for engine in [MorphEngine::Unfold, MorphEngine::Convolution] {
            let params = MorphParams::default().with_engine(engine);
            let d = dilation_ctx(&t, &se, &params, &runner).unwrap();
            let e = erosion_ctx(&t, &se, &params, &runner).unwrap();
            assert_eq!(d.as_slice().unwrap(), t.as_slice().unwrap());
            assert_eq!(e.as_slice().unwrap(), t.as_slice().unwrap());
        }
    }

    #[test]
    fn shape_is_preserved_for_offcentre_origins() {
        let t = random_grid(2, 1, 2, 9, 11);
        let runner = RuntimeRunner::default();
        for (kh, kw) in [(1, 1), (2, 4), (3, 3), (5, 2)] {
            for oy in 0..kh {
                for ox in 0..kw {
                    let se = StructuringElement::ones(kh, kw).unwrap().with_origin(oy, ox);
                    let out = dilation_ctx(&t, &se, &MorphParams::default(), &runner).unwrap();
                    assert_eq!(out.dims(), t.dims());
                    let out = erosion_ctx(&t, &se, &MorphParams::default(), &runner).unwrap();
                    assert_eq!(out.dims(), t.dims());
                }
            }
        }
    }

    #[test]
    fn erosion_engines_agree() {
        let t = random_grid(3, 2, 1, 12, 10);
        let se = StructuringElement::from_shape(MorphShape::Diamond, 5, 5).unwrap();
        let runner = RuntimeRunner::default();
        let unfold = erosion_ctx(&t, &se, &MorphParams::default(), &runner).unwrap();
        let conv = erosion_ctx(
            &t,
            &se,
            &MorphParams::default().with_engine(MorphEngine::Convolution),
            &runner,
        )
        .unwrap();
        assert!(unfold.max_abs_diff(&conv).unwrap() < 1e-4);
    }

    #[test]
    fn dilation_engines_agree_on_non_flat_element() {
        let t = random_grid(4, 1, 1, 8, 8);
        let values: Vec<f32> = (0..9).map(|v| v as f32 * 0.5).collect();
        let se = StructuringElement::ones(3, 3).unwrap().with_values(values).unwrap();
        let runner = RuntimeRunner::default();
        let a = dilation_ctx(&t, &se, &MorphParams::default(), &runner).unwrap();
        let b = dilation_ctx(
            &t,
            &se,
            &MorphParams::default().with_engine(MorphEngine::Convolution),
            &runner,
        )
        .unwrap();
        assert!(a.max_abs_diff(&b).unwrap() < 1e-4);
    }

    #[test]
    fn single_pixel_dilates_to_neighbourhood() {
        let mut t = Tensor::<f32>::zeros(TensorShape::nchw(1, 1, 5, 5)).unwrap();
        *t.get_mut(&[0, 0, 2, 2]).unwrap() = 7.0;
        let se = StructuringElement::ones(3, 3).unwrap();
        let out = dilation(&t, &se, &MorphParams::default()).unwrap();
        for y in 0..5 {
            for x in 0..5 {
                let expected = if (1..=3).contains(&y) && (1..=3).contains(&x) { 7.0 } else { 0.0 };
                assert_eq!(out.get(&[0, 0, y, x]).unwrap(), expected, "at ({y}, {x})");
            }
        }
    }

    #[test]
    fn geodesic_border_never_wins() {
        let t = random_grid(5, 1, 1, 7, 9);
        let se = StructuringElement::ones(3, 3).unwrap();
        let runner = RuntimeRunner::default();
        let geodesic = dilation_ctx(&t, &se, &MorphParams::default(), &runner).unwrap();
        let reflect = dilation_ctx(
            &t,
            &se,
            &MorphParams::default().with_border(MorphBorder::Reflect),
            &runner,
        )
        .unwrap();
        let loud = dilation_ctx(
            &t,
            &se,
            &MorphParams::default().with_border(MorphBorder::Constant(1e3)),
            &runner,
        )
        .unwrap();

        // a 3x3 reflected border only repeats samples already inside the window
        assert_eq!(geodesic.as_slice().unwrap(), reflect.as_slice().unwrap());
        assert_eq!(loud.get(&[0, 0, 0, 0]).unwrap(), 1e3);
        for y in 1..6 {
            for x in 1..8 {
                assert_eq!(
                    loud.get(&[0, 0, y, x]).unwrap(),
                    geodesic.get(&[0, 0, y, x]).unwrap()
                );
            }
        }
    }

    #[test]
    fn rank_violations_fail_before_compute() {
        let t = Tensor::<f32>::zeros(TensorShape::new(vec![1, 4, 4])).unwrap();
        let se = StructuringElement::ones(3, 3).unwrap();
        assert!(matches!(
            dilation(&t, &se, &MorphParams::default()),
            Err(ImgprocError::InvalidShape(_))
        ));

        let k = Tensor::<f32>::ones(TensorShape::new(vec![1, 3, 3])).unwrap();
        assert!(matches!(
            StructuringElement::from_tensor(&k),
            Err(ImgprocError::InvalidShape(_))
        ));
    }

    #[test]
    fn reflect_border_requires_room() {
        let t = Tensor::<f32>::zeros(TensorShape::nchw(1, 1, 2, 2)).unwrap();
        let se = StructuringElement::ones(5, 5).unwrap();
        let params = MorphParams::default().with_border(MorphBorder::Reflect);
        assert!(matches!(
            erosion(&t, &se, &params),
            Err(ImgprocError::InvalidPadding(_))
        ));
    }

    #[test]
    fn origin_outside_element_is_rejected() {
        let t = Tensor::<f32>::zeros(TensorShape::nchw(1, 1, 4, 4)).unwrap();
        let se = StructuringElement::ones(3, 3).unwrap().with_origin(3, 0);
        assert!(matches!(
            dilation(&t, &se, &MorphParams::default()),
            Err(ImgprocError::InvalidKernelSize(_))
        ));
    }

    #[test]
    fn engine_names_parse() {
        assert_eq!("unfold".parse::<MorphEngine>().unwrap(), MorphEngine::Unfold);
        assert_eq!(
            "convolution".parse::<MorphEngine>().unwrap(),
            MorphEngine::Convolution
        );
        assert!(matches!(
            "fft".parse::<MorphEngine>(),
            Err(ImgprocError::UnsupportedEngine(_))
        ));
    }

    #[test]
    fn diamond_matches_classic_layout() {
        let se = StructuringElement::from_shape(MorphShape::Diamond, 5, 5).unwrap();
        #[rustfmt::skip]
        let expected = [
            0.0, 0.0, 1.0, 0.0, 0.0,
            0.0, 1.0, 1.0, 1.0, 0.0,
            1.0, 1.0, 1.0, 1.0, 1.0,
            0.0, 1.0, 1.0, 1.0, 0.0,
            0.0, 0.0, 1.0, 0.0, 0.0,
        ];
        assert_eq!(se.mask(), &expected);
    }

    #[test]
    fn traced_dilation_routes_gradient_to_maximum() {
        let mut t = Tensor::<f32>::zeros(TensorShape::nchw(1, 1, 3, 3)).unwrap();
        *t.get_mut(&[0, 0, 1, 1]).unwrap() = 5.0;
        let se = StructuringElement::ones(3, 3).unwrap();
        let traced =
            dilation_traced_ctx(&t, &se, &MorphParams::default(), &RuntimeRunner::default())
                .unwrap();
        assert!(traced.output.as_slice().unwrap().iter().all(|&v| v == 5.0));

        let ones = Tensor::<f32>::ones(TensorShape::nchw(1, 1, 3, 3)).unwrap();
        let grad = traced.backward(&ones).unwrap();
        assert_eq!(grad.get(&[0, 0, 1, 1]).unwrap(), 9.0);
        assert_eq!(grad.as_slice().unwrap().iter().sum::<f32>(), 9.0);
    }

    #[test]
    fn traced_erosion_routes_gradient_to_minimum() {
        let mut t = Tensor::<f32>::zeros(TensorShape::nchw(1, 1, 3, 3)).unwrap();
        *t.get_mut(&[0, 0, 1, 1]).unwrap() = -5.0;
        let se = StructuringElement::ones(3, 3).unwrap();
        let traced =
            erosion_traced_ctx(&t, &se, &MorphParams::default(), &RuntimeRunner::default())
                .unwrap();
        assert!(traced.output.as_slice().unwrap().iter().all(|&v| v == -5.0));

        let plain = erosion(&t, &se, &MorphParams::default()).unwrap();
        assert_eq!(traced.output.as_slice().unwrap(), plain.as_slice().unwrap());

        let ones = Tensor::<f32>::ones(TensorShape::nchw(1, 1, 3, 3)).unwrap();
        let grad = traced.backward(&ones).unwrap();
        assert_eq!(grad.get(&[0, 0, 1, 1]).unwrap(), 9.0);
        assert_eq!(grad.as_slice().unwrap().iter().sum::<f32>(), 9.0);
    }

    #[test]
    fn opening_removes_spikes_and_never_grows() {
        let mut t = Tensor::<f32>::full(TensorShape::nchw(1, 1, 7, 7), 1.0).unwrap();
        *t.get_mut(&[0, 0, 3, 3]).unwrap() = 9.0;
        let se = StructuringElement::ones(3, 3).unwrap();
        let runner = RuntimeRunner::default();
        let opened = opening_ctx(&t, &se, &MorphParams::default(), &runner).unwrap();
        assert!(opened.as_slice().unwrap().iter().all(|&v| v == 1.0));

        let grid = random_grid(17, 1, 2, 9, 10);
        let opened = opening_ctx(&grid, &se, &MorphParams::default(), &runner).unwrap();
        for (o, g) in opened.as_slice().unwrap().iter().zip(grid.as_slice().unwrap()) {
            assert!(o <= g);
        }
    }
}
