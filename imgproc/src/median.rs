//! Windowed median blur.

use crate::border::{pad_plane, BorderMode, Padding};
use crate::convolve::require_odd;
use crate::grad::Traced;
use crate::{require_nchw, ImgprocError, Result};
use lidar_core::Tensor;
use lidar_runtime::RuntimeRunner;
use rayon::prelude::*;

struct MedianPlan {
    size: usize,
    height: usize,
    width: usize,
}

impl MedianPlan {
    fn new(tensor: &Tensor<f32>, size: usize) -> Result<Self> {
        let (_, _, height, width) = require_nchw(tensor)?;
        require_odd(size, "median")?;
        let pad = size / 2;
        if pad >= height || pad >= width {
            return Err(ImgprocError::InvalidKernelSize(format!(
                "median kernel {} needs a reflect pad of {}, which does not fit a {}x{} plane",
                size, pad, height, width
            )));
        }
        Ok(Self {
            size,
            height,
            width,
        })
    }

    fn padding(&self) -> Padding {
        Padding::uniform(self.size / 2)
    }

    /// Median and its padded-plane index for every output position.
    fn run_plane(&self, plane: &[f32]) -> (Vec<f32>, Vec<usize>) {
        let padded = pad_plane(plane, self.height, self.width, self.padding(), BorderMode::Reflect101);
        let (k, w) = (self.size, self.width);
        let pw = w + 2 * (k / 2);
        let mid = (k * k - 1) / 2;

        let mut out = vec![0.0f32; self.height * w];
        let mut arg = vec![0usize; self.height * w];
        out.par_chunks_mut(w)
            .zip(arg.par_chunks_mut(w))
            .enumerate()
            .for_each(|(y, (row, arg_row))| {
                let mut window: Vec<(f32, usize)> = Vec::with_capacity(k * k);
                for x in 0..w {
                    window.clear();
                    for i in 0..k {
                        let base = (y + i) * pw + x;
                        window.extend((base..base + k).map(|idx| (padded[idx], idx)));
                    }
                    let (_, &mut (value, idx), _) =
                        window.select_nth_unstable_by(mid, |a, b| a.0.total_cmp(&b.0));
                    row[x] = value;
                    arg_row[x] = idx;
                }
            });
        (out, arg)
    }

    fn source_of(&self, padded_index: usize) -> usize {
        let pad = self.size / 2;
        let pw = self.width + 2 * pad;
        let (py, px) = (padded_index / pw, padded_index % pw);
        let mirror = |p: usize, n: usize| {
            crate::border::map_coord(p as isize - pad as isize, n, BorderMode::Reflect101)
                .unwrap_or(0)
        };
        mirror(py, self.height) * self.width + mirror(px, self.width)
    }
}

/// Median over each `size x size` window with reflect padding.
pub fn median_blur_ctx(
    tensor: &Tensor<f32>,
    size: usize,
    group: &RuntimeRunner,
) -> Result<Tensor<f32>> {
    let plan = MedianPlan::new(tensor, size)?;
    let plane_len = plan.height * plan.width;
    group.run(|| {
        let mut data = Vec::with_capacity(tensor.len());
        for plane in tensor.as_slice()?.chunks_exact(plane_len) {
            data.extend(plan.run_plane(plane).0);
        }
        Ok(Tensor::from_vec(data, tensor.shape.clone())?)
    })
}

pub fn median_blur(tensor: &Tensor<f32>, size: usize) -> Result<Tensor<f32>> {
    median_blur_ctx(tensor, size, &lidar_runtime::default_runner())
}

pub fn median_blur_traced_ctx(
    tensor: &Tensor<f32>,
    size: usize,
    group: &RuntimeRunner,
) -> Result<Traced> {
    let plan = MedianPlan::new(tensor, size)?;
    let plane_len = plan.height * plan.width;
    group.run(|| {
        let mut data = Vec::with_capacity(tensor.len());
        let mut source = Vec::with_capacity(tensor.len());
        for (p, plane) in tensor.as_slice()?.chunks_exact(plane_len).enumerate() {
            let (out, arg) = plan.run_plane(plane);
            let base = p * plane_len;
            source.extend(arg.into_iter().map(|a| Some(base + plan.source_of(a))));
            data.extend(out);
        }
        let output = Tensor::from_vec(data, tensor.shape.clone())?;
        Ok(Traced::new(output, source, tensor.shape.clone()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lidar_core::TensorShape;

    #[test]
    fn constant_grid_is_fixed_point() {
        let t = Tensor::<f32>::full(TensorShape::nchw(2, 1, 6, 6), 3.25).unwrap();
        for k in [1, 3, 5] {
            let out = median_blur(&t, k).unwrap();
            assert_eq!(out.as_slice().unwrap(), t.as_slice().unwrap());
        }
    }

    #[test]
    fn removes_salt_noise() {
        let mut t = Tensor::<f32>::full(TensorShape::nchw(1, 1, 5, 5), 1.0).unwrap();
        *t.get_mut(&[0, 0, 2, 2]).unwrap() = 100.0;
        let out = median_blur(&t, 3).unwrap();
        assert_eq!(out.get(&[0, 0, 2, 2]).unwrap(), 1.0);
    }

    #[test]
    fn even_or_oversized_kernels_fail() {
        let t = Tensor::<f32>::zeros(TensorShape::nchw(1, 1, 4, 4)).unwrap();
        assert!(matches!(median_blur(&t, 4), Err(ImgprocError::InvalidKernelSize(_))));
        assert!(matches!(median_blur(&t, 9), Err(ImgprocError::InvalidKernelSize(_))));
    }

    #[test]
    fn traced_median_points_at_input() {
        let data: Vec<f32> = (0..16).map(|v| v as f32).collect();
        let t = Tensor::from_vec(data, TensorShape::nchw(1, 1, 4, 4)).unwrap();
        let traced = median_blur_traced_ctx(&t, 3, &RuntimeRunner::default()).unwrap();
        let input = t.as_slice().unwrap();
        for (v, src) in traced.output.as_slice().unwrap().iter().zip(&traced.source) {
            assert_eq!(input[src.unwrap()], *v);
        }
    }
}
