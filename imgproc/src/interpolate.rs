//! Row-wise linear interpolation between valid depth samples.

use crate::{require_nchw, Result};
use lidar_core::Tensor;
use lidar_runtime::RuntimeRunner;
use rayon::prelude::*;

/// Fills every cell at or below `valid_threshold` by linear interpolation between
/// the nearest valid samples on the same row.
///
/// Cells before the first or after the last valid sample copy that sample.
/// Rows without a single valid sample are left as they are.
pub fn interpolate_depth_map_ctx(
    tensor: &Tensor<f32>,
    valid_threshold: f32,
    group: &RuntimeRunner,
) -> Result<Tensor<f32>> {
    let (_, _, _, w) = require_nchw(tensor)?;
    let mut out = tensor.clone();
    let rows = out.as_mut_slice()?;
    group.run(|| {
        rows.par_chunks_mut(w)
            .for_each(|row| fill_row(row, valid_threshold))
    });
    Ok(out)
}

pub fn interpolate_depth_map(tensor: &Tensor<f32>, valid_threshold: f32) -> Result<Tensor<f32>> {
    interpolate_depth_map_ctx(tensor, valid_threshold, &lidar_runtime::default_runner())
}

fn fill_row(row: &mut [f32], valid_threshold: f32) {
    let anchors: Vec<usize> = row
        .iter()
        .enumerate()
        .filter(|(_, &v)| v > valid_threshold)
        .map(|(i, _)| i)
        .collect();
    let (Some(&first), Some(&last)) = (anchors.first(), anchors.last()) else {
        return;
    };

    let (lead, tail) = (row[first], row[last]);
    row[..first].fill(lead);
    row[last + 1..].fill(tail);

    for pair in anchors.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b - a < 2 {
            continue;
        }
        let (va, vb) = (row[a], row[b]);
        let span = (b - a) as f32;
        for x in a + 1..b {
            let t = (x - a) as f32 / span;
            row[x] = va + t * (vb - va);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lidar_core::TensorShape;

    #[test]
    fn fills_gaps_linearly() {
        let row = vec![0.0, 2.0, 0.0, 0.0, 8.0, 0.0];
        let t = Tensor::from_vec(row, TensorShape::nchw(1, 1, 1, 6)).unwrap();
        let out = interpolate_depth_map(&t, 0.1).unwrap();
        assert_eq!(out.as_slice().unwrap(), &[2.0, 2.0, 4.0, 6.0, 8.0, 8.0]);
    }

    #[test]
    fn empty_rows_are_untouched() {
        let data = vec![0.0, 0.0, 0.0, 5.0, 0.0, 0.0];
        let t = Tensor::from_vec(data, TensorShape::nchw(1, 1, 2, 3)).unwrap();
        let out = interpolate_depth_map(&t, 0.1).unwrap();
        assert_eq!(out.as_slice().unwrap(), &[0.0, 0.0, 0.0, 5.0, 5.0, 5.0]);
    }

    #[test]
    fn group_runner_matches_default() {
        let data = vec![0.0, 3.0, 0.0, 0.0, 9.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 4.0];
        let t = Tensor::from_vec(data, TensorShape::nchw(1, 1, 2, 6)).unwrap();
        let group = lidar_runtime::ResourceGroup::new("interp-test", 2, None).unwrap();
        let runner = RuntimeRunner::Group(std::sync::Arc::new(group));
        let pooled = interpolate_depth_map_ctx(&t, 0.1, &runner).unwrap();
        let plain = interpolate_depth_map(&t, 0.1).unwrap();
        assert_eq!(pooled.as_slice().unwrap(), plain.as_slice().unwrap());
    }

    #[test]
    fn dense_rows_are_unchanged() {
        let data: Vec<f32> = (1..=12).map(|v| v as f32).collect();
        let t = Tensor::from_vec(data.clone(), TensorShape::nchw(1, 1, 3, 4)).unwrap();
        let out = interpolate_depth_map(&t, 0.1).unwrap();
        assert_eq!(out.as_slice().unwrap(), data.as_slice());
    }
}
