//! Border handling and explicit padding of NCHW tensors.

use crate::{require_nchw, ImgprocError, Result};
use lidar_core::{Tensor, TensorShape};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BorderMode {
    Constant(f32),
    Replicate,
    /// Mirror including the edge sample: `cba|abcd|dcb`.
    Reflect,
    /// Mirror excluding the edge sample: `dcb|abcd|cba`.
    Reflect101,
    Wrap,
}

/// Asymmetric padding amounts, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Padding {
    pub left: usize,
    pub right: usize,
    pub top: usize,
    pub bottom: usize,
}

impl Padding {
    pub fn uniform(pad: usize) -> Self {
        Self {
            left: pad,
            right: pad,
            top: pad,
            bottom: pad,
        }
    }

    pub fn padded_dims(&self, height: usize, width: usize) -> (usize, usize) {
        (
            height + self.top + self.bottom,
            width + self.left + self.right,
        )
    }
}

/// Maps an out-of-range coordinate back into `[0, len)`.
///
/// Returns `None` for constant borders, where the sample comes from the border value.
pub fn map_coord(coord: isize, len: usize, mode: BorderMode) -> Option<usize> {
    let n = len as isize;
    if n <= 0 {
        return None;
    }
    if (0..n).contains(&coord) {
        return Some(coord as usize);
    }

    match mode {
        BorderMode::Constant(_) => None,
        BorderMode::Replicate => Some(coord.clamp(0, n - 1) as usize),
        BorderMode::Wrap => Some(coord.rem_euclid(n) as usize),
        BorderMode::Reflect => {
            if n == 1 {
                return Some(0);
            }
            let period = 2 * n;
            let mut c = coord.rem_euclid(period);
            if c >= n {
                c = period - c - 1;
            }
            Some(c as usize)
        }
        BorderMode::Reflect101 => {
            if n == 1 {
                return Some(0);
            }
            let period = 2 * n - 2;
            let mut c = coord.rem_euclid(period);
            if c >= n {
                c = period - c;
            }
            Some(c as usize)
        }
    }
}

/// Checks that `padding` can be produced by `mode` for a `height x width` plane.
///
/// Mirror modes can only reach as far as the plane itself: `Reflect101` needs
/// `pad < dim`, `Reflect` and `Wrap` need `pad <= dim`.
pub fn validate_padding(
    height: usize,
    width: usize,
    padding: Padding,
    mode: BorderMode,
) -> Result<()> {
    let checks = [
        ("left", padding.left, width),
        ("right", padding.right, width),
        ("top", padding.top, height),
        ("bottom", padding.bottom, height),
    ];
    for (side, pad, dim) in checks {
        let ok = match mode {
            BorderMode::Constant(_) | BorderMode::Replicate => dim > 0 || pad == 0,
            BorderMode::Reflect101 => pad < dim,
            BorderMode::Reflect | BorderMode::Wrap => pad <= dim && dim > 0,
        };
        if !ok {
            return Err(ImgprocError::InvalidPadding(format!(
                "{} padding of {} is not possible with {:?} on a dimension of {}",
                side, pad, mode, dim
            )));
        }
    }
    Ok(())
}

/// Pads a single contiguous `height x width` plane.
pub fn pad_plane(
    src: &[f32],
    height: usize,
    width: usize,
    padding: Padding,
    mode: BorderMode,
) -> Vec<f32> {
    let (ph, pw) = padding.padded_dims(height, width);
    let fill = match mode {
        BorderMode::Constant(v) => v,
        _ => 0.0,
    };
    let mut out = vec![fill; ph * pw];

    let cols: Vec<Option<usize>> = (0..pw)
        .map(|px| map_coord(px as isize - padding.left as isize, width, mode))
        .collect();

    for py in 0..ph {
        let Some(sy) = map_coord(py as isize - padding.top as isize, height, mode) else {
            continue;
        };
        let src_row = &src[sy * width..(sy + 1) * width];
        let out_row = &mut out[py * pw..(py + 1) * pw];
        for (o, col) in out_row.iter_mut().zip(&cols) {
            if let Some(sx) = *col {
                *o = src_row[sx];
            }
        }
    }

    out
}

/// Pads every (H, W) plane of a rank-4 tensor.
pub fn pad(tensor: &Tensor<f32>, padding: Padding, mode: BorderMode) -> Result<Tensor<f32>> {
    let (b, c, h, w) = require_nchw(tensor)?;
    validate_padding(h, w, padding, mode)?;

    let (ph, pw) = padding.padded_dims(h, w);
    let mut data = Vec::with_capacity(b * c * ph * pw);
    for plane in tensor.as_slice()?.chunks_exact(h * w) {
        data.extend(pad_plane(plane, h, w, padding, mode));
    }
    Ok(Tensor::from_vec(data, TensorShape::nchw(b, c, ph, pw))?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reflect_variants_differ_at_edge() {
        assert_eq!(map_coord(-1, 4, BorderMode::Reflect), Some(0));
        assert_eq!(map_coord(-1, 4, BorderMode::Reflect101), Some(1));
        assert_eq!(map_coord(4, 4, BorderMode::Reflect), Some(3));
        assert_eq!(map_coord(4, 4, BorderMode::Reflect101), Some(2));
        assert_eq!(map_coord(-1, 4, BorderMode::Constant(0.0)), None);
        assert_eq!(map_coord(5, 4, BorderMode::Wrap), Some(1));
    }

    #[test]
    fn pad_plane_reflect101_matches_torch() {
        let src = [1.0, 2.0, 3.0];
        let out = pad_plane(&src, 1, 3, Padding { left: 2, right: 2, top: 0, bottom: 0 }, BorderMode::Reflect101);
        assert_eq!(out, vec![3.0, 2.0, 1.0, 2.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn reflect101_rejects_pad_equal_to_dim() {
        let err = validate_padding(2, 8, Padding::uniform(2), BorderMode::Reflect101);
        assert!(matches!(err, Err(ImgprocError::InvalidPadding(_))));
        assert!(validate_padding(3, 8, Padding::uniform(2), BorderMode::Reflect101).is_ok());
    }

    #[test]
    fn constant_pad_fills_border() {
        let t = Tensor::<f32>::full(TensorShape::nchw(1, 1, 2, 2), 1.0).unwrap();
        let p = pad(&t, Padding { left: 1, right: 0, top: 0, bottom: 1 }, BorderMode::Constant(-5.0)).unwrap();
        assert_eq!(p.dims(), &[1, 1, 3, 3]);
        assert_eq!(
            p.as_slice().unwrap(),
            &[-5.0, 1.0, 1.0, -5.0, 1.0, 1.0, -5.0, -5.0, -5.0]
        );
    }
}
