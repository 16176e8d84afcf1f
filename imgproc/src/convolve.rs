use crate::border::{pad_plane, validate_padding, BorderMode, Padding};
use crate::{require_nchw, ImgprocError, Result};
use lidar_core::Tensor;
use lidar_runtime::RuntimeRunner;
use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct Kernel {
    pub data: Vec<f32>,
    pub width: usize,
    pub height: usize,
}

impl Kernel {
    pub fn new(data: Vec<f32>, width: usize, height: usize) -> Result<Self> {
        if width == 0 || height == 0 || data.len() != width * height {
            return Err(ImgprocError::InvalidKernelSize(format!(
                "kernel data of length {} does not describe a {}x{} kernel",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    pub fn size(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    pub fn sum(&self) -> f32 {
        self.data.iter().sum()
    }

    pub fn normalize(&mut self) {
        let sum = self.sum();
        if sum != 0.0 {
            for v in &mut self.data {
                *v /= sum;
            }
        }
    }
}

/// Ensures `size` is a positive odd window length.
pub fn require_odd(size: usize, what: &str) -> Result<()> {
    if size == 0 || size % 2 == 0 {
        return Err(ImgprocError::InvalidKernelSize(format!(
            "{} kernel size must be odd and positive, got {}",
            what, size
        )));
    }
    Ok(())
}

/// Isotropic Gaussian over the integer lattice `[-size/2, size/2]^2`, normalised to sum 1.
pub fn gaussian_kernel(sigma: f32, size: usize) -> Result<Kernel> {
    require_odd(size, "gaussian")?;
    let mut data = Vec::with_capacity(size * size);
    let center = (size / 2) as isize;
    let sigma2 = sigma * sigma;

    for y in 0..size {
        for x in 0..size {
            let dx = (x as isize - center) as f32;
            let dy = (y as isize - center) as f32;
            data.push((-(dx * dx + dy * dy) / (2.0 * sigma2)).exp());
        }
    }

    let mut kernel = Kernel::new(data, size, size)?;
    kernel.normalize();
    Ok(kernel)
}

/// Sigma that OpenCV derives when a Gaussian blur is requested with `sigma = 0`.
pub fn sigma_for_kernel_size(size: usize) -> f32 {
    0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8
}

/// Cross-correlates `kernel` over a pre-padded plane, producing only fully
/// covered positions (`out = padded - kernel + 1` in each axis).
pub fn correlate_valid(
    padded: &[f32],
    padded_width: usize,
    out_height: usize,
    out_width: usize,
    kernel: &Kernel,
) -> Vec<f32> {
    let mut out = vec![0.0f32; out_height * out_width];
    if out_width == 0 {
        return out;
    }
    out.par_chunks_mut(out_width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, o) in row.iter_mut().enumerate() {
                let mut sum = 0.0f32;
                for ky in 0..kernel.height {
                    let base = (y + ky) * padded_width + x;
                    let k_row = &kernel.data[ky * kernel.width..(ky + 1) * kernel.width];
                    for (kx, &k) in k_row.iter().enumerate() {
                        sum += padded[base + kx] * k;
                    }
                }
                *o = sum;
            }
        });
    out
}

/// Same-size filtering of every plane with a centred kernel.
pub fn convolve_ctx(
    tensor: &Tensor<f32>,
    kernel: &Kernel,
    border: BorderMode,
    group: &RuntimeRunner,
) -> Result<Tensor<f32>> {
    let (_, _, h, w) = require_nchw(tensor)?;
    require_odd(kernel.width, "convolution")?;
    require_odd(kernel.height, "convolution")?;
    let padding = Padding {
        left: kernel.width / 2,
        right: kernel.width / 2,
        top: kernel.height / 2,
        bottom: kernel.height / 2,
    };
    validate_padding(h, w, padding, border)?;
    let (_, pw) = padding.padded_dims(h, w);

    group.run(|| {
        let mut data = Vec::with_capacity(tensor.len());
        for plane in tensor.as_slice()?.chunks_exact(h * w) {
            let padded = pad_plane(plane, h, w, padding, border);
            data.extend(correlate_valid(&padded, pw, h, w, kernel));
        }
        Ok(Tensor::from_vec(data, tensor.shape.clone())?)
    })
}

pub fn gaussian_blur_ctx(
    tensor: &Tensor<f32>,
    size: usize,
    sigma: f32,
    border: BorderMode,
    group: &RuntimeRunner,
) -> Result<Tensor<f32>> {
    let sigma = if sigma > 0.0 {
        sigma
    } else {
        sigma_for_kernel_size(size)
    };
    let kernel = gaussian_kernel(sigma, size)?;
    convolve_ctx(tensor, &kernel, border, group)
}
