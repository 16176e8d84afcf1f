use crate::{DnnError, Result};
use image::{ImageBuffer, Luma, RgbImage};
use lidar_core::{Tensor, TensorShape};

/// 16-bit single-channel depth image, as stored in KITTI-style PNGs.
pub type DepthImage = ImageBuffer<Luma<u16>, Vec<u16>>;

/// Raw depth counts per metre in 16-bit depth PNGs.
pub const DEPTH_SCALE: f32 = 256.0;

/// Planar `(1, 3, H, W)` blob with values scaled to `[0, 1]`.
pub fn rgb_to_blob(image: &RgbImage) -> Result<Tensor<f32>> {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let plane = width * height;
    let mut blob = vec![0.0f32; 3 * plane];

    for (i, pixel) in image.pixels().enumerate() {
        for c in 0..3 {
            blob[c * plane + i] = pixel[c] as f32 / 255.0;
        }
    }

    Ok(Tensor::from_vec(blob, TensorShape::nchw(1, 3, height, width))?)
}

/// `(1, 1, H, W)` depth grid in metres. Zero stays zero (no measurement).
pub fn depth_to_blob(image: &DepthImage) -> Result<Tensor<f32>> {
    let width = image.width() as usize;
    let height = image.height() as usize;
    let blob = image
        .as_raw()
        .iter()
        .map(|&v| v as f32 / DEPTH_SCALE)
        .collect();
    Ok(Tensor::from_vec(blob, TensorShape::nchw(1, 1, height, width))?)
}

/// Decodes an encoded 16-bit depth image (PNG) into a depth blob.
pub fn decode_depth_png(bytes: &[u8]) -> Result<Tensor<f32>> {
    let decoded = image::load_from_memory(bytes)?;
    depth_to_blob(&decoded.to_luma16())
}

/// Inverse of [`depth_to_blob`] for the first plane of a depth grid.
pub fn blob_to_depth_image(blob: &Tensor<f32>) -> Result<DepthImage> {
    let (_, _, height, width) = blob.nchw()?;
    let plane = blob.plane(0, 0)?;
    let raw = plane
        .iter()
        .map(|&d| (d * DEPTH_SCALE).round().clamp(0.0, u16::MAX as f32) as u16)
        .collect();
    DepthImage::from_raw(width as u32, height as u32, raw).ok_or_else(|| {
        DnnError::InvalidShape(format!("cannot build a {}x{} depth image", width, height))
    })
}
