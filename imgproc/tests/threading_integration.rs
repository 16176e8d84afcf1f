use lidar_core::{Tensor, TensorShape};
use lidar_imgproc::*;
use lidar_runtime::{ResourceGroup, RuntimeRunner};
use std::sync::Arc;

#[test]
fn test_custom_pool_execution() {
    // A strict single-thread group must give the same answer as the calling thread
    let group = Arc::new(ResourceGroup::new("imgproc-strict", 1, None).unwrap());
    let pooled = RuntimeRunner::Group(group);
    let sync = RuntimeRunner::default();

    let data: Vec<f32> = (0..2 * 20 * 20).map(|i| ((i * 37) % 101) as f32).collect();
    let grid = Tensor::from_vec(data, TensorShape::nchw(2, 1, 20, 20)).unwrap();

    let a = median_blur_ctx(&grid, 5, &pooled).unwrap();
    let b = median_blur_ctx(&grid, 5, &sync).unwrap();
    assert_eq!(a.as_slice().unwrap(), b.as_slice().unwrap());

    let params = BilateralParams::default();
    let a = bilateral_filter_ctx(&grid, &params, &pooled).unwrap();
    let b = bilateral_filter_ctx(&grid, &params, &sync).unwrap();
    assert!(a.max_abs_diff(&b).unwrap() < 1e-5);

    let se = StructuringElement::from_shape(MorphShape::Diamond, 5, 5).unwrap();
    let a = dilation_ctx(&grid, &se, &MorphParams::default(), &pooled).unwrap();
    let b = dilation_ctx(&grid, &se, &MorphParams::default(), &sync).unwrap();
    assert_eq!(a.as_slice().unwrap(), b.as_slice().unwrap());
}
