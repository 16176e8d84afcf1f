use lidar_core::{Tensor, TensorShape};
use lidar_imgproc::*;
use lidar_runtime::RuntimeRunner;
use rand::{rngs::StdRng, Rng, SeedableRng};

fn sparse_grid(seed: u64, h: usize, w: usize, density: f64) -> Tensor<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let data = (0..h * w)
        .map(|_| {
            if rng.gen_bool(density) {
                rng.gen_range(1.0..80.0)
            } else {
                0.0
            }
        })
        .collect();
    Tensor::from_vec(data, TensorShape::nchw(1, 1, h, w)).unwrap()
}

#[test]
fn test_morphology_consistency() {
    let mut img = Tensor::<f32>::zeros(TensorShape::nchw(1, 1, 10, 10)).unwrap();
    *img.get_mut(&[0, 0, 5, 5]).unwrap() = 255.0;

    let kernel = StructuringElement::from_shape(MorphShape::Rectangle, 3, 3).unwrap();
    let params = MorphParams::default();

    let dilated = dilation(&img, &kernel, &params).unwrap();
    // Centre 3x3 lights up
    assert_eq!(dilated.get(&[0, 0, 4, 4]).unwrap(), 255.0);
    assert_eq!(dilated.get(&[0, 0, 6, 6]).unwrap(), 255.0);
    assert_eq!(dilated.get(&[0, 0, 3, 3]).unwrap(), 0.0);

    let eroded = erosion(&dilated, &kernel, &params).unwrap();
    // Back to the single pixel
    assert_eq!(eroded.get(&[0, 0, 5, 5]).unwrap(), 255.0);
    assert_eq!(eroded.get(&[0, 0, 4, 4]).unwrap(), 0.0);
}

#[test]
fn test_engines_agree_on_sparse_depth() {
    let grid = sparse_grid(3, 24, 31, 0.1);
    let runner = RuntimeRunner::default();
    for shape in [MorphShape::Diamond, MorphShape::Cross, MorphShape::Ellipse] {
        let se = StructuringElement::from_shape(shape, 5, 5).unwrap();
        for op in [MorphOp::Dilate, MorphOp::Erode] {
            let unfold = morph_ctx(&grid, &se, &MorphParams::default(), op, &runner).unwrap();
            let conv = morph_ctx(
                &grid,
                &se,
                &MorphParams::default().with_engine(MorphEngine::Convolution),
                op,
                &runner,
            )
            .unwrap();
            assert!(unfold.max_abs_diff(&conv).unwrap() < 1e-4);
        }
    }
}

#[test]
fn test_closing_fills_narrow_gaps() {
    let mut data = vec![5.0f32; 7 * 7];
    data[3 * 7 + 3] = 0.0;
    let grid = Tensor::from_vec(data, TensorShape::nchw(1, 1, 7, 7)).unwrap();
    let se = StructuringElement::ones(3, 3).unwrap();
    let closed = closing_ctx(&grid, &se, &MorphParams::default(), &RuntimeRunner::default()).unwrap();
    assert!(closed.as_slice().unwrap().iter().all(|&v| v == 5.0));
}

#[test]
fn test_filter_chain_preserves_shape() {
    let grid = sparse_grid(5, 32, 48, 0.3);
    let dims = grid.dims().to_vec();

    let se = StructuringElement::from_shape(MorphShape::Diamond, 5, 5).unwrap();
    let dilated = dilation(&grid, &se, &MorphParams::default()).unwrap();
    let filled = interpolate_depth_map(&dilated, 0.1).unwrap();
    let median = median_blur(&filled, 5).unwrap();
    let smooth = bilateral_filter(&median, &BilateralParams::default()).unwrap();

    for t in [&dilated, &filled, &median, &smooth] {
        assert_eq!(t.dims(), dims.as_slice());
    }
}

#[test]
fn test_traced_dilation_gradient_mass() {
    let grid = sparse_grid(8, 12, 12, 0.5);
    let se = StructuringElement::ones(3, 3).unwrap();
    let traced = dilation_traced_ctx(&grid, &se, &MorphParams::default(), &RuntimeRunner::default())
        .unwrap();
    let ones = Tensor::<f32>::ones(traced.output.shape.clone()).unwrap();
    let grad = traced.backward(&ones).unwrap();
    // every output cell routes its unit gradient to exactly one input sample
    let routed = traced.source.iter().filter(|s| s.is_some()).count() as f32;
    let total: f32 = grad.as_slice().unwrap().iter().sum();
    assert!((total - routed).abs() < 1e-3);
}
