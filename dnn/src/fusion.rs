use crate::params::{ParamTensor, ParameterMap};
use crate::{DnnError, Result};
use lidar_core::{Tensor, TensorShape};
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;

/// Output of a fusion network.
#[derive(Debug, Clone)]
pub struct FusionOutput {
    /// Dense depth estimate, `(B, 1, H, W)`.
    pub dense: Tensor<f32>,
    /// Per-pixel confidence in the rectified map, `(B, 1, H, W)`, values in `[0, 1]`.
    pub attention: Tensor<f32>,
}

/// A learned mapping from (image, pseudo-depth, rectified depth) to dense depth.
pub trait FusionNetwork: Send + Sync {
    fn forward(
        &self,
        image: &Tensor<f32>,
        pseudo: &Tensor<f32>,
        rectified: &Tensor<f32>,
    ) -> Result<FusionOutput>;

    fn parameters(&self) -> ParameterMap;

    fn load_parameters(&mut self, params: &ParameterMap) -> Result<()>;
}

/// Checks the fusion input contract and returns `(batch, height, width)`.
pub fn check_fusion_inputs(
    image: &Tensor<f32>,
    pseudo: &Tensor<f32>,
    rectified: &Tensor<f32>,
) -> Result<(usize, usize, usize)> {
    let (b, c, h, w) = image
        .shape
        .as_nchw()
        .ok_or_else(|| DnnError::InvalidShape(format!("image must be (B, 3, H, W), got {}", image.shape)))?;
    if c != 3 {
        return Err(DnnError::InvalidShape(format!(
            "image must have 3 channels, got {}",
            image.shape
        )));
    }
    let depth_shape = TensorShape::nchw(b, 1, h, w);
    for (name, t) in [("pseudo", pseudo), ("rectified", rectified)] {
        if t.shape != depth_shape {
            return Err(DnnError::InvalidShape(format!(
                "{} depth must be {}, got {}",
                name, depth_shape, t.shape
            )));
        }
    }
    Ok((b, h, w))
}

/// Zero-padded, stride-1 2-D convolution.
#[derive(Debug, Clone)]
struct Conv2d {
    in_channels: usize,
    out_channels: usize,
    kernel_size: usize,
    /// `(out, in, k, k)`
    weight: Vec<f32>,
    bias: Vec<f32>,
}

impl Conv2d {
    fn new(in_channels: usize, out_channels: usize, kernel_size: usize, rng: &mut StdRng) -> Self {
        let fan_in = (in_channels * kernel_size * kernel_size) as f32;
        let bound = 1.0 / fan_in.sqrt();
        let weight = (0..out_channels * in_channels * kernel_size * kernel_size)
            .map(|_| rng.gen_range(-bound..bound))
            .collect();
        let bias = (0..out_channels).map(|_| rng.gen_range(-bound..bound)).collect();
        Self {
            in_channels,
            out_channels,
            kernel_size,
            weight,
            bias,
        }
    }

    fn weight_dims(&self) -> Vec<usize> {
        vec![self.out_channels, self.in_channels, self.kernel_size, self.kernel_size]
    }

    fn forward(&self, input: &Tensor<f32>) -> Result<Tensor<f32>> {
        let (b, c, h, w) = input.nchw()?;
        if c != self.in_channels {
            return Err(DnnError::InvalidShape(format!(
                "convolution expects {} input channels, got {}",
                self.in_channels, input.shape
            )));
        }
        let src = input.as_slice()?;
        let k = self.kernel_size;
        let pad = (k / 2) as isize;
        let plane = h * w;
        let mut out = vec![0.0f32; b * self.out_channels * plane];
        if plane == 0 {
            return Ok(Tensor::from_vec(out, TensorShape::nchw(b, self.out_channels, h, w))?);
        }

        out.par_chunks_mut(plane).enumerate().for_each(|(idx, dst)| {
            let (bi, o) = (idx / self.out_channels, idx % self.out_channels);
            dst.fill(self.bias[o]);
            for i in 0..c {
                let in_plane = &src[(bi * c + i) * plane..(bi * c + i + 1) * plane];
                let kernel = &self.weight[(o * c + i) * k * k..(o * c + i + 1) * k * k];
                for ky in 0..k {
                    for kx in 0..k {
                        let wgt = kernel[ky * k + kx];
                        let dy = ky as isize - pad;
                        let dx = kx as isize - pad;
                        for y in 0..h {
                            let sy = y as isize + dy;
                            if sy < 0 || sy >= h as isize {
                                continue;
                            }
                            let src_row = &in_plane[sy as usize * w..(sy as usize + 1) * w];
                            let dst_row = &mut dst[y * w..(y + 1) * w];
                            for (x, d) in dst_row.iter_mut().enumerate() {
                                let sx = x as isize + dx;
                                if sx >= 0 && sx < w as isize {
                                    *d += wgt * src_row[sx as usize];
                                }
                            }
                        }
                    }
                }
            }
        });

        Ok(Tensor::from_vec(out, TensorShape::nchw(b, self.out_channels, h, w))?)
    }

    fn export(&self, prefix: &str, map: &mut ParameterMap) {
        // dims are constructed to match the buffers
        map.insert(
            format!("{}.weight", prefix),
            ParamTensor {
                dims: self.weight_dims(),
                data: self.weight.clone(),
            },
        );
        map.insert(
            format!("{}.bias", prefix),
            ParamTensor {
                dims: vec![self.out_channels],
                data: self.bias.clone(),
            },
        );
    }

    fn import(&mut self, prefix: &str, map: &ParameterMap) -> Result<()> {
        let weight = map.require(&format!("{}.weight", prefix))?;
        let bias = map.require(&format!("{}.bias", prefix))?;
        let expected = self.weight_dims();
        if weight.dims != expected
            || bias.dims != [self.out_channels]
            || weight.data.len() != self.weight.len()
            || bias.data.len() != self.bias.len()
        {
            return Err(DnnError::InvalidShape(format!(
                "{}: expected weight {:?} and bias [{}], got {:?} ({} values) and {:?} ({} values)",
                prefix,
                expected,
                self.out_channels,
                weight.dims,
                weight.data.len(),
                bias.dims,
                bias.data.len()
            )));
        }
        self.weight.copy_from_slice(&weight.data);
        self.bias.copy_from_slice(&bias.data);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    pub hidden_channels: usize,
    pub kernel_size: usize,
    /// Seed for the deterministic weight initialisation
    pub seed: u64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            hidden_channels: 8,
            kernel_size: 3,
            seed: 42,
        }
    }
}

/// Reference fusion network.
///
/// Concatenates image, pseudo and rectified depth into 5 channels, runs a
/// `k x k` convolution with ReLU and a `1 x 1` head with two outputs: an attention
/// logit and a depth correction. The dense estimate blends the two depth inputs by
/// the attention and adds the correction.
#[derive(Debug, Clone)]
pub struct ResidualFusionNet {
    config: FusionConfig,
    encoder: Conv2d,
    head: Conv2d,
}

impl ResidualFusionNet {
    pub const INPUT_CHANNELS: usize = 5;

    pub fn new(config: FusionConfig) -> Result<Self> {
        if config.hidden_channels == 0 || config.kernel_size % 2 == 0 {
            return Err(DnnError::InvalidShape(format!(
                "fusion net needs hidden channels > 0 and an odd kernel, got {:?}",
                config
            )));
        }
        let mut rng = StdRng::seed_from_u64(config.seed);
        let encoder = Conv2d::new(
            Self::INPUT_CHANNELS,
            config.hidden_channels,
            config.kernel_size,
            &mut rng,
        );
        let head = Conv2d::new(config.hidden_channels, 2, 1, &mut rng);
        Ok(Self {
            config,
            encoder,
            head,
        })
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }
}

impl FusionNetwork for ResidualFusionNet {
    fn forward(
        &self,
        image: &Tensor<f32>,
        pseudo: &Tensor<f32>,
        rectified: &Tensor<f32>,
    ) -> Result<FusionOutput> {
        let (b, h, w) = check_fusion_inputs(image, pseudo, rectified)?;
        let input = Tensor::concat_channels(&[image, pseudo, rectified])?;
        let hidden = self.encoder.forward(&input)?.map(|v| v.max(0.0));
        let logits = self.head.forward(&hidden)?;

        let plane = h * w;
        let logits = logits.as_slice()?;
        let (pseudo_v, rect_v) = (pseudo.as_slice()?, rectified.as_slice()?);
        let mut attention = Vec::with_capacity(b * plane);
        let mut dense = Vec::with_capacity(b * plane);
        for bi in 0..b {
            let att_logits = &logits[(bi * 2) * plane..(bi * 2 + 1) * plane];
            let delta = &logits[(bi * 2 + 1) * plane..(bi * 2 + 2) * plane];
            for i in 0..plane {
                let a = 1.0 / (1.0 + (-att_logits[i]).exp());
                let j = bi * plane + i;
                attention.push(a);
                dense.push(a * rect_v[j] + (1.0 - a) * pseudo_v[j] + delta[i]);
            }
        }

        let shape = TensorShape::nchw(b, 1, h, w);
        Ok(FusionOutput {
            dense: Tensor::from_vec(dense, shape.clone())?,
            attention: Tensor::from_vec(attention, shape)?,
        })
    }

    fn parameters(&self) -> ParameterMap {
        let mut map = ParameterMap::new();
        self.encoder.export("encoder", &mut map);
        self.head.export("head", &mut map);
        map
    }

    fn load_parameters(&mut self, params: &ParameterMap) -> Result<()> {
        // validate both layers before touching either
        let mut encoder = self.encoder.clone();
        let mut head = self.head.clone();
        encoder.import("encoder", params)?;
        head.import("head", params)?;
        self.encoder = encoder;
        self.head = head;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(b: usize, h: usize, w: usize) -> (Tensor<f32>, Tensor<f32>, Tensor<f32>) {
        let image = Tensor::full(TensorShape::nchw(b, 3, h, w), 0.5).unwrap();
        let pseudo = Tensor::full(TensorShape::nchw(b, 1, h, w), 10.0).unwrap();
        let rectified = Tensor::full(TensorShape::nchw(b, 1, h, w), 12.0).unwrap();
        (image, pseudo, rectified)
    }

    #[test]
    fn forward_respects_io_contract() {
        let net = ResidualFusionNet::new(FusionConfig::default()).unwrap();
        let (image, pseudo, rectified) = inputs(2, 6, 7);
        let out = net.forward(&image, &pseudo, &rectified).unwrap();
        assert_eq!(out.dense.dims(), &[2, 1, 6, 7]);
        assert_eq!(out.attention.dims(), &[2, 1, 6, 7]);
        assert!(out
            .attention
            .as_slice()
            .unwrap()
            .iter()
            .all(|&a| (0.0..=1.0).contains(&a)));
    }

    #[test]
    fn same_seed_same_weights() {
        let a = ResidualFusionNet::new(FusionConfig::default()).unwrap();
        let b = ResidualFusionNet::new(FusionConfig::default()).unwrap();
        assert_eq!(a.parameters(), b.parameters());
        let c = ResidualFusionNet::new(FusionConfig {
            seed: 7,
            ..FusionConfig::default()
        })
        .unwrap();
        assert_ne!(a.parameters(), c.parameters());
    }

    #[test]
    fn wrong_channel_count_is_rejected() {
        let net = ResidualFusionNet::new(FusionConfig::default()).unwrap();
        let (_, pseudo, rectified) = inputs(1, 4, 4);
        let gray = Tensor::zeros(TensorShape::nchw(1, 1, 4, 4)).unwrap();
        assert!(matches!(
            net.forward(&gray, &pseudo, &rectified),
            Err(DnnError::InvalidShape(_))
        ));
    }

    #[test]
    fn parameters_load_into_fresh_network() {
        let src = ResidualFusionNet::new(FusionConfig {
            seed: 3,
            ..FusionConfig::default()
        })
        .unwrap();
        let mut dst = ResidualFusionNet::new(FusionConfig::default()).unwrap();
        dst.load_parameters(&src.parameters()).unwrap();
        assert_eq!(dst.parameters(), src.parameters());

        let (image, pseudo, rectified) = inputs(1, 5, 5);
        let a = src.forward(&image, &pseudo, &rectified).unwrap();
        let b = dst.forward(&image, &pseudo, &rectified).unwrap();
        assert_eq!(a.dense.as_slice().unwrap(), b.dense.as_slice().unwrap());
    }

    #[test]
    fn bias_length_must_match_dims() {
        let mut net = ResidualFusionNet::new(FusionConfig::default()).unwrap();
        let before = net.parameters();
        let mut params = before.clone();
        params.insert(
            "head.bias",
            ParamTensor {
                dims: vec![2],
                data: vec![0.0; 3],
            },
        );
        assert!(matches!(net.load_parameters(&params), Err(DnnError::InvalidShape(_))));
        assert_eq!(net.parameters(), before);
    }

    #[test]
    fn incomplete_parameters_leave_network_untouched() {
        let mut net = ResidualFusionNet::new(FusionConfig::default()).unwrap();
        let before = net.parameters();
        let full = ResidualFusionNet::new(FusionConfig {
            seed: 9,
            ..FusionConfig::default()
        })
        .unwrap()
        .parameters();
        let partial = full
            .iter()
            .filter(|(name, _)| !name.starts_with("head"))
            .fold(ParameterMap::new(), |mut m, (k, v)| {
                m.insert(k, v.clone());
                m
            });
        assert!(matches!(
            net.load_parameters(&partial),
            Err(DnnError::MissingParameter(_))
        ));
        assert_eq!(net.parameters(), before);
    }
}
