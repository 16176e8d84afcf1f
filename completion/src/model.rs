use crate::config::ModelConfig;
use crate::rectify::{rectify_depth, RectifyParams};
use crate::strategy::FillStrategy;
use crate::synthesizer::{require_depth_grid, DepthSynthesizer};
use crate::{CompletionError, Result};
use lidar_core::Tensor;
use lidar_dnn::{FusionNetwork, ResidualFusionNet};
use lidar_runtime::RuntimeRunner;
use serde::{Deserialize, Serialize};

/// How the fusion residual `dense - sparse` enters the final depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidualMode {
    /// `final = pseudo + (dense - sparse)`
    #[default]
    Identity,
    /// `final = pseudo + max(dense - sparse, 0)`
    ClampNonNegative,
}

impl ResidualMode {
    pub fn apply(&self, residual: &Tensor<f32>) -> Tensor<f32> {
        match self {
            ResidualMode::Identity => residual.clone(),
            ResidualMode::ClampNonNegative => residual.clamp_min(0.0),
        }
    }

    /// Gradient of the final depth with respect to `dense`, given the upstream
    /// gradient `grad_final` and the residual the forward pass saw.
    pub fn backward(&self, residual: &Tensor<f32>, grad_final: &Tensor<f32>) -> Result<Tensor<f32>> {
        match self {
            ResidualMode::Identity => {
                if residual.shape != grad_final.shape {
                    return Err(CompletionError::InvalidShape(format!(
                        "gradient {} does not match residual {}",
                        grad_final.shape, residual.shape
                    )));
                }
                Ok(grad_final.clone())
            }
            ResidualMode::ClampNonNegative => Ok(residual
                .zip_map(grad_final, |r, g| if r > 0.0 { g } else { 0.0 })?),
        }
    }
}

/// Every intermediate of a forward pass.
#[derive(Debug, Clone)]
pub struct Prediction {
    pub final_depth: Tensor<f32>,
    pub pseudo_depth: Tensor<f32>,
    pub rectified: Tensor<f32>,
    pub dense: Tensor<f32>,
    pub attention: Tensor<f32>,
    /// `dense - sparse`, before the residual mode is applied
    pub residual: Tensor<f32>,
}

/// Sparse LiDAR completion model: synthesizer, rectification and learned fusion.
pub struct DenseLidar {
    strategy: FillStrategy,
    synthesizer: Box<dyn DepthSynthesizer>,
    rectification: RectifyParams,
    residual: ResidualMode,
    network: Box<dyn FusionNetwork>,
}

impl DenseLidar {
    /// Builds the model with the reference fusion network.
    pub fn new(config: &ModelConfig) -> Result<Self> {
        let network = ResidualFusionNet::new(config.fusion.clone())?;
        Self::with_network(config, Box::new(network))
    }

    pub fn with_network(config: &ModelConfig, network: Box<dyn FusionNetwork>) -> Result<Self> {
        config.validate()?;
        let strategy = config.fill_strategy()?;
        let synthesizer = strategy.build(&config.fill)?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "dense-lidar model: strategy '{}', residual {:?}",
            strategy,
            config.residual
        );

        Ok(Self {
            strategy,
            synthesizer,
            rectification: config.rectification.clone(),
            residual: config.residual,
            network,
        })
    }

    pub fn strategy(&self) -> FillStrategy {
        self.strategy
    }

    pub fn residual_mode(&self) -> ResidualMode {
        self.residual
    }

    pub fn network(&self) -> &dyn FusionNetwork {
        self.network.as_ref()
    }

    pub fn network_mut(&mut self) -> &mut dyn FusionNetwork {
        self.network.as_mut()
    }

    /// `image` is `(B, 3, H, W)`, `sparse` is `(B, 1, H, W)`.
    pub fn forward(
        &self,
        image: &Tensor<f32>,
        sparse: &Tensor<f32>,
        runner: &RuntimeRunner,
    ) -> Result<Prediction> {
        require_depth_grid(sparse, "sparse depth")?;
        if image.shape.with_channels(1).as_ref() != Some(&sparse.shape)
            || image.shape.as_nchw().map(|(_, c, _, _)| c) != Some(3)
        {
            return Err(CompletionError::InvalidShape(format!(
                "image {} does not pair with sparse depth {}",
                image.shape, sparse.shape
            )));
        }

        #[cfg(feature = "tracing")]
        tracing::trace!("forward pass on sparse depth {}", sparse.shape);

        let pseudo_depth = self.synthesizer.synthesize(sparse, runner)?;
        let rectified = rectify_depth(sparse, &pseudo_depth, &self.rectification)?;
        let fused = self.network.forward(image, &pseudo_depth, &rectified)?;

        let residual = fused.dense.sub(sparse)?;
        let final_depth = pseudo_depth.add(&self.residual.apply(&residual))?;

        Ok(Prediction {
            final_depth,
            pseudo_depth,
            rectified,
            dense: fused.dense,
            attention: fused.attention,
            residual,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lidar_core::TensorShape;

    #[test]
    fn clamp_mode_masks_negative_residuals() {
        let residual = Tensor::from_vec(vec![-1.0, 0.0, 2.0], TensorShape::new(vec![3])).unwrap();
        let grad = Tensor::from_vec(vec![5.0, 5.0, 5.0], TensorShape::new(vec![3])).unwrap();

        let clamp = ResidualMode::ClampNonNegative;
        assert_eq!(clamp.apply(&residual).as_slice().unwrap(), &[0.0, 0.0, 2.0]);
        assert_eq!(
            clamp.backward(&residual, &grad).unwrap().as_slice().unwrap(),
            &[0.0, 0.0, 5.0]
        );

        let identity = ResidualMode::Identity;
        assert_eq!(identity.apply(&residual).as_slice().unwrap(), &[-1.0, 0.0, 2.0]);
        assert_eq!(
            identity.backward(&residual, &grad).unwrap().as_slice().unwrap(),
            &[5.0, 5.0, 5.0]
        );
    }

    #[test]
    fn mismatched_image_is_rejected() {
        let model = DenseLidar::new(&ModelConfig::default()).unwrap();
        let image = Tensor::zeros(TensorShape::nchw(1, 3, 8, 8)).unwrap();
        let sparse = Tensor::zeros(TensorShape::nchw(1, 1, 8, 9)).unwrap();
        assert!(matches!(
            model.forward(&image, &sparse, &RuntimeRunner::default()),
            Err(CompletionError::InvalidShape(_))
        ));
    }
}
