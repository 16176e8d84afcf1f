//! Model and training configuration.
//!
//! Both structs are plain serde data: every field has a default, so a JSON file
//! only lists what it overrides. A configuration is validated once when it is
//! loaded and treated as immutable afterwards.

use crate::model::ResidualMode;
use crate::rectify::RectifyParams;
use crate::strategy::FillStrategy;
use crate::synthesizer::FillParams;
use crate::{CompletionError, Result};
use lidar_dnn::FusionConfig;
use lidar_runtime::{ResourceGroup, RuntimeRunner};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Depth synthesis strategy key
    pub strategy: String,
    pub fill: FillParams,
    pub rectification: RectifyParams,
    pub residual: ResidualMode,
    pub fusion: FusionConfig,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            strategy: FillStrategy::default().key().to_string(),
            fill: FillParams::default(),
            rectification: RectifyParams::default(),
            residual: ResidualMode::default(),
            fusion: FusionConfig::default(),
        }
    }
}

impl ModelConfig {
    pub fn fill_strategy(&self) -> Result<FillStrategy> {
        self.strategy.parse()
    }

    pub fn validate(&self) -> Result<()> {
        self.fill_strategy()?;
        self.fill.validate()?;
        self.rectification.validate()?;
        if self.fusion.hidden_channels == 0 || self.fusion.kernel_size % 2 == 0 {
            return Err(CompletionError::InvalidConfig(format!(
                "fusion needs hidden_channels > 0 and an odd kernel_size, got {:?}",
                self.fusion
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    /// Save a checkpoint every this many epochs
    pub checkpoint_interval: usize,
    /// Global batch size, split evenly across workers
    pub batch_size: usize,
    pub workers: usize,
    pub seed: u64,
    pub checkpoint_dir: PathBuf,
    /// Threads for the operator resource group; `None` runs on the calling thread
    pub cpu_threads: Option<usize>,
    pub model: ModelConfig,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: 40,
            checkpoint_interval: 10,
            batch_size: 1,
            workers: 1,
            seed: 1,
            checkpoint_dir: PathBuf::from("checkpoint"),
            cpu_threads: None,
            model: ModelConfig::default(),
        }
    }
}

impl TrainingConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;

        #[cfg(feature = "tracing")]
        tracing::debug!("loading training config from {}", path.display());

        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.epochs == 0 {
            return Err(CompletionError::InvalidConfig("epochs must be >= 1".into()));
        }
        if self.checkpoint_interval == 0 {
            return Err(CompletionError::InvalidConfig(
                "checkpoint_interval must be >= 1".into(),
            ));
        }
        if self.workers == 0 || self.batch_size < self.workers {
            return Err(CompletionError::InvalidConfig(format!(
                "batch_size {} cannot be split across {} workers",
                self.batch_size, self.workers
            )));
        }
        if self.cpu_threads == Some(0) {
            return Err(CompletionError::InvalidConfig("cpu_threads must be >= 1".into()));
        }
        self.model.validate()
    }

    /// Batch size seen by each worker. Any remainder is dropped.
    pub fn per_worker_batch_size(&self) -> usize {
        self.batch_size / self.workers
    }

    pub fn is_checkpoint_epoch(&self, epoch: usize) -> bool {
        epoch % self.checkpoint_interval == 0
    }

    /// Runner for the configured thread budget.
    pub fn runner(&self) -> Result<RuntimeRunner> {
        match self.cpu_threads {
            None => Ok(RuntimeRunner::default()),
            Some(threads) => {
                let group = ResourceGroup::new("completion", threads, None)?;
                Ok(RuntimeRunner::Group(Arc::new(group)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_fills_defaults() {
        let config = TrainingConfig::from_json_str(
            r#"{ "epochs": 4, "batch_size": 64, "workers": 4, "model": { "strategy": "dilation" } }"#,
        )
        .unwrap();
        assert_eq!(config.epochs, 4);
        assert_eq!(config.per_worker_batch_size(), 16);
        assert_eq!(config.checkpoint_interval, 10);
        assert_eq!(config.model.fill_strategy().unwrap(), FillStrategy::Dilation);
        assert_eq!(config.model.fill.max_depth, 100.0);
    }

    #[test]
    fn unknown_strategy_fails_validation() {
        let err = TrainingConfig::from_json_str(r#"{ "model": { "strategy": "nearest" } }"#);
        assert!(matches!(err, Err(CompletionError::UnknownStrategy(_))));
    }

    #[test]
    fn invalid_values_fail_validation() {
        for json in [
            r#"{ "epochs": 0 }"#,
            r#"{ "checkpoint_interval": 0 }"#,
            r#"{ "batch_size": 2, "workers": 4 }"#,
            r#"{ "cpu_threads": 0 }"#,
            r#"{ "model": { "fill": { "median_kernel": 6 } } }"#,
        ] {
            assert!(
                matches!(TrainingConfig::from_json_str(json), Err(CompletionError::InvalidConfig(_))),
                "{} should be rejected",
                json
            );
        }
        assert!(matches!(
            TrainingConfig::from_json_str("{ not json"),
            Err(CompletionError::Serde(_))
        ));
    }

    #[test]
    fn checkpoint_epochs() {
        let config = TrainingConfig {
            checkpoint_interval: 10,
            ..TrainingConfig::default()
        };
        assert!(config.is_checkpoint_epoch(10));
        assert!(config.is_checkpoint_epoch(40));
        assert!(!config.is_checkpoint_epoch(15));
    }

    #[test]
    fn config_survives_json() {
        let config = TrainingConfig {
            cpu_threads: Some(2),
            ..TrainingConfig::default()
        };
        let back = TrainingConfig::from_json_str(&config.to_json_string().unwrap()).unwrap();
        assert_eq!(back, config);
        assert!(matches!(back.runner().unwrap(), RuntimeRunner::Group(_)));
    }
}
