use crate::Result;
use lidar_dnn::{FusionNetwork, ParameterMap};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Training state persisted between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub epoch: usize,
    pub model_state: ParameterMap,
    /// Opaque optimizer state, owned by the training loop
    #[serde(default)]
    pub optimizer_state: BTreeMap<String, serde_json::Value>,
}

impl Checkpoint {
    pub fn new(epoch: usize, model_state: ParameterMap) -> Self {
        Self {
            epoch,
            model_state,
            optimizer_state: BTreeMap::new(),
        }
    }

    pub fn from_network(epoch: usize, network: &dyn FusionNetwork) -> Self {
        Self::new(epoch, network.parameters())
    }

    pub fn with_optimizer_state(mut self, state: BTreeMap<String, serde_json::Value>) -> Self {
        self.optimizer_state = state;
        self
    }

    /// `epoch-{epoch}_loss-{loss:.2}.json`
    pub fn file_name(epoch: usize, loss: f32) -> String {
        format!("epoch-{}_loss-{:.2}.json", epoch, loss)
    }

    /// Writes the checkpoint into `dir`, creating it if needed, and returns the file path.
    pub fn save(&self, dir: impl AsRef<Path>, loss: f32) -> Result<PathBuf> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let path = dir.join(Self::file_name(self.epoch, loss));

        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;

        #[cfg(feature = "tracing")]
        tracing::debug!(
            "saved checkpoint for epoch {} ({} parameters) to {}",
            self.epoch,
            self.model_state.num_elements(),
            path.display()
        );

        Ok(path)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = BufReader::new(File::open(path)?);
        let checkpoint: Self = serde_json::from_reader(reader)?;

        #[cfg(feature = "tracing")]
        tracing::debug!("loaded checkpoint for epoch {} from {}", checkpoint.epoch, path.display());

        Ok(checkpoint)
    }

    pub fn restore(&self, network: &mut dyn FusionNetwork) -> Result<()> {
        network.load_parameters(&self.model_state)?;
        Ok(())
    }
}
