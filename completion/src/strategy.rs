use crate::synthesizer::{DepthSynthesizer, DilationFill, FillParams, InterpolationFill, MorphologyFill};
use crate::{CompletionError, Result};
use std::fmt;
use std::str::FromStr;

/// Registered depth synthesis strategies, keyed by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FillStrategy {
    #[default]
    Morphology,
    Dilation,
    Interpolation,
}

impl FillStrategy {
    pub const ALL: [FillStrategy; 3] = [
        FillStrategy::Morphology,
        FillStrategy::Dilation,
        FillStrategy::Interpolation,
    ];

    pub fn key(&self) -> &'static str {
        match self {
            FillStrategy::Morphology => "morphology",
            FillStrategy::Dilation => "dilation",
            FillStrategy::Interpolation => "interpolation",
        }
    }

    /// Instantiates the synthesizer registered under this key.
    pub fn build(self, params: &FillParams) -> Result<Box<dyn DepthSynthesizer>> {
        #[cfg(feature = "tracing")]
        tracing::debug!("building '{}' depth synthesizer", self.key());

        let params = params.clone();
        Ok(match self {
            FillStrategy::Morphology => Box::new(MorphologyFill::new(params)?),
            FillStrategy::Dilation => Box::new(DilationFill::new(params)?),
            FillStrategy::Interpolation => Box::new(InterpolationFill::new(params)?),
        })
    }
}

impl FromStr for FillStrategy {
    type Err = CompletionError;

    fn from_str(s: &str) -> Result<Self> {
        FillStrategy::ALL
            .into_iter()
            .find(|strategy| strategy.key() == s)
            .ok_or_else(|| CompletionError::UnknownStrategy(s.to_string()))
    }
}

impl fmt::Display for FillStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}
