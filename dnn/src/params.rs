use crate::{DnnError, Result};
use lidar_core::{Tensor, TensorShape};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A named learnable array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawParamTensor")]
pub struct ParamTensor {
    pub dims: Vec<usize>,
    pub data: Vec<f32>,
}

#[derive(Deserialize)]
struct RawParamTensor {
    dims: Vec<usize>,
    data: Vec<f32>,
}

impl TryFrom<RawParamTensor> for ParamTensor {
    type Error = DnnError;

    fn try_from(raw: RawParamTensor) -> Result<Self> {
        Self::new(raw.dims, raw.data)
    }
}

impl ParamTensor {
    pub fn new(dims: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = dims.iter().product();
        if expected != data.len() {
            return Err(DnnError::InvalidShape(format!(
                "parameter dims {:?} need {} values, got {}",
                dims,
                expected,
                data.len()
            )));
        }
        Ok(Self { dims, data })
    }

    pub fn from_tensor(tensor: &Tensor<f32>) -> Result<Self> {
        Self::new(tensor.dims().to_vec(), tensor.as_slice()?.to_vec())
    }

    pub fn to_tensor(&self) -> Result<Tensor<f32>> {
        Ok(Tensor::from_vec(
            self.data.clone(),
            TensorShape::new(self.dims.clone()),
        )?)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Ordered `name -> parameter` map, the serialized form of a model's state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterMap {
    entries: BTreeMap<String, ParamTensor>,
}

impl ParameterMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, param: ParamTensor) -> Option<ParamTensor> {
        self.entries.insert(name.into(), param)
    }

    pub fn get(&self, name: &str) -> Option<&ParamTensor> {
        self.entries.get(name)
    }

    /// Looks up `name`, failing with `MissingParameter` when absent.
    pub fn require(&self, name: &str) -> Result<&ParamTensor> {
        self.entries
            .get(name)
            .ok_or_else(|| DnnError::MissingParameter(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamTensor)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of scalar parameters.
    pub fn num_elements(&self) -> usize {
        self.entries.values().map(ParamTensor::len).sum()
    }
}
