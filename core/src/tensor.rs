use crate::storage::{CpuStorage, DeviceType, Storage};
use crate::{Error, Result};
use std::fmt;
use std::marker::PhantomData;
use wide::f32x8;

/// Dimensions of a dense, row-major tensor.
///
/// The rank is dynamic so that operators can reject a wrongly shaped input at the
/// call boundary instead of at the type level. Depth grids and images are rank 4
/// in **NCHW** order (batch, channel, height, width).
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TensorShape {
    dims: Vec<usize>,
}

impl TensorShape {
    pub fn new(dims: impl Into<Vec<usize>>) -> Self {
        Self { dims: dims.into() }
    }

    pub fn nchw(batch: usize, channels: usize, height: usize, width: usize) -> Self {
        Self::new(vec![batch, channels, height, width])
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    pub fn len(&self) -> usize {
        self.dims.iter().fold(1usize, |acc, &d| acc.saturating_mul(d))
    }

    pub fn checked_len(&self) -> Option<usize> {
        self.dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `(batch, channels, height, width)` for rank-4 shapes.
    pub fn as_nchw(&self) -> Option<(usize, usize, usize, usize)> {
        match *self.dims.as_slice() {
            [b, c, h, w] => Some((b, c, h, w)),
            _ => None,
        }
    }

    /// Same batch and spatial extent, different channel count.
    pub fn with_channels(&self, channels: usize) -> Option<Self> {
        self.as_nchw()
            .map(|(b, _, h, w)| Self::nchw(b, channels, h, w))
    }
}

impl fmt::Display for TensorShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, ")")
    }
}

/// N-dimensional array abstraction.
///
/// **Layout Convention:**
/// Data is stored contiguously with the last dimension varying fastest. For the
/// rank-4 NCHW tensors used throughout the pipeline the element at (b, c, h, w) is
/// located at:
/// `index = ((b * C + c) * H + h) * W + w`
#[derive(Debug, Clone)]
pub struct Tensor<T: Clone + Copy + 'static, S: Storage<T> = CpuStorage<T>> {
    pub storage: S,
    pub shape: TensorShape,
    pub _phantom: PhantomData<T>,
}

pub type CpuTensor<T> = Tensor<T, CpuStorage<T>>;

impl<T: Clone + Copy + fmt::Debug + 'static, S: Storage<T>> Tensor<T, S> {
    pub fn from_vec(data: Vec<T>, shape: TensorShape) -> Result<Self> {
        let expected = shape
            .checked_len()
            .ok_or_else(|| Error::DimensionMismatch(format!("shape {} overflows", shape)))?;
        if data.len() != expected {
            return Err(Error::DimensionMismatch(format!(
                "Data size mismatch: got {}, expected {} for shape {}",
                data.len(),
                expected,
                shape
            )));
        }
        Ok(Self {
            storage: S::from_vec(data).map_err(Error::MemoryError)?,
            shape,
            _phantom: PhantomData,
        })
    }

    pub fn reshape(&self, new_shape: TensorShape) -> Result<Self> {
        let len = self.storage.len();

        if len != new_shape.len() {
            return Err(Error::DimensionMismatch(format!(
                "Cannot reshape {} into {}: size mismatch ({} != {})",
                self.shape,
                new_shape,
                len,
                new_shape.len()
            )));
        }
        Ok(Self {
            storage: self.storage.clone(),
            shape: new_shape,
            _phantom: PhantomData,
        })
    }

    pub fn as_slice(&self) -> Result<&[T]> {
        self.storage
            .as_slice()
            .ok_or_else(|| Error::RuntimeError("Data not on CPU".into()))
    }

    pub fn as_mut_slice(&mut self) -> Result<&mut [T]> {
        self.storage
            .as_mut_slice()
            .ok_or_else(|| Error::RuntimeError("Data not on CPU".into()))
    }

    pub fn device(&self) -> DeviceType {
        self.storage.device()
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Unpacks a rank-4 shape, failing with `InvalidShape` for any other rank.
    pub fn nchw(&self) -> Result<(usize, usize, usize, usize)> {
        self.shape.as_nchw().ok_or_else(|| {
            Error::InvalidShape(format!(
                "expected 4 dimensions (B, C, H, W), got {} {}",
                self.rank(),
                self.shape
            ))
        })
    }

    fn offset(&self, index: &[usize]) -> Result<usize> {
        let dims = self.shape.dims();
        if index.len() != dims.len() {
            return Err(Error::InvalidShape(format!(
                "index of rank {} for tensor of rank {}",
                index.len(),
                dims.len()
            )));
        }
        let mut offset = 0usize;
        for (&i, &d) in index.iter().zip(dims) {
            if i >= d {
                return Err(Error::RuntimeError(format!(
                    "Index {:?} out of bounds for {}",
                    index, self.shape
                )));
            }
            offset = offset * d + i;
        }
        Ok(offset)
    }

    pub fn get(&self, index: &[usize]) -> Result<T> {
        let offset = self.offset(index)?;
        Ok(self.as_slice()?[offset])
    }

    pub fn get_mut(&mut self, index: &[usize]) -> Result<&mut T> {
        let offset = self.offset(index)?;
        Ok(&mut self.as_mut_slice()?[offset])
    }
}

impl<T: Clone + Copy + Default + fmt::Debug + 'static> Tensor<T> {
    pub fn new(shape: TensorShape) -> Result<Self> {
        Self::full(shape, T::default())
    }

    pub fn zeros(shape: TensorShape) -> Result<Self> {
        Self::new(shape)
    }

    pub fn full(shape: TensorShape, value: T) -> Result<Self> {
        let len = shape
            .checked_len()
            .ok_or_else(|| Error::DimensionMismatch(format!("shape {} overflows", shape)))?;
        Ok(Self {
            storage: CpuStorage::new(len, value).map_err(Error::MemoryError)?,
            shape,
            _phantom: PhantomData,
        })
    }

    pub fn ones(shape: TensorShape) -> Result<Self>
    where
        T: One,
    {
        Self::full(shape, T::one())
    }

    pub fn into_vec(self) -> Vec<T> {
        self.storage.data
    }

    /// Borrow the contiguous (H, W) plane at batch `b`, channel `c`.
    pub fn plane(&self, b: usize, c: usize) -> Result<&[T]> {
        let (batch, channels, h, w) = self.nchw()?;
        if b >= batch || c >= channels {
            return Err(Error::RuntimeError(format!(
                "plane ({}, {}) out of bounds for {}",
                b, c, self.shape
            )));
        }
        let start = (b * channels + c) * h * w;
        Ok(&self.storage.data[start..start + h * w])
    }

    pub fn plane_mut(&mut self, b: usize, c: usize) -> Result<&mut [T]> {
        let (batch, channels, h, w) = self.nchw()?;
        if b >= batch || c >= channels {
            return Err(Error::RuntimeError(format!(
                "plane ({}, {}) out of bounds for {}",
                b, c, self.shape
            )));
        }
        let start = (b * channels + c) * h * w;
        Ok(&mut self.storage.data[start..start + h * w])
    }

    pub fn map(&self, f: impl Fn(T) -> T) -> Self {
        Self {
            storage: CpuStorage {
                data: self.storage.data.iter().map(|&v| f(v)).collect(),
            },
            shape: self.shape.clone(),
            _phantom: PhantomData,
        }
    }

    /// Elementwise combination of two tensors with identical shapes.
    pub fn zip_map(&self, other: &Self, f: impl Fn(T, T) -> T) -> Result<Self> {
        if self.shape != other.shape {
            return Err(Error::DimensionMismatch(format!(
                "Tensor shape mismatch: {} vs {}",
                self.shape, other.shape
            )));
        }
        let data = self
            .storage
            .data
            .iter()
            .zip(&other.storage.data)
            .map(|(&a, &b)| f(a, b))
            .collect();
        Ok(Self {
            storage: CpuStorage { data },
            shape: self.shape.clone(),
            _phantom: PhantomData,
        })
    }

    /// Concatenate rank-4 tensors along the channel axis.
    pub fn concat_channels(tensors: &[&Self]) -> Result<Self> {
        let first = tensors
            .first()
            .ok_or_else(|| Error::InvalidShape("Cannot concat empty tensor list".into()))?;
        let (batch, _, height, width) = first.nchw()?;

        let mut total_channels = 0;
        for (i, t) in tensors.iter().enumerate() {
            let (b, c, h, w) = t.nchw()?;
            if b != batch || h != height || w != width {
                return Err(Error::DimensionMismatch(format!(
                    "Shape mismatch at index {}: {} vs {}",
                    i, t.shape, first.shape
                )));
            }
            total_channels += c;
        }

        let new_shape = TensorShape::nchw(batch, total_channels, height, width);
        let mut new_data = Vec::with_capacity(new_shape.len());

        // NCHW: each batch item is a contiguous run of its channel planes
        for b in 0..batch {
            for t in tensors {
                let (_, c, _, _) = t.nchw()?;
                let item = c * height * width;
                new_data.extend_from_slice(&t.storage.data[b * item..(b + 1) * item]);
            }
        }

        Self::from_vec(new_data, new_shape)
    }
}

pub trait One {
    fn one() -> Self;
}

impl One for f32 {
    fn one() -> Self {
        1.0
    }
}

impl One for f64 {
    fn one() -> Self {
        1.0
    }
}

impl One for u8 {
    fn one() -> Self {
        1
    }
}

fn simd_zip(
    a: &[f32],
    b: &[f32],
    lanes: impl Fn(f32x8, f32x8) -> f32x8,
    scalar: impl Fn(f32, f32) -> f32,
) -> Vec<f32> {
    let mut res = vec![0.0f32; a.len()];

    let mut a_chunks = a.chunks_exact(8);
    let mut b_chunks = b.chunks_exact(8);
    let mut res_chunks = res.chunks_exact_mut(8);

    for ((a8, b8), r8) in (&mut a_chunks).zip(&mut b_chunks).zip(&mut res_chunks) {
        let mut la = [0.0f32; 8];
        let mut lb = [0.0f32; 8];
        la.copy_from_slice(a8);
        lb.copy_from_slice(b8);
        let vr = lanes(f32x8::from(la), f32x8::from(lb));
        r8.copy_from_slice(&<[f32; 8]>::from(vr));
    }

    let rem_a = a_chunks.remainder();
    let rem_b = b_chunks.remainder();
    let rem_res = res_chunks.into_remainder();

    for i in 0..rem_a.len() {
        rem_res[i] = scalar(rem_a[i], rem_b[i]);
    }

    res
}

impl Tensor<f32, CpuStorage<f32>> {
    fn binary(
        &self,
        other: &Self,
        lanes: impl Fn(f32x8, f32x8) -> f32x8,
        scalar: impl Fn(f32, f32) -> f32,
    ) -> Result<Self> {
        if self.shape != other.shape {
            return Err(Error::DimensionMismatch(format!(
                "Tensor shape mismatch: {} vs {}",
                self.shape, other.shape
            )));
        }
        let res = simd_zip(self.as_slice()?, other.as_slice()?, lanes, scalar);
        Self::from_vec(res, self.shape.clone())
    }

    /// SIMD-accelerated element-wise addition.
    pub fn add(&self, other: &Self) -> Result<Self> {
        self.binary(other, |a, b| a + b, |a, b| a + b)
    }

    /// SIMD-accelerated element-wise subtraction.
    pub fn sub(&self, other: &Self) -> Result<Self> {
        self.binary(other, |a, b| a - b, |a, b| a - b)
    }

    /// SIMD-accelerated element-wise multiplication.
    pub fn mul(&self, other: &Self) -> Result<Self> {
        self.binary(other, |a, b| a * b, |a, b| a * b)
    }

    pub fn scale(&self, factor: f32) -> Self {
        self.map(|v| v * factor)
    }

    pub fn clamp_min(&self, min: f32) -> Self {
        self.map(|v| v.max(min))
    }

    pub fn mean(&self) -> f32 {
        let data = &self.storage.data;
        if data.is_empty() {
            return 0.0;
        }
        (data.iter().map(|&v| v as f64).sum::<f64>() / data.len() as f64) as f32
    }

    /// Unbiased (n - 1) standard deviation over every element.
    pub fn std(&self) -> f32 {
        let data = &self.storage.data;
        if data.len() < 2 {
            return 0.0;
        }
        let mean = data.iter().map(|&v| v as f64).sum::<f64>() / data.len() as f64;
        let var = data
            .iter()
            .map(|&v| {
                let d = v as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / (data.len() - 1) as f64;
        var.sqrt() as f32
    }

    pub fn max_value(&self) -> Option<f32> {
        self.storage.data.iter().copied().reduce(f32::max)
    }

    pub fn min_value(&self) -> Option<f32> {
        self.storage.data.iter().copied().reduce(f32::min)
    }

    /// Largest absolute elementwise difference between two equally shaped tensors.
    pub fn max_abs_diff(&self, other: &Self) -> Result<f32> {
        if self.shape != other.shape {
            return Err(Error::DimensionMismatch(format!(
                "Tensor shape mismatch: {} vs {}",
                self.shape, other.shape
            )));
        }
        Ok(self
            .storage
            .data
            .iter()
            .zip(&other.storage.data)
            .map(|(a, b)| (a - b).abs())
            .fold(0.0f32, f32::max))
    }
}

impl<T: Clone + Copy + fmt::Debug + 'static, S: Storage<T>> fmt::Display for Tensor<T, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor{} on {:?}", self.shape, self.storage.device())
    }
}

pub fn create_depth_grid(batch: usize, height: usize, width: usize) -> Result<Tensor<f32>> {
    Tensor::zeros(TensorShape::nchw(batch, 1, height, width))
}
