use std::fmt::Debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
/// Enumeration of memory locations a tensor can live in.
pub enum DeviceType {
    /// CPU (system RAM)
    Cpu,
}

/// A trait for tensor storage backends.
///
/// This allows a `Tensor` to hold data on different devices while providing a
/// common interface for metadata and (where applicable) access.
pub trait Storage<T: 'static>: Debug + Clone {
    /// The device where this storage resides.
    fn device(&self) -> DeviceType;

    /// The number of elements in this storage.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the data as a slice, if possible.
    /// Returns `None` if the data is not on CPU or not contiguous.
    fn as_slice(&self) -> Option<&[T]>;

    /// Get the data as a mutable slice, if possible.
    fn as_mut_slice(&mut self) -> Option<&mut [T]>;

    /// Creates a new storage with the given size and default value.
    fn new(size: usize, default_value: T) -> std::result::Result<Self, String>
    where
        T: Clone;

    /// Creates a new storage from a vector.
    fn from_vec(data: Vec<T>) -> std::result::Result<Self, String>;
}

/// Standard CPU-based storage using `Vec<T>`.
#[derive(Debug, Clone, PartialEq)]
pub struct CpuStorage<T> {
    /// The vector containing the actual data on the CPU.
    pub data: Vec<T>,
}

impl<T: Clone + Debug + 'static> Storage<T> for CpuStorage<T> {
    fn device(&self) -> DeviceType {
        DeviceType::Cpu
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn as_slice(&self) -> Option<&[T]> {
        Some(&self.data)
    }

    fn as_mut_slice(&mut self) -> Option<&mut [T]> {
        Some(&mut self.data)
    }

    fn new(size: usize, default_value: T) -> std::result::Result<Self, String> {
        Ok(Self {
            data: vec![default_value; size],
        })
    }

    fn from_vec(data: Vec<T>) -> std::result::Result<Self, String> {
        Ok(Self { data })
    }
}
