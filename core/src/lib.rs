pub mod storage;
pub mod tensor;

pub use storage::*;
pub use tensor::*;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid shape: {0}")]
    InvalidShape(String),

    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    #[error("Memory error: {0}")]
    MemoryError(String),

    #[error("Runtime error: {0}")]
    RuntimeError(String),
}
