pub use lidar_completion as completion;
pub use lidar_core as core;
pub use lidar_dnn as dnn;
pub use lidar_imgproc as imgproc;
pub use lidar_runtime as runtime;

pub use lidar_completion::{
    Checkpoint, CompletionError, DenseLidar, FillStrategy, ModelConfig, Prediction, ResidualMode,
    TrainingConfig,
};

/// Initialize a single global Rayon thread pool for all CPU-parallel operators.
///
/// Call this once at application startup before running heavy completion workloads.
/// Repeated calls are idempotent and return the first initialization result.
///
/// Priority order:
/// 1. explicit `num_threads`
/// 2. `DENSE_LIDAR_CPU_THREADS` env var
/// 3. Rayon default
pub fn init_thread_pool(num_threads: Option<usize>) -> Result<(), String> {
    lidar_runtime::init_global_thread_pool(num_threads)
}
