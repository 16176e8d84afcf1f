pub mod orchestrator;
pub mod pool;

pub use orchestrator::{
    best_runner, default_runner, scheduler, ResourceGroup, RuntimeRunner, TaskScheduler,
};
pub use pool::{current_cpu_threads, init_global_thread_pool};

/// Identifier of the compute device a runner dispatches to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u32);

impl DeviceId {
    pub const CPU: DeviceId = DeviceId(0);
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Runtime error: {0}")]
    RuntimeError(String),
}

pub type Result<T> = std::result::Result<T, Error>;
