use crate::{DeviceId, Error, Result};
use core_affinity::CoreId;
use rayon::ThreadPool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

/// A named rayon pool, optionally pinned to a set of cores.
pub struct ResourceGroup {
    pub name: String,
    pub device: DeviceId,
    pub pool: Arc<ThreadPool>,
    pub cores: Vec<usize>,
}

impl std::fmt::Debug for ResourceGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGroup")
            .field("name", &self.name)
            .field("device", &self.device)
            .field("threads", &self.pool.current_num_threads())
            .field("cores", &self.cores)
            .finish()
    }
}

impl ResourceGroup {
    pub fn new(name: &str, num_threads: usize, core_ids: Option<Vec<usize>>) -> Result<Self> {
        if num_threads == 0 {
            return Err(Error::RuntimeError(format!(
                "resource group '{}' needs at least one thread",
                name
            )));
        }
        let thread_name_prefix = format!("lidar-{}-", name);

        let core_ids_cloned = core_ids.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(move |i| format!("{}{}", thread_name_prefix, i))
            .start_handler(move |i| {
                if let Some(ref cores) = core_ids_cloned {
                    if let Some(&core_index) = cores.get(i % cores.len()) {
                        core_affinity::set_for_current(CoreId { id: core_index });
                    }
                }
            })
            .build()
            .map_err(|e| Error::RuntimeError(e.to_string()))?;

        #[cfg(feature = "tracing")]
        tracing::debug!("created resource group '{}' with {} threads", name, num_threads);

        Ok(Self {
            name: name.to_string(),
            device: DeviceId::CPU,
            pool: Arc::new(pool),
            cores: core_ids.unwrap_or_default(),
        })
    }

    pub fn install<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(f)
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

/// Registry of named resource groups.
pub struct TaskScheduler {
    groups: Mutex<HashMap<String, Arc<ResourceGroup>>>,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self {
            groups: Mutex::new(HashMap::new()),
        }
    }

    pub fn create_group(
        &self,
        name: &str,
        num_threads: usize,
        cores: Option<Vec<usize>>,
    ) -> Result<Arc<ResourceGroup>> {
        let group = Arc::new(ResourceGroup::new(name, num_threads, cores)?);
        self.lock()?.insert(name.to_string(), group.clone());
        Ok(group)
    }

    pub fn get_group(&self, name: &str) -> Result<Option<Arc<ResourceGroup>>> {
        Ok(self.lock()?.get(name).cloned())
    }

    pub fn remove_group(&self, name: &str) -> Result<Option<Arc<ResourceGroup>>> {
        Ok(self.lock()?.remove(name))
    }

    pub fn get_default_group(&self) -> Result<Arc<ResourceGroup>> {
        self.get_group("default")?
            .ok_or_else(|| Error::RuntimeError("default resource group missing".into()))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Arc<ResourceGroup>>>> {
        self.groups
            .lock()
            .map_err(|_| Error::RuntimeError("scheduler lock poisoned".into()))
    }
}

static GLOBAL_SCHEDULER: OnceLock<std::result::Result<TaskScheduler, String>> = OnceLock::new();

/// Process-wide scheduler holding a `default` group sized like the rayon pool.
pub fn scheduler() -> Result<&'static TaskScheduler> {
    GLOBAL_SCHEDULER
        .get_or_init(|| {
            let s = TaskScheduler::new();
            s.create_group("default", rayon::current_num_threads(), None)
                .map_err(|e| e.to_string())?;
            Ok(s)
        })
        .as_ref()
        .map_err(|e| Error::RuntimeError(e.clone()))
}

/// Execution handle passed explicitly into every operator.
///
/// Operators never look up a device on their own; the caller decides where the
/// work runs by choosing the runner.
#[derive(Debug, Clone)]
pub enum RuntimeRunner {
    /// Run on the calling thread, using the global rayon pool for data parallelism.
    Sync(DeviceId),
    /// Run inside a dedicated resource group.
    Group(Arc<ResourceGroup>),
}

impl RuntimeRunner {
    pub fn run<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        match self {
            RuntimeRunner::Sync(_) => f(),
            RuntimeRunner::Group(group) => group.install(f),
        }
    }

    pub fn device_id(&self) -> DeviceId {
        match self {
            RuntimeRunner::Sync(id) => *id,
            RuntimeRunner::Group(group) => group.device,
        }
    }
}

impl Default for RuntimeRunner {
    fn default() -> Self {
        RuntimeRunner::Sync(DeviceId::CPU)
    }
}

/// Synchronous CPU runner.
pub fn default_runner() -> RuntimeRunner {
    RuntimeRunner::default()
}

/// Runner bound to the scheduler's default group, falling back to the calling thread.
pub fn best_runner() -> RuntimeRunner {
    match scheduler().and_then(|s| s.get_default_group()) {
        Ok(group) => RuntimeRunner::Group(group),
        Err(_) => default_runner(),
    }
}
