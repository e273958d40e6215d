use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::AbortHandle;
use tracing::{debug, error};

use crate::error::{MipError, Result};

/// Unit of work handed to a dispatcher
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs SDK work off the calling thread
///
/// Cancellation is advisory: a cancelled task that has not started never
/// runs, a running task may complete. Cancelling an id that is unknown,
/// finished or already cancelled returns `false`.
pub trait TaskDispatcherDelegate: Send + Sync {
    fn dispatch_task(&self, task_id: &str, task: Task);

    fn dispatch_task_delayed(&self, task_id: &str, task: Task, delay: Duration);

    /// Run on a dedicated thread that is not shared with other tasks
    fn execute_task_on_independent_thread(&self, task_id: &str, task: Task);

    fn cancel_task(&self, task_id: &str) -> bool;

    /// Returns `true` if at least one pending task was cancelled
    fn cancel_all_tasks(&self) -> bool;
}

struct TaskEntry {
    generation: u64,
    cancelled: Arc<AtomicBool>,
    abort: Option<AbortHandle>,
}

type TaskMap = Arc<Mutex<HashMap<String, TaskEntry>>>;

fn finish(tasks: &TaskMap, task_id: &str, generation: u64) {
    let mut tasks = tasks.lock();
    if tasks.get(task_id).map(|e| e.generation) == Some(generation) {
        tasks.remove(task_id);
    }
}

/// Default dispatcher backed by a tokio runtime
pub struct TokioTaskDispatcher {
    runtime: Option<Runtime>,
    handle: Handle,
    tasks: TaskMap,
    next_generation: AtomicU64,
}

impl TokioTaskDispatcher {
    /// Dispatcher with its own small multi-threaded runtime
    pub fn new() -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("mip-dispatcher")
            .enable_time()
            .build()
            .map_err(|e| MipError::internal(format!("Failed to start task runtime: {}", e)))?;
        let handle = runtime.handle().clone();
        Ok(Self {
            runtime: Some(runtime),
            handle,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
        })
    }

    /// Dispatcher scheduling onto an existing runtime; it must have the time driver enabled
    pub fn with_handle(handle: Handle) -> Self {
        Self {
            runtime: None,
            handle,
            tasks: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Tasks dispatched but not yet finished or cancelled
    pub fn pending_tasks(&self) -> usize {
        self.tasks.lock().len()
    }

    fn register(&self, task_id: &str) -> (u64, Arc<AtomicBool>) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));
        self.tasks.lock().insert(
            task_id.to_string(),
            TaskEntry {
                generation,
                cancelled: cancelled.clone(),
                abort: None,
            },
        );
        (generation, cancelled)
    }

    fn spawn(&self, task_id: &str, task: Task, delay: Option<Duration>) {
        let (generation, cancelled) = self.register(task_id);
        let tasks = self.tasks.clone();
        let id = task_id.to_string();

        let join = self.handle.spawn(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if !cancelled.load(Ordering::SeqCst) {
                if let Err(e) = tokio::task::spawn_blocking(task).await {
                    error!(task_id = %id, "dispatched task failed: {}", e);
                }
            }
            finish(&tasks, &id, generation);
        });

        if let Some(entry) = self.tasks.lock().get_mut(task_id) {
            if entry.generation == generation {
                entry.abort = Some(join.abort_handle());
            }
        }
    }
}

impl TaskDispatcherDelegate for TokioTaskDispatcher {
    fn dispatch_task(&self, task_id: &str, task: Task) {
        debug!(task_id, "dispatching task");
        self.spawn(task_id, task, None);
    }

    fn dispatch_task_delayed(&self, task_id: &str, task: Task, delay: Duration) {
        debug!(task_id, delay_ms = delay.as_millis() as u64, "dispatching delayed task");
        self.spawn(task_id, task, Some(delay));
    }

    fn execute_task_on_independent_thread(&self, task_id: &str, task: Task) {
        let (generation, cancelled) = self.register(task_id);
        let tasks = self.tasks.clone();
        let id = task_id.to_string();
        let spawned = std::thread::Builder::new()
            .name(format!("mip-task-{}", task_id))
            .spawn(move || {
                if !cancelled.load(Ordering::SeqCst) {
                    task();
                }
                finish(&tasks, &id, generation);
            });
        if let Err(e) = spawned {
            error!(task_id, "failed to start task thread: {}", e);
            finish(&self.tasks, task_id, generation);
        }
    }

    fn cancel_task(&self, task_id: &str) -> bool {
        let Some(entry) = self.tasks.lock().remove(task_id) else {
            return false;
        };
        entry.cancelled.store(true, Ordering::SeqCst);
        if let Some(abort) = entry.abort {
            abort.abort();
        }
        debug!(task_id, "task cancelled");
        true
    }

    fn cancel_all_tasks(&self) -> bool {
        let drained: Vec<TaskEntry> = self.tasks.lock().drain().map(|(_, e)| e).collect();
        for entry in &drained {
            entry.cancelled.store(true, Ordering::SeqCst);
            if let Some(abort) = &entry.abort {
                abort.abort();
            }
        }
        !drained.is_empty()
    }
}

impl Drop for TokioTaskDispatcher {
    fn drop(&mut self) {
        self.cancel_all_tasks();
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
