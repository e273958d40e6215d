//! One async model for every long-running SDK operation
//!
//! `x_async` methods dispatch their work on the profile's
//! [`TaskDispatcherDelegate`] and immediately return an [`AsyncOperation`]:
//! a future resolving to the operation's `Result`, paired with an
//! [`AsyncControl`] that can cancel it.
//!
//! ```no_run
//! # use infoprotect::prelude::*;
//! # async fn example(profile: std::sync::Arc<ProtectionProfile>) -> infoprotect::Result<()> {
//! let operation = profile.list_engines_async();
//! let control = operation.control();
//! let _engines = operation.await?;
//! assert!(!control.cancel()); // already finished
//! # Ok(())
//! # }
//! ```

use std::any::Any;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Sleep;

use crate::delegates::TaskDispatcherDelegate;
use crate::error::{MipError, Result};

/// Opaque application value passed through to delegates
pub type OperationContext = Arc<dyn Any + Send + Sync>;

/// Cancellation handle of a dispatched operation
#[derive(Clone)]
pub struct AsyncControl {
    task_id: String,
    cancelled: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    dispatcher: Arc<dyn TaskDispatcherDelegate>,
}

impl AsyncControl {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Request cancellation; returns `false` if the operation already
    /// finished or was already cancelled
    pub fn cancel(&self) -> bool {
        if self.finished.load(Ordering::SeqCst) || self.cancelled.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.dispatcher.cancel_task(&self.task_id);
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for AsyncControl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncControl")
            .field("task_id", &self.task_id)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Future of a dispatched operation
#[must_use = "operations do nothing observable unless awaited"]
pub struct AsyncOperation<T> {
    control: AsyncControl,
    receiver: oneshot::Receiver<Result<T>>,
    timeout: Option<Duration>,
    deadline: Option<Pin<Box<Sleep>>>,
}

impl<T> AsyncOperation<T> {
    pub fn control(&self) -> AsyncControl {
        self.control.clone()
    }

    /// Cancel the operation when it has not finished `timeout` after it is
    /// first awaited. Only enforced inside a tokio runtime.
    #[must_use]
    pub fn within(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self.deadline = None;
        self
    }

    pub fn cancel(&self) -> bool {
        self.control.cancel()
    }
}

impl<T> Future for AsyncOperation<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(result)) => return Poll::Ready(result),
            Poll::Ready(Err(_)) => {
                return Poll::Ready(Err(MipError::operation_cancelled(format!(
                    "Operation {} was cancelled before completing",
                    self.control.task_id
                ))))
            }
            Poll::Pending => {}
        }

        let this = self.get_mut();
        if this.deadline.is_none() {
            if let Some(timeout) = this.timeout {
                if tokio::runtime::Handle::try_current().is_ok() {
                    this.deadline = Some(Box::pin(tokio::time::sleep(timeout)));
                }
            }
        }
        let Some(deadline) = this.deadline.as_mut() else {
            return Poll::Pending;
        };
        match deadline.as_mut().poll(cx) {
            Poll::Ready(()) => {
                this.control.cancel();
                let millis = this.timeout.map(|t| t.as_millis()).unwrap_or_default();
                tracing::warn!(task = %this.control.task_id, millis = millis as u64, "operation timed out");
                Poll::Ready(Err(MipError::operation_cancelled(format!(
                    "Operation {} did not finish within {} ms",
                    this.control.task_id, millis
                ))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Run `work` on `dispatcher` and hand back its future
pub(crate) fn dispatch<T, F>(
    dispatcher: &Arc<dyn TaskDispatcherDelegate>,
    operation: &str,
    work: F,
) -> AsyncOperation<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let task_id = format!("{}-{}", operation, uuid::Uuid::new_v4());
    let (sender, receiver) = oneshot::channel();
    let cancelled = Arc::new(AtomicBool::new(false));
    let finished = Arc::new(AtomicBool::new(false));

    let task_cancelled = cancelled.clone();
    let task_finished = finished.clone();
    let name = task_id.clone();
    dispatcher.dispatch_task(
        &task_id,
        Box::new(move || {
            let result = if task_cancelled.load(Ordering::SeqCst) {
                Err(MipError::operation_cancelled(format!(
                    "Operation {} was cancelled before it started",
                    name
                )))
            } else {
                work()
            };
            task_finished.store(true, Ordering::SeqCst);
            let _ = sender.send(result);
        }),
    );

    AsyncOperation {
        control: AsyncControl {
            task_id,
            cancelled,
            finished,
            dispatcher: dispatcher.clone(),
        },
        receiver,
        timeout: None,
        deadline: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delegates::{Task, TokioTaskDispatcher};
    use crate::error::ErrorKind;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Holds tasks until released so tests control ordering
    #[derive(Default)]
    struct ManualDispatcher {
        queue: Mutex<Vec<(String, Task)>>,
    }

    impl ManualDispatcher {
        fn run_all(&self) {
            let tasks: Vec<_> = self.queue.lock().drain(..).collect();
            for (_, task) in tasks {
                task();
            }
        }
    }

    impl TaskDispatcherDelegate for ManualDispatcher {
        fn dispatch_task(&self, task_id: &str, task: Task) {
            self.queue.lock().push((task_id.to_string(), task));
        }
        fn dispatch_task_delayed(&self, task_id: &str, task: Task, _delay: Duration) {
            self.dispatch_task(task_id, task);
        }
        fn execute_task_on_independent_thread(&self, task_id: &str, task: Task) {
            self.dispatch_task(task_id, task);
        }
        fn cancel_task(&self, _task_id: &str) -> bool {
            false
        }
        fn cancel_all_tasks(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn test_operation_resolves_with_result() -> Result<()> {
        let dispatcher: Arc<dyn TaskDispatcherDelegate> = Arc::new(TokioTaskDispatcher::new()?);
        let value = dispatch(&dispatcher, "answer", || Ok(42)).await?;
        assert_eq!(value, 42);
        Ok(())
    }

    #[tokio::test]
    async fn test_errors_cross_the_dispatch_boundary() -> Result<()> {
        let dispatcher: Arc<dyn TaskDispatcherDelegate> = Arc::new(TokioTaskDispatcher::new()?);
        let err = dispatch::<(), _>(&dispatcher, "fail", || {
            Err(MipError::label_not_found("missing").with_debug_info("LabelId", "x"))
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LabelNotFound);
        assert_eq!(err.debug_info()["LabelId"], "x");
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_before_start_yields_operation_cancelled() {
        let manual = Arc::new(ManualDispatcher::default());
        let dispatcher: Arc<dyn TaskDispatcherDelegate> = manual.clone();
        let operation = dispatch(&dispatcher, "slow", || Ok("done"));
        assert!(operation.cancel());
        assert!(!operation.cancel());
        manual.run_all();
        let err = operation.await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperationCancelled);
    }

    #[tokio::test]
    async fn test_timeout_cancels_a_stalled_operation() {
        let manual = Arc::new(ManualDispatcher::default());
        let dispatcher: Arc<dyn TaskDispatcherDelegate> = manual.clone();
        let operation = dispatch(&dispatcher, "stalled", || Ok(())).within(Some(Duration::from_millis(20)));
        let control = operation.control();
        let err = operation.await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OperationCancelled);
        assert!(control.is_cancelled());
        manual.run_all();
    }

    #[tokio::test]
    async fn test_timeout_leaves_fast_operations_alone() -> Result<()> {
        let dispatcher: Arc<dyn TaskDispatcherDelegate> = Arc::new(TokioTaskDispatcher::new()?);
        let value = dispatch(&dispatcher, "quick", || Ok(7))
            .within(Some(Duration::from_secs(30)))
            .await?;
        assert_eq!(value, 7);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_after_completion_returns_false() -> Result<()> {
        let manual = Arc::new(ManualDispatcher::default());
        let dispatcher: Arc<dyn TaskDispatcherDelegate> = manual.clone();
        let operation = dispatch(&dispatcher, "fast", || Ok(1));
        let control = operation.control();
        manual.run_all();
        assert_eq!(operation.await?, 1);
        assert!(!control.cancel());
        assert!(!control.is_cancelled());
        Ok(())
    }
}
