//! Run a task only while holding its lock.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::domain::LockConfiguration;
use crate::error::LockResult;
use crate::service::context;
use crate::service::provider::LockProvider;

/// What happened to a task handed to [`LockingTaskExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome<T> {
    /// The lock was acquired and the task ran to completion.
    Executed(T),
    /// The lock is held elsewhere; the task did not run.
    Skipped,
}

impl<T> TaskOutcome<T> {
    /// Whether the task ran.
    #[must_use]
    pub const fn was_executed(&self) -> bool {
        matches!(self, Self::Executed(_))
    }

    /// The task result, if it ran.
    pub fn into_result(self) -> Option<T> {
        match self {
            Self::Executed(value) => Some(value),
            Self::Skipped => None,
        }
    }
}

/// Executes tasks under a lock obtained from a [`LockProvider`].
#[derive(Clone)]
pub struct LockingTaskExecutor {
    provider: Arc<dyn LockProvider>,
}

impl LockingTaskExecutor {
    /// Create an executor using `provider`.
    #[must_use]
    pub fn new(provider: Arc<dyn LockProvider>) -> Self {
        Self { provider }
    }

    /// Run `task` if the lock can be acquired, then release it.
    ///
    /// A task already running under the same lock name runs nested tasks
    /// directly. The lock is released after the task completes; a failed
    /// release is logged, since the task's result is already final.
    ///
    /// # Errors
    ///
    /// Returns an error if acquisition failed with a storage fault. The task
    /// is not run in that case.
    pub async fn execute_with_lock<F>(
        &self,
        config: &LockConfiguration,
        task: F,
    ) -> LockResult<TaskOutcome<F::Output>>
    where
        F: Future,
    {
        if context::is_locked(config.name()) {
            debug!(lock = config.name(), "Already locked by the current task");
            return Ok(TaskOutcome::Executed(task.await));
        }

        let Some(lock) = self.provider.try_lock(config).await? else {
            debug!(lock = config.name(), "Not executing, lock is held elsewhere");
            return Ok(TaskOutcome::Skipped);
        };

        let lock = Arc::new(Mutex::new(lock));
        debug!(lock = config.name(), "Executing task");
        let output = context::scope(config.name(), Arc::clone(&lock), task).await;

        if let Err(e) = lock.lock().await.unlock().await {
            error!(lock = config.name(), error = %e, "Failed to release lock after task");
        }

        Ok(TaskOutcome::Executed(output))
    }
}
