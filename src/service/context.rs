//! Locks active in the current task.
//!
//! [`LockingTaskExecutor`](crate::service::LockingTaskExecutor) runs each
//! locked task inside a task-local scope holding the stack of locks the task
//! runs under. The innermost lock is the one `extend_active_lock` renews.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::error::{LockError, LockResult};
use crate::service::provider::SimpleLock;

/// A lock shared between the executor and the task it guards.
pub type SharedLock = Arc<Mutex<Box<dyn SimpleLock>>>;

#[derive(Clone)]
struct ActiveLock {
    name: Arc<str>,
    lock: SharedLock,
}

tokio::task_local! {
    static ACTIVE_LOCKS: Vec<ActiveLock>;
}

/// Run `future` with `lock` pushed on top of the current task's lock stack.
pub(crate) async fn scope<F>(name: &str, lock: SharedLock, future: F) -> F::Output
where
    F: Future,
{
    let mut stack = ACTIVE_LOCKS.try_with(Clone::clone).unwrap_or_default();
    stack.push(ActiveLock {
        name: Arc::from(name),
        lock,
    });
    ACTIVE_LOCKS.scope(stack, future).await
}

/// Whether the current task runs under the lock `name`.
#[must_use]
pub fn is_locked(name: &str) -> bool {
    ACTIVE_LOCKS
        .try_with(|stack| stack.iter().any(|active| &*active.name == name))
        .unwrap_or(false)
}

/// Fail unless the current task runs under a lock.
///
/// # Errors
///
/// Returns [`LockError::NoActiveLock`] outside a locked task.
pub fn assert_locked() -> LockResult<()> {
    let locked = ACTIVE_LOCKS
        .try_with(|stack| !stack.is_empty())
        .unwrap_or(false);

    if locked {
        Ok(())
    } else {
        Err(LockError::NoActiveLock)
    }
}

/// Extend the innermost lock of the current task.
///
/// # Errors
///
/// Returns [`LockError::NoActiveLock`] outside a locked task and
/// [`LockError::CannotExtend`] if the lock has expired or was taken over.
pub async fn extend_active_lock(
    lock_at_most_for: Duration,
    lock_at_least_for: Duration,
) -> LockResult<()> {
    let active = ACTIVE_LOCKS
        .try_with(|stack| stack.last().cloned())
        .ok()
        .flatten()
        .ok_or(LockError::NoActiveLock)?;

    let extended = active
        .lock
        .lock()
        .await
        .extend(lock_at_most_for, lock_at_least_for)
        .await?;

    if extended {
        Ok(())
    } else {
        Err(LockError::CannotExtend(active.name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_active_lock_outside_scope() {
        let err = tokio_test::assert_err!(assert_locked());
        assert!(matches!(err, LockError::NoActiveLock));
        assert!(!is_locked("report"));
    }

    #[tokio::test]
    async fn test_extend_outside_scope() {
        let err =
            tokio_test::assert_err!(extend_active_lock(Duration::from_secs(10), Duration::ZERO).await);
        assert!(matches!(err, LockError::NoActiveLock));
    }
}
