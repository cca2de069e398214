//! Lock provider that keeps locks alive while they are held.
//!
//! Halfway through `lock_at_most_for` a background task extends the lock for
//! another `lock_at_most_for`, until the lock is released or an extension
//! fails. If the process dies the lock expires after `lock_at_most_for` as
//! usual, so long running tasks no longer need a generous upper bound.
//!
//! Short `lock_at_most_for` values are rejected: the extension would be
//! attempted too close to expiry to be reliable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{trace, warn};

use crate::domain::LockConfiguration;
use crate::error::{LockError, LockResult};
use crate::service::provider::{LockProvider, SimpleLock};

/// Default smallest `lock_at_most_for` accepted.
pub const DEFAULT_MIN_LOCK_AT_MOST_FOR: Duration = Duration::from_secs(30);

/// Stand-in for deadlines past the range of [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// `from + by`, or a far-future instant when that is not representable.
fn deadline(from: Instant, by: Duration) -> Instant {
    from.checked_add(by).unwrap_or_else(|| from + FAR_FUTURE)
}

/// Wraps a provider whose locks can be extended.
pub struct KeepAliveLockProvider {
    inner: Arc<dyn LockProvider>,
    min_lock_at_most_for: Duration,
}

impl KeepAliveLockProvider {
    /// Wrap `inner` with the default minimum `lock_at_most_for`.
    #[must_use]
    pub fn new(inner: Arc<dyn LockProvider>) -> Self {
        Self::with_min_lock_at_most_for(inner, DEFAULT_MIN_LOCK_AT_MOST_FOR)
    }

    /// Wrap `inner`, rejecting locks with `lock_at_most_for` below `min`.
    #[must_use]
    pub fn with_min_lock_at_most_for(inner: Arc<dyn LockProvider>, min: Duration) -> Self {
        Self {
            inner,
            min_lock_at_most_for: min,
        }
    }
}

#[async_trait]
impl LockProvider for KeepAliveLockProvider {
    async fn try_lock(
        &self,
        config: &LockConfiguration,
    ) -> LockResult<Option<Box<dyn SimpleLock>>> {
        if config.lock_at_most_for() < self.min_lock_at_most_for {
            return Err(LockError::InvalidConfiguration(format!(
                "keep-alive needs lock_at_most_for of at least {:?}, '{}' has {:?}",
                self.min_lock_at_most_for,
                config.name(),
                config.lock_at_most_for()
            )));
        }
        if (config.lock_at_most_for() / 2).is_zero() {
            return Err(LockError::InvalidConfiguration(format!(
                "lock '{}' is too short to be kept alive",
                config.name()
            )));
        }

        Ok(self
            .inner
            .try_lock(config)
            .await?
            .map(|lock| Box::new(KeepAliveLock::start(config.clone(), lock)) as Box<dyn SimpleLock>))
    }
}

struct KeepAliveState {
    lock: Box<dyn SimpleLock>,
    active: bool,
    remaining_lock_at_least_for: Duration,
    lock_at_most_until: Instant,
}

/// Lock handle renewed in the background.
pub struct KeepAliveLock {
    config: LockConfiguration,
    state: Arc<Mutex<KeepAliveState>>,
    task: JoinHandle<()>,
}

impl KeepAliveLock {
    fn start(config: LockConfiguration, lock: Box<dyn SimpleLock>) -> Self {
        let acquired_at = Instant::now();
        let period = config.lock_at_most_for() / 2;

        // the schedule starts at acquisition, not when the task is first polled
        let mut interval = tokio::time::interval_at(deadline(acquired_at, period), period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let state = Arc::new(Mutex::new(KeepAliveState {
            lock,
            active: true,
            remaining_lock_at_least_for: config.lock_at_least_for(),
            lock_at_most_until: deadline(acquired_at, config.lock_at_most_for()),
        }));

        let task = tokio::spawn(keep_alive(Arc::clone(&state), config.clone(), interval));

        Self {
            config,
            state,
            task,
        }
    }
}

async fn keep_alive(
    state: Arc<Mutex<KeepAliveState>>,
    config: LockConfiguration,
    mut interval: Interval,
) {
    let lock_at_most_for = config.lock_at_most_for();
    let period = interval.period();

    loop {
        interval.tick().await;

        let mut state = state.lock().await;
        if !state.active {
            return;
        }

        let now = Instant::now();
        if state.lock_at_most_until < now {
            // someone else may hold it by now
            warn!(lock = config.name(), "Can't extend lock, it has already expired");
            state.active = false;
            return;
        }

        state.remaining_lock_at_least_for = state.remaining_lock_at_least_for.saturating_sub(period);
        state.lock_at_most_until = deadline(now, lock_at_most_for);
        let lock_at_least_for = state.remaining_lock_at_least_for;

        match state.lock.extend(lock_at_most_for, lock_at_least_for).await {
            Ok(true) => {
                trace!(lock = config.name(), until = ?lock_at_most_for, "Lock extended");
            }
            Ok(false) => {
                warn!(lock = config.name(), "Can't extend lock");
                state.active = false;
                return;
            }
            Err(e) => {
                warn!(lock = config.name(), error = %e, "Can't extend lock");
                state.active = false;
                return;
            }
        }
    }
}

#[async_trait]
impl SimpleLock for KeepAliveLock {
    fn name(&self) -> &str {
        self.config.name()
    }

    fn configuration(&self) -> &LockConfiguration {
        &self.config
    }

    async fn unlock(&mut self) -> LockResult<()> {
        let mut state = self.state.lock().await;
        state.active = false;
        self.task.abort();
        state.lock.unlock().await
    }

    async fn extend(&mut self, _: Duration, _: Duration) -> LockResult<bool> {
        Err(LockError::Unsupported(
            "manual extension of a keep-alive lock".to_string(),
        ))
    }
}

impl Drop for KeepAliveLock {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::domain::{Clock, HolderIdentity, ManualClock};
    use crate::service::StorageBasedLockProvider;
    use crate::storage::{MemoryStorage, StorageAccessor};

    fn setup() -> (KeepAliveLockProvider, MemoryStorage, ManualClock) {
        let clock = ManualClock::default();
        let storage = MemoryStorage::new(
            HolderIdentity::new("node-a").unwrap(),
            Arc::new(clock.clone()),
        );
        let provider = KeepAliveLockProvider::new(Arc::new(StorageBasedLockProvider::new(
            Arc::new(storage.clone()),
        )));
        (provider, storage, clock)
    }

    fn config(at_most: u64, at_least: u64) -> LockConfiguration {
        LockConfiguration::new(
            "report",
            Duration::from_secs(at_most),
            Duration::from_secs(at_least),
        )
        .unwrap()
    }

    async fn elapse(clock: &ManualClock, by: Duration) {
        clock.advance(by);
        tokio::time::advance(by).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_rejects_short_lock_at_most_for() {
        let (provider, _storage, _clock) = setup();
        let result = provider.try_lock(&config(29, 0)).await;
        assert!(matches!(result, Err(LockError::InvalidConfiguration(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_extends_every_half_period() {
        let (provider, storage, clock) = setup();
        let t0 = clock.now();
        let mut lock = provider.try_lock(&config(60, 0)).await.unwrap().unwrap();

        elapse(&clock, Duration::from_secs(30)).await;
        let record = storage.find_record("report").await.unwrap().unwrap();
        assert_eq!(record.lock_until, t0 + TimeDelta::seconds(90));

        elapse(&clock, Duration::from_secs(30)).await;
        let record = storage.find_record("report").await.unwrap().unwrap();
        assert_eq!(record.lock_until, t0 + TimeDelta::seconds(120));

        lock.unlock().await.unwrap();
        let record = storage.find_record("report").await.unwrap().unwrap();
        assert!(!record.is_held_at(clock.now()));

        elapse(&clock, Duration::from_secs(60)).await;
        let record = storage.find_record("report").await.unwrap().unwrap();
        assert_eq!(record.lock_until, t0 + TimeDelta::seconds(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_carries_remaining_lock_at_least_for() {
        let (provider, storage, clock) = setup();
        let t0 = clock.now();
        let mut lock = provider.try_lock(&config(60, 40)).await.unwrap().unwrap();

        elapse(&clock, Duration::from_secs(30)).await;
        clock.advance(Duration::from_secs(1));
        lock.unlock().await.unwrap();

        // extended at 30s with the 10s left of lock_at_least_for
        let record = storage.find_record("report").await.unwrap().unwrap();
        assert_eq!(record.locked_at, t0 + TimeDelta::seconds(30));
        assert_eq!(record.lock_until, t0 + TimeDelta::seconds(40));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_after_failed_extension() {
        let (provider, storage, clock) = setup();
        let _lock = provider.try_lock(&config(60, 0)).await.unwrap().unwrap();

        assert!(storage.remove_record("report"));
        elapse(&clock, Duration::from_secs(30)).await;
        assert!(storage.find_record("report").await.unwrap().is_none());

        let other = storage.with_holder(HolderIdentity::new("node-b").unwrap());
        assert!(other.insert_record(&config(60, 0)).await.unwrap());
        let before = other.find_record("report").await.unwrap().unwrap();

        elapse(&clock, Duration::from_secs(30)).await;
        let after = other.find_record("report").await.unwrap().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn test_rejects_zero_extension_period() {
        let clock = ManualClock::default();
        let storage = MemoryStorage::new(
            HolderIdentity::new("node-a").unwrap(),
            Arc::new(clock.clone()),
        );
        let provider = KeepAliveLockProvider::with_min_lock_at_most_for(
            Arc::new(StorageBasedLockProvider::new(Arc::new(storage.clone()))),
            Duration::ZERO,
        );

        for at_most in [Duration::ZERO, Duration::from_nanos(1)] {
            let config = LockConfiguration::new("report", at_most, Duration::ZERO).unwrap();
            let result = provider.try_lock(&config).await;
            assert!(matches!(result, Err(LockError::InvalidConfiguration(_))));
        }
        assert!(storage.find_record("report").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_lock_at_most_for() {
        let (provider, storage, clock) = setup();
        let config = LockConfiguration::new("report", Duration::MAX, Duration::ZERO).unwrap();
        let mut lock = provider.try_lock(&config).await.unwrap().unwrap();

        elapse(&clock, Duration::from_secs(3600)).await;
        let record = storage.find_record("report").await.unwrap().unwrap();
        assert!(record.is_held_at(clock.now()));

        lock.unlock().await.unwrap();
        let record = storage.find_record("report").await.unwrap().unwrap();
        assert!(!record.is_held_at(clock.now()));
    }

    #[test]
    fn test_deadline_saturates() {
        let now = Instant::now();
        assert_eq!(deadline(now, Duration::from_secs(1)), now + Duration::from_secs(1));
        assert_eq!(deadline(now, Duration::MAX), now + FAR_FUTURE);
    }

    #[tokio::test]
    async fn test_manual_extension_unsupported() {
        let (provider, _storage, _clock) = setup();
        let mut lock = provider.try_lock(&config(60, 0)).await.unwrap().unwrap();

        let result = lock.extend(Duration::from_secs(60), Duration::ZERO).await;
        assert!(matches!(result, Err(LockError::Unsupported(_))));
        lock.unlock().await.unwrap();
    }
}
