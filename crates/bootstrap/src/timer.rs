//! Timer facility handed out to resource adapters.

use connector_core::TimerId;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// No timer can be created right now.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnavailableError {
    /// Every timer slot is taken; retry after a timer is cancelled or dropped
    #[error("all {limit} timers are in use, retry later")]
    LimitReached {
        /// Configured number of timers
        limit: usize,
    },

    /// The runtime is shutting down
    #[error("timer facility is shutting down")]
    ShuttingDown,
}

/// Errors scheduling on a [`Timer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum TimerError {
    /// The timer was cancelled
    #[error("timer already cancelled")]
    Cancelled,

    /// Periodic tasks need a non-zero period
    #[error("period must be greater than zero")]
    ZeroPeriod,
}

/// Creates timers up to a fixed limit.
#[derive(Debug, Clone)]
pub struct TimerFactory {
    slots: Arc<Semaphore>,
    limit: usize,
    shutdown: CancellationToken,
}

impl TimerFactory {
    /// Create a factory allowing `limit` live timers.
    pub fn new(limit: usize) -> Self {
        let limit = limit.min(Semaphore::MAX_PERMITS);
        Self {
            slots: Arc::new(Semaphore::new(limit)),
            limit,
            shutdown: CancellationToken::new(),
        }
    }

    /// Create a timer, or report that none is available.
    pub fn create(&self) -> Result<Timer, UnavailableError> {
        let slot = Arc::clone(&self.slots)
            .try_acquire_owned()
            .map_err(|e| match e {
                TryAcquireError::Closed => UnavailableError::ShuttingDown,
                TryAcquireError::NoPermits => UnavailableError::LimitReached { limit: self.limit },
            })?;

        let timer = Timer {
            id: TimerId::new(),
            cancel: self.shutdown.child_token(),
            _slot: slot,
        };
        debug!("Created {}", timer.id);
        Ok(timer)
    }

    /// Timers currently alive.
    pub fn in_use(&self) -> usize {
        self.limit - self.slots.available_permits()
    }

    /// Cancel every timer and refuse new ones.
    pub fn close(&self) {
        info!("Closing timer facility");
        self.slots.close();
        self.shutdown.cancel();
    }
}

/// Schedules one-shot and periodic tasks on the async runtime.
///
/// Dropping the timer cancels its tasks and frees its slot.
#[derive(Debug)]
pub struct Timer {
    id: TimerId,
    cancel: CancellationToken,
    _slot: OwnedSemaphorePermit,
}

impl Timer {
    /// Timer identifier.
    pub fn id(&self) -> TimerId {
        self.id
    }

    /// Run `task` once after `delay`.
    pub fn schedule<F, Fut>(&self, delay: Duration, task: F) -> Result<(), TimerError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(TimerError::Cancelled);
        }

        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => task().await,
            }
        });
        Ok(())
    }

    /// Run `task` after `delay`, then every `period`. Missed runs are caught
    /// up so the long-run rate stays fixed.
    pub fn schedule_at_fixed_rate<F, Fut>(
        &self,
        delay: Duration,
        period: Duration,
        mut task: F,
    ) -> Result<(), TimerError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(TimerError::Cancelled);
        }
        if period.is_zero() {
            return Err(TimerError::ZeroPeriod);
        }

        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + delay;
            let mut ticks = tokio::time::interval_at(start, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Burst);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticks.tick() => task().await,
                }
            }
        });
        Ok(())
    }

    /// Cancel all pending and periodic tasks of this timer.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Cancelled {}", self.id);
        }
        self.cancel.cancel();
    }

    /// Whether the timer was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_limit_is_recoverable() {
        let factory = TimerFactory::new(1);
        let timer = factory.create().unwrap();

        assert_eq!(
            factory.create().unwrap_err(),
            UnavailableError::LimitReached { limit: 1 }
        );
        assert_eq!(factory.in_use(), 1);

        drop(timer);
        assert!(factory.create().is_ok());
    }

    #[test]
    fn test_closed_factory_refuses() {
        let factory = TimerFactory::new(2);
        factory.close();
        assert_eq!(factory.create().unwrap_err(), UnavailableError::ShuttingDown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_shot_runs_after_delay() {
        let factory = TimerFactory::new(1);
        let timer = factory.create().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        timer
            .schedule(Duration::from_millis(100), move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_rate_stops_on_cancel() {
        let factory = TimerFactory::new(1);
        let timer = factory.create().unwrap();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);

        timer
            .schedule_at_fixed_rate(Duration::ZERO, Duration::from_millis(10), move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(35)).await;
        let seen = fired.load(Ordering::SeqCst);
        assert!(seen >= 3, "expected at least 3 runs, got {}", seen);

        timer.cancel();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let after = fired.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fired.load(Ordering::SeqCst), after);
        assert_eq!(timer.schedule(Duration::ZERO, || async {}), Err(TimerError::Cancelled));
    }

    #[tokio::test]
    async fn test_zero_period_is_refused() {
        let factory = TimerFactory::new(1);
        let timer = factory.create().unwrap();
        assert_eq!(
            timer.schedule_at_fixed_rate(Duration::ZERO, Duration::ZERO, || async {}),
            Err(TimerError::ZeroPeriod)
        );
    }
}
