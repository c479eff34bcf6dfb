//! Dual Countdown Latch
//!
//! Aggregates replica responses for one in-flight write. Two counters race:
//! `pending` (responses still outstanding) and `shortfall` (successful
//! acknowledgments still needed). Waiters are released as soon as either
//! counter reaches zero.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

#[derive(Debug)]
struct Counters {
    pending: i64,
    shortfall: i64,
}

impl Counters {
    fn released(&self) -> bool {
        self.pending <= 0 || self.shortfall <= 0
    }
}

/// Latch released when every response arrived or enough successes did
#[derive(Debug)]
pub struct DualCountdownLatch {
    counters: Mutex<Counters>,
    notify: Notify,
}

impl DualCountdownLatch {
    /// Create a latch waiting on `pending` responses or `shortfall` successes
    pub fn new(pending: usize, shortfall: usize) -> Self {
        Self {
            counters: Mutex::new(Counters {
                pending: pending as i64,
                shortfall: shortfall as i64,
            }),
            notify: Notify::new(),
        }
    }

    // Counters are plain integers, a poisoned lock still holds valid state.
    fn counters(&self) -> MutexGuard<'_, Counters> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record one replica response, successful or not
    pub fn count_down_pending(&self) {
        let crossed = {
            let mut counters = self.counters();
            counters.pending -= 1;
            counters.pending <= 0
        };
        if crossed {
            self.notify.notify_waiters();
        }
    }

    /// Record one successful replica acknowledgment
    pub fn count_down_shortfall(&self) {
        let crossed = {
            let mut counters = self.counters();
            counters.shortfall -= 1;
            counters.shortfall <= 0
        };
        if crossed {
            self.notify.notify_waiters();
        }
    }

    /// Whether `wait()` would return immediately
    pub fn is_released(&self) -> bool {
        self.counters().released()
    }

    /// Successful acknowledgments still missing
    pub fn remaining_shortfall(&self) -> usize {
        self.counters().shortfall.max(0) as usize
    }

    /// Responses still outstanding
    pub fn remaining_pending(&self) -> usize {
        self.counters().pending.max(0) as usize
    }

    /// Wait until `pending <= 0` or `shortfall <= 0`.
    ///
    /// There is no timeout: every pending slot must eventually be counted
    /// down, which `PendingGuard` guarantees for fan-out tasks.
    pub async fn wait(&self) {
        loop {
            // Register interest before checking so a notify between the
            // check and the await is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_released() {
                return;
            }

            notified.await;
        }
    }

    /// Hand out a guard that resolves one pending slot when dropped
    pub fn pending_guard(self: &Arc<Self>) -> PendingGuard {
        PendingGuard {
            latch: Arc::clone(self),
        }
    }
}

/// One replica's pending slot.
///
/// Dropping the guard counts `pending` down exactly once, whether the task
/// finished, returned early, panicked or was cancelled.
#[derive(Debug)]
pub struct PendingGuard {
    latch: Arc<DualCountdownLatch>,
}

impl PendingGuard {
    /// Record a successful acknowledgment for this replica
    pub fn acknowledge(&self) {
        self.latch.count_down_shortfall();
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.latch.count_down_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_zero_shortfall_returns_immediately() {
        let latch = DualCountdownLatch::new(2, 0);
        assert!(latch.is_released());
        timeout(WAIT, latch.wait()).await.unwrap();
        assert_eq!(latch.remaining_pending(), 2);
    }

    #[tokio::test]
    async fn test_zero_replicas_returns_immediately() {
        let latch = DualCountdownLatch::new(0, 1);
        timeout(WAIT, latch.wait()).await.unwrap();
        assert_eq!(latch.remaining_shortfall(), 1);
    }

    #[tokio::test]
    async fn test_released_by_successes() {
        let latch = Arc::new(DualCountdownLatch::new(3, 2));
        let waiter = tokio::spawn({
            let latch = Arc::clone(&latch);
            async move { latch.wait().await }
        });

        latch.count_down_shortfall();
        latch.count_down_pending();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        latch.count_down_shortfall();
        timeout(WAIT, waiter).await.unwrap().unwrap();
        assert_eq!(latch.remaining_shortfall(), 0);
        assert_eq!(latch.remaining_pending(), 2);
    }

    #[tokio::test]
    async fn test_released_by_failures() {
        let latch = Arc::new(DualCountdownLatch::new(2, 2));
        let waiter = tokio::spawn({
            let latch = Arc::clone(&latch);
            async move { latch.wait().await }
        });

        latch.count_down_shortfall();
        latch.count_down_pending();
        latch.count_down_pending();

        timeout(WAIT, waiter).await.unwrap().unwrap();
        assert_eq!(latch.remaining_shortfall(), 1);
    }

    #[tokio::test]
    async fn test_guard_counts_down_once_on_drop() {
        let latch = Arc::new(DualCountdownLatch::new(2, 2));
        {
            let guard = latch.pending_guard();
            guard.acknowledge();
        }
        assert_eq!(latch.remaining_pending(), 1);
        assert_eq!(latch.remaining_shortfall(), 1);
    }

    #[tokio::test]
    async fn test_guard_survives_panicking_task() {
        let latch = Arc::new(DualCountdownLatch::new(1, 1));
        let guard = latch.pending_guard();
        let task = tokio::spawn(async move {
            let _guard = guard;
            panic!("replica task failed");
        });
        assert!(task.await.is_err());

        timeout(WAIT, latch.wait()).await.unwrap();
        assert_eq!(latch.remaining_pending(), 0);
        assert_eq!(latch.remaining_shortfall(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_count_down() {
        let latch = Arc::new(DualCountdownLatch::new(64, 64));
        let waiter = tokio::spawn({
            let latch = Arc::clone(&latch);
            async move { latch.wait().await }
        });

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let guard = latch.pending_guard();
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        guard.acknowledge();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        timeout(WAIT, waiter).await.unwrap().unwrap();
        assert_eq!(latch.remaining_pending(), 0);
        assert_eq!(latch.remaining_shortfall(), 32);
    }
}
