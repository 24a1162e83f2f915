//! Graceful shutdown signalling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::Notify;
use tracing::info;

/// Shutdown switch shared by every long-running task in the engine.
///
/// Pairs an atomic flag (cheap to check from hot loops like the bus
/// delivery path) with a [`Notify`], so sleeping tasks wake the instant
/// shutdown is requested rather than on their next poll.
pub struct ShutdownManager {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(true)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Request shutdown and wake every sleeper.
    pub fn trigger(&self) {
        self.flag.store(false, Ordering::Release);
        self.notify.notify_waiters();
    }

    /// Install a Ctrl+C handler that triggers shutdown.
    pub fn spawn_signal_handler(&self) {
        let flag = Arc::clone(&self.flag);
        let notify = Arc::clone(&self.notify);
        tokio::spawn(async move {
            if signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received, stopping");
                flag.store(false, Ordering::Release);
                notify.notify_waiters();
            }
        });
    }

    /// True while the process should keep running.
    pub fn is_running(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// The raw flag, for tasks that poll rather than sleep.
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    /// Sleep for `duration`, returning early the moment shutdown triggers.
    pub async fn interruptible_sleep(&self, duration: Duration) {
        // Register interest before re-checking the flag, so a trigger
        // landing between the check and the await cannot be missed
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if !self.is_running() {
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = &mut notified => {}
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_trigger_wakes_sleeper_immediately() {
        let manager = Arc::new(ShutdownManager::new());

        let trigger = Arc::clone(&manager);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.trigger();
        });

        let start = Instant::now();
        manager.interruptible_sleep(Duration::from_secs(60)).await;
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(!manager.is_running());
    }

    #[tokio::test]
    async fn test_sleep_runs_to_completion_while_running() {
        let manager = ShutdownManager::new();
        let start = Instant::now();
        manager.interruptible_sleep(Duration::from_millis(30)).await;
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(manager.is_running());
    }

    #[tokio::test]
    async fn test_sleep_after_trigger_returns_at_once() {
        let manager = ShutdownManager::new();
        manager.trigger();

        let start = Instant::now();
        manager.interruptible_sleep(Duration::from_secs(60)).await;
        assert!(start.elapsed() < Duration::from_secs(10));
    }
}
