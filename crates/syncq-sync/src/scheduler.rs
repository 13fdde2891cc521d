//! Auto-commit timer
//!
//! A single-shot timer armed by every enqueue. Arming again replaces the
//! previous deadline, so the interval always counts from the most recent
//! enqueue and timers never stack.
//!
//! ```text
//! enqueue ──arm──► [sleep interval] ──fire──► spawn(task)
//! enqueue ──arm──► abort previous, start again
//! ```
//!
//! The fired task runs on its own tokio task; cancelling or re-arming the
//! timer from inside it only aborts the finished sleep.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use syncq_core::domain::ClientApiError;

/// Work run when the timer fires
pub type TimerTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

pub struct AutoCommitTimer {
    enabled: AtomicBool,
    interval: Mutex<Duration>,
    armed: Mutex<Option<JoinHandle<()>>>,
}

impl AutoCommitTimer {
    pub fn new(enabled: bool, interval: Duration) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            interval: Mutex::new(interval),
            armed: Mutex::new(None),
        }
    }

    /// Converts a configured interval, rejecting negative and non-finite values
    pub fn interval_from_secs(seconds: f64) -> Result<Duration, ClientApiError> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(ClientApiError::BadAutoCommitInterval { seconds });
        }
        Ok(Duration::from_secs_f64(seconds))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Enables or disables auto-commit; disabling cancels a pending deadline
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
        if !enabled {
            self.cancel();
        }
    }

    pub fn interval(&self) -> Duration {
        *self
            .interval
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Changes the interval used by the next `arm`
    pub fn set_interval(&self, interval: Duration) {
        *self
            .interval
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = interval;
    }

    /// Starts (or restarts) the countdown to `task`
    ///
    /// Returns `false` without arming when auto-commit is disabled.
    pub fn arm(&self, task: TimerTask) -> bool {
        if !self.is_enabled() {
            return false;
        }
        let interval = self.interval();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            debug!("Auto-commit timer fired");
            tokio::spawn(task);
        });

        let mut armed = self
            .armed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = armed.replace(handle) {
            previous.abort();
        }
        debug!(interval_ms = interval.as_millis() as u64, "Auto-commit timer armed");
        true
    }

    /// Cancels a pending deadline, if any
    pub fn cancel(&self) {
        let previous = self
            .armed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = previous {
            handle.abort();
        }
    }

    /// Returns true while a deadline is pending
    pub fn is_armed(&self) -> bool {
        self.armed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map_or(false, |h| !h.is_finished())
    }
}

impl Drop for AutoCommitTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;
    use std::sync::Arc;

    use super::*;

    fn counting_task(counter: &Arc<AtomicU32>) -> TimerTask {
        let counter = counter.clone();
        Box::pin(async move {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_interval_validation() {
        assert_eq!(
            AutoCommitTimer::interval_from_secs(1.5).unwrap(),
            Duration::from_millis(1500)
        );
        assert_eq!(
            AutoCommitTimer::interval_from_secs(0.0).unwrap(),
            Duration::ZERO
        );
        assert!(matches!(
            AutoCommitTimer::interval_from_secs(-0.5),
            Err(ClientApiError::BadAutoCommitInterval { .. })
        ));
        assert!(AutoCommitTimer::interval_from_secs(f64::INFINITY).is_err());
    }

    #[tokio::test]
    async fn test_disabled_timer_does_not_arm() {
        let timer = AutoCommitTimer::new(false, Duration::from_millis(1));
        let counter = Arc::new(AtomicU32::new(0));

        assert!(!timer.arm(counting_task(&counter)));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timer_fires_once() {
        let timer = AutoCommitTimer::new(true, Duration::from_millis(10));
        let counter = Arc::new(AtomicU32::new(0));

        assert!(timer.arm(counting_task(&counter)));
        assert!(timer.is_armed());
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert!(!timer.is_armed());
    }

    #[tokio::test]
    async fn test_rearming_replaces_previous_deadline() {
        let timer = AutoCommitTimer::new(true, Duration::from_millis(40));
        let counter = Arc::new(AtomicU32::new(0));

        timer.arm(counting_task(&counter));
        tokio::time::sleep(Duration::from_millis(10)).await;
        timer.arm(counting_task(&counter));
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_and_disable() {
        let timer = AutoCommitTimer::new(true, Duration::from_millis(20));
        let counter = Arc::new(AtomicU32::new(0));

        timer.arm(counting_task(&counter));
        timer.cancel();
        timer.arm(counting_task(&counter));
        timer.set_enabled(false);
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert!(!timer.is_enabled());
    }
}
