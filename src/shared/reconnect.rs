//! Reconnection back-off and cancellable timers.
//!
//! The coordinator keeps one [`Backoff`] per active target and arms a
//! [`ReconnectTimer`] for each scheduled attempt. Timers are explicit handles:
//! cancelling (or dropping) one guarantees its callback never runs, even if the
//! sleep already elapsed.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Reconnection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub base_delay: Duration,

    /// Maximum delay between reconnection attempts.
    pub max_delay: Duration,

    /// Reconnect attempts allowed before giving up. The failure after the
    /// last attempt is final.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl ReconnectConfig {
    /// Delay before the given one-based attempt.
    ///
    /// The delay doubles from `base_delay` and is capped at `max_delay`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use pigeon::shared::reconnect::ReconnectConfig;
    /// use std::time::Duration;
    ///
    /// let config = ReconnectConfig::default();
    /// let delays: Vec<u64> = (1..=7).map(|n| config.delay_for(n).as_secs()).collect();
    /// assert_eq!(delays, vec![1, 2, 4, 8, 16, 30, 30]);
    /// ```
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Consecutive-failure counter for one target.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: ReconnectConfig,
    attempt: u32,
}

impl Backoff {
    /// Create a counter at attempt zero.
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Failures counted since the last reset.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Whether another reconnect attempt is allowed.
    pub fn can_retry(&self) -> bool {
        self.attempt < self.config.max_attempts
    }

    /// Start over, after a successful connect or a received event.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Count a failure and return the reconnect attempt it leads to, with
    /// its delay.
    ///
    /// Returns `None` once all `max_attempts` attempts have been used.
    pub fn next_attempt(&mut self) -> Option<(u32, Duration)> {
        if !self.can_retry() {
            return None;
        }
        self.attempt += 1;
        Some((self.attempt, self.config.delay_for(self.attempt)))
    }

    /// The configuration in use.
    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }
}

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// A cancellable one-shot timer.
///
/// The callback runs at most once, and never after [`cancel`](Self::cancel)
/// or after the handle is dropped.
pub struct ReconnectTimer {
    id: u64,
    cancelled: Arc<AtomicBool>,
    fired: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl ReconnectTimer {
    /// Arm a timer that calls `on_fire` after `delay`.
    pub fn start<F>(delay: Duration, on_fire: F) -> Self
    where
        F: FnOnce(u64) + Send + 'static,
    {
        let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
        let cancelled = Arc::new(AtomicBool::new(false));
        let fired = Arc::new(AtomicBool::new(false));

        let task = {
            let cancelled = cancelled.clone();
            let fired = fired.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if cancelled.load(Ordering::Acquire) {
                    debug!(timer = id, "Reconnect timer cancelled before firing");
                    return;
                }
                fired.store(true, Ordering::Release);
                on_fire(id);
            })
        };

        Self {
            id,
            cancelled,
            fired,
            task,
        }
    }

    /// Identifier passed to the callback.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Invalidate the timer.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.task.abort();
    }

    /// Whether the timer is still waiting to fire.
    pub fn is_pending(&self) -> bool {
        !self.cancelled.load(Ordering::Acquire) && !self.fired.load(Ordering::Acquire)
    }
}

impl Drop for ReconnectTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for ReconnectTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconnectTimer")
            .field("id", &self.id)
            .field("pending", &self.is_pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_exponential_backoff() {
        let config = ReconnectConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            max_attempts: 10,
        };

        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(200));
        assert_eq!(config.delay_for(3), Duration::from_millis(400));

        // Should cap at max delay
        assert_eq!(config.delay_for(10), Duration::from_secs(1));
        assert_eq!(config.delay_for(u32::MAX), Duration::from_secs(1));
    }

    #[test]
    fn test_default_sequence() {
        let config = ReconnectConfig::default();
        let delays: Vec<Duration> = (1..=7).map(|n| config.delay_for(n)).collect();
        let expected: Vec<Duration> = [1, 2, 4, 8, 16, 30, 30]
            .into_iter()
            .map(Duration::from_secs)
            .collect();
        assert_eq!(delays, expected);
    }

    #[test]
    fn test_retry_limit() {
        let mut backoff = Backoff::new(ReconnectConfig::default());

        for expected in 1..=10 {
            assert!(backoff.can_retry());
            let (attempt, _) = backoff.next_attempt().unwrap();
            assert_eq!(attempt, expected);
        }

        // The failure after the tenth attempt is final
        assert!(!backoff.can_retry());
        assert_eq!(backoff.next_attempt(), None);
        assert_eq!(backoff.attempt(), 10);
        assert_eq!(backoff.next_attempt(), None);
        assert_eq!(backoff.attempt(), 10);

        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert!(backoff.can_retry());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_once() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let timer = ReconnectTimer::start(Duration::from_secs(2), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timer.is_pending());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!timer.is_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        let timer = ReconnectTimer::start(Duration::from_secs(2), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        timer.cancel();
        assert!(!timer.is_pending());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_timer_never_fires() {
        let count = Arc::new(AtomicU32::new(0));
        let counter = count.clone();
        drop(ReconnectTimer::start(Duration::from_secs(1), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
