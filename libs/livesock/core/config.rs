//! Client configuration and the reconnect backoff schedule.

use std::time::Duration;

/// Default interval between protocol pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(30);

/// Default deadline for a pong after a ping was sent.
pub const DEFAULT_PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// Default base delay for the reconnect backoff.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Default cap on consecutive reconnect attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: usize = 10;

const DEFAULT_BACKOFF_CEILING: Duration = Duration::from_secs(60);

/// Reconnect backoff schedule.
///
/// The base delay doubles per consecutive failed attempt until it hits the
/// ceiling; once `max_attempts` consecutive attempts are exhausted the
/// schedule yields `None` and the client gives up. A successful open resets
/// the attempt counter, so the ceiling only matters for long outages.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    ceiling: Duration,
    max_attempts: usize,
}

impl Backoff {
    pub fn new(base: Duration, ceiling: Duration, max_attempts: usize) -> Self {
        Self {
            base,
            ceiling,
            max_attempts,
        }
    }

    /// Delay before reconnect attempt `attempt` (0-based), or `None` once
    /// the attempt cap is exhausted.
    pub fn delay_for(&self, attempt: usize) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let mut delay = self.base;
        for _ in 0..attempt {
            if delay >= self.ceiling {
                return Some(self.ceiling);
            }
            delay = (delay * 2).min(self.ceiling);
        }
        Some(delay)
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            base: DEFAULT_RECONNECT_DELAY,
            ceiling: DEFAULT_BACKOFF_CEILING,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Configuration for a [`WsClient`](crate::WsClient).
pub struct ClientConfig {
    /// WebSocket URL (wss:// or ws://)
    pub url: String,

    /// Interval between protocol pings
    pub ping_interval: Duration,

    /// How long to wait for a pong after a ping before declaring the
    /// connection dead
    pub pong_timeout: Duration,

    /// Reconnect schedule
    pub backoff: Backoff,
}

impl ClientConfig {
    /// Create a config with the default ping/pong and backoff settings.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ping_interval: DEFAULT_PING_INTERVAL,
            pong_timeout: DEFAULT_PONG_TIMEOUT,
            backoff: Backoff::default(),
        }
    }

    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    pub fn pong_timeout(mut self, timeout: Duration) -> Self {
        self.pong_timeout = timeout;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doubling_schedule() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(60), 10);
        assert_eq!(backoff.delay_for(0), Some(Duration::from_millis(100)));
        assert_eq!(backoff.delay_for(1), Some(Duration::from_millis(200)));
        assert_eq!(backoff.delay_for(2), Some(Duration::from_millis(400)));
        assert_eq!(backoff.delay_for(3), Some(Duration::from_millis(800)));
    }

    #[test]
    fn test_ceiling_caps_delay() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(5), 100);
        assert_eq!(backoff.delay_for(2), Some(Duration::from_secs(4)));
        assert_eq!(backoff.delay_for(3), Some(Duration::from_secs(5)));
        assert_eq!(backoff.delay_for(50), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_attempt_cap_exhausts() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(60), 3);
        assert!(backoff.delay_for(2).is_some());
        assert_eq!(backoff.delay_for(3), None);
        assert_eq!(backoff.delay_for(4), None);
    }

    #[test]
    fn test_zero_attempts_never_reconnects() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(60), 0);
        assert_eq!(backoff.delay_for(0), None);
    }
}
