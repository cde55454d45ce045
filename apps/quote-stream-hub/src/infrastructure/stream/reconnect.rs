//! Retry Policies
//!
//! Two independent policies:
//!
//! - [`ReconnectPolicy`]: exponential backoff for the upstream connection,
//!   `delay = initial * multiplier^(attempt-1)`, capped in both delay and
//!   attempt count. Exhaustion is terminal until an explicit reset.
//! - [`TopicRetryConfig`]: linear step backoff for a single topic's
//!   subscription. Each topic counts its own attempts, so one failing topic
//!   never consumes another's budget or the connection's.

use std::time::Duration;

use rand::Rng;

/// Configuration for connection backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Growth factor per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the delay (0.1 = ±10%). Zero disables it.
    pub jitter_factor: f64,
    /// Attempts before giving up (0 = unlimited).
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(64),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts: 5,
        }
    }
}

/// Exponential backoff state for the upstream connection.
///
/// # Example
///
/// ```rust
/// use quote_stream_hub::infrastructure::stream::reconnect::{ReconnectConfig, ReconnectPolicy};
/// use std::time::Duration;
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig {
///     max_attempts: 2,
///     ..ReconnectConfig::default()
/// });
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(2)));
/// assert_eq!(policy.next_delay(), None);
///
/// policy.reset();
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(1)));
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    last_delay: Option<Duration>,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Create a policy at attempt zero.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            last_delay: None,
            attempt_count: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }
        self.attempt_count += 1;

        let delay = self.apply_jitter(self.current_delay.min(self.config.max_delay));

        #[allow(clippy::cast_precision_loss)]
        let scaled = (self.current_delay.as_millis() as f64 * self.config.multiplier).round();
        let next_millis = if scaled.is_finite() && scaled > 0.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            {
                scaled as u128
            }
        } else {
            0
        };
        let capped = next_millis.min(self.config.max_delay.as_millis());
        self.current_delay = Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX));

        self.last_delay = Some(delay);
        Some(delay)
    }

    /// Back to attempt zero after a successful connection or explicit connect.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.last_delay = None;
        self.attempt_count = 0;
    }

    /// Attempts made since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Most recent delay handed out, if any since the last reset.
    #[must_use]
    pub const fn last_delay(&self) -> Option<Duration> {
        self.last_delay
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    /// Configured attempt limit (0 = unlimited).
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    fn apply_jitter(&self, duration: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return duration;
        }

        #[allow(clippy::cast_precision_loss)]
        let base_millis = duration.as_millis() as f64;
        let jitter_range = base_millis * self.config.jitter_factor;
        let jitter: f64 = rand::rng().random_range(-jitter_range..=jitter_range);
        let adjusted_millis = (base_millis + jitter).max(1.0);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let adjusted = adjusted_millis as u64;
        Duration::from_millis(adjusted)
    }
}

/// Linear retry schedule for one topic's subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicRetryConfig {
    /// Delay added per attempt.
    pub step: Duration,
    /// Retries before the topic is marked failed.
    pub max_retries: u32,
}

impl TopicRetryConfig {
    /// Ordinary instrument and chart topics: 1s steps, 3 retries.
    pub const ORDINARY: Self = Self {
        step: Duration::from_secs(1),
        max_retries: 3,
    };

    /// The featured challenge topic: 5s steps, 10 retries.
    pub const PRIORITY: Self = Self {
        step: Duration::from_secs(5),
        max_retries: 10,
    };

    /// Delay before retry number `attempt` (1-based), or `None` past the limit.
    #[must_use]
    pub fn delay_for(self, attempt: u32) -> Option<Duration> {
        (attempt >= 1 && attempt <= self.max_retries).then(|| self.step.saturating_mul(attempt))
    }
}

impl Default for TopicRetryConfig {
    fn default() -> Self {
        Self::ORDINARY
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;

    fn exact(initial_ms: u64, max_ms: u64, max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy::new(ReconnectConfig {
            initial_delay: Duration::from_millis(initial_ms),
            max_delay: Duration::from_millis(max_ms),
            multiplier: 2.0,
            jitter_factor: 0.0,
            max_attempts,
        })
    }

    #[test]
    fn default_config_values() {
        let config = ReconnectConfig::default();
        assert_eq!(config.initial_delay, Duration::from_secs(1));
        assert_eq!(config.max_delay, Duration::from_secs(64));
        assert!((config.multiplier - 2.0).abs() < f64::EPSILON);
        assert!(config.jitter_factor.abs() < f64::EPSILON);
        assert_eq!(config.max_attempts, 5);
    }

    #[test]
    fn delays_double_until_exhausted() {
        let mut policy = ReconnectPolicy::new(ReconnectConfig::default());
        let delays: Vec<u64> = std::iter::from_fn(|| policy.next_delay())
            .map(|d| d.as_secs())
            .collect();

        assert_eq!(delays, vec![1, 2, 4, 8, 16]);
        assert!(!policy.should_retry());
        assert_eq!(policy.last_delay(), Some(Duration::from_secs(16)));
    }

    #[test]
    fn delays_are_capped() {
        let mut policy = exact(1000, 2500, 0);
        let delays: Vec<u128> = (0..5)
            .filter_map(|_| policy.next_delay())
            .map(|d| d.as_millis())
            .collect();
        assert_eq!(delays, vec![1000, 2000, 2500, 2500, 2500]);
    }

    #[test]
    fn reset_restores_initial_delay() {
        let mut policy = exact(100, 10_000, 3);
        let _ = policy.next_delay();
        let _ = policy.next_delay();
        assert_eq!(policy.attempt_count(), 2);

        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.last_delay(), None);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        for _ in 0..100 {
            let mut policy = ReconnectPolicy::new(ReconnectConfig {
                jitter_factor: 0.1,
                ..ReconnectConfig::default()
            });
            let millis = policy.next_delay().unwrap().as_millis();
            assert!((900..=1100).contains(&millis), "delay {millis}ms outside ±10%");
        }
    }

    #[test]
    fn unlimited_attempts_never_stop() {
        let mut policy = exact(1, 10, 0);
        for _ in 0..1000 {
            assert!(policy.next_delay().is_some());
        }
    }

    #[test_case(TopicRetryConfig::ORDINARY, 1, Some(1) ; "ordinary first")]
    #[test_case(TopicRetryConfig::ORDINARY, 3, Some(3) ; "ordinary last")]
    #[test_case(TopicRetryConfig::ORDINARY, 4, None ; "ordinary exhausted")]
    #[test_case(TopicRetryConfig::PRIORITY, 2, Some(10) ; "priority second")]
    #[test_case(TopicRetryConfig::PRIORITY, 10, Some(50) ; "priority last")]
    #[test_case(TopicRetryConfig::PRIORITY, 11, None ; "priority exhausted")]
    #[test_case(TopicRetryConfig::PRIORITY, 0, None ; "zero is not an attempt")]
    fn topic_retry_is_linear(config: TopicRetryConfig, attempt: u32, secs: Option<u64>) {
        assert_eq!(config.delay_for(attempt), secs.map(Duration::from_secs));
    }
}
