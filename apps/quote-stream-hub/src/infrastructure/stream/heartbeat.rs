//! Heartbeat
//!
//! Liveness tracking for the upstream session. On every interval tick the
//! connection task sends a STOMP heart-beat and a WebSocket ping, honouring
//! the `heart-beat` header it advertised. Any inbound traffic counts as
//! activity; silence longer than the timeout is a protocol failure.

use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

/// Heartbeat timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between pings.
    pub ping_interval: Duration,
    /// Silence after which the session is considered dead.
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
        }
    }
}

impl HeartbeatConfig {
    /// STOMP `heart-beat` header value: `"{send_ms},{receive_ms}"`.
    #[must_use]
    pub fn stomp_header(&self) -> String {
        format!(
            "{},{}",
            self.ping_interval.as_millis(),
            self.timeout.as_millis()
        )
    }
}

/// Verdict of a heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// Still alive; send a ping.
    SendPing,
    /// No traffic for longer than the timeout.
    Timeout,
}

/// Last-activity clock of one session.
#[derive(Debug)]
pub struct HeartbeatState {
    config: HeartbeatConfig,
    last_activity: RwLock<Instant>,
}

impl HeartbeatState {
    /// Start the clock now.
    #[must_use]
    pub fn new(config: HeartbeatConfig) -> Self {
        Self {
            config,
            last_activity: RwLock::new(Instant::now()),
        }
    }

    /// Record inbound traffic.
    pub fn record_activity(&self) {
        *self.last_activity.write() = Instant::now();
    }

    /// Time since the last inbound traffic.
    #[must_use]
    pub fn time_since_activity(&self) -> Duration {
        self.last_activity.read().elapsed()
    }

    /// Evaluate liveness on an interval tick.
    #[must_use]
    pub fn check(&self) -> HeartbeatEvent {
        let silence = self.time_since_activity();
        if silence > self.config.timeout {
            tracing::warn!(
                silence_ms = silence.as_millis(),
                timeout_ms = self.config.timeout.as_millis(),
                "Heartbeat timeout"
            );
            HeartbeatEvent::Timeout
        } else {
            HeartbeatEvent::SendPing
        }
    }

    /// Interval timer for the ping loop; the first tick fires after one interval.
    #[must_use]
    pub fn interval(&self) -> tokio::time::Interval {
        let period = self.config.ping_interval.max(Duration::from_millis(1));
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        interval
    }
}
