//! Prometheus Metrics Module
//!
//! Exposes hub metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Stream**: frames received, parse failures, reconnects, connection state
//! - **Subscriptions**: active topics, retries, terminal failures
//! - **Cache**: quotes ingested and entries per tier
//! - **Fan-out**: updates dropped by lagging receivers
//! - **Latency**: ingest processing time per frame
//!
//! Recording functions are no-ops until [`init_metrics`] installs a recorder.
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;

use crate::domain::connection::ConnectionState;
use crate::domain::quote::PriorityTier;
use crate::domain::tier_cache::TierStats;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static INSTALL_LOCK: Mutex<()> = Mutex::new(());

/// Initialize the Prometheus metrics recorder.
///
/// Repeated calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    let _install = INSTALL_LOCK.lock();
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Stream
    describe_counter!(
        "quote_hub_frames_received_total",
        "Total STOMP frames received from the quote server"
    );
    describe_counter!(
        "quote_hub_parse_failures_total",
        "Total frames or payloads dropped because they could not be decoded"
    );
    describe_counter!(
        "quote_hub_reconnects_total",
        "Total reconnection attempts"
    );
    describe_gauge!(
        "quote_hub_connection_state",
        "1 for the current connection state, 0 otherwise"
    );

    // Subscriptions
    describe_gauge!(
        "quote_hub_active_topics",
        "Topics subscribed on the current session"
    );
    describe_counter!(
        "quote_hub_subscription_retries_total",
        "Total subscription retries scheduled after server rejections"
    );
    describe_counter!(
        "quote_hub_subscription_failures_total",
        "Total topics that exhausted their retry budget"
    );

    // Cache
    describe_counter!(
        "quote_hub_quotes_ingested_total",
        "Total quotes ingested by destination tier"
    );
    describe_gauge!("quote_hub_tier_entries", "Cached quotes per tier");

    // Fan-out
    describe_counter!(
        "quote_hub_dropped_updates_total",
        "Total updates skipped by lagging receivers"
    );

    // Latency
    describe_histogram!(
        "quote_hub_ingest_seconds",
        "Time to route one decoded frame through the caches and fan-out"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record one inbound STOMP frame.
pub fn record_frame_received() {
    counter!("quote_hub_frames_received_total").increment(1);
}

/// Record a dropped frame (`"frame"`) or payload (`"payload"`).
pub fn record_parse_failure(stage: &'static str) {
    counter!("quote_hub_parse_failures_total", "stage" => stage).increment(1);
}

/// Record a reconnection attempt.
pub fn record_reconnect_attempt() {
    counter!("quote_hub_reconnects_total").increment(1);
}

/// Publish the current connection state.
pub fn set_connection_state(current: ConnectionState) {
    for state in [
        ConnectionState::Disconnected,
        ConnectionState::Connecting,
        ConnectionState::Connected,
        ConnectionState::Reconnecting,
        ConnectionState::Error,
    ] {
        let value = if state == current { 1.0 } else { 0.0 };
        gauge!("quote_hub_connection_state", "state" => state.as_str()).set(value);
    }
}

/// Update the number of topics live on the session.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_topics(count: usize) {
    gauge!("quote_hub_active_topics").set(count as f64);
}

/// Record a scheduled subscription retry.
pub fn record_subscription_retry() {
    counter!("quote_hub_subscription_retries_total").increment(1);
}

/// Record a topic that gave up retrying.
pub fn record_subscription_failure() {
    counter!("quote_hub_subscription_failures_total").increment(1);
}

/// Record a quote written to `tier`.
pub fn record_quote_ingested(tier: PriorityTier) {
    counter!("quote_hub_quotes_ingested_total", "tier" => tier.as_str()).increment(1);
}

/// Record updates a lagging receiver of `channel` skipped.
pub fn record_dropped_updates(channel: &'static str, count: u64) {
    counter!("quote_hub_dropped_updates_total", "channel" => channel).increment(count);
}

/// Record ingest time of one frame.
pub fn record_ingest_duration(duration: Duration) {
    histogram!("quote_hub_ingest_seconds").record(duration.as_secs_f64());
}

/// Refresh tier size gauges from a stats snapshot.
#[allow(clippy::cast_precision_loss)]
pub fn refresh_tier_gauges(stats: &TierStats) {
    for (tier, stat) in [
        (PriorityTier::Hot, stats.hot),
        (PriorityTier::Warm, stats.warm),
        (PriorityTier::Cold, stats.cold),
    ] {
        gauge!("quote_hub_tier_entries", "tier" => tier.as_str()).set(stat.entries as f64);
    }
}

// =============================================================================
// Tests
// =============================================================================
