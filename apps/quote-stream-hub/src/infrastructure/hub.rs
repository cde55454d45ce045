//! Quote Hub
//!
//! Wires the caches, the fan-out, the connection manager and the
//! subscription coordinator into one service object.
//!
//! ```text
//! quote server ──STOMP/WS──► ConnectionManager ──► IngestRouter
//!                                  ▲                 │      │
//!                                  │          PriorityTier  ChartData
//!                      SubscriptionCoordinator   Cache      Cache
//!                                                    │
//!                                              BroadcastHub ──► consumers
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{InstrumentDirectory, TopicSubscriber};
use crate::application::services::{IngestRouter, SubscriptionCoordinator};
use crate::domain::chart::{ChartCacheStats, ChartDataCache};
use crate::domain::connection::ConnectionState;
use crate::domain::quote::{ChallengeTick, PriorityTier, Quote};
use crate::domain::tier_cache::{PriorityTierCache, TierStats};
use crate::infrastructure::broadcast::{
    BroadcastHub, BroadcastStats, QuoteUpdate, SharedBroadcastHub, TierReceiver,
};
use crate::infrastructure::config::HubConfig;
use crate::infrastructure::metrics;
use crate::infrastructure::stream::{ConnectionManager, ConnectionStats, StreamCodec, Transport};

/// Interval of the expiry sweep and gauge refresh.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// Snapshot of every component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Connection and subscriptions.
    pub connection: ConnectionStats,
    /// Tier sizes.
    pub tiers: TierStats,
    /// Chart cache sizes.
    pub charts: ChartCacheStats,
    /// Fan-out receivers and drops.
    pub broadcast: BroadcastStats,
    /// Instrument topics subscribed but no longer needed.
    pub stale_subscriptions: usize,
}

/// Real-time quote delivery core.
pub struct QuoteHub {
    config: HubConfig,
    tiers: Arc<PriorityTierCache>,
    charts: Arc<ChartDataCache>,
    broadcast: SharedBroadcastHub,
    connection: Arc<ConnectionManager>,
    coordinator: Arc<SubscriptionCoordinator>,
    cancel: CancellationToken,
}

impl QuoteHub {
    /// Build the hub. Nothing connects until [`QuoteHub::start`].
    #[must_use]
    pub fn new(config: HubConfig, transport: Arc<dyn Transport>) -> Self {
        let broadcast = Arc::new(BroadcastHub::new(config.broadcast.into()));
        let tiers = Arc::new(PriorityTierCache::new(
            config.tiers.into(),
            Arc::clone(&broadcast) as _,
        ));
        let charts = Arc::new(ChartDataCache::new(config.charts.into()));

        let router = Arc::new(IngestRouter::new(
            Arc::clone(&tiers),
            Arc::clone(&charts),
            Arc::clone(&broadcast) as _,
        ));
        let layout = config.topics.clone();
        let codec = StreamCodec::new(layout.clone(), config.charts.market_offset);
        let connection = Arc::new(ConnectionManager::new(
            config
                .stream
                .connection_config(Some(layout.featured_challenge())),
            transport,
            codec,
            router,
        ));
        let coordinator = Arc::new(SubscriptionCoordinator::new(
            Arc::clone(&tiers),
            Arc::clone(&connection) as _,
            layout,
        ));

        Self {
            config,
            tiers,
            charts,
            broadcast,
            connection,
            coordinator,
            cancel: CancellationToken::new(),
        }
    }

    /// Subscribe the default topics, seed per-instrument subscriptions from
    /// `directory` and connect. Returns the number of seeded topics.
    ///
    /// A directory failure is logged; the hub still connects.
    pub async fn start(&self, directory: &dyn InstrumentDirectory) -> usize {
        let layout = &self.config.topics;
        self.connection.subscribe(&layout.all_instruments());
        self.connection.subscribe(&layout.featured_challenge());

        let seeded = match self.coordinator.seed_defaults(directory).await {
            Ok(seeded) => seeded,
            Err(e) => {
                tracing::warn!(error = %e, "Instrument directory unavailable, skipping default subscriptions");
                0
            }
        };

        self.connection.connect();
        self.spawn_maintenance();
        seeded
    }

    /// Disconnect and stop background work.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.connection.disconnect();
        tracing::info!("Quote hub stopped");
    }

    fn spawn_maintenance(&self) {
        let cancel = self.cancel.clone();
        let tiers = Arc::clone(&self.tiers);
        let charts = Arc::clone(&self.charts);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(MAINTENANCE_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let expired = charts.clear_expired();
                        if expired > 0 {
                            tracing::debug!(expired, "Swept expired chart entries");
                        }
                        metrics::refresh_tier_gauges(&tiers.stats());
                    }
                }
            }
        });
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Latest cached quote.
    #[must_use]
    pub fn get(&self, instrument_id: &str) -> Option<Quote> {
        self.tiers.get(instrument_id)
    }

    /// Latest cached quote with the tier holding it.
    #[must_use]
    pub fn get_with_tier(&self, instrument_id: &str) -> Option<(PriorityTier, Quote)> {
        self.tiers.get_with_tier(instrument_id)
    }

    /// HOT updates.
    #[must_use]
    pub fn detail_updates(&self) -> TierReceiver<QuoteUpdate> {
        self.broadcast.detail_rx()
    }

    /// WARM updates.
    #[must_use]
    pub fn aggregate_updates(&self) -> TierReceiver<QuoteUpdate> {
        self.broadcast.aggregate_rx()
    }

    /// Every update.
    #[must_use]
    pub fn all_updates(&self) -> TierReceiver<QuoteUpdate> {
        self.broadcast.all_updates_rx()
    }

    /// Featured challenge ticks.
    #[must_use]
    pub fn challenge_ticks(&self) -> TierReceiver<ChallengeTick> {
        self.broadcast.challenge_rx()
    }

    /// Connection state changes, starting with the current state.
    #[must_use]
    pub fn connection_states(&self) -> WatchStream<ConnectionState> {
        self.connection.state_stream()
    }

    /// Current connection state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    // =========================================================================
    // Components
    // =========================================================================

    /// Visibility signals go here.
    #[must_use]
    pub fn coordinator(&self) -> &SubscriptionCoordinator {
        &self.coordinator
    }

    /// Upstream connection.
    #[must_use]
    pub const fn connection(&self) -> &Arc<ConnectionManager> {
        &self.connection
    }

    /// Tiered quote cache.
    #[must_use]
    pub fn tiers(&self) -> &PriorityTierCache {
        &self.tiers
    }

    /// Chart artifact cache.
    #[must_use]
    pub fn charts(&self) -> &ChartDataCache {
        &self.charts
    }

    /// Fan-out channels.
    #[must_use]
    pub const fn broadcast(&self) -> &SharedBroadcastHub {
        &self.broadcast
    }

    /// Configuration in use.
    #[must_use]
    pub const fn config(&self) -> &HubConfig {
        &self.config
    }

    /// Snapshot of every component.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            connection: self.connection.stats(),
            tiers: self.tiers.stats(),
            charts: self.charts.stats(),
            broadcast: self.broadcast.stats(),
            stale_subscriptions: self.coordinator.stale_subscriptions().len(),
        }
    }
}

impl Drop for QuoteHub {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for QuoteHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuoteHub")
            .field("connection", &self.connection)
            .field("tiers", &self.tiers.stats())
            .finish_non_exhaustive()
    }
}
