//! Broadcast Channel Adapters
//!
//! Fans cache updates out to independent consumers over bounded tokio
//! broadcast channels.
//!
//! # Channels
//!
//! - `all_updates`: every ingested quote, whatever its tier
//! - `detail`: quotes that landed in HOT
//! - `aggregate`: quotes that landed in WARM
//! - `challenge`: featured challenge ticks
//!
//! Publishing never waits. A receiver that falls behind loses the oldest
//! updates; [`TierReceiver`] then discards whatever is still buffered and
//! resumes with the newest update. Everything skipped is counted, both per
//! receiver and hub-wide. Publishing with no receivers is not a drop.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::Stream;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};

use crate::BroadcastSettings;
use crate::application::ports::ChallengePublisher;
use crate::domain::quote::{ChallengeTick, PriorityTier, Quote};
use crate::domain::tier_cache::TierPublisher;
use crate::infrastructure::metrics;

// =============================================================================
// Broadcast Messages
// =============================================================================

/// Quote published after ingest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuoteUpdate {
    /// The quote.
    pub quote: Quote,
    /// Tier the quote was written to.
    pub tier: PriorityTier,
}

/// Fan-out channel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FanoutChannel {
    /// Every quote.
    AllUpdates,
    /// HOT quotes.
    Detail,
    /// WARM quotes.
    Aggregate,
    /// Challenge ticks.
    Challenge,
}

impl FanoutChannel {
    /// All channels.
    pub const ALL: [Self; 4] = [Self::AllUpdates, Self::Detail, Self::Aggregate, Self::Challenge];

    /// Metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AllUpdates => "all_updates",
            Self::Detail => "detail",
            Self::Aggregate => "aggregate",
            Self::Challenge => "challenge",
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::AllUpdates => 0,
            Self::Detail => 1,
            Self::Aggregate => 2,
            Self::Challenge => 3,
        }
    }
}

#[derive(Debug, Default)]
struct DropCounters([AtomicU64; 4]);

impl DropCounters {
    fn add(&self, channel: FanoutChannel, count: u64) {
        self.0[channel.index()].fetch_add(count, Ordering::Relaxed);
    }

    fn get(&self, channel: FanoutChannel) -> u64 {
        self.0[channel.index()].load(Ordering::Relaxed)
    }
}

// =============================================================================
// Receiver
// =============================================================================

/// Receiver that accounts for updates it skipped while lagging.
#[derive(Debug)]
pub struct TierReceiver<T> {
    rx: broadcast::Receiver<T>,
    channel: FanoutChannel,
    hub_dropped: Arc<DropCounters>,
    dropped: u64,
}

impl<T: Clone> TierReceiver<T> {
    fn new(rx: broadcast::Receiver<T>, channel: FanoutChannel, hub_dropped: Arc<DropCounters>) -> Self {
        Self {
            rx,
            channel,
            hub_dropped,
            dropped: 0,
        }
    }

    /// Next update, or `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            match self.rx.recv().await {
                Ok(value) => return Some(value),
                Err(RecvError::Lagged(skipped)) => {
                    self.record_lag(skipped);
                    if let Some(newest) = self.skip_to_newest() {
                        return Some(newest);
                    }
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Next buffered update, without waiting.
    pub fn try_recv(&mut self) -> Option<T> {
        loop {
            match self.rx.try_recv() {
                Ok(value) => return Some(value),
                Err(TryRecvError::Lagged(skipped)) => {
                    self.record_lag(skipped);
                    return self.skip_to_newest();
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }

    /// Updates this receiver skipped so far.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Channel this receiver listens on.
    #[must_use]
    pub const fn channel(&self) -> FanoutChannel {
        self.channel
    }

    /// Drain the buffer after a lag, keeping only the last update.
    fn skip_to_newest(&mut self) -> Option<T> {
        let mut newest = None;
        let mut superseded = 0;
        loop {
            match self.rx.try_recv() {
                Ok(value) => {
                    if newest.replace(value).is_some() {
                        superseded += 1;
                    }
                }
                Err(TryRecvError::Lagged(skipped)) => superseded += skipped,
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
        if superseded > 0 {
            self.record_lag(superseded);
        }
        newest
    }

    fn record_lag(&mut self, skipped: u64) {
        self.dropped += skipped;
        self.hub_dropped.add(self.channel, skipped);
        metrics::record_dropped_updates(self.channel.as_str(), skipped);
        tracing::debug!(channel = self.channel.as_str(), skipped, "Receiver lagged, updates dropped");
    }
}

impl<T: Clone + Send + 'static> TierReceiver<T> {
    /// Convert into a stream that ends when the hub is gone.
    pub fn into_stream(self) -> impl Stream<Item = T> + Send {
        futures_util::stream::unfold(self, |mut rx| async move {
            rx.recv().await.map(|value| (value, rx))
        })
    }
}

// =============================================================================
// Broadcast Hub
// =============================================================================

/// Configuration for broadcast channel capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastConfig {
    /// Capacity of the every-quote channel.
    pub all_updates_capacity: usize,
    /// Capacity of the HOT channel.
    pub detail_capacity: usize,
    /// Capacity of the WARM channel.
    pub aggregate_capacity: usize,
    /// Capacity of the challenge channel.
    pub challenge_capacity: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            all_updates_capacity: 4_096,
            detail_capacity: 256,
            aggregate_capacity: 1_024,
            challenge_capacity: 256,
        }
    }
}

impl From<BroadcastSettings> for BroadcastConfig {
    fn from(settings: BroadcastSettings) -> Self {
        Self {
            all_updates_capacity: settings.all_updates_capacity,
            detail_capacity: settings.detail_capacity,
            aggregate_capacity: settings.aggregate_capacity,
            challenge_capacity: settings.challenge_capacity,
        }
    }
}

/// Central hub for all fan-out channels.
///
/// # Example
///
/// ```rust
/// use quote_stream_hub::domain::quote::{PriorityTier, Quote};
/// use quote_stream_hub::domain::tier_cache::TierPublisher;
/// use quote_stream_hub::infrastructure::broadcast::BroadcastHub;
///
/// let hub = BroadcastHub::with_defaults();
/// let mut detail = hub.detail_rx();
///
/// hub.publish(&Quote::new("005930", chrono::Utc::now()), PriorityTier::Hot);
/// assert_eq!(detail.try_recv().map(|u| u.tier), Some(PriorityTier::Hot));
/// ```
#[derive(Debug)]
#[allow(clippy::struct_field_names)]
pub struct BroadcastHub {
    all_updates_tx: broadcast::Sender<QuoteUpdate>,
    detail_tx: broadcast::Sender<QuoteUpdate>,
    aggregate_tx: broadcast::Sender<QuoteUpdate>,
    challenge_tx: broadcast::Sender<ChallengeTick>,
    dropped: Arc<DropCounters>,
}

impl BroadcastHub {
    /// Create a new broadcast hub with the given configuration.
    #[must_use]
    pub fn new(config: BroadcastConfig) -> Self {
        Self {
            all_updates_tx: broadcast::channel(config.all_updates_capacity.max(1)).0,
            detail_tx: broadcast::channel(config.detail_capacity.max(1)).0,
            aggregate_tx: broadcast::channel(config.aggregate_capacity.max(1)).0,
            challenge_tx: broadcast::channel(config.challenge_capacity.max(1)).0,
            dropped: Arc::new(DropCounters::default()),
        }
    }

    /// Create a new broadcast hub with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(BroadcastConfig::default())
    }

    /// Receiver of every ingested quote.
    #[must_use]
    pub fn all_updates_rx(&self) -> TierReceiver<QuoteUpdate> {
        self.receiver(&self.all_updates_tx, FanoutChannel::AllUpdates)
    }

    /// Receiver of HOT quotes.
    #[must_use]
    pub fn detail_rx(&self) -> TierReceiver<QuoteUpdate> {
        self.receiver(&self.detail_tx, FanoutChannel::Detail)
    }

    /// Receiver of WARM quotes.
    #[must_use]
    pub fn aggregate_rx(&self) -> TierReceiver<QuoteUpdate> {
        self.receiver(&self.aggregate_tx, FanoutChannel::Aggregate)
    }

    /// Receiver of challenge ticks.
    #[must_use]
    pub fn challenge_rx(&self) -> TierReceiver<ChallengeTick> {
        self.receiver(&self.challenge_tx, FanoutChannel::Challenge)
    }

    fn receiver<T: Clone>(&self, tx: &broadcast::Sender<T>, channel: FanoutChannel) -> TierReceiver<T> {
        TierReceiver::new(tx.subscribe(), channel, Arc::clone(&self.dropped))
    }

    /// Number of live receivers on `channel`.
    #[must_use]
    pub fn receiver_count(&self, channel: FanoutChannel) -> usize {
        match channel {
            FanoutChannel::AllUpdates => self.all_updates_tx.receiver_count(),
            FanoutChannel::Detail => self.detail_tx.receiver_count(),
            FanoutChannel::Aggregate => self.aggregate_tx.receiver_count(),
            FanoutChannel::Challenge => self.challenge_tx.receiver_count(),
        }
    }

    /// Updates skipped by lagging receivers of `channel`.
    #[must_use]
    pub fn dropped_count(&self, channel: FanoutChannel) -> u64 {
        self.dropped.get(channel)
    }

    /// Get statistics about all channels.
    #[must_use]
    pub fn stats(&self) -> BroadcastStats {
        let channel = |c| ChannelStats {
            receivers: self.receiver_count(c),
            dropped: self.dropped_count(c),
        };
        BroadcastStats {
            all_updates: channel(FanoutChannel::AllUpdates),
            detail: channel(FanoutChannel::Detail),
            aggregate: channel(FanoutChannel::Aggregate),
            challenge: channel(FanoutChannel::Challenge),
        }
    }
}

impl TierPublisher for BroadcastHub {
    fn publish(&self, quote: &Quote, tier: PriorityTier) {
        metrics::record_quote_ingested(tier);
        let update = QuoteUpdate {
            quote: quote.clone(),
            tier,
        };

        // A send error only means nobody is listening.
        match tier {
            PriorityTier::Hot => {
                let _ = self.detail_tx.send(update.clone());
            }
            PriorityTier::Warm => {
                let _ = self.aggregate_tx.send(update.clone());
            }
            PriorityTier::Cold => {}
        }
        let _ = self.all_updates_tx.send(update);
    }
}

impl ChallengePublisher for BroadcastHub {
    fn publish_challenge(&self, tick: &ChallengeTick) {
        let _ = self.challenge_tx.send(tick.clone());
    }
}

/// Shared broadcast hub reference.
pub type SharedBroadcastHub = Arc<BroadcastHub>;

/// Receivers and drops of one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    /// Live receivers.
    pub receivers: usize,
    /// Updates skipped by lagging receivers.
    pub dropped: u64,
}

/// Statistics about broadcast channels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastStats {
    /// Every-quote channel.
    pub all_updates: ChannelStats,
    /// HOT channel.
    pub detail: ChannelStats,
    /// WARM channel.
    pub aggregate: ChannelStats,
    /// Challenge channel.
    pub challenge: ChannelStats,
}

impl BroadcastStats {
    /// Get total number of receivers across all channels.
    #[must_use]
    pub const fn total_receivers(&self) -> usize {
        self.all_updates.receivers
            + self.detail.receivers
            + self.aggregate.receivers
            + self.challenge.receivers
    }

    /// Get total updates dropped across all channels.
    #[must_use]
    pub const fn total_dropped(&self) -> u64 {
        self.all_updates.dropped + self.detail.dropped + self.aggregate.dropped + self.challenge.dropped
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use futures_util::StreamExt;
    use rust_decimal::Decimal;

    use super::*;

    fn quote(code: &str, price: i64) -> Quote {
        Quote {
            trade_price: Some(Decimal::from(price)),
            ..Quote::new(code, Utc::now())
        }
    }

    fn small_hub() -> BroadcastHub {
        BroadcastHub::new(BroadcastConfig {
            all_updates_capacity: 4,
            detail_capacity: 2,
            aggregate_capacity: 2,
            challenge_capacity: 2,
        })
    }

    #[test]
    fn receiver_count_tracks_drops() {
        let hub = BroadcastHub::with_defaults();
        {
            let _rx1 = hub.detail_rx();
            let _rx2 = hub.detail_rx();
            assert_eq!(hub.receiver_count(FanoutChannel::Detail), 2);
        }
        assert_eq!(hub.receiver_count(FanoutChannel::Detail), 0);
    }

    #[test]
    fn routes_by_tier() {
        let hub = BroadcastHub::with_defaults();
        let mut all = hub.all_updates_rx();
        let mut detail = hub.detail_rx();
        let mut aggregate = hub.aggregate_rx();

        hub.publish(&quote("005930", 1), PriorityTier::Hot);
        hub.publish(&quote("000660", 2), PriorityTier::Warm);
        hub.publish(&quote("035720", 3), PriorityTier::Cold);

        assert_eq!(detail.try_recv().unwrap().quote.instrument_id, "005930");
        assert!(detail.try_recv().is_none());
        assert_eq!(aggregate.try_recv().unwrap().quote.instrument_id, "000660");
        assert!(aggregate.try_recv().is_none());

        let tiers: Vec<_> = std::iter::from_fn(|| all.try_recv()).map(|u| u.tier).collect();
        assert_eq!(tiers, [PriorityTier::Hot, PriorityTier::Warm, PriorityTier::Cold]);
    }

    #[test]
    fn publishing_without_receivers_is_not_a_drop() {
        let hub = small_hub();
        for i in 0..10 {
            hub.publish(&quote("005930", i), PriorityTier::Hot);
        }
        assert_eq!(hub.stats().total_dropped(), 0);
    }

    #[test]
    fn lagging_receiver_skips_to_newest() {
        let hub = small_hub();
        let mut slow = hub.detail_rx();
        let mut other = hub.detail_rx();

        for i in 0..5 {
            hub.publish(&quote("005930", i), PriorityTier::Hot);
        }

        // Three overwritten in the ring, one superseded in the buffer.
        let first = slow.try_recv().unwrap();
        assert_eq!(first.quote.trade_price, Some(Decimal::from(4)));
        assert_eq!(slow.dropped(), 4);
        assert!(slow.try_recv().is_none());

        hub.publish(&quote("005930", 5), PriorityTier::Hot);
        assert_eq!(slow.try_recv().unwrap().quote.trade_price, Some(Decimal::from(5)));
        assert_eq!(slow.dropped(), 4);

        // Lag is per receiver; each records its own.
        let _ = other.try_recv();
        assert_eq!(hub.dropped_count(FanoutChannel::Detail), 8);
        assert_eq!(hub.dropped_count(FanoutChannel::AllUpdates), 0);
    }

    #[tokio::test]
    async fn challenge_ticks_stream() {
        let hub = Arc::new(BroadcastHub::with_defaults());
        let stream = hub.challenge_rx().into_stream();
        tokio::pin!(stream);

        let tick = ChallengeTick {
            instrument_id: None,
            open: Decimal::ONE,
            high: Decimal::ONE,
            low: Decimal::ONE,
            close: Decimal::ONE,
            volume: Decimal::ZERO,
            fluctuation_price: Decimal::ZERO,
            fluctuation_rate: Decimal::ZERO,
            origin_time_ms: 60_000,
        };
        hub.publish_challenge(&tick);

        assert_eq!(stream.next().await, Some(tick));
    }

    #[tokio::test]
    async fn lagging_recv_resumes_with_newest() {
        let hub = small_hub();
        let mut rx = hub.aggregate_rx();

        for i in 0..6 {
            hub.publish(&quote("000660", i), PriorityTier::Warm);
        }

        let update = rx.recv().await.unwrap();
        assert_eq!(update.quote.trade_price, Some(Decimal::from(5)));
        assert_eq!(rx.dropped(), 5);
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn recv_waits_for_publish() {
        let hub = BroadcastHub::with_defaults();
        let mut rx = hub.aggregate_rx();
        let mut recv = tokio_test::task::spawn(rx.recv());
        tokio_test::assert_pending!(recv.poll());

        hub.publish(&quote("000660", 7), PriorityTier::Warm);

        assert!(recv.is_woken());
        let update = tokio_test::assert_ready!(recv.poll()).unwrap();
        assert_eq!(update.tier, PriorityTier::Warm);
    }

    #[test]
    fn stats_reflect_all_channels() {
        let hub = BroadcastHub::with_defaults();
        let _rx1 = hub.all_updates_rx();
        let _rx2 = hub.challenge_rx();

        let stats = hub.stats();
        assert_eq!(stats.all_updates.receivers, 1);
        assert_eq!(stats.challenge.receivers, 1);
        assert_eq!(stats.detail.receivers, 0);
        assert_eq!(stats.total_receivers(), 2);
    }
}
