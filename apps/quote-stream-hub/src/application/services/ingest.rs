//! Inbound routing.
//!
//! Quotes go to the tier cache, candles to the chart cache, challenge ticks
//! to their own channel and, when they name an instrument, to the tier cache.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::application::ports::{CandleUpdate, ChallengePublisher, InboundMessage, InboundSink};
use crate::domain::chart::{AppendOutcome, ChartDataCache, ChartKind};
use crate::domain::connection::ConnectionState;
use crate::domain::tier_cache::PriorityTierCache;

/// Routes decoded upstream traffic into the caches.
pub struct IngestRouter {
    tiers: Arc<PriorityTierCache>,
    charts: Arc<ChartDataCache>,
    challenges: Arc<dyn ChallengePublisher>,
    /// Set while the stream is interrupted; cleared on the next CONNECTED.
    gap: AtomicBool,
}

impl IngestRouter {
    /// Create a router over the given caches.
    #[must_use]
    pub fn new(
        tiers: Arc<PriorityTierCache>,
        charts: Arc<ChartDataCache>,
        challenges: Arc<dyn ChallengePublisher>,
    ) -> Self {
        Self {
            tiers,
            charts,
            challenges,
            gap: AtomicBool::new(false),
        }
    }

    fn apply_candle(&self, update: CandleUpdate) {
        let CandleUpdate {
            instrument_id,
            timeframe,
            point,
        } = update;

        let outcome = self.charts.append(&instrument_id, &timeframe, point);
        let stale = self
            .charts
            .invalidate_kind(ChartKind::Indicators, &instrument_id, Some(&timeframe));

        if outcome != AppendOutcome::NotCached || stale > 0 {
            tracing::trace!(
                instrument = %instrument_id,
                timeframe = %timeframe,
                ?outcome,
                stale_indicators = stale,
                "Applied streamed candle"
            );
        }
    }
}

impl InboundSink for IngestRouter {
    fn on_message(&self, message: InboundMessage) {
        match message {
            InboundMessage::Quote(quote) => {
                self.tiers.update(quote);
            }
            InboundMessage::Candle(update) => self.apply_candle(update),
            InboundMessage::Challenge(tick) => {
                self.challenges.publish_challenge(&tick);
                if let Some(quote) = tick.to_quote() {
                    self.tiers.update(quote);
                }
            }
        }
    }

    fn on_state_change(&self, previous: ConnectionState, current: ConnectionState) {
        if current.is_gap() {
            self.gap.store(true, Ordering::Release);
            return;
        }
        if current == ConnectionState::Connected && self.gap.swap(false, Ordering::AcqRel) {
            self.charts.clear_series();
            tracing::info!(
                from = %previous,
                "Stream resumed after a gap, cleared streamed chart series"
            );
        }
    }
}

impl std::fmt::Debug for IngestRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestRouter")
            .field("gap", &self.gap.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
