//! Quote Types
//!
//! Latest-value quote snapshots, the featured challenge tick, and the
//! priority tiers that decide where a quote is cached and who sees it.
//! These types are codec-agnostic; wire formats live in the stream adapter.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Instrument code, e.g. `"005930"`.
pub type InstrumentId = String;

// =============================================================================
// Priority Tier
// =============================================================================

/// Cache and fan-out priority of an instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PriorityTier {
    /// On screen in a detail or chart view.
    Hot,
    /// In a visible list, the portfolio, or the watchlist.
    Warm,
    /// Background.
    #[default]
    Cold,
}

impl PriorityTier {
    /// All tiers in lookup order.
    pub const ALL: [Self; 3] = [Self::Hot, Self::Warm, Self::Cold];

    /// Lowercase tier name, used for metric labels and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Hot => "hot",
            Self::Warm => "warm",
            Self::Cold => "cold",
        }
    }

    pub(crate) const fn index(self) -> usize {
        match self {
            Self::Hot => 0,
            Self::Warm => 1,
            Self::Cold => 2,
        }
    }
}

impl std::fmt::Display for PriorityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Quote
// =============================================================================

/// Immutable quote snapshot for one instrument.
///
/// A newer quote replaces the cached one wholesale; quotes are never
/// patched in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Instrument code.
    pub instrument_id: InstrumentId,
    /// Session open.
    pub open: Option<Decimal>,
    /// Session high.
    pub high: Option<Decimal>,
    /// Session low.
    pub low: Option<Decimal>,
    /// Close (or last close).
    pub close: Option<Decimal>,
    /// Accumulated volume.
    pub volume: Option<Decimal>,
    /// Last trade price.
    pub trade_price: Option<Decimal>,
    /// Current price as reported by producers that do not send trades.
    pub current_price: Option<Decimal>,
    /// Change versus previous close.
    pub change_price: Option<Decimal>,
    /// Change rate versus previous close, in percent.
    pub change_rate: Option<Decimal>,
    /// Ingest time.
    pub timestamp: DateTime<Utc>,
}

impl Quote {
    /// Create a quote with no price fields set.
    #[must_use]
    pub fn new(instrument_id: impl Into<InstrumentId>, timestamp: DateTime<Utc>) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            open: None,
            high: None,
            low: None,
            close: None,
            volume: None,
            trade_price: None,
            current_price: None,
            change_price: None,
            change_rate: None,
            timestamp,
        }
    }

    /// Effective price: trade price, then current price, then close, then zero.
    #[must_use]
    pub fn price(&self) -> Decimal {
        self.trade_price
            .or(self.current_price)
            .or(self.close)
            .unwrap_or(Decimal::ZERO)
    }

    /// Change amount, zero when not reported.
    #[must_use]
    pub fn change_amount(&self) -> Decimal {
        self.change_price.unwrap_or(Decimal::ZERO)
    }

    /// Change rate in percent, zero when not reported.
    #[must_use]
    pub fn change_percent(&self) -> Decimal {
        self.change_rate.unwrap_or(Decimal::ZERO)
    }
}

// =============================================================================
// Featured Challenge Tick
// =============================================================================

/// One tick of the featured historical challenge stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChallengeTick {
    /// Instrument the challenge replays, when the producer names it.
    pub instrument_id: Option<InstrumentId>,
    /// Open.
    pub open: Decimal,
    /// High.
    pub high: Decimal,
    /// Low.
    pub low: Decimal,
    /// Close.
    pub close: Decimal,
    /// Volume.
    pub volume: Decimal,
    /// Change versus previous close.
    pub fluctuation_price: Decimal,
    /// Change rate in percent.
    pub fluctuation_rate: Decimal,
    /// Historical time being replayed, epoch millis (minute resolution).
    pub origin_time_ms: i64,
}

impl ChallengeTick {
    /// Convert into a quote when the tick names its instrument.
    ///
    /// The quote is stamped with the replayed origin time.
    #[must_use]
    pub fn to_quote(&self) -> Option<Quote> {
        let instrument_id = self.instrument_id.clone()?;
        let timestamp = Utc
            .timestamp_millis_opt(self.origin_time_ms)
            .single()
            .unwrap_or_else(Utc::now);

        Some(Quote {
            open: Some(self.open),
            high: Some(self.high),
            low: Some(self.low),
            close: Some(self.close),
            volume: Some(self.volume),
            trade_price: Some(self.close),
            change_price: Some(self.fluctuation_price),
            change_rate: Some(self.fluctuation_rate),
            ..Quote::new(instrument_id, timestamp)
        })
    }
}
