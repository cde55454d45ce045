//! Wire Message Types
//!
//! JSON bodies of STOMP `MESSAGE` frames, one shape per topic family.
//!
//! # Quote (`/topic/stocks/{code}`, `/topic/stocks/all`)
//! ```json
//! {"code": "005930", "tradePrice": 75000, "changePrice": 800, "changeRate": 1.08}
//! ```
//! Producers disagree on field names: `change` stands in for `changePrice`
//! and `rate` for `changeRate`.
//!
//! # Chart candle (`/topic/chart/{code}/{timeframe}`)
//! ```json
//! {"symbol": "005930", "timeframe": "1", "o": 74200, "h": 74800, "l": 73900,
//!  "c": 74500, "v": 12345, "timestamp": 1703123400000}
//! ```
//!
//! # Featured challenge (`/topic/history-challenge`)
//! ```json
//! {"stockCode": "005930", "openPrice": 70000, "highPrice": 71000, "lowPrice": 69500,
//!  "closePrice": 70500, "volume": 1200, "fluctuationPrice": 500,
//!  "fluctuationRate": 0.71, "originDateTime": "2020-03-05T09:01:30"}
//! ```

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Timelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::chart::{CandlePoint, Timeframe};
use crate::domain::quote::{ChallengeTick, InstrumentId, Quote};

/// Accepted `originDateTime` layouts, tried in order.
const ORIGIN_TIME_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

// =============================================================================
// Quote
// =============================================================================

/// Quote snapshot as sent by the quote producers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteMessage {
    /// Instrument code. Per-instrument topics may omit it.
    #[serde(default)]
    pub code: Option<String>,
    /// Open.
    #[serde(default)]
    pub open_price: Option<Decimal>,
    /// High.
    #[serde(default)]
    pub high_price: Option<Decimal>,
    /// Low.
    #[serde(default)]
    pub low_price: Option<Decimal>,
    /// Close.
    #[serde(default)]
    pub close_price: Option<Decimal>,
    /// Volume.
    #[serde(default)]
    pub volume: Option<Decimal>,
    /// Last trade.
    #[serde(default)]
    pub trade_price: Option<Decimal>,
    /// Current price.
    #[serde(default)]
    pub current_price: Option<Decimal>,
    /// Change versus previous close.
    #[serde(default)]
    pub change_price: Option<Decimal>,
    /// Change rate in percent.
    #[serde(default)]
    pub change_rate: Option<Decimal>,
    /// Alternate name for `changePrice`.
    #[serde(default)]
    pub change: Option<Decimal>,
    /// Alternate name for `changeRate`.
    #[serde(default)]
    pub rate: Option<Decimal>,
    /// Producer timestamp, epoch millis.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl QuoteMessage {
    /// Convert into a domain quote, using `fallback_code` when the body has none.
    ///
    /// Returns `None` when no instrument code is available.
    #[must_use]
    pub fn into_quote(self, fallback_code: Option<&str>) -> Option<Quote> {
        let instrument_id = self
            .code
            .filter(|code| !code.trim().is_empty())
            .or_else(|| fallback_code.map(ToString::to_string))?;
        let timestamp = self
            .timestamp
            .and_then(DateTime::from_timestamp_millis)
            .unwrap_or_else(Utc::now);

        Some(Quote {
            open: self.open_price,
            high: self.high_price,
            low: self.low_price,
            close: self.close_price,
            volume: self.volume,
            trade_price: self.trade_price,
            current_price: self.current_price,
            change_price: self.change_price.or(self.change),
            change_rate: self.change_rate.or(self.rate),
            ..Quote::new(instrument_id, timestamp)
        })
    }
}

// =============================================================================
// Chart Candle
// =============================================================================

/// Streaming candle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandleMessage {
    /// Instrument code. Falls back to the topic's.
    #[serde(default)]
    pub symbol: Option<String>,
    /// Timeframe code. Falls back to the topic's.
    #[serde(default)]
    pub timeframe: Option<String>,
    /// Open.
    pub o: f64,
    /// High.
    pub h: f64,
    /// Low.
    pub l: f64,
    /// Close.
    pub c: f64,
    /// Volume.
    #[serde(default)]
    pub v: f64,
    /// Bucket start, epoch millis.
    pub timestamp: i64,
}

impl CandleMessage {
    /// Candle point of this message.
    #[must_use]
    pub const fn point(&self) -> CandlePoint {
        CandlePoint {
            time: self.timestamp,
            open: self.o,
            high: self.h,
            low: self.l,
            close: self.c,
            volume: self.v,
        }
    }

    /// Instrument and timeframe, preferring the body over the topic.
    #[must_use]
    pub fn key(&self, topic_code: &str, topic_timeframe: &Timeframe) -> (InstrumentId, Timeframe) {
        let code = self
            .symbol
            .clone()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| topic_code.to_string());
        let timeframe = self
            .timeframe
            .as_deref()
            .filter(|s| !s.is_empty())
            .map_or_else(|| topic_timeframe.clone(), Timeframe::parse);
        (code, timeframe)
    }
}

// =============================================================================
// Featured Challenge
// =============================================================================

/// Featured challenge tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeMessage {
    /// Replayed instrument, when named.
    #[serde(default)]
    pub stock_code: Option<String>,
    /// Open.
    pub open_price: Decimal,
    /// High.
    pub high_price: Decimal,
    /// Low.
    pub low_price: Decimal,
    /// Close.
    pub close_price: Decimal,
    /// Volume.
    #[serde(default)]
    pub volume: Decimal,
    /// Change versus previous close.
    #[serde(default)]
    pub fluctuation_price: Decimal,
    /// Change rate in percent.
    #[serde(default)]
    pub fluctuation_rate: Decimal,
    /// Replayed local time, `yyyy-MM-ddTHH:mm:ss` or `yyyy-MM-dd HH:mm:ss`.
    #[serde(default)]
    pub origin_date_time: Option<String>,
}

impl ChallengeMessage {
    /// Convert into a domain tick, resolving the origin time in `market_offset`.
    #[must_use]
    pub fn into_tick(self, market_offset: FixedOffset) -> ChallengeTick {
        let origin_time_ms = self
            .origin_date_time
            .as_deref()
            .and_then(|raw| parse_origin_time(raw, market_offset))
            .unwrap_or_else(|| Utc::now().timestamp_millis());

        ChallengeTick {
            instrument_id: self.stock_code.filter(|code| !code.trim().is_empty()),
            open: self.open_price,
            high: self.high_price,
            low: self.low_price,
            close: self.close_price,
            volume: self.volume,
            fluctuation_price: self.fluctuation_price,
            fluctuation_rate: self.fluctuation_rate,
            origin_time_ms,
        }
    }
}

/// Parse a market-local timestamp, truncated to the minute, into epoch millis.
#[must_use]
pub fn parse_origin_time(raw: &str, market_offset: FixedOffset) -> Option<i64> {
    let raw = raw.trim();
    let naive = ORIGIN_TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())?;
    let minute = naive.with_second(0)?.with_nanosecond(0)?;
    market_offset
        .from_local_datetime(&minute)
        .single()
        .map(|local| local.timestamp_millis())
}
