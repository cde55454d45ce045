//! Chart timeframes and their time buckets.

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

const MINUTE_MS: i64 = 60_000;

/// Declared timeframe of a chart series.
///
/// Minute timeframes bucket by elapsed time, the daily timeframe by calendar
/// day in the market's time zone. Unrecognized codes have no bucket, so
/// every streamed point extends the series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Timeframe {
    /// N-minute candles (1, 3, 5, 15, 30, 60).
    Minutes(u32),
    /// Daily candles.
    Day,
    /// Any other timeframe code, carried through unchanged.
    Other(String),
}

impl Timeframe {
    /// Parse a wire timeframe code (`"1"`, `"15"`, `"D"`, ...).
    #[must_use]
    pub fn parse(code: &str) -> Self {
        match code.trim() {
            "1" => Self::Minutes(1),
            "3" => Self::Minutes(3),
            "5" => Self::Minutes(5),
            "15" => Self::Minutes(15),
            "30" => Self::Minutes(30),
            "60" => Self::Minutes(60),
            "D" | "d" => Self::Day,
            other => Self::Other(other.to_string()),
        }
    }

    /// Wire code of this timeframe.
    #[must_use]
    pub fn code(&self) -> String {
        match self {
            Self::Minutes(n) => n.to_string(),
            Self::Day => "D".to_string(),
            Self::Other(code) => code.clone(),
        }
    }

    /// Whether two epoch-millisecond timestamps fall in the same bucket.
    #[must_use]
    pub fn same_bucket(&self, previous_ms: i64, next_ms: i64, market_offset: FixedOffset) -> bool {
        match self {
            Self::Minutes(n) => (next_ms - previous_ms).abs() < i64::from(*n) * MINUTE_MS,
            Self::Day => {
                let day = |ms: i64| {
                    DateTime::from_timestamp_millis(ms)
                        .map(|t| t.with_timezone(&market_offset).date_naive())
                };
                matches!((day(previous_ms), day(next_ms)), (Some(a), Some(b)) if a == b)
            }
            Self::Other(_) => false,
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.code())
    }
}

impl From<String> for Timeframe {
    fn from(code: String) -> Self {
        Self::parse(&code)
    }
}

impl From<Timeframe> for String {
    fn from(timeframe: Timeframe) -> Self {
        timeframe.code()
    }
}
