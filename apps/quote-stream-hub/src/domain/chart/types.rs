//! Chart artifact payloads and cache keys.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::timeframe::Timeframe;
use crate::domain::quote::InstrumentId;

// =============================================================================
// Keys
// =============================================================================

/// Key of a candlestick or volume series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SeriesKey {
    /// Instrument code.
    pub instrument_id: InstrumentId,
    /// Series timeframe.
    pub timeframe: Timeframe,
}

impl SeriesKey {
    /// Build a series key.
    #[must_use]
    pub fn new(instrument_id: impl Into<InstrumentId>, timeframe: Timeframe) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            timeframe,
        }
    }
}

/// Key of an indicator bundle. The indicator list is kept sorted and
/// de-duplicated so that request order does not matter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndicatorKey {
    /// Instrument code.
    pub instrument_id: InstrumentId,
    /// Series timeframe.
    pub timeframe: Timeframe,
    indicators: Vec<String>,
}

impl IndicatorKey {
    /// Build an indicator key from any indicator ordering.
    #[must_use]
    pub fn new<I, S>(instrument_id: impl Into<InstrumentId>, timeframe: Timeframe, indicators: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut indicators: Vec<String> = indicators.into_iter().map(Into::into).collect();
        indicators.sort();
        indicators.dedup();
        Self {
            instrument_id: instrument_id.into(),
            timeframe,
            indicators,
        }
    }

    /// Sorted indicator names.
    #[must_use]
    pub fn indicators(&self) -> &[String] {
        &self.indicators
    }
}

// =============================================================================
// Payloads
// =============================================================================

/// Static instrument description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentInfo {
    /// Instrument code.
    pub instrument_id: InstrumentId,
    /// Display name.
    pub name: String,
    /// Listing market (e.g. KOSPI).
    pub market: Option<String>,
    /// Previous session close.
    pub previous_close: Option<f64>,
}

/// One candle. `time` is the bucket start in epoch millis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandlePoint {
    /// Epoch millis.
    pub time: i64,
    /// Open.
    pub open: f64,
    /// High.
    pub high: f64,
    /// Low.
    pub low: f64,
    /// Close.
    pub close: f64,
    /// Volume traded in the bucket.
    pub volume: f64,
}

/// One volume bar.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumePoint {
    /// Epoch millis.
    pub time: i64,
    /// Volume traded in the bucket.
    pub volume: f64,
}

impl From<&CandlePoint> for VolumePoint {
    fn from(candle: &CandlePoint) -> Self {
        Self {
            time: candle.time,
            volume: candle.volume,
        }
    }
}

/// One indicator sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorPoint {
    /// Epoch millis.
    pub time: i64,
    /// Indicator value.
    pub value: f64,
}

/// Candlestick series, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandleSeries {
    /// Candles.
    pub points: Vec<CandlePoint>,
}

/// Volume series, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeSeries {
    /// Volume bars.
    pub points: Vec<VolumePoint>,
}

/// Computed indicator lines keyed by indicator name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorBundle {
    /// Lines, each oldest first.
    pub lines: BTreeMap<String, Vec<IndicatorPoint>>,
}

/// Drop the oldest points so at most `max` remain.
pub(crate) fn trim_oldest<T>(points: &mut Vec<T>, max: usize) {
    if points.len() > max {
        let excess = points.len() - max;
        points.drain(..excess);
    }
}
