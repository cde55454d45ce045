//! Topic naming.
//!
//! The upstream publishes every instrument on its own topic, a combined
//! topic for the whole market, per-timeframe chart topics and one topic
//! for the featured challenge instrument.

use serde::{Deserialize, Serialize};

use super::chart::Timeframe;
use super::quote::InstrumentId;

/// Upstream topic destination, e.g. `/topic/stocks/005930`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Wrap a destination string.
    #[must_use]
    pub fn new(destination: impl Into<String>) -> Self {
        Self(destination.into())
    }

    /// Destination string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Topic {
    fn from(destination: &str) -> Self {
        Self::new(destination)
    }
}

/// What a destination carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicKind {
    /// Combined quote topic for every instrument.
    AllInstruments,
    /// Quote topic of one instrument.
    Instrument(InstrumentId),
    /// Streaming candles of one instrument and timeframe.
    Chart {
        /// Instrument code.
        instrument_id: InstrumentId,
        /// Candle timeframe.
        timeframe: Timeframe,
    },
    /// Featured challenge ticks.
    FeaturedChallenge,
    /// Anything else.
    Unknown,
}

/// Destination naming scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicLayout {
    /// Prefix of per-instrument quote topics.
    pub instrument_prefix: String,
    /// Combined quote topic.
    pub all_instruments: String,
    /// Featured challenge topic.
    pub featured_challenge: String,
    /// Prefix of chart topics, followed by `{code}/{timeframe}`.
    pub chart_prefix: String,
}

impl Default for TopicLayout {
    fn default() -> Self {
        Self {
            instrument_prefix: "/topic/stocks/".to_string(),
            all_instruments: "/topic/stocks/all".to_string(),
            featured_challenge: "/topic/history-challenge".to_string(),
            chart_prefix: "/topic/chart/".to_string(),
        }
    }
}

impl TopicLayout {
    /// Quote topic of `instrument_id`.
    #[must_use]
    pub fn instrument(&self, instrument_id: &str) -> Topic {
        Topic(format!("{}{instrument_id}", self.instrument_prefix))
    }

    /// Combined quote topic.
    #[must_use]
    pub fn all_instruments(&self) -> Topic {
        Topic(self.all_instruments.clone())
    }

    /// Featured challenge topic.
    #[must_use]
    pub fn featured_challenge(&self) -> Topic {
        Topic(self.featured_challenge.clone())
    }

    /// Chart topic of `instrument_id` at `timeframe`.
    #[must_use]
    pub fn chart(&self, instrument_id: &str, timeframe: &Timeframe) -> Topic {
        Topic(format!("{}{instrument_id}/{timeframe}", self.chart_prefix))
    }

    /// Classify a destination.
    ///
    /// The combined topic shares the per-instrument prefix, so it is matched first.
    #[must_use]
    pub fn classify(&self, destination: &str) -> TopicKind {
        if destination == self.all_instruments {
            return TopicKind::AllInstruments;
        }
        if destination == self.featured_challenge {
            return TopicKind::FeaturedChallenge;
        }
        if let Some(code) = destination.strip_prefix(&self.instrument_prefix) {
            if !code.is_empty() && !code.contains('/') {
                return TopicKind::Instrument(code.to_string());
            }
            return TopicKind::Unknown;
        }
        if let Some(rest) = destination.strip_prefix(&self.chart_prefix) {
            return match rest.split_once('/') {
                Some((code, tf)) if !code.is_empty() && !tf.is_empty() && !tf.contains('/') => {
                    TopicKind::Chart {
                        instrument_id: code.to_string(),
                        timeframe: Timeframe::parse(tf),
                    }
                }
                _ => TopicKind::Unknown,
            };
        }
        TopicKind::Unknown
    }

    /// Instrument code of a per-instrument quote topic.
    #[must_use]
    pub fn instrument_of(&self, destination: &str) -> Option<InstrumentId> {
        match self.classify(destination) {
            TopicKind::Instrument(code) => Some(code),
            _ => None,
        }
    }
}
