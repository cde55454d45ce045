//! Stream Codec
//!
//! Decodes `MESSAGE` bodies by destination into [`InboundMessage`]s.
//! Bodies are JSON objects; quote topics may also batch an array of objects.

use chrono::FixedOffset;
use serde::de::DeserializeOwned;

use super::messages::{CandleMessage, ChallengeMessage, QuoteMessage};
use crate::application::ports::{CandleUpdate, InboundMessage};
use crate::domain::topic::{TopicKind, TopicLayout};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Body is neither an object nor an array.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    /// Quote without any instrument code.
    #[error("quote on {destination} carries no instrument code")]
    MissingInstrument {
        /// Frame destination.
        destination: String,
    },

    /// Destination matches no known topic family.
    #[error("no decoder for destination {0}")]
    UnknownDestination(String),
}

/// Destination-aware body decoder.
#[derive(Debug, Clone)]
pub struct StreamCodec {
    layout: TopicLayout,
    market_offset: FixedOffset,
}

impl StreamCodec {
    /// Create a codec for `layout`, resolving challenge times in `market_offset`.
    #[must_use]
    pub const fn new(layout: TopicLayout, market_offset: FixedOffset) -> Self {
        Self {
            layout,
            market_offset,
        }
    }

    /// Topic layout in use.
    #[must_use]
    pub const fn layout(&self) -> &TopicLayout {
        &self.layout
    }

    /// Decode one `MESSAGE` body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body does not match the destination's schema.
    pub fn decode(&self, destination: &str, body: &str) -> Result<Vec<InboundMessage>, CodecError> {
        match self.layout.classify(destination) {
            TopicKind::Instrument(code) => self.decode_quotes(destination, body, Some(&code)),
            TopicKind::AllInstruments => self.decode_quotes(destination, body, None),
            TopicKind::Chart {
                instrument_id,
                timeframe,
            } => {
                let candles: Vec<CandleMessage> = decode_one_or_many(body)?;
                Ok(candles
                    .into_iter()
                    .map(|candle| {
                        let (instrument_id, timeframe) = candle.key(&instrument_id, &timeframe);
                        InboundMessage::Candle(CandleUpdate {
                            instrument_id,
                            timeframe,
                            point: candle.point(),
                        })
                    })
                    .collect())
            }
            TopicKind::FeaturedChallenge => {
                let ticks: Vec<ChallengeMessage> = decode_one_or_many(body)?;
                Ok(ticks
                    .into_iter()
                    .map(|tick| InboundMessage::Challenge(tick.into_tick(self.market_offset)))
                    .collect())
            }
            TopicKind::Unknown => Err(CodecError::UnknownDestination(destination.to_string())),
        }
    }

    #[allow(clippy::unused_self)]
    fn decode_quotes(
        &self,
        destination: &str,
        body: &str,
        topic_code: Option<&str>,
    ) -> Result<Vec<InboundMessage>, CodecError> {
        let messages: Vec<QuoteMessage> = decode_one_or_many(body)?;
        messages
            .into_iter()
            .map(|msg| {
                msg.into_quote(topic_code)
                    .map(InboundMessage::Quote)
                    .ok_or_else(|| CodecError::MissingInstrument {
                        destination: destination.to_string(),
                    })
            })
            .collect()
    }
}

fn decode_one_or_many<T: DeserializeOwned>(body: &str) -> Result<Vec<T>, CodecError> {
    let trimmed = body.trim();
    if trimmed.starts_with('[') {
        Ok(serde_json::from_str(trimmed)?)
    } else if trimmed.starts_with('{') {
        Ok(vec![serde_json::from_str(trimmed)?])
    } else {
        let preview: String = trimmed.chars().take(50).collect();
        Err(CodecError::InvalidFormat(format!(
            "expected JSON array or object, got: {preview}..."
        )))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;
    use crate::domain::chart::{Timeframe, seoul_offset};

    fn codec() -> StreamCodec {
        StreamCodec::new(TopicLayout::default(), seoul_offset())
    }

    #[test]
    fn decodes_instrument_quote() {
        let messages = codec()
            .decode("/topic/stocks/005930", r#"{"tradePrice":75000,"changePrice":800}"#)
            .unwrap();

        let [InboundMessage::Quote(quote)] = messages.as_slice() else {
            panic!("expected one quote, got {messages:?}");
        };
        assert_eq!(quote.instrument_id, "005930");
        assert_eq!(quote.price(), Decimal::from(75_000));
    }

    #[test]
    fn decodes_batched_all_instruments() {
        let messages = codec()
            .decode(
                "/topic/stocks/all",
                r#"[{"code":"005930","tradePrice":1},{"code":"000660","currentPrice":2}]"#,
            )
            .unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn all_instruments_quote_needs_a_code() {
        let err = codec()
            .decode("/topic/stocks/all", r#"{"tradePrice":1}"#)
            .unwrap_err();
        assert!(matches!(err, CodecError::MissingInstrument { .. }));
    }

    #[test]
    fn decodes_chart_candle() {
        let messages = codec()
            .decode(
                "/topic/chart/005930/5",
                r#"{"o":1,"h":2,"l":1,"c":2,"v":3,"timestamp":60000}"#,
            )
            .unwrap();

        let [InboundMessage::Candle(update)] = messages.as_slice() else {
            panic!("expected one candle, got {messages:?}");
        };
        assert_eq!(update.instrument_id, "005930");
        assert_eq!(update.timeframe, Timeframe::Minutes(5));
        assert_eq!(update.point.time, 60_000);
    }

    #[test]
    fn decodes_challenge_tick() {
        let messages = codec()
            .decode(
                "/topic/history-challenge",
                r#"{"stockCode":"005930","openPrice":1,"highPrice":2,"lowPrice":1,"closePrice":2,
                    "volume":10,"fluctuationPrice":1,"fluctuationRate":0.5,
                    "originDateTime":"2024-03-05T09:01:30"}"#,
            )
            .unwrap();

        let [InboundMessage::Challenge(tick)] = messages.as_slice() else {
            panic!("expected one tick, got {messages:?}");
        };
        assert_eq!(tick.instrument_id.as_deref(), Some("005930"));
        assert_eq!(tick.origin_time_ms % 60_000, 0);
    }

    #[test]
    fn malformed_bodies_are_errors() {
        assert!(matches!(
            codec().decode("/topic/stocks/005930", "not json"),
            Err(CodecError::InvalidFormat(_))
        ));
        assert!(matches!(
            codec().decode("/topic/stocks/005930", r#"{"tradePrice":"#),
            Err(CodecError::Json(_))
        ));
        assert!(matches!(
            codec().decode("/queue/other", "{}"),
            Err(CodecError::UnknownDestination(_))
        ));
    }
}
