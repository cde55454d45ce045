//! Inbound Port (Driver Port)
//!
//! The connection manager drives the application through this port: every
//! decoded upstream message and every connection state transition.

use crate::domain::chart::{CandlePoint, Timeframe};
use crate::domain::connection::ConnectionState;
use crate::domain::quote::{ChallengeTick, InstrumentId, Quote};

/// A streamed candle for one instrument and timeframe.
#[derive(Debug, Clone, PartialEq)]
pub struct CandleUpdate {
    /// Instrument code.
    pub instrument_id: InstrumentId,
    /// Candle timeframe.
    pub timeframe: Timeframe,
    /// The candle.
    pub point: CandlePoint,
}

/// Decoded upstream message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Quote snapshot from an instrument or combined topic.
    Quote(Quote),
    /// Candle from a chart topic.
    Candle(CandleUpdate),
    /// Featured challenge tick.
    Challenge(ChallengeTick),
}

/// Receiver of upstream traffic.
pub trait InboundSink: Send + Sync {
    /// Handle one decoded message. Called from the connection task; must not block.
    fn on_message(&self, message: InboundMessage);

    /// Observe a connection state transition.
    fn on_state_change(&self, previous: ConnectionState, current: ConnectionState);
}
