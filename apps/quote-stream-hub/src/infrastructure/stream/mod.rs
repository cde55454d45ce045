//! Upstream Quote Stream
//!
//! STOMP-over-WebSocket client for the quote server:
//!
//! - **frame**: STOMP 1.2 text frames
//! - **messages / codec**: JSON bodies per topic family
//! - **connection**: session lifecycle, subscription registry, retries
//! - **transport**: WebSocket link
//! - **memory**: scripted in-memory link for tests (`test-util` feature)

pub mod codec;
pub mod connection;
pub mod frame;
pub mod heartbeat;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod messages;
pub mod reconnect;
pub mod transport;

pub use codec::{CodecError, StreamCodec};
pub use connection::{
    ConnectionConfig, ConnectionError, ConnectionManager, ConnectionStats, SubscriptionEvent,
    SubscriptionState, SubscriptionStatus,
};
pub use frame::{FrameError, StompCommand, StompFrame};
pub use heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatState};
#[cfg(any(test, feature = "test-util"))]
pub use memory::{MemoryPeer, MemoryServer, MemoryTransport};
pub use messages::{CandleMessage, ChallengeMessage, QuoteMessage, parse_origin_time};
pub use reconnect::{ReconnectConfig, ReconnectPolicy, TopicRetryConfig};
pub use transport::{LinkEvent, Transport, TransportError, TransportLink, WebSocketTransport};
