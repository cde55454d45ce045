#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::default_trait_access
    )
)]

//! Quote Stream Hub - Real-time Quote Delivery Core
//!
//! Keeps one STOMP-over-WebSocket session to the quote server, caches the
//! latest quote per instrument in priority tiers, caches chart artifacts
//! under TTL and size bounds, and fans updates out to independent consumers.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure in-memory types
//!   - `quote`: Quote snapshots and priority tiers
//!   - `tier_cache`: HOT/WARM/COLD quote cache
//!   - `chart`: Chart artifact caches
//!   - `topic`: Topic naming and classification
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Topic subscription, instrument directory, inbound sink
//!   - `services`: Subscription coordination, inbound routing
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `stream`: STOMP frames, codec, transports, connection manager
//!   - `broadcast`: Channel-based fan-out
//!   - `hub`: Component wiring
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//! quote server ──► ConnectionManager ──► IngestRouter ──► PriorityTierCache ──► BroadcastHub
//!                        ▲                    │                                    │
//!                        │                    └──► ChartDataCache                  ├──► detail
//!              SubscriptionCoordinator ◄── visibility signals                     ├──► aggregate
//!                                                                                  └──► all / challenge
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Quote, cache and topic types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::chart::{ChartCacheConfig, ChartDataCache, Timeframe};
pub use domain::connection::ConnectionState;
pub use domain::quote::{ChallengeTick, InstrumentId, PriorityTier, Quote};
pub use domain::tier_cache::{PriorityTierCache, TierCapacities, TierStats};
pub use domain::topic::{Topic, TopicLayout};

// Application services
pub use application::services::{IngestRouter, SubscriptionCoordinator};

// Infrastructure config
pub use infrastructure::config::{
    AccessToken, BroadcastSettings, ChartCacheSettings, ConfigError, HubConfig, ServerSettings,
    StreamSettings, TierSettings,
};

// Hub
pub use infrastructure::hub::{HubStats, QuoteHub};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Broadcast hub
pub use infrastructure::broadcast::{
    BroadcastConfig, BroadcastHub, BroadcastStats, FanoutChannel, QuoteUpdate, SharedBroadcastHub,
    TierReceiver,
};

// Upstream session
pub use infrastructure::stream::{
    ConnectionConfig, ConnectionManager, ConnectionStats, WebSocketTransport,
};
#[cfg(any(test, feature = "test-util"))]
pub use infrastructure::stream::MemoryTransport;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
