//! Domain Layer - Quote, cache and subscription types.
//!
//! Pure in-memory types with no I/O. Shared state is guarded by
//! `parking_lot` mutexes and never held across an `.await`.

/// Chart artifact caches (info, candles, volume, indicators).
pub mod chart;

/// Upstream connection states.
pub mod connection;

/// Bounded least-recently-used map.
pub mod lru;

/// Quote snapshots and priority tiers.
pub mod quote;

/// Three-tier quote cache.
pub mod tier_cache;

/// Topic naming and classification.
pub mod topic;
