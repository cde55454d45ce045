//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports plus the service shell
//! around them: the STOMP connection, the fan-out channels, configuration
//! and observability.

/// Channel-based fan-out of quote updates and challenge ticks.
pub mod broadcast;

/// Environment-driven configuration.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Hub wiring of caches, connection and coordinator.
pub mod hub;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// STOMP-over-WebSocket session to the quote server.
pub mod stream;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
