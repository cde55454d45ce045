//! Upstream connection lifecycle states.

use serde::Serialize;

/// Lifecycle state of the upstream stream connection.
///
/// ```text
/// Disconnected -> Connecting -> Connected
///                     |             |
///                     v             v
///                   Error -> Reconnecting -> Connecting
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    /// No connection and none being attempted.
    #[default]
    Disconnected,
    /// Opening the transport or waiting for the handshake.
    Connecting,
    /// Handshake done; subscriptions are live.
    Connected,
    /// Waiting out a backoff delay before the next attempt.
    Reconnecting,
    /// The last attempt failed. Terminal once retries are exhausted.
    Error,
}

impl ConnectionState {
    /// Lowercase label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Error => "error",
        }
    }

    /// Whether the upstream session is usable.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether a connection attempt is already under way or established.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting | Self::Connected | Self::Reconnecting)
    }

    /// Whether quotes may have been missed while in this state.
    #[must_use]
    pub const fn is_gap(self) -> bool {
        matches!(self, Self::Reconnecting | Self::Error)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
