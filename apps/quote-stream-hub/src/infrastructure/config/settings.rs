//! Hub Configuration Settings
//!
//! Configuration types for the quote hub, loaded from `QUOTE_HUB_*`
//! environment variables. Unset or unparseable optional values fall back to
//! their defaults.

use std::str::FromStr;
use std::time::Duration;

use chrono::FixedOffset;

use crate::domain::chart::{ChartCacheConfig, seoul_offset};
use crate::domain::tier_cache::TierCapacities;
use crate::domain::topic::{Topic, TopicLayout};
use crate::infrastructure::stream::{
    ConnectionConfig, HeartbeatConfig, ReconnectConfig, TopicRetryConfig,
};

/// Bearer token for the STOMP `CONNECT` frame.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a token.
    #[must_use]
    pub const fn new(token: String) -> Self {
        Self(token)
    }

    /// Get the raw token.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken([REDACTED])")
    }
}

/// Upstream connection settings.
#[derive(Debug, Clone)]
pub struct StreamSettings {
    /// WebSocket endpoint, `ws://` or `wss://`.
    pub url: String,
    /// Optional bearer token.
    pub access_token: Option<AccessToken>,
    /// Heartbeat ping interval.
    pub heartbeat_interval: Duration,
    /// Silence before the session is considered dead.
    pub heartbeat_timeout: Duration,
    /// Time allowed for the STOMP handshake.
    pub handshake_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Jitter fraction applied to reconnection delays.
    pub reconnect_jitter_factor: f64,
    /// Maximum reconnection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
    /// Retry schedule of ordinary topics.
    pub topic_retry: TopicRetryConfig,
    /// Retry schedule of the featured challenge topic.
    pub priority_topic_retry: TopicRetryConfig,
}

impl StreamSettings {
    /// Defaults for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        let reconnect = ReconnectConfig::default();
        let heartbeat = HeartbeatConfig::default();
        Self {
            url: url.into(),
            access_token: None,
            heartbeat_interval: heartbeat.ping_interval,
            heartbeat_timeout: heartbeat.timeout,
            handshake_timeout: Duration::from_secs(10),
            reconnect_delay_initial: reconnect.initial_delay,
            reconnect_delay_max: reconnect.max_delay,
            reconnect_delay_multiplier: reconnect.multiplier,
            reconnect_jitter_factor: reconnect.jitter_factor,
            max_reconnect_attempts: reconnect.max_attempts,
            topic_retry: TopicRetryConfig::ORDINARY,
            priority_topic_retry: TopicRetryConfig::PRIORITY,
        }
    }

    /// Connection manager configuration, retrying `priority_topic` on the
    /// priority schedule.
    #[must_use]
    pub fn connection_config(&self, priority_topic: Option<Topic>) -> ConnectionConfig {
        ConnectionConfig {
            access_token: self.access_token.as_ref().map(|t| t.expose().to_string()),
            reconnect: ReconnectConfig {
                initial_delay: self.reconnect_delay_initial,
                max_delay: self.reconnect_delay_max,
                multiplier: self.reconnect_delay_multiplier,
                jitter_factor: self.reconnect_jitter_factor,
                max_attempts: self.max_reconnect_attempts,
            },
            heartbeat: HeartbeatConfig {
                ping_interval: self.heartbeat_interval,
                timeout: self.heartbeat_timeout,
            },
            handshake_timeout: self.handshake_timeout,
            topic_retry: self.topic_retry,
            priority_topic_retry: self.priority_topic_retry,
            priority_topic,
            ..ConnectionConfig::new(self.url.clone())
        }
    }
}

/// Per-tier capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierSettings {
    /// HOT entries.
    pub hot_capacity: usize,
    /// WARM entries.
    pub warm_capacity: usize,
    /// COLD entries.
    pub cold_capacity: usize,
}

impl Default for TierSettings {
    fn default() -> Self {
        let caps = TierCapacities::default();
        Self {
            hot_capacity: caps.hot,
            warm_capacity: caps.warm,
            cold_capacity: caps.cold,
        }
    }
}

impl From<TierSettings> for TierCapacities {
    fn from(settings: TierSettings) -> Self {
        Self {
            hot: settings.hot_capacity,
            warm: settings.warm_capacity,
            cold: settings.cold_capacity,
        }
    }
}

/// Chart cache bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartCacheSettings {
    /// Instrument info entries.
    pub info_capacity: usize,
    /// Candlestick series entries.
    pub candle_capacity: usize,
    /// Volume series entries.
    pub volume_capacity: usize,
    /// Indicator bundle entries.
    pub indicator_capacity: usize,
    /// Instrument info TTL.
    pub info_ttl: Duration,
    /// Candlestick series TTL.
    pub candle_ttl: Duration,
    /// Volume series TTL.
    pub volume_ttl: Duration,
    /// Indicator bundle TTL.
    pub indicator_ttl: Duration,
    /// Maximum points per series.
    pub max_points: usize,
    /// Market time zone.
    pub market_offset: FixedOffset,
}

impl Default for ChartCacheSettings {
    fn default() -> Self {
        ChartCacheConfig::default().into()
    }
}

impl From<ChartCacheConfig> for ChartCacheSettings {
    fn from(config: ChartCacheConfig) -> Self {
        Self {
            info_capacity: config.info_capacity,
            candle_capacity: config.candle_capacity,
            volume_capacity: config.volume_capacity,
            indicator_capacity: config.indicator_capacity,
            info_ttl: config.info_ttl,
            candle_ttl: config.candle_ttl,
            volume_ttl: config.volume_ttl,
            indicator_ttl: config.indicator_ttl,
            max_points: config.max_points,
            market_offset: config.market_offset,
        }
    }
}

impl From<ChartCacheSettings> for ChartCacheConfig {
    fn from(settings: ChartCacheSettings) -> Self {
        Self {
            info_capacity: settings.info_capacity,
            candle_capacity: settings.candle_capacity,
            volume_capacity: settings.volume_capacity,
            indicator_capacity: settings.indicator_capacity,
            info_ttl: settings.info_ttl,
            candle_ttl: settings.candle_ttl,
            volume_ttl: settings.volume_ttl,
            indicator_ttl: settings.indicator_ttl,
            max_points: settings.max_points,
            market_offset: settings.market_offset,
        }
    }
}

/// Broadcast channel settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastSettings {
    /// Capacity of the every-quote channel.
    pub all_updates_capacity: usize,
    /// Capacity of the HOT channel.
    pub detail_capacity: usize,
    /// Capacity of the WARM channel.
    pub aggregate_capacity: usize,
    /// Capacity of the challenge channel.
    pub challenge_capacity: usize,
}

impl Default for BroadcastSettings {
    fn default() -> Self {
        Self {
            all_updates_capacity: 4_096,
            detail_capacity: 256,
            aggregate_capacity: 1_024,
            challenge_capacity: 256,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8082 }
    }
}

/// Complete hub configuration.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Upstream connection.
    pub stream: StreamSettings,
    /// Topic names.
    pub topics: TopicLayout,
    /// Tier capacities.
    pub tiers: TierSettings,
    /// Chart cache bounds.
    pub charts: ChartCacheSettings,
    /// Fan-out capacities.
    pub broadcast: BroadcastSettings,
    /// Server ports.
    pub server: ServerSettings,
    /// Instruments subscribed before the first visibility signal.
    pub seed_instruments: Vec<String>,
}

impl HubConfig {
    /// Defaults for `url`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            stream: StreamSettings::new(url),
            topics: TopicLayout::default(),
            tiers: TierSettings::default(),
            charts: ChartCacheSettings::default(),
            broadcast: BroadcastSettings::default(),
            server: ServerSettings::default(),
            seed_instruments: Vec::new(),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `QUOTE_HUB_STREAM_URL` is missing, empty or not a
    /// WebSocket URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Same as [`HubConfig::from_env`].
    pub fn from_lookup(env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let env = &env as &dyn Fn(&str) -> Option<String>;

        let url = env("QUOTE_HUB_STREAM_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("QUOTE_HUB_STREAM_URL".to_string()))?;
        let url = url.trim().to_string();
        if url.is_empty() {
            return Err(ConfigError::EmptyValue("QUOTE_HUB_STREAM_URL".to_string()));
        }
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue {
                key: "QUOTE_HUB_STREAM_URL".to_string(),
                reason: "expected a ws:// or wss:// URL".to_string(),
            });
        }

        let defaults = Self::new(url);

        let access_token = env("QUOTE_HUB_ACCESS_TOKEN")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .map(AccessToken::new);

        let d = &defaults.stream;
        let stream = StreamSettings {
            url: d.url.clone(),
            access_token,
            heartbeat_interval: parse_env_duration_secs(
                env,
                "QUOTE_HUB_HEARTBEAT_INTERVAL_SECS",
                d.heartbeat_interval,
            ),
            heartbeat_timeout: parse_env_duration_secs(
                env,
                "QUOTE_HUB_HEARTBEAT_TIMEOUT_SECS",
                d.heartbeat_timeout,
            ),
            handshake_timeout: parse_env_duration_secs(
                env,
                "QUOTE_HUB_HANDSHAKE_TIMEOUT_SECS",
                d.handshake_timeout,
            ),
            reconnect_delay_initial: parse_env_duration_millis(
                env,
                "QUOTE_HUB_RECONNECT_DELAY_INITIAL_MS",
                d.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                env,
                "QUOTE_HUB_RECONNECT_DELAY_MAX_SECS",
                d.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env(
                env,
                "QUOTE_HUB_RECONNECT_DELAY_MULTIPLIER",
                d.reconnect_delay_multiplier,
            ),
            reconnect_jitter_factor: parse_env(
                env,
                "QUOTE_HUB_RECONNECT_JITTER_FACTOR",
                d.reconnect_jitter_factor,
            ),
            max_reconnect_attempts: parse_env(
                env,
                "QUOTE_HUB_MAX_RECONNECT_ATTEMPTS",
                d.max_reconnect_attempts,
            ),
            topic_retry: TopicRetryConfig {
                step: parse_env_duration_millis(
                    env,
                    "QUOTE_HUB_TOPIC_RETRY_STEP_MS",
                    d.topic_retry.step,
                ),
                max_retries: parse_env(env, "QUOTE_HUB_TOPIC_MAX_RETRIES", d.topic_retry.max_retries),
            },
            priority_topic_retry: TopicRetryConfig {
                step: parse_env_duration_millis(
                    env,
                    "QUOTE_HUB_PRIORITY_TOPIC_RETRY_STEP_MS",
                    d.priority_topic_retry.step,
                ),
                max_retries: parse_env(
                    env,
                    "QUOTE_HUB_PRIORITY_TOPIC_MAX_RETRIES",
                    d.priority_topic_retry.max_retries,
                ),
            },
        };

        let d = &defaults.topics;
        let topics = TopicLayout {
            instrument_prefix: parse_env_string(env, "QUOTE_HUB_TOPIC_INSTRUMENT_PREFIX", &d.instrument_prefix),
            all_instruments: parse_env_string(env, "QUOTE_HUB_TOPIC_ALL_INSTRUMENTS", &d.all_instruments),
            featured_challenge: parse_env_string(
                env,
                "QUOTE_HUB_TOPIC_FEATURED_CHALLENGE",
                &d.featured_challenge,
            ),
            chart_prefix: parse_env_string(env, "QUOTE_HUB_TOPIC_CHART_PREFIX", &d.chart_prefix),
        };

        let d = defaults.tiers;
        let tiers = TierSettings {
            hot_capacity: parse_env(env, "QUOTE_HUB_TIER_HOT_CAPACITY", d.hot_capacity),
            warm_capacity: parse_env(env, "QUOTE_HUB_TIER_WARM_CAPACITY", d.warm_capacity),
            cold_capacity: parse_env(env, "QUOTE_HUB_TIER_COLD_CAPACITY", d.cold_capacity),
        };

        let d = defaults.charts;
        let charts = ChartCacheSettings {
            info_capacity: parse_env(env, "QUOTE_HUB_CHART_INFO_CAPACITY", d.info_capacity),
            candle_capacity: parse_env(env, "QUOTE_HUB_CHART_CANDLE_CAPACITY", d.candle_capacity),
            volume_capacity: parse_env(env, "QUOTE_HUB_CHART_VOLUME_CAPACITY", d.volume_capacity),
            indicator_capacity: parse_env(
                env,
                "QUOTE_HUB_CHART_INDICATOR_CAPACITY",
                d.indicator_capacity,
            ),
            info_ttl: parse_env_duration_secs(env, "QUOTE_HUB_CHART_INFO_TTL_SECS", d.info_ttl),
            candle_ttl: parse_env_duration_secs(env, "QUOTE_HUB_CHART_CANDLE_TTL_SECS", d.candle_ttl),
            volume_ttl: parse_env_duration_secs(env, "QUOTE_HUB_CHART_VOLUME_TTL_SECS", d.volume_ttl),
            indicator_ttl: parse_env_duration_secs(
                env,
                "QUOTE_HUB_CHART_INDICATOR_TTL_SECS",
                d.indicator_ttl,
            ),
            max_points: parse_env(env, "QUOTE_HUB_CHART_MAX_POINTS", d.max_points),
            market_offset: env("QUOTE_HUB_MARKET_UTC_OFFSET_SECS")
                .and_then(|v| v.trim().parse::<i32>().ok())
                .and_then(FixedOffset::east_opt)
                .unwrap_or_else(seoul_offset),
        };

        let d = defaults.broadcast;
        let broadcast = BroadcastSettings {
            all_updates_capacity: parse_env(
                env,
                "QUOTE_HUB_ALL_UPDATES_CAPACITY",
                d.all_updates_capacity,
            ),
            detail_capacity: parse_env(env, "QUOTE_HUB_DETAIL_CAPACITY", d.detail_capacity),
            aggregate_capacity: parse_env(env, "QUOTE_HUB_AGGREGATE_CAPACITY", d.aggregate_capacity),
            challenge_capacity: parse_env(env, "QUOTE_HUB_CHALLENGE_CAPACITY", d.challenge_capacity),
        };

        let server = ServerSettings {
            health_port: parse_env(env, "QUOTE_HUB_HEALTH_PORT", defaults.server.health_port),
        };

        let seed_instruments = env("QUOTE_HUB_SEED_INSTRUMENTS")
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|code| !code.is_empty())
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            stream,
            topics,
            tiers,
            charts,
            broadcast,
            server,
            seed_instruments,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable is set but unusable.
    #[error("environment variable {key} is invalid: {reason}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn parse_env<T: FromStr>(env: Lookup<'_>, key: &str, default: T) -> T {
    env(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_string(env: Lookup<'_>, key: &str, default: &str) -> String {
    env(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_duration_secs(env: Lookup<'_>, key: &str, default: Duration) -> Duration {
    env(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(env: Lookup<'_>, key: &str, default: Duration) -> Duration {
    env(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn stream_url_is_required() {
        let err = HubConfig::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "QUOTE_HUB_STREAM_URL"));

        let err = HubConfig::from_lookup(lookup(&[("QUOTE_HUB_STREAM_URL", "  ")])).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyValue(_)));
    }

    #[test]
    fn stream_url_must_be_websocket() {
        let err = HubConfig::from_lookup(lookup(&[("QUOTE_HUB_STREAM_URL", "https://q.example")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn defaults_apply() {
        let config = HubConfig::from_lookup(lookup(&[("QUOTE_HUB_STREAM_URL", "wss://q.example/ws")]))
            .unwrap();

        assert_eq!(config.stream.reconnect_delay_initial, Duration::from_millis(1000));
        assert!((config.stream.reconnect_delay_multiplier - 2.0).abs() < f64::EPSILON);
        assert_eq!(config.stream.max_reconnect_attempts, 5);
        assert_eq!(config.stream.topic_retry, TopicRetryConfig::ORDINARY);
        assert_eq!(config.stream.priority_topic_retry, TopicRetryConfig::PRIORITY);
        assert_eq!(config.stream.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.stream.heartbeat_timeout, Duration::from_secs(30));
        assert_eq!(TierCapacities::from(config.tiers), TierCapacities::default());
        assert_eq!(config.charts.max_points, 2000);
        assert_eq!(config.charts.market_offset.local_minus_utc(), 9 * 3600);
        assert_eq!(config.server.health_port, 8082);
        assert!(config.stream.access_token.is_none());
        assert!(config.seed_instruments.is_empty());
    }

    #[test]
    fn overrides_and_fallbacks() {
        let config = HubConfig::from_lookup(lookup(&[
            ("QUOTE_HUB_STREAM_URL", "ws://localhost:8080/ws"),
            ("QUOTE_HUB_MAX_RECONNECT_ATTEMPTS", "3"),
            ("QUOTE_HUB_TIER_HOT_CAPACITY", "not-a-number"),
            ("QUOTE_HUB_TOPIC_ALL_INSTRUMENTS", "/topic/quotes/all"),
            ("QUOTE_HUB_SEED_INSTRUMENTS", "005930, 000660,,035720"),
            ("QUOTE_HUB_MARKET_UTC_OFFSET_SECS", "0"),
        ]))
        .unwrap();

        assert_eq!(config.stream.max_reconnect_attempts, 3);
        assert_eq!(config.tiers.hot_capacity, 50);
        assert_eq!(config.topics.all_instruments, "/topic/quotes/all");
        assert_eq!(config.seed_instruments, ["005930", "000660", "035720"]);
        assert_eq!(config.charts.market_offset.local_minus_utc(), 0);
    }

    #[test]
    fn access_token_is_redacted() {
        let config = HubConfig::from_lookup(lookup(&[
            ("QUOTE_HUB_STREAM_URL", "wss://q.example/ws"),
            ("QUOTE_HUB_ACCESS_TOKEN", "secret-token"),
        ]))
        .unwrap();

        let debug = format!("{config:?}");
        assert!(!debug.contains("secret-token"));
        assert!(debug.contains("[REDACTED]"));

        let connection = config.stream.connection_config(None);
        assert_eq!(connection.access_token.as_deref(), Some("secret-token"));
        assert_eq!(connection.host, "q.example");
    }
}
