//! Configuration Module
//!
//! Configuration loading for the hub service.

mod settings;

pub use settings::{
    AccessToken, BroadcastSettings, ChartCacheSettings, ConfigError, HubConfig, ServerSettings,
    StreamSettings, TierSettings,
};
