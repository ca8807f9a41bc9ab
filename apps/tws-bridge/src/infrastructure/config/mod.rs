//! Configuration Module
//!
//! Environment-driven configuration for the bridge.

mod settings;

pub use settings::{
    BridgeConfig, BroadcastSettings, ConfigError, GatewaySettings, ReconnectSettings,
    ServerSettings, SessionSettings,
};
