//! Configuration Module
//!
//! Configuration loading for the relay service.

mod settings;

pub use settings::{
    ConfigError, FanoutSettings, LedgerSettings, RelayConfig, ServerSettings, UpstreamSettings,
};
