//! Relay Configuration Settings
//!
//! Configuration types for the quote relay, loaded from environment variables.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::domain::market::Symbol;
use crate::infrastructure::upstream::{ApiKey, ProviderConfig, ProviderKind};

/// Upstream provider connection settings.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Market-data provider.
    pub provider: ProviderKind,
    /// Provider API key.
    pub api_key: ApiKey,
    /// Use the real-time feed (Polygon only; delayed otherwise).
    pub realtime: bool,
    /// Endpoint override.
    pub url: Option<String>,
    /// Delay before the second connection attempt.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Maximum connection attempts before giving up (0 = unlimited).
    pub max_reconnect_attempts: u32,
}

impl UpstreamSettings {
    /// Settings for `provider` with default reconnect behavior.
    #[must_use]
    pub const fn new(provider: ProviderKind, api_key: ApiKey) -> Self {
        Self {
            provider,
            api_key,
            realtime: false,
            url: None,
            reconnect_delay_initial: Duration::from_millis(1_000),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            max_reconnect_attempts: 10,
        }
    }

    /// Provider connection config.
    #[must_use]
    pub fn provider_config(&self) -> ProviderConfig {
        let config = ProviderConfig::new(self.provider, self.api_key.clone(), self.realtime);
        match &self.url {
            Some(url) => config.with_url(url.clone()),
            None => config,
        }
    }
}

/// Fan-out settings.
#[derive(Debug, Clone)]
pub struct FanoutSettings {
    /// Per-client outbound queue capacity.
    pub sink_capacity: usize,
    /// Bound on a single sink write.
    pub send_timeout: Duration,
    /// Capacity of the upstream → dispatcher quote channel.
    pub inbound_capacity: usize,
}

impl Default for FanoutSettings {
    fn default() -> Self {
        Self {
            sink_capacity: 256,
            send_timeout: Duration::from_millis(250),
            inbound_capacity: 4_096,
        }
    }
}

/// Simulated ledger settings.
#[derive(Debug, Clone)]
pub struct LedgerSettings {
    /// Starting cash balance.
    pub seed_cash: Decimal,
    /// Prices used when no quote has been relayed for a symbol.
    pub static_prices: HashMap<Symbol, Decimal>,
    /// How often positions are re-marked at the latest price.
    pub revalue_interval: Duration,
    /// Ask the provider's REST API for symbols without a relayed quote.
    pub rest_prices: bool,
    /// REST endpoint override.
    pub rest_price_url: Option<String>,
    /// Bound on one REST price request.
    pub rest_price_timeout: Duration,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            seed_cash: Decimal::from(100_000),
            static_prices: HashMap::new(),
            revalue_interval: Duration::from_secs(5),
            rest_prices: true,
            rest_price_url: None,
            rest_price_timeout: Duration::from_secs(2),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Downstream WebSocket port.
    pub stream_port: u16,
    /// Health check and metrics HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            stream_port: 8080,
            health_port: 8082,
        }
    }
}

/// Complete relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Upstream provider settings.
    pub upstream: UpstreamSettings,
    /// Server port settings.
    pub server: ServerSettings,
    /// Fan-out settings.
    pub fanout: FanoutSettings,
    /// Ledger settings.
    pub ledger: LedgerSettings,
}

impl RelayConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider's API key is missing or empty, or
    /// if a provider name, decimal, or price list cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        let provider = match std::env::var("QUOTE_PROVIDER") {
            Ok(name) => ProviderKind::parse(&name).ok_or_else(|| ConfigError::InvalidValue {
                key: "QUOTE_PROVIDER".to_string(),
                value: name,
            })?,
            Err(_) => ProviderKind::default(),
        };

        let key_var = provider.api_key_var();
        let api_key =
            std::env::var(key_var).map_err(|_| ConfigError::MissingEnvVar(key_var.to_string()))?;
        if api_key.trim().is_empty() {
            return Err(ConfigError::EmptyValue(key_var.to_string()));
        }

        let defaults = UpstreamSettings::new(provider, ApiKey::new(api_key.trim()));
        let upstream = UpstreamSettings {
            realtime: parse_env_bool("POLYGON_REALTIME", false),
            url: std::env::var("QUOTE_RELAY_UPSTREAM_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            reconnect_delay_initial: parse_env_duration_millis(
                "QUOTE_RELAY_RECONNECT_DELAY_INITIAL_MS",
                defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                "QUOTE_RELAY_RECONNECT_DELAY_MAX_SECS",
                defaults.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env_f64(
                "QUOTE_RELAY_RECONNECT_DELAY_MULTIPLIER",
                defaults.reconnect_delay_multiplier,
            ),
            max_reconnect_attempts: parse_env_u32(
                "QUOTE_RELAY_MAX_RECONNECT_ATTEMPTS",
                defaults.max_reconnect_attempts,
            ),
            ..defaults
        };

        let server = ServerSettings {
            stream_port: parse_env_u16(
                "QUOTE_RELAY_STREAM_PORT",
                ServerSettings::default().stream_port,
            ),
            health_port: parse_env_u16(
                "QUOTE_RELAY_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        let fanout = FanoutSettings {
            sink_capacity: parse_env_usize(
                "QUOTE_RELAY_SINK_CAPACITY",
                FanoutSettings::default().sink_capacity,
            )
            .max(1),
            send_timeout: parse_env_duration_millis(
                "QUOTE_RELAY_SINK_SEND_TIMEOUT_MS",
                FanoutSettings::default().send_timeout,
            ),
            inbound_capacity: parse_env_usize(
                "QUOTE_RELAY_INBOUND_CAPACITY",
                FanoutSettings::default().inbound_capacity,
            )
            .max(1),
        };

        let ledger = LedgerSettings {
            seed_cash: parse_env_decimal("LEDGER_SEED_CASH", LedgerSettings::default().seed_cash)?,
            static_prices: match std::env::var("LEDGER_STATIC_PRICES") {
                Ok(raw) => parse_price_list(&raw).map_err(|value| ConfigError::InvalidValue {
                    key: "LEDGER_STATIC_PRICES".to_string(),
                    value,
                })?,
                Err(_) => HashMap::new(),
            },
            revalue_interval: parse_env_duration_secs(
                "LEDGER_REVALUE_INTERVAL_SECS",
                LedgerSettings::default().revalue_interval,
            )
            .max(Duration::from_secs(1)),
            rest_prices: parse_env_bool("LEDGER_REST_PRICES", LedgerSettings::default().rest_prices),
            rest_price_url: std::env::var("LEDGER_REST_PRICE_URL")
                .ok()
                .filter(|url| !url.trim().is_empty()),
            rest_price_timeout: parse_env_duration_millis(
                "LEDGER_REST_PRICE_TIMEOUT_MS",
                LedgerSettings::default().rest_price_timeout,
            ),
        };

        Ok(Self {
            upstream,
            server,
            fanout,
            ledger,
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
    /// Environment variable could not be parsed.
    #[error("environment variable {key} has invalid value {value:?}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// Offending value.
        value: String,
    },
}

/// Parse `SYM=PRICE` pairs separated by commas.
///
/// Returns the offending entry on failure.
fn parse_price_list(raw: &str) -> Result<HashMap<Symbol, Decimal>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let (symbol, price) = entry.split_once('=').ok_or_else(|| entry.to_string())?;
            let symbol = Symbol::parse(symbol).map_err(|_| entry.to_string())?;
            let price = Decimal::from_str(price.trim()).map_err(|_| entry.to_string())?;
            if price <= Decimal::ZERO {
                return Err(entry.to_string());
            }
            Ok((symbol, price))
        })
        .collect()
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map_or(default, |v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_decimal(key: &str, default: Decimal) -> Result<Decimal, ConfigError> {
    match std::env::var(key) {
        Ok(value) => Decimal::from_str(value.trim())
            .ok()
            .filter(|d| *d > Decimal::ZERO)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(default),
    }
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
