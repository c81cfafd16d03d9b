//! Upstream Providers
//!
//! Connection details for the supported market-data providers. Everything
//! provider-specific is selected here; the rest of the relay only sees
//! normalized quotes.
//!
//! | Provider | Auth                    | Endpoint                          |
//! |----------|-------------------------|-----------------------------------|
//! | Polygon  | `{"action":"auth"}` frame | `wss://socket.polygon.io/stocks` |
//! | Finnhub  | `?token=` in the URI    | `wss://ws.finnhub.io`             |

use std::fmt;

use super::codec::{TimestampUnit, UpstreamCodec};

/// Polygon real-time stocks cluster.
pub const POLYGON_REALTIME_URL: &str = "wss://socket.polygon.io/stocks";

/// Polygon 15-minute delayed stocks cluster.
pub const POLYGON_DELAYED_URL: &str = "wss://delayed.polygon.io/stocks";

/// Finnhub trade stream.
pub const FINNHUB_URL: &str = "wss://ws.finnhub.io";

// =============================================================================
// Provider Kind
// =============================================================================

/// How the provider expects credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// An auth frame sent right after the socket opens.
    Frame,
    /// A token embedded in the connection URI.
    Uri,
}

/// Supported upstream providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    /// Polygon.io stocks quotes.
    #[default]
    Polygon,
    /// Finnhub trades, adapted into quotes.
    Finnhub,
}

impl ProviderKind {
    /// Parse a provider name, case-insensitively.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "polygon" => Some(Self::Polygon),
            "finnhub" => Some(Self::Finnhub),
            _ => None,
        }
    }

    /// Provider name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Polygon => "polygon",
            Self::Finnhub => "finnhub",
        }
    }

    /// Credential mode.
    #[must_use]
    pub const fn auth_mode(self) -> AuthMode {
        match self {
            Self::Polygon => AuthMode::Frame,
            Self::Finnhub => AuthMode::Uri,
        }
    }

    /// Default endpoint. `realtime` only affects Polygon.
    #[must_use]
    pub const fn default_url(self, realtime: bool) -> &'static str {
        match self {
            Self::Polygon if realtime => POLYGON_REALTIME_URL,
            Self::Polygon => POLYGON_DELAYED_URL,
            Self::Finnhub => FINNHUB_URL,
        }
    }

    /// Unit of the provider's event timestamps.
    #[must_use]
    pub const fn timestamp_unit(self) -> TimestampUnit {
        match self {
            Self::Polygon | Self::Finnhub => TimestampUnit::Millis,
        }
    }

    /// Environment variable holding this provider's API key.
    #[must_use]
    pub const fn api_key_var(self) -> &'static str {
        match self {
            Self::Polygon => "POLYGON_API_KEY",
            Self::Finnhub => "FINNHUB_API_KEY",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Credentials
// =============================================================================

/// Provider API key. `Debug` never prints the key.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    /// Wrap a key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

// =============================================================================
// Provider Config
// =============================================================================

/// Everything needed to open an upstream link.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Provider.
    pub kind: ProviderKind,
    /// Endpoint without credentials.
    pub url: String,
    /// API key.
    pub api_key: ApiKey,
}

impl ProviderConfig {
    /// Config for `kind` at its default endpoint.
    #[must_use]
    pub fn new(kind: ProviderKind, api_key: ApiKey, realtime: bool) -> Self {
        Self {
            kind,
            url: kind.default_url(realtime).to_string(),
            api_key,
        }
    }

    /// Override the endpoint.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    /// URL to dial, with the token appended for URI-auth providers.
    #[must_use]
    pub fn connect_url(&self) -> String {
        match self.kind.auth_mode() {
            AuthMode::Frame => self.url.clone(),
            AuthMode::Uri => {
                let sep = if self.url.contains('?') { '&' } else { '?' };
                format!("{}{sep}token={}", self.url, self.api_key.expose())
            }
        }
    }

    /// URL safe for logs.
    #[must_use]
    pub fn redacted_url(&self) -> &str {
        &self.url
    }

    /// Codec for this provider.
    #[must_use]
    pub const fn codec(&self) -> UpstreamCodec {
        UpstreamCodec::new(self.kind)
    }
}
