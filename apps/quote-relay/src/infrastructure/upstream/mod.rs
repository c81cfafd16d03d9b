//! Upstream Market-Data Adapter
//!
//! Implements the upstream port over a provider WebSocket:
//!
//! - **Polygon**: quotes, API key in an auth frame
//! - **Finnhub**: trades adapted into quotes, token in the URI

pub mod auth;
pub mod codec;
pub mod connector;
pub mod messages;
pub mod provider;
pub mod reconnect;

pub use auth::{AUTH_TIMEOUT, AuthError, AuthHandler, AuthState};
pub use codec::{
    CodecError, DecodedFrame, StatusEvent, TimestampUnit, UpstreamCodec, UpstreamEvent,
};
pub use connector::{ConnectorStats, UpstreamConnector};
pub use provider::{ApiKey, AuthMode, ProviderConfig, ProviderKind};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
