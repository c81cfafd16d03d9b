#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::similar_names
    )
)]

//! Quote Relay - Market Data Fan-out
//!
//! Keeps one connection to an upstream market-data provider and fans its
//! quotes out to any number of downstream WebSocket clients, subscribing
//! upstream only for symbols somebody is watching. A simulated execution
//! ledger prices orders from the relayed quotes.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure types and rules
//!   - `market`: Symbols, quotes, latest-quote cache
//!   - `subscription`: Symbol → sink registry
//!   - `ledger`: Account, orders, order store
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Upstream feed, downstream sink, price source
//!   - `services`: Relay, fan-out dispatcher, execution ledger
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `upstream`: Provider WebSocket connector and codecs
//!   - `sink` / `stream`: Per-client queues and the `/stream/{symbol}` endpoint
//!   - `price`: Ledger price lookup (relayed quotes, provider REST, static table)
//!   - `config`, `health`, `metrics`, `telemetry`
//!
//! # Data Flow
//!
//! ```text
//!                    subscribe / unsubscribe
//!              ┌──────────────────────────────────┐
//!              ▼                                  │
//! Provider WS ──► UpstreamConnector ──► FanoutDispatcher ──► Sink 1 ──► Client 1
//!                                          │      │
//!                                          │      └────────► Sink N ──► Client N
//!                                          ▼
//!                                    LatestQuotes ──► ExecutionLedger
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Market data, subscriptions, and ledger rules.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::ledger::{
    AccountSnapshot, LedgerError, Order, OrderId, OrderQuery, OrderRequest, OrderSide, OrderSize,
    OrderStatus, OrderType, PositionSnapshot, StatusFilter, TimeInForce,
};
pub use domain::market::{LatestQuotes, Quote, Symbol, SymbolError};
pub use domain::subscription::{SinkId, SubscriptionChange, SubscriptionRegistry, SubscriptionStats};

// Ports
pub use application::ports::{
    ConnectionState, PriceError, PriceSource, QuoteSink, Session, SharedSink, SinkError,
    UpstreamCommand, UpstreamError, UpstreamPort,
};

// Services
pub use application::services::{
    DispatchReport, ExecutionLedger, FanoutDispatcher, QuoteRelay, RelayError,
};

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, FanoutSettings, LedgerSettings, RelayConfig, ServerSettings, UpstreamSettings,
};

// Upstream connector
pub use infrastructure::upstream::{
    ApiKey, ConnectorStats, ProviderConfig, ProviderKind, ReconnectConfig, UpstreamConnector,
};

// Servers
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::stream::{StreamServer, StreamServerError, StreamState};

// Adapters
pub use infrastructure::price::{RelayPriceSource, RestPrices, StaticPrices};
pub use infrastructure::sink::{ChannelSink, SinkReceiver};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
