//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the concrete implementations of the port interfaces
//! defined in the application layer.

/// Upstream market-data WebSocket adapter (Polygon, Finnhub).
pub mod upstream;

/// Queue-backed downstream sinks.
pub mod sink;

/// Downstream WebSocket endpoint.
pub mod stream;

/// Price lookup adapters for the ledger.
pub mod price;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// Logging and OpenTelemetry tracing.
pub mod telemetry;
