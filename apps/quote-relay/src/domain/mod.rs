//! Domain Layer - Core business logic
//!
//! This layer contains pure business logic with no external dependencies.
//! Following Clean Architecture principles, the domain layer:
//! - Has no dependencies on infrastructure or application layers
//! - Contains market data types, subscription bookkeeping, and the ledger
//! - Defines the rules that govern fan-out and simulated trading

/// Symbols, quotes, and the latest-quote cache.
pub mod market;

/// Symbol → sink bookkeeping for the shared upstream connection.
pub mod subscription;

/// Simulated account, orders, and order store.
pub mod ledger;
