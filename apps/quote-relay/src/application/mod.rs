//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the relay, fan-out, and ledger services and the
//! port interfaces they depend on.

/// Port interfaces for sinks, the upstream feed, and price lookup.
pub mod ports;

/// Application services for relaying quotes and simulated trading.
pub mod services;
