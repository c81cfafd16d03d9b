//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `UpstreamPort`: The single shared market-data connection
//! - `QuoteSink`: One downstream client channel
//! - `PriceSource`: Latest price lookup for the ledger

mod price;
mod sink;
mod upstream;

pub use price::{PriceError, PriceSource};
pub use sink::{QuoteSink, SharedSink, SinkError};
pub use upstream::{ConnectionState, Session, UpstreamCommand, UpstreamError, UpstreamPort};

#[cfg(test)]
pub use price::MockPriceSource;
#[cfg(test)]
pub use upstream::MockUpstreamPort;
