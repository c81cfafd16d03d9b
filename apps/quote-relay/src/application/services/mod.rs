//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `QuoteRelay`: Keeps the subscription registry and the upstream
//!   connection in step
//! - `FanoutDispatcher`: Delivers upstream quotes to downstream sinks
//! - `ExecutionLedger`: Simulated order execution against live prices

mod fanout;
mod ledger;
mod relay;

pub use fanout::{DEFAULT_SEND_TIMEOUT, DispatchReport, FanoutDispatcher};
pub use ledger::ExecutionLedger;
pub use relay::{QuoteRelay, RelayError, SinkRegistry};
