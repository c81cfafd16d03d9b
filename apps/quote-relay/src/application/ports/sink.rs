//! Downstream Sink Port
//!
//! One connected client channel. The connection handler that creates a sink
//! owns it; the relay only ever sees it through this trait.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::market::Quote;
use crate::domain::subscription::SinkId;

/// Shared handle to a sink.
pub type SharedSink = Arc<dyn QuoteSink>;

/// A downstream consumer of quotes.
#[async_trait]
pub trait QuoteSink: Send + Sync {
    /// Stable identifier of this sink.
    fn id(&self) -> SinkId;

    /// Queue a quote for delivery.
    ///
    /// Implementations must not block indefinitely on a slow client; the
    /// dispatcher additionally bounds every call with a timeout.
    async fn send(&self, quote: Arc<Quote>) -> Result<(), SinkError>;

    /// Check if the sink has been closed.
    fn is_closed(&self) -> bool;

    /// Close the sink. Idempotent.
    fn close(&self);
}

/// Sink write failures.
///
/// Never surfaced to other sinks or the upstream connection; a failing sink
/// is closed and removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The sink (or its client) is gone.
    #[error("sink closed")]
    Closed,

    /// The sink did not accept the quote in time.
    #[error("sink send timed out")]
    Timeout,
}

impl SinkError {
    /// Metric label for this failure.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Timeout => "timeout",
        }
    }
}
