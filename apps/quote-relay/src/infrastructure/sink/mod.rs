//! Channel Sink
//!
//! `QuoteSink` backed by a bounded mpsc queue. The dispatcher pushes into
//! the queue; the connection task that owns the `SinkReceiver` drains it
//! into the client socket. Closing either side wakes the other.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{QuoteSink, SinkError};
use crate::domain::market::Quote;
use crate::domain::subscription::SinkId;

/// Sink writing into a bounded per-client queue.
#[derive(Debug)]
pub struct ChannelSink {
    id: SinkId,
    tx: mpsc::Sender<Arc<Quote>>,
    closed: CancellationToken,
}

impl ChannelSink {
    /// Create a sink and the receiving half its connection task drains.
    #[must_use]
    pub fn new(capacity: usize) -> (Arc<Self>, SinkReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let closed = CancellationToken::new();

        let sink = Arc::new(Self {
            id: SinkId::random(),
            tx,
            closed: closed.clone(),
        });

        (sink, SinkReceiver { rx, closed })
    }
}

#[async_trait]
impl QuoteSink for ChannelSink {
    fn id(&self) -> SinkId {
        self.id
    }

    async fn send(&self, quote: Arc<Quote>) -> Result<(), SinkError> {
        if self.closed.is_cancelled() {
            return Err(SinkError::Closed);
        }

        tokio::select! {
            biased;

            () = self.closed.cancelled() => Err(SinkError::Closed),
            sent = self.tx.send(quote) => sent.map_err(|_| SinkError::Closed),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled() || self.tx.is_closed()
    }

    fn close(&self) {
        self.closed.cancel();
    }
}

/// Receiving half of a `ChannelSink`.
#[derive(Debug)]
pub struct SinkReceiver {
    rx: mpsc::Receiver<Arc<Quote>>,
    closed: CancellationToken,
}

impl SinkReceiver {
    /// Next queued quote, or `None` once the sink is closed.
    pub async fn recv(&mut self) -> Option<Arc<Quote>> {
        tokio::select! {
            biased;

            () = self.closed.cancelled() => None,
            quote = self.rx.recv() => quote,
        }
    }

    /// Close the sink from the receiving side.
    pub fn close(&self) {
        self.closed.cancel();
    }

    /// Check if the sink has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
