//! Fan-out Dispatcher
//!
//! Routes each decoded upstream quote to the sinks registered for its
//! symbol. Quotes are consumed one at a time, so per-sink order matches
//! upstream receive order; the sends for one quote run concurrently, each
//! bounded by the send timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use super::relay::QuoteRelay;
use crate::application::ports::{SharedSink, SinkError};
use crate::domain::market::{LatestQuotes, Quote};
use crate::domain::subscription::SinkId;
use crate::infrastructure::metrics;

/// Default bound on a single sink write.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(250);

/// Outcome of dispatching one quote.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Sinks that accepted the quote.
    pub delivered: usize,
    /// Sinks closed and removed during this dispatch.
    pub evicted: usize,
}

/// Delivers quotes from the upstream channel to downstream sinks.
#[derive(Debug)]
pub struct FanoutDispatcher {
    relay: Arc<QuoteRelay>,
    latest: Arc<LatestQuotes>,
    send_timeout: Duration,
}

impl FanoutDispatcher {
    /// Create a dispatcher.
    #[must_use]
    pub const fn new(
        relay: Arc<QuoteRelay>,
        latest: Arc<LatestQuotes>,
        send_timeout: Duration,
    ) -> Self {
        Self {
            relay,
            latest,
            send_timeout,
        }
    }

    /// Deliver one quote to every sink registered for its symbol.
    ///
    /// A sink that fails or times out is closed and removed; the failure is
    /// never propagated.
    pub async fn dispatch(&self, quote: Quote) -> DispatchReport {
        let started = Instant::now();
        self.latest.record(&quote);

        let targets = self.relay.registry().sinks_for(&quote.symbol);
        if targets.is_empty() {
            trace!(symbol = %quote.symbol, "no sinks for quote");
            return DispatchReport::default();
        }

        let mut live: Vec<SharedSink> = Vec::with_capacity(targets.len());
        let mut failed: Vec<(SinkId, SinkError)> = Vec::new();
        for (id, sink) in targets {
            match sink.upgrade() {
                Some(sink) if !sink.is_closed() => live.push(sink),
                _ => failed.push((id, SinkError::Closed)),
            }
        }

        let quote = Arc::new(quote);
        let timeout = self.send_timeout;
        let outcomes = join_all(live.into_iter().map(|sink| {
            let quote = Arc::clone(&quote);
            async move {
                let outcome = tokio::time::timeout(timeout, sink.send(quote))
                    .await
                    .unwrap_or(Err(SinkError::Timeout));
                (sink, outcome)
            }
        }))
        .await;

        let mut report = DispatchReport::default();
        for (sink, outcome) in outcomes {
            match outcome {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    sink.close();
                    failed.push((sink.id(), e));
                }
            }
        }

        for (id, reason) in failed {
            debug!(sink = %id, symbol = %quote.symbol, reason = reason.as_str(), "evicting sink");
            metrics::record_sink_evicted(reason.as_str());
            self.relay.disconnect(id).await;
            report.evicted += 1;
        }

        metrics::record_quotes_delivered(report.delivered as u64);
        metrics::record_dispatch_duration(started.elapsed());
        report
    }

    /// Consume quotes until the channel closes or `cancel` fires.
    pub async fn run(self: Arc<Self>, mut quotes: mpsc::Receiver<Quote>, cancel: CancellationToken) {
        info!("fan-out dispatcher started");

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                next = quotes.recv() => match next {
                    Some(quote) => {
                        self.dispatch(quote).await;
                    }
                    None => break,
                },
            }
        }

        info!("fan-out dispatcher stopped");
    }
}
