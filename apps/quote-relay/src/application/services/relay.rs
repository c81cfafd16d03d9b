//! Quote Relay Service
//!
//! Owns the subscription registry and the upstream port, and keeps them in
//! step: every registry decision and the upstream command it implies are
//! applied under one async gate, so commands reach the provider in the
//! order they were decided.
//!
//! # Reconnects
//!
//! The gate remembers the generation of the link the current upstream
//! subscriptions were sent on. When a newer generation shows up, the
//! provider has forgotten everything and the full active set is replayed.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::ports::{
    ConnectionState, QuoteSink, Session, SharedSink, UpstreamCommand, UpstreamError, UpstreamPort,
};
use crate::domain::market::Symbol;
use crate::domain::subscription::{SinkId, SubscriptionChange, SubscriptionRegistry, SubscriptionStats};
use crate::infrastructure::metrics;

/// Registry of downstream sinks.
pub type SinkRegistry = SubscriptionRegistry<dyn QuoteSink>;

/// Passes over the active set before a churning link is reported.
const MAX_REPLAY_PASSES: usize = 3;

/// Relay errors surfaced to the subscribing connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// The upstream subscribe could not be delivered.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

#[derive(Debug, Default)]
struct GateState {
    /// Generation of the link holding the current upstream subscriptions.
    generation: Option<u64>,
}

// =============================================================================
// Quote Relay
// =============================================================================

/// Composes the subscription registry with the shared upstream connection.
pub struct QuoteRelay {
    registry: Arc<SinkRegistry>,
    upstream: Arc<dyn UpstreamPort>,
    gate: Mutex<GateState>,
}

impl std::fmt::Debug for QuoteRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuoteRelay")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl QuoteRelay {
    /// Create a relay over an upstream port.
    #[must_use]
    pub fn new(upstream: Arc<dyn UpstreamPort>) -> Self {
        Self {
            registry: Arc::new(SinkRegistry::new()),
            upstream,
            gate: Mutex::new(GateState::default()),
        }
    }

    /// The sink registry.
    #[must_use]
    pub fn registry(&self) -> &SinkRegistry {
        &self.registry
    }

    /// Current registry statistics.
    #[must_use]
    pub fn stats(&self) -> SubscriptionStats {
        self.registry.stats()
    }

    /// Register a sink for a symbol, subscribing upstream if it is the first.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::Upstream` if the upstream subscribe fails. The
    /// registration is rolled back in that case.
    pub async fn subscribe(&self, symbol: &Symbol, sink: &SharedSink) -> Result<(), RelayError> {
        let mut gate = self.gate.lock().await;
        let id = sink.id();

        let change = self.registry.subscribe(symbol, id, sink);
        if change != SubscriptionChange::Subscribe {
            debug!(%symbol, sink = %id, "joined existing subscription");
            self.publish_stats();
            return Ok(());
        }

        match self.subscribe_upstream(&mut gate, symbol).await {
            Ok(()) => {
                info!(%symbol, sink = %id, "subscribed upstream");
                self.publish_stats();
                Ok(())
            }
            Err(e) => {
                let _ = self.registry.unsubscribe(symbol, id);
                warn!(%symbol, sink = %id, error = %e, "upstream subscribe failed, rolled back");
                self.publish_stats();
                Err(e.into())
            }
        }
    }

    /// Remove a sink from one symbol, unsubscribing upstream if it was the last.
    pub async fn unsubscribe(&self, symbol: &Symbol, id: SinkId) {
        let mut gate = self.gate.lock().await;

        if self.registry.unsubscribe(symbol, id) == SubscriptionChange::Unsubscribe {
            self.release(&mut gate, vec![symbol.clone()]).await;
        }
        self.publish_stats();
    }

    /// Remove a sink from every symbol.
    pub async fn disconnect(&self, id: SinkId) {
        let mut gate = self.gate.lock().await;

        let emptied = self.registry.remove_sink(id);
        debug!(sink = %id, released = emptied.len(), "sink disconnected");
        self.release(&mut gate, emptied).await;
        self.publish_stats();
    }

    /// Reconnect and replay if subscriptions exist but the link has changed.
    ///
    /// If the link cannot be restored, every sink is shed.
    pub async fn restore(&self) {
        let mut gate = self.gate.lock().await;
        if self.registry.is_empty() {
            return;
        }

        let result = match self.upstream.ensure_connected().await {
            Ok(session) if gate.generation == Some(session.generation) => Ok(()),
            Ok(session) => self.replay(&mut gate, session, HashSet::new()).await,
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            warn!(error = %e, "upstream unrecoverable, shedding sinks");
            let shed = self.shed_locked(&mut gate);
            info!(sinks = shed, "sinks shed");
        }
    }

    /// Close every sink and clear the registry.
    ///
    /// Returns the number of sinks closed.
    pub async fn shed_all(&self) -> usize {
        let mut gate = self.gate.lock().await;
        self.shed_locked(&mut gate)
    }

    /// Follow the upstream connection state until cancelled.
    ///
    /// A dropped link with active subscriptions is restored right away;
    /// a failed link sheds every sink.
    pub async fn supervise(
        self: Arc<Self>,
        mut state_rx: watch::Receiver<ConnectionState>,
        cancel: CancellationToken,
    ) {
        info!("relay supervisor started");

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                changed = state_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let state = *state_rx.borrow_and_update();
                    debug!(state = state.as_str(), "upstream state changed");

                    match state {
                        ConnectionState::Disconnected | ConnectionState::Connected => {
                            self.restore().await;
                        }
                        ConnectionState::Failed => {
                            let shed = self.shed_all().await;
                            warn!(sinks = shed, "upstream failed, sinks shed");
                        }
                        ConnectionState::Connecting => {}
                    }
                }
            }
        }

        info!("relay supervisor stopped");
    }

    // =========================================================================
    // Gate-held helpers
    // =========================================================================

    async fn subscribe_upstream(
        &self,
        gate: &mut MutexGuard<'_, GateState>,
        symbol: &Symbol,
    ) -> Result<(), UpstreamError> {
        let session = self.upstream.ensure_connected().await?;

        if gate.generation != Some(session.generation) {
            // Fresh link: the replay carries the new symbol with the rest.
            return self.replay(gate, session, HashSet::new()).await;
        }

        let batch = vec![symbol.clone()];
        let sent_on = self
            .upstream
            .send(UpstreamCommand::Subscribe(batch.clone()))
            .await?;
        metrics::record_upstream_command("subscribe");

        if sent_on.generation == session.generation {
            Ok(())
        } else {
            self.replay(gate, sent_on, batch.into_iter().collect()).await
        }
    }

    /// Send the active set to the link `session`, skipping symbols it
    /// already carries.
    async fn replay(
        &self,
        gate: &mut MutexGuard<'_, GateState>,
        mut session: Session,
        mut carried: HashSet<Symbol>,
    ) -> Result<(), UpstreamError> {
        for _ in 0..MAX_REPLAY_PASSES {
            gate.generation = Some(session.generation);

            let symbols: Vec<Symbol> = self
                .registry
                .active_symbols()
                .into_iter()
                .filter(|symbol| !carried.contains(symbol))
                .collect();
            if symbols.is_empty() {
                return Ok(());
            }

            let count = symbols.len();
            let sent_on = self
                .upstream
                .send(UpstreamCommand::Subscribe(symbols.clone()))
                .await?;
            metrics::record_upstream_command("subscribe");

            if sent_on.generation == session.generation {
                info!(generation = session.generation, symbols = count, "subscriptions replayed");
                return Ok(());
            }

            // The link turned over mid-send; the new one holds only this batch.
            session = sent_on;
            carried = symbols.into_iter().collect();
        }

        Err(UpstreamError::Closed)
    }

    async fn release(&self, gate: &mut MutexGuard<'_, GateState>, symbols: Vec<Symbol>) {
        if symbols.is_empty() {
            return;
        }

        let live = self
            .upstream
            .current_session()
            .is_some_and(|session| gate.generation == Some(session.generation));
        if !live {
            debug!(count = symbols.len(), "no live link, nothing to release upstream");
            return;
        }

        let count = symbols.len();
        match self.upstream.send(UpstreamCommand::Unsubscribe(symbols)).await {
            Ok(session) if gate.generation == Some(session.generation) => {
                metrics::record_upstream_command("unsubscribe");
                debug!(count, "unsubscribed upstream");
            }
            Ok(session) => {
                metrics::record_upstream_command("unsubscribe");
                if let Err(e) = self.replay(gate, session, HashSet::new()).await {
                    warn!(error = %e, "replay after reconnect failed");
                }
            }
            Err(e) => warn!(count, error = %e, "upstream unsubscribe failed"),
        }
    }

    fn shed_locked(&self, gate: &mut MutexGuard<'_, GateState>) -> usize {
        gate.generation = None;

        let sinks = self.registry.clear();
        for (_, sink) in &sinks {
            if let Some(sink) = sink.upgrade() {
                sink.close();
            }
        }
        self.publish_stats();
        sinks.len()
    }

    fn publish_stats(&self) {
        let stats = self.registry.stats();
        metrics::set_subscriptions(stats.symbol_count, stats.sink_count);
    }
}
