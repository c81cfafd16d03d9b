//! Relay and Fan-out Integration Tests
//!
//! Tests reference counting against the upstream link and quote delivery
//! through real channel sinks.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};
use tokio_util::sync::CancellationToken;

use quote_relay::{
    ChannelSink, FanoutDispatcher, LatestQuotes, Quote, QuoteRelay, QuoteSink, RelayError,
    Session, SharedSink, SinkReceiver, Symbol, UpstreamCommand, UpstreamError, UpstreamPort,
};

// =============================================================================
// Fake Upstream
// =============================================================================

/// Upstream on a single stable link that records every command.
#[derive(Default)]
struct RecordingUpstream {
    commands: Mutex<Vec<UpstreamCommand>>,
    reject_subscribe: AtomicBool,
}

impl RecordingUpstream {
    fn commands(&self) -> Vec<UpstreamCommand> {
        self.commands.lock().clone()
    }

    fn count(&self, kind: &str) -> usize {
        self.commands().iter().filter(|c| c.kind() == kind).count()
    }
}

#[async_trait]
impl UpstreamPort for RecordingUpstream {
    async fn ensure_connected(&self) -> Result<Session, UpstreamError> {
        Ok(Session::new(1))
    }

    async fn send(&self, command: UpstreamCommand) -> Result<Session, UpstreamError> {
        if matches!(command, UpstreamCommand::Subscribe(_))
            && self.reject_subscribe.load(Ordering::SeqCst)
        {
            return Err(UpstreamError::Disconnected { attempts: 10 });
        }
        self.commands.lock().push(command);
        Ok(Session::new(1))
    }

    fn current_session(&self) -> Option<Session> {
        Some(Session::new(1))
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn sym(s: &str) -> Symbol {
    Symbol::parse(s).unwrap()
}

fn quote(symbol: &str, t: i64) -> Quote {
    Quote::new(
        sym(symbol),
        Decimal::from(100),
        1,
        Decimal::from(101),
        1,
        t,
    )
}

fn sink(capacity: usize) -> (SharedSink, SinkReceiver) {
    let (sink, rx) = ChannelSink::new(capacity);
    (sink as SharedSink, rx)
}

fn setup() -> (Arc<RecordingUpstream>, Arc<QuoteRelay>, FanoutDispatcher) {
    let upstream = Arc::new(RecordingUpstream::default());
    let relay = Arc::new(QuoteRelay::new(upstream.clone()));
    let dispatcher = FanoutDispatcher::new(
        Arc::clone(&relay),
        Arc::new(LatestQuotes::new()),
        Duration::from_millis(50),
    );
    (upstream, relay, dispatcher)
}

async fn next(rx: &mut SinkReceiver) -> Option<Arc<Quote>> {
    timeout(Duration::from_millis(200), rx.recv()).await.ok().flatten()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn quote_reaches_only_its_symbol_sinks() {
    let (upstream, relay, dispatcher) = setup();
    let (tsla_a, mut rx_a) = sink(8);
    let (tsla_b, mut rx_b) = sink(8);
    let (msft, mut rx_msft) = sink(8);

    assert_ok!(relay.subscribe(&sym("TSLA"), &tsla_a).await);
    assert_ok!(relay.subscribe(&sym("TSLA"), &tsla_b).await);
    assert_ok!(relay.subscribe(&sym("MSFT"), &msft).await);

    let report = dispatcher.dispatch(quote("TSLA", 1)).await;
    assert_eq!(report.delivered, 2);
    assert_eq!(report.evicted, 0);

    assert_eq!(next(&mut rx_a).await.unwrap().symbol, sym("TSLA"));
    assert_eq!(next(&mut rx_b).await.unwrap().symbol, sym("TSLA"));
    assert!(next(&mut rx_msft).await.is_none());

    // One upstream subscribe per symbol, however many sinks.
    assert_eq!(upstream.count("subscribe"), 2);
}

#[tokio::test]
async fn last_unsubscribe_releases_upstream_once() {
    let (upstream, relay, _dispatcher) = setup();
    let (a, _rx_a) = sink(8);
    let (b, _rx_b) = sink(8);

    assert_ok!(relay.subscribe(&sym("AAPL"), &a).await);
    assert_ok!(relay.subscribe(&sym("AAPL"), &b).await);

    relay.unsubscribe(&sym("AAPL"), a.id()).await;
    assert_eq!(upstream.count("unsubscribe"), 0);

    relay.unsubscribe(&sym("AAPL"), b.id()).await;
    relay.unsubscribe(&sym("AAPL"), b.id()).await;

    assert_eq!(
        upstream.commands(),
        vec![
            UpstreamCommand::Subscribe(vec![sym("AAPL")]),
            UpstreamCommand::Unsubscribe(vec![sym("AAPL")]),
        ]
    );
    assert!(relay.registry().is_empty());
}

#[tokio::test]
async fn failed_upstream_subscribe_is_rolled_back() {
    let (upstream, relay, _dispatcher) = setup();
    upstream.reject_subscribe.store(true, Ordering::SeqCst);
    let (a, _rx) = sink(8);

    let err = assert_err!(relay.subscribe(&sym("NVDA"), &a).await);
    assert!(matches!(
        err,
        RelayError::Upstream(UpstreamError::Disconnected { .. })
    ));
    assert!(!relay.registry().contains(&sym("NVDA")));
    assert_eq!(relay.stats().sink_count, 0);
}

#[tokio::test]
async fn slow_sink_is_evicted_without_stalling_others() {
    let (upstream, relay, dispatcher) = setup();
    let (fast, mut fast_rx) = sink(8);
    let (slow, slow_rx) = sink(1);

    assert_ok!(relay.subscribe(&sym("AMD"), &fast).await);
    assert_ok!(relay.subscribe(&sym("AMD"), &slow).await);

    // Fills the slow sink's queue; nobody drains it.
    let first = dispatcher.dispatch(quote("AMD", 1)).await;
    assert_eq!(first.delivered, 2);

    let second = dispatcher.dispatch(quote("AMD", 2)).await;
    assert_eq!(second.delivered, 1);
    assert_eq!(second.evicted, 1);

    assert!(slow.is_closed());
    assert!(slow_rx.is_closed());
    assert!(!relay.registry().is_subscribed(&sym("AMD"), slow.id()));
    assert_eq!(next(&mut fast_rx).await.unwrap().timestamp_ms, 1);
    assert_eq!(next(&mut fast_rx).await.unwrap().timestamp_ms, 2);
    assert_eq!(upstream.count("unsubscribe"), 0);
}

#[tokio::test]
async fn evicting_last_sink_unsubscribes_upstream() {
    let (upstream, relay, dispatcher) = setup();
    let (only, rx) = sink(8);

    assert_ok!(relay.subscribe(&sym("INTC"), &only).await);
    drop(rx);

    let report = dispatcher.dispatch(quote("INTC", 1)).await;
    assert_eq!(report.evicted, 1);
    assert_eq!(
        upstream.commands().last(),
        Some(&UpstreamCommand::Unsubscribe(vec![sym("INTC")]))
    );
}

#[tokio::test]
async fn client_disconnect_releases_every_symbol() {
    let (upstream, relay, _dispatcher) = setup();
    let (a, _rx) = sink(8);

    assert_ok!(relay.subscribe(&sym("AAPL"), &a).await);
    assert_ok!(relay.subscribe(&sym("MSFT"), &a).await);

    relay.disconnect(a.id()).await;

    assert!(relay.registry().is_empty());
    let released: Vec<Symbol> = upstream
        .commands()
        .into_iter()
        .filter_map(|c| match c {
            UpstreamCommand::Unsubscribe(symbols) => Some(symbols),
            UpstreamCommand::Subscribe(_) => None,
        })
        .flatten()
        .collect();
    assert_eq!(released.len(), 2);
    assert!(released.contains(&sym("AAPL")));
    assert!(released.contains(&sym("MSFT")));
}

#[tokio::test]
async fn dispatcher_preserves_upstream_order() {
    let (_upstream, relay, dispatcher) = setup();
    let (a, mut rx) = sink(64);
    assert_ok!(relay.subscribe(&sym("META"), &a).await);

    let (tx, quotes) = mpsc::channel(64);
    let cancel = CancellationToken::new();
    let task = tokio::spawn(Arc::new(dispatcher).run(quotes, cancel.clone()));

    for t in 1..=20 {
        tx.send(quote("META", t)).await.unwrap();
    }

    for t in 1..=20 {
        assert_eq!(next(&mut rx).await.unwrap().timestamp_ms, t);
    }

    cancel.cancel();
    task.await.unwrap();
}

#[tokio::test]
async fn shed_all_closes_every_sink() {
    let (_upstream, relay, _dispatcher) = setup();
    let (a, mut rx_a) = sink(8);
    let (b, mut rx_b) = sink(8);

    assert_ok!(relay.subscribe(&sym("AAPL"), &a).await);
    assert_ok!(relay.subscribe(&sym("MSFT"), &b).await);

    assert_eq!(relay.shed_all().await, 2);
    assert!(relay.registry().is_empty());
    assert!(rx_a.recv().await.is_none());
    assert!(rx_b.recv().await.is_none());
}
