//! Upstream Connector Integration Tests
//!
//! Drives the connector against a local WebSocket server speaking the
//! provider protocols.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_util::sync::CancellationToken;

use quote_relay::{
    ApiKey, ChannelSink, ConnectionState, ProviderConfig, ProviderKind, QuoteRelay,
    ReconnectConfig, SharedSink, Symbol, UpstreamCommand, UpstreamConnector, UpstreamError,
    UpstreamPort,
};

const WAIT: Duration = Duration::from_secs(5);

const AUTH_SUCCESS: &str = r#"[{"ev":"status","status":"auth_success","message":"authenticated"}]"#;
const AUTH_FAILED: &str = r#"[{"ev":"status","status":"auth_failed","message":"authentication failed"}]"#;

// =============================================================================
// Fake Provider
// =============================================================================

/// One accepted provider connection.
struct Conn {
    uri: String,
    frames: mpsc::UnboundedReceiver<String>,
    push: mpsc::UnboundedSender<Message>,
}

impl Conn {
    async fn next_frame(&mut self) -> serde_json::Value {
        let frame = timeout(WAIT, self.frames.recv()).await.unwrap().unwrap();
        serde_json::from_str(&frame).unwrap()
    }

    fn send_text(&self, text: &str) {
        self.push.send(Message::Text(text.to_string().into())).unwrap();
    }

    fn close(&self) {
        self.push.send(Message::Close(None)).unwrap();
    }
}

struct FakeProvider {
    url: String,
    conns: mpsc::UnboundedReceiver<Conn>,
    accepted: Arc<AtomicUsize>,
}

impl FakeProvider {
    async fn next_conn(&mut self) -> Conn {
        timeout(WAIT, self.conns.recv()).await.unwrap().unwrap()
    }
}

/// Start a provider. With `auth_reply`, the first client frame is treated
/// as the auth frame and answered; without, the socket is open immediately.
async fn spawn_provider(auth_reply: Option<&'static str>) -> FakeProvider {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (conns_tx, conns) = mpsc::unbounded_channel();
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&accepted);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let conns_tx = conns_tx.clone();

            tokio::spawn(async move {
                let mut uri = String::new();
                let ws = tokio_tungstenite::accept_hdr_async(stream, |req: &Request, resp: Response| {
                    uri = req.uri().to_string();
                    Ok(resp)
                })
                .await
                .unwrap();
                let (mut write, mut read) = ws.split();
                let (frames_tx, frames) = mpsc::unbounded_channel();
                let (push, mut push_rx) = mpsc::unbounded_channel::<Message>();

                if let Some(reply) = auth_reply {
                    write
                        .send(Message::Text(
                            r#"[{"ev":"status","status":"connected","message":"Connected Successfully"}]"#.into(),
                        ))
                        .await
                        .unwrap();
                    if let Some(Ok(Message::Text(auth))) = read.next().await {
                        let _ = frames_tx.send(auth.to_string());
                    }
                    write.send(Message::Text(reply.into())).await.unwrap();
                }

                let _ = conns_tx.send(Conn { uri, frames, push });

                loop {
                    tokio::select! {
                        incoming = read.next() => match incoming {
                            Some(Ok(Message::Text(text))) => {
                                let _ = frames_tx.send(text.to_string());
                            }
                            Some(Ok(_)) => {}
                            _ => break,
                        },
                        outgoing = push_rx.recv() => match outgoing {
                            Some(Message::Close(frame)) => {
                                let _ = write.send(Message::Close(frame)).await;
                                break;
                            }
                            Some(message) => {
                                if write.send(message).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        },
                    }
                }
            });
        }
    });

    FakeProvider {
        url,
        conns,
        accepted,
    }
}

/// Accept exactly one Finnhub-style connection, then stop listening. The
/// link is closed from the provider side when `close` fires.
async fn spawn_single_use_provider() -> (String, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let (close, close_rx) = oneshot::channel::<()>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(listener);
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        let _ = close_rx.await;
        let _ = ws.close(None).await;
    });

    (url, close)
}

async fn wait_for_link_loss(connector: &UpstreamConnector) {
    timeout(WAIT, async {
        while connector.current_session().is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("link loss never observed");
}

fn fast_reconnect(max_attempts: u32) -> ReconnectConfig {
    ReconnectConfig {
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        multiplier: 2.0,
        jitter_factor: 0.0,
        max_attempts,
    }
}

fn connector(
    kind: ProviderKind,
    url: &str,
    max_attempts: u32,
) -> (Arc<UpstreamConnector>, mpsc::Receiver<quote_relay::Quote>) {
    let (quotes_tx, quotes_rx) = mpsc::channel(64);
    let config = ProviderConfig::new(kind, ApiKey::new("test-key"), false).with_url(url);
    let connector = UpstreamConnector::new(
        config,
        fast_reconnect(max_attempts),
        quotes_tx,
        CancellationToken::new(),
    );
    (Arc::new(connector), quotes_rx)
}

fn sym(s: &str) -> Symbol {
    Symbol::parse(s).unwrap()
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn polygon_auth_subscribe_and_receive() {
    let mut provider = spawn_provider(Some(AUTH_SUCCESS)).await;
    let (connector, mut quotes) = connector(ProviderKind::Polygon, &provider.url, 3);

    let session = assert_ok!(connector.ensure_connected().await);
    assert_eq!(session.generation, 1);
    assert_eq!(connector.state(), ConnectionState::Connected);

    let mut conn = provider.next_conn().await;
    assert_eq!(
        conn.next_frame().await,
        serde_json::json!({"action": "auth", "params": "test-key"})
    );

    let sent_on = assert_ok!(
        connector
            .send(UpstreamCommand::Subscribe(vec![sym("AAPL"), sym("MSFT")]))
            .await
    );
    assert_eq!(sent_on, session);
    assert_eq!(
        conn.next_frame().await,
        serde_json::json!({"action": "subscribe", "params": "Q.AAPL,Q.MSFT"})
    );

    conn.send_text(r#"[{"ev":"Q","sym":"AAPL","bp":150.01,"bs":3,"ap":150.05,"as":1,"t":1700000000000}]"#);

    let quote = timeout(WAIT, quotes.recv()).await.unwrap().unwrap();
    assert_eq!(quote.symbol, sym("AAPL"));
    assert_eq!(quote.bid_price, Decimal::new(15001, 2));
    assert_eq!(quote.ask_size, 1);
    assert_eq!(quote.timestamp_ms, 1_700_000_000_000);
    assert_eq!(connector.stats().quotes_received, 1);
}

#[tokio::test]
async fn malformed_frame_is_dropped_and_link_survives() {
    let mut provider = spawn_provider(Some(AUTH_SUCCESS)).await;
    let (connector, mut quotes) = connector(ProviderKind::Polygon, &provider.url, 3);

    assert_ok!(connector.ensure_connected().await);
    let conn = provider.next_conn().await;

    conn.send_text("this is not json");
    conn.send_text(r#"[{"ev":"Q","sym":"MSFT","bp":300,"bs":1,"ap":301,"as":1,"t":1700000000001}]"#);

    let quote = timeout(WAIT, quotes.recv()).await.unwrap().unwrap();
    assert_eq!(quote.symbol, sym("MSFT"));
    assert_eq!(connector.stats().decode_errors, 1);
    assert_eq!(connector.state(), ConnectionState::Connected);
    assert_eq!(connector.current_session().unwrap().generation, 1);
}

#[tokio::test]
async fn bad_event_in_batch_does_not_drop_its_neighbours() {
    let mut provider = spawn_provider(Some(AUTH_SUCCESS)).await;
    let (connector, mut quotes) = connector(ProviderKind::Polygon, &provider.url, 3);

    assert_ok!(connector.ensure_connected().await);
    let conn = provider.next_conn().await;

    conn.send_text(
        r#"[{"ev":"Q","sym":"AAPL","bp":150.01,"bs":3,"ap":150.05,"as":1,"t":1700000000000},
            {"ev":"Q","sym":"BAD SYMBOL!","bp":1,"bs":1,"ap":1,"as":1,"t":1700000000001},
            {"ev":"Q","sym":"MSFT","bp":300,"bs":1,"ap":301,"as":1,"t":1700000000002}]"#,
    );

    let first = timeout(WAIT, quotes.recv()).await.unwrap().unwrap();
    let second = timeout(WAIT, quotes.recv()).await.unwrap().unwrap();
    assert_eq!(first.symbol, sym("AAPL"));
    assert_eq!(second.symbol, sym("MSFT"));

    let stats = connector.stats();
    assert_eq!(stats.quotes_received, 2);
    assert_eq!(stats.decode_errors, 1);
    assert_eq!(connector.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn auth_failure_is_fatal_and_not_retried() {
    let mut provider = spawn_provider(Some(AUTH_FAILED)).await;
    let (connector, _quotes) = connector(ProviderKind::Polygon, &provider.url, 5);

    let err = assert_err!(connector.ensure_connected().await);
    assert!(matches!(err, UpstreamError::Auth(_)));
    assert_eq!(connector.state(), ConnectionState::Failed);
    let _ = provider.next_conn().await;

    let again = assert_err!(connector.ensure_connected().await);
    assert!(matches!(again, UpstreamError::Auth(_)));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(provider.accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn http_401_on_upgrade_is_an_auth_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let _ = stream
                .write_all(b"HTTP/1.1 401 Unauthorized\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
        }
    });

    let (connector, _quotes) = connector(ProviderKind::Finnhub, &url, 5);

    let err = assert_err!(connector.ensure_connected().await);
    assert!(matches!(err, UpstreamError::Auth(_)), "unexpected error: {err}");
    assert_eq!(connector.state(), ConnectionState::Failed);
}

#[tokio::test]
async fn exhausted_attempts_report_disconnected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    drop(listener);

    let (connector, _quotes) = connector(ProviderKind::Polygon, &url, 2);

    let err = assert_err!(connector.ensure_connected().await);
    assert_eq!(err, UpstreamError::Disconnected { attempts: 2 });
    assert_eq!(connector.state(), ConnectionState::Disconnected);
    assert!(connector.current_session().is_none());
}

#[tokio::test]
async fn finnhub_token_in_uri_and_trades_become_quotes() {
    let mut provider = spawn_provider(None).await;
    let (connector, mut quotes) = connector(ProviderKind::Finnhub, &provider.url, 3);

    assert_ok!(connector.ensure_connected().await);
    let mut conn = provider.next_conn().await;
    assert!(conn.uri.ends_with("?token=test-key"), "uri was {}", conn.uri);

    assert_ok!(
        connector
            .send(UpstreamCommand::Subscribe(vec![sym("AAPL"), sym("TSLA")]))
            .await
    );
    assert_eq!(
        conn.next_frame().await,
        serde_json::json!({"type": "subscribe", "symbol": "AAPL"})
    );
    assert_eq!(
        conn.next_frame().await,
        serde_json::json!({"type": "subscribe", "symbol": "TSLA"})
    );

    conn.send_text(r#"{"type":"ping"}"#);
    conn.send_text(r#"{"type":"trade","data":[{"s":"AAPL","p":150.5,"v":10,"t":1700000000000}]}"#);

    let quote = timeout(WAIT, quotes.recv()).await.unwrap().unwrap();
    assert_eq!(quote.symbol, sym("AAPL"));
    assert_eq!(quote.bid_price, Decimal::new(1505, 1));
    assert_eq!(quote.ask_price, Decimal::new(1505, 1));
    assert_eq!(quote.bid_size, 10);
}

#[tokio::test]
async fn dropped_link_is_restored_and_subscriptions_replayed() {
    let mut provider = spawn_provider(Some(AUTH_SUCCESS)).await;
    let (connector, _quotes) = connector(ProviderKind::Polygon, &provider.url, 5);
    let relay = Arc::new(QuoteRelay::new(connector.clone()));
    let cancel = CancellationToken::new();
    tokio::spawn(Arc::clone(&relay).supervise(connector.subscribe_state(), cancel.clone()));

    let (aapl_sink, _aapl_rx) = ChannelSink::new(8);
    let (msft_sink, _msft_rx) = ChannelSink::new(8);
    let aapl_sink: SharedSink = aapl_sink;
    let msft_sink: SharedSink = msft_sink;

    assert_ok!(relay.subscribe(&sym("AAPL"), &aapl_sink).await);
    let mut first = provider.next_conn().await;
    let _auth = first.next_frame().await;
    assert_eq!(
        first.next_frame().await,
        serde_json::json!({"action": "subscribe", "params": "Q.AAPL"})
    );

    assert_ok!(relay.subscribe(&sym("MSFT"), &msft_sink).await);
    assert_eq!(
        first.next_frame().await,
        serde_json::json!({"action": "subscribe", "params": "Q.MSFT"})
    );

    first.close();

    let mut second = provider.next_conn().await;
    let _auth = second.next_frame().await;
    let replay = second.next_frame().await;
    assert_eq!(replay["action"], "subscribe");

    let mut channels: Vec<&str> = replay["params"].as_str().unwrap().split(',').collect();
    channels.sort_unstable();
    assert_eq!(channels, vec!["Q.AAPL", "Q.MSFT"]);

    assert_eq!(connector.current_session().unwrap().generation, 2);
    assert!(connector.stats().reconnects >= 1);
    cancel.cancel();
}

#[tokio::test]
async fn send_after_link_loss_redials_on_its_own() {
    let mut provider = spawn_provider(Some(AUTH_SUCCESS)).await;
    let (connector, _quotes) = connector(ProviderKind::Polygon, &provider.url, 3);

    assert_eq!(assert_ok!(connector.ensure_connected().await).generation, 1);
    let first = provider.next_conn().await;
    first.close();
    wait_for_link_loss(&connector).await;

    let session = assert_ok!(
        timeout(WAIT, connector.send(UpstreamCommand::Subscribe(vec![sym("AMD")])))
            .await
            .unwrap()
    );
    assert_eq!(session.generation, 2);

    let mut second = provider.next_conn().await;
    let _auth = second.next_frame().await;
    assert_eq!(
        second.next_frame().await,
        serde_json::json!({"action": "subscribe", "params": "Q.AMD"})
    );
    assert_eq!(connector.current_session().unwrap().generation, 2);
    assert_eq!(provider.accepted.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn send_fails_once_redial_attempts_run_out() {
    let (url, close) = spawn_single_use_provider().await;
    let (connector, _quotes) = connector(ProviderKind::Finnhub, &url, 2);

    assert_ok!(connector.ensure_connected().await);
    close.send(()).unwrap();
    wait_for_link_loss(&connector).await;

    let result = timeout(WAIT, connector.send(UpstreamCommand::Subscribe(vec![sym("AMD")])))
        .await
        .expect("send hung after the provider went away");
    assert_eq!(
        assert_err!(result),
        UpstreamError::Disconnected { attempts: 2 }
    );
    assert!(connector.current_session().is_none());
}

#[tokio::test]
async fn disconnect_stops_the_connector() {
    let mut provider = spawn_provider(Some(AUTH_SUCCESS)).await;
    let (connector, _quotes) = connector(ProviderKind::Polygon, &provider.url, 3);

    assert_ok!(connector.ensure_connected().await);
    let _conn = provider.next_conn().await;

    connector.disconnect().await;

    assert_eq!(connector.state(), ConnectionState::Disconnected);
    assert!(connector.current_session().is_none());
    assert_eq!(
        assert_err!(connector.ensure_connected().await),
        UpstreamError::Cancelled
    );
}
