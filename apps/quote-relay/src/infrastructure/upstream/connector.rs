//! Upstream Connector
//!
//! Owns the single outbound WebSocket link to the market-data provider.
//!
//! # Link Lifecycle
//!
//! ```text
//! Disconnected ─ensure_connected─▶ Connecting ─auth ok─▶ Connected
//!       ▲                              │                     │
//!       └──── attempts exhausted ──────┘                     │
//!       └──────────────────── socket closed ─────────────────┘
//!                                      │
//!                               auth rejected ─▶ Failed
//! ```
//!
//! Each established link gets a new generation number and two tasks: a
//! writer draining an outbound channel, and a reader decoding frames into
//! quotes for the fan-out channel. When the reader sees the socket close it
//! marks the link closed; the next `ensure_connected` dials a new one.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::auth::{AUTH_TIMEOUT, AuthError, AuthHandler};
use super::codec::{CodecError, StatusEvent, UpstreamCodec, UpstreamEvent};
use super::provider::ProviderConfig;
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use crate::application::ports::{
    ConnectionState, Session, UpstreamCommand, UpstreamError, UpstreamPort,
};
use crate::domain::market::Quote;
use crate::infrastructure::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWrite = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;

/// Outbound frames buffered per link.
const OUTBOUND_CAPACITY: usize = 64;

// =============================================================================
// Statistics
// =============================================================================

/// Connector counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConnectorStats {
    /// Generation of the live link, 0 if none.
    pub generation: u64,
    /// Quotes decoded and forwarded.
    pub quotes_received: u64,
    /// Frames or events dropped as undecodable.
    pub decode_errors: u64,
    /// Connection attempts after the first.
    pub reconnects: u64,
}

// =============================================================================
// Shared Link State
// =============================================================================

/// State shared between the connector and its link tasks.
struct Shared {
    state_tx: watch::Sender<ConnectionState>,
    current_generation: AtomicU64,
    codec: UpstreamCodec,
    quotes_tx: mpsc::Sender<Quote>,
    quotes_received: AtomicU64,
    decode_errors: AtomicU64,
    reconnects: AtomicU64,
}

impl Shared {
    fn set_state(&self, next: ConnectionState) {
        self.state_tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        metrics::set_upstream_connected(next.is_connected());
    }

    /// Mark `generation` closed if it is still the live link.
    fn link_closed(&self, generation: u64) {
        if self
            .current_generation
            .compare_exchange(generation, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        self.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Connected {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
        metrics::set_upstream_connected(false);
        info!(generation, "upstream link closed");
    }

    fn record_decode_error(&self, error: &CodecError) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
        metrics::record_decode_error(error.as_str());
    }

    async fn handle_text(&self, text: &str) {
        let frame = match self.codec.decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                self.record_decode_error(&e);
                warn!(error = %e, "dropping malformed upstream frame");
                return;
            }
        };

        for e in &frame.rejected {
            self.record_decode_error(e);
            warn!(error = %e, "dropping malformed upstream event");
        }

        for event in frame.events {
            match event {
                UpstreamEvent::Quote(quote) => {
                    self.quotes_received.fetch_add(1, Ordering::Relaxed);
                    metrics::record_quote_received();
                    if self.quotes_tx.send(quote).await.is_err() {
                        debug!("quote channel closed, dropping quote");
                    }
                }
                UpstreamEvent::Status(StatusEvent::Error(message)) => {
                    warn!(provider = %self.codec.provider(), %message, "provider error");
                }
                UpstreamEvent::Status(status) => {
                    debug!(provider = %self.codec.provider(), ?status, "provider status");
                }
            }
        }
    }
}

// =============================================================================
// Link
// =============================================================================

/// One established link.
struct Link {
    generation: u64,
    outbound: mpsc::Sender<Message>,
    closed: CancellationToken,
}

impl Link {
    fn session(&self) -> Session {
        Session::new(self.generation)
    }

    fn is_open(&self) -> bool {
        !self.closed.is_cancelled()
    }
}

// =============================================================================
// Connector
// =============================================================================

/// The shared upstream connection.
pub struct UpstreamConnector {
    config: ProviderConfig,
    reconnect: ReconnectConfig,
    shared: Arc<Shared>,
    link: Mutex<Option<Link>>,
    next_generation: AtomicU64,
    auth_failure: parking_lot::Mutex<Option<String>>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for UpstreamConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConnector")
            .field("provider", &self.config.kind)
            .field("url", &self.config.redacted_url())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl UpstreamConnector {
    /// Create a connector. Nothing is dialed until the first
    /// `ensure_connected`.
    #[must_use]
    pub fn new(
        config: ProviderConfig,
        reconnect: ReconnectConfig,
        quotes_tx: mpsc::Sender<Quote>,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let codec = config.codec();

        Self {
            config,
            reconnect,
            shared: Arc::new(Shared {
                state_tx,
                current_generation: AtomicU64::new(0),
                codec,
                quotes_tx,
                quotes_received: AtomicU64::new(0),
                decode_errors: AtomicU64::new(0),
                reconnects: AtomicU64::new(0),
            }),
            link: Mutex::new(None),
            next_generation: AtomicU64::new(0),
            auth_failure: parking_lot::Mutex::new(None),
            cancel,
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Watch connection state changes.
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Connector counters.
    #[must_use]
    pub fn stats(&self) -> ConnectorStats {
        ConnectorStats {
            generation: self.shared.current_generation.load(Ordering::SeqCst),
            quotes_received: self.shared.quotes_received.load(Ordering::Relaxed),
            decode_errors: self.shared.decode_errors.load(Ordering::Relaxed),
            reconnects: self.shared.reconnects.load(Ordering::Relaxed),
        }
    }

    /// Close the current link and stop reconnecting.
    pub async fn disconnect(&self) {
        self.cancel.cancel();

        let mut link = self.link.lock().await;
        if let Some(link) = link.take() {
            link.closed.cancel();
            self.shared.link_closed(link.generation);
        }
        self.shared.set_state(ConnectionState::Disconnected);
        info!("upstream connector stopped");
    }

    async fn live_link(&self) -> Result<(Session, mpsc::Sender<Message>, CancellationToken), UpstreamError> {
        let mut link = self.link.lock().await;

        if let Some(current) = link.as_ref()
            && current.is_open()
        {
            return Ok((current.session(), current.outbound.clone(), current.closed.clone()));
        }

        *link = None;
        let established = self.establish().await?;
        let handle = (
            established.session(),
            established.outbound.clone(),
            established.closed.clone(),
        );
        *link = Some(established);
        Ok(handle)
    }

    /// Dial with backoff until a link authenticates or attempts run out.
    async fn establish(&self) -> Result<Link, UpstreamError> {
        if self.cancel.is_cancelled() {
            return Err(UpstreamError::Cancelled);
        }
        if let Some(reason) = self.auth_failure.lock().clone() {
            return Err(UpstreamError::Auth(reason));
        }

        let had_link = self.next_generation.load(Ordering::SeqCst) > 0;
        let mut policy = ReconnectPolicy::new(self.reconnect.clone());
        self.shared.set_state(ConnectionState::Connecting);

        loop {
            let Some(delay) = policy.next_delay() else {
                let attempts = policy.attempt_count();
                self.shared.set_state(ConnectionState::Disconnected);
                warn!(attempts, "upstream reconnect attempts exhausted");
                return Err(UpstreamError::Disconnected { attempts });
            };

            if !delay.is_zero() {
                debug!(delay_ms = delay.as_millis(), "backing off before reconnect");
                tokio::select! {
                    () = self.cancel.cancelled() => {
                        self.shared.set_state(ConnectionState::Disconnected);
                        return Err(UpstreamError::Cancelled);
                    }
                    () = tokio::time::sleep(delay) => {}
                }
            }

            let attempt = policy.attempt_count();
            if had_link || attempt > 1 {
                self.shared.reconnects.fetch_add(1, Ordering::Relaxed);
                metrics::record_reconnect();
            }

            match self.connect_once().await {
                Ok(link) => {
                    self.shared.set_state(ConnectionState::Connected);
                    info!(
                        provider = %self.config.kind,
                        generation = link.generation,
                        attempt,
                        "upstream connected"
                    );
                    return Ok(link);
                }
                Err(UpstreamError::Auth(reason)) => {
                    *self.auth_failure.lock() = Some(reason.clone());
                    self.shared.set_state(ConnectionState::Failed);
                    warn!(provider = %self.config.kind, %reason, "upstream authentication rejected");
                    return Err(UpstreamError::Auth(reason));
                }
                Err(e) if e.is_fatal() => {
                    self.shared.set_state(ConnectionState::Disconnected);
                    return Err(e);
                }
                Err(e) => {
                    warn!(attempt, error = %e, "upstream connection attempt failed");
                }
            }
        }
    }

    async fn connect_once(&self) -> Result<Link, UpstreamError> {
        let url = self.config.connect_url();
        debug!(url = self.config.redacted_url(), "dialing upstream");

        let connected = tokio::select! {
            () = self.cancel.cancelled() => return Err(UpstreamError::Cancelled),
            result = tokio_tungstenite::connect_async(url.as_str()) => result,
        };
        let (ws, _response) = match connected {
            Ok(ok) => ok,
            Err(tungstenite::Error::Http(response))
                if AuthError::is_auth_status(response.status().as_u16()) =>
            {
                let err = AuthError::HttpStatus(response.status().as_u16());
                return Err(UpstreamError::Auth(err.to_string()));
            }
            Err(e) => return Err(UpstreamError::Connect(e.to_string())),
        };

        let (mut write, mut read) = ws.split();
        let mut auth = AuthHandler::new(self.config.kind.auth_mode());

        if !auth.on_open() {
            let frame = self
                .shared
                .codec
                .auth_frame(&self.config.api_key)
                .map_err(|e| UpstreamError::Protocol(e.to_string()))?;
            if let Some(frame) = frame {
                write
                    .send(Message::Text(frame.into()))
                    .await
                    .map_err(|e| UpstreamError::Connect(e.to_string()))?;
            }

            let verdict = tokio::time::timeout(
                AUTH_TIMEOUT,
                self.await_auth(&mut read, &mut write, &mut auth),
            )
            .await
            .unwrap_or(Err(AuthError::Timeout));

            match verdict {
                Ok(()) => {}
                Err(e) if e.is_rejection() => return Err(UpstreamError::Auth(e.to_string())),
                Err(e) => return Err(UpstreamError::Connect(e.to_string())),
            }
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let closed = self.cancel.child_token();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);

        self.shared
            .current_generation
            .store(generation, Ordering::SeqCst);

        tokio::spawn(run_writer(write, outbound_rx, closed.clone(), generation));
        tokio::spawn(run_reader(
            read,
            Arc::clone(&self.shared),
            outbound_tx.clone(),
            closed.clone(),
            generation,
        ));

        Ok(Link {
            generation,
            outbound: outbound_tx,
            closed,
        })
    }

    async fn await_auth(
        &self,
        read: &mut WsRead,
        write: &mut WsWrite,
        auth: &mut AuthHandler,
    ) -> Result<(), AuthError> {
        while let Some(frame) = read.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    let frame = match self.shared.codec.decode(text.as_str()) {
                        Ok(frame) => frame,
                        Err(e) => {
                            warn!(error = %e, "undecodable frame during authentication");
                            continue;
                        }
                    };
                    for event in frame.events {
                        if let UpstreamEvent::Status(status) = event
                            && auth.on_status(&status)?
                        {
                            return Ok(());
                        }
                    }
                }
                Ok(Message::Ping(data)) => {
                    let _ = write.send(Message::Pong(data)).await;
                }
                Ok(Message::Close(_)) | Err(_) => return Err(AuthError::Closed),
                Ok(_) => {}
            }
        }

        Err(AuthError::Closed)
    }
}

#[async_trait]
impl UpstreamPort for UpstreamConnector {
    async fn ensure_connected(&self) -> Result<Session, UpstreamError> {
        self.live_link().await.map(|(session, _, _)| session)
    }

    async fn send(&self, command: UpstreamCommand) -> Result<Session, UpstreamError> {
        if command.is_empty() {
            return self.ensure_connected().await;
        }

        let frames = self
            .shared
            .codec
            .command_frames(&command)
            .map_err(|e| UpstreamError::Protocol(e.to_string()))?;

        // One retry on a fresh link if the current one closed under us.
        for _ in 0..2 {
            let (session, outbound, closed) = self.live_link().await?;

            let mut delivered = true;
            for frame in &frames {
                if outbound.send(Message::Text(frame.clone().into())).await.is_err() {
                    delivered = false;
                    break;
                }
            }

            if delivered {
                debug!(
                    command = command.kind(),
                    symbols = command.symbols().len(),
                    generation = session.generation,
                    "command sent upstream"
                );
                return Ok(session);
            }

            closed.cancel();
            debug!(generation = session.generation, "link closed during send, retrying");
        }

        Err(UpstreamError::Closed)
    }

    fn current_session(&self) -> Option<Session> {
        match self.shared.current_generation.load(Ordering::SeqCst) {
            0 => None,
            generation => Some(Session::new(generation)),
        }
    }
}

// =============================================================================
// Link Tasks
// =============================================================================

async fn run_writer(
    mut write: WsWrite,
    mut outbound: mpsc::Receiver<Message>,
    closed: CancellationToken,
    generation: u64,
) {
    loop {
        tokio::select! {
            biased;

            () = closed.cancelled() => break,

            next = outbound.recv() => match next {
                Some(message) => {
                    if let Err(e) = write.send(message).await {
                        warn!(generation, error = %e, "upstream write failed");
                        closed.cancel();
                        break;
                    }
                }
                None => break,
            },
        }
    }

    let _ = write.close().await;
    trace!(generation, "upstream writer stopped");
}

async fn run_reader(
    mut read: WsRead,
    shared: Arc<Shared>,
    outbound: mpsc::Sender<Message>,
    closed: CancellationToken,
    generation: u64,
) {
    loop {
        tokio::select! {
            biased;

            () = closed.cancelled() => break,

            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => shared.handle_text(text.as_str()).await,
                Some(Ok(Message::Ping(data))) => {
                    let _ = outbound.try_send(Message::Pong(data));
                }
                Some(Ok(Message::Close(frame))) => {
                    info!(generation, ?frame, "upstream sent close");
                    break;
                }
                Some(Ok(Message::Binary(data))) => {
                    debug!(generation, len = data.len(), "ignoring binary upstream frame");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(generation, error = %e, "upstream read failed");
                    break;
                }
                None => break,
            },
        }
    }

    closed.cancel();
    shared.link_closed(generation);
}
