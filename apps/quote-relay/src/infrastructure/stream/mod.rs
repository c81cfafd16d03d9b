//! Downstream Stream Endpoint
//!
//! WebSocket endpoint clients use to follow one symbol.
//!
//! # Endpoints
//!
//! - `GET /stream/{symbol}` - Upgrade to a WebSocket pushing quote frames
//!
//! An invalid symbol is refused with HTTP 400 before the upgrade. Once
//! upgraded, the connection owns a `ChannelSink` registered with the relay
//! for the symbol; closing the socket removes the sink everywhere.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::ports::{QuoteSink, SharedSink};
use crate::application::services::QuoteRelay;
use crate::domain::market::Symbol;
use crate::infrastructure::sink::ChannelSink;

/// Close reasons are capped at 123 bytes by the protocol.
const MAX_CLOSE_REASON: usize = 120;

// =============================================================================
// Stream Server State
// =============================================================================

/// Shared state for stream connections.
#[derive(Debug)]
pub struct StreamState {
    relay: Arc<QuoteRelay>,
    sink_capacity: usize,
    shutdown: CancellationToken,
}

impl StreamState {
    /// Create new stream state.
    #[must_use]
    pub const fn new(
        relay: Arc<QuoteRelay>,
        sink_capacity: usize,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            relay,
            sink_capacity,
            shutdown,
        }
    }
}

// =============================================================================
// Stream Server
// =============================================================================

/// Downstream WebSocket server.
pub struct StreamServer {
    port: u16,
    state: Arc<StreamState>,
    cancel: CancellationToken,
}

impl StreamServer {
    /// Create a new stream server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<StreamState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Router serving the stream endpoint.
    pub fn router(state: Arc<StreamState>) -> Router {
        Router::new()
            .route("/stream/{symbol}", get(stream_handler))
            .with_state(state)
    }

    /// Bind the configured port and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `StreamServerError` if binding fails or the HTTP server
    /// encounters a fatal error while running.
    pub async fn run(self) -> Result<(), StreamServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| StreamServerError::BindFailed(self.port, e.to_string()))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `StreamServerError::ServerFailed` on a fatal server error.
    pub async fn serve(self, listener: TcpListener) -> Result<(), StreamServerError> {
        let port = listener.local_addr().map_or(self.port, |addr| addr.port());
        tracing::info!(port, "Stream server listening");

        axum::serve(listener, Self::router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| StreamServerError::ServerFailed(e.to_string()))?;

        tracing::info!("Stream server stopped");
        Ok(())
    }
}

// =============================================================================
// Handlers
// =============================================================================

async fn stream_handler(
    Path(raw): Path<String>,
    State(state): State<Arc<StreamState>>,
    ws: WebSocketUpgrade,
) -> Response {
    let symbol = match Symbol::parse(&raw) {
        Ok(symbol) => symbol,
        Err(e) => {
            debug!(symbol = %raw, error = %e, "rejecting stream request");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    ws.on_upgrade(move |socket| handle_stream(socket, symbol, state))
}

async fn handle_stream(socket: WebSocket, symbol: Symbol, state: Arc<StreamState>) {
    let (sink, mut queue) = ChannelSink::new(state.sink_capacity);
    let sink_id = sink.id();
    let shared: SharedSink = sink.clone();
    let (mut sender, mut receiver) = socket.split();

    if let Err(e) = state.relay.subscribe(&symbol, &shared).await {
        warn!(%symbol, error = %e, "upstream subscribe failed, closing client");
        let frame = CloseFrame {
            code: close_code::ERROR,
            reason: close_reason(&e.to_string()).into(),
        };
        let _ = sender.send(Message::Close(Some(frame))).await;
        return;
    }

    info!(%symbol, sink = sink_id.as_u64(), "client subscribed");

    loop {
        tokio::select! {
            () = state.shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }

            quote = queue.recv() => match quote {
                Some(quote) => match quote.to_frame() {
                    Ok(frame) => {
                        if sender.send(Message::Text(frame.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!(%symbol, error = %e, "failed to encode quote frame"),
                },
                None => {
                    debug!(%symbol, sink = sink_id.as_u64(), "sink closed by relay");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
            },

            message = receiver.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    debug!(%symbol, len = text.len(), "ignoring client text frame");
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    debug!(%symbol, error = %e, "client receive error");
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    sink.close();
    state.relay.disconnect(sink_id).await;
    info!(%symbol, sink = sink_id.as_u64(), "client disconnected");
}

fn close_reason(message: &str) -> String {
    if message.len() <= MAX_CLOSE_REASON {
        return message.to_string();
    }

    let mut cut = MAX_CLOSE_REASON;
    while !message.is_char_boundary(cut) {
        cut -= 1;
    }
    message[..cut].to_string()
}

// =============================================================================
// Errors
// =============================================================================

/// Stream server errors.
#[derive(Debug, thiserror::Error)]
pub enum StreamServerError {
    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
