//! Upstream Codec
//!
//! Decodes provider frames into normalized quotes and status events, and
//! encodes relay commands into provider frames.
//!
//! A frame that is not JSON, or not shaped like a provider message, fails
//! as a whole. Inside a well-formed frame each event decodes on its own: a
//! bad event is reported next to the good ones and never takes them down.
//! The connector logs and drops the failures without touching the link.

use rust_decimal::prelude::ToPrimitive;
use serde_json::Value;

use super::messages::{
    FinnhubAction, FinnhubError, FinnhubTrade, FinnhubTrades, PolygonAction, PolygonQuote,
    PolygonStatus,
};
use super::provider::{ApiKey, ProviderKind};
use crate::application::ports::UpstreamCommand;
use crate::domain::market::{Quote, QUOTE_EVENT, Symbol, SymbolError};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is not shaped like any known message.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    /// Event has no type tag.
    #[error("message has no event type")]
    MissingEventType,

    /// Quote carries an unusable symbol.
    #[error("invalid symbol in quote: {0}")]
    Symbol(#[from] SymbolError),
}

impl CodecError {
    /// Metric label for this failure.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Json(_) => "json",
            Self::InvalidFormat(_) => "invalid_format",
            Self::MissingEventType => "missing_event_type",
            Self::Symbol(_) => "symbol",
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// Status reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// Socket accepted.
    Connected,
    /// Credentials accepted.
    AuthSuccess,
    /// Credentials rejected.
    AuthFailed(String),
    /// Provider-reported error.
    Error(String),
    /// Any other status (subscription acks and the like).
    Other(String),
}

/// One decoded upstream event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// Normalized quote.
    Quote(Quote),
    /// Provider status.
    Status(StatusEvent),
}

/// Unit of a raw provider timestamp.
/// Result of decoding one text frame.
#[derive(Debug, Default)]
pub struct DecodedFrame {
    /// Events decoded, in frame order.
    pub events: Vec<UpstreamEvent>,
    /// Events in the frame that could not be decoded.
    pub rejected: Vec<CodecError>,
}

impl DecodedFrame {
    fn push(&mut self, result: Result<UpstreamEvent, CodecError>) {
        match result {
            Ok(event) => self.events.push(event),
            Err(e) => self.rejected.push(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampUnit {
    /// Seconds.
    Seconds,
    /// Milliseconds.
    Millis,
    /// Microseconds.
    Micros,
    /// Nanoseconds.
    Nanos,
}

impl TimestampUnit {
    /// Convert a raw timestamp to milliseconds.
    #[must_use]
    pub const fn to_millis(self, raw: i64) -> i64 {
        match self {
            Self::Seconds => raw.saturating_mul(1_000),
            Self::Millis => raw,
            Self::Micros => raw / 1_000,
            Self::Nanos => raw / 1_000_000,
        }
    }
}

// =============================================================================
// Codec
// =============================================================================

/// Provider-aware frame codec.
#[derive(Debug, Clone, Copy)]
pub struct UpstreamCodec {
    provider: ProviderKind,
    unit: TimestampUnit,
}

impl UpstreamCodec {
    /// Create a codec for a provider.
    #[must_use]
    pub const fn new(provider: ProviderKind) -> Self {
        Self {
            provider,
            unit: provider.timestamp_unit(),
        }
    }

    /// Provider this codec speaks.
    #[must_use]
    pub const fn provider(&self) -> ProviderKind {
        self.provider
    }

    /// Decode one text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not valid JSON or not shaped like a
    /// provider message. Undecodable events inside a valid frame are
    /// returned in `DecodedFrame::rejected` instead.
    pub fn decode(&self, text: &str) -> Result<DecodedFrame, CodecError> {
        let value: Value = serde_json::from_str(text.trim())?;
        match self.provider {
            ProviderKind::Polygon => self.decode_polygon(value),
            ProviderKind::Finnhub => self.decode_finnhub(value),
        }
    }

    /// Auth frame to send after connecting, if the provider uses one.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn auth_frame(&self, key: &ApiKey) -> Result<Option<String>, CodecError> {
        match self.provider {
            ProviderKind::Polygon => Ok(Some(serde_json::to_string(&PolygonAction::auth(
                key.expose(),
            ))?)),
            ProviderKind::Finnhub => Ok(None),
        }
    }

    /// Frames carrying a subscribe/unsubscribe command.
    ///
    /// Polygon takes one frame for the whole batch, Finnhub one per symbol.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn command_frames(&self, command: &UpstreamCommand) -> Result<Vec<String>, CodecError> {
        let action = command.kind();
        let symbols = command.symbols();

        match self.provider {
            ProviderKind::Polygon => {
                let frame = PolygonAction::channels(action, symbols.iter().map(Symbol::as_str));
                Ok(vec![serde_json::to_string(&frame)?])
            }
            ProviderKind::Finnhub => symbols
                .iter()
                .map(|symbol| {
                    serde_json::to_string(&FinnhubAction {
                        kind: action,
                        symbol: symbol.to_string(),
                    })
                    .map_err(CodecError::from)
                })
                .collect(),
        }
    }

    // =========================================================================
    // Polygon
    // =========================================================================

    fn decode_polygon(&self, value: Value) -> Result<DecodedFrame, CodecError> {
        let items = match value {
            Value::Array(items) => items,
            object @ Value::Object(_) => vec![object],
            other => {
                return Err(CodecError::InvalidFormat(format!(
                    "expected JSON array or object, got {other}"
                )));
            }
        };

        let mut frame = DecodedFrame::default();
        for item in items {
            if let Some(result) = self.polygon_event(item) {
                frame.push(result);
            }
        }
        Ok(frame)
    }

    /// `None` for event types the relay does not consume.
    fn polygon_event(&self, item: Value) -> Option<Result<UpstreamEvent, CodecError>> {
        let Some(ev) = item.get("ev").and_then(Value::as_str).map(str::to_owned) else {
            return Some(Err(CodecError::MissingEventType));
        };

        match ev.as_str() {
            QUOTE_EVENT => Some(
                serde_json::from_value::<PolygonQuote>(item)
                    .map_err(CodecError::from)
                    .and_then(|raw| self.polygon_quote(raw))
                    .map(UpstreamEvent::Quote),
            ),
            "status" => Some(
                serde_json::from_value::<PolygonStatus>(item)
                    .map(|raw| UpstreamEvent::Status(polygon_status(raw)))
                    .map_err(CodecError::from),
            ),
            other => {
                tracing::trace!(ev = other, "skipping polygon event");
                None
            }
        }
    }

    fn polygon_quote(&self, raw: PolygonQuote) -> Result<Quote, CodecError> {
        Ok(Quote::new(
            Symbol::parse(&raw.sym)?,
            raw.bp,
            raw.bs,
            raw.ap,
            raw.ask_size,
            self.unit.to_millis(raw.t),
        ))
    }

    // =========================================================================
    // Finnhub
    // =========================================================================

    fn decode_finnhub(&self, value: Value) -> Result<DecodedFrame, CodecError> {
        if !value.is_object() {
            return Err(CodecError::InvalidFormat(
                "expected JSON object".to_string(),
            ));
        }

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or(CodecError::MissingEventType)?;

        match kind.as_str() {
            "trade" => {
                let trades: FinnhubTrades = serde_json::from_value(value)?;
                let mut frame = DecodedFrame::default();
                for item in trades.data {
                    frame.push(
                        serde_json::from_value::<FinnhubTrade>(item)
                            .map_err(CodecError::from)
                            .and_then(|trade| self.finnhub_quote(trade))
                            .map(UpstreamEvent::Quote),
                    );
                }
                Ok(frame)
            }
            "ping" => Ok(DecodedFrame::default()),
            "error" => {
                let err: FinnhubError = serde_json::from_value(value)?;
                Ok(DecodedFrame {
                    events: vec![UpstreamEvent::Status(StatusEvent::Error(err.msg))],
                    rejected: Vec::new(),
                })
            }
            other => Ok(DecodedFrame {
                events: vec![UpstreamEvent::Status(StatusEvent::Other(other.to_string()))],
                rejected: Vec::new(),
            }),
        }
    }

    /// A trade becomes a quote with both sides at the trade price.
    fn finnhub_quote(&self, trade: FinnhubTrade) -> Result<Quote, CodecError> {
        let size = trade.v.trunc().to_u64().unwrap_or(0);
        Ok(Quote::new(
            Symbol::parse(&trade.s)?,
            trade.p,
            size,
            trade.p,
            size,
            self.unit.to_millis(trade.t),
        ))
    }
}

fn polygon_status(raw: PolygonStatus) -> StatusEvent {
    match raw.status.as_str() {
        "connected" => StatusEvent::Connected,
        "auth_success" => StatusEvent::AuthSuccess,
        "auth_failed" => StatusEvent::AuthFailed(raw.message),
        "error" => StatusEvent::Error(raw.message),
        _ => StatusEvent::Other(raw.status),
    }
}
