//! Provider Wire Messages
//!
//! Serde types for the frames exchanged with each provider.
//!
//! # Polygon
//!
//! ```json
//! {"action":"subscribe","params":"Q.AAPL,Q.MSFT"}
//! [{"ev":"status","status":"auth_success","message":"authenticated"}]
//! [{"ev":"Q","sym":"AAPL","bp":150.01,"bs":3,"ap":150.05,"as":1,"t":1700000000000}]
//! ```
//!
//! # Finnhub
//!
//! ```json
//! {"type":"subscribe","symbol":"AAPL"}
//! {"type":"trade","data":[{"s":"AAPL","p":150.02,"v":100,"t":1700000000000}]}
//! {"type":"ping"}
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Polygon
// =============================================================================

/// Channel prefix for Polygon quote subscriptions.
pub const POLYGON_QUOTE_CHANNEL: &str = "Q";

/// Polygon control frame (`auth`, `subscribe`, `unsubscribe`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolygonAction {
    /// Action name.
    pub action: &'static str,
    /// API key or comma-separated channel list.
    pub params: String,
}

impl PolygonAction {
    /// Auth frame.
    #[must_use]
    pub fn auth(key: &str) -> Self {
        Self {
            action: "auth",
            params: key.to_string(),
        }
    }

    /// Subscribe or unsubscribe frame for a set of quote channels.
    #[must_use]
    pub fn channels<'a>(action: &'static str, symbols: impl IntoIterator<Item = &'a str>) -> Self {
        let params = symbols
            .into_iter()
            .map(|s| format!("{POLYGON_QUOTE_CHANNEL}.{s}"))
            .collect::<Vec<_>>()
            .join(",");
        Self { action, params }
    }
}

/// Polygon status event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PolygonStatus {
    /// `connected`, `auth_success`, `auth_failed`, `success`, ...
    pub status: String,
    /// Free-text detail.
    #[serde(default)]
    pub message: String,
}

/// Polygon stock quote event.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PolygonQuote {
    /// Ticker.
    pub sym: String,
    /// Bid price.
    #[serde(default)]
    pub bp: Decimal,
    /// Bid size.
    #[serde(default)]
    pub bs: u64,
    /// Ask price.
    #[serde(default)]
    pub ap: Decimal,
    /// Ask size.
    #[serde(default, rename = "as")]
    pub ask_size: u64,
    /// SIP timestamp.
    pub t: i64,
}

// =============================================================================
// Finnhub
// =============================================================================

/// Finnhub subscribe or unsubscribe frame. One per symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FinnhubAction {
    /// `subscribe` or `unsubscribe`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Ticker.
    pub symbol: String,
}

/// Finnhub trade payload.
///
/// Entries stay raw so one malformed trade does not fail the frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FinnhubTrades {
    /// Trades in this frame.
    #[serde(default)]
    pub data: Vec<serde_json::Value>,
}

/// One Finnhub trade.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FinnhubTrade {
    /// Ticker.
    pub s: String,
    /// Trade price.
    pub p: Decimal,
    /// Volume; fractional for some venues.
    #[serde(default)]
    pub v: Decimal,
    /// Trade timestamp.
    pub t: i64,
}

/// Finnhub error frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FinnhubError {
    /// Error message.
    #[serde(default)]
    pub msg: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polygon_channels_join() {
        let frame = PolygonAction::channels("subscribe", ["AAPL", "MSFT"]);
        assert_eq!(
            serde_json::to_string(&frame).unwrap(),
            r#"{"action":"subscribe","params":"Q.AAPL,Q.MSFT"}"#
        );
    }

    #[test]
    fn polygon_auth_frame() {
        assert_eq!(
            serde_json::to_string(&PolygonAction::auth("k")).unwrap(),
            r#"{"action":"auth","params":"k"}"#
        );
    }

    #[test]
    fn finnhub_action_shape() {
        let frame = FinnhubAction {
            kind: "unsubscribe",
            symbol: "AAPL".into(),
        };
        assert_eq!(
            serde_json::to_string(&frame).unwrap(),
            r#"{"type":"unsubscribe","symbol":"AAPL"}"#
        );
    }

    #[test]
    fn polygon_quote_reads_numbers() {
        let quote: PolygonQuote = serde_json::from_str(
            r#"{"ev":"Q","sym":"AAPL","bx":4,"bp":150.01,"bs":3,"ax":7,"ap":150.05,"as":1,"t":1700000000000,"z":3}"#,
        )
        .unwrap();
        assert_eq!(quote.bp, Decimal::new(15001, 2));
        assert_eq!(quote.ask_size, 1);
    }
}
