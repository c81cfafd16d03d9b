//! Normalized Quotes
//!
//! The single quote type every upstream provider is adapted into, and the
//! frame format pushed to downstream clients.
//!
//! # Wire Format (downstream)
//!
//! ```json
//! {"ev":"Q","sym":"AAPL","bp":150.01,"bs":3,"ap":150.05,"as":1,"t":1700000000000}
//! ```

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Symbol;

/// Event tag carried by every downstream quote frame.
pub const QUOTE_EVENT: &str = "Q";

/// Top-of-book quote for one symbol.
///
/// Timestamps are always milliseconds since the Unix epoch, whatever unit
/// the upstream provider used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    /// Ticker symbol.
    #[serde(rename = "sym")]
    pub symbol: Symbol,

    /// Bid price.
    #[serde(rename = "bp", serialize_with = "rust_decimal::serde::float::serialize")]
    pub bid_price: Decimal,

    /// Bid size.
    #[serde(rename = "bs")]
    pub bid_size: u64,

    /// Ask price.
    #[serde(rename = "ap", serialize_with = "rust_decimal::serde::float::serialize")]
    pub ask_price: Decimal,

    /// Ask size.
    #[serde(rename = "as")]
    pub ask_size: u64,

    /// Event timestamp in milliseconds.
    #[serde(rename = "t")]
    pub timestamp_ms: i64,
}

#[derive(Serialize)]
struct QuoteFrame<'a> {
    ev: &'static str,
    #[serde(flatten)]
    quote: &'a Quote,
}

impl Quote {
    /// Create a new quote.
    #[must_use]
    pub const fn new(
        symbol: Symbol,
        bid_price: Decimal,
        bid_size: u64,
        ask_price: Decimal,
        ask_size: u64,
        timestamp_ms: i64,
    ) -> Self {
        Self {
            symbol,
            bid_price,
            bid_size,
            ask_price,
            ask_size,
            timestamp_ms,
        }
    }

    /// Price used to mark positions against this quote.
    ///
    /// The midpoint when both sides are present, otherwise whichever side
    /// is positive. `None` for an empty book.
    #[must_use]
    pub fn reference_price(&self) -> Option<Decimal> {
        let bid = self.bid_price;
        let ask = self.ask_price;

        match (bid > Decimal::ZERO, ask > Decimal::ZERO) {
            (true, true) => Some((bid + ask) / Decimal::TWO),
            (true, false) => Some(bid),
            (false, true) => Some(ask),
            (false, false) => None,
        }
    }

    /// Encode as a downstream frame.
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&QuoteFrame {
            ev: QUOTE_EVENT,
            quote: self,
        })
    }
}
