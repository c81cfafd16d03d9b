//! Market Data Types
//!
//! Symbols, normalized quotes, and the last-quote cache that marks
//! simulated positions.

mod quote;
mod symbol;

use std::collections::HashMap;

use parking_lot::RwLock;
use rust_decimal::Decimal;

pub use quote::{QUOTE_EVENT, Quote};
pub use symbol::{MAX_SYMBOL_LEN, Symbol, SymbolError};

// =============================================================================
// Latest Quotes
// =============================================================================

/// Most recent quote seen per symbol.
///
/// Written by the fan-out path for every inbound quote, read by the ledger
/// when it needs a price.
#[derive(Debug, Default)]
pub struct LatestQuotes {
    quotes: RwLock<HashMap<Symbol, Quote>>,
}

impl LatestQuotes {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a quote, replacing the previous one unless it is older.
    pub fn record(&self, quote: &Quote) {
        let mut quotes = self.quotes.write();
        match quotes.get(&quote.symbol) {
            Some(existing) if existing.timestamp_ms > quote.timestamp_ms => {}
            _ => {
                quotes.insert(quote.symbol.clone(), quote.clone());
            }
        }
    }

    /// Get the latest quote for a symbol.
    #[must_use]
    pub fn get(&self, symbol: &Symbol) -> Option<Quote> {
        self.quotes.read().get(symbol).cloned()
    }

    /// Get the latest reference price for a symbol.
    #[must_use]
    pub fn price(&self, symbol: &Symbol) -> Option<Decimal> {
        self.quotes
            .read()
            .get(symbol)
            .and_then(Quote::reference_price)
    }

    /// Number of symbols with a cached quote.
    #[must_use]
    pub fn len(&self) -> usize {
        self.quotes.read().len()
    }

    /// Check if no quotes have been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotes.read().is_empty()
    }
}
