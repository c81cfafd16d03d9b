//! Price Source Port (Driven Port)
//!
//! Latest-price lookup consumed by the execution ledger.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::market::Symbol;

/// Price lookup error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PriceError {
    /// No price is known for the symbol.
    #[error("no price available for {0}")]
    Unavailable(Symbol),

    /// The source itself failed.
    #[error("price source failed: {0}")]
    Source(String),
}

/// Port for resolving the current price of a symbol.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Get the latest price for a symbol.
    async fn latest_price(&self, symbol: &Symbol) -> Result<Decimal, PriceError>;
}
