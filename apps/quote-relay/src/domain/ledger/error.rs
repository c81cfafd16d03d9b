//! Ledger errors.

use rust_decimal::Decimal;

use super::order::{OrderId, OrderStatus};
use crate::domain::market::Symbol;

/// Typed order rejection reasons.
///
/// Every variant leaves the account untouched: checks run before any
/// balance or position is mutated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// No price is available for the symbol.
    #[error("unknown symbol: {0}")]
    UnknownSymbol(Symbol),

    /// Buy would cost more than the available cash.
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds {
        /// Cost of the order.
        required: Decimal,
        /// Cash available.
        available: Decimal,
    },

    /// Sell exceeds the held quantity.
    #[error("insufficient shares of {symbol}: requested {requested}, held {held}")]
    InsufficientShares {
        /// Position symbol.
        symbol: Symbol,
        /// Quantity requested.
        requested: Decimal,
        /// Quantity held.
        held: Decimal,
    },

    /// Sell with no position.
    #[error("no position in {0}")]
    NoPosition(Symbol),

    /// Order parameters are invalid.
    #[error("invalid order: {0}")]
    InvalidOrder(String),

    /// Order id is unknown.
    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    /// Order is not open.
    #[error("order {id} cannot be canceled in status {status}")]
    OrderNotCancelable {
        /// Order id.
        id: OrderId,
        /// Current status.
        status: OrderStatus,
    },

    /// Status transition not allowed.
    #[error("order {id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// Order id.
        id: OrderId,
        /// Current status.
        from: OrderStatus,
        /// Requested status.
        to: OrderStatus,
    },

    /// Price source failed.
    #[error("price source error: {0}")]
    Price(String),
}

impl LedgerError {
    /// Rejection reason label.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::UnknownSymbol(_) => "unknown_symbol",
            Self::InsufficientFunds { .. } => "insufficient_funds",
            Self::InsufficientShares { .. } => "insufficient_shares",
            Self::NoPosition(_) => "no_position",
            Self::InvalidOrder(_) => "invalid_order",
            Self::OrderNotFound(_) => "order_not_found",
            Self::OrderNotCancelable { .. } => "order_not_cancelable",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Price(_) => "price_error",
        }
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidOrder(message.into())
    }
}
