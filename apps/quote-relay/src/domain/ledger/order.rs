//! Orders and their lifecycle.
//!
//! Status is one-way: `Open → Filled` or `Open → Canceled`. A terminal
//! order never re-enters `Open`.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::error::LedgerError;
use crate::domain::market::Symbol;

// =============================================================================
// Order Id
// =============================================================================

/// Monotonically assigned order id, displayed as `order-N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OrderId(u64);

impl OrderId {
    /// Create an id from its sequence number.
    #[must_use]
    pub const fn new(sequence: u64) -> Self {
        Self(sequence)
    }

    /// Sequence number.
    #[must_use]
    pub const fn sequence(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "order-{}", self.0)
    }
}

impl FromStr for OrderId {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("order-").unwrap_or(s);
        digits
            .parse()
            .map(Self)
            .map_err(|_| LedgerError::invalid(format!("malformed order id: {s}")))
    }
}

impl Serialize for OrderId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for OrderId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Value Objects
// =============================================================================

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
}

impl OrderSide {
    /// Side name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
        }
    }
}

/// Order type.
///
/// Only `Market` executes. The rest are stored as open and never matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    /// Execute immediately at the current price.
    Market,
    /// Limit order.
    Limit,
    /// Stop order.
    Stop,
    /// Stop-limit order.
    StopLimit,
    /// Trailing stop order.
    TrailingStop,
}

impl OrderType {
    /// Check if this is a market order.
    #[must_use]
    pub const fn is_market(self) -> bool {
        matches!(self, Self::Market)
    }

    /// Type name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Market => "market",
            Self::Limit => "limit",
            Self::Stop => "stop",
            Self::StopLimit => "stop_limit",
            Self::TrailingStop => "trailing_stop",
        }
    }

    const fn requires_limit_price(self) -> bool {
        matches!(self, Self::Limit | Self::StopLimit)
    }

    const fn requires_stop_price(self) -> bool {
        matches!(self, Self::Stop | Self::StopLimit)
    }
}

/// Time in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    /// Day order.
    #[default]
    Day,
    /// Good till canceled.
    Gtc,
    /// Immediate or cancel.
    Ioc,
    /// Fill or kill.
    Fok,
    /// Market on open.
    Opg,
    /// Market on close.
    Cls,
}

/// Order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Accepted, not executed.
    Open,
    /// Executed.
    Filled,
    /// Canceled while open.
    Canceled,
}

impl OrderStatus {
    /// Check if the status is terminal.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Filled | Self::Canceled)
    }

    /// Check if moving to `next` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Open, Self::Filled | Self::Canceled)
        )
    }

    /// Status name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Filled => "filled",
            Self::Canceled => "canceled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status filter for order listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StatusFilter {
    /// Open orders only.
    #[default]
    Open,
    /// Filled or canceled orders.
    Closed,
    /// Everything.
    All,
}

impl StatusFilter {
    /// Parse a filter, defaulting to `Open`.
    #[must_use]
    pub fn from_str_case_insensitive(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "closed" => Self::Closed,
            "all" => Self::All,
            _ => Self::Open,
        }
    }

    /// Check if a status passes the filter.
    #[must_use]
    pub const fn matches(self, status: OrderStatus) -> bool {
        match self {
            Self::Open => !status.is_terminal(),
            Self::Closed => status.is_terminal(),
            Self::All => true,
        }
    }
}

/// Order listing query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderQuery {
    /// Status filter.
    pub status: StatusFilter,
    /// Maximum orders returned.
    pub limit: usize,
    /// Only orders after this id.
    pub after: Option<OrderId>,
}

impl OrderQuery {
    /// Default page size.
    pub const DEFAULT_LIMIT: usize = 10;

    /// Query with the given filter and default paging.
    #[must_use]
    pub const fn new(status: StatusFilter) -> Self {
        Self {
            status,
            limit: Self::DEFAULT_LIMIT,
            after: None,
        }
    }

    /// Set the page size.
    #[must_use]
    pub const fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Set the cursor.
    #[must_use]
    pub const fn after(mut self, id: OrderId) -> Self {
        self.after = Some(id);
        self
    }
}

impl Default for OrderQuery {
    fn default() -> Self {
        Self::new(StatusFilter::default())
    }
}

// =============================================================================
// Order Request
// =============================================================================

/// How much to trade: a share count or a cash amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderSize {
    /// Number of shares.
    Quantity(Decimal),
    /// Cash amount, converted to shares at the execution price.
    Notional(Decimal),
}

impl OrderSize {
    /// Build from optional parts, requiring exactly one.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOrder` if both or neither are supplied.
    pub fn from_parts(
        quantity: Option<Decimal>,
        notional: Option<Decimal>,
    ) -> Result<Self, LedgerError> {
        match (quantity, notional) {
            (Some(q), None) => Ok(Self::Quantity(q)),
            (None, Some(n)) => Ok(Self::Notional(n)),
            (Some(_), Some(_)) => Err(LedgerError::invalid(
                "supply either quantity or notional, not both",
            )),
            (None, None) => Err(LedgerError::invalid("quantity or notional is required")),
        }
    }
}

/// Order placement request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRequest {
    /// Symbol to trade.
    pub symbol: Symbol,
    /// Side.
    pub side: OrderSide,
    /// Type.
    pub order_type: OrderType,
    /// Quantity or notional.
    pub size: OrderSize,
    /// Limit price (stored, not enforced).
    pub limit_price: Option<Decimal>,
    /// Stop price (stored, not enforced).
    pub stop_price: Option<Decimal>,
    /// Time in force.
    pub time_in_force: TimeInForce,
}

impl OrderRequest {
    /// Market order for a share quantity.
    #[must_use]
    pub const fn market(symbol: Symbol, side: OrderSide, quantity: Decimal) -> Self {
        Self {
            symbol,
            side,
            order_type: OrderType::Market,
            size: OrderSize::Quantity(quantity),
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
        }
    }

    /// Market order for a cash amount.
    #[must_use]
    pub const fn notional(symbol: Symbol, side: OrderSide, amount: Decimal) -> Self {
        Self {
            symbol,
            side,
            order_type: OrderType::Market,
            size: OrderSize::Notional(amount),
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
        }
    }

    /// Limit order.
    #[must_use]
    pub const fn limit(
        symbol: Symbol,
        side: OrderSide,
        quantity: Decimal,
        limit_price: Decimal,
    ) -> Self {
        Self {
            symbol,
            side,
            order_type: OrderType::Limit,
            size: OrderSize::Quantity(quantity),
            limit_price: Some(limit_price),
            stop_price: None,
            time_in_force: TimeInForce::Day,
        }
    }

    /// Set the order type.
    #[must_use]
    pub const fn with_type(mut self, order_type: OrderType) -> Self {
        self.order_type = order_type;
        self
    }

    /// Set the stop price.
    #[must_use]
    pub const fn with_stop_price(mut self, price: Decimal) -> Self {
        self.stop_price = Some(price);
        self
    }

    /// Set the time in force.
    #[must_use]
    pub const fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = tif;
        self
    }

    /// Check request parameters that do not depend on account state.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOrder` describing the first problem found.
    pub fn validate(&self) -> Result<(), LedgerError> {
        match self.size {
            OrderSize::Quantity(q) if q <= Decimal::ZERO => {
                return Err(LedgerError::invalid("quantity must be positive"));
            }
            OrderSize::Notional(n) if n <= Decimal::ZERO => {
                return Err(LedgerError::invalid("notional must be positive"));
            }
            OrderSize::Notional(_) if !self.order_type.is_market() => {
                return Err(LedgerError::invalid(
                    "notional is only supported for market orders",
                ));
            }
            _ => {}
        }

        if self.order_type.requires_limit_price() && self.limit_price.is_none() {
            return Err(LedgerError::invalid(format!(
                "{} orders require a limit price",
                self.order_type.as_str()
            )));
        }
        if self.order_type.requires_stop_price() && self.stop_price.is_none() {
            return Err(LedgerError::invalid(format!(
                "{} orders require a stop price",
                self.order_type.as_str()
            )));
        }
        for price in [self.limit_price, self.stop_price].into_iter().flatten() {
            if price <= Decimal::ZERO {
                return Err(LedgerError::invalid("prices must be positive"));
            }
        }

        Ok(())
    }
}

// =============================================================================
// Order
// =============================================================================

/// A recorded order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order id.
    pub id: OrderId,
    /// Symbol.
    pub symbol: Symbol,
    /// Side.
    pub side: OrderSide,
    /// Type.
    #[serde(rename = "type")]
    pub order_type: OrderType,
    /// Time in force.
    pub time_in_force: TimeInForce,
    /// Ordered quantity.
    #[serde(rename = "qty")]
    pub quantity: Decimal,
    /// Executed quantity.
    #[serde(rename = "filled_qty")]
    pub filled_quantity: Decimal,
    /// Requested cash amount, for notional orders.
    pub notional: Option<Decimal>,
    /// Requested limit price.
    pub limit_price: Option<Decimal>,
    /// Requested stop price.
    pub stop_price: Option<Decimal>,
    /// Current status.
    pub status: OrderStatus,
    /// Execution price.
    pub filled_avg_price: Option<Decimal>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Execution time.
    pub filled_at: Option<DateTime<Utc>>,
    /// Cancellation time.
    pub canceled_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Record a new open order.
    #[must_use]
    pub fn open(id: OrderId, request: &OrderRequest, quantity: Decimal, at: DateTime<Utc>) -> Self {
        let notional = match request.size {
            OrderSize::Notional(n) => Some(n),
            OrderSize::Quantity(_) => None,
        };

        Self {
            id,
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: request.order_type,
            time_in_force: request.time_in_force,
            quantity,
            filled_quantity: Decimal::ZERO,
            notional,
            limit_price: request.limit_price,
            stop_price: request.stop_price,
            status: OrderStatus::Open,
            filled_avg_price: None,
            created_at: at,
            filled_at: None,
            canceled_at: None,
        }
    }

    /// Mark the order filled in full at `price`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` if the order is not open.
    pub fn fill(&mut self, price: Decimal, at: DateTime<Utc>) -> Result<(), LedgerError> {
        self.transition(OrderStatus::Filled)?;
        self.filled_quantity = self.quantity;
        self.filled_avg_price = Some(price);
        self.filled_at = Some(at);
        Ok(())
    }

    /// Cancel the order.
    ///
    /// # Errors
    ///
    /// Returns `OrderNotCancelable` if the order is not open.
    pub fn cancel(&mut self, at: DateTime<Utc>) -> Result<(), LedgerError> {
        if self.status != OrderStatus::Open {
            return Err(LedgerError::OrderNotCancelable {
                id: self.id,
                status: self.status,
            });
        }
        self.transition(OrderStatus::Canceled)?;
        self.canceled_at = Some(at);
        Ok(())
    }

    fn transition(&mut self, next: OrderStatus) -> Result<(), LedgerError> {
        if !self.status.can_transition_to(next) {
            return Err(LedgerError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}
