//! Account and Positions
//!
//! Cash, buying power, and per-symbol holdings for the simulated account.
//!
//! # Invariants
//!
//! - `portfolio_value == cash + Σ(quantity * last_price)` after every
//!   mutation
//! - A position exists only while its quantity is positive
//! - A rejected buy or sell leaves every field untouched

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::Serialize;

use super::error::LedgerError;
use crate::domain::market::Symbol;

// =============================================================================
// Position
// =============================================================================

/// Holding in one symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    /// Symbol held.
    pub symbol: Symbol,
    /// Shares held, always positive.
    pub quantity: Decimal,
    /// Weighted-average fill price.
    pub avg_entry_price: Decimal,
    /// Last price the position was marked at.
    pub last_price: Decimal,
}

impl Position {
    fn opened(symbol: Symbol, quantity: Decimal, price: Decimal) -> Self {
        Self {
            symbol,
            quantity,
            avg_entry_price: price,
            last_price: price,
        }
    }

    /// Quantity times last price.
    #[must_use]
    pub fn market_value(&self) -> Decimal {
        self.quantity * self.last_price
    }

    /// Quantity times average entry price.
    #[must_use]
    pub fn cost_basis(&self) -> Decimal {
        self.quantity * self.avg_entry_price
    }

    /// Market value minus cost basis.
    #[must_use]
    pub fn unrealized_pl(&self) -> Decimal {
        self.market_value() - self.cost_basis()
    }

    /// Serializable view of the position.
    #[must_use]
    pub fn snapshot(&self) -> PositionSnapshot {
        PositionSnapshot {
            symbol: self.symbol.clone(),
            qty: self.quantity,
            avg_entry_price: self.avg_entry_price,
            current_price: self.last_price,
            market_value: self.market_value(),
            cost_basis: self.cost_basis(),
            unrealized_pl: self.unrealized_pl(),
        }
    }
}

// =============================================================================
// Account
// =============================================================================

/// The simulated trading account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    seed_cash: Decimal,
    cash: Decimal,
    buying_power: Decimal,
    portfolio_value: Decimal,
    positions: BTreeMap<Symbol, Position>,
}

impl Account {
    /// Open an account funded with `seed_cash`.
    #[must_use]
    pub const fn new(seed_cash: Decimal) -> Self {
        Self {
            seed_cash,
            cash: seed_cash,
            buying_power: seed_cash,
            portfolio_value: seed_cash,
            positions: BTreeMap::new(),
        }
    }

    /// Cash balance.
    #[must_use]
    pub const fn cash(&self) -> Decimal {
        self.cash
    }

    /// Buying power.
    #[must_use]
    pub const fn buying_power(&self) -> Decimal {
        self.buying_power
    }

    /// Cash plus the marked value of every position.
    #[must_use]
    pub const fn portfolio_value(&self) -> Decimal {
        self.portfolio_value
    }

    /// Initial balance.
    #[must_use]
    pub const fn seed_cash(&self) -> Decimal {
        self.seed_cash
    }

    /// Position for a symbol.
    #[must_use]
    pub fn position(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// All positions, ordered by symbol.
    pub fn positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    /// Symbols with an open position, ordered.
    #[must_use]
    pub fn held_symbols(&self) -> Vec<Symbol> {
        self.positions.keys().cloned().collect()
    }

    /// Buy `quantity` shares at `price`.
    ///
    /// # Errors
    ///
    /// `InsufficientFunds` if the cost exceeds cash, `InvalidOrder` if the
    /// cost overflows.
    pub fn apply_buy(
        &mut self,
        symbol: &Symbol,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<(), LedgerError> {
        let required = quantity.checked_mul(price).ok_or_else(out_of_range)?;

        if required > self.cash {
            return Err(LedgerError::InsufficientFunds {
                required,
                available: self.cash,
            });
        }

        let position = match self.positions.get(symbol) {
            Some(existing) => {
                let total = existing.quantity.checked_add(quantity).ok_or_else(out_of_range)?;
                let avg_entry_price = existing
                    .quantity
                    .checked_mul(existing.avg_entry_price)
                    .and_then(|basis| basis.checked_add(required))
                    .and_then(|basis| basis.checked_div(total))
                    .ok_or_else(out_of_range)?;
                Position {
                    symbol: symbol.clone(),
                    quantity: total,
                    avg_entry_price,
                    last_price: price,
                }
            }
            None => Position::opened(symbol.clone(), quantity, price),
        };

        self.commit(symbol, Some(position), self.cash - required)
    }

    /// Sell `quantity` shares at `price`.
    ///
    /// # Errors
    ///
    /// `NoPosition` if nothing is held, `InsufficientShares` if `quantity`
    /// exceeds the holding, `InvalidOrder` if the proceeds overflow.
    pub fn apply_sell(
        &mut self,
        symbol: &Symbol,
        quantity: Decimal,
        price: Decimal,
    ) -> Result<(), LedgerError> {
        let Some(position) = self.positions.get(symbol) else {
            return Err(LedgerError::NoPosition(symbol.clone()));
        };

        if quantity > position.quantity {
            return Err(LedgerError::InsufficientShares {
                symbol: symbol.clone(),
                requested: quantity,
                held: position.quantity,
            });
        }

        let cash = quantity
            .checked_mul(price)
            .and_then(|proceeds| self.cash.checked_add(proceeds))
            .ok_or_else(out_of_range)?;

        let remaining = position.quantity - quantity;
        let position = (!remaining.is_zero()).then(|| Position {
            quantity: remaining,
            last_price: price,
            ..position.clone()
        });

        self.commit(symbol, position, cash)
    }

    /// Mark a position at a new price. Unknown symbols are ignored.
    ///
    /// # Errors
    ///
    /// `InvalidOrder` if the marked value overflows; the old mark is kept.
    pub fn mark_price(&mut self, symbol: &Symbol, price: Decimal) -> Result<(), LedgerError> {
        let Some(position) = self.positions.get(symbol) else {
            return Ok(());
        };

        let marked = Position {
            last_price: price,
            ..position.clone()
        };
        self.commit(symbol, Some(marked), self.cash)
    }

    /// Restore the seed balance and drop every position.
    pub fn reset(&mut self) {
        *self = Self::new(self.seed_cash);
    }

    /// Serializable view of the account.
    #[must_use]
    pub fn snapshot(&self) -> AccountSnapshot {
        AccountSnapshot {
            cash: self.cash,
            buying_power: self.buying_power,
            portfolio_value: self.portfolio_value,
            positions: self.positions.values().map(Position::snapshot).collect(),
        }
    }

    /// Replace the holding in `symbol` and the cash balance together. Nothing
    /// changes if the resulting portfolio value does not fit.
    fn commit(
        &mut self,
        symbol: &Symbol,
        position: Option<Position>,
        cash: Decimal,
    ) -> Result<(), LedgerError> {
        let portfolio_value = self
            .positions
            .values()
            .filter(|held| held.symbol != *symbol)
            .chain(position.as_ref())
            .try_fold(cash, |total, held| {
                held.quantity
                    .checked_mul(held.last_price)
                    .and_then(|value| total.checked_add(value))
            })
            .ok_or_else(|| LedgerError::invalid("portfolio value out of range"))?;

        match position {
            Some(position) => {
                self.positions.insert(symbol.clone(), position);
            }
            None => {
                self.positions.remove(symbol);
            }
        }
        // Cash account: buying power tracks cash.
        self.cash = cash;
        self.buying_power = cash;
        self.portfolio_value = portfolio_value;
        Ok(())
    }
}

fn out_of_range() -> LedgerError {
    LedgerError::invalid("order value out of range")
}

// =============================================================================
// Snapshots
// =============================================================================

/// Point-in-time account view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountSnapshot {
    /// Cash balance.
    pub cash: Decimal,
    /// Buying power.
    pub buying_power: Decimal,
    /// Cash plus marked positions.
    pub portfolio_value: Decimal,
    /// Open positions, ordered by symbol.
    pub positions: Vec<PositionSnapshot>,
}

/// Point-in-time position view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionSnapshot {
    /// Symbol.
    pub symbol: Symbol,
    /// Shares held.
    pub qty: Decimal,
    /// Weighted-average fill price.
    pub avg_entry_price: Decimal,
    /// Last marked price.
    pub current_price: Decimal,
    /// Quantity times current price.
    pub market_value: Decimal,
    /// Quantity times average entry price.
    pub cost_basis: Decimal,
    /// Market value minus cost basis.
    pub unrealized_pl: Decimal,
}
