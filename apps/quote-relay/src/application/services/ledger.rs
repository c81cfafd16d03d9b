//! Execution Ledger Service
//!
//! Executes simulated orders against the account. The whole ledger sits
//! behind one async mutex held across the price lookup, so an order, a
//! revaluation, and a reset never interleave.
//!
//! # Market Order Flow
//!
//! ```text
//! validate → lock → resolve price → size → apply to account → record filled
//! ```
//!
//! Every check happens before the account is touched. A rejected order is
//! not stored and does not consume an id.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::{Decimal, RoundingStrategy};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::application::ports::{PriceError, PriceSource};
use crate::domain::ledger::{
    Account, AccountSnapshot, LedgerError, Order, OrderId, OrderQuery, OrderRequest, OrderSide,
    OrderSize, OrderStore,
};
use crate::domain::market::Symbol;
use crate::infrastructure::metrics;

/// Decimal places kept when converting a notional amount to shares.
const NOTIONAL_QTY_SCALE: u32 = 8;

struct LedgerState {
    account: Account,
    orders: OrderStore,
}

/// Simulated account and order book.
pub struct ExecutionLedger {
    state: Mutex<LedgerState>,
    prices: Arc<dyn PriceSource>,
}

impl std::fmt::Debug for ExecutionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionLedger").finish_non_exhaustive()
    }
}

impl ExecutionLedger {
    /// Open a ledger funded with `seed_cash`.
    #[must_use]
    pub fn new(seed_cash: Decimal, prices: Arc<dyn PriceSource>) -> Self {
        Self {
            state: Mutex::new(LedgerState {
                account: Account::new(seed_cash),
                orders: OrderStore::new(),
            }),
            prices,
        }
    }

    /// Place an order.
    ///
    /// Market orders fill immediately at the current price. Other types are
    /// recorded as open and stay open until canceled.
    ///
    /// # Errors
    ///
    /// Any `LedgerError` rejection; the account is unchanged.
    pub async fn place_order(&self, request: OrderRequest) -> Result<Order, LedgerError> {
        let result = match request.validate() {
            Ok(()) => {
                let mut state = self.state.lock().await;
                self.execute(&mut state, &request).await
            }
            Err(e) => Err(e),
        };
        record_outcome(&request, &result);
        result
    }

    /// Sell `quantity` shares of a position, or all of it.
    ///
    /// # Errors
    ///
    /// `NoPosition` if nothing is held, otherwise as `place_order`.
    pub async fn close_position(
        &self,
        symbol: &Symbol,
        quantity: Option<Decimal>,
    ) -> Result<Order, LedgerError> {
        let mut state = self.state.lock().await;

        let held = state
            .account
            .position(symbol)
            .map(|p| p.quantity)
            .ok_or_else(|| LedgerError::NoPosition(symbol.clone()))?;

        let request = OrderRequest::market(symbol.clone(), OrderSide::Sell, quantity.unwrap_or(held));
        let result = match request.validate() {
            Ok(()) => self.execute(&mut state, &request).await,
            Err(e) => Err(e),
        };
        record_outcome(&request, &result);
        result
    }

    /// Sell every position in full.
    ///
    /// One result per position, in symbol order. A failure on one symbol
    /// does not stop the others.
    pub async fn close_all_positions(&self) -> Vec<Result<Order, LedgerError>> {
        let mut state = self.state.lock().await;
        let held: Vec<(Symbol, Decimal)> = state
            .account
            .positions()
            .map(|p| (p.symbol.clone(), p.quantity))
            .collect();

        let mut results = Vec::with_capacity(held.len());
        for (symbol, quantity) in held {
            let request = OrderRequest::market(symbol, OrderSide::Sell, quantity);
            let result = self.execute(&mut state, &request).await;
            record_outcome(&request, &result);
            results.push(result);
        }

        info!(closed = results.iter().filter(|r| r.is_ok()).count(), "positions closed");
        results
    }

    /// Cancel an open order.
    ///
    /// # Errors
    ///
    /// `OrderNotFound` or `OrderNotCancelable`.
    pub async fn cancel_order(&self, id: OrderId) -> Result<Order, LedgerError> {
        let mut state = self.state.lock().await;
        let order = state.orders.cancel(id, Utc::now())?;
        info!(order_id = %id, "order canceled");
        Ok(order)
    }

    /// Look up an order.
    ///
    /// # Errors
    ///
    /// `OrderNotFound` for an unknown id.
    pub async fn get_order(&self, id: OrderId) -> Result<Order, LedgerError> {
        self.state
            .lock()
            .await
            .orders
            .get(id)
            .cloned()
            .ok_or(LedgerError::OrderNotFound(id))
    }

    /// List orders, ascending by id.
    pub async fn get_orders(&self, query: &OrderQuery) -> Vec<Order> {
        self.state.lock().await.orders.list(query)
    }

    /// Current account view.
    pub async fn account(&self) -> AccountSnapshot {
        self.state.lock().await.account.snapshot()
    }

    /// Re-mark every position at the latest price.
    ///
    /// A symbol without a fresh price keeps its previous mark.
    pub async fn revalue(&self) -> AccountSnapshot {
        let mut state = self.state.lock().await;

        for symbol in state.account.held_symbols() {
            let marked = self
                .resolve_price(&symbol)
                .await
                .and_then(|price| state.account.mark_price(&symbol, price));
            if let Err(e) = marked {
                debug!(%symbol, error = %e, "keeping previous mark");
            }
        }

        state.account.snapshot()
    }

    /// Restore the seed balance and drop all positions and orders.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.account.reset();
        state.orders.clear();
        info!(seed_cash = %state.account.seed_cash(), "ledger reset");
    }

    // =========================================================================
    // Internals
    // =========================================================================

    async fn execute(
        &self,
        state: &mut LedgerState,
        request: &OrderRequest,
    ) -> Result<Order, LedgerError> {
        let now = Utc::now();

        if !request.order_type.is_market() {
            let OrderSize::Quantity(quantity) = request.size else {
                return Err(LedgerError::invalid(
                    "notional is only supported for market orders",
                ));
            };
            let order = Order::open(state.orders.allocate_id(), request, quantity, now);
            state.orders.insert(order.clone())?;
            return Ok(order);
        }

        let price = self.resolve_price(&request.symbol).await?;
        let quantity = match request.size {
            OrderSize::Quantity(quantity) => quantity,
            OrderSize::Notional(notional) => notional_quantity(notional, price)?,
        };

        match request.side {
            OrderSide::Buy => state.account.apply_buy(&request.symbol, quantity, price)?,
            OrderSide::Sell => state.account.apply_sell(&request.symbol, quantity, price)?,
        }

        let mut order = Order::open(state.orders.allocate_id(), request, quantity, now);
        order.fill(price, now)?;
        state.orders.insert(order.clone())?;
        Ok(order)
    }

    async fn resolve_price(&self, symbol: &Symbol) -> Result<Decimal, LedgerError> {
        match self.prices.latest_price(symbol).await {
            Ok(price) if price > Decimal::ZERO => Ok(price),
            Ok(_) | Err(PriceError::Unavailable(_)) => Err(LedgerError::UnknownSymbol(symbol.clone())),
            Err(PriceError::Source(message)) => Err(LedgerError::Price(message)),
        }
    }
}

/// Shares bought by `notional` at `price`, truncated to 8 places.
fn notional_quantity(notional: Decimal, price: Decimal) -> Result<Decimal, LedgerError> {
    let quantity = notional
        .checked_div(price)
        .ok_or_else(|| LedgerError::invalid("notional out of range"))?
        .round_dp_with_strategy(NOTIONAL_QTY_SCALE, RoundingStrategy::ToZero);

    if quantity.is_zero() {
        return Err(LedgerError::invalid("notional too small for one share fraction"));
    }
    Ok(quantity)
}

fn record_outcome(request: &OrderRequest, result: &Result<Order, LedgerError>) {
    match result {
        Ok(order) => {
            metrics::record_order_placed(order.side.as_str(), order.order_type.as_str());
            info!(
                order_id = %order.id,
                symbol = %order.symbol,
                side = order.side.as_str(),
                qty = %order.quantity,
                status = %order.status,
                price = ?order.filled_avg_price,
                "order accepted"
            );
        }
        Err(e) => {
            metrics::record_order_rejected(e.reason());
            warn!(
                symbol = %request.symbol,
                side = request.side.as_str(),
                reason = e.reason(),
                error = %e,
                "order rejected"
            );
        }
    }
}
