//! Order Store
//!
//! Append-only record of every accepted order, keyed by a monotonically
//! assigned id. Orders are never removed except by `clear`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use super::error::LedgerError;
use super::order::{Order, OrderId, OrderQuery};

/// In-memory order record owned by the ledger.
#[derive(Debug, Clone)]
pub struct OrderStore {
    orders: BTreeMap<OrderId, Order>,
    next_id: u64,
}

impl Default for OrderStore {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderStore {
    /// Create an empty store. The first id handed out is `order-1`.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            orders: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Id the next accepted order will receive.
    #[must_use]
    pub const fn peek_id(&self) -> OrderId {
        OrderId::new(self.next_id)
    }

    /// Consume the next id.
    pub fn allocate_id(&mut self) -> OrderId {
        let id = OrderId::new(self.next_id);
        self.next_id += 1;
        id
    }

    /// Record an order.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOrder` if the id is already taken.
    pub fn insert(&mut self, order: Order) -> Result<(), LedgerError> {
        if self.orders.contains_key(&order.id) {
            return Err(LedgerError::invalid(format!("duplicate order id {}", order.id)));
        }
        self.orders.insert(order.id, order);
        Ok(())
    }

    /// Get an order by id.
    #[must_use]
    pub fn get(&self, id: OrderId) -> Option<&Order> {
        self.orders.get(&id)
    }

    /// Cancel an open order.
    ///
    /// # Errors
    ///
    /// `OrderNotFound` for an unknown id, `OrderNotCancelable` if the order
    /// is not open.
    pub fn cancel(&mut self, id: OrderId, at: DateTime<Utc>) -> Result<Order, LedgerError> {
        let order = self
            .orders
            .get_mut(&id)
            .ok_or(LedgerError::OrderNotFound(id))?;
        order.cancel(at)?;
        Ok(order.clone())
    }

    /// Orders matching the query, ascending by id.
    #[must_use]
    pub fn list(&self, query: &OrderQuery) -> Vec<Order> {
        let lower = query
            .after
            .map_or(std::ops::Bound::Unbounded, std::ops::Bound::Excluded);

        self.orders
            .range((lower, std::ops::Bound::Unbounded))
            .map(|(_, order)| order)
            .filter(|order| query.status.matches(order.status))
            .take(query.limit)
            .cloned()
            .collect()
    }

    /// Number of stored orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// Check if no orders are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Drop every order and restart ids at 1.
    pub fn clear(&mut self) {
        self.orders.clear();
        self.next_id = 1;
    }
}
