//! Simulated Execution Ledger
//!
//! Account state, order lifecycle, and the append-only order record. Pure
//! domain logic; price lookup and locking live in the application service.

mod account;
mod error;
mod order;
mod store;

pub use account::{Account, AccountSnapshot, Position, PositionSnapshot};
pub use error::LedgerError;
pub use order::{
    Order, OrderId, OrderQuery, OrderRequest, OrderSide, OrderSize, OrderStatus, OrderType,
    StatusFilter, TimeInForce,
};
pub use store::OrderStore;
