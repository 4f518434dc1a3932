//! Order ledger domain: the Order aggregate and its status lifecycle.
//!
//! Deterministic domain logic only (no IO, no HTTP, no storage). Orders are
//! created exclusively from a successful catalog validation and move only
//! through the transitions in [`OrderStatus`].

pub mod number;
pub mod order;
pub mod status;

pub use number::generate_order_number;
pub use order::{NewOrder, Order, OrderItem, OrderPlaced, OrderStatusChanged, PlaceOrder};
pub use status::OrderStatus;
