//! Conditional (limit / stop-loss) orders.
//!
//! - [`types`]: order, status and listing types
//! - [`pricing`]: realizable price and swap quote
//! - [`book`]: the order book and its per-order state machine

pub mod book;
pub mod pricing;
pub mod types;

pub use book::{OrderBook, SlippagePolicy, TriggeredOrder};
pub use pricing::{realizable_price, swap_quote};
pub use types::{NewOrder, OrderFilter, OrderSort, OrderStatus, OrderType, SwapQuote, TradeOrder};
