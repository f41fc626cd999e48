//! Realizable prices and swap quotes for conditional orders.

use rust_decimal::Decimal;

use super::types::{SwapQuote, TradeOrder};
use crate::feed::QuoteSnapshot;

/// Price of `to` per unit of `from` that could be realized right now.
///
/// Selling `from` at its best bid and buying `to` at its best ask, both
/// in USD and taken across all exchanges in the snapshot.
pub fn realizable_price(snapshot: &QuoteSnapshot, from: &str, to: &str) -> Option<Decimal> {
    let from_bid = snapshot.best_bid(from)?;
    let to_ask = snapshot.best_ask(to)?;
    from_bid.checked_div(to_ask)
}

/// Build a swap quote for an order at a realizable price.
///
/// `None` when the output amount is not representable.
pub fn swap_quote(order: &TradeOrder, price: Decimal) -> Option<SwapQuote> {
    let to_amount = order.amount.checked_mul(price)?;
    let min_received =
        to_amount.checked_mul(Decimal::ONE - order.slippage_pct / Decimal::ONE_HUNDRED)?;

    Some(SwapQuote {
        order_id: order.order_id.clone(),
        from_token: order.from_token.clone(),
        to_token: order.to_token.clone(),
        from_amount: order.amount,
        to_amount,
        price,
        min_received,
        slippage_pct: order.slippage_pct,
        route: vec![order.from_token.clone(), order.to_token.clone()],
    })
}
