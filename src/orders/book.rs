//! Conditional order book.
//!
//! Every order carries its own atomic state word. Triggering and
//! cancelling are compare-and-set transitions on that word, so two
//! unrelated orders never contend and a cancel racing a trigger has
//! exactly one winner:
//!
//! ```text
//! ACTIVE ──trigger──▶ PENDING_FILL ──commit──▶ FILLED
//!   │
//!   └────cancel────▶ CANCELLED
//! ```

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use dashmap::DashMap;
use rust_decimal::Decimal;
use time::OffsetDateTime;
use tracing::{debug, info, instrument, warn};

use super::pricing::{realizable_price, swap_quote};
use super::types::{NewOrder, OrderFilter, OrderSort, OrderStatus, SwapQuote, TradeOrder};
use crate::config::Config;
use crate::error::OrderError;
use crate::feed::QuoteSnapshot;
use crate::metrics;
use crate::token::{Token, TokenRegistry};

const ACTIVE: u8 = 0;
const PENDING_FILL: u8 = 1;
const FILLED: u8 = 2;
const CANCELLED: u8 = 3;

/// Accepted slippage range and the default applied to new orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlippagePolicy {
    /// Applied when an order omits slippage.
    pub default_pct: Decimal,
    /// Lowest accepted value.
    pub min_pct: Decimal,
    /// Highest accepted value.
    pub max_pct: Decimal,
}

impl SlippagePolicy {
    /// Build the policy from config.
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_pct: config.default_slippage_pct,
            min_pct: config.min_slippage_pct,
            max_pct: config.max_slippage_pct,
        }
    }

    fn resolve(&self, requested: Option<Decimal>) -> Result<Decimal, OrderError> {
        let pct = requested.unwrap_or(self.default_pct);
        if pct < self.min_pct || pct > self.max_pct {
            return Err(OrderError::InvalidParams(format!(
                "slippage {}% outside [{}%, {}%]",
                pct, self.min_pct, self.max_pct
            )));
        }
        Ok(pct)
    }
}

impl Default for SlippagePolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// An order that fired during evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggeredOrder {
    /// The order, already `Filled`.
    pub order: TradeOrder,
    /// Swap quote at the fill price.
    pub quote: SwapQuote,
}

impl TriggeredOrder {
    /// Id of the triggered order.
    pub fn order_id(&self) -> &str {
        &self.order.order_id
    }
}

#[derive(Debug)]
struct OrderEntry {
    seq: u64,
    state: AtomicU8,
    record: Mutex<TradeOrder>,
}

impl OrderEntry {
    fn record(&self) -> MutexGuard<'_, TradeOrder> {
        self.record.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn snapshot(&self) -> TradeOrder {
        self.record().clone()
    }
}

/// Store of user limit and stop-loss orders.
#[derive(Debug)]
pub struct OrderBook {
    orders: DashMap<String, Arc<OrderEntry>>,
    tokens: Arc<TokenRegistry>,
    slippage: SlippagePolicy,
    next_seq: AtomicU64,
}

impl OrderBook {
    /// Create an empty book resolving tokens against `tokens`.
    pub fn new(tokens: Arc<TokenRegistry>, slippage: SlippagePolicy) -> Self {
        Self {
            orders: DashMap::new(),
            tokens,
            slippage,
            next_seq: AtomicU64::new(1),
        }
    }

    /// Validate and store a new active order.
    #[instrument(skip(self, new), fields(order_type = %new.order_type))]
    pub fn submit(&self, new: NewOrder) -> Result<TradeOrder, OrderError> {
        if new.amount <= Decimal::ZERO {
            return Err(OrderError::InvalidParams("amount must be positive".to_string()));
        }
        if new.trigger_price <= Decimal::ZERO {
            return Err(OrderError::InvalidParams("trigger price must be positive".to_string()));
        }
        if new.amount.checked_mul(new.trigger_price).is_none() {
            return Err(OrderError::InvalidParams(
                "amount at trigger price is too large".to_string(),
            ));
        }

        let from = self.resolve_token(&new.from_token)?;
        let to = self.resolve_token(&new.to_token)?;
        if from.address == to.address {
            return Err(OrderError::InvalidParams(
                "from and to tokens must differ".to_string(),
            ));
        }
        let slippage_pct = self.slippage.resolve(new.slippage_pct)?;

        let now = OffsetDateTime::now_utc();
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let order_id = format!("ord-{:x}-{}", now.unix_timestamp(), seq);

        let order = TradeOrder {
            order_id: order_id.clone(),
            user_id: new.user_id,
            from_token: from.address.clone(),
            to_token: to.address.clone(),
            amount: new.amount,
            order_type: new.order_type,
            trigger_price: new.trigger_price,
            slippage_pct,
            status: OrderStatus::Active,
            fill_price: None,
            created_at: now,
            updated_at: now,
        };

        self.orders.insert(
            order_id.clone(),
            Arc::new(OrderEntry {
                seq,
                state: AtomicU8::new(ACTIVE),
                record: Mutex::new(order.clone()),
            }),
        );

        metrics::inc_orders_submitted();
        metrics::set_orders_active(self.active_count());
        info!(
            order_id = %order_id,
            from = %from.symbol,
            to = %to.symbol,
            amount = %order.amount,
            trigger = %order.trigger_price,
            "Order submitted"
        );

        Ok(order)
    }

    /// Cancel an active order.
    ///
    /// Fails with `NotFound` for unknown ids, `AlreadyTerminal` for filled
    /// or cancelled orders and `Conflict` if a trigger is committing.
    /// A failed cancel never changes the order.
    #[instrument(skip(self))]
    pub fn cancel(&self, order_id: &str) -> Result<TradeOrder, OrderError> {
        let entry = self.entry(order_id)?;
        // Readers go through the record lock, so they never see the
        // state word and the record disagree.
        let mut record = entry.record();

        match entry
            .state
            .compare_exchange(ACTIVE, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                record.status = OrderStatus::Cancelled;
                record.updated_at = OffsetDateTime::now_utc();
                let cancelled = record.clone();
                drop(record);

                metrics::inc_orders_cancelled();
                metrics::set_orders_active(self.active_count());
                info!(order_id = %order_id, "Order cancelled");
                Ok(cancelled)
            }
            Err(PENDING_FILL) => Err(OrderError::Conflict {
                order_id: order_id.to_string(),
                winner: "filled",
            }),
            Err(FILLED) => Err(OrderError::AlreadyTerminal {
                order_id: order_id.to_string(),
                status: OrderStatus::Filled,
            }),
            Err(_) => Err(OrderError::AlreadyTerminal {
                order_id: order_id.to_string(),
                status: OrderStatus::Cancelled,
            }),
        }
    }

    /// Evaluate every active order against one quote snapshot.
    ///
    /// Orders whose realizable price crosses their trigger move to
    /// `Filled` exactly once; repeating the call with the same snapshot
    /// triggers nothing new. Results are in submission order.
    #[instrument(skip_all, fields(orders = self.orders.len()))]
    pub fn evaluate(&self, snapshot: &QuoteSnapshot) -> Vec<TriggeredOrder> {
        let mut candidates: Vec<Arc<OrderEntry>> = self
            .orders
            .iter()
            .filter(|e| e.value().state.load(Ordering::Acquire) == ACTIVE)
            .map(|e| Arc::clone(e.value()))
            .collect();
        candidates.sort_by_key(|e| e.seq);

        let mut triggered = Vec::new();
        for entry in candidates {
            match self.try_fill(&entry, snapshot) {
                Ok(Some(fired)) => triggered.push(fired),
                Ok(None) => {}
                Err(err) => debug!(error = %err, "Order skipped during evaluation"),
            }
        }

        if !triggered.is_empty() {
            metrics::set_orders_active(self.active_count());
            info!(count = triggered.len(), "Orders triggered");
        }
        triggered
    }

    /// Evaluate a single order against a snapshot.
    ///
    /// Returns `Ok(None)` when the order is active but not triggered (or
    /// its tokens are unpriced), and `Conflict` if a cancellation won.
    pub fn evaluate_order(
        &self,
        order_id: &str,
        snapshot: &QuoteSnapshot,
    ) -> Result<Option<TriggeredOrder>, OrderError> {
        let entry = self.entry(order_id)?;
        self.try_fill(&entry, snapshot)
    }

    fn try_fill(
        &self,
        entry: &OrderEntry,
        snapshot: &QuoteSnapshot,
    ) -> Result<Option<TriggeredOrder>, OrderError> {
        let order = entry.snapshot();
        let Some(price) = realizable_price(snapshot, &order.from_token, &order.to_token) else {
            return Ok(None);
        };
        if !order.order_type.is_triggered(price, order.trigger_price) {
            return Ok(None);
        }
        let Some(quote) = swap_quote(&order, price) else {
            warn!(
                order_id = %order.order_id,
                amount = %order.amount,
                price = %price,
                "Swap output not representable, order left active"
            );
            return Ok(None);
        };

        match entry
            .state
            .compare_exchange(ACTIVE, PENDING_FILL, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                let filled = {
                    let mut record = entry.record();
                    record.status = OrderStatus::Filled;
                    record.fill_price = Some(price);
                    record.updated_at = OffsetDateTime::now_utc();
                    record.clone()
                };
                entry.state.store(FILLED, Ordering::Release);

                metrics::inc_orders_triggered(filled.order_type.as_label());
                info!(
                    order_id = %filled.order_id,
                    order_type = %filled.order_type,
                    price = %price,
                    trigger = %filled.trigger_price,
                    "Order triggered"
                );

                Ok(Some(TriggeredOrder { order: filled, quote }))
            }
            Err(CANCELLED) => Err(OrderError::Conflict {
                order_id: order.order_id,
                winner: "cancelled",
            }),
            Err(_) => Err(OrderError::AlreadyTerminal {
                order_id: order.order_id,
                status: OrderStatus::Filled,
            }),
        }
    }

    /// Look up one order.
    pub fn get(&self, order_id: &str) -> Option<TradeOrder> {
        self.orders.get(order_id).map(|e| e.value().snapshot())
    }

    /// List orders matching `filter`, ordered by `sort`.
    pub fn list(&self, filter: OrderFilter, sort: OrderSort) -> Vec<TradeOrder> {
        let mut orders: Vec<(u64, TradeOrder)> = self
            .orders
            .iter()
            .map(|e| (e.value().seq, e.value().snapshot()))
            .filter(|(_, o)| filter.matches(o.status))
            .collect();

        orders.sort_by(|(seq_a, a), (seq_b, b)| {
            let newest_first = b.created_at.cmp(&a.created_at).then(seq_b.cmp(seq_a));
            match sort {
                OrderSort::Date => newest_first,
                OrderSort::Amount => b.amount.cmp(&a.amount).then(newest_first),
                OrderSort::Status => a.status.cmp(&b.status).then(newest_first),
            }
        });

        orders.into_iter().map(|(_, o)| o).collect()
    }

    /// Number of active orders.
    pub fn active_count(&self) -> usize {
        self.orders
            .iter()
            .filter(|e| e.value().state.load(Ordering::Acquire) == ACTIVE)
            .count()
    }

    /// Total number of orders.
    pub fn len(&self) -> usize {
        self.orders.len()
    }

    /// Whether the book holds no orders.
    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    fn entry(&self, order_id: &str) -> Result<Arc<OrderEntry>, OrderError> {
        self.orders
            .get(order_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| OrderError::NotFound {
                order_id: order_id.to_string(),
            })
    }

    fn resolve_token(&self, key: &str) -> Result<Token, OrderError> {
        self.tokens
            .get(key)
            .or_else(|| self.tokens.by_symbol(key))
            .ok_or_else(|| OrderError::UnknownToken(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::ExchangeQuote;
    use crate::orders::OrderType;
    use pretty_assertions::assert_eq;
    use rust_decimal_macros::dec;

    fn book() -> OrderBook {
        OrderBook::new(Arc::new(TokenRegistry::with_defaults()), SlippagePolicy::default())
    }

    /// Snapshot where DAI->WETH realizes `1 / weth_ask`.
    fn prices(weth_ask: Decimal) -> QuoteSnapshot {
        let registry = TokenRegistry::with_defaults();
        let now = OffsetDateTime::now_utc();
        let dai = registry.by_symbol("DAI").unwrap().address;
        let weth = registry.by_symbol("WETH").unwrap().address;
        QuoteSnapshot::from_quotes(vec![
            ExchangeQuote::new("uniswap-v3", dai, dec!(1), dec!(1.001), now),
            ExchangeQuote::new("uniswap-v3", weth, weth_ask - dec!(1), weth_ask, now),
        ])
    }

    #[test]
    fn submit_resolves_symbols_and_defaults_slippage() {
        let book = book();
        let order = book
            .submit(NewOrder::stop_loss("DAI", "WETH", dec!(1000), dec!(0.0004)))
            .unwrap();

        assert_eq!(order.status, OrderStatus::Active);
        assert_eq!(order.from_token, "0x50c5725949a6f0c72e6c4a641f24049a917db0cb");
        assert_eq!(order.slippage_pct, dec!(0.5));
        assert_eq!(book.get(&order.order_id), Some(order));
    }

    #[test]
    fn submit_rejects_bad_params() {
        let book = book();
        assert!(matches!(
            book.submit(NewOrder::limit("DAI", "WETH", dec!(0), dec!(1))),
            Err(OrderError::InvalidParams(_))
        ));
        assert!(matches!(
            book.submit(NewOrder::limit("DAI", "DAI", dec!(1), dec!(1))),
            Err(OrderError::InvalidParams(_))
        ));
        assert!(matches!(
            book.submit(NewOrder::limit("DAI", "PEPE", dec!(1), dec!(1))),
            Err(OrderError::UnknownToken(_))
        ));
        assert!(matches!(
            book.submit(NewOrder::limit("DAI", "WETH", dec!(1), dec!(1)).with_slippage(dec!(9))),
            Err(OrderError::InvalidParams(_))
        ));
        assert!(book.is_empty());
    }

    #[test]
    fn stop_loss_fires_only_at_or_below_trigger() {
        let book = book();
        let order = book
            .submit(NewOrder::stop_loss("DAI", "WETH", dec!(1000), dec!(0.0004)))
            .unwrap();

        // 1 / 2480 ≈ 0.000403 > 0.0004
        assert!(book.evaluate(&prices(dec!(2480))).is_empty());
        assert_eq!(book.get(&order.order_id).unwrap().status, OrderStatus::Active);

        // 1 / 2500 = 0.0004
        let fired = book.evaluate(&prices(dec!(2500)));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].order_id(), order.order_id);
        assert_eq!(fired[0].order.fill_price, Some(dec!(0.0004)));
        assert_eq!(book.get(&order.order_id).unwrap().status, OrderStatus::Filled);
    }

    #[test]
    fn limit_fires_at_or_above_trigger() {
        let book = book();
        let order = book
            .submit(NewOrder::limit("DAI", "WETH", dec!(1000), dec!(0.0005)))
            .unwrap();

        assert!(book.evaluate(&prices(dec!(2500))).is_empty());
        let fired = book.evaluate(&prices(dec!(2000)));
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].order.order_type, OrderType::Limit);
        assert_eq!(fired[0].order_id(), order.order_id);
    }

    #[test]
    fn repeated_evaluation_never_double_triggers() {
        let book = book();
        book.submit(NewOrder::stop_loss("DAI", "WETH", dec!(1000), dec!(0.0004)))
            .unwrap();
        let snapshot = prices(dec!(2600));

        assert_eq!(book.evaluate(&snapshot).len(), 1);
        assert!(book.evaluate(&snapshot).is_empty());
        assert!(book.evaluate(&snapshot).is_empty());
    }

    #[test]
    fn cancel_terminal_order_fails_without_mutation() {
        let book = book();
        let order = book
            .submit(NewOrder::stop_loss("DAI", "WETH", dec!(1000), dec!(0.0004)))
            .unwrap();
        book.evaluate(&prices(dec!(2600)));
        let filled = book.get(&order.order_id).unwrap();

        let err = book.cancel(&order.order_id).unwrap_err();
        assert_eq!(
            err,
            OrderError::AlreadyTerminal {
                order_id: order.order_id.clone(),
                status: OrderStatus::Filled,
            }
        );
        assert_eq!(book.get(&order.order_id).unwrap(), filled);

        let other = book
            .submit(NewOrder::limit("DAI", "WETH", dec!(5), dec!(1)))
            .unwrap();
        book.cancel(&other.order_id).unwrap();
        let cancelled = book.get(&other.order_id).unwrap();
        assert!(matches!(
            book.cancel(&other.order_id),
            Err(OrderError::AlreadyTerminal { status: OrderStatus::Cancelled, .. })
        ));
        assert_eq!(book.get(&other.order_id).unwrap(), cancelled);
    }

    #[test]
    fn cancel_unknown_order() {
        assert_eq!(
            book().cancel("ord-missing"),
            Err(OrderError::NotFound {
                order_id: "ord-missing".to_string()
            })
        );
    }

    #[test]
    fn trigger_after_cancel_is_a_conflict() {
        let book = book();
        let order = book
            .submit(NewOrder::stop_loss("DAI", "WETH", dec!(1000), dec!(0.0004)))
            .unwrap();
        book.cancel(&order.order_id).unwrap();

        let err = book.evaluate_order(&order.order_id, &prices(dec!(2600))).unwrap_err();
        assert!(matches!(err, OrderError::Conflict { winner: "cancelled", .. }));
        assert!(book.evaluate(&prices(dec!(2600))).is_empty());
    }

    #[test]
    fn cancel_racing_trigger_has_exactly_one_winner() {
        for _ in 0..50 {
            let book = Arc::new(book());
            let order = book
                .submit(NewOrder::stop_loss("DAI", "WETH", dec!(1000), dec!(0.0004)))
                .unwrap();
            let snapshot = prices(dec!(2600));

            let evaluator = {
                let book = Arc::clone(&book);
                std::thread::spawn(move || book.evaluate(&snapshot).len())
            };
            let canceller = {
                let book = Arc::clone(&book);
                let id = order.order_id.clone();
                std::thread::spawn(move || book.cancel(&id).is_ok())
            };

            let fired = evaluator.join().unwrap();
            let cancelled = canceller.join().unwrap();
            assert!(fired == 1 || cancelled);
            assert!(!(fired == 1 && cancelled));

            let status = book.get(&order.order_id).unwrap().status;
            if cancelled {
                assert_eq!(status, OrderStatus::Cancelled);
            } else {
                assert_eq!(status, OrderStatus::Filled);
            }
        }
    }

    #[test]
    fn list_filters_and_sorts() {
        let book = book();
        let small = book.submit(NewOrder::limit("DAI", "WETH", dec!(10), dec!(1))).unwrap();
        let big = book.submit(NewOrder::limit("USDC", "WETH", dec!(500), dec!(1))).unwrap();
        let mid = book.submit(NewOrder::limit("DAI", "USDC", dec!(100), dec!(5))).unwrap();
        book.cancel(&small.order_id).unwrap();

        let ids = |orders: Vec<TradeOrder>| orders.into_iter().map(|o| o.order_id).collect::<Vec<_>>();

        assert_eq!(
            ids(book.list(OrderFilter::All, OrderSort::Date)),
            vec![mid.order_id.clone(), big.order_id.clone(), small.order_id.clone()]
        );
        assert_eq!(
            ids(book.list(OrderFilter::All, OrderSort::Amount)),
            vec![big.order_id.clone(), mid.order_id.clone(), small.order_id.clone()]
        );
        assert_eq!(
            ids(book.list(OrderFilter::All, OrderSort::Status)),
            vec![mid.order_id.clone(), big.order_id.clone(), small.order_id.clone()]
        );
        assert_eq!(
            ids(book.list(OrderFilter::Cancelled, OrderSort::Date)),
            vec![small.order_id]
        );
        assert_eq!(book.active_count(), 2);
    }

    #[test]
    fn cancelled_state_is_never_reported_active() {
        for _ in 0..50 {
            let book = Arc::new(book());
            let order = book
                .submit(NewOrder::limit("DAI", "WETH", dec!(10), dec!(1)))
                .unwrap();

            let reader = {
                let book = Arc::clone(&book);
                let id = order.order_id.clone();
                std::thread::spawn(move || loop {
                    if book.active_count() == 0 {
                        return book.get(&id).unwrap().status;
                    }
                    std::thread::yield_now();
                })
            };
            book.cancel(&order.order_id).unwrap();

            assert_eq!(reader.join().unwrap(), OrderStatus::Cancelled);
        }
    }

    #[test]
    fn oversized_amounts_are_rejected_at_submit() {
        let book = book();
        let huge = Decimal::from_i128_with_scale(100_000_000_000_000_000_000_000_000, 0);

        let err = book
            .submit(NewOrder::limit("WETH", "DAI", huge, dec!(1000)))
            .unwrap_err();
        assert!(matches!(err, OrderError::InvalidParams(_)));
        assert!(book.is_empty());
    }

    #[test]
    fn unrepresentable_fill_leaves_order_active() {
        let book = book();
        let huge = Decimal::from_i128_with_scale(100_000_000_000_000_000_000_000_000, 0);
        // Accepted at its trigger, but ~2600 DAI per WETH overflows the output.
        let order = book.submit(NewOrder::limit("WETH", "DAI", huge, dec!(1))).unwrap();

        assert!(book.evaluate(&prices(dec!(2600))).is_empty());
        assert_eq!(book.get(&order.order_id).unwrap().status, OrderStatus::Active);
        assert_eq!(book.active_count(), 1);
    }
}
