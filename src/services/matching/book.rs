//! Single-owner price-time-priority order book.
//!
//! No internal locking: a book is owned exclusively by the one matching
//! worker responsible for its symbol, so all mutation happens on that
//! worker's thread. This is what "lock-free" means at this layer — the
//! absence of any lock, not an atomics-based concurrent structure.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, VecDeque};
use uuid::Uuid;

use crate::models::order::OrderSide;

use super::types::{Fill, OrderEntry, OrderbookSnapshot, PriceLevel};

pub struct Orderbook {
    symbol: String,
    bids: BTreeMap<PriceLevel, VecDeque<OrderEntry>>,
    asks: BTreeMap<PriceLevel, VecDeque<OrderEntry>>,
    order_index: HashMap<Uuid, (OrderSide, PriceLevel)>,
    last_trade_price: Option<Decimal>,
}

impl Orderbook {
    pub fn new(symbol: String) -> Self {
        Self { symbol, bids: BTreeMap::new(), asks: BTreeMap::new(), order_index: HashMap::new(), last_trade_price: None }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.keys().next_back().map(|p| p.to_decimal())
    }

    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.keys().next().map(|p| p.to_decimal())
    }

    pub fn order_count(&self) -> usize {
        self.order_index.len()
    }

    pub fn has_order(&self, order_id: Uuid) -> bool {
        self.order_index.contains_key(&order_id)
    }

    fn enqueue(&mut self, entry: OrderEntry) {
        let level = PriceLevel::from_decimal(entry.price);
        let side = entry.side;
        let id = entry.id;
        let book = match side {
            OrderSide::Buy => &mut self.bids,
            OrderSide::Sell => &mut self.asks,
        };
        book.entry(level).or_default().push_back(entry);
        self.order_index.insert(id, (side, level));
    }

    /// O(1) removal by id, best-effort (the order may already be fully
    /// filled and thus absent).
    pub fn cancel(&mut self, order_id: Uuid) -> Option<OrderEntry> {
        let (side, level) = self.order_index.remove(&order_id)?;
        let book = match side {
            OrderSide::Buy => &mut self.bids,
            OrderSide::Sell => &mut self.asks,
        };
        let queue = book.get_mut(&level)?;
        let pos = queue.iter().position(|o| o.id == order_id)?;
        let entry = queue.remove(pos);
        if queue.is_empty() {
            book.remove(&level);
        }
        entry
    }

    /// Match a LIMIT order: consume the opposite side while it crosses the
    /// incoming price, then enqueue whatever remains at the incoming price.
    pub fn match_limit(&mut self, mut incoming: OrderEntry) -> Vec<Fill> {
        let limit_price = incoming.price;
        let fills = self.match_against_opposite(&mut incoming, Some(limit_price));
        if incoming.remaining_quantity > Decimal::ZERO {
            self.enqueue(incoming);
        }
        fills
    }

    /// Match a MARKET order: consume the opposite side until exhausted or
    /// remaining is zero. Never enqueues a residual — if the opposite side
    /// is empty at entry, no fills are produced.
    pub fn match_market(&mut self, mut incoming: OrderEntry) -> Vec<Fill> {
        self.match_against_opposite(&mut incoming, None)
    }

    fn match_against_opposite(&mut self, incoming: &mut OrderEntry, limit_price: Option<Decimal>) -> Vec<Fill> {
        let mut fills = Vec::new();
        let opposite = match incoming.side {
            OrderSide::Buy => &mut self.asks,
            OrderSide::Sell => &mut self.bids,
        };

        let levels: Vec<PriceLevel> = match incoming.side {
            OrderSide::Buy => opposite.keys().copied().collect(),
            OrderSide::Sell => opposite.keys().rev().copied().collect(),
        };

        for level in levels {
            if incoming.remaining_quantity <= Decimal::ZERO {
                break;
            }
            let level_price = level.to_decimal();
            if let Some(limit) = limit_price {
                let crosses = match incoming.side {
                    OrderSide::Buy => level_price <= limit,
                    OrderSide::Sell => level_price >= limit,
                };
                if !crosses {
                    break;
                }
            }

            let queue = match opposite.get_mut(&level) {
                Some(q) => q,
                None => continue,
            };

            while let Some(maker) = queue.front_mut() {
                if incoming.remaining_quantity <= Decimal::ZERO {
                    break;
                }
                let fill_qty = incoming.remaining_quantity.min(maker.remaining_quantity);
                let fill_price = maker.price;

                let (maker_order_id, maker_user_id, taker_order_id, taker_user_id) = match incoming.side {
                    OrderSide::Buy => (maker.id, maker.user_id, incoming.id, incoming.user_id),
                    OrderSide::Sell => (maker.id, maker.user_id, incoming.id, incoming.user_id),
                };

                fills.push(Fill {
                    maker_order_id,
                    maker_user_id,
                    taker_order_id,
                    taker_user_id,
                    symbol: incoming.symbol.clone(),
                    price: fill_price,
                    quantity: fill_qty,
                });

                incoming.remaining_quantity -= fill_qty;
                maker.remaining_quantity -= fill_qty;
                self.last_trade_price = Some(fill_price);

                if maker.remaining_quantity <= Decimal::ZERO {
                    let maker_id = maker.id;
                    queue.pop_front();
                    self.order_index.remove(&maker_id);
                } else {
                    break;
                }
            }

            if queue.is_empty() {
                opposite.remove(&level);
            }
        }

        fills
    }

    pub fn snapshot(&self, depth: usize) -> OrderbookSnapshot {
        let bids = self.bids.iter().rev().take(depth).map(|(level, q)| (level.to_decimal(), q.iter().map(|o| o.remaining_quantity).sum())).collect();
        let asks = self.asks.iter().take(depth).map(|(level, q)| (level.to_decimal(), q.iter().map(|o| o.remaining_quantity).sum())).collect();
        OrderbookSnapshot { symbol: self.symbol.clone(), bids, asks, last_trade_price: self.last_trade_price }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn entry(id: Uuid, user_id: Uuid, side: OrderSide, price: Decimal, qty: Decimal) -> OrderEntry {
        OrderEntry {
            id,
            user_id,
            symbol: "AAPL".into(),
            side,
            order_type: crate::models::order::OrderType::Limit,
            price,
            original_quantity: qty,
            remaining_quantity: qty,
            trace_id: "t".into(),
            submitted_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn limit_order_matches_price_time_priority() {
        let mut book = Orderbook::new("AAPL".into());
        let ask1 = Uuid::new_v4();
        let ask2 = Uuid::new_v4();
        book.cancel(Uuid::new_v4()); // no-op, exercises empty-book path
        book.match_limit(entry(ask1, Uuid::new_v4(), OrderSide::Sell, dec!(100), dec!(5)));
        book.match_limit(entry(ask2, Uuid::new_v4(), OrderSide::Sell, dec!(101), dec!(5)));

        let fills = book.match_limit(entry(Uuid::new_v4(), Uuid::new_v4(), OrderSide::Buy, dec!(101), dec!(7)));
        assert_eq!(fills.len(), 2);
        assert_eq!(fills[0].price, dec!(100));
        assert_eq!(fills[0].quantity, dec!(5));
        assert_eq!(fills[1].price, dec!(101));
        assert_eq!(fills[1].quantity, dec!(2));
        assert!(!book.has_order(ask1));
        assert!(book.has_order(ask2));
    }

    #[test]
    fn limit_order_residual_rests_on_book() {
        let mut book = Orderbook::new("AAPL".into());
        let fills = book.match_limit(entry(Uuid::new_v4(), Uuid::new_v4(), OrderSide::Buy, dec!(100), dec!(10)));
        assert!(fills.is_empty());
        assert_eq!(book.best_bid(), Some(dec!(100)));
        assert_eq!(book.order_count(), 1);
    }

    #[test]
    fn market_order_never_rests_and_can_produce_zero_fills() {
        let mut book = Orderbook::new("AAPL".into());
        let fills = book.match_market(entry(Uuid::new_v4(), Uuid::new_v4(), OrderSide::Buy, dec!(0), dec!(10)));
        assert!(fills.is_empty());
        assert_eq!(book.order_count(), 0);
    }

    #[test]
    fn cancel_removes_resting_order() {
        let mut book = Orderbook::new("AAPL".into());
        let id = Uuid::new_v4();
        book.match_limit(entry(id, Uuid::new_v4(), OrderSide::Sell, dec!(100), dec!(5)));
        assert!(book.cancel(id).is_some());
        assert!(!book.has_order(id));
        assert!(book.cancel(id).is_none());
    }
}
