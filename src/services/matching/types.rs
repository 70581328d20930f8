//! Shared types for the matching engine: price levels (scaled integers for
//! exact `BTreeMap` ordering), resting order entries, and match results.

use rust_decimal::Decimal;
use std::cmp::Ordering;
use uuid::Uuid;

use crate::models::order::{OrderSide, OrderType};

/// A price scaled to an integer so book keys compare exactly, avoiding
/// `Decimal`'s varying representations of the same value as `BTreeMap` keys.
/// Scale matches the orders table's price column (2 decimal places).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PriceLevel(i64);

const PRICE_SCALE: i64 = 100;

impl PriceLevel {
    pub fn from_decimal(price: Decimal) -> Self {
        let scaled = (price * Decimal::from(PRICE_SCALE)).trunc();
        let value = scaled.mantissa() / 10i128.pow(scaled.scale());
        PriceLevel(value as i64)
    }

    pub fn to_decimal(self) -> Decimal {
        Decimal::from(self.0) / Decimal::from(PRICE_SCALE)
    }
}

impl Ord for PriceLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for PriceLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A resting order in the book. Distinct from `crate::models::order::Order`:
/// this is the book's working copy, holding only what matching needs.
#[derive(Debug, Clone)]
pub struct OrderEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub price: Decimal,
    pub original_quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub trace_id: String,
    pub submitted_at: chrono::DateTime<chrono::Utc>,
}

impl OrderEntry {
    pub fn from_order(order: &crate::models::order::Order) -> Self {
        Self {
            id: order.id,
            user_id: order.user_id,
            symbol: order.symbol.clone(),
            side: order.side,
            order_type: order.order_type,
            price: order.price.unwrap_or(Decimal::ZERO),
            original_quantity: order.quantity,
            remaining_quantity: order.remaining_quantity(),
            trace_id: order.trace_id.clone(),
            submitted_at: chrono::Utc::now(),
        }
    }
}

/// One fill produced while matching. `engine.rs` turns these into `Trade`
/// values and `TradeExecutedEvent`s.
#[derive(Debug, Clone)]
pub struct Fill {
    pub maker_order_id: Uuid,
    pub maker_user_id: Uuid,
    pub taker_order_id: Uuid,
    pub taker_user_id: Uuid,
    pub symbol: String,
    pub price: Decimal,
    pub quantity: Decimal,
}

/// A snapshot of a book's top levels, used by `metrics()`/diagnostics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OrderbookSnapshot {
    pub symbol: String,
    pub bids: Vec<(Decimal, Decimal)>,
    pub asks: Vec<(Decimal, Decimal)>,
    pub last_trade_price: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn price_level_round_trips() {
        let level = PriceLevel::from_decimal(dec!(150.25));
        assert_eq!(level.to_decimal(), dec!(150.25));
    }

    #[test]
    fn price_level_orders_like_decimal() {
        let low = PriceLevel::from_decimal(dec!(99.99));
        let high = PriceLevel::from_decimal(dec!(100.00));
        assert!(low < high);
    }
}
