//! `Trade` — the result value produced by a match, carried unchanged
//! through `TradeExecutedEvent` and the account confirmation path.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Trade {
    pub id: Uuid,
    pub symbol: String,
    pub buy_order_id: Uuid,
    pub sell_order_id: Uuid,
    pub buy_user_id: Uuid,
    pub sell_user_id: Uuid,
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl Trade {
    #[allow(clippy::too_many_arguments)]
    pub fn new(symbol: String, buy_order_id: Uuid, sell_order_id: Uuid, buy_user_id: Uuid, sell_user_id: Uuid, price: Decimal, quantity: Decimal) -> Self {
        Self {
            id: Uuid::now_v7(),
            symbol,
            buy_order_id,
            sell_order_id,
            buy_user_id,
            sell_user_id,
            price,
            quantity,
            timestamp: Utc::now(),
        }
    }

    /// Notional value of the trade (price * quantity), the amount that
    /// moves from buyer reservation to seller cash.
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn notional_is_price_times_quantity() {
        let trade = Trade::new("AAPL".into(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), dec!(150), dec!(10));
        assert_eq!(trade.notional(), dec!(1500));
    }
}
