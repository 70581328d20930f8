//! Order aggregate, owned exclusively by the Order Service.
//!
//! Invariants: `filled_quantity <= quantity`; LIMIT orders require a
//! positive `price`; MARKET orders forbid one; status only moves along
//! `PENDING -> CREATED -> (PARTIALLY_FILLED)* -> FILLED | CANCELLED | TIMEOUT`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_side", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_type", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "order_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Pending,
    Created,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Timeout,
    Completed,
}

impl OrderStatus {
    /// Whether `self -> next` is a legal transition under
    /// `PENDING -> CREATED -> (PARTIALLY_FILLED)* -> FILLED | CANCELLED | TIMEOUT`.
    ///
    /// `REJECTED` and `COMPLETED` are reachable from `CREATED`/`FILLED`
    /// respectively as terminal side-exits the happy-path diagram omits.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (self, next) {
            (Pending, Created) | (Pending, Rejected) => true,
            (Created, PartiallyFilled) | (Created, Filled) | (Created, Cancelled) | (Created, Timeout) => true,
            (PartiallyFilled, PartiallyFilled)
            | (PartiallyFilled, Filled)
            | (PartiallyFilled, Cancelled)
            | (PartiallyFilled, Timeout) => true,
            (Filled, Completed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected | OrderStatus::Timeout | OrderStatus::Completed
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub status: OrderStatus,
    pub filled_quantity: Decimal,
    pub cancellation_reason: Option<String>,
    pub trace_id: String,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reasons an order can be cancelled, kept as a closed set so compensation
/// handlers and the timeout loop write a consistent reason string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancellationReason {
    UserRequested,
    InsufficientBalance,
    InsufficientShares,
    AccountUpdateFailed,
    SagaTimeout,
}

impl fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CancellationReason::UserRequested => "USER_REQUESTED",
            CancellationReason::InsufficientBalance => "INSUFFICIENT_BALANCE",
            CancellationReason::InsufficientShares => "INSUFFICIENT_SHARES",
            CancellationReason::AccountUpdateFailed => "ACCOUNT_UPDATE_FAILED",
            CancellationReason::SagaTimeout => "SAGA_TIMEOUT",
        };
        write!(f, "{s}")
    }
}

impl Order {
    /// Construct a new order in `PENDING` status, validating the
    /// MARKET/LIMIT price invariant up front.
    pub fn new(
        user_id: Uuid,
        symbol: String,
        side: OrderSide,
        order_type: OrderType,
        quantity: Decimal,
        price: Option<Decimal>,
        trace_id: String,
    ) -> Result<Self, String> {
        if quantity <= Decimal::ZERO {
            return Err("quantity must be positive".to_string());
        }
        match order_type {
            OrderType::Limit => {
                let p = price.ok_or("LIMIT order requires a price")?;
                if p <= Decimal::ZERO {
                    return Err("LIMIT price must be positive".to_string());
                }
            }
            OrderType::Market => {
                if price.is_some() {
                    return Err("MARKET order must not specify a price".to_string());
                }
            }
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::now_v7(),
            user_id,
            symbol,
            side,
            order_type,
            quantity,
            price,
            status: OrderStatus::Pending,
            filled_quantity: Decimal::ZERO,
            cancellation_reason: None,
            trace_id,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity - self.filled_quantity
    }

    /// `PENDING -> CREATED`, once the order and its outbox row have committed.
    pub fn mark_created(&mut self) -> Result<(), String> {
        if !self.status.can_transition_to(OrderStatus::Created) {
            return Err(format!("cannot mark order in status {:?} as created", self.status));
        }
        self.status = OrderStatus::Created;
        self.version += 1;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Apply a fill, bumping `filled_quantity` and transitioning status.
    /// Errors if the fill would push `filled_quantity` above `quantity`.
    pub fn apply_fill(&mut self, fill_qty: Decimal) -> Result<(), String> {
        let new_filled = self.filled_quantity + fill_qty;
        if new_filled > self.quantity {
            return Err(format!(
                "fill of {fill_qty} would overfill order {} (quantity={}, already filled={})",
                self.id, self.quantity, self.filled_quantity
            ));
        }
        let next_status = if new_filled == self.quantity { OrderStatus::Filled } else { OrderStatus::PartiallyFilled };
        if !self.status.can_transition_to(next_status) && self.status != next_status {
            return Err(format!("illegal transition {:?} -> {:?}", self.status, next_status));
        }
        self.filled_quantity = new_filled;
        self.status = next_status;
        self.version += 1;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn cancel(&mut self, reason: CancellationReason) -> Result<(), String> {
        if !self.status.can_transition_to(OrderStatus::Cancelled) {
            return Err(format!("cannot cancel order in status {:?}", self.status));
        }
        self.status = OrderStatus::Cancelled;
        self.cancellation_reason = Some(reason.to_string());
        self.version += 1;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn timeout(&mut self) -> Result<(), String> {
        if !self.status.can_transition_to(OrderStatus::Timeout) {
            return Err(format!("cannot time out order in status {:?}", self.status));
        }
        self.status = OrderStatus::Timeout;
        self.cancellation_reason = Some(CancellationReason::SagaTimeout.to_string());
        self.version += 1;
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn complete(&mut self) -> Result<(), String> {
        if !self.status.can_transition_to(OrderStatus::Completed) {
            return Err(format!("cannot complete order in status {:?}", self.status));
        }
        self.status = OrderStatus::Completed;
        self.version += 1;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn limit_order() -> Order {
        Order::new(Uuid::new_v4(), "AAPL".into(), OrderSide::Buy, OrderType::Limit, dec!(10), Some(dec!(150)), "trace-1".into()).unwrap()
    }

    #[test]
    fn limit_requires_positive_price() {
        let err = Order::new(Uuid::new_v4(), "AAPL".into(), OrderSide::Buy, OrderType::Limit, dec!(10), None, "t".into()).unwrap_err();
        assert!(err.contains("requires a price"));
    }

    #[test]
    fn market_forbids_price() {
        let err = Order::new(Uuid::new_v4(), "AAPL".into(), OrderSide::Buy, OrderType::Market, dec!(10), Some(dec!(1)), "t".into()).unwrap_err();
        assert!(err.contains("must not specify"));
    }

    #[test]
    fn fill_cannot_exceed_quantity() {
        let mut order = limit_order();
        assert!(order.apply_fill(dec!(10)).is_ok());
        assert_eq!(order.status, OrderStatus::Filled);
        assert!(order.apply_fill(dec!(1)).is_err());
    }

    #[test]
    fn partial_then_full_fill() {
        let mut order = limit_order();
        order.apply_fill(dec!(4)).unwrap();
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.remaining_quantity(), dec!(6));
        order.apply_fill(dec!(6)).unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(order.remaining_quantity(), dec!(0));
    }

    #[test]
    fn cannot_cancel_filled_order() {
        let mut order = limit_order();
        order.apply_fill(dec!(10)).unwrap();
        assert!(order.cancel(CancellationReason::UserRequested).is_err());
    }
}
