//! Account, StockHolding, ReservationInfo and TransactionLog — owned
//! exclusively by the Account Service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use uuid::Uuid;

use crate::models::order::OrderSide;

/// Cash account. Invariants: `cash >= 0`, `reserved >= 0`, `reserved <= cash`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub user_id: Uuid,
    pub cash: Decimal,
    pub reserved: Decimal,
    pub version: i32,
}

impl Account {
    pub fn new(user_id: Uuid, cash: Decimal) -> Self {
        Self { user_id, cash, reserved: Decimal::ZERO, version: 0 }
    }

    pub fn available(&self) -> Decimal {
        self.cash - self.reserved
    }

    fn check_invariants(&self) -> Result<(), String> {
        if self.cash < Decimal::ZERO {
            return Err(format!("account {} cash went negative: {}", self.user_id, self.cash));
        }
        if self.reserved < Decimal::ZERO {
            return Err(format!("account {} reserved went negative: {}", self.user_id, self.reserved));
        }
        if self.reserved > self.cash {
            return Err(format!("account {} reserved {} exceeds cash {}", self.user_id, self.reserved, self.cash));
        }
        Ok(())
    }

    /// Move `amount` from available to reserved. Caller must have already
    /// checked `available() >= amount`.
    pub fn reserve(&mut self, amount: Decimal) -> Result<(), String> {
        self.reserved += amount;
        self.version += 1;
        self.check_invariants()
    }

    /// Reverse a reservation without touching cash (release path).
    pub fn release(&mut self, amount: Decimal) -> Result<(), String> {
        self.reserved -= amount;
        self.version += 1;
        self.check_invariants()
    }

    /// Confirm a reservation: the reserved amount leaves both `reserved`
    /// and `cash` (the buyer actually pays).
    pub fn confirm_reservation(&mut self, amount: Decimal) -> Result<(), String> {
        self.reserved -= amount;
        self.cash -= amount;
        self.version += 1;
        self.check_invariants()
    }

    /// Undo a confirmed reservation (rollback path): cash comes back, but
    /// it does not return to `reserved` — the reservation is gone.
    pub fn reverse_confirmation(&mut self, amount: Decimal) -> Result<(), String> {
        self.cash += amount;
        self.version += 1;
        self.check_invariants()
    }

    pub fn deposit(&mut self, amount: Decimal) -> Result<(), String> {
        self.cash += amount;
        self.version += 1;
        self.check_invariants()
    }

    pub fn withdraw(&mut self, amount: Decimal) -> Result<(), String> {
        self.cash -= amount;
        self.version += 1;
        self.check_invariants()
    }
}

/// A user's holding of one symbol. Invariants: `0 <= available <= quantity`;
/// `average_price >= 0`; `quantity == 0 => average_price == 0`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StockHolding {
    pub user_id: Uuid,
    pub symbol: String,
    pub quantity: Decimal,
    pub available_quantity: Decimal,
    pub average_price: Decimal,
    pub version: i32,
}

impl StockHolding {
    pub fn new(user_id: Uuid, symbol: String) -> Self {
        Self { user_id, symbol, quantity: Decimal::ZERO, available_quantity: Decimal::ZERO, average_price: Decimal::ZERO, version: 0 }
    }

    fn check_invariants(&self) -> Result<(), String> {
        if self.available_quantity < Decimal::ZERO || self.available_quantity > self.quantity {
            return Err(format!(
                "holding {}/{} available {} out of [0, {}]",
                self.user_id, self.symbol, self.available_quantity, self.quantity
            ));
        }
        if self.average_price < Decimal::ZERO {
            return Err(format!("holding {}/{} average price negative", self.user_id, self.symbol));
        }
        if self.quantity == Decimal::ZERO && self.average_price != Decimal::ZERO {
            return Err(format!("holding {}/{} has zero quantity but nonzero average price", self.user_id, self.symbol));
        }
        Ok(())
    }

    /// Move `qty` from available to reserved (SELL side reservation).
    pub fn reserve(&mut self, qty: Decimal) -> Result<(), String> {
        self.available_quantity -= qty;
        self.version += 1;
        self.check_invariants()
    }

    pub fn release(&mut self, qty: Decimal) -> Result<(), String> {
        self.available_quantity += qty;
        self.version += 1;
        self.check_invariants()
    }

    /// Confirm a SELL reservation: `quantity` drops (the shares left);
    /// `available_quantity` was already debited at reservation time.
    /// If `quantity` reaches zero, `average_price` resets to zero.
    pub fn confirm_sale(&mut self, qty: Decimal) -> Result<(), String> {
        self.quantity -= qty;
        if self.quantity == Decimal::ZERO {
            self.average_price = Decimal::ZERO;
        }
        self.version += 1;
        self.check_invariants()
    }

    /// Add shares from a BUY fill. New average price is the quantity-weighted
    /// mean, rounded HALF_UP to 4 decimal places (P10).
    pub fn add_shares(&mut self, qty: Decimal, price: Decimal) -> Result<(), String> {
        let old_qty = self.quantity;
        let old_avg = self.average_price;
        let new_qty = old_qty + qty;
        let new_avg = if new_qty.is_zero() {
            Decimal::ZERO
        } else {
            ((old_avg * old_qty + price * qty) / new_qty).round_dp_with_strategy(4, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
        };
        self.quantity = new_qty;
        self.average_price = new_avg;
        self.available_quantity += qty;
        self.version += 1;
        self.check_invariants()
    }

    /// Inverse of `add_shares`, used by rollback: deduct `qty` bought at
    /// `price` and recompute the average as if the purchase never happened.
    pub fn remove_shares(&mut self, qty: Decimal, price: Decimal) -> Result<(), String> {
        let new_qty = self.quantity - qty;
        let new_avg = if new_qty.is_zero() {
            Decimal::ZERO
        } else {
            ((self.average_price * self.quantity - price * qty) / new_qty)
                .round_dp_with_strategy(4, rust_decimal::RoundingStrategy::MidpointAwayFromZero)
        };
        self.quantity = new_qty;
        self.average_price = new_avg;
        self.available_quantity -= qty;
        self.version += 1;
        self.check_invariants()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "reservation_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum ReservationStatus {
    Active,
    Confirmed,
    Released,
    Expired,
}

/// One reservation per order id (UNIQUE), created ACTIVE on a successful
/// reserve. Transitions are one-shot and only from ACTIVE.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReservationInfo {
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub price: Option<Decimal>,
    pub reserved_amount: Option<Decimal>,
    pub status: ReservationStatus,
    pub trace_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReservationInfo {
    pub fn new_cash(order_id: Uuid, user_id: Uuid, symbol: String, quantity: Decimal, price: Decimal, reserved_amount: Decimal, trace_id: String) -> Self {
        let now = Utc::now();
        Self {
            order_id,
            user_id,
            symbol,
            side: OrderSide::Buy,
            quantity,
            price: Some(price),
            reserved_amount: Some(reserved_amount),
            status: ReservationStatus::Active,
            trace_id,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn new_shares(order_id: Uuid, user_id: Uuid, symbol: String, quantity: Decimal, trace_id: String) -> Self {
        let now = Utc::now();
        Self {
            order_id,
            user_id,
            symbol,
            side: OrderSide::Sell,
            quantity,
            price: None,
            reserved_amount: None,
            status: ReservationStatus::Active,
            trace_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// One-shot transition out of ACTIVE. Returns `Ok(false)` (not an error)
    /// if the reservation is already in a terminal state, per the idempotent
    /// release contract (P6).
    pub fn transition(&mut self, to: ReservationStatus) -> Result<bool, String> {
        if self.status != ReservationStatus::Active {
            return Ok(false);
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_side", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionSide {
    Buy,
    Sell,
    Rollback,
}

impl fmt::Display for TransactionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionSide::Buy => write!(f, "BUY"),
            TransactionSide::Sell => write!(f, "SELL"),
            TransactionSide::Rollback => write!(f, "ROLLBACK"),
        }
    }
}

/// Append-only per-user audit row. Identity includes `trade_id` + `side` so
/// a trade produces exactly two rows (buyer BUY, seller SELL), and a
/// rollback produces two more (both ROLLBACK).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TransactionLog {
    pub id: Uuid,
    pub trade_id: Uuid,
    pub user_id: Uuid,
    pub side: TransactionSide,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub created_at: DateTime<Utc>,
}

impl TransactionLog {
    pub fn new(trade_id: Uuid, user_id: Uuid, side: TransactionSide, amount: Decimal, balance_before: Decimal, balance_after: Decimal) -> Self {
        Self { id: Uuid::now_v7(), trade_id, user_id, side, amount, balance_before, balance_after, created_at: Utc::now() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn reserve_then_release_restores_state() {
        let mut account = Account::new(Uuid::new_v4(), dec!(10000));
        account.reserve(dec!(1500)).unwrap();
        assert_eq!(account.available(), dec!(8500));
        account.release(dec!(1500)).unwrap();
        assert_eq!(account.available(), dec!(10000));
        assert_eq!(account.cash, dec!(10000));
    }

    #[test]
    fn reserved_cannot_exceed_cash() {
        let mut account = Account::new(Uuid::new_v4(), dec!(100));
        assert!(account.reserve(dec!(150)).is_err());
    }

    #[test]
    fn confirm_reservation_debits_cash_and_reserved() {
        let mut account = Account::new(Uuid::new_v4(), dec!(10000));
        account.reserve(dec!(1500)).unwrap();
        account.confirm_reservation(dec!(1500)).unwrap();
        assert_eq!(account.cash, dec!(8500));
        assert_eq!(account.reserved, dec!(0));
    }

    #[test]
    fn average_price_weighted_and_rounded() {
        let mut holding = StockHolding::new(Uuid::new_v4(), "AAPL".into());
        holding.add_shares(dec!(90), dec!(50)).unwrap();
        assert_eq!(holding.average_price, dec!(50.0000));
        holding.add_shares(dec!(10), dec!(150)).unwrap();
        // (90*50 + 10*150) / 100 = 60
        assert_eq!(holding.average_price, dec!(60.0000));
        assert_eq!(holding.quantity, dec!(100));
    }

    #[test]
    fn confirm_sale_zeroes_average_price_when_exhausted() {
        let mut holding = StockHolding::new(Uuid::new_v4(), "AAPL".into());
        holding.add_shares(dec!(10), dec!(50)).unwrap();
        holding.reserve(dec!(10)).unwrap();
        holding.confirm_sale(dec!(10)).unwrap();
        assert_eq!(holding.quantity, dec!(0));
        assert_eq!(holding.average_price, dec!(0));
    }

    #[test]
    fn reservation_transition_is_one_shot() {
        let mut res = ReservationInfo::new_cash(Uuid::new_v4(), Uuid::new_v4(), "AAPL".into(), dec!(10), dec!(150), dec!(1500), "t".into());
        assert!(res.transition(ReservationStatus::Released).unwrap());
        assert_eq!(res.status, ReservationStatus::Released);
        // second transition is a no-op, not an error (idempotent release)
        assert!(!res.transition(ReservationStatus::Confirmed).unwrap());
        assert_eq!(res.status, ReservationStatus::Released);
    }

    #[test]
    fn remove_shares_is_inverse_of_add_shares() {
        let mut holding = StockHolding::new(Uuid::new_v4(), "AAPL".into());
        holding.add_shares(dec!(10), dec!(150)).unwrap();
        holding.remove_shares(dec!(10), dec!(150)).unwrap();
        assert_eq!(holding.quantity, dec!(0));
        assert_eq!(holding.average_price, dec!(0));
    }
}
