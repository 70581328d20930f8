//! Two-phase reservation: reserve on order creation, confirm on trade
//! execution (see `confirm.rs`), release on cancellation or failure.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::models::account::{ReservationInfo, ReservationStatus};
use crate::repo::{AccountRepository, HoldingRepository, ReservationRepository};

use super::errors::AccountError;
use super::locks::LockManager;

const DEFAULT_STARTING_CASH: Decimal = Decimal::ZERO;

pub struct ReservationService<A, H, R> {
    accounts: Arc<A>,
    holdings: Arc<H>,
    reservations: Arc<R>,
    locks: Arc<LockManager>,
    lock_timeout: Duration,
}

impl<A, H, R> ReservationService<A, H, R>
where
    A: AccountRepository,
    H: HoldingRepository,
    R: ReservationRepository,
{
    pub fn new(accounts: Arc<A>, holdings: Arc<H>, reservations: Arc<R>, locks: Arc<LockManager>, lock_timeout: Duration) -> Self {
        Self { accounts, holdings, reservations, locks, lock_timeout }
    }

    /// Reserve cash for a BUY order. Idempotent by order id: a second call
    /// for the same order returns the existing reservation.
    pub async fn reserve_cash(&self, order_id: Uuid, user_id: Uuid, symbol: &str, quantity: Decimal, price: Decimal, trace_id: &str) -> Result<ReservationInfo, AccountError> {
        if let Some(existing) = self.reservations.find_by_order_id(order_id).await? {
            return Ok(existing);
        }

        let amount = quantity * price;
        let _guard = self.locks.acquire_single(user_id, self.lock_timeout).await?;
        let mut account = self.accounts.get_or_create(user_id, DEFAULT_STARTING_CASH).await?;
        if account.available() < amount {
            return Err(AccountError::InsufficientBalance { required: amount, available: account.available() });
        }
        account.reserve(amount).map_err(|e| AccountError::Core(crate::errors::CoreError::State(e)))?;
        self.accounts.update(&account).await?;

        let reservation = ReservationInfo::new_cash(order_id, user_id, symbol.to_string(), quantity, price, amount, trace_id.to_string());
        self.reservations.insert(&reservation).await?;
        Ok(reservation)
    }

    /// Reserve shares for a SELL order. Idempotent by order id.
    pub async fn reserve_shares(&self, order_id: Uuid, user_id: Uuid, symbol: &str, quantity: Decimal, trace_id: &str) -> Result<ReservationInfo, AccountError> {
        if let Some(existing) = self.reservations.find_by_order_id(order_id).await? {
            return Ok(existing);
        }

        let _guard = self.locks.acquire_single(user_id, self.lock_timeout).await?;
        let mut holding = self.holdings.get_or_create(user_id, symbol).await?;
        if holding.available_quantity < quantity {
            return Err(AccountError::InsufficientShares { required: quantity, available: holding.available_quantity });
        }
        holding.reserve(quantity).map_err(|e| AccountError::Core(crate::errors::CoreError::State(e)))?;
        self.holdings.update(&holding).await?;

        let reservation = ReservationInfo::new_shares(order_id, user_id, symbol.to_string(), quantity, trace_id.to_string());
        self.reservations.insert(&reservation).await?;
        Ok(reservation)
    }

    /// `releaseReservationByOrderId`: missing or already-terminal is a
    /// success (idempotent no-op), not an error.
    pub async fn release_by_order_id(&self, order_id: Uuid) -> Result<(), AccountError> {
        let Some(mut reservation) = self.reservations.find_by_order_id(order_id).await? else {
            return Ok(());
        };
        if reservation.status != ReservationStatus::Active {
            return Ok(());
        }

        let _guard = self.locks.acquire_single(reservation.user_id, self.lock_timeout).await?;
        match (reservation.price, reservation.reserved_amount) {
            (Some(_), Some(amount)) => {
                let mut account = self.accounts.get_or_create(reservation.user_id, DEFAULT_STARTING_CASH).await?;
                account.release(amount).map_err(|e| AccountError::Core(crate::errors::CoreError::State(e)))?;
                self.accounts.update(&account).await?;
            }
            _ => {
                let mut holding = self.holdings.get_or_create(reservation.user_id, &reservation.symbol).await?;
                holding.release(reservation.quantity).map_err(|e| AccountError::Core(crate::errors::CoreError::State(e)))?;
                self.holdings.update(&holding).await?;
            }
        }

        reservation.transition(ReservationStatus::Released).ok();
        self.reservations.update(&reservation).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::memory::{InMemoryAccountRepository, InMemoryHoldingRepository, InMemoryReservationRepository};
    use rust_decimal_macros::dec;

    fn service() -> ReservationService<InMemoryAccountRepository, InMemoryHoldingRepository, InMemoryReservationRepository> {
        ReservationService::new(
            Arc::new(InMemoryAccountRepository::new()),
            Arc::new(InMemoryHoldingRepository::new()),
            Arc::new(InMemoryReservationRepository::new()),
            Arc::new(LockManager::new()),
            Duration::from_secs(3),
        )
    }

    #[tokio::test]
    async fn reserve_cash_is_idempotent_by_order_id() {
        let svc = service();
        let order_id = Uuid::new_v4();
        let user = Uuid::new_v4();
        svc.accounts.get_or_create(user, dec!(10000)).await.unwrap();
        let first = svc.reserve_cash(order_id, user, "AAPL", dec!(10), dec!(150), "t").await.unwrap();
        let second = svc.reserve_cash(order_id, user, "AAPL", dec!(10), dec!(150), "t").await.unwrap();
        assert_eq!(first.order_id, second.order_id);
        let account = svc.accounts.find(user).await.unwrap().unwrap();
        assert_eq!(account.reserved, dec!(1500));
    }

    #[tokio::test]
    async fn reserve_cash_fails_when_insufficient() {
        let svc = service();
        let user = Uuid::new_v4();
        svc.accounts.get_or_create(user, dec!(100)).await.unwrap();
        let err = svc.reserve_cash(Uuid::new_v4(), user, "AAPL", dec!(10), dec!(150), "t").await.unwrap_err();
        assert!(matches!(err, AccountError::InsufficientBalance { .. }));
    }

    #[tokio::test]
    async fn release_by_order_id_is_idempotent_for_missing_reservation() {
        let svc = service();
        assert!(svc.release_by_order_id(Uuid::new_v4()).await.is_ok());
    }

    #[tokio::test]
    async fn release_restores_reserved_cash() {
        let svc = service();
        let order_id = Uuid::new_v4();
        let user = Uuid::new_v4();
        svc.accounts.get_or_create(user, dec!(10000)).await.unwrap();
        svc.reserve_cash(order_id, user, "AAPL", dec!(10), dec!(150), "t").await.unwrap();
        svc.release_by_order_id(order_id).await.unwrap();
        let account = svc.accounts.find(user).await.unwrap().unwrap();
        assert_eq!(account.reserved, dec!(0));
        assert_eq!(account.cash, dec!(10000));
        // second release is a no-op
        svc.release_by_order_id(order_id).await.unwrap();
    }
}
