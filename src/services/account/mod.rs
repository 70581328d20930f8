//! Account Service: reserves funds/shares on order creation, confirms on
//! trade execution, releases on cancellation, rolls back on trade rollback.

pub mod confirm;
pub mod errors;
pub mod locks;
pub mod reservation;
pub mod saga;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use crate::bus::events::FailureType;
use crate::bus::Bus;
use crate::models::order::{Order, OrderSide, OrderType};
use crate::models::trade::Trade;
use crate::repo::{AccountRepository, HoldingRepository, ReservationRepository, SagaRepository, TransactionLogRepository};

use confirm::ConfirmationService;
use errors::AccountError;
use locks::LockManager;
use reservation::ReservationService;
use saga::AccountSagaService;

pub struct AccountService<A, H, R, T, S: SagaRepository> {
    reservations: ReservationService<A, H, R>,
    confirmation: ConfirmationService<A, H, T>,
    sagas: AccountSagaService<S>,
    bus: Arc<dyn Bus>,
}

impl<A, H, R, T, S> AccountService<A, H, R, T, S>
where
    A: AccountRepository,
    H: HoldingRepository,
    R: ReservationRepository,
    T: TransactionLogRepository,
    S: SagaRepository,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(accounts: Arc<A>, holdings: Arc<H>, reservations: Arc<R>, tx_logs: Arc<T>, sagas: Arc<S>, bus: Arc<dyn Bus>, lock_timeout: Duration, account_saga_deadline: Duration) -> Self {
        let locks = Arc::new(LockManager::new());
        Self {
            reservations: ReservationService::new(accounts.clone(), holdings.clone(), reservations, locks.clone(), lock_timeout),
            confirmation: ConfirmationService::new(accounts, holdings, tx_logs, locks, lock_timeout),
            sagas: AccountSagaService::new(sagas, account_saga_deadline),
            bus,
        }
    }

    /// Handles `OrderCreatedEvent`. MARKET BUY orders are not reserved
    /// (price is unknown at submission time); everything else reserves
    /// cash (BUY LIMIT) or shares (SELL). On failure, publishes
    /// `AccountUpdateFailedEvent` so the Order Service cancels the order.
    pub async fn handle_order_created(&self, order: &Order, trace_id: &str) -> Result<(), AccountError> {
        if order.order_type == OrderType::Market && order.side == OrderSide::Buy {
            return Ok(());
        }

        let result = match order.side {
            OrderSide::Buy => {
                let price = order.price.expect("LIMIT BUY always carries a price");
                self.reservations.reserve_cash(order.id, order.user_id, &order.symbol, order.quantity, price, trace_id).await
            }
            OrderSide::Sell => self.reservations.reserve_shares(order.id, order.user_id, &order.symbol, order.quantity, trace_id).await,
        };

        if let Err(err) = &result {
            self.publish_order_level_failure(order, err, trace_id).await;
        }
        result.map(|_| ())
    }

    async fn publish_order_level_failure(&self, order: &Order, err: &AccountError, trace_id: &str) {
        let (failure_type, reason) = match err {
            AccountError::InsufficientBalance { required, available } => (FailureType::InsufficientBalance, format!("required {required}, available {available}")),
            AccountError::InsufficientShares { required, available } => (FailureType::InsufficientShares, format!("required {required}, available {available}")),
            AccountError::LockTimeout => (FailureType::LockTimeout, "lock acquisition timed out".to_string()),
            other => (FailureType::TechnicalError, other.to_string()),
        };
        let (buy_user_id, sell_user_id) = match order.side {
            OrderSide::Buy => (order.user_id, Uuid::nil()),
            OrderSide::Sell => (Uuid::nil(), order.user_id),
        };
        let payload = crate::bus::events::AccountUpdateFailedEvent {
            saga_id: Uuid::nil(),
            trade_id: None,
            order_id: order.id,
            buy_user_id,
            sell_user_id,
            reason,
            failure_type,
            should_retry: matches!(err, AccountError::LockTimeout),
        };
        let envelope = crate::bus::events::EventEnvelope::new(order.id.to_string(), trace_id, "AccountUpdateFailedEvent", None, payload);
        match crate::bus::to_bus_payload(&envelope) {
            Ok(json) => {
                if let Err(e) = self.bus.publish(crate::bus::Topic::AccountEvents, &order.symbol, "AccountUpdateFailedEvent", json).await {
                    warn!(order_id = %order.id, error = %e, "failed to publish AccountUpdateFailedEvent");
                }
            }
            Err(e) => warn!(order_id = %order.id, error = %e, "failed to serialize AccountUpdateFailedEvent"),
        }
    }

    /// Handles `OrderCancelledEvent` and account-layer saga timeouts alike:
    /// releasing a reservation by order id is always idempotent.
    pub async fn handle_order_released(&self, order_id: Uuid) -> Result<(), AccountError> {
        self.reservations.release_by_order_id(order_id).await
    }

    /// Handles `TradeExecutedEvent`: confirms both sides' reservations and
    /// drives the per-trade account saga through to `AccountUpdated` or
    /// `AccountUpdateFailed`.
    pub async fn handle_trade_executed(&self, trade: &Trade, trace_id: &str) -> Result<(), AccountError> {
        let saga = self.sagas.start(trade, trace_id).await.map_err(AccountError::Core)?;
        if saga.status.is_terminal() {
            info!(trade_id = %trade.id, status = ?saga.status, "trade already processed by account saga, skipping redelivered confirmation");
            return Ok(());
        }

        match self.confirmation.confirm_trade(trade).await {
            Ok(()) => {
                let buyer = self.confirmation.account_balance(trade.buy_user_id).await?;
                let seller = self.confirmation.account_balance(trade.sell_user_id).await?;
                self.sagas.on_confirmation_succeeded(trade, buyer, seller, &self.bus, trace_id).await.map_err(AccountError::Core)?;
                info!(trade_id = %trade.id, "trade confirmed");
                Ok(())
            }
            Err(err) => {
                let (failure_type, should_retry) = match &err {
                    AccountError::InsufficientBalance { .. } => (FailureType::InsufficientBalance, false),
                    AccountError::InsufficientShares { .. } => (FailureType::InsufficientShares, false),
                    AccountError::LockTimeout => (FailureType::LockTimeout, true),
                    _ => (FailureType::TechnicalError, false),
                };
                self.sagas.on_confirmation_failed(trade, &err.to_string(), failure_type, should_retry, &self.bus, trace_id).await.map_err(AccountError::Core)?;
                Err(err)
            }
        }
    }

    /// Handles an incoming `TradeRollbackEvent`: reverses a previously
    /// confirmed trade and compensates the account saga.
    pub async fn handle_trade_rollback(&self, trade: &Trade, reason: &str, trace_id: &str) -> Result<(), AccountError> {
        self.confirmation.rollback_trade(trade).await?;
        self.sagas.on_rollback_received(trade, reason, &self.bus, trace_id).await.map_err(AccountError::Core)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::bus::Topic;
    use crate::repo::memory::{InMemoryAccountRepository, InMemoryHoldingRepository, InMemoryReservationRepository, InMemorySagaRepository, InMemoryTransactionLogRepository};
    use rust_decimal_macros::dec;

    type Service = AccountService<InMemoryAccountRepository, InMemoryHoldingRepository, InMemoryReservationRepository, InMemoryTransactionLogRepository, InMemorySagaRepository>;

    fn service(bus: Arc<dyn Bus>) -> (Service, Arc<InMemoryAccountRepository>, Arc<InMemoryHoldingRepository>) {
        let accounts = Arc::new(InMemoryAccountRepository::new());
        let holdings = Arc::new(InMemoryHoldingRepository::new());
        let svc = AccountService::new(
            accounts.clone(),
            holdings.clone(),
            Arc::new(InMemoryReservationRepository::new()),
            Arc::new(InMemoryTransactionLogRepository::new()),
            Arc::new(InMemorySagaRepository::new()),
            bus,
            Duration::from_secs(3),
            Duration::from_secs(5),
        );
        (svc, accounts, holdings)
    }

    #[tokio::test]
    async fn insufficient_balance_publishes_failure_and_does_not_mutate() {
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let (svc, accounts, _holdings) = service(bus.clone());
        let mut rx = bus.subscribe(Topic::AccountEvents);

        let user = Uuid::new_v4();
        accounts.get_or_create(user, dec!(100)).await.unwrap();
        let order = Order::new(user, "AAPL".into(), OrderSide::Buy, OrderType::Limit, dec!(10), Some(dec!(150)), "t".into()).unwrap();

        let err = svc.handle_order_created(&order, "t").await.unwrap_err();
        assert!(matches!(err, AccountError::InsufficientBalance { .. }));
        let account = accounts.find(user).await.unwrap().unwrap();
        assert_eq!(account.cash, dec!(100));
        assert_eq!(rx.try_recv().unwrap().event_type, "AccountUpdateFailedEvent");
    }

    #[tokio::test]
    async fn market_buy_orders_are_never_reserved() {
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let (svc, accounts, _holdings) = service(bus);
        let user = Uuid::new_v4();
        let order = Order::new(user, "AAPL".into(), OrderSide::Buy, OrderType::Market, dec!(10), None, "t".into()).unwrap();
        svc.handle_order_created(&order, "t").await.unwrap();
        assert!(accounts.find(user).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn full_reserve_confirm_cycle_completes_saga() {
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let (svc, accounts, holdings) = service(bus.clone());
        let mut account_events = bus.subscribe(Topic::AccountEvents);

        let buyer = Uuid::new_v4();
        let seller = Uuid::new_v4();
        accounts.get_or_create(buyer, dec!(10000)).await.unwrap();
        let mut seller_holding = holdings.get_or_create(seller, "AAPL").await.unwrap();
        seller_holding.add_shares(dec!(10), dec!(100)).unwrap();
        holdings.update(&seller_holding).await.unwrap();

        let buy_order = Order::new(buyer, "AAPL".into(), OrderSide::Buy, OrderType::Limit, dec!(10), Some(dec!(150)), "t".into()).unwrap();
        let sell_order = Order::new(seller, "AAPL".into(), OrderSide::Sell, OrderType::Limit, dec!(10), Some(dec!(150)), "t".into()).unwrap();
        svc.handle_order_created(&buy_order, "t").await.unwrap();
        svc.handle_order_created(&sell_order, "t").await.unwrap();

        let trade = Trade::new("AAPL".into(), buy_order.id, sell_order.id, buyer, seller, dec!(150), dec!(10));
        svc.handle_trade_executed(&trade, "t").await.unwrap();

        let msg = account_events.try_recv().unwrap();
        assert_eq!(msg.event_type, "AccountUpdatedEvent");
        let buyer_account = accounts.find(buyer).await.unwrap().unwrap();
        assert_eq!(buyer_account.cash, dec!(10000) - trade.notional());
    }
}
