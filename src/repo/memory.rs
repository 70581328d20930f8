//! In-memory repository implementations. `DashMap`-backed, matching the
//! teacher's preferred concurrent map for in-process shared state
//! (order books, position caches). Used by unit tests, saga tests, and the
//! end-to-end scenario tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::account::{Account, ReservationInfo, StockHolding, TransactionLog};
use crate::models::order::Order;
use crate::models::outbox::{OutboxRecord, OutboxStatus};
use crate::models::saga::{SagaKind, SagaState};
use crate::models::trade::Trade;

use super::{AccountRepository, HoldingRepository, OrderRepository, OutboxRepository, ReservationRepository, SagaRepository, TradeRepository, TransactionLogRepository};

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: DashMap<Uuid, Order>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(&self, order: &Order) -> Result<(), CoreError> {
        self.orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, CoreError> {
        Ok(self.orders.get(&id).map(|r| r.clone()))
    }

    async fn update(&self, order: &Order) -> Result<(), CoreError> {
        match self.orders.get(&order.id) {
            Some(existing) if existing.version + 1 != order.version => {
                Err(CoreError::State(format!("stale write for order {} (have version {}, got {})", order.id, existing.version, order.version)))
            }
            Some(_) => {
                self.orders.insert(order.id, order.clone());
                Ok(())
            }
            None => Err(CoreError::NotFound(format!("order {} not found", order.id))),
        }
    }
}

#[derive(Default)]
pub struct InMemoryAccountRepository {
    accounts: DashMap<Uuid, Account>,
}

impl InMemoryAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AccountRepository for InMemoryAccountRepository {
    async fn get_or_create(&self, user_id: Uuid, initial_cash: Decimal) -> Result<Account, CoreError> {
        Ok(self.accounts.entry(user_id).or_insert_with(|| Account::new(user_id, initial_cash)).clone())
    }

    async fn find(&self, user_id: Uuid) -> Result<Option<Account>, CoreError> {
        Ok(self.accounts.get(&user_id).map(|r| r.clone()))
    }

    async fn update(&self, account: &Account) -> Result<(), CoreError> {
        self.accounts.insert(account.user_id, account.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryHoldingRepository {
    holdings: DashMap<(Uuid, String), StockHolding>,
}

impl InMemoryHoldingRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HoldingRepository for InMemoryHoldingRepository {
    async fn get_or_create(&self, user_id: Uuid, symbol: &str) -> Result<StockHolding, CoreError> {
        Ok(self.holdings.entry((user_id, symbol.to_string())).or_insert_with(|| StockHolding::new(user_id, symbol.to_string())).clone())
    }

    async fn find(&self, user_id: Uuid, symbol: &str) -> Result<Option<StockHolding>, CoreError> {
        Ok(self.holdings.get(&(user_id, symbol.to_string())).map(|r| r.clone()))
    }

    async fn update(&self, holding: &StockHolding) -> Result<(), CoreError> {
        self.holdings.insert((holding.user_id, holding.symbol.clone()), holding.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryReservationRepository {
    reservations: DashMap<Uuid, ReservationInfo>,
}

impl InMemoryReservationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReservationRepository for InMemoryReservationRepository {
    async fn insert(&self, reservation: &ReservationInfo) -> Result<(), CoreError> {
        if self.reservations.contains_key(&reservation.order_id) {
            return Err(CoreError::State(format!("reservation already exists for order {}", reservation.order_id)));
        }
        self.reservations.insert(reservation.order_id, reservation.clone());
        Ok(())
    }

    async fn find_by_order_id(&self, order_id: Uuid) -> Result<Option<ReservationInfo>, CoreError> {
        Ok(self.reservations.get(&order_id).map(|r| r.clone()))
    }

    async fn update(&self, reservation: &ReservationInfo) -> Result<(), CoreError> {
        self.reservations.insert(reservation.order_id, reservation.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryTransactionLogRepository {
    logs: DashMap<Uuid, Vec<TransactionLog>>,
}

impl InMemoryTransactionLogRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionLogRepository for InMemoryTransactionLogRepository {
    async fn insert(&self, log: &TransactionLog) -> Result<(), CoreError> {
        self.logs.entry(log.trade_id).or_default().push(log.clone());
        Ok(())
    }

    async fn find_by_trade_id(&self, trade_id: Uuid) -> Result<Vec<TransactionLog>, CoreError> {
        Ok(self.logs.get(&trade_id).map(|r| r.clone()).unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryTradeRepository {
    trades: DashMap<Uuid, Trade>,
}

impl InMemoryTradeRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TradeRepository for InMemoryTradeRepository {
    async fn insert(&self, trade: &Trade) -> Result<(), CoreError> {
        self.trades.insert(trade.id, trade.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Trade>, CoreError> {
        Ok(self.trades.get(&id).map(|r| r.clone()))
    }
}

#[derive(Default)]
pub struct InMemoryOutboxRepository {
    records: DashMap<Uuid, OutboxRecord>,
}

impl InMemoryOutboxRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OutboxRepository for InMemoryOutboxRepository {
    async fn insert(&self, record: &OutboxRecord) -> Result<(), CoreError> {
        self.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn fetch_pending(&self, limit: i64) -> Result<Vec<OutboxRecord>, CoreError> {
        let mut pending: Vec<OutboxRecord> = self.records.iter().filter(|r| r.status == OutboxStatus::Pending).map(|r| r.clone()).collect();
        pending.sort_by_key(|r| r.created_at);
        pending.truncate(limit.max(0) as usize);
        Ok(pending)
    }

    async fn mark_published(&self, id: Uuid) -> Result<(), CoreError> {
        if let Some(mut record) = self.records.get_mut(&id) {
            record.mark_published();
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemorySagaRepository {
    sagas: DashMap<Uuid, SagaState>,
}

impl InMemorySagaRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SagaRepository for InMemorySagaRepository {
    async fn insert(&self, saga: &SagaState) -> Result<(), CoreError> {
        self.sagas.insert(saga.saga_id, saga.clone());
        Ok(())
    }

    async fn find_by_id(&self, saga_id: Uuid) -> Result<Option<SagaState>, CoreError> {
        Ok(self.sagas.get(&saga_id).map(|r| r.clone()))
    }

    async fn find_by_order_id(&self, order_id: Uuid, kind: SagaKind) -> Result<Option<SagaState>, CoreError> {
        Ok(self.sagas.iter().find(|r| r.order_id == order_id && r.kind == kind).map(|r| r.clone()))
    }

    async fn update(&self, saga: &SagaState) -> Result<(), CoreError> {
        self.sagas.insert(saga.saga_id, saga.clone());
        Ok(())
    }

    async fn find_overdue(&self, kind: SagaKind, now: DateTime<Utc>) -> Result<Vec<SagaState>, CoreError> {
        Ok(self.sagas.iter().filter(|r| r.kind == kind && r.is_overdue(now)).map(|r| r.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn order_update_rejects_stale_version() {
        let repo = InMemoryOrderRepository::new();
        let mut order = Order::new(Uuid::new_v4(), "AAPL".into(), crate::models::OrderSide::Buy, crate::models::OrderType::Limit, dec!(10), Some(dec!(150)), "t".into()).unwrap();
        repo.insert(&order).await.unwrap();
        order.version = 5;
        assert!(repo.update(&order).await.is_err());
    }

    #[tokio::test]
    async fn account_get_or_create_is_idempotent() {
        let repo = InMemoryAccountRepository::new();
        let user_id = Uuid::new_v4();
        let a1 = repo.get_or_create(user_id, dec!(1000)).await.unwrap();
        let a2 = repo.get_or_create(user_id, dec!(9999)).await.unwrap();
        assert_eq!(a1.cash, a2.cash);
        assert_eq!(a1.cash, dec!(1000));
    }

    #[tokio::test]
    async fn reservation_insert_is_unique_per_order() {
        let repo = InMemoryReservationRepository::new();
        let res = ReservationInfo::new_cash(Uuid::new_v4(), Uuid::new_v4(), "AAPL".into(), dec!(10), dec!(150), dec!(1500), "t".into());
        repo.insert(&res).await.unwrap();
        assert!(repo.insert(&res).await.is_err());
    }
}
