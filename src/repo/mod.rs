//! Repository traits — one per aggregate — each with a `postgres`
//! implementation backed by `sqlx` and an in-memory implementation used by
//! the saga/service unit tests and the scenario tests in `tests/`.
//!
//! Departs from the teacher, which only ever tests against a live
//! Postgres instance: splitting storage behind a trait lets the
//! conservation and saga-termination properties run without a database.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::account::{Account, ReservationInfo, StockHolding, TransactionLog};
use crate::models::order::Order;
use crate::models::outbox::OutboxRecord;
use crate::models::saga::{SagaKind, SagaState};
use crate::models::trade::Trade;

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert(&self, order: &Order) -> Result<(), CoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, CoreError>;
    /// Optimistic-concurrency update: fails with `CoreError::State` if
    /// `order.version - 1` does not match the stored version.
    async fn update(&self, order: &Order) -> Result<(), CoreError>;
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn get_or_create(&self, user_id: Uuid, initial_cash: rust_decimal::Decimal) -> Result<Account, CoreError>;
    async fn find(&self, user_id: Uuid) -> Result<Option<Account>, CoreError>;
    async fn update(&self, account: &Account) -> Result<(), CoreError>;
}

#[async_trait]
pub trait HoldingRepository: Send + Sync {
    async fn get_or_create(&self, user_id: Uuid, symbol: &str) -> Result<StockHolding, CoreError>;
    async fn find(&self, user_id: Uuid, symbol: &str) -> Result<Option<StockHolding>, CoreError>;
    async fn update(&self, holding: &StockHolding) -> Result<(), CoreError>;
}

#[async_trait]
pub trait ReservationRepository: Send + Sync {
    async fn insert(&self, reservation: &ReservationInfo) -> Result<(), CoreError>;
    async fn find_by_order_id(&self, order_id: Uuid) -> Result<Option<ReservationInfo>, CoreError>;
    async fn update(&self, reservation: &ReservationInfo) -> Result<(), CoreError>;
}

#[async_trait]
pub trait TransactionLogRepository: Send + Sync {
    async fn insert(&self, log: &TransactionLog) -> Result<(), CoreError>;
    async fn find_by_trade_id(&self, trade_id: Uuid) -> Result<Vec<TransactionLog>, CoreError>;
}

#[async_trait]
pub trait TradeRepository: Send + Sync {
    async fn insert(&self, trade: &Trade) -> Result<(), CoreError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Trade>, CoreError>;
}

#[async_trait]
pub trait OutboxRepository: Send + Sync {
    /// In the `postgres` implementation this shares the transaction that
    /// wrote the aggregate row; the in-memory implementation has no
    /// transaction to join and simply appends.
    async fn insert(&self, record: &OutboxRecord) -> Result<(), CoreError>;
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<OutboxRecord>, CoreError>;
    async fn mark_published(&self, id: Uuid) -> Result<(), CoreError>;
}

#[async_trait]
pub trait SagaRepository: Send + Sync {
    async fn insert(&self, saga: &SagaState) -> Result<(), CoreError>;
    async fn find_by_id(&self, saga_id: Uuid) -> Result<Option<SagaState>, CoreError>;
    async fn find_by_order_id(&self, order_id: Uuid, kind: SagaKind) -> Result<Option<SagaState>, CoreError>;
    async fn update(&self, saga: &SagaState) -> Result<(), CoreError>;
    async fn find_overdue(&self, kind: SagaKind, now: DateTime<Utc>) -> Result<Vec<SagaState>, CoreError>;
}
