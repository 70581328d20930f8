//! `sqlx`-backed repository implementations against the schema documented
//! in `crate::db::schema`. Plain `query`/`query_as` — no `query!` macro,
//! since there is no live database at build time to check against.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::account::{Account, ReservationInfo, StockHolding, TransactionLog};
use crate::models::order::Order;
use crate::models::outbox::OutboxRecord;
use crate::models::saga::{SagaKind, SagaState};
use crate::models::trade::Trade;

use super::{AccountRepository, HoldingRepository, OrderRepository, OutboxRepository, ReservationRepository, SagaRepository, TradeRepository, TransactionLogRepository};

pub struct PostgresOrderRepository {
    pool: PgPool,
}

impl PostgresOrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderRepository for PostgresOrderRepository {
    async fn insert(&self, order: &Order) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, user_id, symbol, side, order_type, quantity, price, status, filled_quantity, cancellation_reason, trace_id, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(order.id)
        .bind(order.user_id)
        .bind(order.symbol.as_str())
        .bind(order.side)
        .bind(order.order_type)
        .bind(order.quantity)
        .bind(order.price)
        .bind(order.status)
        .bind(order.filled_quantity)
        .bind(order.cancellation_reason.as_deref())
        .bind(order.trace_id.as_str())
        .bind(order.version)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Order>, CoreError> {
        let row = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        Ok(row)
    }

    async fn update(&self, order: &Order) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $1, filled_quantity = $2, cancellation_reason = $3, version = $4, updated_at = $5
            WHERE id = $6 AND version = $7
            "#,
        )
        .bind(order.status)
        .bind(order.filled_quantity)
        .bind(order.cancellation_reason.as_deref())
        .bind(order.version)
        .bind(order.updated_at)
        .bind(order.id)
        .bind(order.version - 1)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::State(format!("optimistic update failed for order {}", order.id)));
        }
        Ok(())
    }
}

pub struct PostgresAccountRepository {
    pool: PgPool,
}

impl PostgresAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for PostgresAccountRepository {
    async fn get_or_create(&self, user_id: Uuid, initial_cash: Decimal) -> Result<Account, CoreError> {
        let row = sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (user_id, cash, reserved, version)
            VALUES ($1, $2, 0, 0)
            ON CONFLICT (user_id) DO UPDATE SET user_id = accounts.user_id
            RETURNING user_id, cash, reserved, version
            "#,
        )
        .bind(user_id)
        .bind(initial_cash)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find(&self, user_id: Uuid) -> Result<Option<Account>, CoreError> {
        let row = sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE user_id = $1").bind(user_id).fetch_optional(&self.pool).await?;
        Ok(row)
    }

    async fn update(&self, account: &Account) -> Result<(), CoreError> {
        let result = sqlx::query("UPDATE accounts SET cash = $1, reserved = $2, version = $3 WHERE user_id = $4 AND version = $5")
            .bind(account.cash)
            .bind(account.reserved)
            .bind(account.version)
            .bind(account.user_id)
            .bind(account.version - 1)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::State(format!("optimistic update failed for account {}", account.user_id)));
        }
        Ok(())
    }
}

pub struct PostgresHoldingRepository {
    pool: PgPool,
}

impl PostgresHoldingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HoldingRepository for PostgresHoldingRepository {
    async fn get_or_create(&self, user_id: Uuid, symbol: &str) -> Result<StockHolding, CoreError> {
        let row = sqlx::query_as::<_, StockHolding>(
            r#"
            INSERT INTO stock_holdings (user_id, symbol, quantity, available_quantity, average_price, version)
            VALUES ($1, $2, 0, 0, 0, 0)
            ON CONFLICT (user_id, symbol) DO UPDATE SET user_id = stock_holdings.user_id
            RETURNING user_id, symbol, quantity, available_quantity, average_price, version
            "#,
        )
        .bind(user_id)
        .bind(symbol)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find(&self, user_id: Uuid, symbol: &str) -> Result<Option<StockHolding>, CoreError> {
        let row = sqlx::query_as::<_, StockHolding>("SELECT * FROM stock_holdings WHERE user_id = $1 AND symbol = $2")
            .bind(user_id)
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn update(&self, holding: &StockHolding) -> Result<(), CoreError> {
        let result = sqlx::query(
            r#"
            UPDATE stock_holdings
            SET quantity = $1, available_quantity = $2, average_price = $3, version = $4
            WHERE user_id = $5 AND symbol = $6 AND version = $7
            "#,
        )
        .bind(holding.quantity)
        .bind(holding.available_quantity)
        .bind(holding.average_price)
        .bind(holding.version)
        .bind(holding.user_id)
        .bind(holding.symbol.as_str())
        .bind(holding.version - 1)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CoreError::State(format!("optimistic update failed for holding {}/{}", holding.user_id, holding.symbol)));
        }
        Ok(())
    }
}

pub struct PostgresReservationRepository {
    pool: PgPool,
}

impl PostgresReservationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReservationRepository for PostgresReservationRepository {
    async fn insert(&self, reservation: &ReservationInfo) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO reservation_info (order_id, user_id, symbol, side, quantity, price, reserved_amount, status, trace_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(reservation.order_id)
        .bind(reservation.user_id)
        .bind(reservation.symbol.as_str())
        .bind(reservation.side)
        .bind(reservation.quantity)
        .bind(reservation.price)
        .bind(reservation.reserved_amount)
        .bind(reservation.status)
        .bind(reservation.trace_id.as_str())
        .bind(reservation.created_at)
        .bind(reservation.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_order_id(&self, order_id: Uuid) -> Result<Option<ReservationInfo>, CoreError> {
        let row = sqlx::query_as::<_, ReservationInfo>("SELECT * FROM reservation_info WHERE order_id = $1").bind(order_id).fetch_optional(&self.pool).await?;
        Ok(row)
    }

    async fn update(&self, reservation: &ReservationInfo) -> Result<(), CoreError> {
        sqlx::query("UPDATE reservation_info SET status = $1, updated_at = $2 WHERE order_id = $3")
            .bind(reservation.status)
            .bind(reservation.updated_at)
            .bind(reservation.order_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub struct PostgresTransactionLogRepository {
    pool: PgPool,
}

impl PostgresTransactionLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionLogRepository for PostgresTransactionLogRepository {
    async fn insert(&self, log: &TransactionLog) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO transaction_logs (id, trade_id, user_id, side, amount, balance_before, balance_after, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(log.id)
        .bind(log.trade_id)
        .bind(log.user_id)
        .bind(log.side)
        .bind(log.amount)
        .bind(log.balance_before)
        .bind(log.balance_after)
        .bind(log.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_trade_id(&self, trade_id: Uuid) -> Result<Vec<TransactionLog>, CoreError> {
        let rows = sqlx::query_as::<_, TransactionLog>("SELECT * FROM transaction_logs WHERE trade_id = $1 ORDER BY created_at").bind(trade_id).fetch_all(&self.pool).await?;
        Ok(rows)
    }
}

pub struct PostgresTradeRepository {
    pool: PgPool,
}

impl PostgresTradeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TradeRepository for PostgresTradeRepository {
    async fn insert(&self, trade: &Trade) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO trades (id, symbol, buy_order_id, sell_order_id, buy_user_id, sell_user_id, price, quantity, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(trade.id)
        .bind(trade.symbol.as_str())
        .bind(trade.buy_order_id)
        .bind(trade.sell_order_id)
        .bind(trade.buy_user_id)
        .bind(trade.sell_user_id)
        .bind(trade.price)
        .bind(trade.quantity)
        .bind(trade.timestamp)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Trade>, CoreError> {
        let row = sqlx::query_as::<_, Trade>("SELECT * FROM trades WHERE id = $1").bind(id).fetch_optional(&self.pool).await?;
        Ok(row)
    }
}

pub struct PostgresOutboxRepository {
    pool: PgPool,
}

impl PostgresOutboxRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OutboxRepository for PostgresOutboxRepository {
    async fn insert(&self, record: &OutboxRecord) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO order_outbox_events (id, aggregate_type, aggregate_id, event_type, payload, status, created_at, published_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(record.aggregate_type.as_str())
        .bind(record.aggregate_id.as_str())
        .bind(record.event_type.as_str())
        .bind(&record.payload)
        .bind(record.status)
        .bind(record.created_at)
        .bind(record.published_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fetch_pending(&self, limit: i64) -> Result<Vec<OutboxRecord>, CoreError> {
        let rows = sqlx::query_as::<_, OutboxRecord>("SELECT * FROM order_outbox_events WHERE status = 'PENDING' ORDER BY created_at LIMIT $1")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn mark_published(&self, id: Uuid) -> Result<(), CoreError> {
        sqlx::query("UPDATE order_outbox_events SET status = 'PUBLISHED', published_at = now() WHERE id = $1").bind(id).execute(&self.pool).await?;
        Ok(())
    }
}

pub struct PostgresSagaRepository {
    pool: PgPool,
}

impl PostgresSagaRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SagaRepository for PostgresSagaRepository {
    async fn insert(&self, saga: &SagaState) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO saga_states (saga_id, kind, trade_id, order_id, user_id, symbol, status, event_type, payload_snapshot, timeout_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(saga.saga_id)
        .bind(saga.kind)
        .bind(saga.trade_id)
        .bind(saga.order_id)
        .bind(saga.user_id)
        .bind(saga.symbol.as_str())
        .bind(saga.status)
        .bind(saga.event_type.as_str())
        .bind(&saga.payload_snapshot)
        .bind(saga.timeout_at)
        .bind(saga.created_at)
        .bind(saga.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(&self, saga_id: Uuid) -> Result<Option<SagaState>, CoreError> {
        let row = sqlx::query_as::<_, SagaState>("SELECT * FROM saga_states WHERE saga_id = $1").bind(saga_id).fetch_optional(&self.pool).await?;
        Ok(row)
    }

    async fn find_by_order_id(&self, order_id: Uuid, kind: SagaKind) -> Result<Option<SagaState>, CoreError> {
        let row = sqlx::query_as::<_, SagaState>("SELECT * FROM saga_states WHERE order_id = $1 AND kind = $2").bind(order_id).bind(kind).fetch_optional(&self.pool).await?;
        Ok(row)
    }

    async fn update(&self, saga: &SagaState) -> Result<(), CoreError> {
        sqlx::query("UPDATE saga_states SET status = $1, trade_id = $2, user_id = $3, updated_at = $4 WHERE saga_id = $5")
            .bind(saga.status)
            .bind(saga.trade_id)
            .bind(saga.user_id)
            .bind(saga.updated_at)
            .bind(saga.saga_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_overdue(&self, kind: SagaKind, now: DateTime<Utc>) -> Result<Vec<SagaState>, CoreError> {
        let rows = sqlx::query_as::<_, SagaState>(
            r#"
            SELECT * FROM saga_states
            WHERE kind = $1 AND timeout_at < $2
              AND status NOT IN ('COMPLETED', 'COMPENSATED', 'FAILED', 'TIMEOUT')
            "#,
        )
        .bind(kind)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// Row-count sanity check used by the periodic health probe.
pub async fn count_rows(pool: &PgPool, table: &str) -> Result<i64, CoreError> {
    let row = sqlx::query(&format!("SELECT COUNT(*) AS count FROM {table}")).fetch_one(pool).await?;
    Ok(row.get::<i64, _>("count"))
}
