//! Event envelope and the concrete event payloads carried on each topic.
//!
//! Every event is wrapped in `EventEnvelope` before it hits the bus; the
//! payload itself stays a plain serde-able struct so it can also be stored
//! verbatim as an outbox row's JSON payload.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::order::Order;

/// Bus topic. The partition key is always derived from the payload
/// (symbol for most topics, order id for saga timeouts) — see
/// `derive_partition_key` in `crate::services::outbox::bridge`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    OrderEvents,
    TradeEvents,
    AccountEvents,
    SagaTimeoutEvents,
}

impl Topic {
    pub fn as_str(self) -> &'static str {
        match self {
            Topic::OrderEvents => "order.events",
            Topic::TradeEvents => "trade.events",
            Topic::AccountEvents => "account.events",
            Topic::SagaTimeoutEvents => "saga.timeout.events",
        }
    }
}

/// Envelope wrapping every event published on the bus.
///
/// `saga_id` is optional: an `OrderCreatedEvent` is published before any
/// saga record necessarily exists for it, so downstream handlers must
/// tolerate `None` (orphan-safe handling, per the saga design).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope<T> {
    pub event_id: Uuid,
    pub aggregate_id: String,
    pub occurred_at: DateTime<Utc>,
    pub trace_id: String,
    pub event_type: String,
    pub saga_id: Option<Uuid>,
    pub payload: T,
}

impl<T> EventEnvelope<T> {
    pub fn new(aggregate_id: impl Into<String>, trace_id: impl Into<String>, event_type: impl Into<String>, saga_id: Option<Uuid>, payload: T) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            aggregate_id: aggregate_id.into(),
            occurred_at: Utc::now(),
            trace_id: trace_id.into(),
            event_type: event_type.into(),
            saga_id,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCreatedEvent {
    pub order: Order,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCancelledEvent {
    pub order_id: Uuid,
    pub symbol: String,
    pub user_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeExecutedEvent {
    pub trade_id: Uuid,
    pub symbol: String,
    pub buy_order_id: Uuid,
    pub sell_order_id: Uuid,
    pub buy_user_id: Uuid,
    pub sell_user_id: Uuid,
    pub price: Decimal,
    pub quantity: Decimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeFailedEvent {
    pub order_id: Uuid,
    pub symbol: String,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RollbackType {
    Full,
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRollbackEvent {
    pub saga_id: Uuid,
    pub trade_id: Uuid,
    pub order_id: Uuid,
    pub buy_order_id: Uuid,
    pub sell_order_id: Uuid,
    pub symbol: String,
    pub reason: String,
    pub rollback_type: RollbackType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountUpdatedEvent {
    pub saga_id: Uuid,
    pub trade_id: Uuid,
    pub order_id: Uuid,
    pub buy_user_id: Uuid,
    pub sell_user_id: Uuid,
    pub amount: Decimal,
    pub quantity: Decimal,
    pub symbol: String,
    pub buyer_new_balance: Decimal,
    pub seller_new_balance: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureType {
    InsufficientBalance,
    InsufficientShares,
    LockTimeout,
    ValidationError,
    TechnicalError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountUpdateFailedEvent {
    pub saga_id: Uuid,
    pub trade_id: Option<Uuid>,
    pub order_id: Uuid,
    pub buy_user_id: Uuid,
    pub sell_user_id: Uuid,
    pub reason: String,
    pub failure_type: FailureType,
    pub should_retry: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRollbackEvent {
    pub saga_id: Uuid,
    pub trade_id: Uuid,
    pub order_id: Uuid,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SagaLayer {
    Order,
    Matching,
    Account,
}

impl std::fmt::Display for SagaLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SagaLayer::Order => write!(f, "Order"),
            SagaLayer::Matching => write!(f, "Matching"),
            SagaLayer::Account => write!(f, "Account"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaTimeoutEvent {
    pub saga_id: Uuid,
    pub order_id: Uuid,
    pub trade_id: Option<Uuid>,
    pub failed_at: SagaLayer,
    pub timeout_duration: u64,
    pub metadata: serde_json::Value,
}
