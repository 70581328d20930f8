//! Saga state record, kept local to each service (Order, Matching, Account).
//! Correlated across services only by `saga_id` in event payloads — never
//! shared tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// Which service drives this saga record. Distinguishes the three
/// independent state machines described by the saga orchestration design
/// even though they share a `SagaState` shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "saga_kind", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum SagaKind {
    Order,
    Matching,
    Account,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "saga_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum SagaStatus {
    Started,
    InProgress,
    Completed,
    Compensating,
    Compensated,
    Failed,
    Timeout,
}

impl SagaStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SagaStatus::Completed | SagaStatus::Compensated | SagaStatus::Failed | SagaStatus::Timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SagaState {
    pub saga_id: Uuid,
    pub kind: SagaKind,
    pub trade_id: Option<Uuid>,
    pub order_id: Uuid,
    pub user_id: Option<Uuid>,
    pub symbol: String,
    pub status: SagaStatus,
    pub event_type: String,
    pub payload_snapshot: Value,
    pub timeout_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SagaState {
    pub fn start(kind: SagaKind, order_id: Uuid, symbol: String, event_type: impl Into<String>, payload_snapshot: Value, deadline: chrono::Duration) -> Self {
        let now = Utc::now();
        Self {
            saga_id: Uuid::now_v7(),
            kind,
            trade_id: None,
            order_id,
            user_id: None,
            symbol,
            status: SagaStatus::Started,
            event_type: event_type.into(),
            payload_snapshot,
            timeout_at: now + deadline,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether this record is still active (non-terminal) and past its
    /// deadline, i.e. a candidate for the timeout scanning loop.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.timeout_at < now
    }

    /// Move to a new status, unless the record is already terminal — the
    /// timeout loop and event handlers can race, and a terminal saga must
    /// never be reopened.
    pub fn transition(&mut self, to: SagaStatus) -> Result<(), String> {
        if self.status.is_terminal() {
            return Err(format!("saga {} already terminal ({:?}), cannot move to {:?}", self.saga_id, self.status, to));
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn overdue_only_when_active_and_past_deadline() {
        let mut saga = SagaState::start(SagaKind::Account, Uuid::new_v4(), "AAPL".into(), "TradeExecutedEvent", serde_json::json!({}), Duration::seconds(-1));
        assert!(saga.is_overdue(Utc::now()));
        saga.transition(SagaStatus::Completed).unwrap();
        assert!(!saga.is_overdue(Utc::now()));
    }

    #[test]
    fn terminal_saga_rejects_further_transitions() {
        let mut saga = SagaState::start(SagaKind::Order, Uuid::new_v4(), "AAPL".into(), "OrderCreatedEvent", serde_json::json!({}), Duration::seconds(30));
        saga.transition(SagaStatus::Failed).unwrap();
        assert!(saga.transition(SagaStatus::InProgress).is_err());
    }
}
