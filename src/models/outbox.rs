//! Transactional outbox row. Written in the same DB transaction as the
//! aggregate mutation it describes; picked up and published by the
//! Outbox/CDC Bridge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "outbox_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum OutboxStatus {
    Pending,
    Published,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: Value,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// Build a pending row ready to be inserted in the same transaction as
    /// the aggregate write it describes.
    pub fn new(aggregate_type: impl Into<String>, aggregate_id: impl Into<String>, event_type: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            payload,
            status: OutboxStatus::Pending,
            created_at: Utc::now(),
            published_at: None,
        }
    }

    pub fn mark_published(&mut self) {
        self.status = OutboxStatus::Published;
        self.published_at = Some(Utc::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_record_starts_pending() {
        let rec = OutboxRecord::new("Order", "order-1", "OrderCreatedEvent", serde_json::json!({"orderId": "order-1"}));
        assert_eq!(rec.status, OutboxStatus::Pending);
        assert!(rec.published_at.is_none());
    }

    #[test]
    fn mark_published_sets_timestamp() {
        let mut rec = OutboxRecord::new("Order", "order-1", "OrderCreatedEvent", serde_json::json!({}));
        rec.mark_published();
        assert_eq!(rec.status, OutboxStatus::Published);
        assert!(rec.published_at.is_some());
    }
}
