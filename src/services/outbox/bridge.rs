//! Publish path of the transactional outbox pattern: routes each pending
//! outbox row to its bus topic, derives a per-symbol partition key, and
//! enriches the payload before handing it to the `Bus`.

use std::sync::Arc;

use serde_json::Value;
use tracing::{info, warn};

use crate::bus::{Bus, Topic};
use crate::models::outbox::OutboxRecord;
use crate::repo::OutboxRepository;

use super::errors::OutboxError;

/// Routes an `eventType` to its topic. Unknown types fall back to
/// `order.events` with a warning rather than being dropped.
fn route_topic(event_type: &str) -> Topic {
    match event_type {
        "OrderCreatedEvent" | "OrderCancelledEvent" => Topic::OrderEvents,
        "TradeExecutedEvent" | "TradeFailedEvent" | "TradeRollbackEvent" => Topic::TradeEvents,
        "AccountUpdatedEvent" | "AccountUpdateFailedEvent" | "AccountRollbackEvent" => Topic::AccountEvents,
        "SagaTimeoutEvent" => Topic::SagaTimeoutEvents,
        other => {
            warn!(event_type = other, "unknown outbox event type, routing to default topic");
            Topic::OrderEvents
        }
    }
}

/// The partition key is the payload's `symbol` field when present,
/// otherwise the outbox row's `aggregateId` — guaranteeing every event for
/// one symbol lands in the same partition (per-symbol FIFO).
pub fn derive_partition_key(payload: &Value, aggregate_id: &str) -> String {
    payload
        .get("symbol")
        .and_then(Value::as_str)
        .or_else(|| payload.get("order").and_then(|o| o.get("symbol")).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| aggregate_id.to_string())
}

/// Adds `sagaId`/`tradeId`/`eventType` to the stored payload before
/// publishing, matching the envelope shape every consumer expects.
fn enrich_payload(record: &OutboxRecord) -> Value {
    let mut payload = record.payload.clone();
    if let Value::Object(ref mut map) = payload {
        map.entry("eventType").or_insert_with(|| Value::String(record.event_type.clone()));
        map.entry("sagaId").or_insert(Value::Null);
        map.entry("tradeId").or_insert(Value::Null);
        map.entry("aggregateId").or_insert_with(|| Value::String(record.aggregate_id.clone()));
    }
    payload
}

pub struct OutboxCdcBridge<X: OutboxRepository> {
    outbox: Arc<X>,
    bus: Arc<dyn Bus>,
}

impl<X: OutboxRepository> OutboxCdcBridge<X> {
    pub fn new(outbox: Arc<X>, bus: Arc<dyn Bus>) -> Self {
        Self { outbox, bus }
    }

    /// Publishes up to `limit` pending rows. Publish failures are logged
    /// and the row is left PENDING for the next pass — at-least-once
    /// delivery, never silently dropped.
    pub async fn publish_pending(&self, limit: i64) -> Result<usize, OutboxError> {
        let pending = self.outbox.fetch_pending(limit).await?;
        let mut published = 0;
        for record in pending {
            let topic = route_topic(&record.event_type);
            let partition_key = derive_partition_key(&record.payload, &record.aggregate_id);
            let enriched = enrich_payload(&record);

            match self.bus.publish(topic, &partition_key, &record.event_type, enriched).await {
                Ok(()) => {
                    self.outbox.mark_published(record.id).await?;
                    published += 1;
                }
                Err(e) => warn!(outbox_id = %record.id, event_type = %record.event_type, error = %e, "failed to publish outbox row, will retry next pass"),
            }
        }
        if published > 0 {
            info!(published, "outbox bridge published pending rows");
        }
        Ok(published)
    }
}
