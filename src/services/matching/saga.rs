//! Matching-side saga: tracks one record per matched order from the moment
//! it's handed to the engine until a trade is emitted, the engine raises an
//! exception, or the order is cancelled out from under it.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use uuid::Uuid;

use crate::bus::events::{EventEnvelope, RollbackType, SagaLayer, SagaTimeoutEvent, TradeRollbackEvent};
use crate::bus::{to_bus_payload, Bus, Topic};
use crate::errors::CoreError;
use crate::models::saga::{SagaKind, SagaState, SagaStatus};
use crate::repo::SagaRepository;
use crate::saga::SagaTimeoutHandler;

pub struct MatchingSagaService<R: SagaRepository> {
    repo: Arc<R>,
    deadline: ChronoDuration,
}

impl<R: SagaRepository> MatchingSagaService<R> {
    pub fn new(repo: Arc<R>, deadline: std::time::Duration) -> Self {
        Self { repo, deadline: ChronoDuration::from_std(deadline).unwrap_or(ChronoDuration::seconds(10)) }
    }

    pub async fn start(&self, order_id: Uuid, symbol: &str, trace_id: &str) -> Result<SagaState, CoreError> {
        let mut saga = SagaState::start(SagaKind::Matching, order_id, symbol.to_string(), "OrderCreatedEvent", serde_json::json!({"traceId": trace_id}), self.deadline);
        saga.transition(SagaStatus::InProgress)?;
        self.repo.insert(&saga).await?;
        Ok(saga)
    }

    pub async fn on_trade_emitted(&self, order_id: Uuid) -> Result<(), CoreError> {
        let Some(mut saga) = self.repo.find_by_order_id(order_id, SagaKind::Matching).await? else {
            return Ok(()); // orphan-safe: no saga record is not an error here
        };
        if saga.status.is_terminal() {
            return Ok(()); // idempotent: re-delivery for a terminal saga is a no-op
        }
        saga.transition(SagaStatus::Completed)?;
        self.repo.update(&saga).await
    }

    pub async fn on_engine_exception(&self, order_id: Uuid) -> Result<(), CoreError> {
        let Some(mut saga) = self.repo.find_by_order_id(order_id, SagaKind::Matching).await? else {
            return Ok(());
        };
        if saga.status.is_terminal() {
            return Ok(());
        }
        saga.transition(SagaStatus::Failed)?;
        self.repo.update(&saga).await
    }

    /// Cancel received while the saga is still in progress: emit a rollback
    /// event (no trade exists yet, so this is a `FULL` rollback of the
    /// matching attempt) and move to COMPENSATED.
    pub async fn on_cancel_received(&self, order_id: Uuid, bus: &Arc<dyn Bus>, trace_id: &str) -> Result<(), CoreError> {
        let Some(mut saga) = self.repo.find_by_order_id(order_id, SagaKind::Matching).await? else {
            return Ok(());
        };
        if saga.status != SagaStatus::InProgress {
            return Ok(());
        }
        saga.transition(SagaStatus::Compensated)?;
        self.repo.update(&saga).await?;

        let payload = TradeRollbackEvent {
            saga_id: saga.saga_id,
            trade_id: Uuid::nil(),
            order_id,
            buy_order_id: Uuid::nil(),
            sell_order_id: Uuid::nil(),
            symbol: saga.symbol.clone(),
            reason: "cancelled while matching in progress".to_string(),
            rollback_type: RollbackType::Full,
        };
        let envelope = EventEnvelope::new(order_id.to_string(), trace_id, "TradeRollbackEvent", Some(saga.saga_id), payload);
        let json = to_bus_payload(&envelope).map_err(|e| CoreError::System(e.to_string()))?;
        bus.publish(Topic::TradeEvents, &saga.symbol, "TradeRollbackEvent", json).await.map_err(|e| CoreError::Technical(e.to_string()))?;
        Ok(())
    }
}

/// Wired into `saga::spawn_timeout_loop` for `SagaKind::Matching`.
pub struct MatchingSagaTimeoutHandler;

#[async_trait]
impl SagaTimeoutHandler for MatchingSagaTimeoutHandler {
    async fn on_timeout(&self, saga: &SagaState, bus: &Arc<dyn Bus>) {
        let payload = SagaTimeoutEvent {
            saga_id: saga.saga_id,
            order_id: saga.order_id,
            trade_id: saga.trade_id,
            failed_at: SagaLayer::Matching,
            timeout_duration: (saga.timeout_at - saga.created_at).num_seconds().max(0) as u64,
            metadata: serde_json::json!({}),
        };
        let envelope = EventEnvelope::new(saga.order_id.to_string(), "saga-timeout", "SagaTimeoutEvent", Some(saga.saga_id), payload);
        if let Ok(json) = to_bus_payload(&envelope) {
            let _ = bus.publish(Topic::SagaTimeoutEvents, &saga.order_id.to_string(), "SagaTimeoutEvent", json).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::repo::memory::InMemorySagaRepository;
    use std::time::Duration;

    #[tokio::test]
    async fn trade_emitted_completes_saga() {
        let repo = Arc::new(InMemorySagaRepository::new());
        let service = MatchingSagaService::new(repo.clone(), Duration::from_secs(10));
        let order_id = Uuid::new_v4();
        service.start(order_id, "AAPL", "t").await.unwrap();
        service.on_trade_emitted(order_id).await.unwrap();
        let saga = repo.find_by_order_id(order_id, SagaKind::Matching).await.unwrap().unwrap();
        assert_eq!(saga.status, SagaStatus::Completed);
    }

    #[tokio::test]
    async fn cancel_while_in_progress_emits_rollback_and_compensates() {
        let repo = Arc::new(InMemorySagaRepository::new());
        let service = MatchingSagaService::new(repo.clone(), Duration::from_secs(10));
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let mut rx = bus.subscribe(Topic::TradeEvents);
        let order_id = Uuid::new_v4();
        service.start(order_id, "AAPL", "t").await.unwrap();
        service.on_cancel_received(order_id, &bus, "t").await.unwrap();

        let saga = repo.find_by_order_id(order_id, SagaKind::Matching).await.unwrap().unwrap();
        assert_eq!(saga.status, SagaStatus::Compensated);
        let msg = rx.try_recv().unwrap();
        assert_eq!(msg.event_type, "TradeRollbackEvent");
    }

    #[tokio::test]
    async fn engine_exception_fails_saga() {
        let repo = Arc::new(InMemorySagaRepository::new());
        let service = MatchingSagaService::new(repo.clone(), Duration::from_secs(10));
        let order_id = Uuid::new_v4();
        service.start(order_id, "AAPL", "t").await.unwrap();
        service.on_engine_exception(order_id).await.unwrap();
        let saga = repo.find_by_order_id(order_id, SagaKind::Matching).await.unwrap().unwrap();
        assert_eq!(saga.status, SagaStatus::Failed);
    }

    #[tokio::test]
    async fn engine_exception_after_completion_is_a_no_op() {
        let repo = Arc::new(InMemorySagaRepository::new());
        let service = MatchingSagaService::new(repo.clone(), Duration::from_secs(10));
        let order_id = Uuid::new_v4();
        service.start(order_id, "AAPL", "t").await.unwrap();
        service.on_trade_emitted(order_id).await.unwrap();
        service.on_engine_exception(order_id).await.unwrap();
        let saga = repo.find_by_order_id(order_id, SagaKind::Matching).await.unwrap().unwrap();
        assert_eq!(saga.status, SagaStatus::Completed, "a terminal saga must not be knocked back to Failed by a late exception");
    }

    #[tokio::test]
    async fn redelivery_after_completion_is_a_no_op() {
        let repo = Arc::new(InMemorySagaRepository::new());
        let service = MatchingSagaService::new(repo.clone(), Duration::from_secs(10));
        let order_id = Uuid::new_v4();
        service.start(order_id, "AAPL", "t").await.unwrap();
        service.on_trade_emitted(order_id).await.unwrap();
        // second delivery must not error and must not un-terminal the saga
        service.on_trade_emitted(order_id).await.unwrap();
        let saga = repo.find_by_order_id(order_id, SagaKind::Matching).await.unwrap().unwrap();
        assert_eq!(saga.status, SagaStatus::Completed);
    }
}
