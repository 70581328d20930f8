//! Account-side saga: one record per trade, started when `TradeExecutedEvent`
//! triggers confirmation, resolved by `AccountUpdatedEvent` /
//! `AccountUpdateFailedEvent`, or compensated by an incoming
//! `TradeRollbackEvent`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::bus::events::{AccountRollbackEvent, AccountUpdateFailedEvent, AccountUpdatedEvent, EventEnvelope, FailureType, SagaLayer, SagaTimeoutEvent};
use crate::bus::{to_bus_payload, Bus, Topic};
use crate::errors::CoreError;
use crate::models::saga::{SagaKind, SagaState, SagaStatus};
use crate::models::trade::Trade;
use crate::repo::SagaRepository;
use crate::saga::SagaTimeoutHandler;

pub struct AccountSagaService<R: SagaRepository> {
    repo: Arc<R>,
    deadline: ChronoDuration,
}

impl<R: SagaRepository> AccountSagaService<R> {
    pub fn new(repo: Arc<R>, deadline: std::time::Duration) -> Self {
        Self { repo, deadline: ChronoDuration::from_std(deadline).unwrap_or(ChronoDuration::seconds(5)) }
    }

    /// Keyed by `trade.buy_order_id`: the account saga exists per trade, and
    /// a trade has exactly one buy order, so this is a stable correlation
    /// key without needing a separate `find_by_trade_id` query. Like the
    /// other handlers on this type, checks for an existing saga first —
    /// a redelivered `TradeExecutedEvent` must find and return the saga it
    /// already started, not spawn a second row racing it to completion.
    pub async fn start(&self, trade: &Trade, trace_id: &str) -> Result<SagaState, CoreError> {
        if let Some(existing) = self.repo.find_by_order_id(trade.buy_order_id, SagaKind::Account).await? {
            return Ok(existing);
        }
        let mut saga = SagaState::start(
            SagaKind::Account,
            trade.buy_order_id,
            trade.symbol.clone(),
            "TradeExecutedEvent",
            serde_json::json!({"tradeId": trade.id, "traceId": trace_id}),
            self.deadline,
        );
        saga.trade_id = Some(trade.id);
        saga.transition(SagaStatus::InProgress)?;
        self.repo.insert(&saga).await?;
        Ok(saga)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn on_confirmation_succeeded(&self, trade: &Trade, buyer_new_balance: Decimal, seller_new_balance: Decimal, bus: &Arc<dyn Bus>, trace_id: &str) -> Result<(), CoreError> {
        let Some(mut saga) = self.repo.find_by_order_id(trade.buy_order_id, SagaKind::Account).await? else {
            return Ok(());
        };
        if saga.status.is_terminal() {
            return Ok(());
        }
        saga.transition(SagaStatus::Completed)?;
        self.repo.update(&saga).await?;

        let payload = AccountUpdatedEvent {
            saga_id: saga.saga_id,
            trade_id: trade.id,
            order_id: trade.buy_order_id,
            buy_user_id: trade.buy_user_id,
            sell_user_id: trade.sell_user_id,
            amount: trade.notional(),
            quantity: trade.quantity,
            symbol: trade.symbol.clone(),
            buyer_new_balance,
            seller_new_balance,
        };
        publish(bus, Topic::AccountEvents, &trade.symbol, "AccountUpdatedEvent", &trade.buy_order_id.to_string(), trace_id, Some(saga.saga_id), payload).await
    }

    pub async fn on_confirmation_failed(&self, trade: &Trade, reason: &str, failure_type: FailureType, should_retry: bool, bus: &Arc<dyn Bus>, trace_id: &str) -> Result<(), CoreError> {
        let Some(mut saga) = self.repo.find_by_order_id(trade.buy_order_id, SagaKind::Account).await? else {
            return Ok(());
        };
        if saga.status.is_terminal() {
            return Ok(());
        }
        saga.transition(SagaStatus::Failed)?;
        self.repo.update(&saga).await?;

        let payload = AccountUpdateFailedEvent {
            saga_id: saga.saga_id,
            trade_id: Some(trade.id),
            order_id: trade.buy_order_id,
            buy_user_id: trade.buy_user_id,
            sell_user_id: trade.sell_user_id,
            reason: reason.to_string(),
            failure_type,
            should_retry,
        };
        publish(bus, Topic::AccountEvents, &trade.symbol, "AccountUpdateFailedEvent", &trade.buy_order_id.to_string(), trace_id, Some(saga.saga_id), payload).await
    }

    /// Triggered by an incoming `TradeRollbackEvent`: compensates a
    /// previously-completed confirmation. A no-op if the saga never
    /// completed (nothing to undo) or is already terminal.
    pub async fn on_rollback_received(&self, trade: &Trade, reason: &str, bus: &Arc<dyn Bus>, trace_id: &str) -> Result<bool, CoreError> {
        let Some(mut saga) = self.repo.find_by_order_id(trade.buy_order_id, SagaKind::Account).await? else {
            return Ok(false);
        };
        if saga.status != SagaStatus::Completed {
            return Ok(false);
        }
        saga.transition(SagaStatus::Compensated)?;
        self.repo.update(&saga).await?;

        let payload = AccountRollbackEvent { saga_id: saga.saga_id, trade_id: trade.id, order_id: trade.buy_order_id, reason: reason.to_string() };
        publish(bus, Topic::AccountEvents, &trade.symbol, "AccountRollbackEvent", &trade.buy_order_id.to_string(), trace_id, Some(saga.saga_id), payload).await?;
        Ok(true)
    }
}

async fn publish<T: serde::Serialize>(bus: &Arc<dyn Bus>, topic: Topic, partition_key: &str, event_type: &str, aggregate_id: &str, trace_id: &str, saga_id: Option<Uuid>, payload: T) -> Result<(), CoreError> {
    let envelope = EventEnvelope::new(aggregate_id, trace_id, event_type, saga_id, payload);
    let json = to_bus_payload(&envelope).map_err(|e| CoreError::System(e.to_string()))?;
    bus.publish(topic, partition_key, event_type, json).await.map_err(|e| CoreError::Technical(e.to_string()))
}

pub struct AccountSagaTimeoutHandler;

#[async_trait]
impl SagaTimeoutHandler for AccountSagaTimeoutHandler {
    async fn on_timeout(&self, saga: &SagaState, bus: &Arc<dyn Bus>) {
        let payload = SagaTimeoutEvent {
            saga_id: saga.saga_id,
            order_id: saga.order_id,
            trade_id: saga.trade_id,
            failed_at: SagaLayer::Account,
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
    use rust_decimal_macros::dec;
    use std::time::Duration;

    fn trade() -> Trade {
        Trade::new("AAPL".into(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), dec!(150), dec!(10))
    }

    #[tokio::test]
    async fn successful_confirmation_completes_saga_and_publishes() {
        let repo = Arc::new(InMemorySagaRepository::new());
        let service = AccountSagaService::new(repo.clone(), Duration::from_secs(5));
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let mut rx = bus.subscribe(Topic::AccountEvents);
        let trade = trade();

        service.start(&trade, "t").await.unwrap();
        service.on_confirmation_succeeded(&trade, dec!(8500), dec!(1500), &bus, "t").await.unwrap();

        let saga = repo.find_by_order_id(trade.buy_order_id, SagaKind::Account).await.unwrap().unwrap();
        assert_eq!(saga.status, SagaStatus::Completed);
        assert_eq!(rx.try_recv().unwrap().event_type, "AccountUpdatedEvent");
    }

    #[tokio::test]
    async fn failed_confirmation_marks_saga_failed() {
        let repo = Arc::new(InMemorySagaRepository::new());
        let service = AccountSagaService::new(repo.clone(), Duration::from_secs(5));
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let trade = trade();

        service.start(&trade, "t").await.unwrap();
        service.on_confirmation_failed(&trade, "insufficient balance", FailureType::InsufficientBalance, false, &bus, "t").await.unwrap();

        let saga = repo.find_by_order_id(trade.buy_order_id, SagaKind::Account).await.unwrap().unwrap();
        assert_eq!(saga.status, SagaStatus::Failed);
    }

    #[tokio::test]
    async fn rollback_after_completion_compensates_once() {
        let repo = Arc::new(InMemorySagaRepository::new());
        let service = AccountSagaService::new(repo.clone(), Duration::from_secs(5));
        let bus: Arc<dyn Bus> = Arc::new(InMemoryBus::new());
        let trade = trade();

        service.start(&trade, "t").await.unwrap();
        service.on_confirmation_succeeded(&trade, dec!(8500), dec!(1500), &bus, "t").await.unwrap();

        let compensated_first = service.on_rollback_received(&trade, "trade cancelled upstream", &bus, "t").await.unwrap();
        assert!(compensated_first);
        let compensated_second = service.on_rollback_received(&trade, "trade cancelled upstream", &bus, "t").await.unwrap();
        assert!(!compensated_second);

        let saga = repo.find_by_order_id(trade.buy_order_id, SagaKind::Account).await.unwrap().unwrap();
        assert_eq!(saga.status, SagaStatus::Compensated);
    }
}
