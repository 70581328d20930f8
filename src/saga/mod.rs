//! Generic saga timeout scanner shared by all three saga layers (order,
//! matching, account). Each service supplies its own repository and a
//! handler for what "timed out" means at that layer — publishing the
//! right failure event and touching the right aggregate.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{error, info};

use crate::bus::Bus;
use crate::models::saga::{SagaKind, SagaState, SagaStatus};
use crate::repo::SagaRepository;

#[async_trait]
pub trait SagaTimeoutHandler: Send + Sync {
    async fn on_timeout(&self, saga: &SagaState, bus: &Arc<dyn Bus>);
}

/// Runs forever on its own task, polling every `poll_interval` for sagas of
/// `kind` whose deadline has passed. Per the spec this should run every
/// 2-5 seconds per service; callers pick where in that range to sit.
pub fn spawn_timeout_loop<R>(repo: Arc<R>, kind: SagaKind, poll_interval: Duration, bus: Arc<dyn Bus>, handler: Arc<dyn SagaTimeoutHandler>) -> tokio::task::JoinHandle<()>
where
    R: SagaRepository + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(poll_interval).await;
            let now = Utc::now();
            match repo.find_overdue(kind, now).await {
                Ok(overdue) => {
                    for mut saga in overdue {
                        if saga.transition(SagaStatus::Timeout).is_err() {
                            // raced with a terminal transition elsewhere; nothing to do
                            continue;
                        }
                        if let Err(err) = repo.update(&saga).await {
                            error!(saga_id = %saga.saga_id, error = %err, "failed to persist timeout transition");
                            continue;
                        }
                        info!(saga_id = %saga.saga_id, kind = ?kind, "saga timed out");
                        handler.on_timeout(&saga, &bus).await;
                    }
                }
                Err(err) => error!(kind = ?kind, error = %err, "failed to scan for overdue sagas"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::repo::memory::InMemorySagaRepository;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct CountingHandler(Arc<AtomicUsize>);

    #[async_trait]
    impl SagaTimeoutHandler for CountingHandler {
        async fn on_timeout(&self, _saga: &SagaState, _bus: &Arc<dyn Bus>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn overdue_saga_is_marked_timeout_and_handler_invoked() {
        let repo = Arc::new(InMemorySagaRepository::new());
        let saga = SagaState::start(SagaKind::Account, Uuid::new_v4(), "AAPL".into(), "TradeExecutedEvent", serde_json::json!({}), chrono::Duration::milliseconds(-1));
        let saga_id = saga.saga_id;
        repo.insert(&saga).await.unwrap();

        let count = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(CountingHandler(count.clone()));
        let handle = spawn_timeout_loop(repo.clone(), SagaKind::Account, Duration::from_millis(10), Arc::new(InMemoryBus::new()), handler);

        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        let stored = repo.find_by_id(saga_id).await.unwrap().unwrap();
        assert_eq!(stored.status, SagaStatus::Timeout);
    }
}
