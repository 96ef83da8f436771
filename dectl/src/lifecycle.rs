//! Background services around the router: the status listener that turns
//! lifecycle transitions into events, and the sweep that reaps in-flight
//! requests whose adapter callback never arrived.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use conductor::{CompletionOutcome, PersistedRequest, RouterHandle};

use crate::config::AdapterSettings;
use crate::events::{EventTracker, NewEvent};
use crate::store::Store;
use crate::types::EventPointer;

/// Map a lifecycle state to its event action. `pending` has no transition
/// event; `request.created` is recorded by intake.
fn action_for(state: &str) -> Option<&'static str> {
    match state {
        "queued" => Some("request.queued"),
        "processing" => Some("request.processing"),
        "completed" => Some("request.completed"),
        "failed" => Some("request.failed"),
        "cancelled" => Some("request.cancelled"),
        _ => None,
    }
}

/// Record an event for every status transition the router broadcasts.
pub fn spawn_status_listener(
    router: RouterHandle,
    tracker: Arc<EventTracker>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let mut rx = router.subscribe();
    tokio::spawn(async move {
        loop {
            let update: PersistedRequest = tokio::select! {
                _ = shutdown.cancelled() => break,
                update = rx.recv() => match update {
                    Ok(update) => update,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "Status listener lagged, events skipped");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            };

            let Some(action) = action_for(&update.state) else { continue };

            let mut event = NewEvent::new(
                update.data.tenant.clone(),
                action,
                EventPointer::request(update.data.id),
            )
            .with_particular("provider", json!(update.data.provider))
            .with_particular("task_type", json!(update.data.task_type))
            .with_particular("retry_count", json!(update.retry_count));
            if let Some(model) = &update.data.model {
                event = event.with_particular("model", json!(model));
            }
            if let Some(error) = &update.error {
                event = event.with_particular("error", json!(error));
            }

            if let Err(err) = tracker.track(event).await {
                tracing::warn!(error = %err, action, "Failed to record lifecycle event");
            }
        }
        tracing::debug!("Status listener exited");
    })
}

/// Periodically fail in-flight requests whose callback deadline has passed.
///
/// A request with a parked deliverable is exempt: its callback did arrive
/// and a reviewer owns the next transition.
pub fn spawn_timeout_sweep(
    router: RouterHandle,
    store: Arc<dyn Store>,
    settings: AdapterSettings,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(settings.sweep_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tick.tick() => {}
            }

            let state = match router.state().await {
                Ok(state) => state,
                Err(err) => {
                    tracing::warn!(error = %err, "Sweep could not read router state");
                    continue;
                }
            };

            let deadline = chrono::Duration::from_std(settings.callback_deadline)
                .unwrap_or_else(|_| chrono::Duration::seconds(600));
            let now = Utc::now();

            for processing in state.processing {
                if now - processing.started_at < deadline {
                    continue;
                }
                match store.deliverable_for_request(processing.request_id).await {
                    Ok(Some(deliverable))
                        if deliverable.state == crate::store::DeliverableState::PendingReview =>
                    {
                        continue;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::warn!(error = %err, "Sweep could not check deliverables");
                        continue;
                    }
                }

                tracing::warn!(
                    request_id = %processing.request_id,
                    provider = %processing.provider,
                    "Reaping request after adapter timeout"
                );
                if let Err(err) = router
                    .complete(
                        processing.request_id,
                        CompletionOutcome::terminal_failure("adapter timeout"),
                    )
                    .await
                {
                    tracing::warn!(error = %err, "Failed to reap timed-out request");
                }
            }
        }
        tracing::debug!("Timeout sweep exited");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::types::EventableKind;
    use conductor::{InMemoryRouterStore, RequestData, Router, RouterConfig};
    use std::collections::HashMap;
    use std::time::Duration;
    use uuid::Uuid;

    fn request_data() -> RequestData {
        RequestData {
            id: Uuid::new_v4(),
            tenant: "acme".to_string(),
            app_id: None,
            instance_id: None,
            query: "q".to_string(),
            task_type: "text".to_string(),
            provider: "openai".to_string(),
            model: None,
            model_waterfall: vec![],
            priority: 0,
            callback_url: None,
            metadata: HashMap::new(),
            max_retries: 0,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn listener_records_lifecycle_events() {
        let store = Arc::new(MemoryStore::new());
        let tracker = Arc::new(EventTracker::new(store.clone(), None));
        let shutdown = CancellationToken::new();
        let mut router = Router::spawn(
            RouterConfig::default(),
            Arc::new(InMemoryRouterStore::new()),
            shutdown.clone(),
        )
        .await
        .unwrap();

        let _listener = spawn_status_listener(router.handle.clone(), tracker.clone(), shutdown.clone());

        let data = request_data();
        let id = data.id;
        router.handle.enqueue(data).await.unwrap();
        router.notifications.recv().await.unwrap();
        router
            .handle
            .complete(id, CompletionOutcome::success())
            .await
            .unwrap();

        // queued, processing, completed arrive asynchronously
        let mut actions = vec![];
        for _ in 0..50 {
            let events = tracker
                .events_for(EventableKind::Request, &id.to_string(), 10, 0)
                .await
                .unwrap();
            actions = events.iter().map(|event| event.action.clone()).collect();
            if actions.len() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(actions.contains(&"request.queued".to_string()));
        assert!(actions.contains(&"request.processing".to_string()));
        assert!(actions.contains(&"request.completed".to_string()));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn sweep_reaps_overdue_in_flight_requests() {
        let store = Arc::new(MemoryStore::new());
        let shutdown = CancellationToken::new();
        let mut router = Router::spawn(
            RouterConfig::default(),
            Arc::new(InMemoryRouterStore::new()),
            shutdown.clone(),
        )
        .await
        .unwrap();

        let data = request_data();
        let id = data.id;
        router.handle.enqueue(data).await.unwrap();
        router.notifications.recv().await.unwrap();

        let settings = AdapterSettings {
            endpoints: HashMap::new(),
            timeout: Duration::from_secs(1),
            sweep_interval: Duration::from_millis(20),
            callback_deadline: Duration::from_millis(0),
        };
        let _sweep = spawn_timeout_sweep(router.handle.clone(), store, settings, shutdown.clone());

        let mut state = String::new();
        for _ in 0..50 {
            state = router.handle.status(id).await.unwrap().state().to_string();
            if state == "failed" {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(state, "failed");
        let view = router.handle.status(id).await.unwrap();
        assert_eq!(view.request.error.as_deref(), Some("adapter timeout"));

        shutdown.cancel();
    }
}
