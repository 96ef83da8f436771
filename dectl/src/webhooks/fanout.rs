//! Webhook fan-out: match, sign, send, record.
//!
//! ```text
//! tracker.track()
//!   └─ FanoutHandle.dispatch(event) ── bounded channel ──► run_fanout
//!        ├─ load active subscriptions, filter by match
//!        └─ per (event, subscription): acquire permit, spawn deliver_one
//!             ├─ DB: insert delivery attempt (pending)
//!             ├─ build payload (generic or notification-service shape)
//!             └─ up to max_attempts POSTs with doubling delay
//!                  ├─ 2xx → mark delivered
//!                  └─ exhausted → mark failed + bump subscription failures
//! ```
//!
//! Fan-out never blocks `track` and never regresses the source event; an
//! exhausted delivery only marks its own row and the subscription counter.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::config::WebhookSettings;
use crate::store::{DeliveryAttempt, DeliveryState, Event, Store, Subscription};

use super::{generic_payload, is_notification_service, matches, notification_payload, signing};

/// Outbound event header.
pub const EVENT_HEADER: &str = "X-DE-Event";
/// Delivery id header, unique per (event, subscription).
pub const DELIVERY_HEADER: &str = "X-DE-Delivery";

/// Clone-able entry point for handing events to fan-out.
#[derive(Clone)]
pub struct FanoutHandle {
    tx: mpsc::Sender<Event>,
}

impl FanoutHandle {
    /// Queue an event for fan-out. Never blocks; a full channel drops the
    /// fan-out (at-least-once is best-effort, the event row itself is safe).
    pub fn dispatch(&self, event: Event) {
        if let Err(err) = self.tx.try_send(event) {
            tracing::warn!(error = %err, "Fan-out channel full, dropping webhook dispatch");
        }
    }
}

/// Spawn the fan-out engine. Returns the handle used by the tracker.
pub fn spawn(
    store: Arc<dyn Store>,
    settings: WebhookSettings,
    shutdown: CancellationToken,
) -> (FanoutHandle, tokio::task::JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(settings.channel_capacity);
    let client = reqwest::Client::builder()
        .timeout(settings.timeout)
        .build()
        .expect("failed to build webhook HTTP client");
    let task = tokio::spawn(run_fanout(rx, store, client, settings, shutdown));
    (FanoutHandle { tx }, task)
}

async fn run_fanout(
    mut rx: mpsc::Receiver<Event>,
    store: Arc<dyn Store>,
    client: reqwest::Client,
    settings: WebhookSettings,
    shutdown: CancellationToken,
) {
    let semaphore = Arc::new(Semaphore::new(settings.max_concurrent_sends));

    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!("Webhook fan-out received shutdown signal");
                break;
            }
            event = rx.recv() => match event {
                Some(event) => event,
                None => {
                    tracing::debug!("Fan-out channel closed, exiting");
                    break;
                }
            }
        };

        let subscriptions = match store.active_subscriptions().await {
            Ok(subscriptions) => subscriptions,
            Err(err) => {
                tracing::warn!(error = %err, "Failed to load subscriptions for fan-out");
                continue;
            }
        };

        for subscription in subscriptions {
            if !matches(&subscription, &event) {
                continue;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };

            let store = store.clone();
            let client = client.clone();
            let settings = settings.clone();
            let event = event.clone();

            tokio::spawn(async move {
                let _permit = permit;
                deliver_one(store, client, settings, subscription, event).await;
            });
        }
    }
}

/// Deliver one event to one subscription, with bounded retry.
#[tracing::instrument(skip_all, fields(subscription_id = %subscription.id, event_id = %event.id, action = %event.action))]
async fn deliver_one(
    store: Arc<dyn Store>,
    client: reqwest::Client,
    settings: WebhookSettings,
    subscription: Subscription,
    event: Event,
) {
    let mut delivery = DeliveryAttempt::new(subscription.id, event.id);
    if let Err(err) = store.insert_delivery(&delivery).await {
        tracing::warn!(error = %err, "Failed to record delivery attempt");
        return;
    }

    let notification_shape = is_notification_service(&subscription.url, &settings.notification_hosts);
    let payload = if notification_shape {
        notification_payload(&event, &subscription.url)
    } else {
        generic_payload(&event)
    };
    let body = match serde_json::to_vec(&payload) {
        Ok(body) => body,
        Err(err) => {
            tracing::warn!(error = %err, "Failed to serialize webhook payload");
            return;
        }
    };

    // The signature covers the exact bytes sent; notification-service pushes
    // go unsigned.
    let signature = match (&subscription.secret, notification_shape) {
        (Some(secret), false) => Some(signing::sign(secret, &body)),
        _ => None,
    };

    let mut last_error = String::new();
    let mut delay = settings.initial_backoff;

    for attempt in 1..=settings.max_attempts {
        delivery.attempt_count = attempt;

        let mut request = client
            .post(&subscription.url)
            .header("Content-Type", "application/json")
            .header(EVENT_HEADER, &event.action)
            .header(DELIVERY_HEADER, delivery.id.to_string());
        if let Some(signature) = &signature {
            request = request.header(signing::SIGNATURE_HEADER, signature);
        }

        let mut retry_after = None;
        match request.body(body.clone()).send().await {
            Ok(response) if response.status().is_success() => {
                delivery.state = DeliveryState::Delivered;
                delivery.last_status = Some(response.status().as_u16());
                delivery.updated_at = Utc::now();
                if let Err(err) = store.update_delivery(&delivery).await {
                    tracing::warn!(error = %err, "Failed to mark delivery as delivered");
                }
                tracing::debug!(attempt, status = delivery.last_status, "Webhook delivered");
                return;
            }
            Ok(response) => {
                let status = response.status();
                retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<u64>().ok())
                    .map(Duration::from_secs);
                let excerpt: String = response.text().await.unwrap_or_default().chars().take(256).collect();
                delivery.last_status = Some(status.as_u16());
                delivery.last_body = Some(excerpt);
                last_error = format!("HTTP {}", status.as_u16());
            }
            Err(err) => {
                delivery.last_status = None;
                delivery.last_body = None;
                last_error = err.to_string();
            }
        }

        if attempt < settings.max_attempts {
            delivery.state = DeliveryState::Retrying;
            delivery.updated_at = Utc::now();
            if let Err(err) = store.update_delivery(&delivery).await {
                tracing::warn!(error = %err, "Failed to record retrying delivery");
            }
            // Doubling delay, overridden by a Retry-After hint.
            tokio::time::sleep(retry_after.unwrap_or(delay)).await;
            delay *= 2;
        }
    }

    delivery.state = DeliveryState::Failed;
    delivery.updated_at = Utc::now();
    if let Err(err) = store.update_delivery(&delivery).await {
        tracing::warn!(error = %err, "Failed to mark delivery as failed");
    }
    if let Err(err) = store.record_subscription_failure(subscription.id, &last_error).await {
        tracing::warn!(error = %err, "Failed to bump subscription failure counter");
    }
    tracing::warn!(error = %last_error, attempts = settings.max_attempts, "Webhook delivery exhausted");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::types::{EventPointer, EventableKind};
    use uuid::Uuid;
    use wiremock::matchers::{header, header_exists, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast_settings() -> WebhookSettings {
        WebhookSettings {
            timeout: Duration::from_secs(5),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_concurrent_sends: 8,
            channel_capacity: 16,
            notification_hosts: vec!["ntfy.sh".to_string()],
        }
    }

    fn subscription_to(url: &str, secret: Option<&str>, actions: Vec<&str>) -> Subscription {
        Subscription {
            id: Uuid::new_v4(),
            tenant: "acme".to_string(),
            url: url.to_string(),
            secret: secret.map(str::to_string),
            actions: actions.into_iter().map(str::to_string).collect(),
            user_filter: None,
            eventable_kind_filter: None,
            eventable_id_filter: None,
            active: true,
            failure_count: 0,
            last_failure: None,
            created_at: Utc::now(),
        }
    }

    fn completed_event() -> Event {
        Event {
            id: Uuid::new_v4(),
            tenant: "acme".to_string(),
            user_id: None,
            action: "request.completed".to_string(),
            eventable: EventPointer::new(EventableKind::Request, "r1"),
            particulars: serde_json::Map::new(),
            client_ip: None,
            user_agent: None,
            created_at: Utc::now(),
        }
    }

    async fn run_one(store: Arc<MemoryStore>, event: Event) -> CancellationToken {
        let shutdown = CancellationToken::new();
        let (handle, _task) = spawn(store, fast_settings(), shutdown.clone());
        handle.dispatch(event);
        shutdown
    }

    async fn wait_for_terminal(store: &MemoryStore, event_id: Uuid) -> DeliveryAttempt {
        for _ in 0..100 {
            let deliveries = store.deliveries_for_event(event_id).await.unwrap();
            if let Some(delivery) = deliveries
                .iter()
                .find(|d| matches!(d.state, DeliveryState::Delivered | DeliveryState::Failed))
            {
                return delivery.clone();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("delivery never reached a terminal state");
    }

    #[tokio::test]
    async fn signed_delivery_succeeds_first_try() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header(EVENT_HEADER, "request.completed"))
            .and(header_exists(DELIVERY_HEADER))
            .and(header_exists(signing::SIGNATURE_HEADER))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let subscription = subscription_to(&server.uri(), Some("s3cr3t"), vec!["request.completed"]);
        store.create_subscription(&subscription).await.unwrap();

        let event = completed_event();
        let _shutdown = run_one(store.clone(), event.clone()).await;

        let delivery = wait_for_terminal(&store, event.id).await;
        assert_eq!(delivery.state, DeliveryState::Delivered);
        assert_eq!(delivery.attempt_count, 1);
        assert_eq!(delivery.last_status, Some(200));

        // The signature equals hex(hmac_sha256(secret, body)) over the exact
        // bytes that were sent
        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 1);
        let sent_signature = received[0]
            .headers
            .get(signing::SIGNATURE_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert_eq!(sent_signature, signing::sign("s3cr3t", &received[0].body));
        assert!(signing::verify("s3cr3t", &received[0].body, &sent_signature));
    }

    #[tokio::test]
    async fn unsigned_when_no_secret() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let subscription = subscription_to(&server.uri(), None, vec!["*"]);
        store.create_subscription(&subscription).await.unwrap();

        let event = completed_event();
        let _shutdown = run_one(store.clone(), event.clone()).await;
        wait_for_terminal(&store, event.id).await;

        let received = server.received_requests().await.unwrap();
        assert!(received[0].headers.get(signing::SIGNATURE_HEADER).is_none());
    }

    #[tokio::test]
    async fn three_attempts_then_failed_with_counter_bump() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let subscription = subscription_to(&server.uri(), None, vec!["request.completed"]);
        store.create_subscription(&subscription).await.unwrap();

        let event = completed_event();
        let _shutdown = run_one(store.clone(), event.clone()).await;

        let delivery = wait_for_terminal(&store, event.id).await;
        assert_eq!(delivery.state, DeliveryState::Failed);
        assert_eq!(delivery.attempt_count, 3);
        assert_eq!(delivery.last_status, Some(500));

        let stored = store.get_subscription(subscription.id).await.unwrap().unwrap();
        assert_eq!(stored.failure_count, 1);
        assert_eq!(stored.last_failure.as_deref(), Some("HTTP 500"));
    }

    #[tokio::test]
    async fn network_failure_also_retries_to_exhaustion() {
        let store = Arc::new(MemoryStore::new());
        // Nothing listens on this port
        let subscription = subscription_to("http://127.0.0.1:9", None, vec!["*"]);
        store.create_subscription(&subscription).await.unwrap();

        let event = completed_event();
        let _shutdown = run_one(store.clone(), event.clone()).await;

        let delivery = wait_for_terminal(&store, event.id).await;
        assert_eq!(delivery.state, DeliveryState::Failed);
        assert_eq!(delivery.last_status, None);
    }

    #[tokio::test]
    async fn non_matching_subscription_gets_no_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let subscription = subscription_to(&server.uri(), None, vec!["request.failed"]);
        store.create_subscription(&subscription).await.unwrap();

        let event = completed_event();
        let _shutdown = run_one(store.clone(), event.clone()).await;

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(store.deliveries_for_event(event.id).await.unwrap().is_empty());
    }
}
