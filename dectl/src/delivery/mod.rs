//! The delivery and quality gate: receive a backend's response, persist a
//! deliverable, score it, and close (or park) the request lifecycle.
//!
//! Auto-approve at or above the configured approve threshold with no issues,
//! auto-reject at or below the reject threshold, park for manual review in
//! between. Client callbacks are best-effort: a failed callback never
//! regresses the request's state.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use conductor::{CompletionOutcome, RequestData, RouterError, RouterHandle};

use crate::config::QualitySettings;
use crate::errors::{Error, Result};
use crate::events::{EventTracker, NewEvent};
use crate::quality::{assess, QualityAssessment};
use crate::store::{Deliverable, DeliverableState, Store};
use crate::types::{ContentKind, EventPointer};

pub mod normalize;

/// A backend response, as handed to `deliver`.
#[derive(Debug, Clone)]
pub struct DeliveryInput {
    pub request_id: Uuid,
    pub success: bool,
    pub content_kind: ContentKind,
    pub content: Value,
    pub raw_response: Option<Value>,
    pub error: Option<String>,
}

enum GateDecision {
    Approve,
    Reject,
    Park,
}

pub struct DeliveryService {
    store: Arc<dyn Store>,
    router: RouterHandle,
    tracker: Arc<EventTracker>,
    client: reqwest::Client,
    thresholds: QualitySettings,
}

impl DeliveryService {
    pub fn new(
        store: Arc<dyn Store>,
        router: RouterHandle,
        tracker: Arc<EventTracker>,
        thresholds: QualitySettings,
    ) -> Self {
        Self {
            store,
            router,
            tracker,
            client: reqwest::Client::new(),
            thresholds,
        }
    }

    /// Receive a backend response for a request.
    #[tracing::instrument(skip(self, input), fields(request_id = %input.request_id, success = input.success))]
    pub async fn deliver(&self, input: DeliveryInput) -> Result<Deliverable> {
        let view = self.router.status(input.request_id).await.map_err(|err| match err {
            RouterError::RequestNotFound(id) => Error::NotFound {
                resource: "request",
                id: id.to_string(),
            },
            other => Error::Router(other),
        })?;

        if matches!(view.state(), "completed" | "failed" | "cancelled") {
            return Err(Error::InvalidStatus {
                message: format!("request {} is already {}", input.request_id, view.state()),
            });
        }

        let data = view.request.data.clone();

        if !input.success {
            let error = input.error.clone().unwrap_or_else(|| "backend failure".to_string());
            let deliverable = self
                .build_deliverable(&input, &data.tenant, DeliverableState::Failed, None, Some(error.clone()));
            self.store.insert_deliverable(&deliverable).await?;
            self.track_deliverable("deliverable.created", &deliverable).await;

            // Transient by default: the router applies the retry budget.
            if let Err(err) = self
                .router
                .complete(input.request_id, CompletionOutcome::failure(error))
                .await
            {
                tracing::warn!(error = %err, "Failed to report backend failure to router");
            }
            return Ok(deliverable);
        }

        let assessment = assess(input.content_kind, &input.content);
        let decision = self.gate(&assessment);

        let (state, final_output) = match decision {
            GateDecision::Approve => (
                DeliverableState::Delivered,
                input.content.as_str().map(str::to_string),
            ),
            GateDecision::Reject => (DeliverableState::Rejected, None),
            GateDecision::Park => (DeliverableState::PendingReview, None),
        };

        let mut deliverable = self.build_deliverable(&input, &data.tenant, state, Some(&assessment), None);
        deliverable.final_output = final_output;
        self.store.insert_deliverable(&deliverable).await?;
        self.track_deliverable("deliverable.created", &deliverable).await;

        match decision {
            GateDecision::Approve => {
                self.close_as_completed(&data, &deliverable).await;
            }
            GateDecision::Reject => {
                tracing::info!(
                    deliverable_id = %deliverable.id,
                    score = assessment.score,
                    "Quality auto-reject"
                );
                if let Err(err) = self
                    .router
                    .complete(data.id, CompletionOutcome::terminal_failure("quality auto-reject"))
                    .await
                {
                    tracing::warn!(error = %err, "Failed to report auto-reject to router");
                }
                self.track_rejection(&deliverable, "quality auto-reject").await;
            }
            GateDecision::Park => {
                tracing::info!(
                    deliverable_id = %deliverable.id,
                    score = assessment.score,
                    "Deliverable parked for manual review"
                );
                self.track_deliverable("deliverable.pending_review", &deliverable).await;
            }
        }

        Ok(deliverable)
    }

    /// Normalize a provider-native webhook and feed it through `deliver`.
    pub async fn webhook(&self, provider: &str, body: &Value) -> Result<Deliverable> {
        let normalized = normalize::normalize(provider, body);
        let request_id = normalized.request_id.ok_or(Error::MissingField { field: "request_id" })?;
        self.deliver(DeliveryInput {
            request_id,
            success: normalized.success,
            content_kind: normalized.content_kind,
            content: normalized.content,
            raw_response: Some(body.clone()),
            error: normalized.error,
        })
        .await
    }

    pub async fn get(&self, id: Uuid) -> Result<Deliverable> {
        self.store
            .get_deliverable(id)
            .await?
            .ok_or(Error::NotFound {
                resource: "deliverable",
                id: id.to_string(),
            })
    }

    /// Manually approve a parked deliverable.
    pub async fn approve(&self, id: Uuid) -> Result<Deliverable> {
        let mut deliverable = self.get(id).await?;
        if deliverable.state != DeliverableState::PendingReview {
            return Err(Error::InvalidStatus {
                message: format!(
                    "deliverable {} is {}, only pending_review can be approved",
                    id,
                    deliverable.state.as_str()
                ),
            });
        }

        deliverable.state = DeliverableState::Delivered;
        deliverable.final_output = deliverable.content.as_str().map(str::to_string);
        deliverable.updated_at = Utc::now();
        self.store.update_deliverable(&deliverable).await?;

        match self.router.status(deliverable.request_id).await {
            Ok(view) => self.close_as_completed(&view.request.data, &deliverable).await,
            Err(err) => tracing::warn!(error = %err, "Approved deliverable for unknown request"),
        }

        Ok(deliverable)
    }

    /// Manually reject a parked deliverable.
    pub async fn reject(&self, id: Uuid, reason: Option<String>) -> Result<Deliverable> {
        let mut deliverable = self.get(id).await?;
        if deliverable.state != DeliverableState::PendingReview {
            return Err(Error::InvalidStatus {
                message: format!(
                    "deliverable {} is {}, only pending_review can be rejected",
                    id,
                    deliverable.state.as_str()
                ),
            });
        }

        let reason = reason.unwrap_or_else(|| "rejected by reviewer".to_string());
        deliverable.state = DeliverableState::Rejected;
        deliverable.error = Some(reason.clone());
        deliverable.updated_at = Utc::now();
        self.store.update_deliverable(&deliverable).await?;

        if let Err(err) = self
            .router
            .complete(deliverable.request_id, CompletionOutcome::terminal_failure(reason.clone()))
            .await
        {
            tracing::warn!(error = %err, "Failed to report rejection to router");
        }
        self.track_rejection(&deliverable, &reason).await;

        Ok(deliverable)
    }

    fn gate(&self, assessment: &QualityAssessment) -> GateDecision {
        if assessment.score >= self.thresholds.approve_threshold && assessment.issues.is_empty() {
            GateDecision::Approve
        } else if assessment.score <= self.thresholds.reject_threshold {
            GateDecision::Reject
        } else {
            GateDecision::Park
        }
    }

    fn build_deliverable(
        &self,
        input: &DeliveryInput,
        tenant: &str,
        state: DeliverableState,
        assessment: Option<&QualityAssessment>,
        error: Option<String>,
    ) -> Deliverable {
        let now = Utc::now();
        Deliverable {
            id: Uuid::new_v4(),
            request_id: input.request_id,
            tenant: tenant.to_string(),
            content_kind: input.content_kind,
            content: input.content.clone(),
            raw_response: input.raw_response.clone(),
            quality_score: assessment.map(|a| a.score).unwrap_or(0.0),
            quality_issues: assessment.map(|a| a.issues.clone()).unwrap_or_default(),
            quality_metadata: assessment.map(|a| a.metadata.clone()).unwrap_or_default(),
            state,
            error,
            post_process: vec![],
            final_output: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Approve path shared by the auto gate and manual review: the request
    /// completes and the deliverable is announced, then the client callback
    /// fires best-effort.
    async fn close_as_completed(&self, data: &RequestData, deliverable: &Deliverable) {
        if let Err(err) = self.router.complete(data.id, CompletionOutcome::success()).await {
            tracing::warn!(error = %err, request_id = %data.id, "Failed to report completion to router");
        }
        self.track_deliverable("deliverable.delivered", deliverable).await;
        self.fire_callback(data, deliverable).await;
    }

    async fn fire_callback(&self, data: &RequestData, deliverable: &Deliverable) {
        let Some(url) = &data.callback_url else { return };

        let payload = json!({
            "request_id": data.id,
            "state": "completed",
            "deliverable_id": deliverable.id,
            "content_type": deliverable.content_kind,
            "content": deliverable.content,
            "quality_score": deliverable.quality_score,
        });

        match self.client.post(url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::debug!(request_id = %data.id, url = %url, "Client callback delivered");
            }
            Ok(response) => {
                tracing::warn!(request_id = %data.id, status = %response.status(), "Client callback rejected");
            }
            Err(err) => {
                tracing::warn!(request_id = %data.id, error = %err, "Client callback failed");
            }
        }
    }

    async fn track_deliverable(&self, action: &str, deliverable: &Deliverable) {
        let result = self
            .tracker
            .track(
                NewEvent::new(&deliverable.tenant, action, EventPointer::deliverable(deliverable.id))
                    .with_particular("request_id", json!(deliverable.request_id))
                    .with_particular(
                        "quality_score",
                        json!((deliverable.quality_score * 100.0).round() / 100.0),
                    ),
            )
            .await;
        if let Err(err) = result {
            tracing::warn!(error = %err, action, "Failed to record deliverable event");
        }
    }

    async fn track_rejection(&self, deliverable: &Deliverable, reason: &str) {
        let result = self
            .tracker
            .track(
                NewEvent::new(
                    &deliverable.tenant,
                    "deliverable.rejected",
                    EventPointer::deliverable(deliverable.id),
                )
                .with_particular("request_id", json!(deliverable.request_id))
                .with_particular("reason", json!(reason)),
            )
            .await;
        if let Err(err) = result {
            tracing::warn!(error = %err, "Failed to record rejection event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use conductor::{InMemoryRouterStore, Router, RouterConfig};
    use std::collections::HashMap;
    use tokio_util::sync::CancellationToken;

    struct Harness {
        service: DeliveryService,
        router: Router,
        store: Arc<MemoryStore>,
        _shutdown: CancellationToken,
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let shutdown = CancellationToken::new();
        let router = Router::spawn(
            RouterConfig::default(),
            Arc::new(InMemoryRouterStore::new()),
            shutdown.clone(),
        )
        .await
        .unwrap();
        let tracker = Arc::new(EventTracker::new(store.clone(), None));
        let service = DeliveryService::new(
            store.clone(),
            router.handle.clone(),
            tracker,
            QualitySettings::default(),
        );
        Harness {
            service,
            router,
            store,
            _shutdown: shutdown,
        }
    }

    async fn processing_request(harness: &mut Harness) -> Uuid {
        let data = RequestData {
            id: Uuid::new_v4(),
            tenant: "acme".to_string(),
            app_id: None,
            instance_id: None,
            query: "Write a haiku".to_string(),
            task_type: "text".to_string(),
            provider: "openai".to_string(),
            model: None,
            model_waterfall: vec![],
            priority: 0,
            callback_url: None,
            metadata: HashMap::new(),
            max_retries: 1,
            created_at: Utc::now(),
        };
        let id = data.id;
        harness.router.handle.enqueue(data).await.unwrap();
        harness.router.notifications.recv().await.unwrap();
        id
    }

    #[tokio::test]
    async fn good_text_auto_approves_and_completes_request() {
        let mut harness = harness().await;
        let request_id = processing_request(&mut harness).await;

        let deliverable = harness
            .service
            .deliver(DeliveryInput {
                request_id,
                success: true,
                content_kind: ContentKind::Text,
                content: json!("An old silent pond\nA frog jumps into the pond\nSplash! Silence again."),
                raw_response: None,
                error: None,
            })
            .await
            .unwrap();

        assert_eq!(deliverable.state, DeliverableState::Delivered);
        assert!(deliverable.quality_score > 0.5);

        let view = harness.router.handle.status(request_id).await.unwrap();
        assert_eq!(view.state(), "completed");

        let stored = harness
            .store
            .deliverable_for_request(request_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.id, deliverable.id);
    }

    #[tokio::test]
    async fn unknown_request_is_not_found() {
        let harness = harness().await;
        let result = harness
            .service
            .deliver(DeliveryInput {
                request_id: Uuid::new_v4(),
                success: true,
                content_kind: ContentKind::Text,
                content: json!("hello"),
                raw_response: None,
                error: None,
            })
            .await;
        assert!(matches!(result, Err(Error::NotFound { .. })));
    }

    #[tokio::test]
    async fn backend_failure_retries_then_fails_terminally() {
        let mut harness = harness().await;
        let request_id = processing_request(&mut harness).await;

        // max_retries is 1: first failure requeues
        harness
            .service
            .deliver(DeliveryInput {
                request_id,
                success: false,
                content_kind: ContentKind::Text,
                content: Value::Null,
                raw_response: None,
                error: Some("upstream 503".to_string()),
            })
            .await
            .unwrap();

        let view = harness.router.handle.status(request_id).await.unwrap();
        assert_eq!(view.state(), "queued");
        assert_eq!(view.request.retry_count, 1);

        // Redispatch and fail again: budget exhausted
        harness.router.notifications.recv().await.unwrap();
        harness
            .service
            .deliver(DeliveryInput {
                request_id,
                success: false,
                content_kind: ContentKind::Text,
                content: Value::Null,
                raw_response: None,
                error: Some("upstream 503".to_string()),
            })
            .await
            .unwrap();

        let view = harness.router.handle.status(request_id).await.unwrap();
        assert_eq!(view.state(), "failed");
        assert_eq!(view.request.error.as_deref(), Some("upstream 503"));
    }

    #[tokio::test]
    async fn bad_content_auto_rejects_without_retry() {
        let mut harness = harness().await;
        let request_id = processing_request(&mut harness).await;

        let deliverable = harness
            .service
            .deliver(DeliveryInput {
                request_id,
                success: true,
                content_kind: ContentKind::ImageUrl,
                content: json!("not a url"),
                raw_response: None,
                error: None,
            })
            .await
            .unwrap();

        assert_eq!(deliverable.state, DeliverableState::Rejected);

        let view = harness.router.handle.status(request_id).await.unwrap();
        assert_eq!(view.state(), "failed");
        assert_eq!(view.request.error.as_deref(), Some("quality auto-reject"));
        // The retry budget was not consumed
        assert_eq!(view.request.retry_count, 0);
    }

    #[tokio::test]
    async fn middling_content_parks_then_manual_approve_completes() {
        let mut harness = harness().await;
        let request_id = processing_request(&mut harness).await;

        // Short single-line text: above reject, below approve
        let deliverable = harness
            .service
            .deliver(DeliveryInput {
                request_id,
                success: true,
                content_kind: ContentKind::Text,
                content: json!("ok."),
                raw_response: None,
                error: None,
            })
            .await
            .unwrap();
        assert_eq!(deliverable.state, DeliverableState::PendingReview);

        // Request stays processing while parked
        let view = harness.router.handle.status(request_id).await.unwrap();
        assert_eq!(view.state(), "processing");

        let approved = harness.service.approve(deliverable.id).await.unwrap();
        assert_eq!(approved.state, DeliverableState::Delivered);

        let view = harness.router.handle.status(request_id).await.unwrap();
        assert_eq!(view.state(), "completed");

        // Approving twice is refused
        let again = harness.service.approve(deliverable.id).await;
        assert!(matches!(again, Err(Error::InvalidStatus { .. })));
    }

    #[tokio::test]
    async fn manual_reject_fails_the_request_with_reason() {
        let mut harness = harness().await;
        let request_id = processing_request(&mut harness).await;

        let deliverable = harness
            .service
            .deliver(DeliveryInput {
                request_id,
                success: true,
                content_kind: ContentKind::Text,
                content: json!("ok."),
                raw_response: None,
                error: None,
            })
            .await
            .unwrap();

        harness
            .service
            .reject(deliverable.id, Some("off brief".to_string()))
            .await
            .unwrap();

        let view = harness.router.handle.status(request_id).await.unwrap();
        assert_eq!(view.state(), "failed");
        assert_eq!(view.request.error.as_deref(), Some("off brief"));
    }

    #[tokio::test]
    async fn webhook_without_correlator_is_rejected() {
        let harness = harness().await;
        let result = harness
            .service
            .webhook("unknown-provider", &json!({"content": "orphan"}))
            .await;
        assert!(matches!(result, Err(Error::MissingField { field: "request_id" })));
    }
}
