//! Intake request/response models.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use conductor::RequestView;

/// Body of `POST /intake`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct SubmitRequest {
    /// Free-form query text. Required.
    pub query: Option<String>,
    /// Submitting tenant; defaults to `default`.
    pub tenant: Option<String>,
    pub user_id: Option<String>,
    pub app_id: Option<String>,
    pub instance_id: Option<String>,
    /// Pinned task type; skips classification when present.
    pub task_type: Option<String>,
    /// Preferred provider.
    pub provider: Option<String>,
    /// Preferred model.
    pub model: Option<String>,
    /// Overrides `model` when both are present.
    pub primary_model: Option<String>,
    /// Ordered fallback models.
    pub model_waterfall: Option<Vec<String>>,
    pub priority: Option<u32>,
    pub callback_url: Option<String>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
    /// Repository the work applies to; forces `code` classification.
    pub repo_url: Option<String>,
    /// Preferred executor, an alias for `provider` used by code tasks.
    pub executor: Option<String>,
    pub timeout_ms: Option<u64>,
    /// Client-supplied id for idempotent resubmission.
    pub request_id: Option<Uuid>,
    pub max_retries: Option<u32>,
}

/// 202 response of `POST /intake`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmitResponse {
    pub request_id: Uuid,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_wait_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_handle: Option<String>,
    pub task_type: String,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub confidence: f64,
}

/// Response of `GET /status`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub request_id: Uuid,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_wait_ms: Option<u64>,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queued_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<RequestView> for StatusResponse {
    fn from(view: RequestView) -> Self {
        Self {
            request_id: view.request.data.id,
            state: view.request.state.clone(),
            queue_position: view.queue_position,
            estimated_wait_ms: view.estimated_wait_ms,
            retry_count: view.request.retry_count,
            error: view.request.error.clone(),
            provider: view.request.data.provider.clone(),
            model: view.request.data.model.clone(),
            created_at: view.request.data.created_at,
            queued_at: view.request.queued_at,
            started_at: view.request.started_at,
            completed_at: view.request.completed_at,
        }
    }
}

/// Body of `POST /cancel`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelRequest {
    pub request_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CancelResponse {
    pub request_id: Uuid,
    pub state: String,
}
