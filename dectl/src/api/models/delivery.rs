//! Delivery request/response models.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::store::Deliverable;

/// Body of `POST /deliver`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct DeliverRequest {
    pub request_id: Option<Uuid>,
    /// Defaults to true.
    pub success: Option<bool>,
    /// Content kind: text, image_url, audio_url, video_url, structured.
    pub content_type: Option<String>,
    pub content: Option<serde_json::Value>,
    pub raw_response: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Response of `POST /deliver` and `POST /webhook`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeliverResponse {
    pub deliverable_id: Uuid,
    pub request_id: Uuid,
    pub state: String,
    pub quality_score: f64,
}

impl From<&Deliverable> for DeliverResponse {
    fn from(deliverable: &Deliverable) -> Self {
        Self {
            deliverable_id: deliverable.id,
            request_id: deliverable.request_id,
            state: deliverable.state.as_str().to_string(),
            quality_score: deliverable.quality_score,
        }
    }
}

/// Full deliverable, returned by `GET /deliverable`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeliverableResponse {
    pub id: Uuid,
    pub request_id: Uuid,
    pub tenant: String,
    pub content_type: String,
    pub content: serde_json::Value,
    pub quality_score: f64,
    pub quality_issues: Vec<String>,
    pub quality_metadata: HashMap<String, f64>,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_output: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Deliverable> for DeliverableResponse {
    fn from(deliverable: Deliverable) -> Self {
        Self {
            id: deliverable.id,
            request_id: deliverable.request_id,
            tenant: deliverable.tenant,
            content_type: deliverable.content_kind.as_str().to_string(),
            content: deliverable.content,
            quality_score: deliverable.quality_score,
            quality_issues: deliverable.quality_issues,
            quality_metadata: deliverable.quality_metadata,
            state: deliverable.state.as_str().to_string(),
            error: deliverable.error,
            final_output: deliverable.final_output,
            created_at: deliverable.created_at,
            updated_at: deliverable.updated_at,
        }
    }
}

/// Body of `POST /approve`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ApproveRequest {
    pub deliverable_id: Option<Uuid>,
}

/// Body of `POST /reject`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct RejectRequest {
    pub deliverable_id: Option<Uuid>,
    pub reason: Option<String>,
}
