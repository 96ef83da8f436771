//! Event and activity feed models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::store::{ActivityFeedItem, Event};

/// Body of `POST /events`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct EventCreate {
    pub tenant: Option<String>,
    pub user_id: Option<String>,
    /// Dotted action identifier, e.g. `request.completed`. Required.
    pub action: Option<String>,
    /// Eventable kind: request, deliverable, subscription, instance, project.
    pub eventable_type: Option<String>,
    pub eventable_id: Option<String>,
    /// Action-specific structured data; must be a JSON object.
    pub particulars: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct EventResponse {
    pub id: Uuid,
    pub tenant: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub action: String,
    pub eventable_type: String,
    pub eventable_id: String,
    pub particulars: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<Event> for EventResponse {
    fn from(event: Event) -> Self {
        Self {
            id: event.id,
            tenant: event.tenant,
            user_id: event.user_id,
            action: event.action,
            eventable_type: event.eventable.kind.as_str().to_string(),
            eventable_id: event.eventable.id,
            particulars: serde_json::Value::Object(event.particulars),
            created_at: event.created_at,
        }
    }
}

/// Query of `GET /feed`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct FeedParams {
    pub tenant: Option<String>,
    /// global, user, project, or instance
    pub bucket: Option<String>,
    pub user: Option<String>,
    pub unread_only: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct FeedItemResponse {
    pub id: Uuid,
    pub event_id: Uuid,
    pub bucket: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub title: String,
    pub description: String,
    pub icon: String,
    pub link: String,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl From<ActivityFeedItem> for FeedItemResponse {
    fn from(item: ActivityFeedItem) -> Self {
        Self {
            id: item.id,
            event_id: item.event_id,
            bucket: item.bucket.as_str().to_string(),
            user_id: item.user_id,
            title: item.title,
            description: item.description,
            icon: item.icon,
            link: item.link,
            read: item.read,
            created_at: item.created_at,
        }
    }
}

/// Body of `POST /feed/read`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct MarkReadRequest {
    pub tenant: Option<String>,
    #[serde(default)]
    pub ids: Vec<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MarkReadResponse {
    pub marked: u64,
}

/// Query of `GET /events`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct EntityEventsParams {
    pub kind: Option<String>,
    pub id: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Query of `GET /events/counts`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CountsParams {
    pub tenant: Option<String>,
    /// RFC 3339 timestamp lower bound.
    pub since: Option<String>,
}
