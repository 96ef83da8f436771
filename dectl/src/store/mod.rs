//! Durable storage for deliverables, events, the activity feed, webhook
//! subscriptions, and delivery attempts.
//!
//! The [`Store`] trait has an in-memory implementation for tests and
//! single-process deployments, and a PostgreSQL implementation behind the
//! `postgres` feature. Events are append-only: nothing here updates or
//! deletes an event row, and the event + feed-item pair is written
//! atomically so the feed can never disagree with its event.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{ContentKind, EventPointer, EventableKind};

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors from the durable store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: String },

    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(not(feature = "postgres"))]
    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

// ============================================================================
// Deliverables
// ============================================================================

/// Approval state of a deliverable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverableState {
    PendingReview,
    Approved,
    Rejected,
    Delivered,
    Failed,
}

impl DeliverableState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingReview => "pending_review",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending_review" => Some(Self::PendingReview),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "delivered" => Some(Self::Delivered),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// The stored result of a single backend attempt for a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deliverable {
    pub id: Uuid,
    pub request_id: Uuid,
    pub tenant: String,
    pub content_kind: ContentKind,
    pub content: serde_json::Value,
    pub raw_response: Option<serde_json::Value>,
    pub quality_score: f64,
    pub quality_issues: Vec<String>,
    pub quality_metadata: HashMap<String, f64>,
    pub state: DeliverableState,
    pub error: Option<String>,
    /// Optional post-processing chain, applied after approval.
    pub post_process: Vec<String>,
    pub final_output: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Events and activity feed
// ============================================================================

/// An immutable record of a domain-meaningful transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub tenant: String,
    pub user_id: Option<String>,
    /// Dotted action identifier, e.g. `request.completed`.
    pub action: String,
    pub eventable: EventPointer,
    pub particulars: serde_json::Map<String, serde_json::Value>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Which feed a projected item lands in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedBucket {
    Global,
    User,
    Project,
    Instance,
}

impl FeedBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Global => "global",
            Self::User => "user",
            Self::Project => "project",
            Self::Instance => "instance",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "global" => Some(Self::Global),
            "user" => Some(Self::User),
            "project" => Some(Self::Project),
            "instance" => Some(Self::Instance),
            _ => None,
        }
    }
}

/// Human-readable projection of one event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityFeedItem {
    pub id: Uuid,
    pub tenant: String,
    pub user_id: Option<String>,
    pub event_id: Uuid,
    pub bucket: FeedBucket,
    pub title: String,
    pub description: String,
    pub icon: String,
    pub link: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// Filters for feed queries.
#[derive(Debug, Clone, Default)]
pub struct FeedQuery {
    pub bucket: Option<FeedBucket>,
    pub user: Option<String>,
    pub unread_only: bool,
    pub limit: i64,
    pub offset: i64,
}

// ============================================================================
// Subscriptions and delivery attempts
// ============================================================================

/// A persistent interest in a set of event actions, delivered by HTTP POST.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: Uuid,
    pub tenant: String,
    pub url: String,
    pub secret: Option<String>,
    /// Subscribed actions; may contain the wildcard `*`.
    pub actions: Vec<String>,
    pub user_filter: Option<String>,
    pub eventable_kind_filter: Option<EventableKind>,
    pub eventable_id_filter: Option<String>,
    pub active: bool,
    pub failure_count: u32,
    pub last_failure: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Delivery state of one (event, subscription) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryState {
    Pending,
    Delivered,
    Failed,
    Retrying,
}

impl DeliveryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
            Self::Retrying => "retrying",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(Self::Pending),
            "delivered" => Some(Self::Delivered),
            "failed" => Some(Self::Failed),
            "retrying" => Some(Self::Retrying),
            _ => None,
        }
    }
}

/// One webhook delivery and its attempt history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    pub id: Uuid,
    pub subscription_id: Uuid,
    pub event_id: Uuid,
    pub state: DeliveryState,
    pub attempt_count: u32,
    pub last_status: Option<u16>,
    pub last_body: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DeliveryAttempt {
    pub fn new(subscription_id: Uuid, event_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            subscription_id,
            event_id,
            state: DeliveryState::Pending,
            attempt_count: 0,
            last_status: None,
            last_body: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// The trait
// ============================================================================

/// Durable store for the service's entities.
#[async_trait]
pub trait Store: Send + Sync {
    // --- deliverables ---
    async fn insert_deliverable(&self, deliverable: &Deliverable) -> Result<()>;
    async fn get_deliverable(&self, id: Uuid) -> Result<Option<Deliverable>>;
    /// Most recent deliverable for a request.
    async fn deliverable_for_request(&self, request_id: Uuid) -> Result<Option<Deliverable>>;
    async fn update_deliverable(&self, deliverable: &Deliverable) -> Result<()>;

    // --- events + feed (written atomically) ---
    async fn insert_event(&self, event: &Event, feed_item: Option<&ActivityFeedItem>) -> Result<()>;
    async fn events_for(
        &self,
        kind: EventableKind,
        id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Event>>;
    async fn event_counts(
        &self,
        tenant: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<HashMap<String, i64>>;
    async fn feed(&self, tenant: &str, query: &FeedQuery) -> Result<Vec<ActivityFeedItem>>;
    /// Returns how many items were newly marked read.
    async fn mark_read(&self, tenant: &str, ids: &[Uuid]) -> Result<u64>;

    // --- subscriptions ---
    async fn create_subscription(&self, subscription: &Subscription) -> Result<()>;
    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>>;
    async fn list_subscriptions(&self, tenant: Option<&str>) -> Result<Vec<Subscription>>;
    async fn update_subscription(&self, subscription: &Subscription) -> Result<()>;
    async fn delete_subscription(&self, id: Uuid) -> Result<bool>;
    /// All active subscriptions, for fan-out matching.
    async fn active_subscriptions(&self) -> Result<Vec<Subscription>>;
    /// Bump the cumulative failure counter after an exhausted delivery.
    async fn record_subscription_failure(&self, id: Uuid, error: &str) -> Result<()>;

    // --- delivery attempts ---
    async fn insert_delivery(&self, delivery: &DeliveryAttempt) -> Result<()>;
    async fn update_delivery(&self, delivery: &DeliveryAttempt) -> Result<()>;
    async fn deliveries_for_event(&self, event_id: Uuid) -> Result<Vec<DeliveryAttempt>>;
}
