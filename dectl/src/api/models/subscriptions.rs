//! Subscription CRUD models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::store::Subscription;

/// Body of `POST /subscriptions`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubscriptionCreate {
    pub tenant: Option<String>,
    /// Target webhook URL. Required.
    pub url: Option<String>,
    /// Shared secret for `X-DE-Signature`.
    pub secret: Option<String>,
    /// Subscribed actions; defaults to the wildcard.
    pub actions: Option<Vec<String>>,
    pub user: Option<String>,
    /// Eventable-kind filter.
    pub eventable_type: Option<String>,
    pub eventable_id: Option<String>,
}

/// Body of `PATCH /subscriptions/{id}`.
#[derive(Debug, Deserialize, ToSchema)]
pub struct SubscriptionUpdate {
    pub url: Option<String>,
    pub secret: Option<String>,
    pub actions: Option<Vec<String>>,
    pub active: Option<bool>,
}

/// Subscription as returned by the API; the secret is never echoed.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubscriptionResponse {
    pub id: Uuid,
    pub tenant: String,
    pub url: String,
    pub actions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eventable_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eventable_id: Option<String>,
    pub active: bool,
    pub failure_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(subscription: Subscription) -> Self {
        Self {
            id: subscription.id,
            tenant: subscription.tenant,
            url: subscription.url,
            actions: subscription.actions,
            user: subscription.user_filter,
            eventable_type: subscription
                .eventable_kind_filter
                .map(|kind| kind.as_str().to_string()),
            eventable_id: subscription.eventable_id_filter,
            active: subscription.active,
            failure_count: subscription.failure_count,
            last_failure: subscription.last_failure,
            created_at: subscription.created_at,
        }
    }
}
