//! The event tracker: the durable memory of the system.
//!
//! Every state transition of interest calls [`EventTracker::track`], which
//! assigns an id and timestamp, appends the event row, projects an activity
//! feed item when the action has a template, and hands the event to webhook
//! fan-out without blocking the caller.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::store::{
    ActivityFeedItem, Event, FeedBucket, FeedQuery, Result, Store,
};
use crate::types::{deep_link, EventPointer, EventableKind};
use crate::webhooks::fanout::FanoutHandle;

pub mod templates;

/// Input to `track`: an event before id and timestamp assignment.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub tenant: String,
    pub user_id: Option<String>,
    pub action: String,
    pub eventable: EventPointer,
    pub particulars: serde_json::Map<String, serde_json::Value>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl NewEvent {
    pub fn new(tenant: impl Into<String>, action: impl Into<String>, eventable: EventPointer) -> Self {
        Self {
            tenant: tenant.into(),
            user_id: None,
            action: action.into(),
            eventable,
            particulars: serde_json::Map::new(),
            client_ip: None,
            user_agent: None,
        }
    }

    pub fn with_user(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_particular(mut self, key: &str, value: serde_json::Value) -> Self {
        self.particulars.insert(key.to_string(), value);
        self
    }
}

pub struct EventTracker {
    store: Arc<dyn Store>,
    fanout: Option<FanoutHandle>,
}

impl EventTracker {
    pub fn new(store: Arc<dyn Store>, fanout: Option<FanoutHandle>) -> Self {
        Self { store, fanout }
    }

    /// Record an event. The event row (and its feed item, when the action is
    /// templated) is written before this returns; fan-out is launched but
    /// never awaited.
    #[tracing::instrument(skip(self, new_event), fields(action = %new_event.action, tenant = %new_event.tenant))]
    pub async fn track(&self, new_event: NewEvent) -> Result<Event> {
        let event = Event {
            id: Uuid::new_v4(),
            tenant: new_event.tenant,
            user_id: new_event.user_id,
            action: new_event.action,
            eventable: new_event.eventable,
            particulars: new_event.particulars,
            client_ip: new_event.client_ip,
            user_agent: new_event.user_agent,
            created_at: Utc::now(),
        };

        let feed_item = templates::template_for(&event.action).map(|template| {
            let bucket = if event.user_id.is_some() {
                FeedBucket::User
            } else {
                FeedBucket::Global
            };
            let mut metadata = serde_json::Map::new();
            metadata.insert("action".to_string(), serde_json::Value::String(event.action.clone()));
            metadata.insert(
                "eventable_type".to_string(),
                serde_json::Value::String(event.eventable.kind.as_str().to_string()),
            );
            ActivityFeedItem {
                id: Uuid::new_v4(),
                tenant: event.tenant.clone(),
                user_id: event.user_id.clone(),
                event_id: event.id,
                bucket,
                title: templates::interpolate(template.title, &event.particulars),
                description: templates::interpolate(template.description, &event.particulars),
                icon: template.icon.to_string(),
                link: deep_link(event.eventable.kind, &event.eventable.id),
                metadata,
                read: false,
                created_at: event.created_at,
            }
        });

        self.store.insert_event(&event, feed_item.as_ref()).await?;
        tracing::debug!(event_id = %event.id, templated = feed_item.is_some(), "Event recorded");

        if let Some(fanout) = &self.fanout {
            fanout.dispatch(event.clone());
        }

        Ok(event)
    }

    /// Feed items for a tenant, newest first.
    pub async fn feed(&self, tenant: &str, query: &FeedQuery) -> Result<Vec<ActivityFeedItem>> {
        self.store.feed(tenant, query).await
    }

    /// Mark feed items read. An empty id list is a no-op.
    pub async fn mark_read(&self, tenant: &str, ids: &[Uuid]) -> Result<u64> {
        self.store.mark_read(tenant, ids).await
    }

    /// Full event history of an entity, newest first.
    pub async fn events_for(
        &self,
        kind: EventableKind,
        id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Event>> {
        self.store.events_for(kind, id, limit, offset).await
    }

    /// Action counts for a tenant, optionally windowed.
    pub async fn counts(
        &self,
        tenant: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<HashMap<String, i64>> {
        self.store.event_counts(tenant, since).await
    }
}
