//! In-memory store implementation.
//!
//! All entities live in maps behind a single lock, which also gives the
//! event + feed pair its atomicity. Suitable for tests and single-process
//! deployments; contents are lost on restart.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::types::EventableKind;

use super::{
    ActivityFeedItem, Deliverable, DeliveryAttempt, Event, FeedQuery, Result, Store, StoreError,
    Subscription,
};

#[derive(Default)]
struct Inner {
    deliverables: HashMap<Uuid, Deliverable>,
    /// Deliverable ids per request, in insertion order.
    by_request: HashMap<Uuid, Vec<Uuid>>,
    events: Vec<Event>,
    feed: Vec<ActivityFeedItem>,
    subscriptions: HashMap<Uuid, Subscription>,
    deliveries: HashMap<Uuid, DeliveryAttempt>,
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_deliverable(&self, deliverable: &Deliverable) -> Result<()> {
        let mut inner = self.inner.write();
        inner
            .by_request
            .entry(deliverable.request_id)
            .or_default()
            .push(deliverable.id);
        inner.deliverables.insert(deliverable.id, deliverable.clone());
        Ok(())
    }

    async fn get_deliverable(&self, id: Uuid) -> Result<Option<Deliverable>> {
        Ok(self.inner.read().deliverables.get(&id).cloned())
    }

    async fn deliverable_for_request(&self, request_id: Uuid) -> Result<Option<Deliverable>> {
        let inner = self.inner.read();
        Ok(inner
            .by_request
            .get(&request_id)
            .and_then(|ids| ids.last())
            .and_then(|id| inner.deliverables.get(id))
            .cloned())
    }

    async fn update_deliverable(&self, deliverable: &Deliverable) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.deliverables.contains_key(&deliverable.id) {
            return Err(StoreError::NotFound {
                resource: "deliverable",
                id: deliverable.id.to_string(),
            });
        }
        inner.deliverables.insert(deliverable.id, deliverable.clone());
        Ok(())
    }

    async fn insert_event(&self, event: &Event, feed_item: Option<&ActivityFeedItem>) -> Result<()> {
        // One write-lock section keeps the pair consistent.
        let mut inner = self.inner.write();
        inner.events.push(event.clone());
        if let Some(item) = feed_item {
            inner.feed.push(item.clone());
        }
        Ok(())
    }

    async fn events_for(
        &self,
        kind: EventableKind,
        id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Event>> {
        let inner = self.inner.read();
        let mut matching: Vec<Event> = inner
            .events
            .iter()
            .filter(|event| event.eventable.kind == kind && event.eventable.id == id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn event_counts(
        &self,
        tenant: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<HashMap<String, i64>> {
        let inner = self.inner.read();
        let mut counts = HashMap::new();
        for event in &inner.events {
            if event.tenant != tenant {
                continue;
            }
            if let Some(since) = since {
                if event.created_at < since {
                    continue;
                }
            }
            *counts.entry(event.action.clone()).or_default() += 1;
        }
        Ok(counts)
    }

    async fn feed(&self, tenant: &str, query: &FeedQuery) -> Result<Vec<ActivityFeedItem>> {
        let inner = self.inner.read();
        let mut items: Vec<ActivityFeedItem> = inner
            .feed
            .iter()
            .filter(|item| item.tenant == tenant)
            .filter(|item| query.bucket.map_or(true, |bucket| item.bucket == bucket))
            .filter(|item| {
                query
                    .user
                    .as_ref()
                    .map_or(true, |user| item.user_id.as_deref() == Some(user))
            })
            .filter(|item| !query.unread_only || !item.read)
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items
            .into_iter()
            .skip(query.offset.max(0) as usize)
            .take(query.limit.max(0) as usize)
            .collect())
    }

    async fn mark_read(&self, tenant: &str, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut inner = self.inner.write();
        let mut marked = 0;
        for item in inner.feed.iter_mut() {
            if item.tenant == tenant && ids.contains(&item.id) && !item.read {
                item.read = true;
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn create_subscription(&self, subscription: &Subscription) -> Result<()> {
        self.inner
            .write()
            .subscriptions
            .insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>> {
        Ok(self.inner.read().subscriptions.get(&id).cloned())
    }

    async fn list_subscriptions(&self, tenant: Option<&str>) -> Result<Vec<Subscription>> {
        let inner = self.inner.read();
        let mut subscriptions: Vec<Subscription> = inner
            .subscriptions
            .values()
            .filter(|sub| tenant.map_or(true, |tenant| sub.tenant == tenant))
            .cloned()
            .collect();
        subscriptions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(subscriptions)
    }

    async fn update_subscription(&self, subscription: &Subscription) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.subscriptions.contains_key(&subscription.id) {
            return Err(StoreError::NotFound {
                resource: "subscription",
                id: subscription.id.to_string(),
            });
        }
        inner.subscriptions.insert(subscription.id, subscription.clone());
        Ok(())
    }

    async fn delete_subscription(&self, id: Uuid) -> Result<bool> {
        Ok(self.inner.write().subscriptions.remove(&id).is_some())
    }

    async fn active_subscriptions(&self) -> Result<Vec<Subscription>> {
        Ok(self
            .inner
            .read()
            .subscriptions
            .values()
            .filter(|sub| sub.active)
            .cloned()
            .collect())
    }

    async fn record_subscription_failure(&self, id: Uuid, error: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let subscription = inner.subscriptions.get_mut(&id).ok_or(StoreError::NotFound {
            resource: "subscription",
            id: id.to_string(),
        })?;
        subscription.failure_count += 1;
        subscription.last_failure = Some(error.to_string());
        Ok(())
    }

    async fn insert_delivery(&self, delivery: &DeliveryAttempt) -> Result<()> {
        self.inner.write().deliveries.insert(delivery.id, delivery.clone());
        Ok(())
    }

    async fn update_delivery(&self, delivery: &DeliveryAttempt) -> Result<()> {
        let mut inner = self.inner.write();
        if !inner.deliveries.contains_key(&delivery.id) {
            return Err(StoreError::NotFound {
                resource: "delivery",
                id: delivery.id.to_string(),
            });
        }
        inner.deliveries.insert(delivery.id, delivery.clone());
        Ok(())
    }

    async fn deliveries_for_event(&self, event_id: Uuid) -> Result<Vec<DeliveryAttempt>> {
        let mut deliveries: Vec<DeliveryAttempt> = self
            .inner
            .read()
            .deliveries
            .values()
            .filter(|delivery| delivery.event_id == event_id)
            .cloned()
            .collect();
        deliveries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(deliveries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{DeliverableState, DeliveryState, FeedBucket};
    use crate::types::{ContentKind, EventPointer};
    use serde_json::json;

    fn sample_event(tenant: &str, action: &str, eventable_id: &str) -> Event {
        Event {
            id: Uuid::new_v4(),
            tenant: tenant.to_string(),
            user_id: None,
            action: action.to_string(),
            eventable: EventPointer::new(EventableKind::Request, eventable_id),
            particulars: serde_json::Map::new(),
            client_ip: None,
            user_agent: None,
            created_at: Utc::now(),
        }
    }

    fn sample_feed_item(event: &Event) -> ActivityFeedItem {
        ActivityFeedItem {
            id: Uuid::new_v4(),
            tenant: event.tenant.clone(),
            user_id: None,
            event_id: event.id,
            bucket: FeedBucket::Global,
            title: "t".to_string(),
            description: "d".to_string(),
            icon: "inbox".to_string(),
            link: "/requests/x".to_string(),
            metadata: serde_json::Map::new(),
            read: false,
            created_at: event.created_at,
        }
    }

    #[tokio::test]
    async fn latest_deliverable_wins_for_request() {
        let store = MemoryStore::new();
        let request_id = Uuid::new_v4();

        for score in [0.3, 0.8] {
            let deliverable = Deliverable {
                id: Uuid::new_v4(),
                request_id,
                tenant: "acme".to_string(),
                content_kind: ContentKind::Text,
                content: json!("hello"),
                raw_response: None,
                quality_score: score,
                quality_issues: vec![],
                quality_metadata: HashMap::new(),
                state: DeliverableState::Delivered,
                error: None,
                post_process: vec![],
                final_output: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            store.insert_deliverable(&deliverable).await.unwrap();
        }

        let latest = store.deliverable_for_request(request_id).await.unwrap().unwrap();
        assert_eq!(latest.quality_score, 0.8);
    }

    #[tokio::test]
    async fn events_query_newest_first_with_offset() {
        let store = MemoryStore::new();
        for n in 0..5 {
            let mut event = sample_event("acme", "request.created", "r1");
            event.created_at = Utc::now() + chrono::Duration::seconds(n);
            store.insert_event(&event, None).await.unwrap();
        }
        // An event for a different entity never shows up
        store
            .insert_event(&sample_event("acme", "request.created", "r2"), None)
            .await
            .unwrap();

        let page = store.events_for(EventableKind::Request, "r1", 2, 1).await.unwrap();
        assert_eq!(page.len(), 2);
        assert!(page[0].created_at >= page[1].created_at);
    }

    #[tokio::test]
    async fn feed_filters_and_mark_read() {
        let store = MemoryStore::new();
        let event = sample_event("acme", "request.completed", "r1");
        let item = sample_feed_item(&event);
        store.insert_event(&event, Some(&item)).await.unwrap();

        let unread = store
            .feed(
                "acme",
                &FeedQuery {
                    unread_only: true,
                    limit: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(unread.len(), 1);

        // Empty id list is a no-op
        assert_eq!(store.mark_read("acme", &[]).await.unwrap(), 0);

        assert_eq!(store.mark_read("acme", &[item.id]).await.unwrap(), 1);
        // Marking again is a no-op
        assert_eq!(store.mark_read("acme", &[item.id]).await.unwrap(), 0);

        let unread = store
            .feed(
                "acme",
                &FeedQuery {
                    unread_only: true,
                    limit: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(unread.is_empty());
    }

    #[tokio::test]
    async fn event_counts_are_windowed() {
        let store = MemoryStore::new();
        let mut old = sample_event("acme", "request.created", "r1");
        old.created_at = Utc::now() - chrono::Duration::hours(2);
        store.insert_event(&old, None).await.unwrap();
        store
            .insert_event(&sample_event("acme", "request.created", "r2"), None)
            .await
            .unwrap();

        let all = store.event_counts("acme", None).await.unwrap();
        assert_eq!(all["request.created"], 2);

        let windowed = store
            .event_counts("acme", Some(Utc::now() - chrono::Duration::hours(1)))
            .await
            .unwrap();
        assert_eq!(windowed["request.created"], 1);
    }

    #[tokio::test]
    async fn subscription_failure_counter_accumulates() {
        let store = MemoryStore::new();
        let subscription = Subscription {
            id: Uuid::new_v4(),
            tenant: "acme".to_string(),
            url: "https://example.test/hook".to_string(),
            secret: None,
            actions: vec!["*".to_string()],
            user_filter: None,
            eventable_kind_filter: None,
            eventable_id_filter: None,
            active: true,
            failure_count: 0,
            last_failure: None,
            created_at: Utc::now(),
        };
        store.create_subscription(&subscription).await.unwrap();

        store
            .record_subscription_failure(subscription.id, "HTTP 500")
            .await
            .unwrap();
        store
            .record_subscription_failure(subscription.id, "HTTP 502")
            .await
            .unwrap();

        let stored = store.get_subscription(subscription.id).await.unwrap().unwrap();
        assert_eq!(stored.failure_count, 2);
        assert_eq!(stored.last_failure.as_deref(), Some("HTTP 502"));
    }

    #[tokio::test]
    async fn delivery_rows_update_in_place() {
        let store = MemoryStore::new();
        let mut delivery = DeliveryAttempt::new(Uuid::new_v4(), Uuid::new_v4());
        store.insert_delivery(&delivery).await.unwrap();

        delivery.state = DeliveryState::Delivered;
        delivery.attempt_count = 1;
        delivery.last_status = Some(200);
        store.update_delivery(&delivery).await.unwrap();

        let rows = store.deliveries_for_event(delivery.event_id).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].state, DeliveryState::Delivered);
    }
}
