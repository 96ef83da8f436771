//! PostgreSQL store implementation.
//!
//! Row-level writes only; the single exception is the event + feed pair,
//! which shares one transaction so the feed stays consistent with its event.
//! Queries are bound at runtime so the crate builds without a live database.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::types::{EventPointer, EventableKind};

use super::{
    ActivityFeedItem, Deliverable, DeliverableState, DeliveryAttempt, DeliveryState, Event,
    FeedBucket, FeedQuery, Result, Store, StoreError, Subscription,
};

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|err| StoreError::Database(err.into()))?;
        Ok(())
    }
}

fn deliverable_from_row(row: &PgRow) -> Result<Deliverable> {
    let content_kind: String = row.try_get("content_kind")?;
    let state: String = row.try_get("state")?;
    let quality_issues: serde_json::Value = row.try_get("quality_issues")?;
    let quality_metadata: serde_json::Value = row.try_get("quality_metadata")?;
    let post_process: serde_json::Value = row.try_get("post_process")?;
    Ok(Deliverable {
        id: row.try_get("id")?,
        request_id: row.try_get("request_id")?,
        tenant: row.try_get("tenant")?,
        content_kind: serde_json::from_value(serde_json::Value::String(content_kind))?,
        content: row.try_get("content")?,
        raw_response: row.try_get("raw_response")?,
        quality_score: row.try_get("quality_score")?,
        quality_issues: serde_json::from_value(quality_issues)?,
        quality_metadata: serde_json::from_value(quality_metadata)?,
        state: DeliverableState::parse(&state).unwrap_or(DeliverableState::Failed),
        error: row.try_get("error")?,
        post_process: serde_json::from_value(post_process)?,
        final_output: row.try_get("final_output")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn event_from_row(row: &PgRow) -> Result<Event> {
    let eventable_type: String = row.try_get("eventable_type")?;
    let particulars: serde_json::Value = row.try_get("particulars")?;
    let kind: EventableKind = serde_json::from_value(serde_json::Value::String(eventable_type))?;
    Ok(Event {
        id: row.try_get("id")?,
        tenant: row.try_get("tenant")?,
        user_id: row.try_get("user_id")?,
        action: row.try_get("action")?,
        eventable: EventPointer::new(kind, row.try_get::<String, _>("eventable_id")?),
        particulars: serde_json::from_value(particulars)?,
        client_ip: row.try_get("client_ip")?,
        user_agent: row.try_get("user_agent")?,
        created_at: row.try_get("created_at")?,
    })
}

fn feed_item_from_row(row: &PgRow) -> Result<ActivityFeedItem> {
    let bucket: String = row.try_get("bucket")?;
    let metadata: serde_json::Value = row.try_get("metadata")?;
    Ok(ActivityFeedItem {
        id: row.try_get("id")?,
        tenant: row.try_get("tenant")?,
        user_id: row.try_get("user_id")?,
        event_id: row.try_get("event_id")?,
        bucket: FeedBucket::parse(&bucket).unwrap_or(FeedBucket::Global),
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        icon: row.try_get("icon")?,
        link: row.try_get("link")?,
        metadata: serde_json::from_value(metadata)?,
        read: row.try_get("read")?,
        created_at: row.try_get("created_at")?,
    })
}

fn subscription_from_row(row: &PgRow) -> Result<Subscription> {
    let actions: serde_json::Value = row.try_get("actions")?;
    let kind_filter: Option<String> = row.try_get("eventable_kind_filter")?;
    Ok(Subscription {
        id: row.try_get("id")?,
        tenant: row.try_get("tenant")?,
        url: row.try_get("url")?,
        secret: row.try_get("secret")?,
        actions: serde_json::from_value(actions)?,
        user_filter: row.try_get("user_filter")?,
        eventable_kind_filter: kind_filter.and_then(|kind| EventableKind::from_str(&kind).ok()),
        eventable_id_filter: row.try_get("eventable_id_filter")?,
        active: row.try_get("active")?,
        failure_count: row.try_get::<i32, _>("failure_count")? as u32,
        last_failure: row.try_get("last_failure")?,
        created_at: row.try_get("created_at")?,
    })
}

fn delivery_from_row(row: &PgRow) -> Result<DeliveryAttempt> {
    let state: String = row.try_get("state")?;
    Ok(DeliveryAttempt {
        id: row.try_get("id")?,
        subscription_id: row.try_get("subscription_id")?,
        event_id: row.try_get("event_id")?,
        state: DeliveryState::parse(&state).unwrap_or(DeliveryState::Pending),
        attempt_count: row.try_get::<i32, _>("attempt_count")? as u32,
        last_status: row.try_get::<Option<i32>, _>("last_status")?.map(|code| code as u16),
        last_body: row.try_get("last_body")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl Store for PostgresStore {
    async fn insert_deliverable(&self, deliverable: &Deliverable) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO deliverables (
                id, request_id, tenant, content_kind, content, raw_response,
                quality_score, quality_issues, quality_metadata, state, error,
                post_process, final_output, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(deliverable.id)
        .bind(deliverable.request_id)
        .bind(&deliverable.tenant)
        .bind(deliverable.content_kind.as_str())
        .bind(&deliverable.content)
        .bind(&deliverable.raw_response)
        .bind(deliverable.quality_score)
        .bind(serde_json::to_value(&deliverable.quality_issues)?)
        .bind(serde_json::to_value(&deliverable.quality_metadata)?)
        .bind(deliverable.state.as_str())
        .bind(&deliverable.error)
        .bind(serde_json::to_value(&deliverable.post_process)?)
        .bind(&deliverable.final_output)
        .bind(deliverable.created_at)
        .bind(deliverable.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_deliverable(&self, id: Uuid) -> Result<Option<Deliverable>> {
        let row = sqlx::query("SELECT * FROM deliverables WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(deliverable_from_row).transpose()
    }

    async fn deliverable_for_request(&self, request_id: Uuid) -> Result<Option<Deliverable>> {
        let row = sqlx::query(
            "SELECT * FROM deliverables WHERE request_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(deliverable_from_row).transpose()
    }

    async fn update_deliverable(&self, deliverable: &Deliverable) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE deliverables
            SET state = $2, error = $3, final_output = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(deliverable.id)
        .bind(deliverable.state.as_str())
        .bind(&deliverable.error)
        .bind(&deliverable.final_output)
        .bind(deliverable.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                resource: "deliverable",
                id: deliverable.id.to_string(),
            });
        }
        Ok(())
    }

    async fn insert_event(&self, event: &Event, feed_item: Option<&ActivityFeedItem>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO events (
                id, tenant, user_id, action, eventable_type, eventable_id,
                particulars, client_ip, user_agent, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(event.id)
        .bind(&event.tenant)
        .bind(&event.user_id)
        .bind(&event.action)
        .bind(event.eventable.kind.as_str())
        .bind(&event.eventable.id)
        .bind(serde_json::Value::Object(event.particulars.clone()))
        .bind(&event.client_ip)
        .bind(&event.user_agent)
        .bind(event.created_at)
        .execute(&mut *tx)
        .await?;

        if let Some(item) = feed_item {
            sqlx::query(
                r#"
                INSERT INTO activity_feed (
                    id, tenant, user_id, event_id, bucket, title, description,
                    icon, link, metadata, read, created_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                "#,
            )
            .bind(item.id)
            .bind(&item.tenant)
            .bind(&item.user_id)
            .bind(item.event_id)
            .bind(item.bucket.as_str())
            .bind(&item.title)
            .bind(&item.description)
            .bind(&item.icon)
            .bind(&item.link)
            .bind(serde_json::Value::Object(item.metadata.clone()))
            .bind(item.read)
            .bind(item.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn events_for(
        &self,
        kind: EventableKind,
        id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Event>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM events
            WHERE eventable_type = $1 AND eventable_id = $2
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(kind.as_str())
        .bind(id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn event_counts(
        &self,
        tenant: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<HashMap<String, i64>> {
        let rows = sqlx::query(
            r#"
            SELECT action, COUNT(*) AS count FROM events
            WHERE tenant = $1 AND ($2::timestamptz IS NULL OR created_at >= $2)
            GROUP BY action
            "#,
        )
        .bind(tenant)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::new();
        for row in rows {
            counts.insert(row.try_get("action")?, row.try_get("count")?);
        }
        Ok(counts)
    }

    async fn feed(&self, tenant: &str, query: &FeedQuery) -> Result<Vec<ActivityFeedItem>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM activity_feed
            WHERE tenant = $1
              AND ($2::text IS NULL OR bucket = $2)
              AND ($3::text IS NULL OR user_id = $3)
              AND (NOT $4 OR read = FALSE)
            ORDER BY created_at DESC
            LIMIT $5 OFFSET $6
            "#,
        )
        .bind(tenant)
        .bind(query.bucket.map(|bucket| bucket.as_str()))
        .bind(&query.user)
        .bind(query.unread_only)
        .bind(query.limit)
        .bind(query.offset)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(feed_item_from_row).collect()
    }

    async fn mark_read(&self, tenant: &str, ids: &[Uuid]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE activity_feed SET read = TRUE WHERE tenant = $1 AND id = ANY($2) AND read = FALSE",
        )
        .bind(tenant)
        .bind(ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn create_subscription(&self, subscription: &Subscription) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO event_subscriptions (
                id, tenant, url, secret, actions, user_filter, eventable_kind_filter,
                eventable_id_filter, active, failure_count, last_failure, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(subscription.id)
        .bind(&subscription.tenant)
        .bind(&subscription.url)
        .bind(&subscription.secret)
        .bind(serde_json::to_value(&subscription.actions)?)
        .bind(&subscription.user_filter)
        .bind(subscription.eventable_kind_filter.map(|kind| kind.as_str()))
        .bind(&subscription.eventable_id_filter)
        .bind(subscription.active)
        .bind(subscription.failure_count as i32)
        .bind(&subscription.last_failure)
        .bind(subscription.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_subscription(&self, id: Uuid) -> Result<Option<Subscription>> {
        let row = sqlx::query("SELECT * FROM event_subscriptions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(subscription_from_row).transpose()
    }

    async fn list_subscriptions(&self, tenant: Option<&str>) -> Result<Vec<Subscription>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM event_subscriptions
            WHERE ($1::text IS NULL OR tenant = $1)
            ORDER BY created_at ASC
            "#,
        )
        .bind(tenant)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(subscription_from_row).collect()
    }

    async fn update_subscription(&self, subscription: &Subscription) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE event_subscriptions
            SET url = $2, secret = $3, actions = $4, user_filter = $5,
                eventable_kind_filter = $6, eventable_id_filter = $7, active = $8
            WHERE id = $1
            "#,
        )
        .bind(subscription.id)
        .bind(&subscription.url)
        .bind(&subscription.secret)
        .bind(serde_json::to_value(&subscription.actions)?)
        .bind(&subscription.user_filter)
        .bind(subscription.eventable_kind_filter.map(|kind| kind.as_str()))
        .bind(&subscription.eventable_id_filter)
        .bind(subscription.active)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                resource: "subscription",
                id: subscription.id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_subscription(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM event_subscriptions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn active_subscriptions(&self) -> Result<Vec<Subscription>> {
        let rows = sqlx::query("SELECT * FROM event_subscriptions WHERE active = TRUE")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(subscription_from_row).collect()
    }

    async fn record_subscription_failure(&self, id: Uuid, error: &str) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE event_subscriptions
            SET failure_count = failure_count + 1, last_failure = $2
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                resource: "subscription",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    async fn insert_delivery(&self, delivery: &DeliveryAttempt) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO event_deliveries (
                id, subscription_id, event_id, state, attempt_count,
                last_status, last_body, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(delivery.id)
        .bind(delivery.subscription_id)
        .bind(delivery.event_id)
        .bind(delivery.state.as_str())
        .bind(delivery.attempt_count as i32)
        .bind(delivery.last_status.map(|code| code as i32))
        .bind(&delivery.last_body)
        .bind(delivery.created_at)
        .bind(delivery.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_delivery(&self, delivery: &DeliveryAttempt) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE event_deliveries
            SET state = $2, attempt_count = $3, last_status = $4, last_body = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(delivery.id)
        .bind(delivery.state.as_str())
        .bind(delivery.attempt_count as i32)
        .bind(delivery.last_status.map(|code| code as i32))
        .bind(&delivery.last_body)
        .bind(delivery.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                resource: "delivery",
                id: delivery.id.to_string(),
            });
        }
        Ok(())
    }

    async fn deliveries_for_event(&self, event_id: Uuid) -> Result<Vec<DeliveryAttempt>> {
        let rows = sqlx::query(
            "SELECT * FROM event_deliveries WHERE event_id = $1 ORDER BY created_at ASC",
        )
        .bind(event_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(delivery_from_row).collect()
    }
}
