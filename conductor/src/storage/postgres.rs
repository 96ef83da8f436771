//! PostgreSQL snapshot store.
//!
//! Persists the request map into the `requests` table and queue state into
//! `router_queues`. Queries are bound at runtime so the crate builds without
//! a live database; the schema is owned by the service's migrations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;
use uuid::Uuid;

use crate::error::Result;
use crate::snapshot::{PersistedRequest, QueueSnapshot, RouterSnapshot};
use crate::request::RequestData;

use super::RouterStore;

/// PostgreSQL-backed router store.
#[derive(Clone)]
pub struct PostgresRouterStore {
    pool: PgPool,
}

impl PostgresRouterStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl RouterStore for PostgresRouterStore {
    async fn save(&self, snapshot: &RouterSnapshot) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for request in &snapshot.requests {
            sqlx::query(
                r#"
                INSERT INTO requests (
                    id, tenant, app_id, instance_id, query, task_type, provider, model,
                    model_waterfall, priority, callback_url, metadata, max_retries,
                    state, retry_count, error, created_at, queued_at, started_at, completed_at
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
                ON CONFLICT (id) DO UPDATE SET
                    metadata = EXCLUDED.metadata,
                    state = EXCLUDED.state,
                    retry_count = EXCLUDED.retry_count,
                    error = EXCLUDED.error,
                    queued_at = EXCLUDED.queued_at,
                    started_at = EXCLUDED.started_at,
                    completed_at = EXCLUDED.completed_at
                "#,
            )
            .bind(request.data.id)
            .bind(&request.data.tenant)
            .bind(&request.data.app_id)
            .bind(&request.data.instance_id)
            .bind(&request.data.query)
            .bind(&request.data.task_type)
            .bind(&request.data.provider)
            .bind(&request.data.model)
            .bind(serde_json::to_value(&request.data.model_waterfall)?)
            .bind(request.data.priority as i32)
            .bind(&request.data.callback_url)
            .bind(serde_json::to_value(&request.data.metadata)?)
            .bind(request.data.max_retries as i32)
            .bind(&request.state)
            .bind(request.retry_count as i32)
            .bind(&request.error)
            .bind(request.data.created_at)
            .bind(request.queued_at)
            .bind(request.started_at)
            .bind(request.completed_at)
            .execute(&mut *tx)
            .await?;
        }

        // Queue state is replaced wholesale: it is small and has no history.
        sqlx::query("DELETE FROM router_queues").execute(&mut *tx).await?;
        for queue in &snapshot.queues {
            let key = match &queue.model {
                Some(model) => format!("{}/{}", queue.provider, model),
                None => queue.provider.clone(),
            };
            sqlx::query(
                r#"
                INSERT INTO router_queues (queue_key, provider, model, queue, in_flight, minute_count)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(key)
            .bind(&queue.provider)
            .bind(&queue.model)
            .bind(serde_json::to_value(&queue.queue)?)
            .bind(serde_json::to_value(&queue.in_flight)?)
            .bind(queue.minute_count as i32)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load(&self) -> Result<Option<RouterSnapshot>> {
        let request_rows = sqlx::query("SELECT * FROM requests").fetch_all(&self.pool).await?;
        let queue_rows = sqlx::query("SELECT * FROM router_queues").fetch_all(&self.pool).await?;

        if request_rows.is_empty() && queue_rows.is_empty() {
            return Ok(None);
        }

        let mut requests = Vec::with_capacity(request_rows.len());
        for row in request_rows {
            let model_waterfall: serde_json::Value = row.try_get("model_waterfall")?;
            let metadata: serde_json::Value = row.try_get("metadata")?;
            requests.push(PersistedRequest {
                data: RequestData {
                    id: row.try_get::<Uuid, _>("id")?,
                    tenant: row.try_get("tenant")?,
                    app_id: row.try_get("app_id")?,
                    instance_id: row.try_get("instance_id")?,
                    query: row.try_get("query")?,
                    task_type: row.try_get("task_type")?,
                    provider: row.try_get("provider")?,
                    model: row.try_get("model")?,
                    model_waterfall: serde_json::from_value(model_waterfall)?,
                    priority: row.try_get::<i32, _>("priority")? as u32,
                    callback_url: row.try_get("callback_url")?,
                    metadata: serde_json::from_value(metadata)?,
                    max_retries: row.try_get::<i32, _>("max_retries")? as u32,
                    created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
                },
                state: row.try_get("state")?,
                retry_count: row.try_get::<i32, _>("retry_count")? as u32,
                error: row.try_get("error")?,
                queued_at: row.try_get("queued_at")?,
                started_at: row.try_get("started_at")?,
                completed_at: row.try_get("completed_at")?,
            });
        }

        let mut queues = Vec::with_capacity(queue_rows.len());
        for row in queue_rows {
            let queue: serde_json::Value = row.try_get("queue")?;
            let in_flight: serde_json::Value = row.try_get("in_flight")?;
            queues.push(QueueSnapshot {
                provider: row.try_get("provider")?,
                model: row.try_get("model")?,
                queue: serde_json::from_value(queue)?,
                in_flight: serde_json::from_value(in_flight)?,
                minute_count: row.try_get::<i32, _>("minute_count")? as u32,
            });
        }

        Ok(Some(RouterSnapshot {
            requests,
            queues,
            taken_at: Utc::now(),
        }))
    }
}
