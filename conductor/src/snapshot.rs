//! Serializable snapshot of the dispatcher's state.
//!
//! The dispatcher owns its request map and provider queues in memory and
//! writes a `RouterSnapshot` to durable storage after every state-changing
//! command. On cold start the snapshot is replayed: queued requests keep
//! their order, and anything that was in flight is requeued at the head of
//! its provider queue with its retry count preserved.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::request::{
    AnyRequest, Cancelled, Completed, Failed, Pending, Processing, Queued, Request, RequestData,
    RequestId,
};
use crate::queue::QueuedEntry;

/// Flat, serde-friendly form of a request in any state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedRequest {
    pub data: RequestData,
    pub state: String,
    pub retry_count: u32,
    pub error: Option<String>,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&AnyRequest> for PersistedRequest {
    fn from(request: &AnyRequest) -> Self {
        Self {
            data: request.data().clone(),
            state: request.state_name().to_string(),
            retry_count: request.retry_count(),
            error: request.error().map(str::to_string),
            queued_at: request.queued_at(),
            started_at: request.started_at(),
            completed_at: request.completed_at(),
        }
    }
}

impl PersistedRequest {
    /// Rebuild the typed request. Unknown state names revive as `Pending`,
    /// which the dispatcher then requeues.
    pub fn revive(self) -> AnyRequest {
        let now = Utc::now();
        match self.state.as_str() {
            "queued" => AnyRequest::Queued(Request {
                state: Queued {
                    retry_count: self.retry_count,
                    queued_at: self.queued_at.unwrap_or(now),
                },
                data: self.data,
            }),
            "processing" => AnyRequest::Processing(Request {
                state: Processing {
                    retry_count: self.retry_count,
                    queued_at: self.queued_at.unwrap_or(now),
                    started_at: self.started_at.unwrap_or(now),
                },
                data: self.data,
            }),
            "completed" => AnyRequest::Completed(Request {
                state: Completed {
                    retry_count: self.retry_count,
                    queued_at: self.queued_at.unwrap_or(now),
                    started_at: self.started_at.unwrap_or(now),
                    completed_at: self.completed_at.unwrap_or(now),
                },
                data: self.data,
            }),
            "failed" => AnyRequest::Failed(Request {
                state: Failed {
                    retry_count: self.retry_count,
                    error: self.error.unwrap_or_else(|| "unknown".to_string()),
                    failed_at: self.completed_at.unwrap_or(now),
                },
                data: self.data,
            }),
            "cancelled" => AnyRequest::Cancelled(Request {
                state: Cancelled {
                    cancelled_at: self.completed_at.unwrap_or(now),
                },
                data: self.data,
            }),
            _ => AnyRequest::Pending(Request {
                state: Pending {},
                data: self.data,
            }),
        }
    }
}

/// Persisted state of one provider queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSnapshot {
    pub provider: String,
    pub model: Option<String>,
    pub queue: Vec<QueuedEntry>,
    pub in_flight: Vec<RequestId>,
    pub minute_count: u32,
}

/// Full dispatcher state: every request plus every queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSnapshot {
    pub requests: Vec<PersistedRequest>,
    pub queues: Vec<QueueSnapshot>,
    pub taken_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn data() -> RequestData {
        RequestData {
            id: Uuid::new_v4(),
            tenant: "acme".to_string(),
            app_id: None,
            instance_id: None,
            query: "q".to_string(),
            task_type: "text".to_string(),
            provider: "openai".to_string(),
            model: None,
            model_waterfall: vec![],
            priority: 0,
            callback_url: None,
            metadata: HashMap::new(),
            max_retries: 3,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn round_trips_each_state() {
        let pending = Request {
            state: Pending {},
            data: data(),
        };
        let processing = pending.clone().enqueue().start();

        for any in [
            AnyRequest::from(pending.clone()),
            AnyRequest::from(pending.clone().enqueue()),
            AnyRequest::from(processing.clone()),
            AnyRequest::from(processing.clone().complete()),
            AnyRequest::from(processing.fail("boom")),
            AnyRequest::from(pending.cancel()),
        ] {
            let persisted = PersistedRequest::from(&any);
            let revived = persisted.clone().revive();
            assert_eq!(revived.state_name(), any.state_name());
            assert_eq!(revived.id(), any.id());
            assert_eq!(revived.retry_count(), any.retry_count());
            assert_eq!(revived.error(), any.error());
        }
    }

    #[test]
    fn serializes_to_json_and_back() {
        let request = Request {
            state: Pending {},
            data: data(),
        }
        .enqueue();
        let id = request.data.id;

        let snapshot = RouterSnapshot {
            requests: vec![PersistedRequest::from(&AnyRequest::from(request))],
            queues: vec![QueueSnapshot {
                provider: "openai".to_string(),
                model: None,
                queue: vec![QueuedEntry { id, priority: 0 }],
                in_flight: vec![],
                minute_count: 1,
            }],
            taken_at: Utc::now(),
        };

        let json = serde_json::to_string(&snapshot).unwrap();
        let restored: RouterSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.requests.len(), 1);
        assert_eq!(restored.queues[0].queue[0].id, id);
        assert_eq!(restored.queues[0].minute_count, 1);
    }
}
