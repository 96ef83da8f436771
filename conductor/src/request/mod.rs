//! Core types for the routing engine.
//!
//! This module defines the type-safe request lifecycle using the typestate pattern.
//! Each request progresses through distinct states, enforced at compile time.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

mod transitions;

/// Unique identifier for a request in the system.
pub type RequestId = Uuid;

/// Marker trait for valid request states.
///
/// This trait enables the typestate pattern, ensuring that operations
/// are only performed on requests in valid states.
pub trait LifecycleState: Send + Sync {}

/// A client-submitted unit of work flowing through the router.
///
/// Uses the typestate pattern to ensure type-safe state transitions.
/// The generic parameter `T` represents the current state of the request.
#[derive(Debug, Clone)]
pub struct Request<T: LifecycleState> {
    /// The current state of the request.
    pub state: T,
    /// The submission data, immutable through the lifecycle.
    pub data: RequestData,
}

/// Submission data for a request.
///
/// Everything the router and the backend adapters need to know about the
/// work item. Mutable fields are limited to `metadata`, which is
/// last-write-wins on idempotent resubmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestData {
    /// The ID with which the request was submitted.
    pub id: RequestId,

    /// The submitting tenant.
    pub tenant: String,

    /// The submitting application, if identified.
    pub app_id: Option<String>,

    /// Optional per-tenant instance handle.
    pub instance_id: Option<String>,

    /// Free-form query text.
    pub query: String,

    /// Classified or client-pinned task type (e.g. "text", "image", "code").
    ///
    /// The router treats this as opaque; it only matters for dispatch
    /// notifications and observability.
    pub task_type: String,

    /// Target provider - the demux key for queue selection.
    pub provider: String,

    /// Target model, when one was pinned or classified.
    pub model: Option<String>,

    /// Ordered list of fallback models to try, first acceptable wins.
    #[serde(default)]
    pub model_waterfall: Vec<String>,

    /// Queue priority. Zero appends at the tail; higher inserts ahead of lower.
    #[serde(default)]
    pub priority: u32,

    /// Client callback URL fired on terminal delivery.
    pub callback_url: Option<String>,

    /// Arbitrary client metadata, echoed to adapters and callbacks.
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,

    /// Bound on how many times a failed request may re-enter its queue.
    pub max_retries: u32,

    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Request States
// ============================================================================

/// Request has been accepted but not yet placed into a provider queue.
///
/// This state is transient: `enqueue` moves a request to `Queued` in the same
/// dispatcher command. It only survives in a snapshot taken mid-crash.
#[derive(Debug, Clone)]
pub struct Pending {}

impl LifecycleState for Pending {}

/// Request is waiting in a provider queue.
#[derive(Debug, Clone)]
pub struct Queued {
    pub retry_count: u32,
    pub queued_at: DateTime<Utc>,
}

impl LifecycleState for Queued {}

/// Request has been dispatched to a backend adapter and awaits its response.
#[derive(Debug, Clone)]
pub struct Processing {
    pub retry_count: u32,
    pub queued_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
}

impl LifecycleState for Processing {}

/// Request completed successfully.
#[derive(Debug, Clone)]
pub struct Completed {
    pub retry_count: u32,
    pub queued_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl LifecycleState for Completed {}

/// Request failed after exhausting retries, or failed terminally.
#[derive(Debug, Clone)]
pub struct Failed {
    pub retry_count: u32,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

impl LifecycleState for Failed {}

/// Request was cancelled by the caller before dispatch.
#[derive(Debug, Clone)]
pub struct Cancelled {
    pub cancelled_at: DateTime<Utc>,
}

impl LifecycleState for Cancelled {}

// ============================================================================
// Unified Request Representation
// ============================================================================

/// Enum that can hold a request in any state.
///
/// This is used for the dispatcher's request map, snapshots, and API
/// responses, where requests must be handled uniformly.
#[derive(Debug, Clone)]
pub enum AnyRequest {
    Pending(Request<Pending>),
    Queued(Request<Queued>),
    Processing(Request<Processing>),
    Completed(Request<Completed>),
    Failed(Request<Failed>),
    Cancelled(Request<Cancelled>),
}

impl AnyRequest {
    /// Get the request ID regardless of state.
    pub fn id(&self) -> RequestId {
        self.data().id
    }

    /// Get the submission data regardless of state.
    pub fn data(&self) -> &RequestData {
        match self {
            AnyRequest::Pending(r) => &r.data,
            AnyRequest::Queued(r) => &r.data,
            AnyRequest::Processing(r) => &r.data,
            AnyRequest::Completed(r) => &r.data,
            AnyRequest::Failed(r) => &r.data,
            AnyRequest::Cancelled(r) => &r.data,
        }
    }

    /// Mutable access to the submission data (idempotent resubmission only).
    pub fn data_mut(&mut self) -> &mut RequestData {
        match self {
            AnyRequest::Pending(r) => &mut r.data,
            AnyRequest::Queued(r) => &mut r.data,
            AnyRequest::Processing(r) => &mut r.data,
            AnyRequest::Completed(r) => &mut r.data,
            AnyRequest::Failed(r) => &mut r.data,
            AnyRequest::Cancelled(r) => &mut r.data,
        }
    }

    /// Lowercase state name, as exposed over the API and persisted.
    pub fn state_name(&self) -> &'static str {
        match self {
            AnyRequest::Pending(_) => "pending",
            AnyRequest::Queued(_) => "queued",
            AnyRequest::Processing(_) => "processing",
            AnyRequest::Completed(_) => "completed",
            AnyRequest::Failed(_) => "failed",
            AnyRequest::Cancelled(_) => "cancelled",
        }
    }

    /// Check if this request is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AnyRequest::Completed(_) | AnyRequest::Failed(_) | AnyRequest::Cancelled(_)
        )
    }

    /// Retry count so far, zero for states that have never been queued.
    pub fn retry_count(&self) -> u32 {
        match self {
            AnyRequest::Pending(_) | AnyRequest::Cancelled(_) => 0,
            AnyRequest::Queued(r) => r.state.retry_count,
            AnyRequest::Processing(r) => r.state.retry_count,
            AnyRequest::Completed(r) => r.state.retry_count,
            AnyRequest::Failed(r) => r.state.retry_count,
        }
    }

    /// Terminal or last error message, if any.
    pub fn error(&self) -> Option<&str> {
        match self {
            AnyRequest::Failed(r) => Some(&r.state.error),
            _ => None,
        }
    }

    pub fn queued_at(&self) -> Option<DateTime<Utc>> {
        match self {
            AnyRequest::Queued(r) => Some(r.state.queued_at),
            AnyRequest::Processing(r) => Some(r.state.queued_at),
            AnyRequest::Completed(r) => Some(r.state.queued_at),
            _ => None,
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        match self {
            AnyRequest::Processing(r) => Some(r.state.started_at),
            AnyRequest::Completed(r) => Some(r.state.started_at),
            _ => None,
        }
    }

    /// Timestamp at which the request reached a terminal state.
    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        match self {
            AnyRequest::Completed(r) => Some(r.state.completed_at),
            AnyRequest::Failed(r) => Some(r.state.failed_at),
            AnyRequest::Cancelled(r) => Some(r.state.cancelled_at),
            _ => None,
        }
    }

    /// Try to view as a Queued request.
    pub fn as_queued(&self) -> Option<&Request<Queued>> {
        match self {
            AnyRequest::Queued(r) => Some(r),
            _ => None,
        }
    }

    /// Try to take as a Queued request, consuming self.
    pub fn into_queued(self) -> Option<Request<Queued>> {
        match self {
            AnyRequest::Queued(r) => Some(r),
            _ => None,
        }
    }

    /// Try to take as a Processing request, consuming self.
    pub fn into_processing(self) -> Option<Request<Processing>> {
        match self {
            AnyRequest::Processing(r) => Some(r),
            _ => None,
        }
    }
}

impl From<Request<Pending>> for AnyRequest {
    fn from(r: Request<Pending>) -> Self {
        AnyRequest::Pending(r)
    }
}

impl From<Request<Queued>> for AnyRequest {
    fn from(r: Request<Queued>) -> Self {
        AnyRequest::Queued(r)
    }
}

impl From<Request<Processing>> for AnyRequest {
    fn from(r: Request<Processing>) -> Self {
        AnyRequest::Processing(r)
    }
}

impl From<Request<Completed>> for AnyRequest {
    fn from(r: Request<Completed>) -> Self {
        AnyRequest::Completed(r)
    }
}

impl From<Request<Failed>> for AnyRequest {
    fn from(r: Request<Failed>) -> Self {
        AnyRequest::Failed(r)
    }
}

impl From<Request<Cancelled>> for AnyRequest {
    fn from(r: Request<Cancelled>) -> Self {
        AnyRequest::Cancelled(r)
    }
}
