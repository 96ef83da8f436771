//! State transitions for the request lifecycle.
//!
//! Transitions are pure: they consume the request in one state and return it
//! in the next. Persistence is the dispatcher's job (it snapshots its whole
//! state after every mutation), so nothing here touches storage. The type
//! system makes backward transitions unrepresentable, with the single
//! deliberate exception of `Request<Processing>::requeue` for bounded retry.

use chrono::Utc;

use super::{Cancelled, Completed, Failed, Pending, Processing, Queued, Request};

impl Request<Pending> {
    /// Place the request into its provider queue.
    pub fn enqueue(self) -> Request<Queued> {
        Request {
            state: Queued {
                retry_count: 0,
                queued_at: Utc::now(),
            },
            data: self.data,
        }
    }

    pub fn cancel(self) -> Request<Cancelled> {
        Request {
            state: Cancelled {
                cancelled_at: Utc::now(),
            },
            data: self.data,
        }
    }
}

impl Request<Queued> {
    /// Dispatch to a backend adapter.
    pub fn start(self) -> Request<Processing> {
        Request {
            state: Processing {
                retry_count: self.state.retry_count,
                queued_at: self.state.queued_at,
                started_at: Utc::now(),
            },
            data: self.data,
        }
    }

    pub fn cancel(self) -> Request<Cancelled> {
        Request {
            state: Cancelled {
                cancelled_at: Utc::now(),
            },
            data: self.data,
        }
    }
}

impl Request<Processing> {
    /// Close the lifecycle successfully.
    pub fn complete(self) -> Request<Completed> {
        Request {
            state: Completed {
                retry_count: self.state.retry_count,
                queued_at: self.state.queued_at,
                started_at: self.state.started_at,
                completed_at: Utc::now(),
            },
            data: self.data,
        }
    }

    /// Close the lifecycle with a terminal error.
    pub fn fail(self, error: impl Into<String>) -> Request<Failed> {
        Request {
            state: Failed {
                retry_count: self.state.retry_count,
                error: error.into(),
                failed_at: Utc::now(),
            },
            data: self.data,
        }
    }

    /// Return the request to its provider queue after a transient failure.
    ///
    /// Increments the retry count; the caller is responsible for checking it
    /// against `data.max_retries` and for inserting at the queue head.
    pub fn requeue(self) -> Request<Queued> {
        Request {
            state: Queued {
                retry_count: self.state.retry_count + 1,
                queued_at: Utc::now(),
            },
            data: self.data,
        }
    }

    /// Whether another retry is allowed by the submission's bound.
    pub fn can_retry(&self) -> bool {
        self.state.retry_count < self.data.max_retries
    }

    /// Return in-flight work to the head of its queue after a crash.
    ///
    /// Unlike `requeue`, the retry count is preserved: the attempt never
    /// produced an outcome, so it does not consume the retry budget.
    pub fn recover(self) -> Request<Queued> {
        Request {
            state: Queued {
                retry_count: self.state.retry_count,
                queued_at: Utc::now(),
            },
            data: self.data,
        }
    }
}
