//! Per-provider queues with priority insertion and rate-limit buckets.
//!
//! One `ProviderQueue` exists per (provider, optional model) pair. The queue
//! itself is a plain `VecDeque` of (id, priority) entries; all time-based
//! admission logic lives in the `RateLimitBucket`. Buckets use
//! `tokio::time::Instant` so that paused-clock tests can drive the minute
//! window deterministically.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::request::RequestId;

/// Length of the fixed rate-limit window.
pub const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Identity of a provider queue: a provider, optionally narrowed to a model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderKey {
    pub provider: String,
    pub model: Option<String>,
}

impl ProviderKey {
    pub fn new(provider: impl Into<String>, model: Option<String>) -> Self {
        Self {
            provider: provider.into(),
            model,
        }
    }
}

impl fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.model {
            Some(model) => write!(f, "{}/{}", self.provider, model),
            None => write!(f, "{}", self.provider),
        }
    }
}

/// Per-provider dispatch limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderQuota {
    /// Requests admitted per rolling minute window.
    pub requests_per_minute: u32,

    /// Optional tokens-per-minute cap. Carried in snapshots for operators;
    /// not enforced at dispatch time because token usage is only known after
    /// the adapter responds.
    pub tokens_per_minute: Option<u32>,

    /// Maximum number of requests in flight at once.
    pub max_concurrent: usize,

    /// Expected per-request processing time, used for wait estimation.
    pub expected_processing_ms: u64,
}

impl Default for ProviderQuota {
    fn default() -> Self {
        Self {
            requests_per_minute: 30,
            tokens_per_minute: None,
            max_concurrent: 5,
            expected_processing_ms: 5_000,
        }
    }
}

/// The pair (requests used this window, window start) enforcing per-provider
/// rpm, plus the concurrent cap and an optional `Retry-After` hold.
#[derive(Debug, Clone)]
pub struct RateLimitBucket {
    quota: ProviderQuota,
    minute_count: u32,
    window_start: Instant,
    hold_until: Option<Instant>,
}

impl RateLimitBucket {
    pub fn new(quota: ProviderQuota, now: Instant) -> Self {
        Self {
            quota,
            minute_count: 0,
            window_start: now,
            hold_until: None,
        }
    }

    pub fn quota(&self) -> &ProviderQuota {
        &self.quota
    }

    pub fn minute_count(&self) -> u32 {
        self.minute_count
    }

    /// Slide the minute window forward if it has elapsed.
    pub fn roll(&mut self, now: Instant) {
        if now.duration_since(self.window_start) >= RATE_WINDOW {
            self.minute_count = 0;
            self.window_start = now;
        }
        if let Some(until) = self.hold_until {
            if now >= until {
                self.hold_until = None;
            }
        }
    }

    /// Whether one more dispatch is admissible right now.
    pub fn admits(&self, now: Instant, in_flight: usize) -> bool {
        if self.hold_until.map_or(false, |until| now < until) {
            return false;
        }
        self.minute_count < self.quota.requests_per_minute && in_flight < self.quota.max_concurrent
    }

    /// Count one dispatch against the current window.
    pub fn note_dispatch(&mut self) {
        self.minute_count += 1;
    }

    /// Honor a provider `Retry-After` hint: refuse dispatch until the hold
    /// expires, delaying the window advance for this bucket.
    pub fn hold_for(&mut self, delay: Duration, now: Instant) {
        let until = now + delay;
        if self.hold_until.map_or(true, |existing| until > existing) {
            self.hold_until = Some(until);
        }
    }

    /// Restore the window counter from a snapshot. The window itself restarts
    /// at `now`: instants do not survive a process restart.
    pub fn restore_count(&mut self, minute_count: u32, now: Instant) {
        self.minute_count = minute_count;
        self.window_start = now;
    }
}

/// A queued entry: the request id plus the priority it was inserted with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedEntry {
    pub id: RequestId,
    pub priority: u32,
}

/// An ordered sequence of queued requests bound to one provider, with its
/// in-flight set and rate-limit bucket.
#[derive(Debug)]
pub struct ProviderQueue {
    pub key: ProviderKey,
    queue: VecDeque<QueuedEntry>,
    in_flight: HashSet<RequestId>,
    bucket: RateLimitBucket,
}

impl ProviderQueue {
    pub fn new(key: ProviderKey, quota: ProviderQuota, now: Instant) -> Self {
        Self {
            key,
            queue: VecDeque::new(),
            in_flight: HashSet::new(),
            bucket: RateLimitBucket::new(quota, now),
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn in_flight_ids(&self) -> impl Iterator<Item = &RequestId> {
        self.in_flight.iter()
    }

    pub fn entries(&self) -> impl Iterator<Item = &QueuedEntry> {
        self.queue.iter()
    }

    pub fn bucket(&self) -> &RateLimitBucket {
        &self.bucket
    }

    pub fn bucket_mut(&mut self) -> &mut RateLimitBucket {
        &mut self.bucket
    }

    /// Insert by priority and return the 1-based queue position.
    ///
    /// Priority zero appends at the tail. A positive priority is inserted
    /// before the first entry with a strictly lower priority, which keeps the
    /// order stable among equals.
    pub fn insert(&mut self, id: RequestId, priority: u32) -> usize {
        let entry = QueuedEntry { id, priority };
        if priority == 0 {
            self.queue.push_back(entry);
            return self.queue.len();
        }
        let at = self
            .queue
            .iter()
            .position(|existing| existing.priority < priority)
            .unwrap_or(self.queue.len());
        self.queue.insert(at, entry);
        at + 1
    }

    /// Insert at the head, ahead of any priority. Used for retries and for
    /// requeueing in-flight work recovered from a snapshot.
    pub fn insert_front(&mut self, id: RequestId, priority: u32) {
        self.queue.push_front(QueuedEntry { id, priority });
    }

    /// Remove a queued id. Returns false if it was not queued here.
    pub fn remove(&mut self, id: RequestId) -> bool {
        match self.queue.iter().position(|entry| entry.id == id) {
            Some(at) => {
                self.queue.remove(at);
                true
            }
            None => false,
        }
    }

    /// Live 1-based position of a queued id.
    pub fn position(&self, id: RequestId) -> Option<usize> {
        self.queue.iter().position(|entry| entry.id == id).map(|i| i + 1)
    }

    /// Whether the bucket admits one more dispatch right now.
    pub fn can_dispatch(&self, now: Instant) -> bool {
        !self.queue.is_empty() && self.bucket.admits(now, self.in_flight.len())
    }

    /// Pop the head of the queue. The caller validates the request's state
    /// before counting the dispatch (cancelled ids are skipped for free).
    pub fn pop_front(&mut self) -> Option<QueuedEntry> {
        self.queue.pop_front()
    }

    /// Mark an id as dispatched: counts against the window and the
    /// concurrent cap.
    pub fn mark_in_flight(&mut self, id: RequestId) {
        self.in_flight.insert(id);
        self.bucket.note_dispatch();
    }

    /// Release the concurrency slot held by an in-flight id.
    pub fn release(&mut self, id: RequestId) -> bool {
        self.in_flight.remove(&id)
    }

    /// Estimated wait for a given 1-based queue position.
    pub fn estimated_wait_ms(&self, position: usize) -> u64 {
        self.bucket.quota().expected_processing_ms * position as u64
    }

    /// Rebuild the queued entries from a snapshot, preserving their order.
    pub fn restore(&mut self, entries: impl IntoIterator<Item = QueuedEntry>, minute_count: u32, now: Instant) {
        self.queue = entries.into_iter().collect();
        self.bucket.restore_count(minute_count, now);
    }
}
