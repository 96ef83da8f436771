//! The single-writer dispatcher that owns all router state.
//!
//! ```text
//! RouterHandle ── Command ──► Dispatcher (owns requests + queues)
//!                                 ├─ dispatch ──► notifications channel ──► adapter worker
//!                                 ├─ status changes ──► broadcast channel ──► listeners
//!                                 └─ after each mutation ──► RouterStore snapshot
//! ```
//!
//! All mutations go through the command channel, so two concurrent
//! completions cannot corrupt the in-flight sets. Readers either send a
//! query command or consume the status broadcast. The periodic tick
//! reprocesses queues and rolls rate-limit windows; dispatch also runs on
//! every enqueue and every complete.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::RouterConfig;
use crate::error::{Result, RouterError};
use crate::queue::{ProviderKey, ProviderQueue};
use crate::request::{AnyRequest, Pending, Request, RequestData, RequestId};
use crate::snapshot::{PersistedRequest, QueueSnapshot, RouterSnapshot};
use crate::storage::RouterStore;

/// Notification emitted when a request is dispatched to a backend adapter.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingNotification {
    pub request_id: RequestId,
    pub tenant: String,
    pub query: String,
    pub task_type: String,
    pub provider: String,
    pub model: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub callback_url: Option<String>,
}

impl From<&RequestData> for ProcessingNotification {
    fn from(data: &RequestData) -> Self {
        Self {
            request_id: data.id,
            tenant: data.tenant.clone(),
            query: data.query.clone(),
            task_type: data.task_type.clone(),
            provider: data.provider.clone(),
            model: data.model.clone(),
            metadata: data.metadata.clone(),
            callback_url: data.callback_url.clone(),
        }
    }
}

/// Outcome reported by the delivery side when a request's backend attempt
/// resolves.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub success: bool,
    pub error: Option<String>,
    /// Whether a failure may re-enter the queue (bounded by max_retries).
    /// Quality auto-rejects and adapter timeouts set this to false.
    pub retryable: bool,
    /// Provider `Retry-After` hint; holds the bucket before the next dispatch.
    pub retry_after: Option<Duration>,
}

impl CompletionOutcome {
    pub fn success() -> Self {
        Self {
            success: true,
            error: None,
            retryable: false,
            retry_after: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            retryable: true,
            retry_after: None,
        }
    }

    pub fn terminal_failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            retryable: false,
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }
}

/// A request as seen from outside the dispatcher, with its live queue
/// position when it is waiting.
#[derive(Debug, Clone)]
pub struct RequestView {
    pub request: PersistedRequest,
    pub queue_position: Option<usize>,
    pub estimated_wait_ms: Option<u64>,
}

/// Result of an enqueue: the request's view, plus whether this call created
/// the request or was an idempotent resubmission of a non-terminal one.
/// Callers that record side effects per new request (events, feed items)
/// must gate them on `created`.
#[derive(Debug, Clone)]
pub struct EnqueueOutcome {
    pub view: RequestView,
    pub created: bool,
}

impl RequestView {
    pub fn id(&self) -> RequestId {
        self.request.data.id
    }

    pub fn state(&self) -> &str {
        &self.request.state
    }
}

/// Observability snapshot of one provider queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueView {
    pub provider: String,
    pub model: Option<String>,
    pub depth: usize,
    pub in_flight: usize,
    pub minute_count: u32,
    pub requests_per_minute: u32,
    pub max_concurrent: usize,
}

/// An in-flight request, for sweeps and observability.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingView {
    pub request_id: RequestId,
    pub provider: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// Observability snapshot of the whole router.
#[derive(Debug, Clone, Serialize)]
pub struct RouterStateView {
    pub total_requests: usize,
    pub counts_by_state: HashMap<String, usize>,
    pub queues: Vec<QueueView>,
    pub processing: Vec<ProcessingView>,
}

enum Command {
    Enqueue {
        data: RequestData,
        reply: oneshot::Sender<Result<EnqueueOutcome>>,
    },
    Status {
        id: RequestId,
        reply: oneshot::Sender<Result<RequestView>>,
    },
    Cancel {
        id: RequestId,
        reply: oneshot::Sender<Result<RequestView>>,
    },
    Complete {
        id: RequestId,
        outcome: CompletionOutcome,
        reply: oneshot::Sender<Result<RequestView>>,
    },
    State {
        reply: oneshot::Sender<RouterStateView>,
    },
}

/// Clone-able façade over the dispatcher's command channel.
#[derive(Clone)]
pub struct RouterHandle {
    cmd_tx: mpsc::Sender<Command>,
    status_tx: broadcast::Sender<PersistedRequest>,
}

impl RouterHandle {
    async fn send<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> std::result::Result<T, RouterError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(reply))
            .await
            .map_err(|_| RouterError::DispatcherGone)?;
        rx.await.map_err(|_| RouterError::DispatcherGone)
    }

    /// Place a request into its provider queue.
    ///
    /// Resubmitting a non-terminal request id is idempotent: the metadata is
    /// updated last-write-wins, nothing is inserted into any queue, and the
    /// outcome reports `created: false`.
    pub async fn enqueue(&self, data: RequestData) -> Result<EnqueueOutcome> {
        self.send(|reply| Command::Enqueue { data, reply }).await?
    }

    /// Current lifecycle snapshot with live queue position.
    pub async fn status(&self, id: RequestId) -> Result<RequestView> {
        self.send(|reply| Command::Status { id, reply }).await?
    }

    /// Cancel a pending or queued request. Refused for in-flight work.
    pub async fn cancel(&self, id: RequestId) -> Result<RequestView> {
        self.send(|reply| Command::Cancel { id, reply }).await?
    }

    /// Report the outcome of a dispatched request.
    pub async fn complete(&self, id: RequestId, outcome: CompletionOutcome) -> Result<RequestView> {
        self.send(|reply| Command::Complete { id, outcome, reply }).await?
    }

    /// Counts and per-provider queue snapshots.
    pub async fn state(&self) -> Result<RouterStateView> {
        self.send(|reply| Command::State { reply }).await
    }

    /// Subscribe to request status transitions.
    pub fn subscribe(&self) -> broadcast::Receiver<PersistedRequest> {
        self.status_tx.subscribe()
    }
}

/// A running router: the handle, the dispatch-notification stream, and the
/// dispatcher task itself.
pub struct Router {
    pub handle: RouterHandle,
    pub notifications: mpsc::Receiver<ProcessingNotification>,
    pub task: tokio::task::JoinHandle<()>,
}

impl Router {
    /// Restore state from the store and spawn the dispatcher task.
    pub async fn spawn(
        config: RouterConfig,
        store: Arc<dyn RouterStore>,
        shutdown: CancellationToken,
    ) -> Result<Router> {
        let (cmd_tx, cmd_rx) = mpsc::channel(config.command_buffer);
        let (notify_tx, notify_rx) = mpsc::channel(config.notify_buffer);
        let (status_tx, _) = broadcast::channel(config.status_buffer);

        let mut dispatcher = Dispatcher {
            config,
            store,
            requests: HashMap::new(),
            queues: HashMap::new(),
            notify_tx,
            status_tx: status_tx.clone(),
        };

        if let Some(snapshot) = dispatcher.store.load().await? {
            dispatcher.restore(snapshot);
        }

        let task = tokio::spawn(dispatcher.run(cmd_rx, shutdown));

        Ok(Router {
            handle: RouterHandle { cmd_tx, status_tx },
            notifications: notify_rx,
            task,
        })
    }
}

struct Dispatcher {
    config: RouterConfig,
    store: Arc<dyn RouterStore>,
    requests: HashMap<RequestId, AnyRequest>,
    queues: HashMap<ProviderKey, ProviderQueue>,
    notify_tx: mpsc::Sender<ProcessingNotification>,
    status_tx: broadcast::Sender<PersistedRequest>,
}

impl Dispatcher {
    #[tracing::instrument(skip_all)]
    async fn run(mut self, mut cmd_rx: mpsc::Receiver<Command>, shutdown: CancellationToken) {
        tracing::info!(queues = self.queues.len(), requests = self.requests.len(), "Dispatcher starting");

        // An initial pass picks up anything restored from a snapshot.
        self.dispatch_all();
        self.persist().await;

        let mut tick = tokio::time::interval(self.config.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Dispatcher received shutdown signal");
                    break;
                }
                command = cmd_rx.recv() => {
                    match command {
                        Some(command) => {
                            let mutated = self.handle(command);
                            if mutated {
                                self.persist().await;
                            }
                        }
                        None => {
                            tracing::info!("Command channel closed, dispatcher exiting");
                            break;
                        }
                    }
                }
                _ = tick.tick() => {
                    self.dispatch_all();
                    self.persist().await;
                }
            }
        }

        // Final snapshot so a clean shutdown loses nothing.
        self.persist().await;
        tracing::info!("Dispatcher exited");
    }

    /// Apply one command. Returns whether state may have changed.
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Enqueue { data, reply } => {
                let result = self.enqueue(data);
                let _ = reply.send(result);
                true
            }
            Command::Status { id, reply } => {
                let _ = reply.send(self.view(id));
                false
            }
            Command::Cancel { id, reply } => {
                let result = self.cancel(id);
                let _ = reply.send(result);
                true
            }
            Command::Complete { id, outcome, reply } => {
                let result = self.complete(id, outcome);
                let _ = reply.send(result);
                true
            }
            Command::State { reply } => {
                let _ = reply.send(self.state_view());
                false
            }
        }
    }

    fn enqueue(&mut self, data: RequestData) -> Result<EnqueueOutcome> {
        // Idempotent resubmission: last-write-wins on metadata, never a
        // duplicate queue insertion, no status broadcast. Terminal requests
        // conflict.
        if let Some(existing) = self.requests.get_mut(&data.id) {
            if existing.is_terminal() {
                return Err(RouterError::InvalidState {
                    id: data.id,
                    actual: existing.state_name(),
                    expected: "non-terminal",
                });
            }
            existing.data_mut().metadata = data.metadata;
            tracing::debug!(request_id = %data.id, "Resubmission updated metadata");
            return Ok(EnqueueOutcome {
                view: self.view(data.id)?,
                created: false,
            });
        }

        let id = data.id;
        let priority = data.priority;
        let key = ProviderKey::new(data.provider.clone(), data.model.clone());

        let request = Request {
            state: Pending {},
            data,
        }
        .enqueue();

        let quota = self.config.quota_for(&key.provider);
        let queue = self
            .queues
            .entry(key.clone())
            .or_insert_with(|| ProviderQueue::new(key.clone(), quota, Instant::now()));
        let position = queue.insert(id, priority);
        let estimate = queue.estimated_wait_ms(position);

        let any = AnyRequest::from(request);
        let _ = self.status_tx.send(PersistedRequest::from(&any));
        self.requests.insert(id, any);

        tracing::info!(request_id = %id, queue = %key, position, "Request queued");

        let view = RequestView {
            request: PersistedRequest::from(&self.requests[&id]),
            queue_position: Some(position),
            estimated_wait_ms: Some(estimate),
        };

        self.dispatch_all();
        Ok(EnqueueOutcome { view, created: true })
    }

    fn cancel(&mut self, id: RequestId) -> Result<RequestView> {
        let any = self
            .requests
            .remove(&id)
            .ok_or(RouterError::RequestNotFound(id))?;

        let result = match any {
            AnyRequest::Pending(r) => Ok(AnyRequest::from(r.cancel())),
            AnyRequest::Queued(r) => {
                // Removal from the queue is atomic with the transition: both
                // happen inside this single dispatcher command.
                let key = ProviderKey::new(r.data.provider.clone(), r.data.model.clone());
                if let Some(queue) = self.queues.get_mut(&key) {
                    queue.remove(id);
                }
                Ok(AnyRequest::from(r.cancel()))
            }
            // Repeated cancels are idempotent.
            AnyRequest::Cancelled(r) => Ok(AnyRequest::Cancelled(r)),
            other => Err(other),
        };

        match result {
            Ok(cancelled) => {
                let _ = self.status_tx.send(PersistedRequest::from(&cancelled));
                self.requests.insert(id, cancelled);
                tracing::info!(request_id = %id, "Request cancelled");
                self.view(id)
            }
            Err(untouched) => {
                let actual = untouched.state_name();
                self.requests.insert(id, untouched);
                Err(RouterError::InvalidState {
                    id,
                    actual,
                    expected: "pending or queued",
                })
            }
        }
    }

    fn complete(&mut self, id: RequestId, outcome: CompletionOutcome) -> Result<RequestView> {
        let any = self
            .requests
            .remove(&id)
            .ok_or(RouterError::RequestNotFound(id))?;

        let processing = match any {
            AnyRequest::Processing(r) => r,
            terminal if terminal.is_terminal() => {
                // A completion racing a sweep or a repeated callback: the
                // lifecycle is already closed, report it as-is.
                tracing::debug!(request_id = %id, state = terminal.state_name(), "Completion for terminal request ignored");
                self.requests.insert(id, terminal);
                return self.view(id);
            }
            other => {
                let actual = other.state_name();
                self.requests.insert(id, other);
                return Err(RouterError::InvalidState {
                    id,
                    actual,
                    expected: "processing",
                });
            }
        };

        let key = ProviderKey::new(processing.data.provider.clone(), processing.data.model.clone());

        // Release the concurrency slot regardless of outcome.
        if let Some(queue) = self.queues.get_mut(&key) {
            queue.release(id);
            if let Some(delay) = outcome.retry_after {
                queue.bucket_mut().hold_for(delay, Instant::now());
            }
        }

        let next = if outcome.success {
            tracing::info!(request_id = %id, "Request completed");
            AnyRequest::from(processing.complete())
        } else if outcome.retryable && processing.can_retry() {
            let requeued = processing.requeue();
            let retry_count = requeued.state.retry_count;
            let priority = requeued.data.priority;
            // Retries skip the back of the queue.
            if let Some(queue) = self.queues.get_mut(&key) {
                queue.insert_front(id, priority);
            }
            tracing::warn!(
                request_id = %id,
                retry_count,
                error = outcome.error.as_deref().unwrap_or(""),
                "Request failed, requeued at head"
            );
            AnyRequest::from(requeued)
        } else {
            let error = outcome.error.unwrap_or_else(|| "unknown failure".to_string());
            tracing::warn!(request_id = %id, error = %error, "Request failed terminally");
            AnyRequest::from(processing.fail(error))
        };

        let _ = self.status_tx.send(PersistedRequest::from(&next));
        self.requests.insert(id, next);

        let view = self.view(id);
        self.dispatch_all();
        view
    }

    /// Run the dispatch algorithm over every provider queue.
    fn dispatch_all(&mut self) {
        let now = Instant::now();
        let keys: Vec<ProviderKey> = self.queues.keys().cloned().collect();

        for key in keys {
            loop {
                let queue = match self.queues.get_mut(&key) {
                    Some(queue) => queue,
                    None => break,
                };
                queue.bucket_mut().roll(now);
                if !queue.can_dispatch(now) {
                    break;
                }
                let entry = match queue.pop_front() {
                    Some(entry) => entry,
                    None => break,
                };

                // Stale or cancelled ids are skipped without consuming quota.
                let any = match self.requests.remove(&entry.id) {
                    Some(any) => any,
                    None => continue,
                };
                let queued = match any {
                    AnyRequest::Queued(r) => r,
                    other => {
                        self.requests.insert(entry.id, other);
                        continue;
                    }
                };

                let processing = queued.start();
                let notification = ProcessingNotification::from(&processing.data);
                queue.mark_in_flight(entry.id);

                let any = AnyRequest::from(processing);
                let _ = self.status_tx.send(PersistedRequest::from(&any));
                self.requests.insert(entry.id, any);

                tracing::info!(request_id = %entry.id, queue = %key, "Request dispatched");

                // A full notification channel is treated like any other
                // processing failure: the request stays in flight and is
                // resolved via the complete path (or the timeout sweep).
                if let Err(err) = self.notify_tx.try_send(notification) {
                    tracing::warn!(request_id = %entry.id, error = %err, "Dispatch notification not delivered");
                }
            }
        }
    }

    fn view(&self, id: RequestId) -> Result<RequestView> {
        let any = self.requests.get(&id).ok_or(RouterError::RequestNotFound(id))?;
        let (queue_position, estimated_wait_ms) = match any {
            AnyRequest::Queued(r) => {
                let key = ProviderKey::new(r.data.provider.clone(), r.data.model.clone());
                match self.queues.get(&key).and_then(|queue| {
                    queue.position(id).map(|position| (position, queue.estimated_wait_ms(position)))
                }) {
                    Some((position, estimate)) => (Some(position), Some(estimate)),
                    None => (None, None),
                }
            }
            _ => (None, None),
        };
        Ok(RequestView {
            request: PersistedRequest::from(any),
            queue_position,
            estimated_wait_ms,
        })
    }

    fn state_view(&self) -> RouterStateView {
        let mut counts_by_state: HashMap<String, usize> = HashMap::new();
        for request in self.requests.values() {
            *counts_by_state.entry(request.state_name().to_string()).or_default() += 1;
        }

        let queues = self
            .queues
            .values()
            .map(|queue| QueueView {
                provider: queue.key.provider.clone(),
                model: queue.key.model.clone(),
                depth: queue.len(),
                in_flight: queue.in_flight_count(),
                minute_count: queue.bucket().minute_count(),
                requests_per_minute: queue.bucket().quota().requests_per_minute,
                max_concurrent: queue.bucket().quota().max_concurrent,
            })
            .collect();

        let processing = self
            .requests
            .values()
            .filter_map(|any| match any {
                AnyRequest::Processing(r) => Some(ProcessingView {
                    request_id: r.data.id,
                    provider: r.data.provider.clone(),
                    started_at: r.state.started_at,
                }),
                _ => None,
            })
            .collect();

        RouterStateView {
            total_requests: self.requests.len(),
            counts_by_state,
            queues,
            processing,
        }
    }

    fn snapshot(&self) -> RouterSnapshot {
        RouterSnapshot {
            requests: self.requests.values().map(PersistedRequest::from).collect(),
            queues: self
                .queues
                .values()
                .map(|queue| QueueSnapshot {
                    provider: queue.key.provider.clone(),
                    model: queue.key.model.clone(),
                    queue: queue.entries().copied().collect(),
                    in_flight: queue.in_flight_ids().copied().collect(),
                    minute_count: queue.bucket().minute_count(),
                })
                .collect(),
            taken_at: chrono::Utc::now(),
        }
    }

    async fn persist(&self) {
        let snapshot = self.snapshot();
        if let Err(err) = self.store.save(&snapshot).await {
            // The in-memory state stays authoritative; the next successful
            // save catches up.
            tracing::error!(error = %err, "Failed to persist router snapshot");
        }
    }

    /// Rebuild state from a snapshot taken before a restart or crash.
    fn restore(&mut self, snapshot: RouterSnapshot) {
        let now = Instant::now();

        for persisted in &snapshot.requests {
            let any = persisted.clone().revive();
            self.requests.insert(any.id(), any);
        }

        for queue_snapshot in snapshot.queues {
            let key = ProviderKey::new(queue_snapshot.provider.clone(), queue_snapshot.model.clone());
            let quota = self.config.quota_for(&key.provider);
            let mut queue = ProviderQueue::new(key.clone(), quota, now);
            let entries = queue_snapshot
                .queue
                .into_iter()
                .filter(|entry| {
                    self.requests
                        .get(&entry.id)
                        .map_or(false, |any| matches!(any, AnyRequest::Queued(_)))
                })
                .collect::<Vec<_>>();
            queue.restore(entries, queue_snapshot.minute_count, now);
            self.queues.insert(key, queue);
        }

        // Anything that was in flight never produced an outcome: requeue it
        // at the head with its retry count preserved. A request persisted as
        // pending (crash between accept and enqueue) goes to the tail.
        let ids: Vec<RequestId> = snapshot.requests.iter().map(|r| r.data.id).collect();
        for id in ids {
            let Some(any) = self.requests.remove(&id) else { continue };
            let restored = match any {
                AnyRequest::Processing(r) => {
                    let recovered = r.recover();
                    let key = ProviderKey::new(recovered.data.provider.clone(), recovered.data.model.clone());
                    let quota = self.config.quota_for(&key.provider);
                    let queue = self
                        .queues
                        .entry(key.clone())
                        .or_insert_with(|| ProviderQueue::new(key, quota, now));
                    queue.insert_front(id, recovered.data.priority);
                    tracing::info!(request_id = %id, "Recovered in-flight request to queue head");
                    AnyRequest::from(recovered)
                }
                AnyRequest::Pending(r) => {
                    let queued = r.enqueue();
                    let key = ProviderKey::new(queued.data.provider.clone(), queued.data.model.clone());
                    let quota = self.config.quota_for(&key.provider);
                    let priority = queued.data.priority;
                    let queue = self
                        .queues
                        .entry(key.clone())
                        .or_insert_with(|| ProviderQueue::new(key, quota, now));
                    queue.insert(id, priority);
                    tracing::info!(request_id = %id, "Recovered pending request to queue");
                    AnyRequest::from(queued)
                }
                other => other,
            };
            self.requests.insert(id, restored);
        }

        tracing::info!(
            requests = self.requests.len(),
            queues = self.queues.len(),
            "Router state restored from snapshot"
        );
    }
}
