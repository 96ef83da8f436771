//! Routing and queue engine for AI generation requests.
//!
//! This crate provides a single-writer router: one dispatcher task owns the
//! request map and one in-memory queue per provider, enforcing per-provider
//! rate limits, concurrency caps, weak priority ordering, and bounded retry.
//! All mutations flow through a bounded command channel; readers use the
//! same channel or the status broadcast. State is snapshotted to a
//! `RouterStore` after every mutation and replayed on cold start, requeueing
//! in-flight work at the head of its queue.
//!
//! # Example
//! ```no_run
//! use conductor::{Router, RouterConfig, InMemoryRouterStore};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(InMemoryRouterStore::new());
//!     let shutdown = CancellationToken::new();
//!     let mut router = Router::spawn(RouterConfig::default(), store, shutdown).await?;
//!
//!     // Consume dispatch notifications with an adapter worker
//!     tokio::spawn(async move {
//!         while let Some(notification) = router.notifications.recv().await {
//!             println!("dispatch {} to {}", notification.request_id, notification.provider);
//!         }
//!     });
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod queue;
pub mod request;
pub mod snapshot;
pub mod storage;

pub use config::RouterConfig;
pub use dispatcher::{
    CompletionOutcome, EnqueueOutcome, ProcessingNotification, ProcessingView, QueueView,
    RequestView, Router, RouterHandle, RouterStateView,
};
pub use error::{Result, RouterError};
pub use queue::{ProviderKey, ProviderQueue, ProviderQuota, RateLimitBucket};
pub use request::{AnyRequest, Request, RequestData, RequestId};
pub use snapshot::{PersistedRequest, QueueSnapshot, RouterSnapshot};
pub use storage::in_memory::InMemoryRouterStore;
pub use storage::RouterStore;

#[cfg(feature = "postgres")]
pub use storage::postgres::PostgresRouterStore;
