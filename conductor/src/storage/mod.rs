use async_trait::async_trait;

use crate::error::Result;
use crate::snapshot::RouterSnapshot;

pub mod in_memory;

#[cfg(feature = "postgres")]
pub mod postgres;

/// Durable storage for router snapshots.
///
/// The dispatcher is the single writer: it saves after every state-changing
/// command and loads exactly once on cold start. Implementations only need
/// whole-snapshot semantics; there is no row-level contention to manage.
#[async_trait]
pub trait RouterStore: Send + Sync {
    /// Persist the current snapshot, replacing any previous one.
    async fn save(&self, snapshot: &RouterSnapshot) -> Result<()>;

    /// Load the most recent snapshot, if one exists.
    async fn load(&self) -> Result<Option<RouterSnapshot>>;
}
