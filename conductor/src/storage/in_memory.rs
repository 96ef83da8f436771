//! In-memory snapshot store.
//!
//! Suitable for tests and single-process deployments where restart
//! durability is not required. Cloning shares the underlying slot, which is
//! what restart tests rely on: a new dispatcher built over the same store
//! sees the last snapshot the old one saved.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::Result;
use crate::snapshot::RouterSnapshot;

use super::RouterStore;

#[derive(Clone, Default)]
pub struct InMemoryRouterStore {
    slot: Arc<RwLock<Option<RouterSnapshot>>>,
}

impl InMemoryRouterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RouterStore for InMemoryRouterStore {
    async fn save(&self, snapshot: &RouterSnapshot) -> Result<()> {
        *self.slot.write() = Some(snapshot.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<RouterSnapshot>> {
        Ok(self.slot.read().clone())
    }
}
