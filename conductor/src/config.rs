//! Router configuration.
//!
//! Injected at process start; the engine carries no module-level defaults.

use std::collections::HashMap;
use std::time::Duration;

use crate::queue::ProviderQuota;

/// Configuration for the routing engine.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Quota applied to providers with no explicit entry. Unrecognized
    /// providers get a queue with this quota created on demand.
    pub default_quota: ProviderQuota,

    /// Per-provider quota overrides, keyed by provider name.
    pub provider_quotas: HashMap<String, ProviderQuota>,

    /// Cadence of the periodic dispatch tick. The tick both reprocesses
    /// queues and rolls rate-limit windows; it is the engine's only
    /// time-based dependency.
    pub tick_interval: Duration,

    /// Bound on the dispatcher's command channel.
    pub command_buffer: usize,

    /// Bound on the outbound dispatch-notification channel.
    pub notify_buffer: usize,

    /// Buffer of the status broadcast channel.
    pub status_buffer: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_quota: ProviderQuota::default(),
            provider_quotas: HashMap::new(),
            tick_interval: Duration::from_secs(5),
            command_buffer: 256,
            notify_buffer: 256,
            status_buffer: 1024,
        }
    }
}

impl RouterConfig {
    /// Quota for a provider, falling back to the default.
    pub fn quota_for(&self, provider: &str) -> ProviderQuota {
        self.provider_quotas
            .get(provider)
            .cloned()
            .unwrap_or_else(|| self.default_quota.clone())
    }
}
