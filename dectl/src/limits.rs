//! Per-tenant intake limits.
//!
//! A fixed-window submissions-per-minute counter per tenant. Windows are
//! process-local; the limit protects this instance's intake, not a global
//! budget.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::time::Instant;

const WINDOW: std::time::Duration = std::time::Duration::from_secs(60);

struct Window {
    count: u32,
    started: Instant,
}

/// Fixed-window rate limiter keyed by tenant.
pub struct TenantRateLimiter {
    cap: Option<u32>,
    windows: Mutex<HashMap<String, Window>>,
}

impl TenantRateLimiter {
    pub fn new(cap: Option<u32>) -> Self {
        Self {
            cap,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Count one submission. Returns false when the tenant is over its cap.
    pub fn admit(&self, tenant: &str) -> bool {
        let Some(cap) = self.cap else { return true };

        let now = Instant::now();
        let mut windows = self.windows.lock();
        let window = windows.entry(tenant.to_string()).or_insert(Window {
            count: 0,
            started: now,
        });

        if now.duration_since(window.started) >= WINDOW {
            window.count = 0;
            window.started = now;
        }

        if window.count >= cap {
            return false;
        }
        window.count += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_cap_admits_everything() {
        let limiter = TenantRateLimiter::new(None);
        for _ in 0..1000 {
            assert!(limiter.admit("acme"));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cap_is_per_tenant_and_per_window() {
        let limiter = TenantRateLimiter::new(Some(2));

        assert!(limiter.admit("acme"));
        assert!(limiter.admit("acme"));
        assert!(!limiter.admit("acme"));
        // Other tenants have their own window
        assert!(limiter.admit("globex"));

        tokio::time::advance(WINDOW).await;
        assert!(limiter.admit("acme"));
    }
}
