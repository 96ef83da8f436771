//! Helpers for building an application against in-memory stores.
//!
//! Kept free of test-only dependencies so integration tests can wrap the
//! returned router in whatever harness they prefer.

use std::time::Duration;

use crate::config::{Config, QuotaSettings};
use crate::Application;

/// A config tuned for tests: in-memory stores, fast ticks, fast webhook
/// retries, and no tenant limit.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.database = None;
    config.router.tick_interval = Duration::from_millis(50);
    config.webhooks.initial_backoff = Duration::from_millis(10);
    config.webhooks.timeout = Duration::from_secs(5);
    config.adapters.sweep_interval = Duration::from_millis(100);
    config.limits.tenant_requests_per_minute = None;
    config
}

/// A config whose named provider never dispatches, keeping requests queued.
pub fn test_config_with_parked_provider(provider: &str) -> Config {
    let mut config = test_config();
    config.router.provider_quotas.insert(
        provider.to_string(),
        QuotaSettings {
            requests_per_minute: 60,
            max_concurrent: 0,
            tokens_per_minute: None,
            expected_processing_ms: None,
        },
    );
    config
}

/// Build a full application over in-memory stores.
pub async fn create_test_app() -> Application {
    create_test_app_with(test_config()).await
}

pub async fn create_test_app_with(config: Config) -> Application {
    Application::new(config).await.expect("test application should build")
}
