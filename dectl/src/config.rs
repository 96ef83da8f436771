//! Application configuration management.
//!
//! Configuration is loaded from a YAML file with environment variable
//! overrides. The file path defaults to `config.yaml` and can be set via the
//! `-f` flag or `DECTL_CONFIG`. Environment variables prefixed with `DECTL_`
//! override YAML values; nested fields use double underscores, e.g.
//! `DECTL_ROUTER__DEFAULT_RPM=10`. `DATABASE_URL` overrides `database.url`.
//!
//! Every tunable default in the system lives here and is injected at process
//! start; modules carry no globals.

use std::collections::HashMap;
use std::time::Duration;

use clap::Parser;
use figment::{
    providers::{Env, Format, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};

use conductor::{ProviderQuota, RouterConfig};

/// Simple CLI args - just for specifying the config file.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file
    #[arg(short = 'f', long, env = "DECTL_CONFIG", default_value = "config.yaml")]
    pub config: String,

    /// Validate configuration and exit without starting the server.
    #[arg(long)]
    pub validate: bool,
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server host to bind to
    pub host: String,
    /// HTTP server port to bind to
    pub port: u16,
    /// PostgreSQL connection; in-memory stores are used when absent
    pub database: Option<DatabaseConfig>,
    /// Routing engine settings
    pub router: RouterSettings,
    /// Quality gate thresholds
    pub quality: QualitySettings,
    /// Webhook fan-out policy
    pub webhooks: WebhookSettings,
    /// Backend adapter dispatch settings
    pub adapters: AdapterSettings,
    /// Per-tenant intake limits
    pub limits: LimitSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            database: None,
            router: RouterSettings::default(),
            quality: QualitySettings::default(),
            webhooks: WebhookSettings::default(),
            adapters: AdapterSettings::default(),
            limits: LimitSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    10
}

/// Routing engine settings, flattened into [`conductor::RouterConfig`].
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RouterSettings {
    /// Requests per minute for providers without an explicit quota
    pub default_rpm: u32,
    /// Concurrent cap for providers without an explicit quota
    pub default_concurrent: usize,
    /// Expected processing time used for wait estimates
    pub default_expected_processing_ms: u64,
    /// Periodic dispatch tick
    #[serde(with = "humantime_serde")]
    pub tick_interval: Duration,
    /// Retry bound applied when a submission does not set one
    pub default_max_retries: u32,
    /// Per-provider quota overrides
    pub provider_quotas: HashMap<String, QuotaSettings>,
}

impl Default for RouterSettings {
    fn default() -> Self {
        Self {
            default_rpm: 30,
            default_concurrent: 5,
            default_expected_processing_ms: 5_000,
            tick_interval: Duration::from_secs(5),
            default_max_retries: 3,
            provider_quotas: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct QuotaSettings {
    pub requests_per_minute: u32,
    pub max_concurrent: usize,
    pub tokens_per_minute: Option<u32>,
    pub expected_processing_ms: Option<u64>,
}

impl Default for QuotaSettings {
    fn default() -> Self {
        Self {
            requests_per_minute: 30,
            max_concurrent: 5,
            tokens_per_minute: None,
            expected_processing_ms: None,
        }
    }
}

/// Quality gate thresholds. These are configuration, not data: the scorer is
/// pure and the gate applies them.
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct QualitySettings {
    /// Auto-approve at or above this score (with no issues)
    pub approve_threshold: f64,
    /// Auto-reject at or below this score
    pub reject_threshold: f64,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            approve_threshold: 0.75,
            reject_threshold: 0.25,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebhookSettings {
    /// Timeout per delivery attempt
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Total attempts per delivery (initial + retries)
    pub max_attempts: u32,
    /// Delay before the first retry; doubles per attempt
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    /// Cap on concurrent outbound sends
    pub max_concurrent_sends: usize,
    /// Bound of the fan-out channel
    pub channel_capacity: usize,
    /// Hosts that receive the notification-service payload shape
    pub notification_hosts: Vec<String>,
}

impl Default for WebhookSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_concurrent_sends: 20,
            channel_capacity: 256,
            notification_hosts: vec!["ntfy.sh".to_string()],
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AdapterSettings {
    /// Adapter endpoint per provider; providers without one await their
    /// `/deliver` callback
    pub endpoints: HashMap<String, String>,
    /// Timeout per dispatch POST
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Cadence of the adapter-timeout sweep
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    /// How long an in-flight request may await its callback before it is
    /// reaped as "adapter timeout"
    #[serde(with = "humantime_serde")]
    pub callback_deadline: Duration,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            endpoints: HashMap::new(),
            timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(30),
            callback_deadline: Duration::from_secs(600),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitSettings {
    /// Submissions per tenant per minute; `None` disables the limit
    pub tenant_requests_per_minute: Option<u32>,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            tenant_requests_per_minute: Some(600),
        }
    }
}

impl Config {
    /// Load configuration from the YAML file and environment.
    pub fn load(args: &Args) -> anyhow::Result<Self> {
        // DECTL_CONFIG belongs to the CLI, not the config tree.
        let mut figment = Figment::new().merge(Yaml::file(&args.config)).merge(
            Env::prefixed("DECTL_").ignore(&["config"]).split("__"),
        );

        if let Ok(url) = std::env::var("DATABASE_URL") {
            figment = figment.merge(("database.url", url));
        }

        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.quality.reject_threshold > self.quality.approve_threshold {
            anyhow::bail!(
                "quality.reject_threshold ({}) must not exceed quality.approve_threshold ({})",
                self.quality.reject_threshold,
                self.quality.approve_threshold
            );
        }
        if self.webhooks.max_attempts == 0 {
            anyhow::bail!("webhooks.max_attempts must be at least 1");
        }
        Ok(())
    }

    /// Build the engine configuration from the service settings.
    pub fn router_config(&self) -> RouterConfig {
        let default_quota = ProviderQuota {
            requests_per_minute: self.router.default_rpm,
            tokens_per_minute: None,
            max_concurrent: self.router.default_concurrent,
            expected_processing_ms: self.router.default_expected_processing_ms,
        };

        let provider_quotas = self
            .router
            .provider_quotas
            .iter()
            .map(|(provider, quota)| {
                (
                    provider.clone(),
                    ProviderQuota {
                        requests_per_minute: quota.requests_per_minute,
                        tokens_per_minute: quota.tokens_per_minute,
                        max_concurrent: quota.max_concurrent,
                        expected_processing_ms: quota
                            .expected_processing_ms
                            .unwrap_or(self.router.default_expected_processing_ms),
                    },
                )
            })
            .collect();

        RouterConfig {
            default_quota,
            provider_quotas,
            tick_interval: self.router.tick_interval,
            ..RouterConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.router_config().default_quota.requests_per_minute, 30);
    }

    #[test]
    fn yaml_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.yaml",
                r#"
port: 9000
router:
  default_rpm: 10
  provider_quotas:
    openai:
      requests_per_minute: 60
      max_concurrent: 8
"#,
            )?;
            jail.set_env("DECTL_PORT", "9100");
            jail.set_env("DECTL_ROUTER__DEFAULT_CONCURRENT", "2");

            let args = Args {
                config: "config.yaml".to_string(),
                validate: false,
            };
            let config = Config::load(&args).expect("config should load");

            // Env overrides YAML
            assert_eq!(config.port, 9100);
            assert_eq!(config.router.default_rpm, 10);
            assert_eq!(config.router.default_concurrent, 2);

            let router_config = config.router_config();
            let quota = router_config.quota_for("openai");
            assert_eq!(quota.requests_per_minute, 60);
            assert_eq!(quota.max_concurrent, 8);
            // Unknown providers fall back to defaults
            assert_eq!(router_config.quota_for("other").requests_per_minute, 10);
            Ok(())
        });
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let mut config = Config::default();
        config.quality.approve_threshold = 0.2;
        config.quality.reject_threshold = 0.8;
        assert!(config.validate().is_err());
    }
}
