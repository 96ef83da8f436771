//! `dectl` is an asynchronous request orchestration service for
//! heterogeneous AI generation backends.
//!
//! Clients submit free-form work to a single intake boundary; the service
//! classifies each request, enforces per-tenant and per-provider limits,
//! queues and dispatches work through the [`conductor`] routing engine,
//! grades returned artifacts behind a quality gate, records durable audit
//! events with an activity-feed projection, and fans events out to webhook
//! subscribers with HMAC-signed payloads.
//!
//! The binary wires five background services around the HTTP API: the
//! router dispatcher, the adapter worker consuming dispatch notifications,
//! the status listener that turns lifecycle transitions into events, the
//! adapter-timeout sweep, and webhook fan-out.
//!
//! See the [`config`] module for configuration options.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

pub mod adapter;
pub mod api;
pub mod classifier;
pub mod config;
pub mod delivery;
pub mod errors;
pub mod events;
pub mod lifecycle;
pub mod limits;
pub mod quality;
pub mod store;
pub mod types;
pub mod webhooks;

pub mod test_utils;

pub use config::Config;
pub use errors::{Error, Result};

use conductor::{InMemoryRouterStore, Router, RouterHandle, RouterStore};
use delivery::DeliveryService;
use events::EventTracker;
use limits::TenantRateLimiter;
use store::memory::MemoryStore;
use store::Store;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub router: RouterHandle,
    pub tracker: Arc<EventTracker>,
    pub delivery: Arc<DeliveryService>,
    pub limiter: Arc<TenantRateLimiter>,
    pub config: Arc<Config>,
}

/// The assembled application: HTTP router plus background services.
pub struct Application {
    router: axum::Router,
    state: AppState,
    shutdown: CancellationToken,
    host: String,
    port: u16,
}

impl Application {
    /// Create a new application instance with all resources initialized.
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let shutdown = CancellationToken::new();

        let (store, router_store) = build_stores(&config).await?;

        let engine = Router::spawn(config.router_config(), router_store, shutdown.clone()).await?;
        let Router {
            handle,
            notifications,
            task: _dispatcher,
        } = engine;

        let (fanout_handle, _fanout) =
            webhooks::fanout::spawn(store.clone(), config.webhooks.clone(), shutdown.clone());
        let tracker = Arc::new(EventTracker::new(store.clone(), Some(fanout_handle)));
        let delivery = Arc::new(DeliveryService::new(
            store.clone(),
            handle.clone(),
            tracker.clone(),
            config.quality,
        ));

        let _listener = lifecycle::spawn_status_listener(handle.clone(), tracker.clone(), shutdown.clone());
        let _sweep = lifecycle::spawn_timeout_sweep(
            handle.clone(),
            store.clone(),
            config.adapters.clone(),
            shutdown.clone(),
        );
        let _adapter =
            adapter::spawn_adapter_worker(notifications, handle.clone(), config.adapters.clone(), shutdown.clone());

        let limiter = Arc::new(TenantRateLimiter::new(config.limits.tenant_requests_per_minute));

        let host = config.host.clone();
        let port = config.port;
        let state = AppState {
            store,
            router: handle,
            tracker,
            delivery,
            limiter,
            config: Arc::new(config),
        };
        let router = api::app(state.clone());

        Ok(Self {
            router,
            state,
            shutdown,
            host,
            port,
        })
    }

    /// The HTTP router, for in-process test servers.
    pub fn router(&self) -> axum::Router {
        self.router.clone()
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve until the shutdown signal resolves, then stop background tasks.
    pub async fn serve(self, shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static) -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind((self.host.as_str(), self.port)).await?;
        tracing::info!(host = %self.host, port = self.port, "Listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown_signal)
            .await?;

        self.shutdown.cancel();
        Ok(())
    }
}

#[cfg(feature = "postgres")]
async fn build_stores(config: &Config) -> anyhow::Result<(Arc<dyn Store>, Arc<dyn RouterStore>)> {
    match &config.database {
        Some(database) => {
            let pool = sqlx::postgres::PgPoolOptions::new()
                .max_connections(database.max_connections)
                .connect(&database.url)
                .await?;
            let store = store::postgres::PostgresStore::new(pool.clone());
            store.migrate().await?;
            tracing::info!("Using PostgreSQL storage");
            Ok((
                Arc::new(store),
                Arc::new(conductor::PostgresRouterStore::new(pool)),
            ))
        }
        None => {
            tracing::info!("No database configured, using in-memory storage");
            Ok((Arc::new(MemoryStore::new()), Arc::new(InMemoryRouterStore::new())))
        }
    }
}

#[cfg(not(feature = "postgres"))]
async fn build_stores(config: &Config) -> anyhow::Result<(Arc<dyn Store>, Arc<dyn RouterStore>)> {
    if config.database.is_some() {
        anyhow::bail!("database configured but the postgres feature is disabled");
    }
    tracing::info!("Using in-memory storage");
    Ok((Arc::new(MemoryStore::new()), Arc::new(InMemoryRouterStore::new())))
}
