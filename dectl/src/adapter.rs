//! Backend adapter dispatch.
//!
//! Consumes the router's processing notifications and POSTs each one to the
//! configured adapter endpoint for its provider. Backend protocols are
//! external: this worker only frames the dispatch and reports transport
//! failures back to the router; results arrive out-of-band via `/deliver`
//! or `/webhook`. Providers without an endpoint simply await their callback.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use conductor::{CompletionOutcome, ProcessingNotification, RouterHandle};

use crate::config::AdapterSettings;

pub fn spawn_adapter_worker(
    mut notifications: mpsc::Receiver<ProcessingNotification>,
    router: RouterHandle,
    settings: AdapterSettings,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let client = reqwest::Client::builder()
        .timeout(settings.timeout)
        .build()
        .expect("failed to build adapter HTTP client");

    tokio::spawn(async move {
        loop {
            let notification = tokio::select! {
                _ = shutdown.cancelled() => break,
                notification = notifications.recv() => match notification {
                    Some(notification) => notification,
                    None => break,
                }
            };

            let Some(endpoint) = settings.endpoints.get(&notification.provider).cloned() else {
                tracing::debug!(
                    request_id = %notification.request_id,
                    provider = %notification.provider,
                    "No adapter endpoint configured, awaiting delivery callback"
                );
                continue;
            };

            let client = client.clone();
            let router = router.clone();
            tokio::spawn(async move {
                dispatch_one(client, router, endpoint, notification).await;
            });
        }
        tracing::debug!("Adapter worker exited");
    })
}

#[tracing::instrument(skip_all, fields(request_id = %notification.request_id, provider = %notification.provider))]
async fn dispatch_one(
    client: reqwest::Client,
    router: RouterHandle,
    endpoint: String,
    notification: ProcessingNotification,
) {
    let failure = match client.post(&endpoint).json(&notification).send().await {
        Ok(response) if response.status().is_success() => {
            tracing::debug!("Adapter accepted dispatch");
            return;
        }
        Ok(response) => format!("adapter returned HTTP {}", response.status().as_u16()),
        Err(err) => format!("adapter dispatch failed: {}", err),
    };

    tracing::warn!(error = %failure, "Adapter dispatch failed");
    // Resolved like any other processing failure: the retry budget applies.
    if let Err(err) = router
        .complete(notification.request_id, CompletionOutcome::failure(failure))
        .await
    {
        tracing::warn!(error = %err, "Failed to report adapter failure to router");
    }
}
