//! Intake handlers: submit, status, cancel.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;

use conductor::{RequestData, RouterError};

use crate::{
    api::extract::AppJson,
    api::models::intake::{CancelRequest, CancelResponse, StatusResponse, SubmitRequest, SubmitResponse},
    classifier::{classify, parse_task_type, ClassifyHints},
    errors::{Error, Result},
    events::NewEvent,
    types::EventPointer,
    AppState,
};

/// Submit a new work request.
#[utoipa::path(
    post,
    path = "/intake",
    tag = "intake",
    request_body = SubmitRequest,
    responses(
        (status = 202, description = "Request accepted and queued", body = SubmitResponse),
        (status = 400, description = "Missing or invalid fields"),
        (status = 409, description = "Terminal request id resubmitted"),
        (status = 429, description = "Tenant rate limit exceeded"),
    )
)]
#[instrument(skip_all)]
pub async fn submit(
    State(state): State<AppState>,
    AppJson(body): AppJson<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitResponse>)> {
    let query = body.query.as_deref().map(str::trim).unwrap_or_default();
    if query.is_empty() {
        return Err(Error::MissingQuery);
    }

    let tenant = body.tenant.clone().unwrap_or_else(|| "default".to_string());
    if !state.limiter.admit(&tenant) {
        return Err(Error::RateLimitExceeded {
            message: format!("tenant {} exceeded its submission rate", tenant),
        });
    }

    let task_hint = body
        .task_type
        .as_deref()
        .map(parse_task_type)
        .transpose()
        .map_err(|message| Error::InvalidRequest { message })?;

    let hints = ClassifyHints {
        task_type: task_hint,
        executor: body.executor.clone().or_else(|| body.provider.clone()),
        model: body.primary_model.clone().or_else(|| body.model.clone()),
        repo_url: body.repo_url.clone(),
    };
    let classification = classify(query, &hints);

    let mut metadata = body.metadata.clone().unwrap_or_default();
    if let Some(timeout_ms) = body.timeout_ms {
        metadata.insert("timeout_ms".to_string(), json!(timeout_ms));
    }

    let request_id = body.request_id.unwrap_or_else(Uuid::new_v4);
    let data = RequestData {
        id: request_id,
        tenant: tenant.clone(),
        app_id: body.app_id.clone(),
        instance_id: body.instance_id.clone(),
        query: query.to_string(),
        task_type: classification.task_type.to_string(),
        provider: classification.provider.clone(),
        model: Some(classification.model.clone()),
        model_waterfall: body.model_waterfall.clone().unwrap_or_default(),
        priority: body.priority.unwrap_or(0),
        callback_url: body.callback_url.clone(),
        metadata,
        max_retries: body.max_retries.unwrap_or(state.config.router.default_max_retries),
        created_at: Utc::now(),
    };

    let outcome = state.router.enqueue(data).await.map_err(|err| match err {
        RouterError::InvalidState { id, actual, .. } => Error::Conflict {
            message: format!("request {} is already {}", id, actual),
        },
        other => Error::Router(other),
    })?;

    // Events are append-only, so an idempotent resubmission of a still
    // non-terminal id must not record a second request.created.
    if outcome.created {
        let tracked = state
            .tracker
            .track(
                NewEvent::new(&tenant, "request.created", EventPointer::request(request_id))
                    .with_user(body.user_id.clone())
                    .with_particular("task_type", json!(classification.task_type.to_string()))
                    .with_particular("provider", json!(classification.provider))
                    .with_particular("confidence", json!(classification.confidence)),
            )
            .await;
        if let Err(err) = tracked {
            tracing::warn!(error = %err, "Failed to record request.created");
        }
    } else {
        tracing::debug!(request_id = %request_id, "Idempotent resubmission, no event recorded");
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            request_id,
            state: outcome.view.state().to_string(),
            queue_position: outcome.view.queue_position,
            estimated_wait_ms: outcome.view.estimated_wait_ms,
            workflow_handle: None,
            task_type: classification.task_type.to_string(),
            provider: classification.provider,
            model: Some(classification.model),
            confidence: classification.confidence,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct StatusParams {
    pub request_id: Option<String>,
}

/// Current lifecycle snapshot of a request.
#[utoipa::path(
    get,
    path = "/status",
    tag = "intake",
    params(("request_id" = String, Query, description = "Request id")),
    responses(
        (status = 200, description = "Lifecycle snapshot", body = StatusResponse),
        (status = 404, description = "Unknown request id"),
    )
)]
#[instrument(skip_all)]
pub async fn status(
    State(state): State<AppState>,
    Query(params): Query<StatusParams>,
) -> Result<Json<StatusResponse>> {
    let raw = params.request_id.ok_or(Error::MissingParam { param: "request_id" })?;
    let request_id = Uuid::parse_str(&raw).map_err(|_| Error::InvalidRequest {
        message: format!("request_id {} is not a UUID", raw),
    })?;

    let view = state.router.status(request_id).await.map_err(map_not_found)?;
    Ok(Json(view.into()))
}

/// Cancel a pending or queued request.
#[utoipa::path(
    post,
    path = "/cancel",
    tag = "intake",
    request_body = CancelRequest,
    responses(
        (status = 200, description = "Request cancelled", body = CancelResponse),
        (status = 400, description = "Request is already in flight or terminal"),
        (status = 404, description = "Unknown request id"),
    )
)]
#[instrument(skip_all)]
pub async fn cancel(
    State(state): State<AppState>,
    AppJson(body): AppJson<CancelRequest>,
) -> Result<Json<CancelResponse>> {
    let request_id = body.request_id.ok_or(Error::MissingField { field: "request_id" })?;

    let view = state.router.cancel(request_id).await.map_err(|err| match err {
        RouterError::RequestNotFound(id) => Error::NotFound {
            resource: "request",
            id: id.to_string(),
        },
        RouterError::InvalidState { id, actual, .. } => Error::InvalidStatus {
            message: format!("request {} is {}, only pending or queued can be cancelled", id, actual),
        },
        other => Error::Router(other),
    })?;

    Ok(Json(CancelResponse {
        request_id,
        state: view.state().to_string(),
    }))
}

fn map_not_found(err: RouterError) -> Error {
    match err {
        RouterError::RequestNotFound(id) => Error::NotFound {
            resource: "request",
            id: id.to_string(),
        },
        other => Error::Router(other),
    }
}
