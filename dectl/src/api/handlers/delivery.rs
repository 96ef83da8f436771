//! Delivery handlers: deliver, provider webhook, deliverable retrieval and
//! manual review.

use axum::{
    extract::{Query, State},
    response::Json,
};
use serde::Deserialize;
use std::str::FromStr;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    api::extract::AppJson,
    api::models::delivery::{
        ApproveRequest, DeliverRequest, DeliverResponse, DeliverableResponse, RejectRequest,
    },
    delivery::DeliveryInput,
    errors::{Error, Result},
    types::ContentKind,
    AppState,
};

/// Receive a backend response for a request.
#[utoipa::path(
    post,
    path = "/deliver",
    tag = "delivery",
    request_body = DeliverRequest,
    responses(
        (status = 200, description = "Deliverable recorded", body = DeliverResponse),
        (status = 400, description = "Missing or invalid fields"),
        (status = 404, description = "Unknown request id"),
    )
)]
#[instrument(skip_all)]
pub async fn deliver(
    State(state): State<AppState>,
    AppJson(body): AppJson<DeliverRequest>,
) -> Result<Json<DeliverResponse>> {
    let request_id = body.request_id.ok_or(Error::MissingField { field: "request_id" })?;
    let success = body.success.unwrap_or(true);

    let (content_kind, content) = if success {
        let raw_kind = body.content_type.ok_or(Error::MissingField { field: "content_type" })?;
        let kind = ContentKind::from_str(&raw_kind)
            .map_err(|message| Error::InvalidRequest { message })?;
        let content = body.content.ok_or(Error::MissingField { field: "content" })?;
        (kind, content)
    } else {
        (ContentKind::Text, serde_json::Value::Null)
    };

    let deliverable = state
        .delivery
        .deliver(DeliveryInput {
            request_id,
            success,
            content_kind,
            content,
            raw_response: body.raw_response,
            error: body.error,
        })
        .await?;

    Ok(Json(DeliverResponse::from(&deliverable)))
}

#[derive(Debug, Deserialize)]
pub struct WebhookParams {
    pub provider: Option<String>,
}

/// Receive a provider-native webhook and normalize it.
#[utoipa::path(
    post,
    path = "/webhook",
    tag = "delivery",
    params(("provider" = String, Query, description = "Provider name")),
    responses(
        (status = 200, description = "Deliverable recorded", body = DeliverResponse),
        (status = 400, description = "Request id could not be extracted"),
    )
)]
#[instrument(skip_all, fields(provider))]
pub async fn webhook(
    State(state): State<AppState>,
    Query(params): Query<WebhookParams>,
    AppJson(body): AppJson<serde_json::Value>,
) -> Result<Json<DeliverResponse>> {
    let provider = params.provider.ok_or(Error::MissingParam { param: "provider" })?;
    tracing::Span::current().record("provider", provider.as_str());

    let deliverable = state.delivery.webhook(&provider, &body).await?;
    Ok(Json(DeliverResponse::from(&deliverable)))
}

#[derive(Debug, Deserialize)]
pub struct DeliverableParams {
    pub id: Option<Uuid>,
}

/// Fetch a stored deliverable.
#[utoipa::path(
    get,
    path = "/deliverable",
    tag = "delivery",
    params(("id" = Uuid, Query, description = "Deliverable id")),
    responses(
        (status = 200, description = "The deliverable", body = DeliverableResponse),
        (status = 404, description = "Unknown deliverable id"),
    )
)]
#[instrument(skip_all)]
pub async fn get_deliverable(
    State(state): State<AppState>,
    Query(params): Query<DeliverableParams>,
) -> Result<Json<DeliverableResponse>> {
    let id = params.id.ok_or(Error::MissingParam { param: "id" })?;
    let deliverable = state.delivery.get(id).await?;
    Ok(Json(deliverable.into()))
}

/// Approve a deliverable held for manual review.
#[utoipa::path(
    post,
    path = "/approve",
    tag = "delivery",
    request_body = ApproveRequest,
    responses(
        (status = 200, description = "Deliverable delivered", body = DeliverResponse),
        (status = 400, description = "Deliverable is not pending review"),
        (status = 404, description = "Unknown deliverable id"),
    )
)]
#[instrument(skip_all)]
pub async fn approve(
    State(state): State<AppState>,
    AppJson(body): AppJson<ApproveRequest>,
) -> Result<Json<DeliverResponse>> {
    let id = body.deliverable_id.ok_or(Error::MissingField { field: "deliverable_id" })?;
    let deliverable = state.delivery.approve(id).await?;
    Ok(Json(DeliverResponse::from(&deliverable)))
}

/// Reject a deliverable held for manual review.
#[utoipa::path(
    post,
    path = "/reject",
    tag = "delivery",
    request_body = RejectRequest,
    responses(
        (status = 200, description = "Deliverable rejected", body = DeliverResponse),
        (status = 400, description = "Deliverable is not pending review"),
        (status = 404, description = "Unknown deliverable id"),
    )
)]
#[instrument(skip_all)]
pub async fn reject(
    State(state): State<AppState>,
    AppJson(body): AppJson<RejectRequest>,
) -> Result<Json<DeliverResponse>> {
    let id = body.deliverable_id.ok_or(Error::MissingField { field: "deliverable_id" })?;
    let deliverable = state.delivery.reject(id, body.reason).await?;
    Ok(Json(DeliverResponse::from(&deliverable)))
}
