//! Subscription CRUD handlers.

use std::str::FromStr;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;
use url::Url;
use uuid::Uuid;

use crate::{
    api::extract::AppJson,
    api::models::subscriptions::{SubscriptionCreate, SubscriptionResponse, SubscriptionUpdate},
    errors::{Error, Result},
    events::NewEvent,
    store::Subscription,
    types::{EventPointer, EventableKind},
    AppState,
};

fn validate_url(raw: &str) -> Result<()> {
    let parsed = Url::parse(raw).map_err(|_| Error::InvalidRequest {
        message: format!("{} is not a valid URL", raw),
    })?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(Error::InvalidRequest {
            message: "webhook URL must be http or https".to_string(),
        });
    }
    Ok(())
}

/// Register a webhook subscription.
#[utoipa::path(
    post,
    path = "/subscriptions",
    tag = "subscriptions",
    request_body = SubscriptionCreate,
    responses(
        (status = 201, description = "Subscription created", body = SubscriptionResponse),
        (status = 400, description = "Missing or invalid fields"),
    )
)]
#[instrument(skip_all)]
pub async fn create(
    State(state): State<AppState>,
    AppJson(body): AppJson<SubscriptionCreate>,
) -> Result<(StatusCode, Json<SubscriptionResponse>)> {
    let url = body.url.ok_or(Error::MissingField { field: "url" })?;
    validate_url(&url)?;

    let eventable_kind_filter = body
        .eventable_type
        .as_deref()
        .map(|raw| EventableKind::from_str(raw).map_err(|message| Error::InvalidRequest { message }))
        .transpose()?;

    let actions = body.actions.unwrap_or_else(|| vec!["*".to_string()]);
    if actions.is_empty() {
        return Err(Error::InvalidRequest {
            message: "actions must not be empty".to_string(),
        });
    }

    let subscription = Subscription {
        id: Uuid::new_v4(),
        tenant: body.tenant.unwrap_or_else(|| "default".to_string()),
        url,
        secret: body.secret,
        actions,
        user_filter: body.user,
        eventable_kind_filter,
        eventable_id_filter: body.eventable_id,
        active: true,
        failure_count: 0,
        last_failure: None,
        created_at: Utc::now(),
    };
    state.store.create_subscription(&subscription).await?;

    let tracked = state
        .tracker
        .track(
            NewEvent::new(
                &subscription.tenant,
                "subscription.created",
                EventPointer::new(EventableKind::Subscription, subscription.id.to_string()),
            )
            .with_particular("url", json!(subscription.url)),
        )
        .await;
    if let Err(err) = tracked {
        tracing::warn!(error = %err, "Failed to record subscription.created");
    }

    Ok((StatusCode::CREATED, Json(subscription.into())))
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub tenant: Option<String>,
}

/// List subscriptions, optionally scoped to a tenant.
#[utoipa::path(
    get,
    path = "/subscriptions",
    tag = "subscriptions",
    responses((status = 200, description = "Subscriptions", body = [SubscriptionResponse]))
)]
#[instrument(skip_all)]
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<SubscriptionResponse>>> {
    let subscriptions = state.store.list_subscriptions(params.tenant.as_deref()).await?;
    Ok(Json(subscriptions.into_iter().map(Into::into).collect()))
}

/// Fetch one subscription.
#[utoipa::path(
    get,
    path = "/subscriptions/{id}",
    tag = "subscriptions",
    params(("id" = Uuid, Path, description = "Subscription id")),
    responses(
        (status = 200, description = "The subscription", body = SubscriptionResponse),
        (status = 404, description = "Unknown subscription id"),
    )
)]
#[instrument(skip_all)]
pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SubscriptionResponse>> {
    let subscription = state
        .store
        .get_subscription(id)
        .await?
        .ok_or(Error::NotFound {
            resource: "subscription",
            id: id.to_string(),
        })?;
    Ok(Json(subscription.into()))
}

/// Update a subscription's URL, secret, actions, or active flag.
#[utoipa::path(
    patch,
    path = "/subscriptions/{id}",
    tag = "subscriptions",
    params(("id" = Uuid, Path, description = "Subscription id")),
    request_body = SubscriptionUpdate,
    responses(
        (status = 200, description = "Subscription updated", body = SubscriptionResponse),
        (status = 404, description = "Unknown subscription id"),
    )
)]
#[instrument(skip_all)]
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    AppJson(body): AppJson<SubscriptionUpdate>,
) -> Result<Json<SubscriptionResponse>> {
    let mut subscription = state
        .store
        .get_subscription(id)
        .await?
        .ok_or(Error::NotFound {
            resource: "subscription",
            id: id.to_string(),
        })?;

    if let Some(url) = body.url {
        validate_url(&url)?;
        subscription.url = url;
    }
    if let Some(secret) = body.secret {
        subscription.secret = Some(secret);
    }
    if let Some(actions) = body.actions {
        if actions.is_empty() {
            return Err(Error::InvalidRequest {
                message: "actions must not be empty".to_string(),
            });
        }
        subscription.actions = actions;
    }
    if let Some(active) = body.active {
        subscription.active = active;
    }

    state.store.update_subscription(&subscription).await?;
    Ok(Json(subscription.into()))
}

/// Delete a subscription.
#[utoipa::path(
    delete,
    path = "/subscriptions/{id}",
    tag = "subscriptions",
    params(("id" = Uuid, Path, description = "Subscription id")),
    responses(
        (status = 204, description = "Subscription deleted"),
        (status = 404, description = "Unknown subscription id"),
    )
)]
#[instrument(skip_all)]
pub async fn delete(State(state): State<AppState>, Path(id): Path<Uuid>) -> Result<StatusCode> {
    let deleted = state.store.delete_subscription(id).await?;
    if !deleted {
        return Err(Error::NotFound {
            resource: "subscription",
            id: id.to_string(),
        });
    }
    Ok(StatusCode::NO_CONTENT)
}
