//! Event and activity feed handlers.

use std::collections::HashMap;
use std::str::FromStr;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::DateTime;
use tracing::instrument;

use crate::{
    api::extract::AppJson,
    api::models::events::{
        CountsParams, EntityEventsParams, EventCreate, EventResponse, FeedItemResponse, FeedParams,
        MarkReadRequest, MarkReadResponse,
    },
    errors::{Error, Result},
    events::NewEvent,
    store::{FeedBucket, FeedQuery},
    types::{EventPointer, EventableKind},
    AppState,
};

const DEFAULT_PAGE: i64 = 50;
const MAX_PAGE: i64 = 200;

fn page(limit: Option<i64>, offset: Option<i64>) -> (i64, i64) {
    (limit.unwrap_or(DEFAULT_PAGE).clamp(1, MAX_PAGE), offset.unwrap_or(0).max(0))
}

/// Record an event.
#[utoipa::path(
    post,
    path = "/events",
    tag = "events",
    request_body = EventCreate,
    responses(
        (status = 201, description = "Event recorded", body = EventResponse),
        (status = 400, description = "Missing or invalid fields"),
    )
)]
#[instrument(skip_all)]
pub async fn record(
    State(state): State<AppState>,
    AppJson(body): AppJson<EventCreate>,
) -> Result<(StatusCode, Json<EventResponse>)> {
    let action = body
        .action
        .as_deref()
        .map(str::trim)
        .filter(|action| !action.is_empty())
        .ok_or(Error::MissingField { field: "action" })?;
    let raw_kind = body.eventable_type.ok_or(Error::MissingField { field: "eventable_type" })?;
    let kind = EventableKind::from_str(&raw_kind).map_err(|message| Error::InvalidRequest { message })?;
    let eventable_id = body.eventable_id.ok_or(Error::MissingField { field: "eventable_id" })?;

    let tenant = body.tenant.unwrap_or_else(|| "default".to_string());
    let mut event = NewEvent::new(tenant, action, EventPointer::new(kind, eventable_id))
        .with_user(body.user_id);
    if let Some(particulars) = body.particulars {
        event.particulars = particulars
            .as_object()
            .cloned()
            .ok_or(Error::InvalidRequest {
                message: "particulars must be a JSON object".to_string(),
            })?;
    }

    let recorded = state.tracker.track(event).await?;
    Ok((StatusCode::CREATED, Json(recorded.into())))
}

/// Activity feed, newest first.
#[utoipa::path(
    get,
    path = "/feed",
    tag = "events",
    responses(
        (status = 200, description = "Feed items", body = [FeedItemResponse]),
        (status = 400, description = "Invalid bucket"),
    )
)]
#[instrument(skip_all)]
pub async fn feed(
    State(state): State<AppState>,
    Query(params): Query<FeedParams>,
) -> Result<Json<Vec<FeedItemResponse>>> {
    let bucket = params
        .bucket
        .as_deref()
        .map(|raw| {
            FeedBucket::parse(raw).ok_or(Error::InvalidRequest {
                message: format!("unknown feed bucket: {}", raw),
            })
        })
        .transpose()?;

    let tenant = params.tenant.unwrap_or_else(|| "default".to_string());
    let (limit, offset) = page(params.limit, params.offset);
    let items = state
        .tracker
        .feed(
            &tenant,
            &FeedQuery {
                bucket,
                user: params.user,
                unread_only: params.unread_only.unwrap_or(false),
                limit,
                offset,
            },
        )
        .await?;

    Ok(Json(items.into_iter().map(Into::into).collect()))
}

/// Mark feed items read.
#[utoipa::path(
    post,
    path = "/feed/read",
    tag = "events",
    request_body = MarkReadRequest,
    responses((status = 200, description = "Items marked read", body = MarkReadResponse))
)]
#[instrument(skip_all)]
pub async fn mark_read(
    State(state): State<AppState>,
    AppJson(body): AppJson<MarkReadRequest>,
) -> Result<Json<MarkReadResponse>> {
    let tenant = body.tenant.unwrap_or_else(|| "default".to_string());
    let marked = state.tracker.mark_read(&tenant, &body.ids).await?;
    Ok(Json(MarkReadResponse { marked }))
}

/// Full event history of an entity, newest first.
#[utoipa::path(
    get,
    path = "/events",
    tag = "events",
    responses(
        (status = 200, description = "Events for the entity", body = [EventResponse]),
        (status = 400, description = "Missing or invalid parameters"),
    )
)]
#[instrument(skip_all)]
pub async fn entity_events(
    State(state): State<AppState>,
    Query(params): Query<EntityEventsParams>,
) -> Result<Json<Vec<EventResponse>>> {
    let raw_kind = params.kind.ok_or(Error::MissingParam { param: "kind" })?;
    let kind = EventableKind::from_str(&raw_kind).map_err(|message| Error::InvalidRequest { message })?;
    let id = params.id.ok_or(Error::MissingParam { param: "id" })?;

    let (limit, offset) = page(params.limit, params.offset);
    let events = state.tracker.events_for(kind, &id, limit, offset).await?;
    Ok(Json(events.into_iter().map(Into::into).collect()))
}

/// Per-action event counts for a tenant, optionally windowed.
#[utoipa::path(
    get,
    path = "/events/counts",
    tag = "events",
    responses(
        (status = 200, description = "Counts by action"),
        (status = 400, description = "Invalid since timestamp"),
    )
)]
#[instrument(skip_all)]
pub async fn counts(
    State(state): State<AppState>,
    Query(params): Query<CountsParams>,
) -> Result<Json<HashMap<String, i64>>> {
    let since = params
        .since
        .as_deref()
        .map(|raw| {
            DateTime::parse_from_rfc3339(raw)
                .map(|parsed| parsed.to_utc())
                .map_err(|_| Error::InvalidRequest {
                    message: format!("since {} is not an RFC 3339 timestamp", raw),
                })
        })
        .transpose()?;

    let tenant = params.tenant.unwrap_or_else(|| "default".to_string());
    let counts = state.tracker.counts(&tenant, since).await?;
    Ok(Json(counts))
}
