//! OpenAPI document, served at `/openapi.json`.

use axum::response::Json;
use utoipa::OpenApi;

use super::handlers;
use super::models::delivery::{
    ApproveRequest, DeliverRequest, DeliverResponse, DeliverableResponse, RejectRequest,
};
use super::models::events::{
    CountsParams, EntityEventsParams, EventCreate, EventResponse, FeedItemResponse, FeedParams,
    MarkReadRequest, MarkReadResponse,
};
use super::models::intake::{
    CancelRequest, CancelResponse, StatusResponse, SubmitRequest, SubmitResponse,
};
use super::models::subscriptions::{SubscriptionCreate, SubscriptionResponse, SubscriptionUpdate};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "dectl",
        description = "Asynchronous request orchestration for AI generation backends"
    ),
    paths(
        handlers::intake::submit,
        handlers::intake::status,
        handlers::intake::cancel,
        handlers::delivery::deliver,
        handlers::delivery::webhook,
        handlers::delivery::get_deliverable,
        handlers::delivery::approve,
        handlers::delivery::reject,
        handlers::events::record,
        handlers::events::entity_events,
        handlers::events::counts,
        handlers::events::feed,
        handlers::events::mark_read,
        handlers::subscriptions::create,
        handlers::subscriptions::list,
        handlers::subscriptions::get,
        handlers::subscriptions::update,
        handlers::subscriptions::delete,
        handlers::health::health,
        handlers::health::state,
    ),
    components(schemas(
        SubmitRequest,
        SubmitResponse,
        StatusResponse,
        CancelRequest,
        CancelResponse,
        DeliverRequest,
        DeliverResponse,
        DeliverableResponse,
        ApproveRequest,
        RejectRequest,
        EventCreate,
        EventResponse,
        FeedParams,
        FeedItemResponse,
        MarkReadRequest,
        MarkReadResponse,
        EntityEventsParams,
        CountsParams,
        SubscriptionCreate,
        SubscriptionUpdate,
        SubscriptionResponse,
    ))
)]
pub struct ApiDoc;

pub async fn serve() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
