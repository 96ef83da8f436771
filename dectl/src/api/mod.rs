//! HTTP API: routing, middleware, and the error envelope plumbing.

use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::errors::{Error, ErrorBody};
use crate::AppState;

pub mod extract;
pub mod handlers;
pub mod models;
pub mod openapi;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the service router.
pub fn app(state: AppState) -> Router {
    Router::new()
        // Intake
        .route("/intake", post(handlers::intake::submit))
        .route("/status", get(handlers::intake::status))
        .route("/cancel", post(handlers::intake::cancel))
        // Delivery
        .route("/deliver", post(handlers::delivery::deliver))
        .route("/webhook", post(handlers::delivery::webhook))
        .route("/deliverable", get(handlers::delivery::get_deliverable))
        .route("/approve", post(handlers::delivery::approve))
        .route("/reject", post(handlers::delivery::reject))
        // Events and feed
        .route(
            "/events",
            post(handlers::events::record).get(handlers::events::entity_events),
        )
        .route("/events/counts", get(handlers::events::counts))
        .route("/feed", get(handlers::events::feed))
        .route("/feed/read", post(handlers::events::mark_read))
        // Subscriptions
        .route(
            "/subscriptions",
            post(handlers::subscriptions::create).get(handlers::subscriptions::list),
        )
        .route(
            "/subscriptions/{id}",
            get(handlers::subscriptions::get)
                .patch(handlers::subscriptions::update)
                .delete(handlers::subscriptions::delete),
        )
        // Health and observability
        .route("/health", get(handlers::health::health))
        .route("/state", get(handlers::health::state))
        .route("/openapi.json", get(openapi::serve))
        .fallback(|| async { Error::RouteNotFound })
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(middleware::from_fn(envelope_request_id))
                .layer(TraceLayer::new_for_http()),
        )
        .with_state(state)
}

/// Stamp every response with `X-Request-ID` and fill the id into error
/// envelopes produced by [`Error::into_response`].
async fn envelope_request_id(req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut response = next.run(req).await;

    if let Some(body) = response.extensions().get::<ErrorBody>().cloned() {
        let status = response.status();
        let filled = ErrorBody {
            request_id: Some(request_id.clone()),
            ..body
        };
        response = (status, axum::Json(filled)).into_response();
    }

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
