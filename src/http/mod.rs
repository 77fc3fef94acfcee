//! HTTP control plane: axum router assembly and the `/auth/*` handlers.

mod auth_routes;
mod health;

use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{BoxError, Router};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::ws::ws_handler;

const MAX_BODY_BYTES: usize = 64 * 1024;
// Only the plain HTTP routes get a server-side deadline; `/ws` is excluded
// below since its whole point is to stay open for the connection's life.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub fn build_router(state: AppState) -> Router {
    // The websocket upgrade lives on its own sub-router so the request
    // deadline below never touches a connection that's meant to stay open.
    let ws_routes = Router::new().route("/ws", get(ws_handler));

    let http_routes = Router::new()
        .route("/auth/github/callback", post(auth_routes::github_callback))
        .route("/auth/token", post(auth_routes::create_worker_token))
        .route("/auth/tokens", get(auth_routes::list_worker_tokens))
        .route("/auth/token/:id", delete(auth_routes::revoke_worker_token))
        .route("/auth/rooms", get(auth_routes::list_rooms).post(auth_routes::create_room))
        .route("/auth/rooms/:id", delete(auth_routes::delete_room))
        .route("/auth/rooms/:id/invite", post(auth_routes::create_invite))
        .route("/auth/rooms/join", post(auth_routes::join_room))
        .route("/health", get(health::health))
        .route("/metrics", get(health::metrics))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(|_: BoxError| async {
                    StatusCode::REQUEST_TIMEOUT
                }))
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT)),
        );

    ws_routes
        .merge(http_routes)
        .layer(cors_layer(&state))
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .with_state(state)
}

fn cors_layer(state: &AppState) -> CorsLayer {
    match &state.config.ui_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(
                origin
                    .parse::<axum::http::HeaderValue>()
                    .expect("UI_ORIGIN must be a valid header value"),
            )
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any),
        None => CorsLayer::permissive(),
    }
}
