// Real-time classroom messaging server.
//
// The library crate exposes the router assembly so integration tests can
// run the full HTTP/websocket surface against an ephemeral listener; the
// binary in main.rs is a thin wrapper around it.

pub mod access;
pub mod auth;
pub mod broadcast;
pub mod config;
pub mod cors;
pub mod db;
pub mod error;
pub mod metrics;
pub mod registry;
pub mod store;
pub mod ws;

use std::{sync::Arc, time::Instant};

use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Extension, State},
    http::{Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tracing::{error, info};

use crate::{auth::middleware::AuthenticatedPrincipal, ws::ChatState};

const MAX_REQUEST_BODY_BYTES: usize = 64 * 1024;

/// Assemble the full application router: websocket routes, health and
/// metrics probes, and the authenticated stats endpoint.
pub fn build_router(state: ChatState, cors_origins: Option<&str>) -> Router {
    let stats_routes = Router::new()
        .route("/v1/stats", get(stats))
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.jwt),
            auth::middleware::require_bearer_auth,
        ))
        .with_state(state.clone());

    apply_middleware(
        Router::new()
            .route("/healthz", get(healthz))
            .route("/metrics", get(metrics_endpoint))
            .merge(ws::router(state))
            .merge(stats_routes),
    )
    .layer(cors::cors_layer(cors_origins))
}

fn apply_middleware(router: Router) -> Router {
    router
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(middleware::from_fn(request_context_middleware))
        .layer(middleware::from_fn(panic_handler))
}

async fn healthz() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

async fn metrics_endpoint() -> impl IntoResponse {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render_global_prometheus(),
    )
}

/// Live connection and room counts for the dashboard.
async fn stats(
    State(state): State<ChatState>,
    Extension(auth): Extension<AuthenticatedPrincipal>,
) -> Json<serde_json::Value> {
    info!(user_id = %auth.0.id, "stats requested");
    Json(json!({
        "connections": state.registry.connection_count().await,
        "rooms": state.registry.room_count().await,
    }))
}

async fn panic_handler(request: Request<Body>, next: Next) -> Response {
    match tokio::spawn(async move { next.run(request).await }).await {
        Ok(response) => response,
        Err(join_error) => {
            error!(?join_error, "request handling panicked");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn request_context_middleware(request: Request<Body>, next: Next) -> Response {
    let request_id = error::request_id_from_headers_or_generate(request.headers());
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started_at = Instant::now();

    let mut response = error::with_request_id_scope(request_id.clone(), next.run(request)).await;

    error::attach_request_id_header(&mut response, &request_id);

    let latency_ms = started_at.elapsed().as_millis() as u64;
    metrics::record_http_request(method.as_str(), &path, response.status().as_u16(), latency_ms);

    info!(
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms,
        "request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{header::AUTHORIZATION, Method, Request, StatusCode},
        routing::{get, post},
        Router,
    };
    use lectern_common::types::{Principal, Role};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::{apply_middleware, build_router, MAX_REQUEST_BODY_BYTES};
    use crate::{
        access::ClassroomAccessStore, auth::jwt::JwtSessionService, store::MessageStore,
        ws::ChatState,
    };

    const TEST_SECRET: &str = "lectern_test_secret_that_is_definitely_long_enough";

    fn test_state() -> ChatState {
        let jwt = Arc::new(
            JwtSessionService::new(TEST_SECRET).expect("test jwt service should initialize"),
        );
        ChatState::new(jwt, ClassroomAccessStore::in_memory(), MessageStore::in_memory())
    }

    #[tokio::test]
    async fn health_check_has_request_id_header() {
        let response = build_router(test_state(), None)
            .oneshot(
                Request::builder()
                    .uri("/healthz")
                    .body(Body::empty())
                    .expect("healthz request should build"),
            )
            .await
            .expect("healthz request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn stats_requires_a_bearer_token() {
        let response = build_router(test_state(), None)
            .oneshot(
                Request::builder()
                    .uri("/v1/stats")
                    .body(Body::empty())
                    .expect("stats request should build"),
            )
            .await
            .expect("stats request should return a response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn stats_returns_counts_for_authenticated_callers() {
        let state = test_state();
        let principal = Principal {
            id: Uuid::new_v4(),
            name: "Ada".to_string(),
            role: Role::Facilitator,
            email: None,
        };
        let token =
            state.jwt.issue_session_token(&principal).expect("token should be issued");

        let response = build_router(state, None)
            .oneshot(
                Request::builder()
                    .uri("/v1/stats")
                    .header(AUTHORIZATION, format!("Bearer {token}"))
                    .body(Body::empty())
                    .expect("stats request should build"),
            )
            .await
            .expect("stats request should succeed");

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("stats body should be readable");
        let parsed: serde_json::Value =
            serde_json::from_slice(&body).expect("stats body should be valid json");
        assert_eq!(parsed["connections"], 0);
        assert_eq!(parsed["rooms"], 0);
    }

    #[tokio::test]
    async fn panic_handler_returns_internal_server_error() {
        async fn panic_route() -> &'static str {
            panic!("test panic");
        }

        let app = apply_middleware(Router::new().route("/panic", get(panic_route)));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/panic")
                    .body(Body::empty())
                    .expect("panic request should build"),
            )
            .await
            .expect("panic request should return a response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn request_body_limit_is_enforced() {
        async fn echo(body: String) -> String {
            body
        }

        let oversized_body = "a".repeat(MAX_REQUEST_BODY_BYTES + 1);
        let app = apply_middleware(Router::new().route("/echo", post(echo)));

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri("/echo")
                    .header("content-type", "text/plain")
                    .body(Body::from(oversized_body))
                    .expect("echo request should build"),
            )
            .await
            .expect("echo request should return a response");

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }
}
