use std::sync::Arc;
use std::time::Instant;

use axum::error_handling::HandleErrorLayer;
use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::{Router, routing::get};
use tower::timeout::TimeoutLayer;
use tower::{BoxError, ServiceBuilder};
use uuid::Uuid;

use super::response::ApiError;
use super::{leases, repos};
use crate::auth::Authorizer;
use crate::config::GatewayConfig;
use crate::lease::LeaseEngine;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub engine: Arc<LeaseEngine>,
    pub authorizer: Authorizer,
}

impl AppState {
    #[must_use]
    pub fn new(config: Arc<GatewayConfig>, engine: Arc<LeaseEngine>) -> Self {
        let authorizer = Authorizer::from_config(&config);
        Self {
            config,
            engine,
            authorizer,
        }
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = Uuid::new_v4().to_string();
    let start = Instant::now();

    let mut response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        request_id = %request_id,
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn handle_timeout(err: BoxError) -> Response {
    if err.is::<tower::timeout::error::Elapsed>() {
        ApiError {
            status: StatusCode::REQUEST_TIMEOUT,
            code: "timeout",
            message: "Request timed out".to_string(),
            data: None,
        }
        .into_response()
    } else {
        ApiError::internal(format!("Unhandled middleware error: {err}")).into_response()
    }
}

fn lease_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/repos", get(repos::list_repos))
        .route("/repos/{name}", get(repos::get_repo))
        .route(
            "/leases",
            get(leases::list_leases).post(leases::acquire_lease),
        )
        .route(
            "/leases/{token}",
            get(leases::get_lease)
                .post(leases::commit_lease)
                .delete(leases::cancel_lease),
        )
}

pub fn create_router(state: Arc<AppState>) -> Router {
    let timeout = state.config.server.request_timeout();

    Router::new()
        .route("/health", get(health))
        .nest("/api/v1", lease_router())
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_timeout))
                .layer(TimeoutLayer::new(timeout)),
        )
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
