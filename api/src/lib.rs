//! HTTP surface: multi-modal search, manual index/remove, discovery and health.
//!
//! Every response uses the `{success, data, error}` envelope from
//! [`core::http::response_envelope`].

pub mod core;
pub mod error_handler;
mod middleware_layer;
mod routes;

use std::future::Future;
use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
};
use tracing::info;

pub use crate::core::app_state::{ApiConfig, AppState};
pub use crate::error_handler::{AppError, AppResult};

use crate::middleware_layer::json_error_mapper::json_error_mapper;
use crate::routes::{
    health::health_route::health_route,
    index::{
        discovery_route::discovery_route, index_route::index_route, remove_route::remove_route,
    },
    search::{files_route::files_route, search_route::search_route},
};

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/api/v1/search", post(search_route))
        .route("/api/v1/files", get(files_route))
        .route("/api/v1/index", post(index_route))
        .route("/api/v1/remove", post(remove_route))
        .route("/api/v1/discovery", post(discovery_route))
        .route("/health", get(health_route))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(middleware::from_fn(json_error_mapper))
        .with_state(Arc::new(state))
}

/// Serves until `shutdown` resolves.
pub async fn start(
    state: AppState,
    cfg: &ApiConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> AppResult<()> {
    let app = router(state, cfg.max_upload_bytes);

    let listener = tokio::net::TcpListener::bind(&cfg.address)
        .await
        .map_err(AppError::Bind)?;
    info!(target: "api", address = %cfg.address, "HTTP API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(AppError::Server)
}
