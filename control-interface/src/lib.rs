//! # PrintSplit Control Interface Library
//!
//! The HTTP surface over the job runtime: upload a model, start a split,
//! watch its progress, download the pieces. Handlers stay thin; everything
//! stateful goes through the injected broker and object store.

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use job_types::config::RuntimeConfig;
use printsplit_worker::{JobBroker, ObjectStore};

pub mod api;

pub use api::create_api_router;

/// Headroom on top of the upload cap for multipart framing.
const BODY_LIMIT_SLACK: usize = 64 * 1024;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub broker: Arc<dyn JobBroker>,
    pub store: Arc<dyn ObjectStore>,
    pub config: Arc<RuntimeConfig>,
}

impl AppState {
    pub fn new(
        broker: Arc<dyn JobBroker>,
        store: Arc<dyn ObjectStore>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            broker,
            store,
            config: Arc::new(config),
        }
    }
}

/// Creates the complete application router.
pub fn create_app_router(state: AppState) -> Router {
    let body_limit = state.config.max_file_size as usize + BODY_LIMIT_SLACK;
    let cors = cors_layer(&state.config.allowed_origins);

    create_api_router()
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Cross-origin policy from `ALLOWED_ORIGINS`; open when unset.
fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
    }
    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(parsed))
        .allow_methods(Any)
        .allow_headers(Any)
}
