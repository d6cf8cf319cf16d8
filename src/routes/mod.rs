use axum::{http::{HeaderValue, Method}, routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{AllowHeaders, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

pub mod columns;
pub mod provision;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health_check))
}

pub fn app(state: Arc<AppState>) -> Router {
    let router = Router::new()
        .merge(routes())
        .merge(columns::routes())
        .merge(provision::routes())
        .layer(TraceLayer::new_for_http());

    // Without configured origins no CORS headers are sent, so browsers keep
    // cross-site pages from calling the API.
    let router = match cors(&state.config.allowed_origins) {
        Some(cors) => router.layer(cors),
        None => router,
    };

    router.with_state(state)
}

fn cors(origins: &[HeaderValue]) -> Option<CorsLayer> {
    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(origins.to_vec())
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(AllowHeaders::list([axum::http::header::CONTENT_TYPE]))
            .max_age(std::time::Duration::from_secs(3600)),
    )
}

async fn health_check() -> &'static str {
    "OK"
}
