//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! This module binds the HTTP surface (public room listing, health check)
//! and the websocket endpoint under a single Axum router. The game client
//! is served as static files from `STATIC_DIR` via the router fallback.

pub mod rooms;
pub mod ws;

use std::path::PathBuf;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;

use crate::state::AppState;

/// Resolve the directory static assets are served from.
fn static_dir() -> PathBuf {
    std::env::var("STATIC_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./public"))
}

/// API routes + websocket endpoint + static client fallback.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let static_service = ServeDir::new(static_dir()).append_index_html_on_directories(true);

    Router::new()
        .route("/api/rooms", get(rooms::list_rooms))
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(cors)
        .with_state(state)
        .fallback_service(static_service)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}
