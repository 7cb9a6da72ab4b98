//! Upload receiving with live, pollable progress.
//!
//! [`registry::ProgressRegistry`] maps upload ids to [`progress::UploadProgress`]
//! records that a [`copier::StreamCopier`] keeps current while it writes the
//! inbound stream to disk. The HTTP layer in [`handlers`] ties them together.

pub mod config;
pub mod copier;
pub mod error;
pub mod handlers;
pub mod progress;
pub mod registry;
pub mod state;
pub mod tasks;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};
use tracing::Level;

use crate::handlers::{api, files::FILES_ROUTE, upload};
use crate::state::AppState;

pub fn create_app(state: AppState) -> Router {
    let body_limit = usize::try_from(state.settings.max_upload_bytes).unwrap_or(usize::MAX);

    Router::new()
        .route("/upload", post(upload::upload_file))
        .route("/api/uploads", get(api::list_uploads))
        .route(
            "/api/uploads/{uid}",
            get(api::upload_progress).delete(api::abort_upload),
        )
        .route("/events", get(api::sse_handler))
        .nest_service(FILES_ROUTE, ServeDir::new(&state.settings.files_dir))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(tower_http::trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(tower_http::trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}
