use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::colab::SessionRegistry;
use crate::handlers::{
    create_file, create_session, delete_file, diagnostics, file_content, file_tree, health_check,
    ready_check, rename_file, session_info,
};

/// Create API routes
pub fn create_api_routes(registry: Arc<SessionRegistry>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/v1/diagnostics", get(diagnostics))
        .route("/v1/sessions", post(create_session))
        .route("/v1/sessions/:session_id", get(session_info))
        .route(
            "/v1/sessions/:session_id/files",
            get(file_tree).post(create_file).delete(delete_file),
        )
        .route(
            "/v1/sessions/:session_id/files/content",
            get(file_content),
        )
        .route("/v1/sessions/:session_id/files/rename", post(rename_file))
        .with_state(registry)
}
