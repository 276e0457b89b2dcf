use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use crate::colab::SessionRegistry;
use crate::models::{ErrorResponse, SessionInfoResponse};

/// Describe a session
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{session_id}",
    params(("session_id" = String, Path, description = "Session id")),
    responses(
        (status = 200, description = "Session details", body = SessionInfoResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    )
)]
pub async fn session_info(
    State(registry): State<Arc<SessionRegistry>>,
    Path(session_id): Path<String>,
) -> Result<(StatusCode, Json<SessionInfoResponse>), (StatusCode, Json<ErrorResponse>)> {
    let session = registry.get(&session_id).await.ok_or_else(|| {
        ErrorResponse::new(
            StatusCode::NOT_FOUND,
            format!("Session '{}' not found", session_id),
        )
    })?;
    Ok((StatusCode::OK, Json(session.info().await)))
}
