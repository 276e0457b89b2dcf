use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use tracing::error;

use crate::colab::SessionRegistry;
use crate::models::{CreateSessionRequest, CreateSessionResponse, ErrorResponse};

/// Open a project for collaboration
#[utoipa::path(
    post,
    path = "/api/v1/sessions",
    request_body = CreateSessionRequest,
    responses(
        (status = 201, description = "Session created", body = CreateSessionResponse),
        (status = 400, description = "Invalid request", body = ErrorResponse)
    )
)]
pub async fn create_session(
    State(registry): State<Arc<SessionRegistry>>,
    Json(req): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<CreateSessionResponse>), (StatusCode, Json<ErrorResponse>)> {
    if req.project_name.trim().is_empty() {
        return Err(ErrorResponse::new(
            StatusCode::BAD_REQUEST,
            "Project name cannot be empty",
        ));
    }
    if req.admin.user_id.trim().is_empty() {
        return Err(ErrorResponse::new(
            StatusCode::BAD_REQUEST,
            "Admin identity is required",
        ));
    }

    let session = registry
        .create_session(
            &req.project_name,
            &req.admin,
            req.max_participants,
            req.approval_policy,
        )
        .await
        .map_err(|e| {
            error!("Failed to create session for '{}': {}", req.project_name, e);
            ErrorResponse::from_session_error(&e)
        })?;

    Ok((
        StatusCode::CREATED,
        Json(CreateSessionResponse {
            session_id: session.id.clone(),
            join_url: format!("/ws/{}", session.id),
        }),
    ))
}
