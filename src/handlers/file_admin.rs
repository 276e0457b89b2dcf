use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use crate::colab::SessionRegistry;
use crate::models::{
    CreateFileRequest, ErrorResponse, FileActionResponse, FileDeleteQuery, RenameFileRequest,
};

/// Create a file or directory in the workspace. Admin only.
#[utoipa::path(
    post,
    path = "/api/v1/sessions/{session_id}/files",
    params(("session_id" = String, Path, description = "Session id")),
    request_body = CreateFileRequest,
    responses(
        (status = 201, description = "Entry created", body = FileActionResponse),
        (status = 403, description = "Not the session admin", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    )
)]
pub async fn create_file(
    State(registry): State<Arc<SessionRegistry>>,
    Path(session_id): Path<String>,
    Json(req): Json<CreateFileRequest>,
) -> Result<(StatusCode, Json<FileActionResponse>), (StatusCode, Json<ErrorResponse>)> {
    let session = registry.get(&session_id).await.ok_or_else(|| {
        ErrorResponse::new(
            StatusCode::NOT_FOUND,
            format!("Session '{}' not found", session_id),
        )
    })?;

    session
        .create_entry(&req.participant_id, &req.path, req.is_dir)
        .await
        .map_err(|e| ErrorResponse::from_session_error(&e))?;

    info!("Created '{}' in session {}", req.path, session_id);
    Ok((
        StatusCode::CREATED,
        Json(FileActionResponse {
            status: "success".to_string(),
        }),
    ))
}

/// Delete a workspace entry. Admin only.
#[utoipa::path(
    delete,
    path = "/api/v1/sessions/{session_id}/files",
    params(
        ("session_id" = String, Path, description = "Session id"),
        FileDeleteQuery
    ),
    responses(
        (status = 200, description = "Entry deleted", body = FileActionResponse),
        (status = 403, description = "Not the session admin", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    )
)]
pub async fn delete_file(
    State(registry): State<Arc<SessionRegistry>>,
    Path(session_id): Path<String>,
    Query(query): Query<FileDeleteQuery>,
) -> Result<(StatusCode, Json<FileActionResponse>), (StatusCode, Json<ErrorResponse>)> {
    let session = registry.get(&session_id).await.ok_or_else(|| {
        ErrorResponse::new(
            StatusCode::NOT_FOUND,
            format!("Session '{}' not found", session_id),
        )
    })?;

    session
        .delete_entry(&query.participant_id, &query.path)
        .await
        .map_err(|e| ErrorResponse::from_session_error(&e))?;

    info!("Deleted '{}' in session {}", query.path, session_id);
    Ok((
        StatusCode::OK,
        Json(FileActionResponse {
            status: "success".to_string(),
        }),
    ))
}

/// Rename a workspace entry. Admin only.
#[utoipa::path(
    post,
    path = "/api/v1/sessions/{session_id}/files/rename",
    params(("session_id" = String, Path, description = "Session id")),
    request_body = RenameFileRequest,
    responses(
        (status = 200, description = "Entry renamed", body = FileActionResponse),
        (status = 403, description = "Not the session admin", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    )
)]
pub async fn rename_file(
    State(registry): State<Arc<SessionRegistry>>,
    Path(session_id): Path<String>,
    Json(req): Json<RenameFileRequest>,
) -> Result<(StatusCode, Json<FileActionResponse>), (StatusCode, Json<ErrorResponse>)> {
    let session = registry.get(&session_id).await.ok_or_else(|| {
        ErrorResponse::new(
            StatusCode::NOT_FOUND,
            format!("Session '{}' not found", session_id),
        )
    })?;

    session
        .rename_entry(&req.participant_id, &req.old_path, &req.new_path)
        .await
        .map_err(|e| ErrorResponse::from_session_error(&e))?;

    info!(
        "Renamed '{}' to '{}' in session {}",
        req.old_path, req.new_path, session_id
    );
    Ok((
        StatusCode::OK,
        Json(FileActionResponse {
            status: "success".to_string(),
        }),
    ))
}
