use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::colab::SessionRegistry;
use crate::models::{ErrorResponse, FilePathQuery, FileTreeResponse};

/// List the session workspace tree
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{session_id}/files",
    params(
        ("session_id" = String, Path, description = "Session id"),
        FilePathQuery
    ),
    responses(
        (status = 200, description = "Workspace tree", body = FileTreeResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    )
)]
pub async fn file_tree(
    State(registry): State<Arc<SessionRegistry>>,
    Path(session_id): Path<String>,
    Query(query): Query<FilePathQuery>,
) -> Result<(StatusCode, Json<FileTreeResponse>), (StatusCode, Json<ErrorResponse>)> {
    let session = registry.get(&session_id).await.ok_or_else(|| {
        ErrorResponse::new(
            StatusCode::NOT_FOUND,
            format!("Session '{}' not found", session_id),
        )
    })?;

    let path = query.path.unwrap_or_default();
    let children = session
        .docs()
        .workspace()
        .tree(&path)
        .map_err(|e| ErrorResponse::from_session_error(&e))?;

    let name = if path.is_empty() {
        session.project_name.clone()
    } else {
        path.rsplit('/').next().unwrap_or(&path).to_string()
    };
    Ok((StatusCode::OK, Json(FileTreeResponse { name, children })))
}
