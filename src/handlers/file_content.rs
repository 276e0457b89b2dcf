use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use crate::colab::SessionRegistry;
use crate::models::{ErrorResponse, FileContentResponse, FilePathQuery};

/// Read one workspace file.
///
/// While the file is open in the session the in-memory document is
/// authoritative and its content is returned instead of what is on disk.
#[utoipa::path(
    get,
    path = "/api/v1/sessions/{session_id}/files/content",
    params(
        ("session_id" = String, Path, description = "Session id"),
        FilePathQuery
    ),
    responses(
        (status = 200, description = "File content", body = FileContentResponse),
        (status = 400, description = "Missing or invalid path", body = ErrorResponse),
        (status = 404, description = "Session or file not found", body = ErrorResponse)
    )
)]
pub async fn file_content(
    State(registry): State<Arc<SessionRegistry>>,
    Path(session_id): Path<String>,
    Query(query): Query<FilePathQuery>,
) -> Result<(StatusCode, Json<FileContentResponse>), (StatusCode, Json<ErrorResponse>)> {
    let session = registry.get(&session_id).await.ok_or_else(|| {
        ErrorResponse::new(
            StatusCode::NOT_FOUND,
            format!("Session '{}' not found", session_id),
        )
    })?;
    let Some(path) = query.path.filter(|p| !p.is_empty()) else {
        return Err(ErrorResponse::new(
            StatusCode::BAD_REQUEST,
            "Query parameter 'path' is required",
        ));
    };

    if let Some(doc) = session.docs().document(&path).await {
        let doc = doc.lock().await;
        return Ok((
            StatusCode::OK,
            Json(FileContentResponse {
                path,
                content: doc.content().to_string(),
            }),
        ));
    }

    let content = session
        .docs()
        .workspace()
        .read(&path)
        .await
        .map_err(|e| ErrorResponse::from_session_error(&e))?;
    Ok((StatusCode::OK, Json(FileContentResponse { path, content })))
}
