use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::colab::error::SessionError;

/// Response for an error
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub code: u16,
    pub status: String,
    pub error: String,
}

impl ErrorResponse {
    pub fn new(status: StatusCode, error: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                code: status.as_u16(),
                status: status.to_string(),
                error: error.into(),
            }),
        )
    }

    pub fn from_session_error(err: &SessionError) -> (StatusCode, Json<Self>) {
        Self::new(err.status(), err.to_string())
    }
}
