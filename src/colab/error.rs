use axum::http::StatusCode;
use thiserror::Error;

/// Errors raised by the collaborative session engine.
///
/// Membership and authorization failures are returned to the requesting
/// participant only and are never broadcast.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session is full")]
    SessionFull,

    #[error("session is closed")]
    SessionClosed,

    #[error("participant is not approved for this session")]
    NotApproved,

    #[error("operation requires the session admin")]
    NotAdmin,

    #[error("base revision {base} can no longer be rebased onto revision {current}")]
    StaleBase { base: u64, current: u64 },

    #[error("path escapes the session workspace: {0}")]
    PathTraversal(String),

    #[error("failed to persist '{path}': {source}")]
    PersistenceFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read '{path}': {source}")]
    FileUnavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("unknown participant: {0}")]
    UnknownParticipant(String),

    #[error("document is not open: {0}")]
    DocumentNotOpen(String),
}

impl SessionError {
    /// Stable machine-readable code carried on the wire protocol.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::SessionFull => "sessionFull",
            SessionError::SessionClosed => "sessionClosed",
            SessionError::NotApproved => "notApproved",
            SessionError::NotAdmin => "notAdmin",
            SessionError::StaleBase { .. } => "staleBase",
            SessionError::PathTraversal(_) => "pathTraversal",
            SessionError::PersistenceFailure { .. } => "persistenceFailure",
            SessionError::FileUnavailable { .. } => "fileUnavailable",
            SessionError::UnknownSession(_) => "unknownSession",
            SessionError::UnknownParticipant(_) => "unknownParticipant",
            SessionError::DocumentNotOpen(_) => "documentNotOpen",
        }
    }

    /// HTTP status for the REST surface.
    pub fn status(&self) -> StatusCode {
        match self {
            SessionError::SessionFull => StatusCode::CONFLICT,
            SessionError::SessionClosed => StatusCode::GONE,
            SessionError::NotApproved | SessionError::NotAdmin => StatusCode::FORBIDDEN,
            SessionError::StaleBase { .. } => StatusCode::CONFLICT,
            SessionError::PathTraversal(_) => StatusCode::BAD_REQUEST,
            SessionError::PersistenceFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            SessionError::FileUnavailable { .. } => StatusCode::NOT_FOUND,
            SessionError::UnknownSession(_) => StatusCode::NOT_FOUND,
            SessionError::UnknownParticipant(_) => StatusCode::NOT_FOUND,
            SessionError::DocumentNotOpen(_) => StatusCode::NOT_FOUND,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(SessionError::SessionFull.code(), "sessionFull");
        assert_eq!(
            SessionError::StaleBase { base: 1, current: 9 }.code(),
            "staleBase"
        );
        assert_eq!(
            SessionError::PathTraversal("../etc".into()).code(),
            "pathTraversal"
        );
    }

    #[test]
    fn authorization_errors_map_to_forbidden() {
        assert_eq!(SessionError::NotApproved.status(), StatusCode::FORBIDDEN);
        assert_eq!(SessionError::NotAdmin.status(), StatusCode::FORBIDDEN);
    }
}
