use utoipa::OpenApi;

use crate::colab::participant::{
    ApprovalState, ConnectionState, Identity, ParticipantSummary, Role,
};
use crate::colab::presence::CursorState;
use crate::colab::session::{ApprovalPolicy, SessionStatus};
use crate::doc::operation::EditSpan;
use crate::models::*;
use crate::storage::FileNode;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::health::health_check,
        crate::handlers::health::ready_check,
        crate::handlers::diagnostics::diagnostics,
        crate::handlers::session_create::create_session,
        crate::handlers::session_info::session_info,
        crate::handlers::file_tree::file_tree,
        crate::handlers::file_content::file_content,
        crate::handlers::file_admin::create_file,
        crate::handlers::file_admin::delete_file,
        crate::handlers::file_admin::rename_file,
    ),
    components(
        schemas(
            HealthResponse,
            ReadyResponse,
            DiagnosticsResponse,
            ErrorResponse,
            CreateSessionRequest,
            CreateSessionResponse,
            SessionInfoResponse,
            FileTreeResponse,
            FileContentResponse,
            CreateFileRequest,
            RenameFileRequest,
            FileActionResponse,
            FileNode,
            Identity,
            ParticipantSummary,
            Role,
            ConnectionState,
            ApprovalState,
            ApprovalPolicy,
            SessionStatus,
            CursorState,
            EditSpan,
        )
    ),
    tags(
        (name = "api", description = "Collaborative session API endpoints")
    )
)]
pub struct ApiDoc;
