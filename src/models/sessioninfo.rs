use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::colab::participant::Identity;
use crate::colab::session::{ApprovalPolicy, SessionStatus};

/// Request to open a project for collaboration. The identity has already
/// been resolved by the identity collaborator.
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    pub project_name: String,
    pub admin: Identity,
    pub max_participants: Option<usize>,
    pub approval_policy: Option<ApprovalPolicy>,
}

#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub join_url: String,
}

/// Public description of a session.
#[derive(Serialize, Deserialize, Debug, Clone, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfoResponse {
    pub session_id: String,
    pub project_name: String,
    pub max_participants: usize,
    pub participant_count: usize,
    pub status: SessionStatus,
}
