use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::storage::FileNode;

/// Query selecting a workspace path
#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct FilePathQuery {
    pub path: Option<String>,
}

/// Query for admin file deletion
#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
#[serde(rename_all = "camelCase")]
pub struct FileDeleteQuery {
    pub path: String,
    pub participant_id: String,
}

/// Response for a workspace file tree listing
#[derive(Serialize, Deserialize, ToSchema)]
pub struct FileTreeResponse {
    pub name: String,
    pub children: Vec<FileNode>,
}

/// Response for a workspace file read
#[derive(Serialize, Deserialize, ToSchema)]
pub struct FileContentResponse {
    pub path: String,
    pub content: String,
}

/// Admin request to create a file or directory in the workspace
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateFileRequest {
    pub path: String,
    #[serde(default)]
    pub is_dir: bool,
    pub participant_id: String,
}

/// Admin request to rename a workspace entry
#[derive(Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RenameFileRequest {
    pub old_path: String,
    pub new_path: String,
    pub participant_id: String,
}

/// Generic success acknowledgement
#[derive(Serialize, Deserialize, ToSchema)]
pub struct FileActionResponse {
    pub status: String,
}
