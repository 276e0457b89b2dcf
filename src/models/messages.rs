use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::colab::participant::{Identity, ParticipantSummary};
use crate::doc::operation::EditSpan;
use crate::models::SessionInfoResponse;

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JoinMessage {
    pub identity: Identity,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OpMessage {
    pub path: String,
    pub base_revision: u64,
    pub spans: Vec<EditSpan>,
    pub client_seq: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CursorMessage {
    pub path: String,
    pub anchor: usize,
    pub head: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ChatSendMessage {
    pub text: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FileRefMessage {
    pub path: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SaveDecisionMessage {
    pub approval_id: String,
    pub approved: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantRefMessage {
    pub participant_id: String,
}

/// Everything a participant's transport channel can carry inbound.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ClientMessage {
    #[serde(rename = "join")]
    Join(JoinMessage),
    #[serde(rename = "op")]
    Op(OpMessage),
    #[serde(rename = "cursor")]
    Cursor(CursorMessage),
    #[serde(rename = "chat")]
    Chat(ChatSendMessage),
    #[serde(rename = "openFile")]
    OpenFile(FileRefMessage),
    #[serde(rename = "closeFile")]
    CloseFile(FileRefMessage),
    #[serde(rename = "save")]
    Save(FileRefMessage),
    #[serde(rename = "saveDecision")]
    SaveDecision(SaveDecisionMessage),
    #[serde(rename = "approve")]
    Approve(ParticipantRefMessage),
    #[serde(rename = "reject")]
    Reject(ParticipantRefMessage),
    #[serde(rename = "kick")]
    Kick(ParticipantRefMessage),
    #[serde(rename = "closeSession")]
    CloseSession,
    #[serde(rename = "leave")]
    Leave,
    #[serde(rename = "ping")]
    Ping,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MembershipEvent {
    Joined,
    Left,
    Kicked,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JoinedMessage {
    pub participant: ParticipantSummary,
    pub roster: Vec<ParticipantSummary>,
    pub session: SessionInfoResponse,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JoinRejectedMessage {
    pub code: String,
    pub reason: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequestMessage {
    pub participant_id: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MembershipChangedMessage {
    pub event: MembershipEvent,
    pub participant: ParticipantSummary,
    pub roster: Vec<ParticipantSummary>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct OpAppliedMessage {
    pub path: String,
    pub revision: u64,
    pub spans: Vec<EditSpan>,
    pub client_seq: u64,
    pub origin: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CursorSnapshot {
    pub participant_id: String,
    pub anchor: usize,
    pub head: usize,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FileOpenedMessage {
    pub path: String,
    pub content: String,
    pub revision: u64,
    pub cursors: Vec<CursorSnapshot>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CursorUpdateMessage {
    pub participant_id: String,
    pub path: String,
    pub anchor: usize,
    pub head: usize,
    pub color: String,
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FileFocusMessage {
    pub participant_id: String,
    pub path: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ChatBroadcastMessage {
    pub seq: u64,
    pub participant_id: String,
    pub name: String,
    pub color: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SaveRequestedMessage {
    pub approval_id: String,
    pub path: String,
    pub requested_by: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SaveResolvedMessage {
    pub approval_id: String,
    pub path: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FileSavedMessage {
    pub path: String,
    pub revision: u64,
    pub content: String,
    pub saved_by: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FileCreatedMessage {
    pub path: String,
    pub is_dir: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FileRenamedMessage {
    pub old_path: String,
    pub new_path: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ErrorMessage {
    pub code: String,
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PongMessage {
    pub date: String,
}

/// Everything the server can push to a participant.
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "joined")]
    Joined(JoinedMessage),
    #[serde(rename = "waitingApproval")]
    WaitingApproval,
    #[serde(rename = "joinRejected")]
    JoinRejected(JoinRejectedMessage),
    #[serde(rename = "joinRequest")]
    JoinRequest(JoinRequestMessage),
    #[serde(rename = "membershipChanged")]
    MembershipChanged(MembershipChangedMessage),
    #[serde(rename = "opApplied")]
    OpApplied(OpAppliedMessage),
    #[serde(rename = "fileOpened")]
    FileOpened(FileOpenedMessage),
    #[serde(rename = "cursorUpdate")]
    CursorUpdate(CursorUpdateMessage),
    #[serde(rename = "fileFocus")]
    FileFocus(FileFocusMessage),
    #[serde(rename = "chatMessage")]
    Chat(ChatBroadcastMessage),
    #[serde(rename = "saveRequested")]
    SaveRequested(SaveRequestedMessage),
    #[serde(rename = "savePending")]
    SavePending(SaveResolvedMessage),
    #[serde(rename = "saveRejected")]
    SaveRejected(SaveResolvedMessage),
    #[serde(rename = "fileSaved")]
    FileSaved(FileSavedMessage),
    #[serde(rename = "fileCreated")]
    FileCreated(FileCreatedMessage),
    #[serde(rename = "fileDeleted")]
    FileDeleted(FileRefMessage),
    #[serde(rename = "fileRenamed")]
    FileRenamed(FileRenamedMessage),
    #[serde(rename = "sessionClosed")]
    SessionClosed,
    #[serde(rename = "kicked")]
    Kicked,
    #[serde(rename = "error")]
    Error(ErrorMessage),
    #[serde(rename = "pong")]
    Pong(PongMessage),
}

impl ServerMessage {
    /// Messages after which the server closes the participant's socket.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServerMessage::JoinRejected(_) | ServerMessage::SessionClosed | ServerMessage::Kicked
        )
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        ServerMessage::Error(ErrorMessage {
            code: code.to_string(),
            message: message.into(),
        })
    }
}
