use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use utoipa::ToSchema;

use crate::models::messages::ServerMessage;

/// The palette cursors and chat messages are colored with. Assignment is
/// deterministic: the first color not already used in the session.
pub const PARTICIPANT_COLORS: [&str; 8] = [
    "#FF6B6B", "#4ECDC4", "#45B7D1", "#FFA07A", "#98D8C8", "#F7DC6F", "#BB8FCE", "#85C1E2",
];

/// Resolved identity supplied by the identity collaborator at join time.
/// The session engine never authenticates; it only consumes this.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Admin,
    Member,
}

impl Role {
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum ConnectionState {
    /// Socket is up but the participant has not been admitted yet.
    Connecting,
    Active,
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum ApprovalState {
    Pending,
    Approved,
    Rejected,
}

/// One member slot of a session.
#[derive(Debug)]
pub struct Participant {
    pub id: String,
    pub identity: Identity,
    pub color: String,
    pub role: Role,
    pub connection: ConnectionState,
    pub approval: ApprovalState,
    /// Outbound half of the participant's transport channel; `None` while
    /// disconnected.
    pub outbound: Option<UnboundedSender<ServerMessage>>,
    pub open_files: HashSet<String>,
    pub current_file: Option<String>,
    /// Connection generation, bumped on every (re)connect and disconnect.
    /// A handler or grace timer holding a stale generation must not touch
    /// the slot: a reconnection has superseded it.
    pub epoch: u64,
    pub joined_at: DateTime<Utc>,
}

impl Participant {
    pub fn new(
        identity: Identity,
        role: Role,
        color: String,
        outbound: UnboundedSender<ServerMessage>,
    ) -> Self {
        let approval = if role.is_admin() {
            ApprovalState::Approved
        } else {
            ApprovalState::Pending
        };
        let connection = if approval == ApprovalState::Approved {
            ConnectionState::Active
        } else {
            ConnectionState::Connecting
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            identity,
            color,
            role,
            connection,
            approval,
            outbound: Some(outbound),
            open_files: HashSet::new(),
            current_file: None,
            epoch: 0,
            joined_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.identity.display_name
    }

    /// A Pending or Rejected participant has no document, chat or cursor
    /// capability.
    pub fn can_edit(&self) -> bool {
        self.approval == ApprovalState::Approved
    }

    pub fn is_active(&self) -> bool {
        self.approval == ApprovalState::Approved && self.connection == ConnectionState::Active
    }

    /// Push a message onto the participant's transport channel. Delivery
    /// failures are ignored here; a gone receiver is handled by the
    /// disconnect flow.
    pub fn send(&self, msg: ServerMessage) {
        if let Some(tx) = &self.outbound {
            let _ = tx.send(msg);
        }
    }

    pub fn summary(&self) -> ParticipantSummary {
        ParticipantSummary {
            id: self.id.clone(),
            name: self.identity.display_name.clone(),
            color: self.color.clone(),
            role: self.role,
            connection: self.connection,
            current_file: self.current_file.clone(),
            joined_at: self.joined_at,
        }
    }
}

/// Roster entry shared with clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantSummary {
    pub id: String,
    pub name: String,
    pub color: String,
    pub role: Role,
    pub connection: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_file: Option<String>,
    pub joined_at: DateTime<Utc>,
}

/// First palette color not yet taken; wraps deterministically if the whole
/// palette is in use.
pub fn assign_color<'a>(taken: impl Iterator<Item = &'a str>, slot: usize) -> String {
    let taken: Vec<&str> = taken.collect();
    PARTICIPANT_COLORS
        .iter()
        .find(|c| !taken.contains(*c))
        .copied()
        .unwrap_or(PARTICIPANT_COLORS[slot % PARTICIPANT_COLORS.len()])
        .to_string()
}
