use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::doc::operation::EditOperation;
use crate::doc::DocumentStore;
use crate::models::messages::{
    ChatBroadcastMessage, CursorSnapshot, CursorUpdateMessage, FileCreatedMessage,
    FileFocusMessage, FileOpenedMessage, FileRefMessage, FileRenamedMessage, FileSavedMessage,
    JoinRejectedMessage, JoinRequestMessage, JoinedMessage, MembershipChangedMessage,
    MembershipEvent, OpAppliedMessage, OpMessage, SaveRequestedMessage, SaveResolvedMessage,
    ServerMessage,
};
use crate::models::SessionInfoResponse;
use crate::storage::Workspace;

use super::error::SessionError;
use super::participant::{
    assign_color, ApprovalState, ConnectionState, Identity, Participant, ParticipantSummary, Role,
};
use super::presence::{CursorState, PresenceTracker};

/// Whether members are admitted as soon as they join or wait for the admin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum ApprovalPolicy {
    Open,
    Approval,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub enum SessionStatus {
    Open,
    Closed,
}

/// A member's save request waiting for an admin decision.
#[derive(Debug, Clone)]
struct PendingSave {
    id: String,
    path: String,
    requested_by: String,
}

struct SessionState {
    status: SessionStatus,
    participants: Vec<Participant>,
    presence: PresenceTracker,
    chat_seq: u64,
    pending_saves: Vec<PendingSave>,
}

/// Result of a join attempt that reached the membership state machine.
///
/// `epoch` identifies this connection generation; the transport handler
/// hands it back on disconnect so a connection superseded by a
/// reconnection cannot tear the fresh one down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinResult {
    pub participant_id: String,
    pub admitted: bool,
    pub reconnected: bool,
    pub epoch: u64,
}

/// One collaborative session over one project workspace.
///
/// Membership transitions are serialized behind a single mutex so an
/// approval or kick can never race a join past the participant cap. Document
/// mutation is serialized per document inside the `DocumentStore`, not here,
/// so edits to different files do not block each other.
pub struct Session {
    pub id: String,
    pub project_name: String,
    pub admin_user_id: String,
    pub created_at: DateTime<Utc>,
    max_participants: usize,
    approval_policy: ApprovalPolicy,
    state: Mutex<SessionState>,
    docs: DocumentStore,
}

impl Session {
    pub fn new(
        id: impl Into<String>,
        project_name: impl Into<String>,
        admin_user_id: impl Into<String>,
        max_participants: usize,
        approval_policy: ApprovalPolicy,
        workspace: Workspace,
        rebase_window: usize,
    ) -> Self {
        Self {
            id: id.into(),
            project_name: project_name.into(),
            admin_user_id: admin_user_id.into(),
            created_at: Utc::now(),
            max_participants: max_participants.max(1),
            approval_policy,
            state: Mutex::new(SessionState {
                status: SessionStatus::Open,
                participants: Vec::new(),
                presence: PresenceTracker::new(),
                chat_seq: 0,
                pending_saves: Vec::new(),
            }),
            docs: DocumentStore::new(workspace, rebase_window),
        }
    }

    pub fn docs(&self) -> &DocumentStore {
        &self.docs
    }

    pub async fn info(&self) -> SessionInfoResponse {
        let state = self.state.lock().await;
        self.info_locked(&state)
    }

    fn info_locked(&self, state: &SessionState) -> SessionInfoResponse {
        SessionInfoResponse {
            session_id: self.id.clone(),
            project_name: self.project_name.clone(),
            max_participants: self.max_participants,
            participant_count: state
                .participants
                .iter()
                .filter(|p| p.approval == ApprovalState::Approved)
                .count(),
            status: state.status,
        }
    }

    /// (participants, pending approvals) for diagnostics.
    pub async fn participant_counts(&self) -> (usize, usize) {
        let state = self.state.lock().await;
        let pending = state
            .participants
            .iter()
            .filter(|p| p.approval == ApprovalState::Pending)
            .count();
        (state.participants.len(), pending)
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.participants.is_empty()
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.status == SessionStatus::Closed
    }

    // ==================== Membership ====================

    /// Handle a join attempt with an already-resolved identity.
    ///
    /// The same identity reconnecting while its slot is still held resumes
    /// it silently: the roster does not change and nothing is broadcast.
    /// A join that would exceed the cap is rejected before any state exists
    /// for it.
    pub async fn join(
        &self,
        identity: Identity,
        outbound: UnboundedSender<ServerMessage>,
    ) -> Result<JoinResult, SessionError> {
        let mut state = self.state.lock().await;
        if state.status == SessionStatus::Closed {
            return Err(SessionError::SessionClosed);
        }

        // Reconnection with the same identity takes the existing slot over.
        if let Some(idx) = state
            .participants
            .iter()
            .position(|p| p.identity.user_id == identity.user_id)
        {
            let participant = &mut state.participants[idx];
            participant.outbound = Some(outbound);
            participant.epoch += 1;
            let epoch = participant.epoch;
            match participant.approval {
                ApprovalState::Approved => {
                    participant.connection = ConnectionState::Active;
                    let pid = participant.id.clone();
                    info!("Participant '{}' reconnected to session {}", pid, self.id);
                    self.send_welcome(&state, &pid);
                    if self.is_admin_id(&state, &pid) {
                        self.replay_pending(&state, &pid);
                    }
                    return Ok(JoinResult {
                        participant_id: pid,
                        admitted: true,
                        reconnected: true,
                        epoch,
                    });
                }
                _ => {
                    let pid = participant.id.clone();
                    self.send_to(&state, &pid, ServerMessage::WaitingApproval);
                    return Ok(JoinResult {
                        participant_id: pid,
                        admitted: false,
                        reconnected: true,
                        epoch,
                    });
                }
            }
        }

        // Active and requesting participants both hold a slot.
        if state.participants.len() >= self.max_participants {
            return Err(SessionError::SessionFull);
        }

        let role = if identity.user_id == self.admin_user_id {
            Role::Admin
        } else {
            Role::Member
        };
        let color = assign_color(
            state.participants.iter().map(|p| p.color.as_str()),
            state.participants.len(),
        );
        let mut participant = Participant::new(identity, role, color, outbound);
        if role == Role::Member && self.approval_policy == ApprovalPolicy::Open {
            participant.approval = ApprovalState::Approved;
            participant.connection = ConnectionState::Active;
        }
        let pid = participant.id.clone();
        let name = participant.name().to_string();
        let admitted = participant.approval == ApprovalState::Approved;
        let summary = participant.summary();
        state.participants.push(participant);

        if admitted {
            info!(
                "Participant '{}' ({:?}) joined session {}",
                name, role, self.id
            );
            self.broadcast_membership(&state, MembershipEvent::Joined, summary, Some(&pid));
            self.send_welcome(&state, &pid);
            if role.is_admin() {
                self.replay_pending(&state, &pid);
            }
        } else {
            info!(
                "Participant '{}' requesting approval for session {}",
                name, self.id
            );
            self.notify_admins(
                &state,
                ServerMessage::JoinRequest(JoinRequestMessage {
                    participant_id: pid.clone(),
                    name,
                }),
            );
            self.send_to(&state, &pid, ServerMessage::WaitingApproval);
        }

        Ok(JoinResult {
            participant_id: pid,
            admitted,
            reconnected: false,
            epoch: 0,
        })
    }

    /// Admit a requesting participant. Admin only.
    pub async fn approve(&self, actor_id: &str, target_id: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        self.ensure_admin(&state, actor_id)?;

        let participant = state
            .participants
            .iter_mut()
            .find(|p| p.id == target_id && p.approval == ApprovalState::Pending)
            .ok_or_else(|| SessionError::UnknownParticipant(target_id.to_string()))?;
        participant.approval = ApprovalState::Approved;
        participant.connection = ConnectionState::Active;
        let summary = participant.summary();

        info!(
            "Participant '{}' approved in session {}",
            summary.name, self.id
        );
        self.broadcast_membership(&state, MembershipEvent::Joined, summary, Some(target_id));
        self.send_welcome(&state, target_id);
        Ok(())
    }

    /// Turn a requesting participant away. The decision goes only to the
    /// rejected participant; nothing is broadcast.
    pub async fn reject(&self, actor_id: &str, target_id: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        self.ensure_admin(&state, actor_id)?;

        let idx = state
            .participants
            .iter()
            .position(|p| p.id == target_id && p.approval == ApprovalState::Pending)
            .ok_or_else(|| SessionError::UnknownParticipant(target_id.to_string()))?;
        self.send_to(
            &state,
            target_id,
            ServerMessage::JoinRejected(JoinRejectedMessage {
                code: "rejected".to_string(),
                reason: "Your request to join was denied".to_string(),
            }),
        );
        let participant = state.participants.remove(idx);
        info!(
            "Participant '{}' rejected from session {}",
            participant.name(),
            self.id
        );
        Ok(())
    }

    /// Force a participant out. Admin only.
    pub async fn kick(&self, actor_id: &str, target_id: &str) -> Result<(), SessionError> {
        let summary = {
            let mut state = self.state.lock().await;
            self.ensure_admin(&state, actor_id)?;
            let idx = state
                .participants
                .iter()
                .position(|p| p.id == target_id)
                .ok_or_else(|| SessionError::UnknownParticipant(target_id.to_string()))?;
            self.send_to(&state, target_id, ServerMessage::Kicked);
            let participant = state.participants.remove(idx);
            state.presence.remove_participant(target_id);
            let summary = participant.summary();
            info!(
                "Participant '{}' kicked from session {}",
                summary.name, self.id
            );
            self.broadcast_membership(&state, MembershipEvent::Kicked, summary.clone(), None);
            summary
        };
        self.docs.close_all_for(&summary.id).await;
        Ok(())
    }

    /// Explicit leave.
    pub async fn leave(&self, participant_id: &str) -> Result<(), SessionError> {
        {
            let mut state = self.state.lock().await;
            let idx = state
                .participants
                .iter()
                .position(|p| p.id == participant_id)
                .ok_or_else(|| SessionError::UnknownParticipant(participant_id.to_string()))?;
            let participant = state.participants.remove(idx);
            state.presence.remove_participant(participant_id);
            if participant.approval == ApprovalState::Approved {
                info!(
                    "Participant '{}' left session {}",
                    participant.name(),
                    self.id
                );
                self.broadcast_membership(&state, MembershipEvent::Left, participant.summary(), None);
            }
        }
        self.docs.close_all_for(participant_id).await;
        Ok(())
    }

    /// Transport-level disconnect of the connection generation `epoch`.
    ///
    /// A pending join is simply cancelled; an approved participant keeps
    /// its slot for the grace period and nothing is broadcast yet. Returns
    /// the epoch the reaper must present to remove the slot, or `None` when
    /// no reaping is needed. A stale `epoch` (the identity already
    /// reconnected on a newer socket) is a no-op.
    pub async fn disconnect(&self, participant_id: &str, epoch: u64) -> Option<u64> {
        let mut state = self.state.lock().await;
        let idx = state
            .participants
            .iter()
            .position(|p| p.id == participant_id)?;
        if state.participants[idx].epoch != epoch {
            debug!(
                "Ignoring stale disconnect of '{}' in session {}",
                participant_id, self.id
            );
            return None;
        }

        if state.participants[idx].approval != ApprovalState::Approved {
            // Cancelled join request: no residual state, no events.
            state.participants.remove(idx);
            debug!(
                "Pending participant '{}' disconnected from session {}",
                participant_id, self.id
            );
            return None;
        }

        let participant = &mut state.participants[idx];
        participant.connection = ConnectionState::Disconnected;
        participant.outbound = None;
        participant.epoch += 1;
        let epoch = participant.epoch;
        state.presence.remove_participant(participant_id);
        debug!(
            "Participant '{}' disconnected from session {} (epoch {})",
            participant_id, self.id, epoch
        );
        Some(epoch)
    }

    /// Remove a participant whose grace period elapsed. The epoch guards
    /// against a reconnection that happened after the timer was armed.
    /// Returns true when the slot was freed.
    pub async fn reap_disconnected(&self, participant_id: &str, epoch: u64) -> bool {
        let removed = {
            let mut state = self.state.lock().await;
            let Some(idx) = state
                .participants
                .iter()
                .position(|p| p.id == participant_id)
            else {
                return false;
            };
            let participant = &state.participants[idx];
            if participant.connection != ConnectionState::Disconnected
                || participant.epoch != epoch
            {
                return false;
            }
            let participant = state.participants.remove(idx);
            state.presence.remove_participant(participant_id);
            info!(
                "Participant '{}' removed from session {} after grace period",
                participant.name(),
                self.id
            );
            self.broadcast_membership(&state, MembershipEvent::Left, participant.summary(), None);
            true
        };
        if removed {
            self.docs.close_all_for(participant_id).await;
        }
        removed
    }

    /// Close the session on behalf of an admin.
    pub async fn close(&self, actor_id: &str) -> Result<(), SessionError> {
        {
            let state = self.state.lock().await;
            self.ensure_admin(&state, actor_id)?;
        }
        self.shutdown().await;
        Ok(())
    }

    /// Close unconditionally: every participant is removed and all open
    /// documents are flushed and dropped.
    pub async fn shutdown(&self) {
        {
            let mut state = self.state.lock().await;
            if state.status == SessionStatus::Closed {
                return;
            }
            state.status = SessionStatus::Closed;
            // Everyone still holding a channel gets the terminal message,
            // pending participants included.
            for p in &state.participants {
                p.send(ServerMessage::SessionClosed);
            }
            state.participants.clear();
            state.presence = PresenceTracker::new();
            state.pending_saves.clear();
        }
        self.docs.close_all().await;
        info!("Session {} closed", self.id);
    }

    // ==================== Documents ====================

    /// Open a file for a participant and send them its current state.
    pub async fn open_file(&self, participant_id: &str, path: &str) -> Result<(), SessionError> {
        {
            let state = self.state.lock().await;
            self.ensure_can_edit(&state, participant_id)?;
        }
        let (content, revision) = self.docs.open(participant_id, path).await?;

        let mut state = self.state.lock().await;
        let cursors = state
            .presence
            .cursors_in(path)
            .into_iter()
            .map(|(pid, c)| CursorSnapshot {
                participant_id: pid,
                anchor: c.anchor,
                head: c.head,
            })
            .collect();
        if let Some(p) = state
            .participants
            .iter_mut()
            .find(|p| p.id == participant_id)
        {
            p.open_files.insert(path.to_string());
            p.current_file = Some(path.to_string());
        }
        self.broadcast(
            &state,
            ServerMessage::FileFocus(FileFocusMessage {
                participant_id: participant_id.to_string(),
                path: Some(path.to_string()),
            }),
            None,
        );
        self.send_to(
            &state,
            participant_id,
            ServerMessage::FileOpened(FileOpenedMessage {
                path: path.to_string(),
                content,
                revision,
                cursors,
            }),
        );
        Ok(())
    }

    /// Close a file for a participant, evicting the document when nobody
    /// else holds it open.
    pub async fn close_file(&self, participant_id: &str, path: &str) -> Result<(), SessionError> {
        {
            let mut state = self.state.lock().await;
            state.presence.clear_file(participant_id, path);
            let mut was_open = false;
            if let Some(p) = state
                .participants
                .iter_mut()
                .find(|p| p.id == participant_id)
            {
                was_open = p.open_files.remove(path);
                if p.current_file.as_deref() == Some(path) {
                    p.current_file = None;
                }
            }
            if was_open {
                self.broadcast(
                    &state,
                    ServerMessage::FileFocus(FileFocusMessage {
                        participant_id: participant_id.to_string(),
                        path: None,
                    }),
                    None,
                );
            }
        }
        self.docs.close(participant_id, path).await
    }

    /// Apply one edit operation and fan the applied form out to every
    /// active participant, the originator included (tagged with its client
    /// sequence number so optimistic local state can be reconciled).
    ///
    /// The fan-out happens while the document is still locked, so delivery
    /// order per document always matches applied-revision order.
    pub async fn apply_op(&self, participant_id: &str, msg: &OpMessage) -> Result<(), SessionError> {
        let recipients: Vec<(String, UnboundedSender<ServerMessage>)> = {
            let state = self.state.lock().await;
            self.ensure_can_edit(&state, participant_id)?;
            state
                .participants
                .iter()
                .filter(|p| p.is_active())
                .filter_map(|p| p.outbound.clone().map(|tx| (p.id.clone(), tx)))
                .collect()
        };

        let doc = self
            .docs
            .document(&msg.path)
            .await
            .ok_or_else(|| SessionError::DocumentNotOpen(msg.path.clone()))?;
        let mut doc = doc.lock().await;
        let op = EditOperation::new(
            participant_id,
            msg.base_revision,
            msg.spans.clone(),
            msg.client_seq,
        );
        let applied = doc.apply(&op)?;

        let broadcast = ServerMessage::OpApplied(OpAppliedMessage {
            path: msg.path.clone(),
            revision: applied.revision,
            spans: applied.spans.clone(),
            client_seq: msg.client_seq,
            origin: participant_id.to_string(),
        });
        for (pid, tx) in &recipients {
            // A voided operation is only echoed back for reconciliation.
            if applied.is_noop() && pid != participant_id {
                continue;
            }
            let _ = tx.send(broadcast.clone());
        }
        Ok(())
    }

    // ==================== Presence & chat ====================

    /// Overwrite a participant's cursor in one file and broadcast it to
    /// everyone else immediately.
    pub async fn update_cursor(
        &self,
        participant_id: &str,
        path: &str,
        anchor: usize,
        head: usize,
    ) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        let (color, name) = {
            let p = self.ensure_can_edit(&state, participant_id)?;
            (p.color.clone(), p.identity.display_name.clone())
        };
        state
            .presence
            .update(participant_id, path, CursorState { anchor, head });
        self.broadcast(
            &state,
            ServerMessage::CursorUpdate(CursorUpdateMessage {
                participant_id: participant_id.to_string(),
                path: path.to_string(),
                anchor,
                head,
                color,
                name,
            }),
            Some(participant_id),
        );
        Ok(())
    }

    /// Append a chat message and broadcast it to everyone, the sender
    /// included, with a session-scoped sequence number.
    pub async fn chat(&self, participant_id: &str, text: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        let (color, name) = {
            let p = self.ensure_can_edit(&state, participant_id)?;
            (p.color.clone(), p.identity.display_name.clone())
        };
        state.chat_seq += 1;
        let msg = ServerMessage::Chat(ChatBroadcastMessage {
            seq: state.chat_seq,
            participant_id: participant_id.to_string(),
            name,
            color,
            text: text.to_string(),
            timestamp: Utc::now(),
        });
        self.broadcast(&state, msg, None);
        Ok(())
    }

    // ==================== Saving ====================

    /// An admin saves directly; a member's request is queued for admin
    /// approval.
    pub async fn request_save(&self, participant_id: &str, path: &str) -> Result<(), SessionError> {
        let admin = {
            let mut state = self.state.lock().await;
            let p = self.ensure_can_edit(&state, participant_id)?;
            let is_admin = p.role.is_admin();
            let name = p.identity.display_name.clone();
            if !is_admin {
                let approval_id = Uuid::new_v4().to_string();
                state.pending_saves.push(PendingSave {
                    id: approval_id.clone(),
                    path: path.to_string(),
                    requested_by: participant_id.to_string(),
                });
                info!(
                    "Save of '{}' in session {} awaiting approval",
                    path, self.id
                );
                self.notify_admins(
                    &state,
                    ServerMessage::SaveRequested(SaveRequestedMessage {
                        approval_id: approval_id.clone(),
                        path: path.to_string(),
                        requested_by: name,
                    }),
                );
                self.send_to(
                    &state,
                    participant_id,
                    ServerMessage::SavePending(SaveResolvedMessage {
                        approval_id,
                        path: path.to_string(),
                    }),
                );
            }
            is_admin
        };
        if admin {
            self.save_file(path, participant_id).await?;
        }
        Ok(())
    }

    /// Resolve a queued save request. Admin only. Unknown approval ids are
    /// ignored (the request may have been resolved by another admin
    /// connection already).
    pub async fn resolve_save(
        &self,
        actor_id: &str,
        approval_id: &str,
        approved: bool,
    ) -> Result<(), SessionError> {
        let pending = {
            let mut state = self.state.lock().await;
            self.ensure_admin(&state, actor_id)?;
            let Some(idx) = state.pending_saves.iter().position(|s| s.id == approval_id) else {
                warn!(
                    "Ignoring unknown save approval '{}' in session {}",
                    approval_id, self.id
                );
                return Ok(());
            };
            let pending = state.pending_saves.remove(idx);
            if !approved {
                self.send_to(
                    &state,
                    &pending.requested_by,
                    ServerMessage::SaveRejected(SaveResolvedMessage {
                        approval_id: pending.id.clone(),
                        path: pending.path.clone(),
                    }),
                );
                return Ok(());
            }
            pending
        };
        self.save_file(&pending.path, &pending.requested_by).await
    }

    /// Flush one document and broadcast the saved content so every client
    /// can sync its baseline.
    async fn save_file(&self, path: &str, saved_by: &str) -> Result<(), SessionError> {
        let doc = self
            .docs
            .document(path)
            .await
            .ok_or_else(|| SessionError::DocumentNotOpen(path.to_string()))?;
        let (content, revision) = {
            let doc = doc.lock().await;
            (doc.content().to_string(), doc.revision())
        };
        self.docs.flush(path).await?;

        let state = self.state.lock().await;
        let saved_by_name = state
            .participants
            .iter()
            .find(|p| p.id == saved_by)
            .map(|p| p.identity.display_name.clone())
            .unwrap_or_else(|| saved_by.to_string());
        self.broadcast(
            &state,
            ServerMessage::FileSaved(FileSavedMessage {
                path: path.to_string(),
                revision,
                content,
                saved_by: saved_by_name,
            }),
            None,
        );
        Ok(())
    }

    // ==================== Workspace mutation ====================

    /// Create a file or directory in the workspace. Admin only.
    pub async fn create_entry(
        &self,
        actor_id: &str,
        path: &str,
        is_dir: bool,
    ) -> Result<(), SessionError> {
        {
            let state = self.state.lock().await;
            self.ensure_admin(&state, actor_id)?;
        }
        self.docs.workspace().create(path, is_dir).await?;
        let state = self.state.lock().await;
        self.broadcast(
            &state,
            ServerMessage::FileCreated(FileCreatedMessage {
                path: path.to_string(),
                is_dir,
            }),
            None,
        );
        Ok(())
    }

    /// Delete a workspace entry. Admin only. An open document for the path
    /// is dropped without flushing.
    pub async fn delete_entry(&self, actor_id: &str, path: &str) -> Result<(), SessionError> {
        {
            let state = self.state.lock().await;
            self.ensure_admin(&state, actor_id)?;
        }
        self.docs.evict(path).await;
        self.docs.workspace().remove(path).await?;
        let state = self.state.lock().await;
        self.broadcast(
            &state,
            ServerMessage::FileDeleted(FileRefMessage {
                path: path.to_string(),
            }),
            None,
        );
        Ok(())
    }

    /// Rename a workspace entry. Admin only. An open document for the old
    /// path is flushed and dropped; clients reopen under the new path.
    pub async fn rename_entry(
        &self,
        actor_id: &str,
        old_path: &str,
        new_path: &str,
    ) -> Result<(), SessionError> {
        {
            let state = self.state.lock().await;
            self.ensure_admin(&state, actor_id)?;
        }
        if self.docs.document(old_path).await.is_some() {
            if let Err(e) = self.docs.flush(old_path).await {
                warn!("Flush of '{}' before rename failed: {}", old_path, e);
            }
            self.docs.evict(old_path).await;
        }
        self.docs.workspace().rename(old_path, new_path).await?;
        let state = self.state.lock().await;
        self.broadcast(
            &state,
            ServerMessage::FileRenamed(FileRenamedMessage {
                old_path: old_path.to_string(),
                new_path: new_path.to_string(),
            }),
            None,
        );
        Ok(())
    }

    // ==================== Fan-out ====================

    fn roster(&self, state: &SessionState) -> Vec<ParticipantSummary> {
        state
            .participants
            .iter()
            .filter(|p| p.approval == ApprovalState::Approved)
            .map(|p| p.summary())
            .collect()
    }

    /// Push a message to every active participant, optionally excluding the
    /// originator.
    fn broadcast(&self, state: &SessionState, msg: ServerMessage, exclude: Option<&str>) {
        for p in state.participants.iter().filter(|p| p.is_active()) {
            if exclude == Some(p.id.as_str()) {
                continue;
            }
            p.send(msg.clone());
        }
    }

    fn broadcast_membership(
        &self,
        state: &SessionState,
        event: MembershipEvent,
        participant: ParticipantSummary,
        exclude: Option<&str>,
    ) {
        self.broadcast(
            state,
            ServerMessage::MembershipChanged(MembershipChangedMessage {
                event,
                participant,
                roster: self.roster(state),
            }),
            exclude,
        );
    }

    fn notify_admins(&self, state: &SessionState, msg: ServerMessage) {
        for p in state
            .participants
            .iter()
            .filter(|p| p.role.is_admin() && p.is_active())
        {
            p.send(msg.clone());
        }
    }

    fn send_to(&self, state: &SessionState, participant_id: &str, msg: ServerMessage) -> bool {
        match state.participants.iter().find(|p| p.id == participant_id) {
            Some(p) => {
                p.send(msg);
                true
            }
            None => false,
        }
    }

    fn send_welcome(&self, state: &SessionState, participant_id: &str) {
        if let Some(p) = state.participants.iter().find(|p| p.id == participant_id) {
            p.send(ServerMessage::Joined(JoinedMessage {
                participant: p.summary(),
                roster: self.roster(state),
                session: self.info_locked(state),
            }));
        }
    }

    /// A newly active admin gets the backlog of join and save requests.
    fn replay_pending(&self, state: &SessionState, admin_id: &str) {
        for p in state
            .participants
            .iter()
            .filter(|p| p.approval == ApprovalState::Pending)
        {
            self.send_to(
                state,
                admin_id,
                ServerMessage::JoinRequest(JoinRequestMessage {
                    participant_id: p.id.clone(),
                    name: p.identity.display_name.clone(),
                }),
            );
        }
        for s in &state.pending_saves {
            let requested_by = state
                .participants
                .iter()
                .find(|p| p.id == s.requested_by)
                .map(|p| p.identity.display_name.clone())
                .unwrap_or_else(|| s.requested_by.clone());
            self.send_to(
                state,
                admin_id,
                ServerMessage::SaveRequested(SaveRequestedMessage {
                    approval_id: s.id.clone(),
                    path: s.path.clone(),
                    requested_by,
                }),
            );
        }
    }

    // ==================== Capability checks ====================

    fn ensure_admin<'a>(
        &self,
        state: &'a SessionState,
        participant_id: &str,
    ) -> Result<&'a Participant, SessionError> {
        let p = state
            .participants
            .iter()
            .find(|p| p.id == participant_id)
            .ok_or_else(|| SessionError::UnknownParticipant(participant_id.to_string()))?;
        if !p.role.is_admin() {
            return Err(SessionError::NotAdmin);
        }
        Ok(p)
    }

    fn ensure_can_edit<'a>(
        &self,
        state: &'a SessionState,
        participant_id: &str,
    ) -> Result<&'a Participant, SessionError> {
        let p = state
            .participants
            .iter()
            .find(|p| p.id == participant_id)
            .ok_or_else(|| SessionError::UnknownParticipant(participant_id.to_string()))?;
        if !p.can_edit() {
            return Err(SessionError::NotApproved);
        }
        Ok(p)
    }

    fn is_admin_id(&self, state: &SessionState, participant_id: &str) -> bool {
        state
            .participants
            .iter()
            .any(|p| p.id == participant_id && p.role.is_admin())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::operation::EditSpan;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    struct TestPeer {
        id: String,
        epoch: u64,
        rx: UnboundedReceiver<ServerMessage>,
    }

    impl TestPeer {
        fn drain(&mut self) -> Vec<ServerMessage> {
            let mut out = Vec::new();
            while let Ok(msg) = self.rx.try_recv() {
                out.push(msg);
            }
            out
        }
    }

    fn identity(user: &str) -> Identity {
        Identity {
            user_id: user.to_string(),
            display_name: user.to_uppercase(),
        }
    }

    fn session_with(cap: usize, policy: ApprovalPolicy) -> (tempfile::TempDir, Session) {
        let dir = tempfile::tempdir().unwrap();
        let workspace = Workspace::new(dir.path());
        let session = Session::new("s1", "demo", "admin", cap, policy, workspace, 64);
        (dir, session)
    }

    async fn join(session: &Session, user: &str) -> TestPeer {
        let (tx, rx) = unbounded_channel();
        let result = session.join(identity(user), tx).await.unwrap();
        TestPeer {
            id: result.participant_id,
            epoch: result.epoch,
            rx,
        }
    }

    #[tokio::test]
    async fn open_policy_admits_members_directly() {
        let (_dir, session) = session_with(5, ApprovalPolicy::Open);
        let mut member = join(&session, "u1").await;
        let msgs = member.drain();
        assert!(matches!(msgs.as_slice(), [ServerMessage::Joined(_)]));
        assert_eq!(session.info().await.participant_count, 1);
    }

    #[tokio::test]
    async fn requesting_members_wait_and_admins_are_notified() {
        let (_dir, session) = session_with(5, ApprovalPolicy::Approval);
        let mut admin = join(&session, "admin").await;
        admin.drain();

        let mut member = join(&session, "u1").await;
        assert!(matches!(
            member.drain().as_slice(),
            [ServerMessage::WaitingApproval]
        ));
        let admin_msgs = admin.drain();
        assert!(admin_msgs
            .iter()
            .any(|m| matches!(m, ServerMessage::JoinRequest(_))));
        // Requesting participants are not part of the public roster.
        assert_eq!(session.info().await.participant_count, 1);
    }

    #[tokio::test]
    async fn pending_participants_have_no_capabilities() {
        let (_dir, session) = session_with(5, ApprovalPolicy::Approval);
        let mut admin = join(&session, "admin").await;
        let member = join(&session, "u1").await;

        let err = session.chat(&member.id, "hi").await.unwrap_err();
        assert!(matches!(err, SessionError::NotApproved));
        let err = session
            .update_cursor(&member.id, "a.txt", 0, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotApproved));
        let err = session.open_file(&member.id, "a.txt").await.unwrap_err();
        assert!(matches!(err, SessionError::NotApproved));
        let op = OpMessage {
            path: "a.txt".to_string(),
            base_revision: 0,
            spans: vec![],
            client_seq: 1,
        };
        let err = session.apply_op(&member.id, &op).await.unwrap_err();
        assert!(matches!(err, SessionError::NotApproved));

        // Nothing leaked to the admin besides the join request.
        let msgs = admin.drain();
        assert!(msgs.iter().all(|m| matches!(
            m,
            ServerMessage::Joined(_) | ServerMessage::JoinRequest(_)
        )));
    }

    #[tokio::test]
    async fn sixth_join_is_rejected_when_full() {
        let (_dir, session) = session_with(5, ApprovalPolicy::Open);
        join(&session, "admin").await;
        for i in 0..4 {
            join(&session, &format!("u{}", i)).await;
        }

        let (tx, _rx) = unbounded_channel();
        let err = session.join(identity("u9"), tx).await.unwrap_err();
        assert!(matches!(err, SessionError::SessionFull));
        assert_eq!(session.participant_counts().await.0, 5);
    }

    #[tokio::test]
    async fn requesting_participants_count_toward_the_cap() {
        let (_dir, session) = session_with(2, ApprovalPolicy::Approval);
        join(&session, "admin").await;
        join(&session, "u1").await; // pending

        let (tx, _rx) = unbounded_channel();
        let err = session.join(identity("u2"), tx).await.unwrap_err();
        assert!(matches!(err, SessionError::SessionFull));
    }

    #[tokio::test]
    async fn approval_promotes_a_requesting_participant() {
        let (_dir, session) = session_with(5, ApprovalPolicy::Approval);
        let mut admin = join(&session, "admin").await;
        let mut member = join(&session, "u1").await;
        admin.drain();
        member.drain();

        session.approve(&admin.id, &member.id).await.unwrap();

        let member_msgs = member.drain();
        assert!(matches!(member_msgs.as_slice(), [ServerMessage::Joined(_)]));
        let admin_msgs = admin.drain();
        match admin_msgs.as_slice() {
            [ServerMessage::MembershipChanged(m)] => {
                assert_eq!(m.event, MembershipEvent::Joined);
                assert_eq!(m.roster.len(), 2);
            }
            other => panic!("unexpected messages: {:?}", other),
        }
        assert!(session.chat(&member.id, "hello").await.is_ok());
    }

    #[tokio::test]
    async fn rejection_is_delivered_only_to_the_target() {
        let (_dir, session) = session_with(5, ApprovalPolicy::Approval);
        let mut admin = join(&session, "admin").await;
        let mut member = join(&session, "u1").await;
        admin.drain();
        member.drain();

        session.reject(&admin.id, &member.id).await.unwrap();

        assert!(matches!(
            member.drain().as_slice(),
            [ServerMessage::JoinRejected(_)]
        ));
        assert!(admin.drain().is_empty());
        assert_eq!(session.participant_counts().await.0, 1);
    }

    #[tokio::test]
    async fn members_cannot_use_admin_operations() {
        let (_dir, session) = session_with(5, ApprovalPolicy::Open);
        join(&session, "admin").await;
        let member = join(&session, "u1").await;
        let other = join(&session, "u2").await;

        let err = session.approve(&member.id, &other.id).await.unwrap_err();
        assert!(matches!(err, SessionError::NotAdmin));
        let err = session.kick(&member.id, &other.id).await.unwrap_err();
        assert!(matches!(err, SessionError::NotAdmin));
        let err = session.close(&member.id).await.unwrap_err();
        assert!(matches!(err, SessionError::NotAdmin));
        let err = session
            .create_entry(&member.id, "x.txt", false)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotAdmin));
    }

    #[tokio::test]
    async fn kick_notifies_target_and_frees_the_slot() {
        let (_dir, session) = session_with(2, ApprovalPolicy::Open);
        let mut admin = join(&session, "admin").await;
        let mut member = join(&session, "u1").await;
        admin.drain();
        member.drain();

        session.kick(&admin.id, &member.id).await.unwrap();

        assert!(matches!(member.drain().as_slice(), [ServerMessage::Kicked]));
        let admin_msgs = admin.drain();
        match admin_msgs.as_slice() {
            [ServerMessage::MembershipChanged(m)] => {
                assert_eq!(m.event, MembershipEvent::Kicked);
                assert_eq!(m.roster.len(), 1);
            }
            other => panic!("unexpected messages: {:?}", other),
        }

        // The freed slot is immediately reusable.
        join(&session, "u2").await;
        assert_eq!(session.participant_counts().await.0, 2);
    }

    #[tokio::test]
    async fn reconnect_within_grace_is_silent() {
        let (_dir, session) = session_with(5, ApprovalPolicy::Open);
        let mut admin = join(&session, "admin").await;
        let mut member = join(&session, "u1").await;
        let member_id = member.id.clone();
        admin.drain();
        member.drain();

        let epoch = session.disconnect(&member_id, member.epoch).await.unwrap();
        assert!(admin.drain().is_empty(), "disconnect is not broadcast");

        // Same identity returns before the grace period elapsed.
        let (tx, rx) = unbounded_channel();
        let result = session.join(identity("u1"), tx).await.unwrap();
        assert!(result.reconnected);
        assert_eq!(result.participant_id, member_id);
        member.rx = rx;
        assert!(matches!(
            member.drain().as_slice(),
            [ServerMessage::Joined(_)]
        ));
        assert!(admin.drain().is_empty(), "reconnect is not broadcast");

        // The stale grace timer must not free the slot, and a disconnect
        // from the superseded socket must not touch the new connection.
        assert!(!session.reap_disconnected(&member_id, epoch).await);
        assert!(session.disconnect(&member_id, member.epoch).await.is_none());
        assert!(session.chat(&member_id, "still here").await.is_ok());
        assert_eq!(session.participant_counts().await.0, 2);
    }

    #[tokio::test]
    async fn grace_expiry_broadcasts_exactly_one_leave() {
        let (_dir, session) = session_with(5, ApprovalPolicy::Open);
        let mut admin = join(&session, "admin").await;
        let member = join(&session, "u1").await;
        let member_id = member.id.clone();
        admin.drain();

        let epoch = session.disconnect(&member_id, member.epoch).await.unwrap();
        assert!(session.reap_disconnected(&member_id, epoch).await);
        assert!(!session.reap_disconnected(&member_id, epoch).await);

        let admin_msgs = admin.drain();
        let leaves: Vec<_> = admin_msgs
            .iter()
            .filter(|m| {
                matches!(m, ServerMessage::MembershipChanged(mc) if mc.event == MembershipEvent::Left)
            })
            .collect();
        assert_eq!(leaves.len(), 1);
        assert_eq!(session.participant_counts().await.0, 1);
    }

    #[tokio::test]
    async fn pending_disconnect_cancels_the_join_request() {
        let (_dir, session) = session_with(5, ApprovalPolicy::Approval);
        let mut admin = join(&session, "admin").await;
        let member = join(&session, "u1").await;
        admin.drain();

        assert!(session.disconnect(&member.id, member.epoch).await.is_none());
        assert_eq!(session.participant_counts().await, (1, 0));
        assert!(admin.drain().is_empty());
    }

    #[tokio::test]
    async fn chat_is_sequenced_and_echoed_to_everyone() {
        let (_dir, session) = session_with(5, ApprovalPolicy::Open);
        let mut admin = join(&session, "admin").await;
        let mut member = join(&session, "u1").await;
        admin.drain();
        member.drain();

        session.chat(&admin.id, "first").await.unwrap();
        session.chat(&member.id, "second").await.unwrap();

        let seqs: Vec<u64> = member
            .drain()
            .into_iter()
            .filter_map(|m| match m {
                ServerMessage::Chat(c) => Some(c.seq),
                _ => None,
            })
            .collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(
            admin
                .drain()
                .iter()
                .filter(|m| matches!(m, ServerMessage::Chat(_)))
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn cursor_updates_skip_the_originator() {
        let (_dir, session) = session_with(5, ApprovalPolicy::Open);
        let mut admin = join(&session, "admin").await;
        let mut member = join(&session, "u1").await;
        admin.drain();
        member.drain();

        session
            .update_cursor(&member.id, "a.txt", 3, 9)
            .await
            .unwrap();

        assert!(member.drain().is_empty());
        match admin.drain().as_slice() {
            [ServerMessage::CursorUpdate(c)] => {
                assert_eq!(c.participant_id, member.id);
                assert_eq!((c.anchor, c.head), (3, 9));
            }
            other => panic!("unexpected messages: {:?}", other),
        }
    }

    #[tokio::test]
    async fn applied_operations_reach_everyone_in_revision_order() {
        let (_dir, session) = session_with(5, ApprovalPolicy::Open);
        let mut admin = join(&session, "admin").await;
        let mut member = join(&session, "u1").await;
        session
            .docs()
            .workspace()
            .write("a.txt", "hello")
            .await
            .unwrap();
        session.open_file(&admin.id, "a.txt").await.unwrap();
        session.open_file(&member.id, "a.txt").await.unwrap();
        admin.drain();
        member.drain();

        for i in 0..3u64 {
            let op = OpMessage {
                path: "a.txt".to_string(),
                base_revision: i,
                spans: vec![EditSpan::insert(0, "x")],
                client_seq: i + 1,
            };
            session.apply_op(&admin.id, &op).await.unwrap();
        }

        // Both the originator and the peer observe revisions 1..=3.
        for peer in [&mut admin, &mut member] {
            let revisions: Vec<u64> = peer
                .drain()
                .into_iter()
                .filter_map(|m| match m {
                    ServerMessage::OpApplied(a) => Some(a.revision),
                    _ => None,
                })
                .collect();
            assert_eq!(revisions, vec![1, 2, 3]);
        }
    }

    #[tokio::test]
    async fn duplicate_operations_do_not_mutate_twice() {
        let (_dir, session) = session_with(5, ApprovalPolicy::Open);
        let admin = join(&session, "admin").await;
        session
            .docs()
            .workspace()
            .write("a.txt", "hello")
            .await
            .unwrap();
        session.open_file(&admin.id, "a.txt").await.unwrap();

        let op = OpMessage {
            path: "a.txt".to_string(),
            base_revision: 0,
            spans: vec![EditSpan::insert(5, "!")],
            client_seq: 1,
        };
        session.apply_op(&admin.id, &op).await.unwrap();
        session.apply_op(&admin.id, &op).await.unwrap();

        let doc = session.docs().document("a.txt").await.unwrap();
        let doc = doc.lock().await;
        assert_eq!(doc.content(), "hello!");
        assert_eq!(doc.revision(), 1);
    }

    #[tokio::test]
    async fn member_saves_go_through_admin_approval() {
        let (_dir, session) = session_with(5, ApprovalPolicy::Open);
        let mut admin = join(&session, "admin").await;
        let mut member = join(&session, "u1").await;
        session
            .docs()
            .workspace()
            .write("a.txt", "hello")
            .await
            .unwrap();
        session.open_file(&member.id, "a.txt").await.unwrap();
        let op = OpMessage {
            path: "a.txt".to_string(),
            base_revision: 0,
            spans: vec![EditSpan::insert(5, " world")],
            client_seq: 1,
        };
        session.apply_op(&member.id, &op).await.unwrap();
        admin.drain();
        member.drain();

        session.request_save(&member.id, "a.txt").await.unwrap();
        assert_eq!(
            session.docs().workspace().read("a.txt").await.unwrap(),
            "hello",
            "member save must not flush before approval"
        );
        let approval_id = match admin.drain().as_slice() {
            [ServerMessage::SaveRequested(r)] => r.approval_id.clone(),
            other => panic!("unexpected messages: {:?}", other),
        };
        assert!(matches!(
            member.drain().as_slice(),
            [ServerMessage::SavePending(_)]
        ));

        session
            .resolve_save(&admin.id, &approval_id, true)
            .await
            .unwrap();
        assert_eq!(
            session.docs().workspace().read("a.txt").await.unwrap(),
            "hello world"
        );
        assert!(member
            .drain()
            .iter()
            .any(|m| matches!(m, ServerMessage::FileSaved(_))));
    }

    #[tokio::test]
    async fn rejected_saves_notify_only_the_requester() {
        let (_dir, session) = session_with(5, ApprovalPolicy::Open);
        let mut admin = join(&session, "admin").await;
        let mut member = join(&session, "u1").await;
        session
            .docs()
            .workspace()
            .write("a.txt", "hello")
            .await
            .unwrap();
        session.open_file(&member.id, "a.txt").await.unwrap();
        session.request_save(&member.id, "a.txt").await.unwrap();
        let approval_id = match admin
            .drain()
            .iter()
            .find_map(|m| match m {
                ServerMessage::SaveRequested(r) => Some(r.approval_id.clone()),
                _ => None,
            }) {
            Some(id) => id,
            None => panic!("missing save request"),
        };
        member.drain();

        session
            .resolve_save(&admin.id, &approval_id, false)
            .await
            .unwrap();
        assert!(matches!(
            member.drain().as_slice(),
            [ServerMessage::SaveRejected(_)]
        ));
        assert!(admin.drain().is_empty());
    }

    #[tokio::test]
    async fn admin_saves_flush_immediately() {
        let (_dir, session) = session_with(5, ApprovalPolicy::Open);
        let admin = join(&session, "admin").await;
        session
            .docs()
            .workspace()
            .write("a.txt", "hello")
            .await
            .unwrap();
        session.open_file(&admin.id, "a.txt").await.unwrap();
        let op = OpMessage {
            path: "a.txt".to_string(),
            base_revision: 0,
            spans: vec![EditSpan::insert(0, ">")],
            client_seq: 1,
        };
        session.apply_op(&admin.id, &op).await.unwrap();

        session.request_save(&admin.id, "a.txt").await.unwrap();
        assert_eq!(
            session.docs().workspace().read("a.txt").await.unwrap(),
            ">hello"
        );
    }

    #[tokio::test]
    async fn closing_broadcasts_and_blocks_new_joins() {
        let (_dir, session) = session_with(5, ApprovalPolicy::Open);
        let mut admin = join(&session, "admin").await;
        let mut member = join(&session, "u1").await;
        admin.drain();
        member.drain();

        session.close(&admin.id).await.unwrap();

        assert!(member
            .drain()
            .iter()
            .any(|m| matches!(m, ServerMessage::SessionClosed)));
        assert!(session.is_closed().await);

        let (tx, _rx) = unbounded_channel();
        let err = session.join(identity("u2"), tx).await.unwrap_err();
        assert!(matches!(err, SessionError::SessionClosed));
    }
}
