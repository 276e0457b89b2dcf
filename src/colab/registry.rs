use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::colab::participant::Identity;
use crate::colab::session::{ApprovalPolicy, Session};
use crate::config::Config;
use crate::storage::Workspace;

use super::error::SessionError;

/// Process-wide owner of every active session (and, through the sessions,
/// every open document). Sessions are inserted on create and removed on
/// close, so teardown is deterministic.
pub struct SessionRegistry {
    workspace_base: PathBuf,
    default_max_participants: usize,
    default_approval_policy: ApprovalPolicy,
    grace_period: Duration,
    rebase_window: usize,
    sessions: RwLock<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new(config: &Config) -> Self {
        Self {
            workspace_base: PathBuf::from(&config.workspace_base),
            default_max_participants: config.max_participants,
            default_approval_policy: config.approval_policy,
            grace_period: Duration::from_secs(config.disconnect_grace_secs),
            rebase_window: config.rebase_window,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Create a session for a project and its resolved admin identity. The
    /// session id doubles as the workspace directory name.
    pub async fn create_session(
        &self,
        project_name: &str,
        admin: &Identity,
        max_participants: Option<usize>,
        approval_policy: Option<ApprovalPolicy>,
    ) -> Result<Arc<Session>, SessionError> {
        let session_id = Uuid::new_v4().simple().to_string();
        let workspace = Workspace::new(self.workspace_base.join(&session_id));
        workspace.ensure_root().await?;

        let session = Arc::new(Session::new(
            session_id.clone(),
            project_name,
            admin.user_id.clone(),
            max_participants.unwrap_or(self.default_max_participants),
            approval_policy.unwrap_or(self.default_approval_policy),
            workspace,
            self.rebase_window,
        ));
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), session.clone());
        info!(
            "Created session {} for project '{}' (admin '{}')",
            session_id, project_name, admin.display_name
        );
        Ok(session)
    }

    pub async fn get(&self, session_id: &str) -> Option<Arc<Session>> {
        self.sessions.read().await.get(session_id).cloned()
    }

    /// Close a session and drop it from the registry.
    pub async fn close_session(&self, session_id: &str) {
        let session = self.sessions.write().await.remove(session_id);
        if let Some(session) = session {
            session.shutdown().await;
        }
    }

    /// Arm the grace timer for a disconnected participant. If the epoch is
    /// still current when the timer fires the slot is freed, and a session
    /// left with no participants is closed.
    pub fn schedule_reap(
        self: &Arc<Self>,
        session_id: String,
        participant_id: String,
        epoch: u64,
    ) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(registry.grace_period).await;
            let Some(session) = registry.get(&session_id).await else {
                return;
            };
            if session.reap_disconnected(&participant_id, epoch).await {
                registry.close_if_abandoned(&session_id).await;
            }
        });
    }

    /// Close a session whose last participant is gone.
    pub async fn close_if_abandoned(&self, session_id: &str) {
        let Some(session) = self.get(session_id).await else {
            return;
        };
        if session.is_empty().await {
            debug!("Session {} has no participants left, closing", session_id);
            self.close_session(session_id).await;
        }
    }

    /// Flush dirty documents across all sessions. Failures are logged and
    /// retried on the next pass; in-memory state stays authoritative.
    pub async fn flush_dirty(&self) -> usize {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        let mut flushed = 0;
        for session in sessions {
            flushed += session.docs().flush_all().await;
        }
        flushed
    }

    /// Periodic flush loop, the registry-level counterpart of an editor's
    /// autosave.
    pub fn spawn_flush_task(self: &Arc<Self>, interval: Duration) {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let flushed = registry.flush_dirty().await;
                if flushed > 0 {
                    debug!("Periodic flush persisted {} documents", flushed);
                }
            }
        });
    }

    /// Aggregate counters for the diagnostics endpoint.
    pub async fn stats(&self) -> RegistryStats {
        let sessions: Vec<Arc<Session>> = self.sessions.read().await.values().cloned().collect();
        let mut stats = RegistryStats {
            n_sessions: sessions.len() as u32,
            ..Default::default()
        };
        for session in sessions {
            let (participants, pending) = session.participant_counts().await;
            stats.n_participants += participants as u32;
            stats.n_pending += pending as u32;
            let (docs, dirty) = session.docs().counts().await;
            stats.n_docs += docs as u32;
            stats.n_dirty_docs += dirty as u32;
        }
        stats
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RegistryStats {
    pub n_sessions: u32,
    pub n_participants: u32,
    pub n_pending: u32,
    pub n_docs: u32,
    pub n_dirty_docs: u32,
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        if let Ok(sessions) = self.sessions.try_read() {
            if !sessions.is_empty() {
                warn!("Registry dropped with {} live sessions", sessions.len());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::messages::ServerMessage;
    use tokio::sync::mpsc::unbounded_channel;

    fn test_config(base: &std::path::Path) -> Config {
        Config {
            workspace_base: base.display().to_string(),
            disconnect_grace_secs: 30,
            ..Config::default()
        }
    }

    fn identity(user: &str) -> Identity {
        Identity {
            user_id: user.to_string(),
            display_name: user.to_string(),
        }
    }

    #[tokio::test]
    async fn sessions_are_discoverable_until_closed() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::new(&test_config(dir.path()));
        let session = registry
            .create_session("demo", &identity("admin"), None, None)
            .await
            .unwrap();

        assert!(registry.get(&session.id).await.is_some());
        registry.close_session(&session.id).await;
        assert!(registry.get(&session.id).await.is_none());
        assert!(session.is_closed().await);
    }

    #[tokio::test]
    async fn create_session_prepares_the_workspace_directory() {
        let dir = tempfile::tempdir().unwrap();
        let registry = SessionRegistry::new(&test_config(dir.path()));
        let session = registry
            .create_session("demo", &identity("admin"), Some(3), None)
            .await
            .unwrap();
        assert!(dir.path().join(&session.id).is_dir());
        assert_eq!(session.info().await.max_participants, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn grace_timer_frees_the_slot_and_closes_empty_sessions() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(SessionRegistry::new(&test_config(dir.path())));
        let session = registry
            .create_session("demo", &identity("admin"), None, None)
            .await
            .unwrap();

        let (tx, _rx) = unbounded_channel::<ServerMessage>();
        let joined = session.join(identity("admin"), tx).await.unwrap();
        let epoch = session
            .disconnect(&joined.participant_id, joined.epoch)
            .await
            .unwrap();
        registry.schedule_reap(session.id.clone(), joined.participant_id.clone(), epoch);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(registry.get(&session.id).await.is_none());
        assert!(session.is_closed().await);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnection_cancels_the_grace_timer() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(SessionRegistry::new(&test_config(dir.path())));
        let session = registry
            .create_session("demo", &identity("admin"), None, None)
            .await
            .unwrap();

        let (tx, _rx) = unbounded_channel::<ServerMessage>();
        let joined = session.join(identity("admin"), tx).await.unwrap();
        let epoch = session
            .disconnect(&joined.participant_id, joined.epoch)
            .await
            .unwrap();
        registry.schedule_reap(session.id.clone(), joined.participant_id.clone(), epoch);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let (tx2, _rx2) = unbounded_channel::<ServerMessage>();
        let rejoined = session.join(identity("admin"), tx2).await.unwrap();
        assert!(rejoined.reconnected);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(registry.get(&session.id).await.is_some());
        assert_eq!(session.participant_counts().await.0, 1);
    }
}
