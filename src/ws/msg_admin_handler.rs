use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;
use tracing::info;

use crate::colab::{Session, SessionRegistry};
use crate::models::messages::ServerMessage;
use crate::ws::report_error;

/// Admit a requesting participant. The capability check happens inside the
/// session under its membership lock.
pub async fn handle_approve(
    session: &Session,
    actor_id: &str,
    target_id: &str,
    tx: &UnboundedSender<ServerMessage>,
) {
    if let Err(e) = session.approve(actor_id, target_id).await {
        report_error(tx, &e);
    }
}

pub async fn handle_reject(
    session: &Session,
    actor_id: &str,
    target_id: &str,
    tx: &UnboundedSender<ServerMessage>,
) {
    if let Err(e) = session.reject(actor_id, target_id).await {
        report_error(tx, &e);
    }
}

pub async fn handle_kick(
    session: &Session,
    actor_id: &str,
    target_id: &str,
    tx: &UnboundedSender<ServerMessage>,
) {
    if let Err(e) = session.kick(actor_id, target_id).await {
        report_error(tx, &e);
    }
}

/// Close the whole session: every participant is removed and all open
/// documents are flushed. Returns true when the session was closed and the
/// caller's connection should wind down.
pub async fn handle_close_session(
    session: &Session,
    registry: &Arc<SessionRegistry>,
    actor_id: &str,
    tx: &UnboundedSender<ServerMessage>,
) -> bool {
    match session.close(actor_id).await {
        Ok(()) => {
            info!("Session {} closed by participant {}", session.id, actor_id);
            registry.close_session(&session.id).await;
            true
        }
        Err(e) => {
            report_error(tx, &e);
            false
        }
    }
}
