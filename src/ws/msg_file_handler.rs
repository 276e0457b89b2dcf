use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use crate::colab::Session;
use crate::models::messages::{SaveDecisionMessage, ServerMessage};
use crate::ws::report_error;

/// Open a file: the participant receives its current content, revision and
/// the cursors already placed in it.
pub async fn handle_open_file(
    session: &Session,
    participant_id: &str,
    path: &str,
    tx: &UnboundedSender<ServerMessage>,
) {
    debug!("Participant {} opening '{}'", participant_id, path);
    if let Err(e) = session.open_file(participant_id, path).await {
        report_error(tx, &e);
    }
}

pub async fn handle_close_file(
    session: &Session,
    participant_id: &str,
    path: &str,
    tx: &UnboundedSender<ServerMessage>,
) {
    if let Err(e) = session.close_file(participant_id, path).await {
        // A failed persist keeps the document resident; live editing is
        // not disrupted.
        warn!("Close of '{}' by {} failed: {}", path, participant_id, e);
        report_error(tx, &e);
    }
}

/// A save request: admins flush directly, members queue for approval.
pub async fn handle_save(
    session: &Session,
    participant_id: &str,
    path: &str,
    tx: &UnboundedSender<ServerMessage>,
) {
    if let Err(e) = session.request_save(participant_id, path).await {
        report_error(tx, &e);
    }
}

/// An admin's verdict on a queued save request.
pub async fn handle_save_decision(
    session: &Session,
    participant_id: &str,
    msg: &SaveDecisionMessage,
    tx: &UnboundedSender<ServerMessage>,
) {
    if let Err(e) = session
        .resolve_save(participant_id, &msg.approval_id, msg.approved)
        .await
    {
        report_error(tx, &e);
    }
}
