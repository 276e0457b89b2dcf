use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use crate::colab::Session;
use crate::models::messages::{OpMessage, ServerMessage};
use crate::ws::report_error;

/// Handle an edit operation: serialize, rebase, apply, fan out.
///
/// A `StaleBase` rejection goes only to the originator, who must recompute
/// against current content; the operation is never partially applied.
pub async fn handle_op_message(
    session: &Session,
    participant_id: &str,
    msg: &OpMessage,
    tx: &UnboundedSender<ServerMessage>,
) {
    debug!(
        "Op from {} on '{}' (base {}, seq {})",
        participant_id, msg.path, msg.base_revision, msg.client_seq
    );
    if let Err(e) = session.apply_op(participant_id, msg).await {
        debug!("Op from {} rejected: {}", participant_id, e);
        report_error(tx, &e);
    }
}
