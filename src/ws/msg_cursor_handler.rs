use tokio::sync::mpsc::UnboundedSender;

use crate::colab::Session;
use crate::models::messages::{CursorMessage, ServerMessage};
use crate::ws::report_error;

/// Handle a cursor move: last write wins, broadcast immediately to keep
/// latency low. Cursor traffic never touches the document intake queue.
pub async fn handle_cursor_message(
    session: &Session,
    participant_id: &str,
    msg: &CursorMessage,
    tx: &UnboundedSender<ServerMessage>,
) {
    if let Err(e) = session
        .update_cursor(participant_id, &msg.path, msg.anchor, msg.head)
        .await
    {
        report_error(tx, &e);
    }
}
