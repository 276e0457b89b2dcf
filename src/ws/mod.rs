pub mod handler;
pub mod msg_admin_handler;
pub mod msg_chat_handler;
pub mod msg_cursor_handler;
pub mod msg_file_handler;
pub mod msg_op_handler;
pub mod msg_ping_handler;

use tokio::sync::mpsc::UnboundedSender;

use crate::colab::SessionError;
use crate::models::messages::ServerMessage;

/// Return an engine error to the participant that caused it. Membership and
/// authorization failures never go anywhere else.
pub(crate) fn report_error(tx: &UnboundedSender<ServerMessage>, err: &SessionError) {
    let _ = tx.send(ServerMessage::error(err.code(), err.to_string()));
}
