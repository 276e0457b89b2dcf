use tokio::sync::mpsc::UnboundedSender;

use crate::colab::Session;
use crate::models::messages::{ChatSendMessage, ServerMessage};
use crate::ws::report_error;

/// Handle a chat message: stamp it with the session sequence number and
/// broadcast to everyone, the sender included.
pub async fn handle_chat_message(
    session: &Session,
    participant_id: &str,
    msg: &ChatSendMessage,
    tx: &UnboundedSender<ServerMessage>,
) {
    if let Err(e) = session.chat(participant_id, &msg.text).await {
        report_error(tx, &e);
    }
}
