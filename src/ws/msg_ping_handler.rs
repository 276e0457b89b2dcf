use tokio::sync::mpsc::UnboundedSender;

use crate::models::messages::{PongMessage, ServerMessage};

/// Handle PingMessage
pub fn handle_ping_message(tx: &UnboundedSender<ServerMessage>) {
    let _ = tx.send(ServerMessage::Pong(PongMessage {
        date: chrono::Utc::now().to_rfc3339(),
    }));
}
