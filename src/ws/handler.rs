use std::ops::ControlFlow;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, State,
    },
    response::Response,
};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info};

use crate::colab::{Session, SessionError, SessionRegistry};
use crate::models::messages::{ClientMessage, JoinRejectedMessage, ServerMessage};
use crate::ws::{
    msg_admin_handler, msg_chat_handler, msg_cursor_handler, msg_file_handler, msg_op_handler,
    msg_ping_handler, report_error,
};

/// WebSocket handler
pub async fn websocket_handler(
    Path(session_id): Path<String>,
    ws: WebSocketUpgrade,
    State(registry): State<Arc<SessionRegistry>>,
) -> Response {
    info!("New WebSocket connection attempt for session {}", session_id);
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, registry))
}

/// Handle one participant's connection for its whole lifetime.
async fn handle_socket(socket: WebSocket, session_id: String, registry: Arc<SessionRegistry>) {
    let (mut sender, mut receiver) = socket.split();

    // The first protocol message must be a join carrying the resolved
    // identity; nothing else is accepted on an unjoined socket.
    let Some(identity) = await_join(&mut receiver, &mut sender).await else {
        return;
    };

    let Some(session) = registry.get(&session_id).await else {
        let err = SessionError::UnknownSession(session_id.clone());
        send_direct(
            &mut sender,
            &ServerMessage::JoinRejected(JoinRejectedMessage {
                code: err.code().to_string(),
                reason: err.to_string(),
            }),
        )
        .await;
        return;
    };

    let (tx, rx) = unbounded_channel::<ServerMessage>();
    let join = match session.join(identity, tx.clone()).await {
        Ok(join) => join,
        Err(e) => {
            // SessionFull / SessionClosed: terminal for this request, the
            // participant was never registered.
            send_direct(
                &mut sender,
                &ServerMessage::JoinRejected(JoinRejectedMessage {
                    code: e.code().to_string(),
                    reason: e.to_string(),
                }),
            )
            .await;
            return;
        }
    };
    let participant_id = join.participant_id.clone();
    info!(
        "WebSocket established for participant {} in session {}",
        participant_id, session_id
    );

    // Outbound pump: forward everything the session pushes for this
    // participant, closing the socket after a terminal message.
    let mut send_task = tokio::spawn(async move {
        let mut rx: UnboundedReceiver<ServerMessage> = rx;
        while let Some(msg) = rx.recv().await {
            let terminal = msg.is_terminal();
            if !send_direct(&mut sender, &msg).await || terminal {
                break;
            }
        }
    });

    // Inbound pump: parse and dispatch protocol messages.
    let recv_session = session.clone();
    let recv_registry = registry.clone();
    let recv_pid = participant_id.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(Message::Text(raw))) = receiver.next().await {
            let msg: ClientMessage = match serde_json::from_str(&raw) {
                Ok(msg) => msg,
                Err(e) => {
                    error!("Failed to parse client message: {}", e);
                    let _ = tx.send(ServerMessage::error("protocol", "Malformed message"));
                    continue;
                }
            };
            let flow = dispatch(msg, &recv_session, &recv_registry, &recv_pid, &tx).await;
            if flow.is_break() {
                break;
            }
        }
    });

    // Wait for either task to finish (and finish the other)
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };

    // Transport gone. An approved participant keeps their slot for the
    // grace period; a pending join is simply cancelled. A stale epoch means
    // this socket was already superseded by a reconnection.
    if let Some(epoch) = session.disconnect(&participant_id, join.epoch).await {
        registry.schedule_reap(session_id.clone(), participant_id.clone(), epoch);
    }
    info!(
        "WebSocket terminated for participant {} in session {}",
        participant_id, session_id
    );
}

/// Read frames until the join message arrives. Anything else on an unjoined
/// socket is a protocol error that ends the connection.
async fn await_join(
    receiver: &mut SplitStream<WebSocket>,
    sender: &mut SplitSink<WebSocket, Message>,
) -> Option<crate::colab::participant::Identity> {
    loop {
        match receiver.next().await? {
            Ok(Message::Text(raw)) => match serde_json::from_str::<ClientMessage>(&raw) {
                Ok(ClientMessage::Join(join)) => return Some(join.identity),
                Ok(_) => {
                    send_direct(
                        sender,
                        &ServerMessage::error("protocol", "A join message must come first"),
                    )
                    .await;
                    return None;
                }
                Err(e) => {
                    error!("Failed to parse join message: {}", e);
                    send_direct(sender, &ServerMessage::error("protocol", "Malformed join"))
                        .await;
                    return None;
                }
            },
            Ok(Message::Close(_)) => return None,
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
}

async fn send_direct(sender: &mut SplitSink<WebSocket, Message>, msg: &ServerMessage) -> bool {
    let payload = match serde_json::to_string(msg) {
        Ok(payload) => payload,
        Err(e) => {
            error!("Failed to serialize server message: {}", e);
            return true;
        }
    };
    sender.send(Message::Text(payload)).await.is_ok()
}

/// Route one inbound message. `Break` ends the receive loop and tears the
/// connection down.
async fn dispatch(
    msg: ClientMessage,
    session: &Arc<Session>,
    registry: &Arc<SessionRegistry>,
    participant_id: &str,
    tx: &UnboundedSender<ServerMessage>,
) -> ControlFlow<()> {
    match msg {
        ClientMessage::Join(_) => {
            let _ = tx.send(ServerMessage::error("protocol", "Already joined"));
        }
        ClientMessage::Op(op) => {
            msg_op_handler::handle_op_message(session, participant_id, &op, tx).await;
        }
        ClientMessage::Cursor(cursor) => {
            msg_cursor_handler::handle_cursor_message(session, participant_id, &cursor, tx).await;
        }
        ClientMessage::Chat(chat) => {
            msg_chat_handler::handle_chat_message(session, participant_id, &chat, tx).await;
        }
        ClientMessage::OpenFile(file) => {
            msg_file_handler::handle_open_file(session, participant_id, &file.path, tx).await;
        }
        ClientMessage::CloseFile(file) => {
            msg_file_handler::handle_close_file(session, participant_id, &file.path, tx).await;
        }
        ClientMessage::Save(file) => {
            msg_file_handler::handle_save(session, participant_id, &file.path, tx).await;
        }
        ClientMessage::SaveDecision(decision) => {
            msg_file_handler::handle_save_decision(session, participant_id, &decision, tx).await;
        }
        ClientMessage::Approve(target) => {
            msg_admin_handler::handle_approve(session, participant_id, &target.participant_id, tx)
                .await;
        }
        ClientMessage::Reject(target) => {
            msg_admin_handler::handle_reject(session, participant_id, &target.participant_id, tx)
                .await;
        }
        ClientMessage::Kick(target) => {
            msg_admin_handler::handle_kick(session, participant_id, &target.participant_id, tx)
                .await;
        }
        ClientMessage::CloseSession => {
            if msg_admin_handler::handle_close_session(session, registry, participant_id, tx).await
            {
                return ControlFlow::Break(());
            }
        }
        ClientMessage::Leave => {
            debug!("Participant {} leaving session {}", participant_id, session.id);
            if let Err(e) = session.leave(participant_id).await {
                report_error(tx, &e);
            }
            registry.close_if_abandoned(&session.id).await;
            return ControlFlow::Break(());
        }
        ClientMessage::Ping => {
            msg_ping_handler::handle_ping_message(tx);
        }
    }
    ControlFlow::Continue(())
}
