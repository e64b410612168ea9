use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};
use uuid::Uuid;

use parley_core::ChatService;
use parley_types::events::{ClientCommand, ServerEvent};

use crate::registry::ConnectionRegistry;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped —
/// a silently-dead socket thus produces a disconnect and its presence entry
/// is reclaimed instead of lingering forever.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive one WebSocket for its whole life: allocate a connection id, pump
/// events out and commands in, and run presence/focus cleanup when the
/// socket closes.
pub async fn handle_socket(socket: WebSocket, registry: ConnectionRegistry, service: ChatService) {
    let (mut sender, mut receiver) = socket.split();

    let (connection_id, mut events_rx) = registry.add().await;
    debug!(%connection_id, "gateway connection opened");

    // Shared flag for heartbeat bookkeeping between the two tasks
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward pushed events -> socket, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events_rx.recv() => {
                    let Some(event) = event else { break };
                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from the client
    let service_recv = service.clone();
    let registry_recv = registry.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(command) => {
                        handle_command(&service_recv, &registry_recv, connection_id, command).await;
                    }
                    Err(e) => {
                        warn!(
                            %connection_id,
                            "bad command: {} -- raw: {}",
                            e,
                            &text[..text.len().min(200)]
                        );
                        registry_recv
                            .send(
                                connection_id,
                                ServerEvent::Error {
                                    message: "malformed command".into(),
                                },
                            )
                            .await;
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    registry.remove(connection_id).await;
    service.disconnect(connection_id).await;
    debug!(%connection_id, "gateway connection closed");
}

async fn handle_command(
    service: &ChatService,
    registry: &ConnectionRegistry,
    connection_id: Uuid,
    command: ClientCommand,
) {
    match command {
        ClientCommand::Register { user_id } => {
            if let Err(e) = service.register(&user_id, connection_id).await {
                warn!(%connection_id, %user_id, error = %e, "registration failed");
                send_error(registry, connection_id, &e).await;
            }
        }

        ClientCommand::SendMessage {
            sender,
            receiver,
            text,
        } => match service.send_message(&sender, &receiver, &text).await {
            Ok(message) => {
                // Acknowledgment goes to the sender's own connection, last
                // in the pipeline's ordering
                registry
                    .send(connection_id, ServerEvent::SendSuccessfully(message))
                    .await;
            }
            Err(e) => {
                warn!(%connection_id, %sender, %receiver, error = %e, "send rejected");
                send_error(registry, connection_id, &e).await;
            }
        },

        ClientCommand::LoadMessages { user_id1, user_id2 } => {
            match service.load_and_mark_read(&user_id1, &user_id2).await {
                Ok(loaded) => {
                    let conversation_id = loaded.conversation_id;
                    registry
                        .send(connection_id, ServerEvent::MessagesLoaded(loaded.messages))
                        .await;

                    // Clear the viewer's badge even if they missed every
                    // prior increment
                    if let Some(conversation_id) = conversation_id {
                        registry
                            .send(
                                connection_id,
                                ServerEvent::UnreadCountUpdate {
                                    conversation_id,
                                    count: 0,
                                    from: user_id2,
                                },
                            )
                            .await;
                    }
                }
                Err(e) => {
                    warn!(%connection_id, %user_id1, %user_id2, error = %e, "history load failed");
                    send_error(registry, connection_id, &e).await;
                }
            }
        }

        ClientCommand::GetConversations { user_id } => {
            match service.list_conversations(&user_id).await {
                Ok(entries) => {
                    registry
                        .send(connection_id, ServerEvent::ConversationsLoaded(entries))
                        .await;
                }
                Err(e) => {
                    warn!(%connection_id, %user_id, error = %e, "conversation listing failed");
                    send_error(registry, connection_id, &e).await;
                }
            }
        }
    }
}

async fn send_error(
    registry: &ConnectionRegistry,
    connection_id: Uuid,
    error: &parley_core::ChatError,
) {
    registry
        .send(
            connection_id,
            ServerEvent::Error {
                message: error.to_string(),
            },
        )
        .await;
}
