use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::task::spawn_blocking;
use tracing::{info, warn};
use uuid::Uuid;

use parley_db::Database;
use parley_types::error::ChatError;
use parley_types::events::{GatewayCommand, GatewayEvent};

use crate::dispatcher::Dispatcher;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a single WebSocket connection. The client declares its identity
/// once via the Identify command; the session is then joined to the rooms
/// of every conversation the user is a member of.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, db: Arc<Database>) {
    let (mut sender, mut receiver) = socket.split();

    // Step 1: Wait for Identify with a known user id
    let Some((user_id, name, conversation_ids)) = wait_for_identify(&mut receiver, &db).await
    else {
        warn!("WebSocket client failed to identify, closing");
        let event = GatewayEvent::Error {
            message: "identify failed".into(),
        };
        let _ = sender
            .send(Message::Text(serde_json::to_string(&event).unwrap().into()))
            .await;
        return;
    };

    info!("{} ({}) connected to gateway", name, user_id);

    let (session_id, mut session_rx) = dispatcher
        .connect(user_id, conversation_ids.clone())
        .await;

    // Step 2: Send Ready with the rooms this session was joined to
    let ready = GatewayEvent::Ready {
        user_id,
        conversation_ids,
    };
    if sender
        .send(Message::Text(serde_json::to_string(&ready).unwrap().into()))
        .await
        .is_err()
    {
        dispatcher.disconnect(session_id).await;
        return;
    }

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward room events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = session_rx.recv() => {
                    let event = match result {
                        Some(event) => event,
                        None => break,
                    };
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

    // Read commands from client
    let dispatcher_recv = dispatcher.clone();
    let db_recv = db.clone();
    let name_recv = name.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        handle_command(&dispatcher_recv, &db_recv, session_id, user_id, &name_recv, cmd)
                            .await;
                    }
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            name_recv,
                            user_id,
                            e,
                            log_preview(&text)
                        );
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

    dispatcher.disconnect(session_id).await;
    info!("{} ({}) disconnected from gateway", name, user_id);
}

/// Waits up to 10 seconds for an Identify command, then resolves the user
/// and their conversation memberships against the store.
async fn wait_for_identify(
    receiver: &mut futures_util::stream::SplitStream<WebSocket>,
    db: &Arc<Database>,
) -> Option<(i64, String, Vec<String>)> {
    let timeout = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { user_id }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    let db = db.clone();
                    let resolved = spawn_blocking(move || {
                        let Some(user) = db.get_user(user_id)? else {
                            return Ok(None);
                        };
                        let conversations = db.member_conversations(user_id)?;
                        Ok::<_, ChatError>(Some((user.id, user.name, conversations)))
                    })
                    .await;

                    return match resolved {
                        Ok(Ok(found)) => found,
                        Ok(Err(e)) => {
                            warn!("identify lookup for user {} failed: {}", user_id, e);
                            None
                        }
                        Err(e) => {
                            warn!("spawn_blocking join error: {}", e);
                            None
                        }
                    };
                }
            }
        }
        None
    });

    timeout.await.ok().flatten()
}

/// Clamp raw client input for logging. Truncates on character
/// boundaries, so multibyte text never panics the slice.
fn log_preview(text: &str) -> &str {
    match text.char_indices().nth(200) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

async fn handle_command(
    dispatcher: &Dispatcher,
    db: &Arc<Database>,
    session_id: Uuid,
    user_id: i64,
    name: &str,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {} // Already handled

        GatewayCommand::JoinConversation { conversation_id } => {
            let db = db.clone();
            let conv = conversation_id.clone();
            let member = spawn_blocking(move || db.is_member(&conv, user_id)).await;

            match member {
                Ok(Ok(true)) => {
                    info!("{} ({}) joined room {}", name, user_id, conversation_id);
                    dispatcher.join(session_id, &conversation_id).await;
                    dispatcher
                        .send_to_session(session_id, GatewayEvent::Joined { conversation_id })
                        .await;
                }
                Ok(Ok(false)) => {
                    dispatcher
                        .send_to_session(
                            session_id,
                            GatewayEvent::Error {
                                message: "not a member of this conversation".into(),
                            },
                        )
                        .await;
                }
                Ok(Err(e)) => {
                    warn!("membership check failed for {}: {}", conversation_id, e);
                    dispatcher
                        .send_to_session(
                            session_id,
                            GatewayEvent::Error {
                                message: "failed to join conversation".into(),
                            },
                        )
                        .await;
                }
                Err(e) => {
                    warn!("spawn_blocking join error: {}", e);
                }
            }
        }

        GatewayCommand::LeaveConversation { conversation_id } => {
            dispatcher.leave(session_id, &conversation_id).await;
        }
    }
}
