use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use parley_types::events::GatewayEvent;

/// One connected client session.
struct Session {
    user_id: i64,
    tx: mpsc::UnboundedSender<GatewayEvent>,
    rooms: HashSet<String>,
}

/// Session and room state, mutated only behind the dispatcher's lock.
/// Entries are created on identify, updated on join/leave, removed on
/// disconnect.
#[derive(Default)]
struct Registry {
    sessions: HashMap<Uuid, Session>,
    /// conversation_id -> sessions currently joined to its room
    rooms: HashMap<String, HashSet<Uuid>>,
}

impl Registry {
    fn join(&mut self, session_id: Uuid, conversation_id: &str) {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.rooms.insert(conversation_id.to_string());
            self.rooms
                .entry(conversation_id.to_string())
                .or_default()
                .insert(session_id);
        }
    }
}

/// Manages connected sessions and per-conversation rooms, and fans events
/// out to every session joined to a room. Delivery is best-effort,
/// at-most-once per connected session; nothing is queued for offline
/// sessions — they catch up through a messages fetch.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<RwLock<Registry>>,
    echo_to_sender: bool,
}

impl Dispatcher {
    pub fn new(echo_to_sender: bool) -> Self {
        Self {
            registry: Arc::new(RwLock::new(Registry::default())),
            echo_to_sender,
        }
    }

    /// Register a new session for `user_id` and join it to the rooms of
    /// every conversation it is a member of. Returns the session id and
    /// the event receiver to drain into the transport.
    pub async fn connect(
        &self,
        user_id: i64,
        conversation_ids: Vec<String>,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let session_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        let mut registry = self.registry.write().await;
        registry.sessions.insert(
            session_id,
            Session {
                user_id,
                tx,
                rooms: HashSet::new(),
            },
        );
        for conversation_id in &conversation_ids {
            registry.join(session_id, conversation_id);
        }

        (session_id, rx)
    }

    /// Join one additional room. Idempotent.
    pub async fn join(&self, session_id: Uuid, conversation_id: &str) {
        self.registry.write().await.join(session_id, conversation_id);
    }

    pub async fn leave(&self, session_id: Uuid, conversation_id: &str) {
        let mut registry = self.registry.write().await;
        if let Some(session) = registry.sessions.get_mut(&session_id) {
            session.rooms.remove(conversation_id);
        }
        if let Some(members) = registry.rooms.get_mut(conversation_id) {
            members.remove(&session_id);
            if members.is_empty() {
                registry.rooms.remove(conversation_id);
            }
        }
    }

    /// Remove the session from every room it was part of.
    pub async fn disconnect(&self, session_id: Uuid) {
        let mut registry = self.registry.write().await;
        let Some(session) = registry.sessions.remove(&session_id) else {
            return;
        };
        for conversation_id in session.rooms {
            if let Some(members) = registry.rooms.get_mut(&conversation_id) {
                members.remove(&session_id);
                if members.is_empty() {
                    registry.rooms.remove(&conversation_id);
                }
            }
        }
    }

    /// Send an event to a single session.
    pub async fn send_to_session(&self, session_id: Uuid, event: GatewayEvent) {
        let registry = self.registry.read().await;
        if let Some(session) = registry.sessions.get(&session_id) {
            let _ = session.tx.send(event);
        }
    }

    /// Push an event to every session joined to the conversation's room.
    /// Returns the number of sessions delivered to.
    pub async fn broadcast(&self, conversation_id: &str, event: GatewayEvent) -> usize {
        self.fan_out(conversation_id, event, None).await
    }

    /// Like `broadcast`, but honors the echo policy: when echo-to-sender
    /// is off, the sending user's own sessions are skipped.
    pub async fn broadcast_from(
        &self,
        conversation_id: &str,
        sender_id: i64,
        event: GatewayEvent,
    ) -> usize {
        let exclude = if self.echo_to_sender {
            None
        } else {
            Some(sender_id)
        };
        self.fan_out(conversation_id, event, exclude).await
    }

    async fn fan_out(
        &self,
        conversation_id: &str,
        event: GatewayEvent,
        exclude_user: Option<i64>,
    ) -> usize {
        let registry = self.registry.read().await;
        let Some(members) = registry.rooms.get(conversation_id) else {
            return 0;
        };

        let mut delivered = 0;
        for session_id in members {
            let Some(session) = registry.sessions.get(session_id) else {
                continue;
            };
            if exclude_user == Some(session.user_id) {
                continue;
            }
            if session.tx.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}
