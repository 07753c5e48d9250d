use serde::{Deserialize, Serialize};

use crate::api::MessageItem;

/// Events pushed over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// Server accepted the Identify command and joined the session to the
    /// rooms of every conversation the user is a member of.
    Ready {
        user_id: i64,
        conversation_ids: Vec<String>,
    },

    /// Confirmation of an explicit room join.
    Joined { conversation_id: String },

    /// A new message was posted to a conversation this session has joined.
    NewMessage(MessageItem),

    /// A member marked their unread messages in a conversation as read.
    MessagesRead {
        conversation_id: String,
        user_id: i64,
        marked_count: u64,
    },

    /// The server rejected a command (bad identity, not a member, ...).
    Error { message: String },
}

/// Commands sent FROM client TO server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum GatewayCommand {
    /// Declare the caller's identity. Sent once, first, per connection.
    Identify { user_id: i64 },

    /// Join the room of one additional conversation. Idempotent; rejected
    /// when the user is not a member.
    JoinConversation { conversation_id: String },

    /// Leave a conversation's room.
    LeaveConversation { conversation_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_use_snake_case_tags() {
        let event = GatewayEvent::MessagesRead {
            conversation_id: "conv1".into(),
            user_id: 2,
            marked_count: 3,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "messages_read");
        assert_eq!(json["data"]["marked_count"], 3);
    }

    #[test]
    fn identify_round_trips() {
        let raw = r#"{"type":"identify","data":{"user_id":7}}"#;
        let cmd: GatewayCommand = serde_json::from_str(raw).unwrap();
        assert!(matches!(cmd, GatewayCommand::Identify { user_id: 7 }));
    }
}
