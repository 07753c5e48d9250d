use serde::{Deserialize, Serialize};

// -- Conversations --

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Direct => "direct",
            Self::Group => "group",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "direct" => Some(Self::Direct),
            "group" => Some(Self::Group),
            _ => None,
        }
    }
}

/// One entry in a user's conversation list. `unread_count` is always
/// computed fresh against the store, never cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ConversationKind,
    pub unread_count: u64,
    pub member_count: u64,
}

// -- Messages --

/// A message as rendered for one viewer. The same shape is used for
/// `GetMessages` items and for `new_message` gateway pushes (where
/// `is_read` is false — a fresh message starts unread for every recipient).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageItem {
    pub id: i64,
    pub conversation_id: String,
    pub sender_id: i64,
    pub sender_name: String,
    pub content: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub is_read: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub conversation_id: String,
    pub sender_id: i64,
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub id: i64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

// -- Read receipts --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkReadRequest {
    pub user_id: i64,
}

#[derive(Debug, Serialize)]
pub struct MarkReadResponse {
    pub marked_count: u64,
}

// -- Users & members --

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: i64,
    pub name: String,
    pub avatar: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MemberResponse {
    pub user_id: i64,
    pub name: String,
    pub avatar: Option<String>,
}
