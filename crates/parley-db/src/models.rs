/// Database row types — these map directly to SQLite rows.
/// Distinct from the parley-types API models to keep the DB layer
/// independent; timestamps stay as SQLite text here and are parsed at
/// the API boundary.

pub struct UserRow {
    pub id: i64,
    pub name: String,
    pub avatar: Option<String>,
    pub created_at: String,
}

pub struct ConversationSummaryRow {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub unread_count: i64,
    pub member_count: i64,
}

#[derive(Debug)]
pub struct MessageRow {
    pub id: i64,
    pub conversation_id: String,
    pub sender_id: i64,
    pub sender_name: String,
    pub content: String,
    pub created_at: String,
    pub is_read: bool,
}

#[derive(Debug)]
pub struct MemberRow {
    pub user_id: i64,
    pub name: String,
    pub avatar: Option<String>,
}

/// Result of a message insert: the store-assigned id and timestamp.
#[derive(Debug)]
pub struct InsertedMessage {
    pub id: i64,
    pub created_at: String,
}
