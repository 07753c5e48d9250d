use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::warn;

use parley_db::Database;
use parley_db::models::{InsertedMessage, MessageRow};
use parley_types::api::{MessageItem, SendMessageRequest, SendMessageResponse};
use parley_types::error::ChatError;
use parley_types::events::GatewayEvent;

use crate::AppState;
use crate::error::{ApiError, run_blocking};

/// Fixed recent-message window.
const MESSAGE_WINDOW: u32 = 50;

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user_id: i64,
}

/// GET /conversations/{conversation_id}/messages?user_id=N
///
/// Opening a conversation is how messages become read: the unread
/// messages are marked first, then the window is fetched, both under one
/// store guard.
pub async fn get_messages(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<UserQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = query.user_id;

    let db = state.db.clone();
    let conv = conversation_id.clone();
    let (marked, rows) = run_blocking(move || open_for_member(&db, &conv, user_id)).await?;

    if marked > 0 {
        state
            .dispatcher
            .broadcast(
                &conversation_id,
                GatewayEvent::MessagesRead {
                    conversation_id: conversation_id.clone(),
                    user_id,
                    marked_count: marked,
                },
            )
            .await;
    }

    let messages: Vec<MessageItem> = rows.into_iter().map(to_message_item).collect();
    Ok(Json(messages))
}

/// POST /messages
pub async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let conv = req.conversation_id.clone();
    let sender_id = req.sender_id;
    let content = req.content.clone();
    let (inserted, sender_name) =
        run_blocking(move || send_to_conversation(&db, &conv, sender_id, &content)).await?;

    let created_at = parse_created_at(&inserted.created_at, inserted.id);

    // A fresh message has zero receipts: it starts unread for every
    // recipient, and the fan-out payload says so.
    state
        .dispatcher
        .broadcast_from(
            &req.conversation_id,
            sender_id,
            GatewayEvent::NewMessage(MessageItem {
                id: inserted.id,
                conversation_id: req.conversation_id.clone(),
                sender_id,
                sender_name,
                content: req.content,
                created_at,
                is_read: false,
            }),
        )
        .await;

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            id: inserted.id,
            created_at,
        }),
    ))
}

/// Membership-checked open: marks everything unread for the viewer, then
/// fetches the recent window.
pub(crate) fn open_for_member(
    db: &Database,
    conversation_id: &str,
    user_id: i64,
) -> Result<(u64, Vec<MessageRow>), ChatError> {
    if !db.conversation_exists(conversation_id)? {
        return Err(ChatError::NotFound("conversation"));
    }
    if !db.is_member(conversation_id, user_id)? {
        return Err(ChatError::Unauthorized);
    }
    db.open_conversation(conversation_id, user_id, MESSAGE_WINDOW)
}

/// Validated send: content must not trim to empty and the sender must be
/// a member of an existing conversation. Returns the inserted message and
/// the sender's display name for the fan-out payload.
pub(crate) fn send_to_conversation(
    db: &Database,
    conversation_id: &str,
    sender_id: i64,
    content: &str,
) -> Result<(InsertedMessage, String), ChatError> {
    if content.trim().is_empty() {
        return Err(ChatError::InvalidArgument(
            "message content must not be empty",
        ));
    }
    if !db.conversation_exists(conversation_id)? {
        return Err(ChatError::NotFound("conversation"));
    }
    if !db.is_member(conversation_id, sender_id)? {
        return Err(ChatError::Unauthorized);
    }
    let inserted = db.insert_message(conversation_id, sender_id, content)?;
    let sender = db.get_user(sender_id)?.ok_or(ChatError::NotFound("user"))?;
    Ok((inserted, sender.name))
}

pub(crate) fn to_message_item(row: MessageRow) -> MessageItem {
    let created_at = parse_created_at(&row.created_at, row.id);
    MessageItem {
        id: row.id,
        conversation_id: row.conversation_id,
        sender_id: row.sender_id,
        sender_name: row.sender_name,
        content: row.content,
        created_at,
        is_read: row.is_read,
    }
}

fn parse_created_at(raw: &str, message_id: i64) -> chrono::DateTime<chrono::Utc> {
    raw.parse::<chrono::DateTime<chrono::Utc>>()
        .or_else(|_| {
            // SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without
            // timezone. Parse as naive UTC and convert.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on message {}: {}", raw, message_id, e);
            chrono::DateTime::default()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::api::ConversationKind;

    fn db_with_outsider() -> (Database, i64, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user("alice", None).unwrap();
        let bob = db.create_user("bob", None).unwrap();
        let mallory = db.create_user("mallory", None).unwrap();
        db.create_conversation("conv1", "Alice & Bob", ConversationKind::Direct, &[alice, bob])
            .unwrap();
        (db, alice, bob, mallory)
    }

    fn message_count(db: &Database) -> i64 {
        db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))
                .map_err(|e| ChatError::Unavailable(e.to_string()))
        })
        .unwrap()
    }

    #[test]
    fn whitespace_only_content_is_rejected_without_a_row() {
        let (db, alice, _bob, _mallory) = db_with_outsider();

        for content in ["", "   ", "\n\t  "] {
            let err = send_to_conversation(&db, "conv1", alice, content).unwrap_err();
            assert!(matches!(err, ChatError::InvalidArgument(_)));
        }
        assert_eq!(message_count(&db), 0);
    }

    #[test]
    fn non_member_send_is_unauthorized_and_writes_nothing() {
        let (db, alice, bob, mallory) = db_with_outsider();
        send_to_conversation(&db, "conv1", alice, "Hello!").unwrap();

        let err = send_to_conversation(&db, "conv1", mallory, "let me in").unwrap_err();
        assert_eq!(err, ChatError::Unauthorized);

        assert_eq!(message_count(&db), 1);
        assert_eq!(db.unread_count("conv1", bob).unwrap(), 1);
    }

    #[test]
    fn send_to_missing_conversation_is_not_found() {
        let (db, alice, _bob, _mallory) = db_with_outsider();
        let err = send_to_conversation(&db, "nope", alice, "hi").unwrap_err();
        assert!(matches!(err, ChatError::NotFound(_)));
        assert_eq!(message_count(&db), 0);
    }

    #[test]
    fn non_member_open_is_unauthorized_and_marks_nothing() {
        let (db, alice, bob, mallory) = db_with_outsider();
        send_to_conversation(&db, "conv1", alice, "Hello!").unwrap();

        let err = open_for_member(&db, "conv1", mallory).unwrap_err();
        assert_eq!(err, ChatError::Unauthorized);

        // No receipt was created for anyone; Bob's unread state is intact.
        assert_eq!(db.unread_count("conv1", bob).unwrap(), 1);
        let receipts: i64 = db
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM message_reads", [], |row| row.get(0))
                    .map_err(|e| ChatError::Unavailable(e.to_string()))
            })
            .unwrap();
        assert_eq!(receipts, 0);
    }

    #[test]
    fn member_open_marks_and_returns_the_window() {
        let (db, alice, bob, _mallory) = db_with_outsider();
        send_to_conversation(&db, "conv1", alice, "Hello!").unwrap();

        let (marked, rows) = open_for_member(&db, "conv1", bob).unwrap();
        assert_eq!(marked, 1);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_read);
    }

    #[test]
    fn sqlite_timestamps_parse_as_utc() {
        let ts = parse_created_at("2026-08-29 12:30:00", 1);
        assert_eq!(ts.to_rfc3339(), "2026-08-29T12:30:00+00:00");
    }
}
