use axum::{
    Json,
    extract::{Path, Query, State},
    response::IntoResponse,
};
use tracing::warn;

use parley_types::api::{
    ConversationKind, ConversationSummary, MarkReadRequest, MarkReadResponse, MemberResponse,
};
use parley_types::error::ChatError;
use parley_types::events::GatewayEvent;

use crate::AppState;
use crate::error::{ApiError, run_blocking};
use crate::messages::UserQuery;

/// GET /conversations?user_id=N
pub async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<UserQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let user_id = query.user_id;
    let rows = run_blocking(move || db.list_conversations(user_id)).await?;

    let conversations: Vec<ConversationSummary> = rows
        .into_iter()
        .map(|row| {
            let kind = ConversationKind::parse(&row.kind).unwrap_or_else(|| {
                warn!("Unknown conversation kind '{}' on {}", row.kind, row.id);
                ConversationKind::Group
            });
            ConversationSummary {
                id: row.id,
                name: row.name,
                kind,
                unread_count: row.unread_count.max(0) as u64,
                member_count: row.member_count.max(0) as u64,
            }
        })
        .collect();

    Ok(Json(conversations))
}

/// POST /conversations/{conversation_id}/read
///
/// Explicit acknowledgement without a fresh fetch — thin wrapper over the
/// engine's mark_all_read.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Json(req): Json<MarkReadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let conv = conversation_id.clone();
    let user_id = req.user_id;
    let marked = run_blocking(move || mark_conversation_read(&db, &conv, user_id)).await?;

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

    Ok(Json(MarkReadResponse {
        marked_count: marked,
    }))
}

/// Membership-checked wrapper over the engine's mark_all_read.
pub(crate) fn mark_conversation_read(
    db: &parley_db::Database,
    conversation_id: &str,
    user_id: i64,
) -> Result<u64, ChatError> {
    if !db.conversation_exists(conversation_id)? {
        return Err(ChatError::NotFound("conversation"));
    }
    if !db.is_member(conversation_id, user_id)? {
        return Err(ChatError::Unauthorized);
    }
    db.mark_all_read(conversation_id, user_id)
}

/// GET /conversations/{conversation_id}/members
pub async fn get_members(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let rows = run_blocking(move || db.get_members(&conversation_id)).await?;

    let members: Vec<MemberResponse> = rows
        .into_iter()
        .map(|row| MemberResponse {
            user_id: row.user_id,
            name: row.name,
            avatar: row.avatar,
        })
        .collect();

    Ok(Json(members))
}
