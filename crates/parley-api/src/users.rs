use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};

use parley_types::api::UserResponse;
use parley_types::error::ChatError;

use crate::AppState;
use crate::error::{ApiError, run_blocking};

/// GET /users/{user_id}
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let user = run_blocking(move || {
        db.get_user(user_id)?.ok_or(ChatError::NotFound("user"))
    })
    .await?;

    Ok(Json(UserResponse {
        id: user.id,
        name: user.name,
        avatar: user.avatar,
    }))
}
