use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tracing::error;

use parley_types::error::ChatError;

/// Wraps the core taxonomy for the HTTP boundary. Every core error maps
/// onto exactly one status code with a JSON error body.
#[derive(Debug)]
pub struct ApiError(pub ChatError);

impl From<ChatError> for ApiError {
    fn from(e: ChatError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            ChatError::NotFound(_) => StatusCode::NOT_FOUND,
            ChatError::Unauthorized => StatusCode::FORBIDDEN,
            ChatError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            ChatError::Conflict(_) => StatusCode::CONFLICT,
            ChatError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

/// Run blocking store work off the async runtime, folding a task join
/// failure into the Unavailable bucket.
pub async fn run_blocking<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ChatError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError(ChatError::Unavailable("background task failed".into()))
        })?
        .map_err(ApiError)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        let cases = [
            (ChatError::NotFound("user"), StatusCode::NOT_FOUND),
            (ChatError::Unauthorized, StatusCode::FORBIDDEN),
            (ChatError::InvalidArgument("empty"), StatusCode::BAD_REQUEST),
            (ChatError::Conflict("dup"), StatusCode::CONFLICT),
            (
                ChatError::Unavailable("down".into()),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}
