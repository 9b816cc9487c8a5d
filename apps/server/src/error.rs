use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tidepool_shared::error::ChatError;

/// Newtype wrapper for `ChatError` that implements `IntoResponse`.
///
/// Needed because of the orphan rule — neither the trait (`IntoResponse`)
/// nor the type (`ChatError`) is defined in this crate.
#[derive(Debug)]
pub struct ServerError(pub ChatError);

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ChatError::NotFound => StatusCode::NOT_FOUND,
            ChatError::Unauthorized => StatusCode::UNAUTHORIZED,
            ChatError::Forbidden(_) => StatusCode::FORBIDDEN,
            ChatError::Validation(_) | ChatError::Conflict(_) => StatusCode::BAD_REQUEST,
            ChatError::Gone(_) => StatusCode::GONE,
            ChatError::Upstream(_) | ChatError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = self.0.to_string();
        (status, Json(serde_json::json!({ "message": message }))).into_response()
    }
}

impl From<ChatError> for ServerError {
    fn from(e: ChatError) -> Self {
        ServerError(e)
    }
}

/// Map a database error into an opaque 500, logging the cause.
pub fn db_err(e: sqlx::Error) -> ServerError {
    tracing::error!(error = %e, "database error");
    ServerError(ChatError::internal("database error"))
}

/// Map a Redis error into an opaque 500, logging the cause.
pub fn redis_err(e: fred::error::Error) -> ServerError {
    tracing::error!(error = %e, "redis error");
    ServerError(ChatError::internal("redis error"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_maps_to_404() {
        let response = ServerError(ChatError::NotFound).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn unauthorized_maps_to_401() {
        let response = ServerError(ChatError::Unauthorized).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn forbidden_maps_to_403() {
        let response =
            ServerError(ChatError::forbidden("You are not the author of this channel"))
                .into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn validation_and_conflict_map_to_400() {
        let response = ServerError(ChatError::validation("bad input")).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let response =
            ServerError(ChatError::Conflict("Username must be unique".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn gone_maps_to_410() {
        let response = ServerError(ChatError::Gone("Invite has expired".into())).into_response();
        assert_eq!(response.status(), StatusCode::GONE);
    }

    #[test]
    fn internal_and_upstream_map_to_500() {
        let response = ServerError(ChatError::internal("boom")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let response = ServerError(ChatError::Upstream("head failed".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn error_responses_are_json_with_message_field() {
        let response = ServerError(ChatError::validation("Content must be at least 1 character"))
            .into_response();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], "Content must be at least 1 character");
    }
}
