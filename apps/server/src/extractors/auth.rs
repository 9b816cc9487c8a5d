use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::state::AppState;
use crate::store::users::{self, UserRow};

/// Authenticated user extracted from a bearer token.
///
/// The token is opaque and matched against the store by equality; there is
/// no expiry on the token itself (rotation is by replacement). Use this as a
/// handler parameter to require authentication:
/// ```ignore
/// async fn my_handler(auth: AuthUser) -> impl IntoResponse { ... }
/// ```
pub struct AuthUser {
    pub user: UserRow,
}

#[derive(Debug)]
pub struct AuthRejection;

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "message": "Unauthorized" })),
        )
            .into_response()
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                tracing::debug!("auth: missing or non-ASCII Authorization header");
                AuthRejection
            })?;

        let token = header.strip_prefix("Bearer ").unwrap_or(header);
        if token.is_empty() {
            return Err(AuthRejection);
        }

        let user = users::find_by_token(&state.db, token)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "auth: token lookup failed");
                AuthRejection
            })?
            .ok_or_else(|| {
                tracing::debug!("auth: unknown token");
                AuthRejection
            })?;

        Ok(AuthUser { user })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_is_401_with_message_body() {
        let response = AuthRejection.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
