use std::sync::LazyLock;

use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use tidepool_shared::error::ChatError;
use tidepool_shared::events::Event;
use tidepool_shared::ids::{generate_id, UserId};
use tidepool_shared::models::{MessageType, User};

use crate::error::{db_err, ServerError};
use crate::state::AppState;
use crate::store::messages::NewMessage;
use crate::store::{channels, messages, users};
use crate::token::generate_token;
use crate::validation::{validate_email, validate_name};

// Hashed once so the login handler can burn a comparison when the user does
// not exist, keeping both branches on the same timing profile.
static DUMMY_HASH: LazyLock<String> =
    LazyLock::new(|| bcrypt::hash("password", bcrypt::DEFAULT_COST).expect("static bcrypt hash"));

#[derive(Debug, Deserialize)]
pub struct SignupRequest {
    pub username: String,
    pub password: String,
    pub email: String,
}

/// POST /v1/signup
pub async fn signup(
    State(state): State<AppState>,
    Json(body): Json<SignupRequest>,
) -> Result<Json<User>, ServerError> {
    let username = body.username.to_lowercase();
    let email = body.email.to_lowercase();

    validate_name(&username, "Username")?;
    validate_email(&email)?;
    if body.password.is_empty() {
        return Err(ChatError::validation("Password is required").into());
    }

    if users::username_taken(&state.db, &username)
        .await
        .map_err(db_err)?
    {
        return Err(ChatError::Conflict("Username must be unique".into()).into());
    }
    if users::email_taken(&state.db, &email).await.map_err(db_err)? {
        return Err(ChatError::Conflict("Email must be unique".into()).into());
    }

    let password = body.password;
    let hashed = tokio::task::spawn_blocking(move || bcrypt::hash(password, bcrypt::DEFAULT_COST))
        .await
        .map_err(|e| ChatError::internal(format!("hash task failed: {e}")))?
        .map_err(|e| ChatError::internal(format!("hash failed: {e}")))?;

    let user_id = UserId::new();
    let verification_code = generate_id();
    let mut new_user = users::NewUser {
        id: user_id.clone(),
        username,
        password: hashed,
        token: generate_token(&user_id),
        email,
        verification_code: verification_code.clone(),
        bytes: 0,
    };
    // seed the quota with the record's own size
    new_user.bytes = (new_user.username.len() + new_user.id.as_str().len()) as i64;

    let user = users::create(&state.db, &new_user).await.map_err(db_err)?;

    // verification mail and public-channel auto-join both run off the
    // request path; failures are logged and the signup still succeeds
    let email_service = state.email.clone();
    let to = user.email.clone();
    tokio::spawn(async move {
        if let Err(e) = email_service
            .send_verification_email(&to, &verification_code)
            .await
        {
            tracing::error!(error = %e, "verification email failed");
        }
    });
    spawn_join_public_channels(state.clone(), user.clone());

    let status = state.presence.status_or_offline(&user).await;
    Ok(Json(user.to_user(status, true)))
}

/// Every existing public channel gets a `join` system message for the new
/// user. O(channels); ordering across channels is not significant.
fn spawn_join_public_channels(state: AppState, user: users::UserRow) {
    tokio::spawn(async move {
        let channels = match channels::list_public(&state.db).await {
            Ok(channels) => channels,
            Err(e) => {
                tracing::error!(error = %e, "public channel auto-join query failed");
                return;
            }
        };
        let status = state.presence.status_or_offline(&user).await;
        let author = user.to_author(status);
        for channel in channels {
            let join = NewMessage::system(MessageType::Join, channel.id.clone(), user.id.clone());
            match messages::create(&state.db, join).await {
                Ok(row) => {
                    let message = crate::projection::project_message(&row, &Default::default());
                    state.bus.publish_event(Event::MessageCreated {
                        message,
                        author: Some(author.clone()),
                        channel: Some(channel.to_api()),
                    });
                }
                Err(e) => {
                    tracing::error!(channel_id = %channel.id, error = %e, "auto-join failed");
                }
            }
        }
    });
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// POST /v1/login — accepts username or email. A bcrypt comparison runs
/// whether or not the user exists.
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<User>, ServerError> {
    let login = body.username.to_lowercase();
    let user = users::find_by_login(&state.db, &login)
        .await
        .map_err(db_err)?;

    let Some(user) = user else {
        let password = body.password;
        let _ = tokio::task::spawn_blocking(move || bcrypt::verify(password, &DUMMY_HASH)).await;
        return Err(ChatError::Unauthorized.into());
    };

    let password = body.password;
    let hash = user.password.clone();
    let matches = tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
        .await
        .map_err(|e| ChatError::internal(format!("verify task failed: {e}")))?
        .unwrap_or(false);
    if !matches {
        return Err(ChatError::Unauthorized.into());
    }

    let status = state.presence.status_or_offline(&user).await;
    Ok(Json(user.to_user(status, true)))
}

#[derive(Debug, Deserialize)]
pub struct VerifyRequest {
    pub code: String,
}

/// POST /v1/verify — e-mail verification callback.
pub async fn verify(
    State(state): State<AppState>,
    Json(body): Json<VerifyRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    if body.code.is_empty() {
        return Err(ChatError::validation("Code is required").into());
    }
    let verified = users::verify_with_code(&state.db, &body.code)
        .await
        .map_err(db_err)?;
    if !verified {
        return Err(ChatError::NotFound.into());
    }
    Ok(Json(serde_json::json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dummy_hash_is_a_valid_bcrypt_hash() {
        assert!(DUMMY_HASH.starts_with("$2"));
        assert!(bcrypt::verify("password", &DUMMY_HASH).unwrap());
        assert!(!bcrypt::verify("other", &DUMMY_HASH).unwrap());
    }

    #[test]
    fn signup_request_deserializes() {
        let req: SignupRequest = serde_json::from_str(
            "{\"username\":\"Alice\",\"password\":\"p\",\"email\":\"A@X.io\"}",
        )
        .unwrap();
        assert_eq!(req.username, "Alice");
    }

    #[test]
    fn missing_fields_fail_deserialization() {
        assert!(serde_json::from_str::<SignupRequest>("{\"username\":\"a\"}").is_err());
        assert!(serde_json::from_str::<LoginRequest>("{}").is_err());
    }
}
