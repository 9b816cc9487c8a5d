use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use tidepool_shared::error::ChatError;
use tidepool_shared::events::Event;
use tidepool_shared::ids::UserId;
use tidepool_shared::models::Status;

use crate::error::{db_err, ServerError};
use crate::extractors::auth::AuthUser;
use crate::state::AppState;
use crate::store::users::{self, UserRow};
use crate::validation::{
    decode_image_data_url, validate_bio, validate_color, validate_email, validate_name,
    validate_status,
};

fn resolve_self<'a>(user_id: &str, me: &'a UserRow) -> Option<&'a UserRow> {
    (user_id == "@me" || user_id == me.id.as_str()).then_some(me)
}

/// GET /v1/users/{id|@me} — full projection for self, author projection for
/// everyone else.
pub async fn get_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    if let Some(me) = resolve_self(&user_id, &auth.user) {
        let status = state.presence.status_or_offline(me).await;
        return Ok(Json(
            serde_json::to_value(me.to_user(status, true))
                .map_err(|e| ChatError::internal(e.to_string()))?,
        ));
    }

    let user = users::find_by_id(&state.db, &UserId::from(user_id))
        .await
        .map_err(db_err)?
        .ok_or(ServerError(ChatError::NotFound))?;
    let status = state.presence.status_or_offline(&user).await;
    Ok(Json(
        serde_json::to_value(user.to_author(status))
            .map_err(|e| ChatError::internal(e.to_string()))?,
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub username: Option<String>,
    pub default_status: Option<Status>,
    pub bio: Option<String>,
    pub email: Option<String>,
    pub color: Option<String>,
    pub background_color: Option<String>,
}

/// PATCH /v1/users/@me — profile edits, restricted to the editable fields.
pub async fn update_user(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<String>,
    Json(body): Json<UpdateUserRequest>,
) -> Result<Json<tidepool_shared::models::User>, ServerError> {
    if resolve_self(&user_id, &auth.user).is_none() {
        return Err(ChatError::forbidden("You can only edit your own profile").into());
    }
    let mut user = auth.user;
    let before_bytes = user.self_bytes();

    if let Some(username) = body.username {
        let username = username.to_lowercase();
        validate_name(&username, "Username")?;
        if username != user.username
            && users::username_taken(&state.db, &username)
                .await
                .map_err(db_err)?
        {
            return Err(ChatError::Conflict("Username must be unique".into()).into());
        }
        user.username = username;
    }
    if let Some(email) = body.email {
        let email = email.to_lowercase();
        validate_email(&email)?;
        if email != user.email && users::email_taken(&state.db, &email).await.map_err(db_err)? {
            return Err(ChatError::Conflict("Email must be unique".into()).into());
        }
        user.email = email;
    }
    if let Some(default_status) = body.default_status {
        validate_status(default_status)?;
        user.default_status = default_status;
    }
    if let Some(bio) = body.bio {
        validate_bio(&bio)?;
        user.bio = Some(bio);
    }
    if let Some(color) = body.color {
        validate_color(&color, "color")?;
        user.color = Some(color);
    }
    if let Some(background_color) = body.background_color {
        validate_color(&background_color, "background color")?;
        user.background_color = Some(background_color);
    }

    users::save_profile(&state.db, &user).await.map_err(db_err)?;

    let after_bytes = user.self_bytes();
    users::spawn_inc_bytes(state.db.clone(), user.id.clone(), after_bytes - before_bytes);

    let status = state.presence.status_or_offline(&user).await;
    state.bus.publish_event(Event::AuthorUpdated {
        author: user.to_author(status),
    });

    Ok(Json(user.to_user(status, false)))
}

#[derive(Debug, Deserialize)]
pub struct AvatarRequest {
    pub image: String,
}

/// POST /v1/users/@me/avatar — data-URL upload, stored at `avatars/{id}`.
pub async fn upload_avatar(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<String>,
    Json(body): Json<AvatarRequest>,
) -> Result<Json<tidepool_shared::models::User>, ServerError> {
    if resolve_self(&user_id, &auth.user).is_none() {
        return Err(ChatError::forbidden("You can only edit your own profile").into());
    }
    let mut user = auth.user;

    let (_mime, bytes) = decode_image_data_url(&body.image)?;
    let key = format!("avatars/{}", user.id);
    state.storage.put(&key, bytes).await?;

    let avatar_url = state.storage.public_url(&key);
    users::set_avatar_url(&state.db, &user.id, Some(&avatar_url))
        .await
        .map_err(db_err)?;
    user.avatar_url = Some(avatar_url);

    let status = state.presence.status_or_offline(&user).await;
    state.bus.publish_event(Event::AuthorUpdated {
        author: user.to_author(status),
    });
    Ok(Json(user.to_user(status, false)))
}

/// DELETE /v1/users/@me/avatar — the store row is wiped first so clients
/// update even when the object delete fails; that failure is swallowed.
pub async fn delete_avatar(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<tidepool_shared::models::User>, ServerError> {
    if resolve_self(&user_id, &auth.user).is_none() {
        return Err(ChatError::forbidden("You can only edit your own profile").into());
    }
    let mut user = auth.user;

    users::set_avatar_url(&state.db, &user.id, None)
        .await
        .map_err(db_err)?;
    user.avatar_url = None;

    if let Err(e) = state.storage.delete(&format!("avatars/{}", user.id)).await {
        tracing::warn!(user_id = %user.id, error = %e, "avatar object delete failed");
    }

    let status = state.presence.status_or_offline(&user).await;
    state.bus.publish_event(Event::AuthorUpdated {
        author: user.to_author(status),
    });
    Ok(Json(user.to_user(status, false)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn me() -> UserRow {
        UserRow {
            id: UserId::from("u123456789"),
            username: "alice".into(),
            password: String::new(),
            token: String::new(),
            email: "a@x.io".into(),
            default_status: Status::Online,
            color: None,
            background_color: None,
            avatar_url: None,
            bio: None,
            flags: 0,
            verified: true,
            verification_code: None,
            bytes: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn self_resolution_accepts_at_me_and_own_id() {
        let user = me();
        assert!(resolve_self("@me", &user).is_some());
        assert!(resolve_self("u123456789", &user).is_some());
        assert!(resolve_self("u0000other", &user).is_none());
    }

    #[test]
    fn update_request_tolerates_partial_bodies() {
        let req: UpdateUserRequest = serde_json::from_str("{\"bio\":\"hi\"}").unwrap();
        assert_eq!(req.bio.as_deref(), Some("hi"));
        assert!(req.username.is_none());

        let req: UpdateUserRequest =
            serde_json::from_str("{\"default_status\":\"away\"}").unwrap();
        assert_eq!(req.default_status, Some(Status::Away));
    }
}
