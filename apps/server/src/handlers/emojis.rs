use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use tidepool_shared::error::ChatError;
use tidepool_shared::ids::{EmojiId, UserId};
use tidepool_shared::models::Emoji;

use crate::error::{db_err, ServerError};
use crate::extractors::auth::AuthUser;
use crate::state::AppState;
use crate::store::emojis::{self, EmojiRow};
use crate::store::users;
use crate::validation::{decode_image_data_url, validate_name};

const MIME_TO_EXT: &[(&str, &str)] = &[
    ("image/png", "png"),
    ("image/gif", "gif"),
    ("image/jpeg", "jpg"),
    ("image/jpg", "jpg"),
    ("image/webp", "webp"),
    ("image/avif", "avif"),
    ("image/bmp", "bmp"),
];

fn mime_to_ext(mime_type: &str) -> Result<String, ServerError> {
    if let Some((_, ext)) = MIME_TO_EXT.iter().find(|(mime, _)| *mime == mime_type) {
        return Ok((*ext).to_string());
    }
    // fallback: take whatever comes after image/ if it looks sane
    if let Some(guess) = mime_type.strip_prefix("image/") {
        if !guess.is_empty()
            && guess
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        {
            return Ok(guess.to_string());
        }
    }
    Err(ChatError::validation("Invalid image mime type").into())
}

/// Write the image under both keys: `emojis/{id}` for id-only url
/// construction and `emojis/{id}.{ext}` for backwards compat. Cleans up the
/// old ext key when it changed.
async fn put_emoji_image(
    state: &AppState,
    emoji: &mut EmojiRow,
    data_url: &str,
) -> Result<(), ServerError> {
    let (mime_type, bytes) = decode_image_data_url(data_url)?;
    let next_ext = mime_to_ext(&mime_type)?;
    let prev_ext = emoji.ext.clone();

    emoji.mime_type = mime_type.clone();
    emoji.animated = mime_type == "image/gif";
    emoji.ext = next_ext.clone();

    let key_no_ext = format!("emojis/{}", emoji.id);
    let key_with_ext = format!("emojis/{}.{next_ext}", emoji.id);
    state.storage.put(&key_no_ext, bytes.clone()).await?;
    state.storage.put(&key_with_ext, bytes).await?;

    if !prev_ext.is_empty() && prev_ext != next_ext {
        if let Err(e) = state
            .storage
            .delete(&format!("emojis/{}.{prev_ext}", emoji.id))
            .await
        {
            tracing::warn!(emoji_id = %emoji.id, error = %e, "stale emoji key delete failed");
        }
    }
    Ok(())
}

fn emoji_api(state: &AppState, row: &EmojiRow) -> Emoji {
    row.to_api(
        state
            .storage
            .public_url(&format!("emojis/{}.{}", row.id, row.ext)),
    )
}

/// GET /v1/users/{id|@me}/emojis
pub async fn list_emojis(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Emoji>>, ServerError> {
    let owner_id = if user_id == "@me" {
        auth.user.id.clone()
    } else {
        let owner = users::find_by_id(&state.db, &UserId::from(user_id))
            .await
            .map_err(db_err)?
            .ok_or(ServerError(ChatError::NotFound))?;
        owner.id
    };
    let rows = emojis::list_for_owner(&state.db, &owner_id)
        .await
        .map_err(db_err)?;
    Ok(Json(rows.iter().map(|row| emoji_api(&state, row)).collect()))
}

#[derive(Debug, Deserialize)]
pub struct CreateEmojiRequest {
    pub name: String,
    pub image: String,
}

fn require_self(user_id: &str, me: &UserId) -> Result<(), ServerError> {
    if user_id == "@me" || user_id == me.as_str() {
        Ok(())
    } else {
        Err(ChatError::forbidden("You can only manage your own emojis").into())
    }
}

/// POST /v1/users/{id|@me}/emojis — names are unique per owner.
pub async fn create_emoji(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<String>,
    Json(body): Json<CreateEmojiRequest>,
) -> Result<Json<Emoji>, ServerError> {
    require_self(&user_id, &auth.user.id)?;

    let name = body.name.to_lowercase();
    validate_name(&name, "Name")?;
    if emojis::name_taken(&state.db, &auth.user.id, &name, None)
        .await
        .map_err(db_err)?
    {
        return Err(ChatError::Conflict("Emoji name must be unique".into()).into());
    }

    let mut emoji = EmojiRow {
        id: EmojiId::new(),
        owner_id: auth.user.id.clone(),
        name,
        animated: false,
        mime_type: String::new(),
        ext: String::new(),
        created_at: chrono::Utc::now(),
        updated_at: None,
    };
    put_emoji_image(&state, &mut emoji, &body.image).await?;
    emojis::create(&state.db, &emoji).await.map_err(db_err)?;

    Ok(Json(emoji_api(&state, &emoji)))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateEmojiRequest {
    pub name: Option<String>,
    pub image: Option<String>,
}

/// PATCH /v1/users/{id|@me}/emojis/{emoji_id}
pub async fn update_emoji(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((user_id, emoji_id)): Path<(String, EmojiId)>,
    Json(body): Json<UpdateEmojiRequest>,
) -> Result<Json<Emoji>, ServerError> {
    require_self(&user_id, &auth.user.id)?;

    let mut emoji = emojis::find_owned(&state.db, &emoji_id, &auth.user.id)
        .await
        .map_err(db_err)?
        .ok_or(ServerError(ChatError::NotFound))?;

    if let Some(name) = body.name {
        let name = name.to_lowercase();
        validate_name(&name, "Name")?;
        if name != emoji.name
            && emojis::name_taken(&state.db, &auth.user.id, &name, Some(&emoji.id))
                .await
                .map_err(db_err)?
        {
            return Err(ChatError::Conflict("Emoji name must be unique".into()).into());
        }
        emoji.name = name;
    }

    if let Some(image) = body.image {
        put_emoji_image(&state, &mut emoji, &image).await?;
    }

    emojis::save(&state.db, &emoji).await.map_err(db_err)?;
    Ok(Json(emoji_api(&state, &emoji)))
}

/// DELETE /v1/users/{id|@me}/emojis/{emoji_id} — removes both object keys so
/// id-only urls don't dangle.
pub async fn delete_emoji(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((user_id, emoji_id)): Path<(String, EmojiId)>,
) -> Result<Json<serde_json::Value>, ServerError> {
    require_self(&user_id, &auth.user.id)?;

    let emoji = emojis::find_owned(&state.db, &emoji_id, &auth.user.id)
        .await
        .map_err(db_err)?
        .ok_or(ServerError(ChatError::NotFound))?;

    emojis::delete(&state.db, &emoji.id).await.map_err(db_err)?;

    for key in [
        format!("emojis/{}", emoji.id),
        format!("emojis/{}.{}", emoji.id, emoji.ext),
    ] {
        if let Err(e) = state.storage.delete(&key).await {
            tracing::warn!(emoji_id = %emoji.id, key, error = %e, "emoji object delete failed");
        }
    }

    Ok(Json(serde_json::json!({ "message": "Emoji deleted" })))
}
