use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use sqlx::types::Json as SqlJson;
use tidepool_shared::constants::MAX_NONCE_LENGTH;
use tidepool_shared::error::ChatError;
use tidepool_shared::events::Event;
use tidepool_shared::ids::{ChannelId, MessageId};
use tidepool_shared::models::{Embed, Message, MessageType, UserFlags};

use crate::error::{db_err, ServerError};
use crate::extractors::auth::AuthUser;
use crate::mentions;
use crate::projection;
use crate::state::AppState;
use crate::store::messages::{self, HistoryFilter, NewMessage};
use crate::store::{channels, files, users};
use crate::unfurl;
use crate::validation::{validate_content, validate_embeds};

fn parse_iso(value: Option<String>) -> Result<Option<DateTime<Utc>>, ServerError> {
    match value {
        None => Ok(None),
        Some(raw) => DateTime::parse_from_rfc3339(&raw)
            .map(|dt| Some(dt.with_timezone(&Utc)))
            .map_err(|_| ServerError(ChatError::validation("Value is not a valid ISO date"))),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    pub after: Option<String>,
    pub before: Option<String>,
    pub limit: Option<i64>,
    pub author_id: Option<String>,
    pub contains: Option<String>,
}

/// GET /v1/channels/{id}/messages — time-based paging with optional author
/// and substring filters.
pub async fn get_messages(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(channel_id): Path<ChannelId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let channel = super::load_channel(&state.db, &channel_id).await?;
    super::require_observer(&state.db, &channel, &auth.user).await?;

    let filter = HistoryFilter {
        after: parse_iso(query.after)?,
        before: parse_iso(query.before)?,
        limit: query.limit.unwrap_or(50).clamp(1, 100),
        author_id: query.author_id,
        contains: query.contains,
    };

    let rows = messages::history(&state.db, &channel_id, &filter)
        .await
        .map_err(db_err)?;
    let out = projection::messages_to_api(&state.db, &rows)
        .await
        .map_err(db_err)?;
    Ok(Json(out))
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateMessageRequest {
    pub content: Option<String>,
    pub file_ids: Option<Vec<String>>,
    pub nonce: Option<String>,
    pub embeds: Option<Vec<Embed>>,
}

/// POST /v1/channels/{id}/messages — the main ingestion path: authorize,
/// validate, resolve mentions, bind files, persist, account, emit.
pub async fn create_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(channel_id): Path<ChannelId>,
    Json(body): Json<CreateMessageRequest>,
) -> Result<Json<Message>, ServerError> {
    let channel = super::load_channel(&state.db, &channel_id).await?;
    super::require_observer(&state.db, &channel, &auth.user).await?;

    let content = body.content.as_deref().map(validate_content).transpose()?;
    let file_ids = body.file_ids.unwrap_or_default();
    if file_ids.len() > state.config.limits.max_files_per_message {
        return Err(ChatError::validation(format!(
            "You can only attach up to {} files at a time",
            state.config.limits.max_files_per_message
        ))
        .into());
    }
    if body.nonce.as_deref().map_or(0, str::len) > MAX_NONCE_LENGTH {
        return Err(ChatError::validation(format!(
            "Nonce must be less than {MAX_NONCE_LENGTH} characters"
        ))
        .into());
    }
    let user_embeds = body.embeds.unwrap_or_default();
    validate_embeds(&user_embeds)?;

    if content.is_none() && file_ids.is_empty() && user_embeds.is_empty() {
        return Err(ChatError::validation("content, file_ids, or embeds is required").into());
    }

    let mentions = match &content {
        Some(content) => {
            let usernames = mentions::extract_mention_usernames(content);
            mentions::resolve_for_channel(&state.db, &channel, &usernames)
                .await
                .map_err(db_err)?
        }
        None => vec![],
    };

    let bound_files = if file_ids.is_empty() {
        vec![]
    } else {
        let bound = files::find_owned_uploaded(&state.db, &file_ids, &auth.user.id)
            .await
            .map_err(db_err)?;
        if bound.len() != file_ids.len() {
            return Err(ChatError::validation("File not uploaded").into());
        }
        bound
    };

    let had_user_embeds = !user_embeds.is_empty();
    let row = messages::create(
        &state.db,
        NewMessage {
            id: MessageId::new(),
            channel_id: channel_id.clone(),
            author_id: auth.user.id.clone(),
            message_type: MessageType::Default,
            content: content.clone(),
            nonce: body.nonce,
            file_ids,
            mentions: mentions.iter().map(|id| id.0.clone()).collect(),
            user_embeds,
            author: None,
        },
    )
    .await
    .map_err(db_err)?;

    channels::touch_last_message(&state.db, &channel_id)
        .await
        .map_err(db_err)?;

    // content without user embeds gets unfurled in the background
    if !had_user_embeds {
        unfurl::spawn_unfurl(state.clone(), row.clone());
    }

    let total_bytes = content.as_deref().map_or(0, str::len) as i64
        + bound_files.iter().map(|f| f.size).sum::<i64>();
    users::spawn_inc_bytes(state.db.clone(), auth.user.id.clone(), total_bytes);

    let files_by_id = bound_files
        .into_iter()
        .map(|f| (f.id.as_str().to_string(), f))
        .collect();
    let message = projection::project_message(&row, &files_by_id);

    let status = state.presence.status_or_offline(&auth.user).await;
    state.bus.publish_event(Event::MessageCreated {
        message: message.clone(),
        author: Some(auth.user.to_author(status)),
        channel: None,
    });

    Ok(Json(message))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateMessageRequest {
    pub content: Option<String>,
    pub embeds: Option<Vec<Embed>>,
}

/// PATCH /v1/channels/{id}/messages/{mid} — author (or admin) edit; mentions
/// are recomputed and byte accounting follows the content delta.
pub async fn update_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((channel_id, message_id)): Path<(ChannelId, MessageId)>,
    Json(body): Json<UpdateMessageRequest>,
) -> Result<Json<Message>, ServerError> {
    let mut row = messages::find(&state.db, &channel_id, &message_id)
        .await
        .map_err(db_err)?
        .ok_or(ServerError(ChatError::NotFound))?;

    if row.author_id != auth.user.id && !auth.user.flags().contains(UserFlags::ADMIN) {
        return Err(ChatError::forbidden("You are not the author of this message").into());
    }

    if let Some(embeds) = &body.embeds {
        validate_embeds(embeds)?;
    }

    if let Some(content) = &body.content {
        let content = validate_content(content)?;
        let channel = super::load_channel(&state.db, &channel_id).await?;
        let usernames = mentions::extract_mention_usernames(&content);
        let resolved = mentions::resolve_for_channel(&state.db, &channel, &usernames)
            .await
            .map_err(db_err)?;

        let byte_diff = content.len() as i64 - row.content_len();
        users::spawn_inc_bytes(state.db.clone(), auth.user.id.clone(), byte_diff);

        row.content = Some(content);
        row.mentions = resolved.into_iter().map(|id| id.0).collect();
    }

    let had_user_embeds = match body.embeds {
        Some(embeds) => {
            row.user_embeds = SqlJson(embeds);
            true
        }
        None => false,
    };

    row.updated_at = Some(Utc::now());
    messages::save_edit(&state.db, &row).await.map_err(db_err)?;

    if !had_user_embeds {
        unfurl::spawn_unfurl(state.clone(), row.clone());
    }

    let message = projection::message_to_api(&state.db, &row)
        .await
        .map_err(db_err)?;
    state.bus.publish_event(Event::MessageUpdated {
        message: message.clone(),
    });
    Ok(Json(message))
}

/// DELETE /v1/channels/{id}/messages/{mid} — author only, soft delete.
pub async fn delete_message(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((channel_id, message_id)): Path<(ChannelId, MessageId)>,
) -> Result<Json<Message>, ServerError> {
    let row = messages::find(&state.db, &channel_id, &message_id)
        .await
        .map_err(db_err)?
        .ok_or(ServerError(ChatError::NotFound))?;
    if row.author_id != auth.user.id {
        return Err(ChatError::NotFound.into());
    }

    if !messages::soft_delete(&state.db, &message_id)
        .await
        .map_err(db_err)?
    {
        return Err(ChatError::NotFound.into());
    }

    if row.content_len() > 0 {
        users::spawn_inc_bytes(state.db.clone(), auth.user.id.clone(), -row.content_len());
    }

    state.bus.publish_event(Event::MessageDeleted {
        message_id: message_id.clone(),
        channel_id: channel_id.clone(),
    });

    let message = projection::message_to_api(&state.db, &row)
        .await
        .map_err(db_err)?;
    Ok(Json(message))
}
