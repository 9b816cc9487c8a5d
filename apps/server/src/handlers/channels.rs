use axum::extract::{Path, State};
use axum::Json;
use serde::Deserialize;
use tidepool_shared::error::ChatError;
use tidepool_shared::events::Event;
use tidepool_shared::ids::{ChannelId, UserId};
use tidepool_shared::models::{Channel, MessageType};

use crate::error::{db_err, ServerError};
use crate::extractors::auth::AuthUser;
use crate::projection;
use crate::state::AppState;
use crate::store::messages::NewMessage;
use crate::store::{channels, members, messages};
use crate::validation::{validate_name, validate_topic};

/// GET /v1/channels — every channel the caller may observe.
pub async fn list_channels(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<Json<Vec<Channel>>, ServerError> {
    let rows = channels::list_for_user(&state.db, &auth.user.id)
        .await
        .map_err(db_err)?;
    Ok(Json(rows.iter().map(|row| row.to_api()).collect()))
}

/// GET /v1/channels/{id}
pub async fn get_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(channel_id): Path<ChannelId>,
) -> Result<Json<Channel>, ServerError> {
    let channel = super::load_channel(&state.db, &channel_id).await?;
    super::require_observer(&state.db, &channel, &auth.user).await?;
    Ok(Json(channel.to_api()))
}

#[derive(Debug, Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub private: bool,
}

/// POST /v1/channels
pub async fn create_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CreateChannelRequest>,
) -> Result<Json<Channel>, ServerError> {
    validate_name(&body.name, "Name")?;
    validate_topic(&body.topic)?;

    let channel = channels::create(
        &state.db,
        &channels::NewChannel {
            id: ChannelId::new(),
            name: body.name,
            topic: body.topic,
            private: body.private,
            author_id: auth.user.id.clone(),
        },
    )
    .await
    .map_err(db_err)?;

    // private channels get explicit author membership
    if channel.private {
        members::add(&state.db, &channel.id, &auth.user.id, None)
            .await
            .map_err(db_err)?;
    }

    let api = channel.to_api();
    state.bus.publish_event(Event::ChannelCreated {
        channel: api.clone(),
    });
    Ok(Json(api))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateChannelRequest {
    pub name: Option<String>,
    pub topic: Option<String>,
    pub private: Option<bool>,
}

/// PATCH /v1/channels/{id} — owner only.
pub async fn update_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(channel_id): Path<ChannelId>,
    Json(body): Json<UpdateChannelRequest>,
) -> Result<Json<Channel>, ServerError> {
    let mut channel = super::load_channel(&state.db, &channel_id).await?;
    super::require_owner(&channel, &auth.user)?;

    if let Some(name) = body.name {
        validate_name(&name, "Name")?;
        channel.name = name;
    }
    if let Some(topic) = body.topic {
        validate_topic(&topic)?;
        channel.topic = topic;
    }
    if let Some(private) = body.private {
        channel.private = private;
    }

    channels::save(&state.db, &channel).await.map_err(db_err)?;

    let api = channel.to_api();
    state.bus.publish_event(Event::ChannelUpdated {
        channel: api.clone(),
    });
    Ok(Json(api))
}

/// DELETE /v1/channels/{id} — owner only; cascades to messages, members,
/// invites, and webhooks.
pub async fn delete_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(channel_id): Path<ChannelId>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let channel = super::load_channel(&state.db, &channel_id).await?;
    super::require_owner(&channel, &auth.user)?;

    channels::delete_cascade(&state.db, &channel_id)
        .await
        .map_err(db_err)?;

    state.bus.publish_event(Event::ChannelDeleted {
        channel_id: channel_id.clone(),
    });
    Ok(Json(serde_json::Value::Null))
}

/// POST /v1/channels/{id}/leave — members only; the owner cannot leave.
pub async fn leave_channel(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(channel_id): Path<ChannelId>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let channel = super::load_channel(&state.db, &channel_id).await?;
    if channel.author_id == auth.user.id {
        return Err(ChatError::validation("The channel owner cannot leave").into());
    }

    let removed = members::remove(&state.db, &channel_id, &auth.user.id)
        .await
        .map_err(db_err)?;
    if !removed {
        return Err(ChatError::NotFound.into());
    }

    publish_system_message(
        &state,
        MessageType::Leave,
        channel_id,
        auth.user.id.clone(),
        &auth.user,
    )
    .await?;

    Ok(Json(serde_json::json!({ "success": true })))
}

/// Persist and publish a `join`/`leave` system message.
pub(crate) async fn publish_system_message(
    state: &AppState,
    message_type: MessageType,
    channel_id: ChannelId,
    subject_id: UserId,
    subject: &crate::store::users::UserRow,
) -> Result<(), ServerError> {
    let row = messages::create(
        &state.db,
        NewMessage::system(message_type, channel_id, subject_id),
    )
    .await
    .map_err(db_err)?;

    let status = state.presence.status_or_offline(subject).await;
    let message = projection::project_message(&row, &Default::default());
    state.bus.publish_event(Event::MessageCreated {
        message,
        author: Some(subject.to_author(status)),
        channel: None,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_request_defaults_topic_and_privacy() {
        let req: CreateChannelRequest = serde_json::from_str("{\"name\":\"lobby\"}").unwrap();
        assert_eq!(req.name, "lobby");
        assert_eq!(req.topic, "");
        assert!(!req.private);
    }

    #[test]
    fn update_request_is_fully_optional() {
        let req: UpdateChannelRequest = serde_json::from_str("{}").unwrap();
        assert!(req.name.is_none() && req.topic.is_none() && req.private.is_none());
    }
}
