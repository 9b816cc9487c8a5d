use axum::extract::{Path, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tidepool_shared::error::ChatError;
use tidepool_shared::ids::{ChannelId, InviteId};
use tidepool_shared::models::{ChannelInvite, MessageType, UserFlags};

use crate::error::{db_err, ServerError};
use crate::extractors::auth::AuthUser;
use crate::state::AppState;
use crate::store::{invites, members};

/// GET /v1/channels/{id}/invites — owner only.
pub async fn list_invites(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(channel_id): Path<ChannelId>,
) -> Result<Json<Vec<ChannelInvite>>, ServerError> {
    let channel = super::load_channel(&state.db, &channel_id).await?;
    super::require_owner(&channel, &auth.user)?;

    let rows = invites::list_for_channel(&state.db, &channel_id)
        .await
        .map_err(db_err)?;
    Ok(Json(rows.iter().map(|row| row.to_api()).collect()))
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateInviteRequest {
    pub expires_at: Option<DateTime<Utc>>,
    pub max_uses: Option<i32>,
}

/// POST /v1/channels/{id}/invites — owner only.
pub async fn create_invite(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(channel_id): Path<ChannelId>,
    Json(body): Json<CreateInviteRequest>,
) -> Result<Json<ChannelInvite>, ServerError> {
    let channel = super::load_channel(&state.db, &channel_id).await?;
    super::require_owner(&channel, &auth.user)?;

    if body.max_uses.is_some_and(|n| n <= 0) {
        return Err(ChatError::validation("max_uses must be positive").into());
    }

    let invite = invites::create(
        &state.db,
        &channel_id,
        &auth.user.id,
        body.expires_at,
        body.max_uses,
    )
    .await
    .map_err(db_err)?;
    Ok(Json(invite.to_api()))
}

/// POST /v1/invites/{code}/join — consumes a use and adds the caller as a
/// member; emits a `join` system message.
pub async fn join_with_invite(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(code): Path<String>,
) -> Result<Json<serde_json::Value>, ServerError> {
    if code.is_empty() {
        return Err(ChatError::validation("Code is required").into());
    }

    let invite = invites::find_by_code(&state.db, &code)
        .await
        .map_err(db_err)?
        .ok_or(ServerError(ChatError::NotFound))?;

    if invite.is_expired(Utc::now()) {
        return Err(ChatError::Gone("Invite has expired".into()).into());
    }
    if invite.is_exhausted() {
        return Err(ChatError::Gone("Invite has no uses left".into()).into());
    }
    // the guarded increment wins races between concurrent joiners
    if !invites::consume(&state.db, &invite.id).await.map_err(db_err)? {
        return Err(ChatError::Gone("Invite has no uses left".into()).into());
    }

    members::add(&state.db, &invite.channel_id, &auth.user.id, Some(&invite.id))
        .await
        .map_err(db_err)?;

    super::channels::publish_system_message(
        &state,
        MessageType::Join,
        invite.channel_id.clone(),
        auth.user.id.clone(),
        &auth.user,
    )
    .await?;

    Ok(Json(serde_json::json!({ "success": true })))
}

/// DELETE /v1/channels/{id}/invites/{invite_id} — invite author, channel
/// owner, or admin.
pub async fn delete_invite(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((channel_id, invite_id)): Path<(ChannelId, InviteId)>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let invite = invites::find_in_channel(&state.db, &channel_id, &invite_id)
        .await
        .map_err(db_err)?
        .ok_or(ServerError(ChatError::NotFound))?;

    let channel = super::load_channel(&state.db, &channel_id).await?;
    let allowed = invite.author_id == auth.user.id
        || channel.author_id == auth.user.id
        || auth.user.flags().contains(UserFlags::ADMIN);
    if !allowed {
        return Err(ChatError::forbidden("You cannot delete this invite").into());
    }

    invites::delete(&state.db, &invite.id).await.map_err(db_err)?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_invite_request_parses_iso_expiry() {
        let req: CreateInviteRequest = serde_json::from_str(
            "{\"expires_at\":\"2026-08-01T00:00:00Z\",\"max_uses\":3}",
        )
        .unwrap();
        assert!(req.expires_at.is_some());
        assert_eq!(req.max_uses, Some(3));
    }

    #[test]
    fn create_invite_request_defaults_to_unlimited() {
        let req: CreateInviteRequest = serde_json::from_str("{}").unwrap();
        assert!(req.expires_at.is_none());
        assert!(req.max_uses.is_none());
    }
}
