pub mod auth;
pub mod channels;
pub mod emojis;
pub mod files;
pub mod health;
pub mod invites;
pub mod members;
pub mod messages;
pub mod typing;
pub mod users;
pub mod webhooks;

use tidepool_shared::error::ChatError;
use tidepool_shared::ids::ChannelId;

use crate::error::{db_err, ServerError};
use crate::store::channels::{self as channel_store, ChannelRow};
use crate::store::users::UserRow;

/// Load a channel or fail with 404.
pub(crate) async fn load_channel(
    db: &sqlx::PgPool,
    channel_id: &ChannelId,
) -> Result<ChannelRow, ServerError> {
    channel_store::find(db, channel_id)
        .await
        .map_err(db_err)?
        .ok_or(ServerError(ChatError::NotFound))
}

/// Authorize read/post access: non-private channel, or owner, or member.
pub(crate) async fn require_observer(
    db: &sqlx::PgPool,
    channel: &ChannelRow,
    user: &UserRow,
) -> Result<(), ServerError> {
    if channel_store::user_can_observe(db, channel, &user.id)
        .await
        .map_err(db_err)?
    {
        Ok(())
    } else {
        Err(ChatError::forbidden("You are not a member of this channel").into())
    }
}

/// Authorize mutation: channel owner or an admin.
pub(crate) fn require_owner(channel: &ChannelRow, user: &UserRow) -> Result<(), ServerError> {
    if channel.author_id == user.id
        || user
            .flags()
            .contains(tidepool_shared::models::UserFlags::ADMIN)
    {
        Ok(())
    } else {
        Err(ChatError::forbidden("You are not the author of this channel").into())
    }
}
