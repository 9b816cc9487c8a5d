//! Per-user entitlement rules: which channels a connected user may observe,
//! seeded from the store and maintained incrementally from the event stream.

use std::collections::HashSet;

use tidepool_shared::events::Event;
use tidepool_shared::ids::{ChannelId, UserId};
use tidepool_shared::models::MessageType;

use crate::store::channels;

use super::state::GatewayState;

/// Build the entitlement set for a user connecting to this node: every
/// non-private channel, plus private channels they own or belong to.
pub async fn build_for_user(
    db: &sqlx::PgPool,
    user_id: &UserId,
) -> Result<HashSet<ChannelId>, sqlx::Error> {
    Ok(channels::entitled_ids(db, user_id).await?.into_iter().collect())
}

/// Whether a user with the given entitlement check passes for an event.
/// Channel-scoped events require membership of the scope; everything else
/// (`author_updated`, `typing_started`, `heartbeat`) is delivered to all.
pub fn event_entitled(gateway: &GatewayState, user_id: &UserId, event: &Event) -> bool {
    match event.channel_scope() {
        Some(channel_id) => gateway.user_entitled(user_id, channel_id),
        None => true,
    }
}

/// Entitlement maintenance applied before dispatch, so the affected users
/// receive the very event that entitled them.
pub fn apply_before_dispatch(gateway: &GatewayState, event: &Event) {
    match event {
        Event::ChannelCreated { channel } => {
            if channel.private {
                gateway.grant_channel(&channel.author_id, &channel.id);
            } else {
                // public channels entitle everyone
                gateway.grant_channel_to_all(&channel.id);
            }
        }
        Event::MessageCreated { message, .. } => match message.message_type {
            MessageType::Join => gateway.grant_channel(&message.author_id, &message.channel_id),
            MessageType::Leave => gateway.revoke_channel(&message.author_id, &message.channel_id),
            MessageType::Default => {}
        },
        _ => {}
    }
}

/// Maintenance applied after dispatch: channel deletion is validated against
/// the old set (so members learn about it), then revoked everywhere.
pub fn apply_after_dispatch(gateway: &GatewayState, event: &Event) {
    if let Event::ChannelDeleted { channel_id } = event {
        gateway.revoke_channel_everywhere(channel_id);
    }
}
