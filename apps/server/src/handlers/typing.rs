use axum::extract::{Path, State};
use axum::Json;
use tidepool_shared::events::Event;
use tidepool_shared::ids::ChannelId;

use crate::error::ServerError;
use crate::extractors::auth::AuthUser;
use crate::state::AppState;

/// POST /v1/channels/{id}/typing
pub async fn start_typing(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(channel_id): Path<ChannelId>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let channel = super::load_channel(&state.db, &channel_id).await?;
    super::require_observer(&state.db, &channel, &auth.user).await?;

    state.bus.publish_event(Event::TypingStarted {
        channel_id,
        user_id: auth.user.id.clone(),
    });
    Ok(Json(serde_json::json!({ "success": true })))
}
