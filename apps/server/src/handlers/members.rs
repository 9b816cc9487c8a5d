use axum::extract::{Path, State};
use axum::Json;
use tidepool_shared::ids::ChannelId;
use tidepool_shared::models::Author;

use crate::error::{db_err, ServerError};
use crate::extractors::auth::AuthUser;
use crate::state::AppState;
use crate::store::{members, users};

/// GET /v1/channels/{id}/members
pub async fn list_members(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(channel_id): Path<ChannelId>,
) -> Result<Json<Vec<Author>>, ServerError> {
    let channel = super::load_channel(&state.db, &channel_id).await?;
    super::require_observer(&state.db, &channel, &auth.user).await?;

    let member_ids: Vec<String> = members::user_ids(&state.db, &channel_id)
        .await
        .map_err(db_err)?
        .into_iter()
        .map(|id| id.0)
        .collect();
    let rows = users::find_by_ids(&state.db, &member_ids)
        .await
        .map_err(db_err)?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let status = state.presence.status_or_offline(&row).await;
        out.push(row.to_author(status));
    }
    Ok(Json(out))
}
