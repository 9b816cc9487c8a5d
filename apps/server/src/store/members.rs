use tidepool_shared::ids::{generate_id, ChannelId, InviteId, UserId};

/// Add a member. At most one row per (channel, user) pair; re-adding is a
/// no-op. Returns whether a new row was created.
pub async fn add(
    db: &sqlx::PgPool,
    channel_id: &ChannelId,
    user_id: &UserId,
    invite_id: Option<&InviteId>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO channel_members (id, channel_id, user_id, invite_id) \
         VALUES ($1, $2, $3, $4) ON CONFLICT (channel_id, user_id) DO NOTHING",
    )
    .bind(generate_id())
    .bind(channel_id)
    .bind(user_id)
    .bind(invite_id)
    .execute(db)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Remove a member. Returns whether a row was removed.
pub async fn remove(
    db: &sqlx::PgPool,
    channel_id: &ChannelId,
    user_id: &UserId,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM channel_members WHERE channel_id = $1 AND user_id = $2")
        .bind(channel_id)
        .bind(user_id)
        .execute(db)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn exists(
    db: &sqlx::PgPool,
    channel_id: &ChannelId,
    user_id: &UserId,
) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM channel_members WHERE channel_id = $1 AND user_id = $2",
    )
    .bind(channel_id)
    .bind(user_id)
    .fetch_one(db)
    .await?;
    Ok(count > 0)
}

pub async fn user_ids(
    db: &sqlx::PgPool,
    channel_id: &ChannelId,
) -> Result<Vec<UserId>, sqlx::Error> {
    sqlx::query_scalar("SELECT user_id FROM channel_members WHERE channel_id = $1")
        .bind(channel_id)
        .fetch_all(db)
        .await
}
