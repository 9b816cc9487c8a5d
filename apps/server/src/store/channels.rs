use chrono::{DateTime, Utc};
use tidepool_shared::ids::{ChannelId, UserId};
use tidepool_shared::models::Channel;

const CHANNEL_COLUMNS: &str =
    "id, name, topic, author_id, private, last_message_at, created_at, updated_at";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChannelRow {
    pub id: ChannelId,
    pub name: String,
    pub topic: String,
    pub author_id: UserId,
    pub private: bool,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChannelRow {
    pub fn to_api(&self) -> Channel {
        Channel {
            id: self.id.clone(),
            name: self.name.clone(),
            topic: self.topic.clone(),
            author_id: self.author_id.clone(),
            private: self.private,
            last_message_at: self.last_message_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

pub struct NewChannel {
    pub id: ChannelId,
    pub name: String,
    pub topic: String,
    pub private: bool,
    pub author_id: UserId,
}

pub async fn create(db: &sqlx::PgPool, channel: &NewChannel) -> Result<ChannelRow, sqlx::Error> {
    sqlx::query_as(&format!(
        "INSERT INTO channels (id, name, topic, private, author_id) \
         VALUES ($1, $2, $3, $4, $5) RETURNING {CHANNEL_COLUMNS}"
    ))
    .bind(&channel.id)
    .bind(&channel.name)
    .bind(&channel.topic)
    .bind(channel.private)
    .bind(&channel.author_id)
    .fetch_one(db)
    .await
}

pub async fn find(db: &sqlx::PgPool, id: &ChannelId) -> Result<Option<ChannelRow>, sqlx::Error> {
    sqlx::query_as(&format!("SELECT {CHANNEL_COLUMNS} FROM channels WHERE id = $1"))
        .bind(id)
        .fetch_optional(db)
        .await
}

/// Persist the editable fields of an in-memory row.
pub async fn save(db: &sqlx::PgPool, channel: &ChannelRow) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE channels SET name = $1, topic = $2, private = $3, updated_at = NOW() \
         WHERE id = $4",
    )
    .bind(&channel.name)
    .bind(&channel.topic)
    .bind(channel.private)
    .bind(&channel.id)
    .execute(db)
    .await?;
    Ok(())
}

/// Channels the user may observe: every non-private channel, plus private
/// channels they own or belong to.
pub async fn list_for_user(
    db: &sqlx::PgPool,
    user_id: &UserId,
) -> Result<Vec<ChannelRow>, sqlx::Error> {
    sqlx::query_as(
        "SELECT DISTINCT c.id, c.name, c.topic, c.author_id, c.private, c.last_message_at, \
         c.created_at, c.updated_at \
         FROM channels c \
         LEFT JOIN channel_members m ON m.channel_id = c.id AND m.user_id = $1 \
         WHERE NOT c.private OR c.author_id = $1 OR m.user_id IS NOT NULL \
         ORDER BY c.created_at",
    )
    .bind(user_id)
    .fetch_all(db)
    .await
}

/// Ids of the channels the user may observe; seeds the entitlement cache.
pub async fn entitled_ids(
    db: &sqlx::PgPool,
    user_id: &UserId,
) -> Result<Vec<ChannelId>, sqlx::Error> {
    sqlx::query_scalar(
        "SELECT DISTINCT c.id FROM channels c \
         LEFT JOIN channel_members m ON m.channel_id = c.id AND m.user_id = $1 \
         WHERE NOT c.private OR c.author_id = $1 OR m.user_id IS NOT NULL",
    )
    .bind(user_id)
    .fetch_all(db)
    .await
}

pub async fn list_public(db: &sqlx::PgPool) -> Result<Vec<ChannelRow>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {CHANNEL_COLUMNS} FROM channels WHERE NOT private ORDER BY created_at"
    ))
    .fetch_all(db)
    .await
}

pub async fn touch_last_message(db: &sqlx::PgPool, id: &ChannelId) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE channels SET last_message_at = NOW() WHERE id = $1")
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

/// Delete a channel together with its messages, members, invites, and
/// webhooks. Not transactional; every step is idempotent so a retry after a
/// partial failure converges.
pub async fn delete_cascade(db: &sqlx::PgPool, id: &ChannelId) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM messages WHERE channel_id = $1")
        .bind(id)
        .execute(db)
        .await?;
    sqlx::query("DELETE FROM channel_members WHERE channel_id = $1")
        .bind(id)
        .execute(db)
        .await?;
    sqlx::query("DELETE FROM channel_invites WHERE channel_id = $1")
        .bind(id)
        .execute(db)
        .await?;
    sqlx::query("DELETE FROM webhooks WHERE channel_id = $1")
        .bind(id)
        .execute(db)
        .await?;
    sqlx::query("DELETE FROM channels WHERE id = $1")
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

/// Whether the user may observe this channel: public, or owner, or member.
pub async fn user_can_observe(
    db: &sqlx::PgPool,
    channel: &ChannelRow,
    user_id: &UserId,
) -> Result<bool, sqlx::Error> {
    if !channel.private || &channel.author_id == user_id {
        return Ok(true);
    }
    super::members::exists(db, &channel.id, user_id).await
}
