use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::QueryBuilder;
use tidepool_shared::ids::{ChannelId, MessageId, UserId};
use tidepool_shared::models::{Author, Embed, MessageType};

use crate::validation::escape_like;

const MESSAGE_COLUMNS: &str = "id, channel_id, author_id, type, content, nonce, file_ids, \
     mentions, user_embeds, system_embeds, author, created_at, updated_at, deleted_at";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MessageRow {
    pub id: MessageId,
    pub channel_id: ChannelId,
    /// User id, or webhook id when `author` carries a synthetic projection.
    pub author_id: UserId,
    #[sqlx(rename = "type")]
    pub message_type: MessageType,
    pub content: Option<String>,
    pub nonce: Option<String>,
    pub file_ids: Vec<String>,
    pub mentions: Vec<String>,
    pub user_embeds: Json<Vec<Embed>>,
    pub system_embeds: Json<Vec<Embed>>,
    pub author: Option<Json<Author>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl MessageRow {
    pub fn content_len(&self) -> i64 {
        self.content.as_deref().map_or(0, str::len) as i64
    }
}

pub struct NewMessage {
    pub id: MessageId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub message_type: MessageType,
    pub content: Option<String>,
    pub nonce: Option<String>,
    pub file_ids: Vec<String>,
    pub mentions: Vec<String>,
    pub user_embeds: Vec<Embed>,
    pub author: Option<Author>,
}

impl NewMessage {
    /// A bare system message (join/leave) with no content.
    pub fn system(message_type: MessageType, channel_id: ChannelId, author_id: UserId) -> Self {
        Self {
            id: MessageId::new(),
            channel_id,
            author_id,
            message_type,
            content: None,
            nonce: None,
            file_ids: vec![],
            mentions: vec![],
            user_embeds: vec![],
            author: None,
        }
    }
}

pub async fn create(db: &sqlx::PgPool, message: NewMessage) -> Result<MessageRow, sqlx::Error> {
    sqlx::query_as(&format!(
        "INSERT INTO messages \
         (id, channel_id, author_id, type, content, nonce, file_ids, mentions, user_embeds, author) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {MESSAGE_COLUMNS}"
    ))
    .bind(&message.id)
    .bind(&message.channel_id)
    .bind(&message.author_id)
    .bind(message.message_type)
    .bind(&message.content)
    .bind(&message.nonce)
    .bind(&message.file_ids)
    .bind(&message.mentions)
    .bind(Json(&message.user_embeds))
    .bind(message.author.as_ref().map(Json))
    .fetch_one(db)
    .await
}

pub async fn find(
    db: &sqlx::PgPool,
    channel_id: &ChannelId,
    message_id: &MessageId,
) -> Result<Option<MessageRow>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages \
         WHERE id = $1 AND channel_id = $2 AND deleted_at IS NULL"
    ))
    .bind(message_id)
    .bind(channel_id)
    .fetch_optional(db)
    .await
}

/// Persist an edit: content, recomputed mentions, user embeds, `updated_at`.
pub async fn save_edit(db: &sqlx::PgPool, message: &MessageRow) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE messages SET content = $1, mentions = $2, user_embeds = $3, updated_at = NOW() \
         WHERE id = $4 AND deleted_at IS NULL",
    )
    .bind(&message.content)
    .bind(&message.mentions)
    .bind(&message.user_embeds)
    .bind(&message.id)
    .execute(db)
    .await?;
    Ok(())
}

/// Soft delete. Returns whether a live row was marked.
pub async fn soft_delete(db: &sqlx::PgPool, id: &MessageId) -> Result<bool, sqlx::Error> {
    let result =
        sqlx::query("UPDATE messages SET deleted_at = NOW() WHERE id = $1 AND deleted_at IS NULL")
            .bind(id)
            .execute(db)
            .await?;
    Ok(result.rows_affected() > 0)
}

/// Replace the unfurler-computed embeds. Returns false when the message was
/// deleted in the meantime.
pub async fn set_system_embeds(
    db: &sqlx::PgPool,
    id: &MessageId,
    embeds: &[Embed],
) -> Result<bool, sqlx::Error> {
    let result =
        sqlx::query("UPDATE messages SET system_embeds = $1 WHERE id = $2 AND deleted_at IS NULL")
            .bind(Json(embeds))
            .bind(id)
            .execute(db)
            .await?;
    Ok(result.rows_affected() > 0)
}

#[derive(Debug, Default)]
pub struct HistoryFilter {
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub limit: i64,
    pub author_id: Option<String>,
    pub contains: Option<String>,
}

impl HistoryFilter {
    /// Paging is time based: newest-first by default. With only `after` set
    /// the caller wants the closest newer messages, so flip to oldest-first
    /// or every page after the first would skip ahead.
    pub fn ascending(&self) -> bool {
        self.after.is_some() && self.before.is_none()
    }
}

pub async fn history(
    db: &sqlx::PgPool,
    channel_id: &ChannelId,
    filter: &HistoryFilter,
) -> Result<Vec<MessageRow>, sqlx::Error> {
    let mut qb: QueryBuilder<sqlx::Postgres> = QueryBuilder::new(format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE deleted_at IS NULL AND channel_id = "
    ));
    qb.push_bind(channel_id);
    if let Some(after) = filter.after {
        qb.push(" AND created_at > ");
        qb.push_bind(after);
    }
    if let Some(before) = filter.before {
        qb.push(" AND created_at < ");
        qb.push_bind(before);
    }
    if let Some(author_id) = &filter.author_id {
        qb.push(" AND author_id = ");
        qb.push_bind(author_id);
    }
    if let Some(contains) = &filter.contains {
        qb.push(" AND content LIKE ");
        qb.push_bind(format!("%{}%", escape_like(contains)));
    }
    qb.push(if filter.ascending() {
        " ORDER BY created_at ASC"
    } else {
        " ORDER BY created_at DESC"
    });
    qb.push(" LIMIT ");
    qb.push_bind(filter.limit);

    qb.build_query_as().fetch_all(db).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascending_only_when_after_without_before() {
        let now = Utc::now();
        let mut filter = HistoryFilter {
            after: Some(now),
            limit: 50,
            ..Default::default()
        };
        assert!(filter.ascending());
        filter.before = Some(now);
        assert!(!filter.ascending());
        filter.after = None;
        assert!(!filter.ascending());
    }

    #[test]
    fn system_messages_are_bare() {
        let msg = NewMessage::system(
            MessageType::Join,
            ChannelId::from("c123456789"),
            UserId::from("u123456789"),
        );
        assert_eq!(msg.message_type, MessageType::Join);
        assert!(msg.content.is_none());
        assert!(msg.file_ids.is_empty());
        assert!(msg.author.is_none());
    }

    #[test]
    fn content_len_handles_missing_content() {
        let msg = NewMessage::system(
            MessageType::Leave,
            ChannelId::from("c123456789"),
            UserId::from("u123456789"),
        );
        // row round-trip is covered by integration tests; just exercise the helper shape
        assert!(msg.content.map_or(0, |c| c.len()) == 0);
    }
}
