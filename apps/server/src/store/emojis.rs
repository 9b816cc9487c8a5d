use chrono::{DateTime, Utc};
use tidepool_shared::ids::{EmojiId, UserId};
use tidepool_shared::models::Emoji;

const EMOJI_COLUMNS: &str = "id, owner_id, name, animated, mime_type, ext, created_at, updated_at";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EmojiRow {
    pub id: EmojiId,
    pub owner_id: UserId,
    pub name: String,
    pub animated: bool,
    pub mime_type: String,
    pub ext: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl EmojiRow {
    /// The public url is served from the object store via the CDN base.
    pub fn to_api(&self, public_url: String) -> Emoji {
        Emoji {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            name: self.name.clone(),
            animated: self.animated,
            url: public_url,
        }
    }
}

pub async fn create(db: &sqlx::PgPool, emoji: &EmojiRow) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO emojis (id, owner_id, name, animated, mime_type, ext) \
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(&emoji.id)
    .bind(&emoji.owner_id)
    .bind(&emoji.name)
    .bind(emoji.animated)
    .bind(&emoji.mime_type)
    .bind(&emoji.ext)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn save(db: &sqlx::PgPool, emoji: &EmojiRow) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE emojis SET name = $1, animated = $2, mime_type = $3, ext = $4, \
         updated_at = NOW() WHERE id = $5",
    )
    .bind(&emoji.name)
    .bind(emoji.animated)
    .bind(&emoji.mime_type)
    .bind(&emoji.ext)
    .bind(&emoji.id)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn list_for_owner(
    db: &sqlx::PgPool,
    owner_id: &UserId,
) -> Result<Vec<EmojiRow>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {EMOJI_COLUMNS} FROM emojis WHERE owner_id = $1 ORDER BY created_at"
    ))
    .bind(owner_id)
    .fetch_all(db)
    .await
}

pub async fn find_owned(
    db: &sqlx::PgPool,
    id: &EmojiId,
    owner_id: &UserId,
) -> Result<Option<EmojiRow>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {EMOJI_COLUMNS} FROM emojis WHERE id = $1 AND owner_id = $2"
    ))
    .bind(id)
    .bind(owner_id)
    .fetch_optional(db)
    .await
}

/// Emoji names are unique per owner.
pub async fn name_taken(
    db: &sqlx::PgPool,
    owner_id: &UserId,
    name: &str,
    exclude: Option<&EmojiId>,
) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM emojis WHERE owner_id = $1 AND name = $2 AND ($3::TEXT IS NULL OR id <> $3)",
    )
    .bind(owner_id)
    .bind(name)
    .bind(exclude)
    .fetch_one(db)
    .await?;
    Ok(count > 0)
}

pub async fn delete(db: &sqlx::PgPool, id: &EmojiId) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM emojis WHERE id = $1")
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}
