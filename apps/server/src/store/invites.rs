use chrono::{DateTime, Utc};
use tidepool_shared::ids::{generate_id, ChannelId, InviteId, UserId};
use tidepool_shared::models::ChannelInvite;

const INVITE_COLUMNS: &str =
    "id, code, channel_id, author_id, expires_at, max_uses, uses, created_at";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct InviteRow {
    pub id: InviteId,
    pub code: String,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub expires_at: Option<DateTime<Utc>>,
    pub max_uses: Option<i32>,
    pub uses: i32,
    pub created_at: DateTime<Utc>,
}

impl InviteRow {
    pub fn to_api(&self) -> ChannelInvite {
        ChannelInvite {
            id: self.id.clone(),
            code: self.code.clone(),
            channel_id: self.channel_id.clone(),
            author_id: self.author_id.clone(),
            expires_at: self.expires_at,
            max_uses: self.max_uses,
            uses: self.uses,
            created_at: self.created_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at < now)
    }

    pub fn is_exhausted(&self) -> bool {
        self.max_uses.is_some_and(|max| self.uses >= max)
    }
}

pub async fn create(
    db: &sqlx::PgPool,
    channel_id: &ChannelId,
    author_id: &UserId,
    expires_at: Option<DateTime<Utc>>,
    max_uses: Option<i32>,
) -> Result<InviteRow, sqlx::Error> {
    sqlx::query_as(&format!(
        "INSERT INTO channel_invites (id, code, channel_id, author_id, expires_at, max_uses) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING {INVITE_COLUMNS}"
    ))
    .bind(InviteId::new())
    .bind(generate_id())
    .bind(channel_id)
    .bind(author_id)
    .bind(expires_at)
    .bind(max_uses)
    .fetch_one(db)
    .await
}

pub async fn list_for_channel(
    db: &sqlx::PgPool,
    channel_id: &ChannelId,
) -> Result<Vec<InviteRow>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {INVITE_COLUMNS} FROM channel_invites WHERE channel_id = $1 ORDER BY created_at"
    ))
    .bind(channel_id)
    .fetch_all(db)
    .await
}

pub async fn find_by_code(
    db: &sqlx::PgPool,
    code: &str,
) -> Result<Option<InviteRow>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {INVITE_COLUMNS} FROM channel_invites WHERE code = $1"
    ))
    .bind(code)
    .fetch_optional(db)
    .await
}

pub async fn find_in_channel(
    db: &sqlx::PgPool,
    channel_id: &ChannelId,
    invite_id: &InviteId,
) -> Result<Option<InviteRow>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {INVITE_COLUMNS} FROM channel_invites WHERE id = $1 AND channel_id = $2"
    ))
    .bind(invite_id)
    .bind(channel_id)
    .fetch_optional(db)
    .await
}

/// Atomically consume one use. The guard keeps concurrent joins from
/// overrunning `max_uses`; returns false once the invite is exhausted.
pub async fn consume(db: &sqlx::PgPool, id: &InviteId) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE channel_invites SET uses = uses + 1 \
         WHERE id = $1 AND (max_uses IS NULL OR uses < max_uses)",
    )
    .bind(id)
    .execute(db)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn delete(db: &sqlx::PgPool, id: &InviteId) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM channel_invites WHERE id = $1")
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(expires_at: Option<DateTime<Utc>>, max_uses: Option<i32>, uses: i32) -> InviteRow {
        InviteRow {
            id: InviteId::from("i123456789"),
            code: "code123456".into(),
            channel_id: ChannelId::from("c123456789"),
            author_id: UserId::from("u123456789"),
            expires_at,
            max_uses,
            uses,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn expiry_is_checked_against_now() {
        let now = Utc::now();
        assert!(sample(Some(now - chrono::Duration::seconds(1)), None, 0).is_expired(now));
        assert!(!sample(Some(now + chrono::Duration::seconds(60)), None, 0).is_expired(now));
        assert!(!sample(None, None, 0).is_expired(now));
    }

    #[test]
    fn exhaustion_requires_max_uses() {
        assert!(sample(None, Some(1), 1).is_exhausted());
        assert!(sample(None, Some(1), 2).is_exhausted());
        assert!(!sample(None, Some(2), 1).is_exhausted());
        assert!(!sample(None, None, 1_000).is_exhausted());
    }
}
