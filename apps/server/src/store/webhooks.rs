use chrono::{DateTime, Utc};
use tidepool_shared::ids::{generate_id, ChannelId, UserId, WebhookId};
use tidepool_shared::models::Webhook;

const WEBHOOK_COLUMNS: &str = "id, channel_id, owner_id, name, color, secret, created_at, updated_at";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WebhookRow {
    pub id: WebhookId,
    pub channel_id: ChannelId,
    pub owner_id: UserId,
    pub name: String,
    pub color: String,
    pub secret: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl WebhookRow {
    /// The secret is only projected for the channel owner.
    pub fn to_api(&self, include_secret: bool) -> Webhook {
        Webhook {
            id: self.id.clone(),
            channel_id: self.channel_id.clone(),
            owner_id: self.owner_id.clone(),
            name: self.name.clone(),
            color: self.color.clone(),
            secret: include_secret.then(|| self.secret.clone()),
            created_at: self.created_at,
        }
    }
}

pub async fn create(
    db: &sqlx::PgPool,
    channel_id: &ChannelId,
    owner_id: &UserId,
    name: &str,
    color: &str,
) -> Result<WebhookRow, sqlx::Error> {
    sqlx::query_as(&format!(
        "INSERT INTO webhooks (id, channel_id, owner_id, name, color, secret) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING {WEBHOOK_COLUMNS}"
    ))
    .bind(WebhookId::new())
    .bind(channel_id)
    .bind(owner_id)
    .bind(name)
    .bind(color)
    .bind(format!("{}{}", generate_id(), generate_id()))
    .fetch_one(db)
    .await
}

pub async fn list_for_channel(
    db: &sqlx::PgPool,
    channel_id: &ChannelId,
) -> Result<Vec<WebhookRow>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE channel_id = $1 ORDER BY created_at"
    ))
    .bind(channel_id)
    .fetch_all(db)
    .await
}

pub async fn find_in_channel(
    db: &sqlx::PgPool,
    channel_id: &ChannelId,
    webhook_id: &WebhookId,
) -> Result<Option<WebhookRow>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE id = $1 AND channel_id = $2"
    ))
    .bind(webhook_id)
    .bind(channel_id)
    .fetch_optional(db)
    .await
}

/// Authenticate an incoming webhook call by its path triple.
pub async fn find_authenticated(
    db: &sqlx::PgPool,
    channel_id: &ChannelId,
    webhook_id: &WebhookId,
    secret: &str,
) -> Result<Option<WebhookRow>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE id = $1 AND channel_id = $2 AND secret = $3"
    ))
    .bind(webhook_id)
    .bind(channel_id)
    .bind(secret)
    .fetch_optional(db)
    .await
}

/// Webhook names are unique per channel.
pub async fn name_taken(
    db: &sqlx::PgPool,
    channel_id: &ChannelId,
    name: &str,
    exclude: Option<&WebhookId>,
) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM webhooks WHERE channel_id = $1 AND name = $2 AND ($3::TEXT IS NULL OR id <> $3)",
    )
    .bind(channel_id)
    .bind(name)
    .bind(exclude)
    .fetch_one(db)
    .await?;
    Ok(count > 0)
}

pub async fn save(db: &sqlx::PgPool, webhook: &WebhookRow) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE webhooks SET name = $1, color = $2, updated_at = NOW() WHERE id = $3")
        .bind(&webhook.name)
        .bind(&webhook.color)
        .bind(&webhook.id)
        .execute(db)
        .await?;
    Ok(())
}

pub async fn delete(db: &sqlx::PgPool, id: &WebhookId) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM webhooks WHERE id = $1")
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}
