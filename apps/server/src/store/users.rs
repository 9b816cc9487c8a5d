use chrono::{DateTime, Utc};
use tidepool_shared::ids::UserId;
use tidepool_shared::models::{Author, Status, User, UserFlags};

const USER_COLUMNS: &str = "id, username, password, token, email, default_status, color, \
     background_color, avatar_url, bio, flags, verified, verification_code, bytes, \
     created_at, updated_at";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: UserId,
    pub username: String,
    pub password: String,
    pub token: String,
    pub email: String,
    pub default_status: Status,
    pub color: Option<String>,
    pub background_color: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub flags: i64,
    pub verified: bool,
    pub verification_code: Option<String>,
    pub bytes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRow {
    pub fn flags(&self) -> UserFlags {
        UserFlags::from_bits_truncate(self.flags as u32)
    }

    /// Size of the user's own record counted against the byte quota.
    pub fn self_bytes(&self) -> i64 {
        (self.username.len()
            + self.id.as_str().len()
            + self.bio.as_deref().map_or(0, str::len)
            + self.background_color.as_deref().map_or(0, str::len)
            + self.color.as_deref().map_or(0, str::len)) as i64
    }

    /// Public projection with the given derived status.
    pub fn to_author(&self, status: Status) -> Author {
        Author {
            id: self.id.clone(),
            username: self.username.clone(),
            avatar_url: self.avatar_url.clone(),
            bio: self.bio.clone(),
            color: self.color.clone(),
            background_color: self.background_color.clone(),
            status,
            flags: self.flags(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Private projection. The token is included only when `keep_token`.
    pub fn to_user(&self, status: Status, keep_token: bool) -> User {
        User {
            author: self.to_author(status),
            email: self.email.clone(),
            token: keep_token.then(|| self.token.clone()),
            default_status: self.default_status,
            verified: self.verified,
            bytes: self.bytes,
        }
    }
}

pub struct NewUser {
    pub id: UserId,
    pub username: String,
    pub password: String,
    pub token: String,
    pub email: String,
    pub verification_code: String,
    pub bytes: i64,
}

pub async fn create(db: &sqlx::PgPool, user: &NewUser) -> Result<UserRow, sqlx::Error> {
    sqlx::query_as(&format!(
        "INSERT INTO users (id, username, password, token, email, verification_code, bytes) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {USER_COLUMNS}"
    ))
    .bind(&user.id)
    .bind(&user.username)
    .bind(&user.password)
    .bind(&user.token)
    .bind(&user.email)
    .bind(&user.verification_code)
    .bind(user.bytes)
    .fetch_one(db)
    .await
}

pub async fn find_by_id(db: &sqlx::PgPool, id: &UserId) -> Result<Option<UserRow>, sqlx::Error> {
    sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(id)
        .fetch_optional(db)
        .await
}

pub async fn find_by_token(db: &sqlx::PgPool, token: &str) -> Result<Option<UserRow>, sqlx::Error> {
    sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE token = $1"))
        .bind(token)
        .fetch_optional(db)
        .await
}

/// Look up by username or email (callers lowercase the input first).
pub async fn find_by_login(db: &sqlx::PgPool, login: &str) -> Result<Option<UserRow>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE username = $1 OR email = $1"
    ))
    .bind(login)
    .fetch_optional(db)
    .await
}

pub async fn find_by_usernames(
    db: &sqlx::PgPool,
    usernames: &[String],
) -> Result<Vec<UserRow>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE username = ANY($1)"
    ))
    .bind(usernames)
    .fetch_all(db)
    .await
}

pub async fn find_by_ids(db: &sqlx::PgPool, ids: &[String]) -> Result<Vec<UserRow>, sqlx::Error> {
    sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ANY($1)"))
        .bind(ids)
        .fetch_all(db)
        .await
}

pub async fn list_all(db: &sqlx::PgPool) -> Result<Vec<UserRow>, sqlx::Error> {
    sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users")).fetch_all(db).await
}

pub async fn username_taken(db: &sqlx::PgPool, username: &str) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE username = $1")
        .bind(username)
        .fetch_one(db)
        .await?;
    Ok(count > 0)
}

pub async fn email_taken(db: &sqlx::PgPool, email: &str) -> Result<bool, sqlx::Error> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = $1")
        .bind(email)
        .fetch_one(db)
        .await?;
    Ok(count > 0)
}

/// Persist the editable profile fields of an in-memory row.
pub async fn save_profile(db: &sqlx::PgPool, user: &UserRow) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE users SET username = $1, email = $2, default_status = $3, bio = $4, \
         color = $5, background_color = $6, updated_at = NOW() WHERE id = $7",
    )
    .bind(&user.username)
    .bind(&user.email)
    .bind(user.default_status)
    .bind(&user.bio)
    .bind(&user.color)
    .bind(&user.background_color)
    .bind(&user.id)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn set_avatar_url(
    db: &sqlx::PgPool,
    id: &UserId,
    avatar_url: Option<&str>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET avatar_url = $1, updated_at = NOW() WHERE id = $2")
        .bind(avatar_url)
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

/// Flip `verified` if the code matches. Returns whether a row changed.
pub async fn verify_with_code(db: &sqlx::PgPool, code: &str) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE users SET verified = TRUE, verification_code = NULL, updated_at = NOW() \
         WHERE verification_code = $1",
    )
    .bind(code)
    .execute(db)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Atomic in-place increment of the byte quota accumulator.
pub async fn inc_bytes(db: &sqlx::PgPool, id: &UserId, delta: i64) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET bytes = bytes + $1 WHERE id = $2")
        .bind(delta)
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}

/// Fire-and-forget byte accounting; failures are logged, never surfaced.
pub fn spawn_inc_bytes(db: sqlx::PgPool, id: UserId, delta: i64) {
    if delta == 0 {
        return;
    }
    tokio::spawn(async move {
        if let Err(e) = inc_bytes(&db, &id, delta).await {
            tracing::error!(user_id = %id, delta, error = %e, "byte accounting failed");
        }
    });
}
