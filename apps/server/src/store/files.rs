use chrono::{DateTime, Utc};
use tidepool_shared::ids::{FileId, UserId};
use tidepool_shared::models::FileMeta;

const FILE_COLUMNS: &str =
    "id, owner_id, name, mime_type, size, key, url, uploaded, created_at, uploaded_at";

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct FileRow {
    pub id: FileId,
    pub owner_id: UserId,
    pub name: String,
    pub mime_type: String,
    pub size: i64,
    pub key: String,
    pub url: String,
    pub uploaded: bool,
    pub created_at: DateTime<Utc>,
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl FileRow {
    pub fn to_meta(&self) -> FileMeta {
        FileMeta {
            id: self.id.clone(),
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            size: self.size,
            url: self.url.clone(),
        }
    }
}

pub struct NewFile {
    pub id: FileId,
    pub owner_id: UserId,
    pub name: String,
    pub mime_type: String,
    pub size: i64,
    pub key: String,
    pub url: String,
}

pub async fn create(db: &sqlx::PgPool, file: &NewFile) -> Result<FileRow, sqlx::Error> {
    sqlx::query_as(&format!(
        "INSERT INTO files (id, owner_id, name, mime_type, size, key, url) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {FILE_COLUMNS}"
    ))
    .bind(&file.id)
    .bind(&file.owner_id)
    .bind(&file.name)
    .bind(&file.mime_type)
    .bind(file.size)
    .bind(&file.key)
    .bind(&file.url)
    .fetch_one(db)
    .await
}

pub async fn find_by_ids(db: &sqlx::PgPool, ids: &[String]) -> Result<Vec<FileRow>, sqlx::Error> {
    sqlx::query_as(&format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ANY($1)"))
        .bind(ids)
        .fetch_all(db)
        .await
}

pub async fn find_owned(
    db: &sqlx::PgPool,
    ids: &[String],
    owner_id: &UserId,
) -> Result<Vec<FileRow>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {FILE_COLUMNS} FROM files WHERE id = ANY($1) AND owner_id = $2"
    ))
    .bind(ids)
    .bind(owner_id)
    .fetch_all(db)
    .await
}

/// Files eligible for binding to a message: owned by the author and fully
/// uploaded.
pub async fn find_owned_uploaded(
    db: &sqlx::PgPool,
    ids: &[String],
    owner_id: &UserId,
) -> Result<Vec<FileRow>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {FILE_COLUMNS} FROM files WHERE id = ANY($1) AND owner_id = $2 AND uploaded"
    ))
    .bind(ids)
    .bind(owner_id)
    .fetch_all(db)
    .await
}

/// The `uploaded` flag flips false → true exactly once, when the remote HEAD
/// has confirmed the size.
pub async fn mark_uploaded(
    db: &sqlx::PgPool,
    id: &FileId,
    uploaded_at: DateTime<Utc>,
    url: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE files SET uploaded = TRUE, uploaded_at = $1, url = $2 \
         WHERE id = $3 AND NOT uploaded",
    )
    .bind(uploaded_at)
    .bind(url)
    .bind(id)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn set_url(db: &sqlx::PgPool, id: &FileId, url: &str) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE files SET url = $1 WHERE id = $2")
        .bind(url)
        .bind(id)
        .execute(db)
        .await?;
    Ok(())
}
