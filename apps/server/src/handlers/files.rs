use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tidepool_shared::error::ChatError;
use tidepool_shared::ids::FileId;
use tidepool_shared::models::FileMeta;

use crate::error::{db_err, ServerError};
use crate::extractors::auth::AuthUser;
use crate::state::AppState;
use crate::store::files::{self, FileRow, NewFile};

/// Strip path separators and control characters from a client filename.
fn sanitize_filename(name: &str) -> String {
    let last = name.replace('\\', "/");
    let last = last.rsplit('/').next().unwrap_or("file");
    let cleaned: String = last
        .chars()
        .filter(|c| c.is_ascii() && !c.is_ascii_control())
        .collect();
    let cleaned = cleaned.trim();
    let truncated: String = cleaned.chars().take(200).collect();
    if truncated.is_empty() {
        "file".to_string()
    } else {
        truncated
    }
}

/// Cache-busting public URL: early 404s (fetches racing the upload) must not
/// stick in a CDN cache.
fn versioned_url(state: &AppState, file: &FileRow) -> String {
    let ts = file
        .uploaded_at
        .unwrap_or(file.created_at)
        .timestamp_millis();
    format!("{}?v={ts}", state.storage.public_url(&file.key))
}

#[derive(Debug, Deserialize)]
pub struct PresignEntry {
    pub name: Option<String>,
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: i64,
}

#[derive(Debug, Deserialize)]
pub struct PresignRequest {
    pub files: Vec<PresignEntry>,
}

#[derive(Debug, Serialize)]
pub struct PresignResponse {
    pub file: FileMeta,
    pub upload_url: String,
    pub method: String,
}

/// POST /v1/files/presign — create pending file records and hand back
/// presigned PUT URLs for direct-to-store uploads.
pub async fn presign_files(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<PresignRequest>,
) -> Result<Json<Vec<PresignResponse>>, ServerError> {
    if body.files.is_empty() {
        return Err(ChatError::validation("files is required").into());
    }
    if body.files.len() > state.config.limits.max_files_per_message {
        return Err(ChatError::validation("Too many files").into());
    }

    let mut out = Vec::with_capacity(body.files.len());
    for entry in body.files {
        let name = sanitize_filename(entry.name.as_deref().unwrap_or("file"));
        let mime_type = entry
            .mime_type
            .unwrap_or_else(|| "application/octet-stream".to_string());

        if entry.size <= 0 {
            return Err(ChatError::validation("Invalid file size").into());
        }
        if entry.size as u64 > state.config.limits.max_upload_size_bytes {
            return Err(ChatError::validation("File too large").into());
        }

        let file_id = FileId::new();
        let key = format!(
            "{}/uploads/{}/{}/{}",
            state.config.env, auth.user.id, file_id, name
        );
        let upload = state.storage.presign_put(&key).await?;
        let public_url = state.storage.public_url(&key);

        let stored = files::create(
            &state.db,
            &NewFile {
                id: file_id,
                owner_id: auth.user.id.clone(),
                name,
                mime_type,
                size: entry.size,
                key,
                url: public_url,
            },
        )
        .await
        .map_err(db_err)?;

        out.push(PresignResponse {
            file: stored.to_meta(),
            upload_url: upload.url,
            method: upload.method.to_string(),
        });
    }
    Ok(Json(out))
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub file_ids: Vec<String>,
}

/// POST /v1/files/complete — verify each upload against the object store
/// (HEAD size must match the declared size) and flip `uploaded` exactly once.
pub async fn complete_files(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(body): Json<CompleteRequest>,
) -> Result<Json<Vec<FileMeta>>, ServerError> {
    if body.file_ids.is_empty() {
        return Err(ChatError::validation("file_ids is required").into());
    }

    let rows = files::find_owned(&state.db, &body.file_ids, &auth.user.id)
        .await
        .map_err(db_err)?;
    if rows.len() != body.file_ids.len() {
        return Err(ChatError::NotFound.into());
    }

    let mut completed = Vec::with_capacity(rows.len());
    for mut file in rows {
        if file.uploaded {
            // idempotent completion: refresh the versioned url only
            let url = versioned_url(&state, &file);
            files::set_url(&state.db, &file.id, &url)
                .await
                .map_err(db_err)?;
            file.url = url;
            completed.push(file.to_meta());
            continue;
        }

        let remote_size = state
            .storage
            .head_size(&file.key)
            .await
            .map_err(|_| ServerError(ChatError::validation("Upload not found")))?;
        if remote_size != file.size as u64 {
            return Err(ChatError::validation("Upload size mismatch").into());
        }

        let uploaded_at = Utc::now();
        file.uploaded_at = Some(uploaded_at);
        let url = versioned_url(&state, &file);
        files::mark_uploaded(&state.db, &file.id, uploaded_at, &url)
            .await
            .map_err(db_err)?;
        file.uploaded = true;
        file.url = url;
        completed.push(file.to_meta());
    }

    Ok(Json(completed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filenames_lose_paths_and_control_chars() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("C:\\temp\\pic.png"), "pic.png");
        assert_eq!(sanitize_filename("a\x07b.png"), "ab.png");
        assert_eq!(sanitize_filename("  spaced.png  "), "spaced.png");
    }

    #[test]
    fn empty_filenames_fall_back() {
        assert_eq!(sanitize_filename(""), "file");
        assert_eq!(sanitize_filename("///"), "file");
        assert_eq!(sanitize_filename("\x01\x02"), "file");
    }

    #[test]
    fn long_filenames_are_truncated() {
        let long = "a".repeat(500);
        assert_eq!(sanitize_filename(&long).len(), 200);
    }

    #[test]
    fn presign_entry_defaults() {
        let entry: PresignEntry = serde_json::from_str("{\"name\":\"a.png\"}").unwrap();
        assert_eq!(entry.size, 0);
        assert!(entry.mime_type.is_none());
    }
}
