//! Serialization-boundary projections.
//!
//! Domain rows store only ids; the wire shapes expand attachments and merge
//! the split embed lists, so clients never chase references.

use std::collections::HashMap;

use tidepool_shared::ids::UserId;
use tidepool_shared::models::Message;

use crate::store::files::{self, FileRow};
use crate::store::messages::MessageRow;

/// Pure projection given a preloaded file map. Missing file rows are simply
/// skipped rather than failing the whole message.
pub fn project_message(row: &MessageRow, files_by_id: &HashMap<String, FileRow>) -> Message {
    let mut embeds = row.user_embeds.0.clone();
    embeds.extend(row.system_embeds.0.iter().cloned());

    let files = row
        .file_ids
        .iter()
        .filter_map(|id| files_by_id.get(id))
        .map(FileRow::to_meta)
        .collect();

    Message {
        id: row.id.clone(),
        message_type: row.message_type,
        channel_id: row.channel_id.clone(),
        author_id: row.author_id.clone(),
        content: row.content.clone(),
        nonce: row.nonce.clone(),
        files,
        embeds,
        mentions: row.mentions.iter().cloned().map(UserId::from).collect(),
        author: row.author.clone().map(|json| json.0),
        created_at: row.created_at,
        updated_at: row.updated_at,
    }
}

pub async fn message_to_api(
    db: &sqlx::PgPool,
    row: &MessageRow,
) -> Result<Message, sqlx::Error> {
    let files_by_id = load_files(db, std::slice::from_ref(row)).await?;
    Ok(project_message(row, &files_by_id))
}

/// Batch projection with one file fetch for the whole page.
pub async fn messages_to_api(
    db: &sqlx::PgPool,
    rows: &[MessageRow],
) -> Result<Vec<Message>, sqlx::Error> {
    let files_by_id = load_files(db, rows).await?;
    Ok(rows
        .iter()
        .map(|row| project_message(row, &files_by_id))
        .collect())
}

async fn load_files(
    db: &sqlx::PgPool,
    rows: &[MessageRow],
) -> Result<HashMap<String, FileRow>, sqlx::Error> {
    let mut ids: Vec<String> = rows.iter().flat_map(|r| r.file_ids.clone()).collect();
    ids.sort();
    ids.dedup();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows = files::find_by_ids(db, &ids).await?;
    Ok(rows
        .into_iter()
        .map(|row| (row.id.as_str().to_string(), row))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sqlx::types::Json;
    use tidepool_shared::ids::{ChannelId, FileId, MessageId};
    use tidepool_shared::models::{Embed, MessageType};

    fn file_row(id: &str) -> FileRow {
        FileRow {
            id: FileId::from(id),
            owner_id: UserId::from("u123456789"),
            name: "pic.png".into(),
            mime_type: "image/png".into(),
            size: 1234,
            key: format!("staging/uploads/u123456789/{id}/pic.png"),
            url: format!("https://cdn.example.com/{id}"),
            uploaded: true,
            created_at: Utc::now(),
            uploaded_at: Some(Utc::now()),
        }
    }

    fn message_row() -> MessageRow {
        MessageRow {
            id: MessageId::from("m123456789"),
            channel_id: ChannelId::from("c123456789"),
            author_id: UserId::from("u123456789"),
            message_type: MessageType::Default,
            content: Some("hi".into()),
            nonce: None,
            file_ids: vec!["f000000001".into(), "f0000gone0".into()],
            mentions: vec!["u0000000bob".into()],
            user_embeds: Json(vec![Embed {
                title: Some("user".into()),
                ..Default::default()
            }]),
            system_embeds: Json(vec![Embed {
                title: Some("system".into()),
                ..Default::default()
            }]),
            author: None,
            created_at: Utc::now(),
            updated_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn embeds_merge_user_before_system() {
        let row = message_row();
        let api = project_message(&row, &HashMap::new());
        let titles: Vec<_> = api.embeds.iter().filter_map(|e| e.title.as_deref()).collect();
        assert_eq!(titles, vec!["user", "system"]);
    }

    #[test]
    fn files_expand_and_missing_ids_are_skipped() {
        let row = message_row();
        let mut files = HashMap::new();
        files.insert("f000000001".to_string(), file_row("f000000001"));
        let api = project_message(&row, &files);
        assert_eq!(api.files.len(), 1);
        assert_eq!(api.files[0].id.as_str(), "f000000001");
        assert_eq!(api.files[0].size, 1234);
    }

    #[test]
    fn mentions_become_typed_ids() {
        let row = message_row();
        let api = project_message(&row, &HashMap::new());
        assert_eq!(api.mentions, vec![UserId::from("u0000000bob")]);
    }
}
