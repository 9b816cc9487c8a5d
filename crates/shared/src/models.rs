//! API projection models.
//!
//! These are the shapes that cross the wire: REST responses and event
//! payloads. Domain rows keep only ids; cyclic references (message → author →
//! …) are flattened here at the serialization boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ChannelId, EmojiId, FileId, InviteId, MessageId, UserId, WebhookId};
use crate::time::{iso8601, iso8601_option};

// ─── Enums ───────────────────────────────────────────────────

/// Online status of a user. `Offline` is derived from presence and never
/// stored as a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "user_status", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Online,
    Away,
    Dnd,
    Invisible,
    Offline,
}

impl Default for Status {
    fn default() -> Self {
        Self::Online
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "message_type", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Default,
    Join,
    Leave,
}

impl Default for MessageType {
    fn default() -> Self {
        Self::Default
    }
}

// ─── User flags ──────────────────────────────────────────────

bitflags::bitflags! {
    /// User flag bit set, serialized as an integer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UserFlags: u32 {
        const ADMIN = 1 << 0;
        /// Set on the synthetic authors attached to webhook-created messages.
        /// Consumers must not resolve `author_id` as a user when present.
        const WEBHOOK = 1 << 1;
    }
}

impl Serialize for UserFlags {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for UserFlags {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let bits = u32::deserialize(d)?;
        Ok(UserFlags::from_bits_truncate(bits))
    }
}

// ─── Author / User ───────────────────────────────────────────

/// Public projection of a user, embedded in events and member lists.
/// `status` is derived from presence at projection time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: UserId,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    pub status: Status,
    #[serde(default)]
    pub flags: UserFlags,
    #[serde(with = "iso8601")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "iso8601")]
    pub updated_at: DateTime<Utc>,
}

/// Private projection of a user, returned only to the user themself.
/// Password and verification code never leave the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    #[serde(flatten)]
    pub author: Author,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub default_status: Status,
    pub verified: bool,
    pub bytes: i64,
}

// ─── Channel ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    pub topic: String,
    pub author_id: UserId,
    pub private: bool,
    #[serde(default, with = "iso8601_option", skip_serializing_if = "Option::is_none")]
    pub last_message_at: Option<DateTime<Utc>>,
    #[serde(with = "iso8601")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "iso8601")]
    pub updated_at: DateTime<Utc>,
}

// ─── Embeds and files ────────────────────────────────────────

/// A rich content block attached to a message, either supplied by the client
/// (or a webhook) or extracted by the unfurler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub footer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

impl Embed {
    /// An embed with no title, description, image, footer, or media is an
    /// empty shell and must not be attached to a message.
    pub fn is_empty_shell(&self) -> bool {
        self.title.is_none()
            && self.description.is_none()
            && self.image_url.is_none()
            && self.video_url.is_none()
            && self.audio_url.is_none()
            && self.footer.is_none()
    }
}

/// Public projection of an uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMeta {
    pub id: FileId,
    pub name: String,
    pub mime_type: String,
    pub size: i64,
    pub url: String,
}

// ─── Message ─────────────────────────────────────────────────

/// Wire projection of a message. `embeds` is the concatenation of user and
/// system embeds; `files` is the expanded attachment list; `author` is only
/// present for webhook-authored messages (synthetic, `flags.WEBHOOK` set).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    #[serde(rename = "type", default)]
    pub message_type: MessageType,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default)]
    pub files: Vec<FileMeta>,
    #[serde(default)]
    pub embeds: Vec<Embed>,
    #[serde(default)]
    pub mentions: Vec<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    #[serde(with = "iso8601")]
    pub created_at: DateTime<Utc>,
    #[serde(default, with = "iso8601_option", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

// ─── Invites, webhooks, emojis ───────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelInvite {
    pub id: InviteId,
    pub code: String,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    #[serde(default, with = "iso8601_option", skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_uses: Option<i32>,
    pub uses: i32,
    #[serde(with = "iso8601")]
    pub created_at: DateTime<Utc>,
}

/// Webhook projection. `secret` is only populated for the owner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Webhook {
    pub id: WebhookId,
    pub channel_id: ChannelId,
    pub owner_id: UserId,
    pub name: String,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(with = "iso8601")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emoji {
    pub id: EmojiId,
    pub owner_id: UserId,
    pub name: String,
    pub animated: bool,
    pub url: String,
}
