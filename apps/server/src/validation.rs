//! Field validation shared by the REST handlers.

use std::sync::LazyLock;

use regex::Regex;
use tidepool_shared::constants::{
    MAX_CONTENT_LENGTH, MAX_EMBEDS_PER_MESSAGE, MAX_EMBED_DESCRIPTION_LENGTH,
    MAX_EMBED_FOOTER_LENGTH, MAX_EMBED_TITLE_LENGTH, MAX_IMAGE_BYTES, MAX_TEXT_FIELD_LENGTH,
    NAME_MAX_LENGTH, NAME_MIN_LENGTH,
};
use tidepool_shared::error::ChatError;
use tidepool_shared::models::{Embed, Status};

use crate::error::ServerError;

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("static regex"));
static EMAIL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("static regex")
});
static COLOR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#([0-9a-fA-F]{6})$").expect("static regex"));
static HTTP_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://\S+$").expect("static regex"));

/// Usernames, channel names, and emoji names share the same shape.
pub fn validate_name(name: &str, what: &str) -> Result<(), ServerError> {
    if name.len() < NAME_MIN_LENGTH || name.len() > NAME_MAX_LENGTH {
        return Err(ChatError::validation(format!(
            "{what} must be between {NAME_MIN_LENGTH} and {NAME_MAX_LENGTH} characters"
        ))
        .into());
    }
    if !NAME_RE.is_match(name) {
        return Err(ChatError::validation(format!(
            "{what} must only contain letters, numbers, underscores, and hyphens"
        ))
        .into());
    }
    Ok(())
}

pub fn validate_email(email: &str) -> Result<(), ServerError> {
    if !EMAIL_RE.is_match(email) {
        return Err(ChatError::validation("Invalid email address").into());
    }
    Ok(())
}

pub fn validate_color(color: &str, what: &str) -> Result<(), ServerError> {
    if !COLOR_RE.is_match(color) {
        return Err(ChatError::validation(format!("Invalid {what}")).into());
    }
    Ok(())
}

pub fn validate_status(status: Status) -> Result<(), ServerError> {
    // `offline` is derived from presence, never a default
    if status == Status::Offline {
        return Err(ChatError::validation("Invalid default status").into());
    }
    Ok(())
}

pub fn validate_bio(bio: &str) -> Result<(), ServerError> {
    if bio.len() > MAX_TEXT_FIELD_LENGTH {
        return Err(ChatError::validation(format!(
            "Bio must be less than {MAX_TEXT_FIELD_LENGTH} characters"
        ))
        .into());
    }
    Ok(())
}

pub fn validate_topic(topic: &str) -> Result<(), ServerError> {
    if topic.len() > MAX_TEXT_FIELD_LENGTH {
        return Err(ChatError::validation(format!(
            "Topic must be less than {MAX_TEXT_FIELD_LENGTH} characters"
        ))
        .into());
    }
    Ok(())
}

/// Trim and validate message content. Returns the trimmed content.
pub fn validate_content(content: &str) -> Result<String, ServerError> {
    let trimmed = content.trim().to_string();
    if trimmed.is_empty() {
        return Err(ChatError::validation("Content must be at least 1 character").into());
    }
    if trimmed.len() > MAX_CONTENT_LENGTH {
        return Err(ChatError::validation(format!(
            "Content must be less than {MAX_CONTENT_LENGTH} characters"
        ))
        .into());
    }
    Ok(trimmed)
}

pub fn validate_embeds(embeds: &[Embed]) -> Result<(), ServerError> {
    if embeds.len() > MAX_EMBEDS_PER_MESSAGE {
        return Err(ChatError::validation(format!(
            "You can only attach up to {MAX_EMBEDS_PER_MESSAGE} embeds at a time"
        ))
        .into());
    }
    for embed in embeds {
        if embed.title.as_deref().map_or(0, str::len) > MAX_EMBED_TITLE_LENGTH {
            return Err(ChatError::validation(format!(
                "Title must be less than {MAX_EMBED_TITLE_LENGTH} characters"
            ))
            .into());
        }
        if embed.description.as_deref().map_or(0, str::len) > MAX_EMBED_DESCRIPTION_LENGTH {
            return Err(ChatError::validation(format!(
                "Description must be less than {MAX_EMBED_DESCRIPTION_LENGTH} characters"
            ))
            .into());
        }
        if embed.footer.as_deref().map_or(0, str::len) > MAX_EMBED_FOOTER_LENGTH {
            return Err(ChatError::validation(format!(
                "Footer must be less than {MAX_EMBED_FOOTER_LENGTH} characters"
            ))
            .into());
        }
        if let Some(color) = &embed.color {
            validate_color(color, "color")?;
        }
        for (field, what) in [
            (&embed.image_url, "image URL"),
            (&embed.video_url, "video URL"),
            (&embed.audio_url, "audio URL"),
            (&embed.url, "URL"),
        ] {
            if let Some(url) = field {
                if !HTTP_URL_RE.is_match(url) {
                    return Err(ChatError::validation(format!("Invalid {what}")).into());
                }
            }
        }
    }
    Ok(())
}

/// Decode a `data:<mime>;base64,<payload>` image upload. Rejects non-image
/// and SVG mime types and payloads over the image size cap. Returns the mime
/// type and raw bytes.
pub fn decode_image_data_url(data_url: &str) -> Result<(String, Vec<u8>), ServerError> {
    use base64::Engine;

    let invalid = || ServerError(ChatError::validation("Invalid image"));

    let rest = data_url.strip_prefix("data:").ok_or_else(invalid)?;
    let (meta, payload) = rest.split_once(";base64,").ok_or_else(invalid)?;
    let mime_type = meta.trim().to_ascii_lowercase();

    if !mime_type.starts_with("image/") || mime_type.starts_with("image/svg") {
        return Err(ChatError::validation("Invalid image mime type").into());
    }

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|_| invalid())?;
    if bytes.len() > MAX_IMAGE_BYTES {
        return Err(ChatError::validation("Image must be less than 1MB").into());
    }
    Ok((mime_type, bytes))
}

/// Escape LIKE metacharacters (`%`, `_`, `\`) in a substring pattern.
pub fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_enforce_length_and_charset() {
        assert!(validate_name("lobby", "Name").is_ok());
        assert!(validate_name("ab", "Name").is_err());
        assert!(validate_name(&"a".repeat(33), "Name").is_err());
        assert!(validate_name("has space", "Name").is_err());
        assert!(validate_name("ok_name-1", "Name").is_ok());
    }

    #[test]
    fn email_shape_is_checked() {
        assert!(validate_email("a@x.io").is_ok());
        assert!(validate_email("not-an-email").is_err());
        assert!(validate_email("a@b").is_err());
    }

    #[test]
    fn colors_must_be_six_digit_hex() {
        assert!(validate_color("#aabbcc", "color").is_ok());
        assert!(validate_color("#fff", "color").is_err());
        assert!(validate_color("aabbcc", "color").is_err());
        assert!(validate_color("#aabbcg", "color").is_err());
    }

    #[test]
    fn offline_is_not_a_valid_default_status() {
        assert!(validate_status(Status::Offline).is_err());
        assert!(validate_status(Status::Invisible).is_ok());
    }

    #[test]
    fn content_is_trimmed_and_bounded() {
        assert_eq!(validate_content("  hi  ").unwrap(), "hi");
        assert!(validate_content("   ").is_err());
        assert!(validate_content(&"x".repeat(4001)).is_err());
        assert!(validate_content(&"x".repeat(4000)).is_ok());
    }

    #[test]
    fn embed_caps_are_enforced() {
        let embeds = vec![Embed::default(); 11];
        assert!(validate_embeds(&embeds).is_err());

        let embed = Embed {
            title: Some("t".repeat(257)),
            ..Default::default()
        };
        assert!(validate_embeds(&[embed]).is_err());

        let embed = Embed {
            image_url: Some("ftp://example.com/x.png".into()),
            ..Default::default()
        };
        assert!(validate_embeds(&[embed]).is_err());

        let embed = Embed {
            title: Some("ok".into()),
            url: Some("https://example.com".into()),
            color: Some("#112233".into()),
            ..Default::default()
        };
        assert!(validate_embeds(&[embed]).is_ok());
    }

    #[test]
    fn data_url_decoding_accepts_small_images() {
        use base64::Engine;
        let payload = base64::engine::general_purpose::STANDARD.encode(b"png bytes");
        let (mime, bytes) = decode_image_data_url(&format!("data:image/png;base64,{payload}")).unwrap();
        assert_eq!(mime, "image/png");
        assert_eq!(bytes, b"png bytes");
    }

    #[test]
    fn data_url_decoding_rejects_bad_inputs() {
        use base64::Engine;
        assert!(decode_image_data_url("not a data url").is_err());
        assert!(decode_image_data_url("data:text/plain;base64,aGk=").is_err());
        assert!(decode_image_data_url("data:image/svg+xml;base64,aGk=").is_err());
        assert!(decode_image_data_url("data:image/png;base64,@@@").is_err());

        let big = base64::engine::general_purpose::STANDARD.encode(vec![0u8; MAX_IMAGE_BYTES + 1]);
        assert!(decode_image_data_url(&format!("data:image/png;base64,{big}")).is_err());
    }

    #[test]
    fn escape_like_escapes_metacharacters() {
        assert_eq!(escape_like("100%"), "100\\%");
        assert_eq!(escape_like("a_b"), "a\\_b");
        assert_eq!(escape_like("a\\b"), "a\\\\b");
        assert_eq!(escape_like("plain"), "plain");
    }
}
