/// Minimum length for usernames, channel names, and emoji names.
pub const NAME_MIN_LENGTH: usize = 3;
/// Maximum length for usernames, channel names, and emoji names.
pub const NAME_MAX_LENGTH: usize = 32;
/// Maximum length for bios and channel topics.
pub const MAX_TEXT_FIELD_LENGTH: usize = 1000;
/// Maximum message content length after trimming.
pub const MAX_CONTENT_LENGTH: usize = 4000;
/// Maximum client-supplied nonce length.
pub const MAX_NONCE_LENGTH: usize = 100;
/// Maximum number of file attachments per message.
pub const MAX_FILES_PER_MESSAGE: usize = 10;
/// Maximum number of user-supplied embeds per message.
pub const MAX_EMBEDS_PER_MESSAGE: usize = 10;
/// Maximum resolved mentions stored on a message.
pub const MAX_MENTIONS_PER_MESSAGE: usize = 25;
/// Maximum embed title length.
pub const MAX_EMBED_TITLE_LENGTH: usize = 256;
/// Maximum embed description length.
pub const MAX_EMBED_DESCRIPTION_LENGTH: usize = 4096;
/// Maximum embed footer length.
pub const MAX_EMBED_FOOTER_LENGTH: usize = 256;
/// Maximum decoded size for data-URL image uploads (avatars, emojis).
pub const MAX_IMAGE_BYTES: usize = 1_000_000;
