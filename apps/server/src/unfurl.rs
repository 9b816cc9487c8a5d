//! URL unfurler: turns links in message content into system embeds.
//!
//! Runs off the request path. URLs are extracted and trimmed, fetched
//! concurrently through a shared bounded client, sniffed, and parsed; if the
//! resulting embeds differ from what the message already carries, the message
//! is updated and a `message_updated` event is published.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT_ENCODING, CONTENT_TYPE};
use reqwest::Url;
use scraper::{Html, Selector};
use sqlx::types::Json;
use tidepool_shared::error::ChatError;
use tidepool_shared::events::Event;
use tidepool_shared::models::Embed;

use crate::projection;
use crate::state::AppState;
use crate::store::messages::{self, MessageRow};

const USER_AGENT: &str = "tidepool/1.0";
/// Most embeds per message; bounds outbound fetch fan-out.
const MAX_URLS: usize = 5;
/// Bytes read before deciding what the body is.
const SNIFF_WINDOW: usize = 24 * 1024;
/// Hard cap on HTML bodies.
const MAX_HTML_BYTES: usize = 512 * 1024;

static URL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"https?://\S+").expect("static regex"));

pub struct Unfurler {
    client: reqwest::Client,
    /// Hosts whose invite links are never unfurled (our own frontends).
    internal_hosts: Vec<String>,
}

impl Unfurler {
    pub fn new(internal_hosts: Vec<String>) -> Result<Self, reqwest::Error> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT_ENCODING, HeaderValue::from_static("identity"));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(8))
            .connect_timeout(Duration::from_secs(3))
            .read_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(10)
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            internal_hosts,
        })
    }

    /// Candidate URLs: extracted, trimmed, internal invite links dropped,
    /// deduped in order, capped.
    pub fn extract_urls(&self, content: &str) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for m in URL_RE.find_iter(content) {
            let url = trim_url(m.as_str());
            if url.is_empty() || self.is_internal_invite(url) {
                continue;
            }
            if !out.iter().any(|existing| existing == url) {
                out.push(url.to_string());
            }
            if out.len() == MAX_URLS {
                break;
            }
        }
        out
    }

    fn is_internal_invite(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        self.internal_hosts.iter().any(|h| h == host) && parsed.path().contains("/invite")
    }

    /// Fetch every URL concurrently and keep the embeds that came out
    /// non-empty. Failures are swallowed per URL.
    pub async fn collect_embeds(&self, content: &str) -> Vec<Embed> {
        let urls = self.extract_urls(content);
        let fetches = urls.iter().map(|url| self.fetch_embed(url));
        futures::future::join_all(fetches)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    async fn fetch_embed(&self, url: &str) -> Option<Embed> {
        match self.try_fetch_embed(url).await {
            Ok(embed) => embed.filter(|e| !e.is_empty_shell()),
            Err(e) => {
                tracing::debug!(url, error = %e, "unfurl fetch failed");
                None
            }
        }
    }

    async fn try_fetch_embed(&self, url: &str) -> Result<Option<Embed>, reqwest::Error> {
        let mut response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Ok(None);
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
            .unwrap_or_default();
        let final_url = response.url().clone();

        if let Some(kind) = MediaKind::from_content_type(&content_type) {
            // no download beyond the sniff for declared media
            return Ok(Some(kind.to_embed(final_url.as_str())));
        }

        let mut body: Vec<u8> = Vec::new();
        if content_type == "text/html" || content_type == "application/xhtml+xml" {
            read_up_to(&mut response, &mut body, MAX_HTML_BYTES).await?;
            let html = String::from_utf8_lossy(&body);
            return Ok(Some(extract_html_embed(&html, &final_url)));
        }

        // Unknown content type: sniff a window of the body.
        read_up_to(&mut response, &mut body, SNIFF_WINDOW).await?;
        if let Some(kind) = MediaKind::sniff(&body) {
            return Ok(Some(kind.to_embed(final_url.as_str())));
        }
        if looks_like_html(&body) {
            read_up_to(&mut response, &mut body, MAX_HTML_BYTES).await?;
            let html = String::from_utf8_lossy(&body);
            return Ok(Some(extract_html_embed(&html, &final_url)));
        }
        Ok(None)
    }
}

async fn read_up_to(
    response: &mut reqwest::Response,
    buf: &mut Vec<u8>,
    limit: usize,
) -> Result<(), reqwest::Error> {
    while buf.len() < limit {
        match response.chunk().await? {
            Some(chunk) => buf.extend_from_slice(&chunk),
            None => break,
        }
    }
    Ok(())
}

/// Strip trailing punctuation and unmatched closing brackets that message
/// text tends to glue onto links.
fn trim_url(mut url: &str) -> &str {
    loop {
        let Some(last) = url.chars().next_back() else {
            return url;
        };
        let strip = match last {
            '.' | ',' | ';' | ':' | '!' | '?' | '\'' | '"' => true,
            ')' => url.matches(')').count() > url.matches('(').count(),
            ']' => url.matches(']').count() > url.matches('[').count(),
            '}' => url.matches('}').count() > url.matches('{').count(),
            '>' => url.matches('>').count() > url.matches('<').count(),
            _ => false,
        };
        if !strip {
            return url;
        }
        url = &url[..url.len() - last.len_utf8()];
    }
}

// ─── Media sniffing ─────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaKind {
    Image,
    Video,
    Audio,
}

impl MediaKind {
    fn from_content_type(content_type: &str) -> Option<Self> {
        if content_type.starts_with("image/") {
            Some(Self::Image)
        } else if content_type.starts_with("video/") {
            Some(Self::Video)
        } else if content_type.starts_with("audio/") {
            Some(Self::Audio)
        } else {
            None
        }
    }

    /// Magic-byte detection over the sniff window.
    fn sniff(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"\x89PNG\r\n\x1a\n")
            || bytes.starts_with(b"\xff\xd8\xff")
            || bytes.starts_with(b"GIF87a")
            || bytes.starts_with(b"GIF89a")
            || (bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WEBP"))
        {
            return Some(Self::Image);
        }
        if bytes.get(4..8) == Some(b"ftyp") || bytes.starts_with(b"\x1aE\xdf\xa3") {
            return Some(Self::Video);
        }
        if bytes.starts_with(b"OggS")
            || (bytes.starts_with(b"RIFF") && bytes.get(8..12) == Some(b"WAVE"))
            || bytes.starts_with(b"fLaC")
            || bytes.starts_with(b"ID3")
            || is_mpeg_audio_sync(bytes)
        {
            return Some(Self::Audio);
        }
        None
    }

    fn to_embed(self, url: &str) -> Embed {
        let mut embed = Embed {
            url: Some(url.to_string()),
            ..Default::default()
        };
        match self {
            Self::Image => embed.image_url = Some(url.to_string()),
            Self::Video => embed.video_url = Some(url.to_string()),
            Self::Audio => embed.audio_url = Some(url.to_string()),
        }
        embed
    }
}

/// MP3 frame sync (0xFFE) or AAC ADTS (0xFFF).
fn is_mpeg_audio_sync(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0xff && (bytes[1] & 0xe0) == 0xe0
}

fn looks_like_html(bytes: &[u8]) -> bool {
    let prefix = String::from_utf8_lossy(&bytes[..bytes.len().min(1024)]);
    let trimmed = prefix.trim_start_matches('\u{feff}').trim_start();
    let lower = trimmed.to_ascii_lowercase();
    lower.starts_with("<!doctype html")
        || lower.starts_with("<html")
        || lower.starts_with("<head")
        || lower.starts_with("<meta")
}

// ─── HTML extraction ────────────────────────────────────────

fn select_attr(doc: &Html, selector: &str, attr: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel)
        .find_map(|el| el.value().attr(attr))
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn select_text(doc: &Html, selector: &str) -> Option<String> {
    let sel = Selector::parse(selector).ok()?;
    doc.select(&sel)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .find(|v| !v.is_empty())
}

/// Expand `#fff` shorthand and keep only well-formed hex colors.
fn normalize_theme_color(raw: &str) -> Option<String> {
    let raw = raw.trim();
    let hex = raw.strip_prefix('#')?;
    if hex.len() == 3 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        let expanded: String = hex.chars().flat_map(|c| [c, c]).collect();
        return Some(format!("#{}", expanded.to_ascii_lowercase()));
    }
    if hex.len() == 6 && hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Some(format!("#{}", hex.to_ascii_lowercase()));
    }
    None
}

/// Pull OpenGraph metadata (with plain-HTML fallbacks) out of a page.
fn extract_html_embed(html: &str, final_url: &Url) -> Embed {
    let doc = Html::parse_document(html);

    let title = select_attr(&doc, "meta[property=\"og:title\"]", "content")
        .or_else(|| select_text(&doc, "title"));
    let description = select_attr(&doc, "meta[property=\"og:description\"]", "content")
        .or_else(|| select_attr(&doc, "meta[name=\"description\"]", "content"));
    let image_url = select_attr(&doc, "meta[property=\"og:image\"]", "content")
        .and_then(|img| final_url.join(&img).ok())
        .map(|u| u.to_string());
    let url = select_attr(&doc, "meta[property=\"og:url\"]", "content")
        .or_else(|| select_attr(&doc, "link[rel=\"canonical\"]", "href"))
        .unwrap_or_else(|| final_url.to_string());
    let footer = select_attr(&doc, "meta[property=\"og:site_name\"]", "content");
    let color = select_attr(&doc, "meta[name=\"theme-color\"]", "content")
        .and_then(|c| normalize_theme_color(&c));

    Embed {
        title,
        description,
        image_url,
        video_url: None,
        audio_url: None,
        url: Some(url),
        footer,
        color,
    }
}

// ─── Message enrichment ─────────────────────────────────────

/// Fire-and-forget unfurl of a freshly created or edited message.
pub fn spawn_unfurl(state: AppState, message: MessageRow) {
    tokio::spawn(async move {
        let message_id = message.id.clone();
        if let Err(e) = unfurl_message(&state, message).await {
            tracing::warn!(message_id = %message_id, error = %e, "unfurl failed");
        }
    });
}

async fn unfurl_message(state: &AppState, mut message: MessageRow) -> Result<(), ChatError> {
    let Some(content) = message.content.clone() else {
        return Ok(());
    };

    let embeds = state.unfurler.collect_embeds(&content).await;
    if embeds == message.system_embeds.0 {
        // nothing changed; no write, no event
        return Ok(());
    }

    let updated = messages::set_system_embeds(&state.db, &message.id, &embeds)
        .await
        .map_err(|e| ChatError::internal(format!("embed update failed: {e}")))?;
    if !updated {
        // message was deleted while we were fetching
        return Ok(());
    }

    message.system_embeds = Json(embeds);
    let api = projection::message_to_api(&state.db, &message)
        .await
        .map_err(|e| ChatError::internal(format!("projection failed: {e}")))?;
    state.bus.publish_event(Event::MessageUpdated { message: api });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unfurler() -> Unfurler {
        Unfurler::new(vec!["chat.example.com".to_string()]).unwrap()
    }

    #[test]
    fn trims_trailing_punctuation() {
        assert_eq!(trim_url("https://a.io/x."), "https://a.io/x");
        assert_eq!(trim_url("https://a.io/x!?"), "https://a.io/x");
        assert_eq!(trim_url("https://a.io/x,\""), "https://a.io/x");
    }

    #[test]
    fn keeps_matched_brackets_strips_unmatched() {
        assert_eq!(
            trim_url("https://en.wikipedia.org/wiki/Rust_(language)"),
            "https://en.wikipedia.org/wiki/Rust_(language)"
        );
        assert_eq!(trim_url("https://a.io/x)"), "https://a.io/x");
        assert_eq!(trim_url("https://a.io/x]"), "https://a.io/x");
        assert_eq!(trim_url("https://a.io/x>"), "https://a.io/x");
    }

    #[test]
    fn extract_dedupes_and_caps_at_five() {
        let u = unfurler();
        let content = "https://a.io https://a.io https://b.io https://c.io \
                       https://d.io https://e.io https://f.io";
        let urls = u.extract_urls(content);
        assert_eq!(urls.len(), 5);
        assert_eq!(urls[0], "https://a.io");
        assert!(!urls.contains(&"https://f.io".to_string()));
    }

    #[test]
    fn internal_invite_links_are_dropped() {
        let u = unfurler();
        let urls = u.extract_urls(
            "join me https://chat.example.com/invites/abc123 or read https://blog.example.com/invites-post",
        );
        assert_eq!(urls, vec!["https://blog.example.com/invites-post"]);
    }

    #[test]
    fn non_urls_are_ignored() {
        let u = unfurler();
        assert!(u.extract_urls("no links here, not even ftp://x").is_empty());
    }

    #[test]
    fn sniffs_common_image_magic() {
        assert_eq!(
            MediaKind::sniff(b"\x89PNG\r\n\x1a\nrest"),
            Some(MediaKind::Image)
        );
        assert_eq!(MediaKind::sniff(b"\xff\xd8\xff\xe0JFIF"), Some(MediaKind::Image));
        assert_eq!(MediaKind::sniff(b"GIF89a..."), Some(MediaKind::Image));
        assert_eq!(
            MediaKind::sniff(b"RIFF\x00\x00\x00\x00WEBPVP8 "),
            Some(MediaKind::Image)
        );
    }

    #[test]
    fn sniffs_video_magic() {
        assert_eq!(
            MediaKind::sniff(b"\x00\x00\x00\x18ftypmp42"),
            Some(MediaKind::Video)
        );
        assert_eq!(MediaKind::sniff(b"\x1aE\xdf\xa3webm"), Some(MediaKind::Video));
    }

    #[test]
    fn sniffs_audio_magic() {
        assert_eq!(MediaKind::sniff(b"OggS\x00\x02"), Some(MediaKind::Audio));
        assert_eq!(
            MediaKind::sniff(b"RIFF\x00\x00\x00\x00WAVEfmt "),
            Some(MediaKind::Audio)
        );
        assert_eq!(MediaKind::sniff(b"fLaC\x00\x00"), Some(MediaKind::Audio));
        assert_eq!(MediaKind::sniff(b"ID3\x04\x00"), Some(MediaKind::Audio));
        assert_eq!(MediaKind::sniff(b"\xff\xfb\x90\x00"), Some(MediaKind::Audio));
        assert_eq!(MediaKind::sniff(b"\xff\xf1\x50\x80"), Some(MediaKind::Audio));
    }

    #[test]
    fn sniff_misses_plain_text() {
        assert_eq!(MediaKind::sniff(b"hello world"), None);
        assert_eq!(MediaKind::sniff(b""), None);
    }

    #[test]
    fn media_embed_sets_matching_url_field() {
        let embed = MediaKind::Image.to_embed("https://a.io/pic.png");
        assert_eq!(embed.image_url.as_deref(), Some("https://a.io/pic.png"));
        assert!(embed.video_url.is_none());
        let embed = MediaKind::Audio.to_embed("https://a.io/song.mp3");
        assert_eq!(embed.audio_url.as_deref(), Some("https://a.io/song.mp3"));
    }

    #[test]
    fn html_prefix_detection() {
        assert!(looks_like_html(b"<!DOCTYPE html><html>"));
        assert!(looks_like_html(b"  \n<html lang=\"en\">"));
        assert!(looks_like_html(b"<head><title>x</title>"));
        assert!(!looks_like_html(b"{\"json\": true}"));
    }

    #[test]
    fn theme_color_normalization() {
        assert_eq!(normalize_theme_color("#fff").as_deref(), Some("#ffffff"));
        assert_eq!(normalize_theme_color("#A1B2C3").as_deref(), Some("#a1b2c3"));
        assert_eq!(normalize_theme_color("tomato"), None);
        assert_eq!(normalize_theme_color("#12345"), None);
    }

    #[test]
    fn extracts_open_graph_metadata() {
        let html = r##"<html><head>
            <title>Fallback Title</title>
            <meta property="og:title" content="OG Title">
            <meta property="og:description" content="A description">
            <meta property="og:image" content="/img/cover.png">
            <meta property="og:site_name" content="Example">
            <meta name="theme-color" content="#abc">
            <link rel="canonical" href="https://example.com/canonical">
        </head><body></body></html>"##;
        let final_url = Url::parse("https://example.com/post/1").unwrap();
        let embed = extract_html_embed(html, &final_url);
        assert_eq!(embed.title.as_deref(), Some("OG Title"));
        assert_eq!(embed.description.as_deref(), Some("A description"));
        assert_eq!(
            embed.image_url.as_deref(),
            Some("https://example.com/img/cover.png")
        );
        assert_eq!(embed.footer.as_deref(), Some("Example"));
        assert_eq!(embed.color.as_deref(), Some("#aabbcc"));
        assert_eq!(embed.url.as_deref(), Some("https://example.com/canonical"));
    }

    #[test]
    fn falls_back_to_title_tag_and_canonical() {
        let html = r#"<html><head>
            <title> Plain Title </title>
            <link rel="canonical" href="https://example.com/canonical">
        </head></html>"#;
        let final_url = Url::parse("https://example.com/p").unwrap();
        let embed = extract_html_embed(html, &final_url);
        assert_eq!(embed.title.as_deref(), Some("Plain Title"));
        assert_eq!(embed.url.as_deref(), Some("https://example.com/canonical"));
        assert!(!embed.is_empty_shell());
    }

    #[test]
    fn bare_page_yields_empty_shell() {
        let html = "<html><head></head><body>nothing</body></html>";
        let final_url = Url::parse("https://example.com").unwrap();
        let embed = extract_html_embed(html, &final_url);
        assert!(embed.is_empty_shell());
    }

    #[test]
    fn unfurling_same_content_is_deterministic() {
        // determinism of the pure pipeline backs the no-change suppression:
        // same html in, same embed out
        let html = r#"<html><head><meta property="og:title" content="T"></head></html>"#;
        let final_url = Url::parse("https://example.com").unwrap();
        let a = extract_html_embed(html, &final_url);
        let b = extract_html_embed(html, &final_url);
        assert_eq!(a, b);
    }
}
