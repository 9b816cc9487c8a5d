use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::Value;
use tidepool_shared::error::ChatError;
use tidepool_shared::events::Event;
use tidepool_shared::ids::{ChannelId, MessageId, UserId, WebhookId};
use tidepool_shared::models::{Author, Embed, Message, MessageType, Status, UserFlags, Webhook};

use crate::error::{db_err, ServerError};
use crate::extractors::auth::AuthUser;
use crate::projection;
use crate::state::AppState;
use crate::store::messages::{self, NewMessage};
use crate::store::webhooks::{self, WebhookRow};
use crate::validation::{validate_color, validate_content, validate_embeds, validate_name};

/// GET /v1/channels/{id}/webhooks — owner only; secrets included.
pub async fn list_webhooks(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(channel_id): Path<ChannelId>,
) -> Result<Json<Vec<Webhook>>, ServerError> {
    let channel = super::load_channel(&state.db, &channel_id).await?;
    super::require_owner(&channel, &auth.user)?;

    let rows = webhooks::list_for_channel(&state.db, &channel_id)
        .await
        .map_err(db_err)?;
    Ok(Json(rows.iter().map(|row| row.to_api(true)).collect()))
}

#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
    pub name: String,
    pub color: Option<String>,
}

/// POST /v1/channels/{id}/webhooks — owner only.
pub async fn create_webhook(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(channel_id): Path<ChannelId>,
    Json(body): Json<CreateWebhookRequest>,
) -> Result<Json<Webhook>, ServerError> {
    let channel = super::load_channel(&state.db, &channel_id).await?;
    super::require_owner(&channel, &auth.user)?;

    let name = body.name.to_lowercase();
    validate_name(&name, "Name")?;
    let color = body.color.unwrap_or_else(|| "#000000".to_string());
    validate_color(&color, "color")?;

    if webhooks::name_taken(&state.db, &channel_id, &name, None)
        .await
        .map_err(db_err)?
    {
        return Err(ChatError::Conflict("Webhook name must be unique".into()).into());
    }

    let row = webhooks::create(&state.db, &channel_id, &auth.user.id, &name, &color)
        .await
        .map_err(db_err)?;
    Ok(Json(row.to_api(true)))
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateWebhookRequest {
    pub name: Option<String>,
    pub color: Option<String>,
}

/// PATCH /v1/channels/{id}/webhooks/{webhook_id}
pub async fn update_webhook(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((channel_id, webhook_id)): Path<(ChannelId, WebhookId)>,
    Json(body): Json<UpdateWebhookRequest>,
) -> Result<Json<Webhook>, ServerError> {
    let channel = super::load_channel(&state.db, &channel_id).await?;
    super::require_owner(&channel, &auth.user)?;

    let mut webhook = webhooks::find_in_channel(&state.db, &channel_id, &webhook_id)
        .await
        .map_err(db_err)?
        .ok_or(ServerError(ChatError::NotFound))?;

    if let Some(name) = body.name {
        let name = name.to_lowercase();
        validate_name(&name, "Name")?;
        if name != webhook.name
            && webhooks::name_taken(&state.db, &channel_id, &name, Some(&webhook.id))
                .await
                .map_err(db_err)?
        {
            return Err(ChatError::Conflict("Webhook name must be unique".into()).into());
        }
        webhook.name = name;
    }
    if let Some(color) = body.color {
        validate_color(&color, "color")?;
        webhook.color = color;
    }

    webhooks::save(&state.db, &webhook).await.map_err(db_err)?;
    Ok(Json(webhook.to_api(true)))
}

/// DELETE /v1/channels/{id}/webhooks/{webhook_id}
pub async fn delete_webhook(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((channel_id, webhook_id)): Path<(ChannelId, WebhookId)>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let channel = super::load_channel(&state.db, &channel_id).await?;
    super::require_owner(&channel, &auth.user)?;

    let webhook = webhooks::find_in_channel(&state.db, &channel_id, &webhook_id)
        .await
        .map_err(db_err)?
        .ok_or(ServerError(ChatError::NotFound))?;

    webhooks::delete(&state.db, &webhook.id).await.map_err(db_err)?;
    Ok(Json(serde_json::json!({ "message": "Webhook deleted" })))
}

// ─── Incoming webhook payload parsing ───────────────────────

fn json_str<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str)
}

fn json_array_len(value: &Value, key: &str) -> usize {
    value.get(key).and_then(Value::as_array).map_or(0, Vec::len)
}

/// Recognize a GitHub push delivery by its User-Agent and event header and
/// render it as an embed.
pub(crate) fn parse_github_webhook(headers: &HeaderMap, payload: &Value) -> Option<Value> {
    let user_agent = headers.get("user-agent")?.to_str().ok()?;
    if !user_agent.starts_with("GitHub-Hookshot/") {
        return None;
    }
    if headers.get("x-github-event")?.to_str().ok()? != "push" {
        return None;
    }

    let mut desc = String::new();
    let added = json_array_len(payload, "added");
    let removed = json_array_len(payload, "removed");
    let modified = json_array_len(payload, "modified");
    if added > 0 {
        desc.push_str(&format!("&a+{added} files added"));
    }
    if removed > 0 {
        desc.push_str(&format!("&c-{removed} files removed"));
    }
    if modified > 0 {
        desc.push_str(&format!("&e~{modified} files modified"));
    }
    let pusher = json_str(payload, "/pusher/name").unwrap_or("somebody");
    let reset = if desc.is_empty() { "" } else { "&r" };
    desc.push_str(&format!("\n\n{reset}{pusher}"));

    let repo = json_str(payload, "/repository/full_name").unwrap_or("unknown/repo");
    let after = json_str(payload, "/after").unwrap_or("");
    let title = json_str(payload, "/head_commit/message").unwrap_or("push");

    Some(serde_json::json!({
        "embeds": [{
            "url": format!("https://github.com/{repo}/commit/{after}"),
            "title": title,
            "description": desc,
            "footer": format!("{repo} | GitHub"),
        }]
    }))
}

/// Railway deployment notifications carry no identifying headers; sniff the
/// body shape instead.
pub(crate) fn parse_railway_webhook(payload: &Value) -> Option<Value> {
    let looks_like_railway = payload.get("type").is_some()
        && payload.get("details").is_some()
        && payload.get("resource").is_some();
    if !looks_like_railway {
        return None;
    }

    let event = payload.get("type")?.as_str()?.to_ascii_lowercase();
    let state = event.strip_prefix("deployment.")?;

    let color = match state {
        "deploying" => "#f7c266",
        "deployed" => "#22e08a",
        "failed" | "removed" => "#ff5f52",
        _ => "#8fa3b0",
    };

    let service = json_str(payload, "/resource/service/name").unwrap_or("service");
    let author = json_str(payload, "/details/commitAuthor").unwrap_or("somebody?");
    let message = json_str(payload, "/details/commitMessage").unwrap_or("..no commit message...");
    let project = json_str(payload, "/resource/project/name").unwrap_or("project");
    let deploy_id = json_str(payload, "/details/id").unwrap_or("");

    let mut description = match state {
        "deploying" => format!("{service} is &ebeing deployed"),
        "deployed" => format!("{service} was **&asuccessfully deployed**"),
        "failed" => format!("{service} **&cfailed to deploy**"),
        "removed" => format!("deployment &cremoved for **{service}**"),
        _ => format!("{service} deployment changed state"),
    };
    description.push_str(&format!("\n\n{message} &7- pushed by **{author}**"));

    Some(serde_json::json!({
        "embeds": [{
            "title": format!("{service} on &dRailway"),
            "description": description,
            "color": color,
            "footer": format!("{project} | {deploy_id}"),
        }]
    }))
}

#[derive(Debug, Default, Deserialize)]
struct WebhookMessageRequest {
    content: Option<String>,
    #[serde(default)]
    embeds: Vec<Embed>,
    username: Option<String>,
    color: Option<String>,
    background_color: Option<String>,
    bio: Option<String>,
    avatar_url: Option<String>,
}

fn synthesize_author(webhook: &WebhookRow, request: &WebhookMessageRequest) -> Author {
    Author {
        id: UserId::from(webhook.id.as_str()),
        username: request
            .username
            .clone()
            .unwrap_or_else(|| webhook.name.clone()),
        avatar_url: request.avatar_url.clone(),
        bio: request.bio.clone(),
        color: Some(request.color.clone().unwrap_or_else(|| webhook.color.clone())),
        background_color: request.background_color.clone(),
        status: Status::Online,
        flags: UserFlags::WEBHOOK,
        created_at: webhook.created_at,
        updated_at: webhook.updated_at.unwrap_or(webhook.created_at),
    }
}

/// POST /v1/webhooks/{channel_id}/{webhook_id}/{secret} — public ingestion.
/// Accepts the native payload or a recognized GitHub/Railway delivery and
/// synthesizes a message whose author is the webhook itself.
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path((channel_id, webhook_id, secret)): Path<(ChannelId, WebhookId, String)>,
    headers: HeaderMap,
    Json(payload): Json<Value>,
) -> Result<Json<Message>, ServerError> {
    let webhook = webhooks::find_authenticated(&state.db, &channel_id, &webhook_id, &secret)
        .await
        .map_err(db_err)?
        .ok_or(ServerError(ChatError::NotFound))?;

    tracing::info!(webhook_id = %webhook.id, channel_id = %channel_id, "webhook received");

    let payload = parse_github_webhook(&headers, &payload)
        .or_else(|| parse_railway_webhook(&payload))
        .unwrap_or(payload);
    let request: WebhookMessageRequest = serde_json::from_value(payload)
        .map_err(|_| ServerError(ChatError::validation("Bad Request")))?;

    let content = request
        .content
        .as_deref()
        .map(validate_content)
        .transpose()?;
    validate_embeds(&request.embeds)?;
    if content.is_none() && request.embeds.is_empty() {
        return Err(ChatError::validation("content or embeds is required").into());
    }
    if let Some(username) = &request.username {
        validate_name(username, "Username")?;
    }
    if let Some(color) = &request.color {
        validate_color(color, "color")?;
    }
    if let Some(avatar_url) = &request.avatar_url {
        if !avatar_url.starts_with("http://") && !avatar_url.starts_with("https://") {
            return Err(ChatError::validation("Invalid avatar URL").into());
        }
    }

    let author = synthesize_author(&webhook, &request);
    let row = messages::create(
        &state.db,
        NewMessage {
            id: MessageId::new(),
            channel_id: channel_id.clone(),
            // webhook id, not a user id; consumers key off flags.WEBHOOK
            author_id: UserId::from(webhook.id.as_str()),
            message_type: MessageType::Default,
            content,
            nonce: None,
            file_ids: vec![],
            mentions: vec![],
            user_embeds: request.embeds.clone(),
            author: Some(author),
        },
    )
    .await
    .map_err(db_err)?;

    let message = projection::project_message(&row, &Default::default());
    state.bus.publish_event(Event::MessageCreated {
        message: message.clone(),
        author: None,
        channel: None,
    });

    Ok(Json(message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::Utc;

    fn github_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static("GitHub-Hookshot/abc"));
        headers.insert("x-github-event", HeaderValue::from_static("push"));
        headers
    }

    #[test]
    fn github_push_becomes_an_embed() {
        let payload = serde_json::json!({
            "added": ["a.rs"],
            "modified": ["b.rs", "c.rs"],
            "pusher": {"name": "alice"},
            "repository": {"full_name": "acme/widgets"},
            "after": "deadbeef",
            "head_commit": {"message": "fix the thing"},
        });
        let parsed = parse_github_webhook(&github_headers(), &payload).unwrap();
        let embed = &parsed["embeds"][0];
        assert_eq!(embed["title"], "fix the thing");
        assert_eq!(
            embed["url"],
            "https://github.com/acme/widgets/commit/deadbeef"
        );
        assert_eq!(embed["footer"], "acme/widgets | GitHub");
        let desc = embed["description"].as_str().unwrap();
        assert!(desc.contains("+1 files added"));
        assert!(desc.contains("~2 files modified"));
        assert!(desc.contains("alice"));
    }

    #[test]
    fn non_github_requests_are_ignored() {
        let payload = serde_json::json!({});
        assert!(parse_github_webhook(&HeaderMap::new(), &payload).is_none());

        let mut headers = HeaderMap::new();
        headers.insert("user-agent", HeaderValue::from_static("curl/8.0"));
        assert!(parse_github_webhook(&headers, &payload).is_none());

        let mut headers = github_headers();
        headers.insert("x-github-event", HeaderValue::from_static("issues"));
        assert!(parse_github_webhook(&headers, &payload).is_none());
    }

    #[test]
    fn railway_deployment_becomes_an_embed() {
        let payload = serde_json::json!({
            "type": "DEPLOYMENT.deployed",
            "details": {"commitAuthor": "bob", "commitMessage": "ship it", "id": "d-1"},
            "resource": {
                "service": {"name": "api"},
                "project": {"name": "tidepool"},
            },
        });
        let parsed = parse_railway_webhook(&payload).unwrap();
        let embed = &parsed["embeds"][0];
        assert_eq!(embed["color"], "#22e08a");
        assert_eq!(embed["footer"], "tidepool | d-1");
        let desc = embed["description"].as_str().unwrap();
        assert!(desc.contains("successfully deployed"));
        assert!(desc.contains("ship it"));
    }

    #[test]
    fn railway_shape_sniffing_rejects_other_bodies() {
        assert!(parse_railway_webhook(&serde_json::json!({"type": "x"})).is_none());
        assert!(
            parse_railway_webhook(&serde_json::json!({
                "type": "volume.resized",
                "details": {},
                "resource": {},
            }))
            .is_none()
        );
    }

    #[test]
    fn synthetic_author_carries_webhook_flag() {
        let webhook = WebhookRow {
            id: WebhookId::from("w123456789"),
            channel_id: ChannelId::from("c123456789"),
            owner_id: UserId::from("u123456789"),
            name: "deploys".into(),
            color: "#112233".into(),
            secret: "s".into(),
            created_at: Utc::now(),
            updated_at: None,
        };
        let author = synthesize_author(&webhook, &WebhookMessageRequest::default());
        assert_eq!(author.id.as_str(), "w123456789");
        assert_eq!(author.username, "deploys");
        assert_eq!(author.color.as_deref(), Some("#112233"));
        assert!(author.flags.contains(UserFlags::WEBHOOK));
        assert_eq!(author.status, Status::Online);
    }

    #[test]
    fn payload_username_and_color_override_webhook_defaults() {
        let webhook = WebhookRow {
            id: WebhookId::from("w123456789"),
            channel_id: ChannelId::from("c123456789"),
            owner_id: UserId::from("u123456789"),
            name: "deploys".into(),
            color: "#112233".into(),
            secret: "s".into(),
            created_at: Utc::now(),
            updated_at: None,
        };
        let request = WebhookMessageRequest {
            username: Some("release-bot".into()),
            color: Some("#aabbcc".into()),
            ..Default::default()
        };
        let author = synthesize_author(&webhook, &request);
        assert_eq!(author.username, "release-bot");
        assert_eq!(author.color.as_deref(), Some("#aabbcc"));
    }
}
