use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::middleware;
use axum::routing::{get, post};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::Mode;
use crate::gateway;
use crate::handlers;
use crate::state::AppState;

/// Builds the router for the configured role with all middleware attached.
pub fn build_router(state: AppState) -> axum::Router {
    let routes = match state.config.mode {
        Mode::Api => api_routes(),
        Mode::Gateway => gateway_routes(),
    };

    let origins: Vec<HeaderValue> = state
        .config
        .cors_origins
        .iter()
        .filter_map(|o| o.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PATCH,
            axum::http::Method::DELETE,
            axum::http::Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ]);

    routes
        .route("/health/live", get(handlers::health::liveness))
        .route("/health/ready", get(handlers::health::readiness))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(DefaultBodyLimit::max(8 * 1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/v1/signup", post(handlers::auth::signup))
        .route("/v1/login", post(handlers::auth::login))
        .route("/v1/verify", post(handlers::auth::verify))
        .route(
            "/v1/users/{user_id}",
            get(handlers::users::get_user).patch(handlers::users::update_user),
        )
        .route(
            "/v1/users/{user_id}/avatar",
            post(handlers::users::upload_avatar).delete(handlers::users::delete_avatar),
        )
        .route(
            "/v1/users/{user_id}/emojis",
            get(handlers::emojis::list_emojis).post(handlers::emojis::create_emoji),
        )
        .route(
            "/v1/users/{user_id}/emojis/{emoji_id}",
            axum::routing::patch(handlers::emojis::update_emoji)
                .delete(handlers::emojis::delete_emoji),
        )
        .route(
            "/v1/channels",
            get(handlers::channels::list_channels).post(handlers::channels::create_channel),
        )
        .route(
            "/v1/channels/{channel_id}",
            get(handlers::channels::get_channel)
                .patch(handlers::channels::update_channel)
                .delete(handlers::channels::delete_channel),
        )
        .route(
            "/v1/channels/{channel_id}/leave",
            post(handlers::channels::leave_channel),
        )
        .route(
            "/v1/channels/{channel_id}/members",
            get(handlers::members::list_members),
        )
        .route(
            "/v1/channels/{channel_id}/invites",
            get(handlers::invites::list_invites).post(handlers::invites::create_invite),
        )
        .route(
            "/v1/channels/{channel_id}/invites/{invite_id}",
            axum::routing::delete(handlers::invites::delete_invite),
        )
        .route(
            "/v1/invites/{code}/join",
            post(handlers::invites::join_with_invite),
        )
        .route(
            "/v1/channels/{channel_id}/messages",
            get(handlers::messages::get_messages).post(handlers::messages::create_message),
        )
        .route(
            "/v1/channels/{channel_id}/messages/{message_id}",
            axum::routing::patch(handlers::messages::update_message)
                .delete(handlers::messages::delete_message),
        )
        .route(
            "/v1/channels/{channel_id}/typing",
            post(handlers::typing::start_typing),
        )
        .route(
            "/v1/channels/{channel_id}/webhooks",
            get(handlers::webhooks::list_webhooks).post(handlers::webhooks::create_webhook),
        )
        .route(
            "/v1/channels/{channel_id}/webhooks/{webhook_id}",
            axum::routing::patch(handlers::webhooks::update_webhook)
                .delete(handlers::webhooks::delete_webhook),
        )
        .route(
            "/v1/webhooks/{channel_id}/{webhook_id}/{secret}",
            post(handlers::webhooks::receive_webhook),
        )
        .route(
            "/v1/files/presign",
            post(handlers::files::presign_files),
        )
        .route(
            "/v1/files/complete",
            post(handlers::files::complete_files),
        )
}

fn gateway_routes() -> axum::Router<AppState> {
    axum::Router::new().route("/", get(gateway::sse::connect))
}

async fn request_id_middleware(
    request: axum::extract::Request,
    next: middleware::Next,
) -> axum::response::Response {
    let request_id = uuid::Uuid::new_v4().to_string();
    tracing::Span::current().record("request_id", request_id.as_str());
    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}
