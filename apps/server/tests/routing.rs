use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use tidepool_server::config::{Mode, ServerConfig};
use tidepool_server::email::MockEmailService;
use tidepool_server::router::build_router;
use tidepool_server::state::AppState;
use tidepool_server::storage::ObjectStorage;
use tidepool_server::unfurl::Unfurler;

/// State wired against lazily-connecting pools: nothing touches the network
/// until a handler actually queries, so routing, auth-header, and validation
/// behavior can be exercised without live Postgres/Redis.
fn test_state(mode: Mode) -> AppState {
    let config = ServerConfig {
        mode,
        database_url: "postgres://localhost/tidepool_test".to_string(),
        ..Default::default()
    };
    let db = sqlx::postgres::PgPoolOptions::new()
        .connect_lazy(&config.database_url)
        .unwrap();
    let redis_config = fred::types::config::Config::from_url("redis://localhost:6379").unwrap();
    let redis = fred::clients::Pool::new(redis_config, None, None, None, 1).unwrap();
    AppState::new(
        config,
        db,
        redis,
        ObjectStorage::in_memory("https://cdn.example.com"),
        Arc::new(MockEmailService::new()),
        Unfurler::new(vec![]).unwrap(),
    )
}

async fn body_json(response: axum::http::Response<Body>) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn liveness_works_on_both_roles() {
    for mode in [Mode::Api, Mode::Gateway] {
        let app = build_router(test_state(mode));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health/live")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "ok");
    }
}

#[tokio::test]
async fn api_routes_require_auth_header() {
    let app = build_router(test_state(Mode::Api));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/channels")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let json = body_json(response).await;
    assert_eq!(json["message"], "Unauthorized");
}

#[tokio::test]
async fn gateway_stream_requires_auth_header() {
    let app = build_router(test_state(Mode::Gateway));
    let response = app
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn gateway_role_does_not_serve_rest_routes() {
    let app = build_router(test_state(Mode::Gateway));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v1/channels")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn signup_validates_username_before_touching_the_store() {
    let app = build_router(test_state(Mode::Api));
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/signup")
                .header("Content-Type", "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "username": "a!",
                        "password": "p",
                        "email": "a@x.io",
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["message"]
        .as_str()
        .unwrap()
        .contains("Username must be between"));
}

#[tokio::test]
async fn signup_validates_email_shape() {
    let app = build_router(test_state(Mode::Api));
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/signup")
                .header("Content-Type", "application/json")
                .body(Body::from(
                    serde_json::json!({
                        "username": "alice",
                        "password": "p",
                        "email": "nope",
                    })
                    .to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["message"], "Invalid email address");
}

#[tokio::test]
async fn unknown_routes_return_404() {
    let app = build_router(test_state(Mode::Api));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/v2/not-a-thing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn responses_carry_a_request_id() {
    let app = build_router(test_state(Mode::Api));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/health/live")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}
