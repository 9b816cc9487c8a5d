use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;

use crate::state::AppState;

/// GET /health/live — process is up.
pub async fn liveness() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// GET /health/ready — dependencies are reachable.
pub async fn readiness(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let db_ok = sqlx::query("SELECT 1").execute(&state.db).await.is_ok();
    let redis_ok = {
        use fred::interfaces::ClientLike;
        state.redis.is_connected()
    };
    let ready = db_ok && redis_ok;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(serde_json::json!({ "database": db_ok, "redis": redis_ok })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn liveness_reports_ok() {
        let Json(body) = liveness().await;
        assert_eq!(body["status"], "ok");
    }
}
