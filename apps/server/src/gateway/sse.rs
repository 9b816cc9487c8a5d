//! Gateway SSE endpoint: accepts a client, replays missed events or primes
//! the roster cache, then hands the connection to the fan-out loop and keeps
//! it alive with heartbeats.
//!
//! Connection lifecycle: REGISTERING (entitlements + presence) → REPLAYING
//! (when a cursor was supplied) or cache-populate → LIVE → CLOSED, with
//! teardown emitting `author_updated` so peers observe the offline edge.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderName, HeaderValue};
use axum::response::sse::{Event as SseFrame, Sse};
use axum::response::IntoResponse;
use serde::Deserialize;
use tidepool_shared::events::{Envelope, Event};
use tidepool_shared::ids::{ConnectionId, UserId};
use tidepool_shared::time::now_ms;

use crate::error::{db_err, redis_err, ServerError};
use crate::extractors::auth::AuthUser;
use crate::state::AppState;
use crate::store::users::{self, UserRow};

use super::entitlements;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    /// Replay cursor: envelope `ts` (ms) of the last event the client saw.
    pub last_event_ts: Option<i64>,
}

/// GET / — the long-lived event stream.
pub async fn connect(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<GatewayQuery>,
) -> Result<impl IntoResponse, ServerError> {
    let user = auth.user;
    let channels = entitlements::build_for_user(&state.db, &user.id)
        .await
        .map_err(db_err)?;

    let connection_id = ConnectionId::new();
    let rx = state
        .gateway
        .register(connection_id.clone(), user.id.clone(), channels);
    state
        .presence
        .register(&user.id, &connection_id)
        .await
        .map_err(redis_err)?;

    tracing::info!(user_id = %user.id, connection_id = %connection_id, "client connected");

    // peers observe the (possibly offline → online) transition
    publish_presence_update(&state, &user).await;

    tokio::spawn(drive_connection(
        state.clone(),
        user,
        connection_id,
        query.last_event_ts,
    ));

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        let envelope = rx.recv().await?;
        let frame = SseFrame::default().data(envelope.to_wire_json());
        Some((Ok::<_, Infallible>(frame), rx))
    });

    Ok((
        [
            (header::CACHE_CONTROL, HeaderValue::from_static("no-cache")),
            (header::CONNECTION, HeaderValue::from_static("keep-alive")),
            (
                HeaderName::from_static("x-accel-buffering"),
                HeaderValue::from_static("no"),
            ),
        ],
        Sse::new(stream),
    ))
}

/// Per-connection driver: replay or cache-populate, then the heartbeat loop.
/// Runs teardown whichever way the connection ends.
async fn drive_connection(
    state: AppState,
    user: UserRow,
    connection_id: ConnectionId,
    cursor: Option<i64>,
) {
    let mut alive = true;

    match cursor {
        Some(since_ms) => match replay(&state, &user.id, &connection_id, since_ms).await {
            Ok(still_connected) => alive = still_connected,
            Err(e) => {
                tracing::warn!(
                    user_id = %user.id,
                    connection_id = %connection_id,
                    error = %e,
                    "replay failed, closing connection"
                );
                state.gateway.remove_connection(&connection_id);
                alive = false;
            }
        },
        None => {
            alive = cache_populate(&state, &connection_id).await;
        }
    }

    if alive {
        let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
        ticker.tick().await; // skip immediate first tick
        loop {
            ticker.tick().await;
            if !state
                .gateway
                .send_or_close(&connection_id, Envelope::heartbeat())
            {
                break;
            }
            if let Err(e) = state.presence.touch(&user.id, &connection_id).await {
                tracing::warn!(user_id = %user.id, error = %e, "presence touch failed");
            }
        }
    }

    teardown(&state, &user, &connection_id).await;
}

/// Replay every retained event newer than the cursor, filtered through the
/// user's entitlements. Returns false when the connection went away while
/// sending.
async fn replay(
    state: &AppState,
    user_id: &UserId,
    connection_id: &ConnectionId,
    since_ms: i64,
) -> Result<bool, fred::error::Error> {
    tracing::info!(user_id = %user_id, since_ms, "catching up");
    let entries = state.bus.range(since_ms).await?;
    for (_stream_id, envelope) in entries {
        let Some(event) = envelope.decode() else {
            continue;
        };
        if !entitlements::event_entitled(&state.gateway, user_id, &event) {
            continue;
        }
        if !state.gateway.send_or_close(connection_id, envelope) {
            return Ok(false);
        }
    }
    tracing::info!(user_id = %user_id, "caught up");
    Ok(true)
}

/// Fresh connections get a roster burst instead of a replay: one
/// `author_updated` per known user with their current derived status.
async fn cache_populate(state: &AppState, connection_id: &ConnectionId) -> bool {
    let rows = match users::list_all(&state.db).await {
        Ok(rows) => rows,
        Err(e) => {
            tracing::error!(error = %e, "cache populate query failed");
            return true;
        }
    };
    for row in rows {
        let status = state.presence.status_or_offline(&row).await;
        let event = Event::AuthorUpdated {
            author: row.to_author(status),
        };
        let envelope = match event.encode(now_ms()) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::error!(error = %e, "cache populate encode failed");
                continue;
            }
        };
        if !state.gateway.send_or_close(connection_id, envelope) {
            return false;
        }
    }
    true
}

async fn teardown(state: &AppState, user: &UserRow, connection_id: &ConnectionId) {
    state.gateway.remove_connection(connection_id);
    if let Err(e) = state.presence.unregister(&user.id, connection_id).await {
        tracing::warn!(user_id = %user.id, error = %e, "presence unregister failed");
    }
    // possible online → offline transition
    publish_presence_update(state, user).await;
    tracing::info!(user_id = %user.id, connection_id = %connection_id, "client disconnected");
}

async fn publish_presence_update(state: &AppState, user: &UserRow) {
    let status = state.presence.status_or_offline(user).await;
    state.bus.publish_event(Event::AuthorUpdated {
        author: user.to_author(status),
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_interval_is_15_seconds() {
        assert_eq!(HEARTBEAT_INTERVAL, Duration::from_secs(15));
    }

    #[test]
    fn gateway_query_parses_optional_cursor() {
        let q: GatewayQuery = serde_json::from_str("{\"last_event_ts\": 1722470400000}").unwrap();
        assert_eq!(q.last_event_ts, Some(1_722_470_400_000));
        let q: GatewayQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(q.last_event_ts, None);
    }
}
