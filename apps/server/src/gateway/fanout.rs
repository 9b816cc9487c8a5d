//! The node-wide fan-out loop: one task per gateway process that tails the
//! event stream and dispatches to every local connection.

use std::time::Duration;

use tidepool_shared::events::Envelope;

use crate::state::AppState;

use super::entitlements;

/// Spawn the fan-out loop. Runs until process shutdown.
pub fn spawn(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run(state).await;
    })
}

async fn run(state: AppState) {
    let mut tail = state.bus.tail(None);
    tracing::info!("fan-out loop started");
    loop {
        match tail.next().await {
            Ok(batch) => {
                for (stream_id, envelope) in batch {
                    tracing::debug!(stream_id, tag = %envelope.t, "stream event");
                    dispatch(&state, &envelope);
                }
            }
            Err(e) => {
                // the tail keeps its cursor; back off and resume
                tracing::warn!(error = %e, "event tail read failed, retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Deliver one envelope to every entitled local connection. Dispatch is a
/// non-blocking `try_send` per connection; a slow client loses its
/// connection, never the loop.
pub fn dispatch(state: &AppState, envelope: &Envelope) {
    let Some(event) = envelope.decode() else {
        // unknown event type from a newer producer
        return;
    };

    entitlements::apply_before_dispatch(&state.gateway, &event);

    for (connection_id, user_id) in state.gateway.connection_snapshot() {
        if entitlements::event_entitled(&state.gateway, &user_id, &event) {
            state.gateway.send_or_close(&connection_id, envelope.clone());
        }
    }

    entitlements::apply_after_dispatch(&state.gateway, &event);
}
