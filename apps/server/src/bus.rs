//! The durable event bus: a single Redis stream shared by every node.
//!
//! API nodes append envelopes; each gateway node tails the stream with a
//! blocking read and replays ranges for reconnecting clients. Stream entry
//! ids are assigned by Redis and are monotonic, which gives the end-to-end
//! total order.

use fred::prelude::*;
use fred::types::streams::{XReadResponse, XReadValue};
use tidepool_shared::events::{Envelope, Event};
use tidepool_shared::time::now_ms;

/// Name of the single event stream.
pub const STREAM_KEY: &str = "events";

/// How long a tail read blocks before retrying.
const BLOCK_MS: u64 = 30_000;

/// Approximate retention cap. Replay beyond this horizon silently yields
/// whatever remains and the client proceeds with the live subscription.
const RETENTION_MAXLEN: i64 = 65_536;

#[derive(Clone)]
pub struct EventBus {
    redis: fred::clients::Pool,
}

impl EventBus {
    pub fn new(redis: fred::clients::Pool) -> Self {
        Self { redis }
    }

    /// Append an envelope to the stream. Returns the assigned stream id
    /// after the durable write.
    pub async fn publish(&self, envelope: &Envelope) -> Result<String, fred::error::Error> {
        self.redis
            .xadd(
                STREAM_KEY,
                false,
                ("MAXLEN", "~", RETENTION_MAXLEN),
                "*",
                vec![
                    ("t", envelope.t.as_str()),
                    ("d", envelope.d.as_str()),
                    ("ts", envelope.ts.as_str()),
                ],
            )
            .await
    }

    /// Encode and publish without blocking the caller. Emission failures are
    /// logged; downstream consumers recover on the next publish or on replay.
    pub fn publish_event(&self, event: Event) {
        let bus = self.clone();
        tokio::spawn(async move {
            let envelope = match event.encode(now_ms()) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::error!(tag = event.tag(), error = %e, "failed to encode event");
                    return;
                }
            };
            if let Err(e) = bus.publish(&envelope).await {
                tracing::error!(tag = envelope.t, error = %e, "failed to publish event");
            }
        });
    }

    /// Finite range read used for replay: every entry strictly newer than
    /// `since_ms` that retention still holds.
    pub async fn range(
        &self,
        since_ms: i64,
    ) -> Result<Vec<(String, Envelope)>, fred::error::Error> {
        let entries: Vec<XReadValue<String, String, String>> = self
            .redis
            .xrange(STREAM_KEY, format!("{}", since_ms + 1), "+", None)
            .await?;
        Ok(entries
            .into_iter()
            .map(|(id, fields)| (id.clone(), envelope_from_fields(fields)))
            .collect())
    }

    /// Start tailing the stream after `cursor` (`$` = only new entries).
    pub fn tail(&self, cursor: Option<String>) -> EventTail {
        EventTail {
            redis: self.redis.clone(),
            last_id: cursor.unwrap_or_else(|| "$".to_string()),
        }
    }
}

/// A lazy, restartable tail over the stream. Each `next` blocks up to 30 s
/// and never loses its place: the last yielded id is threaded back into the
/// following read.
pub struct EventTail {
    redis: fred::clients::Pool,
    last_id: String,
}

impl EventTail {
    /// The next batch of entries, in stream order. An empty vector means the
    /// blocking read timed out; call again.
    pub async fn next(&mut self) -> Result<Vec<(String, Envelope)>, fred::error::Error> {
        let response: XReadResponse<String, String, String, String> = self
            .redis
            .xread_map(None, Some(BLOCK_MS), STREAM_KEY, self.last_id.as_str())
            .await?;

        let mut out = Vec::new();
        for (_stream, entries) in response {
            for (id, fields) in entries {
                self.last_id = id.clone();
                out.push((id, envelope_from_fields(fields)));
            }
        }
        Ok(out)
    }

    pub fn cursor(&self) -> &str {
        &self.last_id
    }
}

fn envelope_from_fields(fields: std::collections::HashMap<String, String>) -> Envelope {
    let get = |key: &str| fields.get(key).cloned().unwrap_or_default();
    Envelope {
        t: get("t"),
        d: get("d"),
        ts: get("ts"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_from_fields_maps_the_three_keys() {
        let mut fields = std::collections::HashMap::new();
        fields.insert("t".to_string(), "heartbeat".to_string());
        fields.insert("d".to_string(), String::new());
        fields.insert("ts".to_string(), "17".to_string());
        let envelope = envelope_from_fields(fields);
        assert_eq!(envelope.t, "heartbeat");
        assert_eq!(envelope.ts, "17");
    }

    #[test]
    fn envelope_from_fields_tolerates_missing_keys() {
        let envelope = envelope_from_fields(std::collections::HashMap::new());
        assert!(envelope.t.is_empty());
        assert!(envelope.decode().is_none());
    }

    #[test]
    fn tail_without_cursor_starts_at_live_edge() {
        let config = fred::types::config::Config::from_url("redis://localhost:6379").unwrap();
        let pool = fred::clients::Pool::new(config, None, None, None, 1).unwrap();
        let bus = EventBus::new(pool);
        let tail = bus.tail(None);
        assert_eq!(tail.cursor(), "$");
    }

    #[test]
    fn tail_with_cursor_resumes_after_it() {
        let config = fred::types::config::Config::from_url("redis://localhost:6379").unwrap();
        let pool = fred::clients::Pool::new(config, None, None, None, 1).unwrap();
        let bus = EventBus::new(pool);
        let tail = bus.tail(Some("1722470400000-3".to_string()));
        assert_eq!(tail.cursor(), "1722470400000-3");
    }
}
