//! Event variants and the wire envelope codec.
//!
//! Every state-changing operation publishes exactly one `Event`. On the wire
//! an event is an `Envelope { t, d, ts }`: `t` is the discriminator, `d` the
//! compact-JSON payload, `ts` the publish time in milliseconds as a decimal
//! string. Decoding an envelope with an unknown `t` yields `None` so newer
//! producers never break older gateways.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{ChannelId, MessageId, UserId};
use crate::models::{Author, Channel, Message};

/// The sealed set of event variants. The serde representation matches the
/// wire shape: `{"t": "<tag>", "d": {...}}` (`heartbeat` has no payload).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "d", rename_all = "snake_case")]
pub enum Event {
    ChannelCreated {
        channel: Channel,
    },
    ChannelUpdated {
        channel: Channel,
    },
    ChannelDeleted {
        channel_id: ChannelId,
    },
    MessageCreated {
        message: Message,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        author: Option<Author>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<Channel>,
    },
    MessageUpdated {
        message: Message,
    },
    MessageDeleted {
        message_id: MessageId,
        channel_id: ChannelId,
    },
    AuthorUpdated {
        author: Author,
    },
    TypingStarted {
        channel_id: ChannelId,
        user_id: UserId,
    },
    Heartbeat,
}

impl Event {
    /// Wire discriminator for this variant. Total over the enum.
    pub fn tag(&self) -> &'static str {
        match self {
            Event::ChannelCreated { .. } => "channel_created",
            Event::ChannelUpdated { .. } => "channel_updated",
            Event::ChannelDeleted { .. } => "channel_deleted",
            Event::MessageCreated { .. } => "message_created",
            Event::MessageUpdated { .. } => "message_updated",
            Event::MessageDeleted { .. } => "message_deleted",
            Event::AuthorUpdated { .. } => "author_updated",
            Event::TypingStarted { .. } => "typing_started",
            Event::Heartbeat => "heartbeat",
        }
    }

    /// The channel this event is scoped to, if any. Events without a channel
    /// scope (`author_updated`, `typing_started`, `heartbeat`) are delivered
    /// to everyone; `typing_started` carries a channel id but mirrors the
    /// unscoped delivery of the system it replaces.
    pub fn channel_scope(&self) -> Option<&ChannelId> {
        match self {
            Event::ChannelCreated { channel }
            | Event::ChannelUpdated { channel }
            | Event::MessageCreated {
                channel: Some(channel),
                ..
            } => Some(&channel.id),
            Event::MessageCreated { message, .. } => Some(&message.channel_id),
            Event::MessageUpdated { message } => Some(&message.channel_id),
            Event::MessageDeleted { channel_id, .. } => Some(channel_id),
            Event::ChannelDeleted { channel_id } => Some(channel_id),
            Event::AuthorUpdated { .. } | Event::TypingStarted { .. } | Event::Heartbeat => None,
        }
    }

    /// Encode into an envelope stamped with `ts_ms`.
    pub fn encode(&self, ts_ms: i64) -> Result<Envelope, serde_json::Error> {
        let value = serde_json::to_value(self)?;
        let d = match value.get("d") {
            Some(d) => serde_json::to_string(d)?,
            None => String::new(),
        };
        Ok(Envelope {
            t: self.tag().to_string(),
            d,
            ts: ts_ms.to_string(),
        })
    }
}

/// Wire form of an event as stored in the stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub t: String,
    pub d: String,
    pub ts: String,
}

impl Envelope {
    /// Per-connection heartbeat frame. Never enters the stream and carries no
    /// timestamp, so clients do not advance their replay cursor on it.
    pub fn heartbeat() -> Self {
        Self {
            t: "heartbeat".to_string(),
            d: String::new(),
            ts: String::new(),
        }
    }

    /// Decode back into an event. Unknown tags and malformed payloads are
    /// dropped (forward compatibility).
    pub fn decode(&self) -> Option<Event> {
        let mut wrapper = serde_json::Map::new();
        wrapper.insert("t".to_string(), Value::String(self.t.clone()));
        if !self.d.is_empty() {
            let d: Value = serde_json::from_str(&self.d).ok()?;
            wrapper.insert("d".to_string(), d);
        }
        serde_json::from_value(Value::Object(wrapper)).ok()
    }

    /// JSON object delivered to SSE clients: `{t, d, ts}` with `d` parsed.
    /// Empty `d`/`ts` fields (heartbeats) are omitted.
    pub fn to_wire_json(&self) -> String {
        let mut obj = serde_json::Map::new();
        obj.insert("t".to_string(), Value::String(self.t.clone()));
        if !self.d.is_empty() {
            if let Ok(d) = serde_json::from_str::<Value>(&self.d) {
                obj.insert("d".to_string(), d);
            }
        }
        if !self.ts.is_empty() {
            obj.insert("ts".to_string(), Value::String(self.ts.clone()));
        }
        Value::Object(obj).to_string()
    }

    /// Envelope timestamp in milliseconds, if present and well-formed.
    pub fn ts_ms(&self) -> Option<i64> {
        self.ts.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MessageType, Status, UserFlags};
    use chrono::DateTime;

    fn sample_channel() -> Channel {
        Channel {
            id: ChannelId::from("c000000001"),
            name: "lobby".into(),
            topic: String::new(),
            author_id: UserId::from("u000000001"),
            private: false,
            last_message_at: None,
            created_at: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
            updated_at: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        }
    }

    fn sample_message() -> Message {
        Message {
            id: MessageId::from("m000000001"),
            message_type: MessageType::Default,
            channel_id: ChannelId::from("c000000001"),
            author_id: UserId::from("u000000001"),
            content: Some("hi".into()),
            nonce: None,
            files: vec![],
            embeds: vec![],
            mentions: vec![],
            author: None,
            created_at: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
            updated_at: None,
        }
    }

    fn sample_author() -> Author {
        Author {
            id: UserId::from("u000000001"),
            username: "alice".into(),
            avatar_url: None,
            bio: None,
            color: None,
            background_color: None,
            status: Status::Online,
            flags: UserFlags::empty(),
            created_at: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
            updated_at: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        }
    }

    #[test]
    fn every_variant_round_trips() {
        let events = vec![
            Event::ChannelCreated {
                channel: sample_channel(),
            },
            Event::ChannelUpdated {
                channel: sample_channel(),
            },
            Event::ChannelDeleted {
                channel_id: ChannelId::from("c000000001"),
            },
            Event::MessageCreated {
                message: sample_message(),
                author: Some(sample_author()),
                channel: None,
            },
            Event::MessageUpdated {
                message: sample_message(),
            },
            Event::MessageDeleted {
                message_id: MessageId::from("m000000001"),
                channel_id: ChannelId::from("c000000001"),
            },
            Event::AuthorUpdated {
                author: sample_author(),
            },
            Event::TypingStarted {
                channel_id: ChannelId::from("c000000001"),
                user_id: UserId::from("u000000001"),
            },
            Event::Heartbeat,
        ];
        for event in events {
            let envelope = event.encode(1_722_470_400_000).unwrap();
            assert_eq!(envelope.t, event.tag());
            assert_eq!(envelope.ts, "1722470400000");
            let decoded = envelope.decode().expect("decodable");
            assert_eq!(decoded, event);
        }
    }

    #[test]
    fn unknown_tag_is_dropped() {
        let envelope = Envelope {
            t: "reaction_added".into(),
            d: "{}".into(),
            ts: "1".into(),
        };
        assert!(envelope.decode().is_none());
    }

    #[test]
    fn malformed_payload_is_dropped() {
        let envelope = Envelope {
            t: "channel_created".into(),
            d: "{not json".into(),
            ts: "1".into(),
        };
        assert!(envelope.decode().is_none());
    }

    #[test]
    fn heartbeat_wire_json_has_no_payload_or_ts() {
        let json = Envelope::heartbeat().to_wire_json();
        assert_eq!(json, "{\"t\":\"heartbeat\"}");
    }

    #[test]
    fn wire_json_contains_parsed_payload() {
        let event = Event::TypingStarted {
            channel_id: ChannelId::from("c000000001"),
            user_id: UserId::from("u000000001"),
        };
        let envelope = event.encode(5).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&envelope.to_wire_json()).unwrap();
        assert_eq!(json["t"], "typing_started");
        assert_eq!(json["d"]["channel_id"], "c000000001");
        assert_eq!(json["ts"], "5");
    }

    #[test]
    fn channel_scope_per_variant() {
        let cid = ChannelId::from("c000000001");
        assert_eq!(
            Event::MessageDeleted {
                message_id: MessageId::from("m000000001"),
                channel_id: cid.clone(),
            }
            .channel_scope(),
            Some(&cid)
        );
        assert_eq!(
            Event::MessageCreated {
                message: sample_message(),
                author: None,
                channel: None,
            }
            .channel_scope(),
            Some(&cid)
        );
        assert!(Event::Heartbeat.channel_scope().is_none());
        assert!(Event::AuthorUpdated {
            author: sample_author()
        }
        .channel_scope()
        .is_none());
    }

    #[test]
    fn ts_ms_parses_decimal_string() {
        let envelope = Envelope {
            t: "heartbeat".into(),
            d: String::new(),
            ts: "1722470400000".into(),
        };
        assert_eq!(envelope.ts_ms(), Some(1_722_470_400_000));
        assert_eq!(Envelope::heartbeat().ts_ms(), None);
    }
}
