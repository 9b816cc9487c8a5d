use std::sync::LazyLock;

use cuid2::CuidConstructor;

/// Length of every entity id. Short enough to embed in tokens and object
/// store keys, long enough to be collision resistant at this scale.
pub const ID_LENGTH: u16 = 10;

static GENERATOR: LazyLock<CuidConstructor> =
    LazyLock::new(|| CuidConstructor::new().with_length(ID_LENGTH));

/// Generate a fresh collision-resistant short id.
pub fn generate_id() -> String {
    GENERATOR.create_id()
}

macro_rules! define_id {
    ($name:ident) => {
        /// Typed wrapper around an opaque short string id.
        #[derive(
            Debug,
            Clone,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
        #[cfg_attr(feature = "sqlx", sqlx(transparent))]
        pub struct $name(pub String);

        #[allow(clippy::new_without_default)]
        impl $name {
            /// Generate a new id.
            pub fn new() -> Self {
                Self(generate_id())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

define_id!(UserId);
define_id!(ChannelId);
define_id!(MessageId);
define_id!(FileId);
define_id!(InviteId);
define_id!(EmojiId);
define_id!(WebhookId);
define_id!(ConnectionId);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_have_fixed_length() {
        let id = generate_id();
        assert_eq!(id.len(), ID_LENGTH as usize);
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = UserId::new();
        let b = UserId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn ids_serialize_as_plain_strings() {
        let id = ChannelId::from("abc123defg");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"abc123defg\"");
    }

    #[test]
    fn ids_deserialize_from_plain_strings() {
        let id: MessageId = serde_json::from_str("\"m0000000001\"").unwrap();
        assert_eq!(id.as_str(), "m0000000001");
    }

    #[test]
    fn display_matches_inner_string() {
        let id = UserId::from("u123456789");
        assert_eq!(id.to_string(), "u123456789");
    }
}
