//! Mention extraction and channel-scoped resolution.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use tidepool_shared::constants::MAX_MENTIONS_PER_MESSAGE;
use tidepool_shared::ids::UserId;

use crate::store::channels::ChannelRow;
use crate::store::users::{self, UserRow};
use crate::store::{self};

// The `regex` crate has no lookbehind; match the candidate and check the
// preceding character by hand to reject `word@name` forms.
static MENTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@([a-zA-Z0-9_-]{1,32})").expect("static regex"));

fn is_word_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Unique mentioned usernames in order of appearance, capped so nobody can
/// spam thousands of lookups.
pub fn extract_mention_usernames(content: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();

    for m in MENTION_RE.captures_iter(content) {
        let full = m.get(0).expect("match group");
        if full.start() > 0 {
            let preceding = content[..full.start()].chars().next_back();
            if preceding.is_some_and(is_word_char) {
                continue;
            }
        }
        let username = m.get(1).expect("capture group").as_str();
        if seen.insert(username) {
            out.push(username.to_string());
        }
        if out.len() == MAX_MENTIONS_PER_MESSAGE {
            break;
        }
    }
    out
}

/// Restrict resolved users to those who can see the channel, preserving the
/// order the usernames appeared in.
pub fn scope_to_channel(
    usernames: &[String],
    users: Vec<UserRow>,
    channel: &ChannelRow,
    member_ids: Option<&HashSet<UserId>>,
) -> Vec<UserId> {
    let allowed = |user: &UserRow| -> bool {
        if !channel.private {
            return true;
        }
        user.id == channel.author_id || member_ids.is_some_and(|m| m.contains(&user.id))
    };

    let by_username: std::collections::HashMap<&str, &UserRow> = users
        .iter()
        .filter(|u| allowed(u))
        .map(|u| (u.username.as_str(), u))
        .collect();

    let mut out: Vec<UserId> = Vec::new();
    let mut seen: HashSet<&UserId> = HashSet::new();
    for username in usernames {
        if let Some(user) = by_username.get(username.as_str()) {
            if seen.insert(&user.id) {
                out.push(user.id.clone());
            }
        }
    }
    out
}

/// Resolve mentioned usernames to user ids, restricted to the channel's
/// audience for private channels.
pub async fn resolve_for_channel(
    db: &sqlx::PgPool,
    channel: &ChannelRow,
    usernames: &[String],
) -> Result<Vec<UserId>, sqlx::Error> {
    if usernames.is_empty() {
        return Ok(vec![]);
    }

    let users = users::find_by_usernames(db, usernames).await?;
    if users.is_empty() {
        return Ok(vec![]);
    }

    let member_ids = if channel.private {
        Some(
            store::members::user_ids(db, &channel.id)
                .await?
                .into_iter()
                .collect::<HashSet<_>>(),
        )
    } else {
        None
    };

    Ok(scope_to_channel(usernames, users, channel, member_ids.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tidepool_shared::ids::ChannelId;
    use tidepool_shared::models::Status;

    fn user(id: &str, username: &str) -> UserRow {
        UserRow {
            id: UserId::from(id),
            username: username.into(),
            password: String::new(),
            token: String::new(),
            email: format!("{username}@x.io"),
            default_status: Status::Online,
            color: None,
            background_color: None,
            avatar_url: None,
            bio: None,
            flags: 0,
            verified: true,
            verification_code: None,
            bytes: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn channel(private: bool, author: &str) -> ChannelRow {
        ChannelRow {
            id: ChannelId::from("c123456789"),
            name: "lobby".into(),
            topic: String::new(),
            author_id: UserId::from(author),
            private,
            last_message_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn extracts_unique_usernames_in_order() {
        let out = extract_mention_usernames("hey @bob and @carol, also @bob");
        assert_eq!(out, vec!["bob", "carol"]);
    }

    #[test]
    fn rejects_mentions_glued_to_words() {
        assert!(extract_mention_usernames("mail me a@b please").is_empty());
        assert_eq!(extract_mention_usernames("ping @alice!"), vec!["alice"]);
        assert_eq!(extract_mention_usernames("@alice"), vec!["alice"]);
    }

    #[test]
    fn caps_at_twenty_five_mentions() {
        let content: String = (0..40).map(|i| format!("@user{i} ")).collect();
        assert_eq!(extract_mention_usernames(&content).len(), 25);
    }

    #[test]
    fn empty_content_has_no_mentions() {
        assert!(extract_mention_usernames("").is_empty());
        assert!(extract_mention_usernames("no mentions here").is_empty());
    }

    #[test]
    fn public_channel_resolves_everyone() {
        let usernames = vec!["bob".to_string(), "carol".to_string()];
        let users = vec![user("u000000bob", "bob"), user("u0000carol", "carol")];
        let out = scope_to_channel(&usernames, users, &channel(false, "u000000ali"), None);
        assert_eq!(
            out,
            vec![UserId::from("u000000bob"), UserId::from("u0000carol")]
        );
    }

    #[test]
    fn private_channel_scopes_to_members_and_author() {
        let usernames = vec!["bob".to_string(), "carol".to_string()];
        let users = vec![user("u000000bob", "bob"), user("u0000carol", "carol")];
        let members: HashSet<UserId> = [UserId::from("u000000bob")].into_iter().collect();
        let out = scope_to_channel(
            &usernames,
            users,
            &channel(true, "u000000ali"),
            Some(&members),
        );
        assert_eq!(out, vec![UserId::from("u000000bob")]);
    }

    #[test]
    fn private_channel_author_is_always_mentionable() {
        let usernames = vec!["alice".to_string()];
        let users = vec![user("u000000ali", "alice")];
        let members: HashSet<UserId> = HashSet::new();
        let out = scope_to_channel(
            &usernames,
            users,
            &channel(true, "u000000ali"),
            Some(&members),
        );
        assert_eq!(out, vec![UserId::from("u000000ali")]);
    }
}
