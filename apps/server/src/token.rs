//! Opaque bearer tokens: `b64(user_id) "." b64(issued_unix) "." random10`.
//!
//! Tokens are matched against the store by equality; rotation is by
//! replacement, no expiry is enforced on the token itself.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use chrono::Utc;
use tidepool_shared::error::ChatError;
use tidepool_shared::ids::{generate_id, UserId};

/// Issue a new token for a user id, stamped with the current unix time.
pub fn generate_token(user_id: &UserId) -> String {
    let b64_id = B64.encode(user_id.as_str());
    let b64_ts = B64
        .encode(Utc::now().timestamp().to_string())
        .trim_end_matches('=')
        .to_string();
    let randomness = generate_id();
    format!("{b64_id}.{b64_ts}.{randomness}")
}

/// Split a token back into (user id, issued unix seconds, randomness).
pub fn deconstruct_token(token: &str) -> Result<(UserId, i64, String), ChatError> {
    let mut parts = token.splitn(3, '.');
    let (Some(b64_id), Some(b64_ts), Some(randomness)) =
        (parts.next(), parts.next(), parts.next())
    else {
        return Err(ChatError::Unauthorized);
    };

    let id_bytes = B64.decode(b64_id).map_err(|_| ChatError::Unauthorized)?;
    let user_id = String::from_utf8(id_bytes).map_err(|_| ChatError::Unauthorized)?;

    // the timestamp segment is stored without padding
    let padded = pad_base64(b64_ts);
    let ts_bytes = B64.decode(padded).map_err(|_| ChatError::Unauthorized)?;
    let issued: i64 = String::from_utf8(ts_bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(ChatError::Unauthorized)?;

    Ok((UserId::from(user_id), issued, randomness.to_string()))
}

fn pad_base64(s: &str) -> String {
    let rem = s.len() % 4;
    if rem == 0 {
        s.to_string()
    } else {
        format!("{s}{}", "=".repeat(4 - rem))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trips_id_and_issue_time() {
        let user_id = UserId::new();
        let before = Utc::now().timestamp();
        let token = generate_token(&user_id);
        let after = Utc::now().timestamp();

        let (id, issued, randomness) = deconstruct_token(&token).unwrap();
        assert_eq!(id, user_id);
        assert!(issued >= before && issued <= after);
        assert_eq!(randomness.len(), 10);
    }

    #[test]
    fn tokens_are_unique_per_issue() {
        let user_id = UserId::new();
        assert_ne!(generate_token(&user_id), generate_token(&user_id));
    }

    #[test]
    fn malformed_tokens_are_rejected() {
        assert!(deconstruct_token("").is_err());
        assert!(deconstruct_token("one.two").is_err());
        assert!(deconstruct_token("!!!.###.@@@").is_err());
    }

    #[test]
    fn tampered_timestamp_is_rejected() {
        let token = generate_token(&UserId::new());
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[1] = "bm90YW51bWJlcg"; // "notanumber"
        assert!(deconstruct_token(&parts.join(".")).is_err());
    }

    #[test]
    fn pad_base64_restores_stripped_padding() {
        let raw = "1722470400";
        let stripped = B64.encode(raw).trim_end_matches('=').to_string();
        let decoded = B64.decode(pad_base64(&stripped)).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), raw);
    }
}
