/// Error type shared across the API and gateway roles.
///
/// Variants map one-to-one onto the wire error kinds: validation (400),
/// unauthorized (401), forbidden (403), not found (404), conflict (400 with a
/// message), gone (410), upstream (transient dependency failures), internal
/// (500).
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Not found")]
    NotFound,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Gone(String),

    #[error("upstream error: {0}")]
    Upstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ChatError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
