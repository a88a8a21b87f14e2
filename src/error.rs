//! Crate-level error type.
//!
//! Every fallible operation in the store, the completion client and the
//! HTTP layer returns [`ChatError`]. The web server maps each variant onto an
//! HTTP status with [`ChatError::status_code`].

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChatError>;

#[derive(Debug, Error)]
pub enum ChatError {
    /// SQLite failure underneath the store.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The store mutex was poisoned by a panicking holder.
    #[error("internal: store lock poisoned")]
    LockPoisoned,

    /// Transport-level failure talking to the completion endpoint.
    #[error("completion request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The completion endpoint answered with a non-2xx status.
    #[error("completion endpoint returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// The completion endpoint answered 2xx but produced no text.
    #[error("completion returned no content")]
    EmptyCompletion,

    /// No API key was configured for the completion endpoint.
    #[error("OPENAI_API_KEY not set. Export it or add `api_key` to the config file.")]
    MissingApiKey,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A referenced row does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// The request is malformed or fails validation.
    #[error("{0}")]
    BadRequest(String),

    /// No acting user was supplied.
    #[error("user required")]
    Unauthorized,

    /// The acting user lacks admin rights.
    #[error("insufficient permissions: admins only")]
    Forbidden,
}

impl ChatError {
    /// HTTP status the web layer reports for this error.
    pub fn status_code(&self) -> u16 {
        match self {
            ChatError::BadRequest(_) | ChatError::Json(_) => 400,
            ChatError::Unauthorized => 401,
            ChatError::Forbidden => 403,
            ChatError::NotFound(_) => 404,
            _ => 500,
        }
    }
}
