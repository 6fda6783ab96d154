/// Core error type for the follow-up engine.
///
/// Adapter crates should map their specific errors into this type so the HTTP
/// layer can translate failures consistently (client error vs upstream failure).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("security violation: {0}")]
    Security(String),

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
