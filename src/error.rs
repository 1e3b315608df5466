//! Error types for the inbox listener.

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    #[error("Draft error: {0}")]
    Draft(#[from] DraftError),

    #[error("Notify error: {0}")]
    Notify(#[from] NotifyError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Catalog loading errors.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read catalog file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Mail feed and extraction errors.
#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("Failed to connect to mail source: {reason}")]
    Connect { reason: String },

    #[error("Mail source protocol error: {reason}")]
    Protocol { reason: String },

    #[error("Extraction failed for item {id}: {reason}")]
    Extraction { id: String, reason: String },
}

/// Reply drafting errors.
#[derive(Debug, thiserror::Error)]
pub enum DraftError {
    #[error("Draft request failed: {reason}")]
    Request { reason: String },

    #[error("Invalid draft response: {reason}")]
    InvalidResponse { reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Notification surface errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Failed to send notification: {reason}")]
    Send { reason: String },

    #[error("Invalid address: {reason}")]
    InvalidAddress { reason: String },
}

/// Result type alias for the listener.
pub type Result<T> = std::result::Result<T, Error>;
