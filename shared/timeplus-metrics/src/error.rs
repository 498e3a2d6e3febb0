//! Error types for metrics series

use timeplus_client::ClientError;

/// Result type alias
pub type Result<T> = std::result::Result<T, MetricsError>;

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Metrics stream {0} already exists")]
    AlreadyExists(String),

    #[error("Metrics stream {0} does not exist")]
    NotFound(String),

    #[error("Expected {expected} {field}, got {actual}")]
    Validation {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Invalid metrics schema: {0}")]
    Schema(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to flush {rows} observations into {stream}: {source}")]
    Flush {
        stream: String,
        rows: usize,
        #[source]
        source: ClientError,
    },

    #[error(transparent)]
    Client(#[from] ClientError),
}
