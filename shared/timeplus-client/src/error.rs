//! Error types for the Timeplus client

/// Result type alias
pub type Result<T> = std::result::Result<T, ClientError>;

/// Timeplus client errors
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Invalid {kind} event payload {payload:?}: {source}")]
    Decode {
        kind: String,
        payload: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Query `{sql}` failed: {source}")]
    Query {
        sql: String,
        #[source]
        source: Box<ClientError>,
    },

    #[error("Stream not found: {0}")]
    StreamNotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ClientError {
    pub(crate) fn query(sql: &str, source: ClientError) -> Self {
        Self::Query {
            sql: sql.to_string(),
            source: Box::new(source),
        }
    }

    /// Only a single malformed event payload is recoverable; the stream
    /// keeps going after it.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode { .. })
    }

    /// HTTP status of a rejected request, if the server answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport(e) => e.status().map(|s| s.as_u16()),
            Self::Query { source, .. } => source.status_code(),
            _ => None,
        }
    }
}
