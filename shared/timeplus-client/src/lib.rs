//! Timeplus client SDK
//!
//! Manages streams and views over the REST API, ingests rows, and runs
//! streaming SQL queries whose results arrive over server-sent events or a
//! websocket.

mod client;
mod config;
mod error;
mod low;
mod query;
mod sse;
mod transport;
mod types;
mod ws;

pub use client::TimeplusClient;
pub use config::{ClientConfig, API_V1_VERSION, API_VERSION};
pub use error::{ClientError, Result};
pub use low::LowLevelClient;
pub use query::{QueryCanceller, QueryStream, StreamingQuery};
pub use sse::{EventDemux, EventSource, LineReader};
pub use transport::{ByteStream, HttpTransport};
pub use types::*;

/// Re-export for convenience
pub mod prelude {
    pub use super::{ClientConfig, ClientError, Result, StreamingQuery, TimeplusClient};
    pub use super::types::*;
}
