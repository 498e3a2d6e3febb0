//! Low-level ingest client
//!
//! Talks to the proton ingest endpoint directly, without an API key.

use reqwest::Method;

use crate::config::ClientConfig;
use crate::transport::HttpTransport;
use crate::types::IngestPayload;
use crate::Result;

const INGEST_PATH: &str = "proton/v1/ingest/streams";

#[derive(Debug, Clone)]
pub struct LowLevelClient {
    address: String,
    transport: HttpTransport,
}

impl LowLevelClient {
    pub fn new(address: &str) -> Result<Self> {
        let config = ClientConfig {
            address: address.to_string(),
            ..ClientConfig::default()
        };
        Ok(Self {
            address: address.trim_end_matches('/').to_string(),
            transport: HttpTransport::anonymous(&config)?,
        })
    }

    pub fn ingest_url(&self, stream: &str) -> String {
        format!("{}/{}/{}", self.address, INGEST_PATH, stream)
    }

    pub async fn insert_data(&self, payload: &IngestPayload) -> Result<()> {
        let url = self.ingest_url(&payload.stream);
        self.transport.request(Method::POST, &url, Some(&payload.data)).await?;
        tracing::debug!(stream = %payload.stream, rows = payload.data.data.len(), "Ingested");
        Ok(())
    }
}
