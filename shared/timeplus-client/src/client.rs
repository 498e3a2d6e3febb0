//! Timeplus REST client
//!
//! Stream and view registry, ingest, and streaming queries.

use reqwest::Method;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument};

use crate::config::ClientConfig;
use crate::query::{self, StreamingQuery};
use crate::sse::EventDemux;
use crate::transport::HttpTransport;
use crate::types::{BatchingPolicy, IngestPayload, QueryMetadata, QueryRequest, StreamDef, View};
use crate::ws::WsEvents;
use crate::{ClientError, Result};

/// Timeplus API client
#[derive(Debug, Clone)]
pub struct TimeplusClient {
    config: ClientConfig,
    transport: HttpTransport,
}

impl TimeplusClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self { config, transport })
    }

    /// Client configured from `TIMEPLUS_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    #[instrument(skip(self, stream), fields(stream = %stream.name))]
    pub async fn create_stream(&self, stream: &StreamDef) -> Result<()> {
        stream.validate()?;
        let url = format!("{}/streams", self.config.base_url());
        self.transport.request(Method::POST, &url, Some(stream)).await?;
        info!(columns = stream.columns.len(), "Stream created");
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete_stream(&self, name: &str) -> Result<()> {
        let url = format!("{}/streams/{}", self.config.base_url(), name);
        self.transport.request::<()>(Method::DELETE, &url, None).await?;
        info!("Stream deleted");
        Ok(())
    }

    pub async fn list_streams(&self) -> Result<Vec<StreamDef>> {
        let url = format!("{}/streams", self.config.base_url());
        self.get_json(&url).await
    }

    pub async fn exist_stream(&self, name: &str) -> Result<bool> {
        Ok(self.list_streams().await?.iter().any(|s| s.name == name))
    }

    pub async fn get_stream(&self, name: &str) -> Result<StreamDef> {
        self.list_streams()
            .await?
            .into_iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ClientError::StreamNotFound(name.to_string()))
    }

    #[instrument(skip(self, view), fields(view = %view.name))]
    pub async fn create_view(&self, view: &View) -> Result<()> {
        let url = format!("{}/views", self.config.base_url());
        self.transport.request(Method::POST, &url, Some(view)).await?;
        info!(materialized = view.materialized, "View created");
        Ok(())
    }

    pub async fn list_views(&self) -> Result<Vec<View>> {
        let url = format!("{}/views", self.config.base_url());
        self.get_json(&url).await
    }

    pub async fn exist_view(&self, name: &str) -> Result<bool> {
        Ok(self.list_views().await?.iter().any(|v| v.name == name))
    }

    #[instrument(skip(self, payload), fields(stream = %payload.stream, rows = payload.data.data.len()))]
    pub async fn insert_data(&self, payload: &IngestPayload) -> Result<()> {
        let url = format!("{}/streams/{}/ingest", self.config.base_url(), payload.stream);
        self.transport.request(Method::POST, &url, Some(&payload.data)).await?;
        debug!("Ingest accepted");
        Ok(())
    }

    /// Run a streaming query over SSE.
    ///
    /// Blocks until the server sent the query metadata. Zero for either
    /// batching threshold leaves it to the server.
    pub async fn query_stream(&self, sql: &str, batch_count: u32, batch_time_ms: u32) -> Result<StreamingQuery> {
        self.query(QueryRequest::new(sql).with_policy(BatchingPolicy::new(batch_count, batch_time_ms)))
            .await
    }

    #[instrument(skip(self, request), fields(sql = %request.sql))]
    pub async fn query(&self, request: QueryRequest) -> Result<StreamingQuery> {
        let url = format!("{}/queries", self.config.base_url());
        let body = self
            .transport
            .open_event_stream(Method::POST, &url, Some(&request))
            .await
            .map_err(|e| ClientError::query(&request.sql, e))?;

        let query = query::start(&request.sql, EventDemux::new(body)).await?;
        info!(id = %query.metadata.id, "Streaming query started");
        Ok(query)
    }

    /// Run a query through the v1 websocket endpoint. Each row arrives as
    /// its own batch.
    #[instrument(skip(self))]
    pub async fn query_stream_v1(&self, sql: &str) -> Result<StreamingQuery> {
        let url = format!("{}/queries", self.config.base_url_v1());
        let request = QueryRequest::new(sql);
        let (_, body) = self
            .transport
            .request(Method::POST, &url, Some(&request))
            .await
            .map_err(|e| ClientError::query(sql, e))?;
        let metadata: QueryMetadata = serde_json::from_slice(&body).map_err(|e| ClientError::query(sql, e.into()))?;

        let ws_url = self.config.query_ws_url(&metadata.id);
        let events = WsEvents::connect(&ws_url, self.transport.api_key())
            .await
            .map_err(|e| ClientError::query(sql, e))?;

        info!(id = %metadata.id, "Websocket query started");
        Ok(query::spawn(metadata, events))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let (_, body) = self.transport.request::<()>(Method::GET, url, None).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}
