//! HTTP transport
//!
//! Singular JSON request/response calls and long-lived streaming requests
//! whose body is handed back as a byte stream.

use std::pin::Pin;

use bytes::Bytes;
use futures_util::{Stream, StreamExt, TryStreamExt};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Serialize;
use tracing::{debug, instrument};

use crate::config::ClientConfig;
use crate::{ClientError, Result};

/// Streaming response body
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

pub(crate) const API_KEY_HEADER: &str = "X-Api-Key";

/// Executes requests against the Timeplus REST API
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    api_key: Option<String>,
    request_timeout: std::time::Duration,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        Ok(Self {
            client,
            api_key: (!config.api_key.is_empty()).then(|| config.api_key.clone()),
            request_timeout: config.request_timeout,
        })
    }

    /// Transport without the API key header, for unauthenticated endpoints
    pub fn anonymous(config: &ClientConfig) -> Result<Self> {
        let mut transport = Self::new(config)?;
        transport.api_key = None;
        Ok(transport)
    }

    /// Execute a request and return status plus the full body.
    ///
    /// Non-2xx answers are turned into `ClientError::Status`.
    #[instrument(skip(self, body))]
    pub async fn request<B>(&self, method: Method, url: &str, body: Option<&B>) -> Result<(u16, Bytes)>
    where
        B: Serialize + ?Sized,
    {
        let response = self
            .build(method, url, body)?
            .timeout(self.request_timeout)
            .send()
            .await?;

        let response = check_status(response).await?;
        let status = response.status().as_u16();
        let bytes = response.bytes().await?;
        debug!(status, len = bytes.len(), "Request complete");
        Ok((status, bytes))
    }

    /// Open a streaming request. The connection stays open until the
    /// returned stream is dropped or the server ends the body.
    #[instrument(skip(self, body))]
    pub async fn open_event_stream<B>(&self, method: Method, url: &str, body: Option<&B>) -> Result<ByteStream>
    where
        B: Serialize + ?Sized,
    {
        let response = self
            .build(method, url, body)?
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await?;

        let response = check_status(response).await?;
        debug!(status = response.status().as_u16(), "Event stream opened");
        Ok(response.bytes_stream().map_err(ClientError::from).boxed())
    }

    pub(crate) fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    fn build<B>(&self, method: Method, url: &str, body: Option<&B>) -> Result<RequestBuilder>
    where
        B: Serialize + ?Sized,
    {
        let mut builder = self.client.request(method, url);
        if let Some(key) = &self.api_key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        if let Some(body) = body {
            let encoded = serde_json::to_vec(body)?;
            builder = builder
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(encoded);
        }
        Ok(builder)
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ClientError::Status {
        status: status.as_u16(),
        body,
    })
}
