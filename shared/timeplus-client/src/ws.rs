//! WebSocket (v1) query results
//!
//! v1 queries are created with a plain POST; rows are then read from
//! `/ws/queries/{id}`, one JSON array per message.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::debug;

use crate::sse::EventSource;
use crate::transport::API_KEY_HEADER;
use crate::types::{Row, ServerEvent};
use crate::{ClientError, Result};

/// Rows read off a query websocket, each as a one-row batch
pub struct WsEvents {
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsEvents {
    pub async fn connect(url: &str, api_key: Option<&str>) -> Result<Self> {
        let mut request = url.into_client_request()?;
        if let Some(key) = api_key {
            let value = HeaderValue::from_str(key)
                .map_err(|e| ClientError::Config(format!("Invalid API key header: {}", e)))?;
            request.headers_mut().insert(API_KEY_HEADER, value);
        }

        let (socket, response) = connect_async(request).await?;
        debug!(status = response.status().as_u16(), "Query websocket connected");
        Ok(Self { socket })
    }
}

#[async_trait]
impl EventSource for WsEvents {
    async fn next_event(&mut self) -> Option<Result<ServerEvent>> {
        loop {
            let message = match self.socket.next().await? {
                Ok(message) => message,
                Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => return None,
                Err(e) => return Some(Err(e.into())),
            };

            let payload = match message {
                Message::Text(text) => text,
                Message::Binary(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Message::Close(_) => return None,
                // ping/pong are answered by tungstenite
                _ => continue,
            };

            return Some(
                serde_json::from_str::<Row>(&payload)
                    .map(|row| ServerEvent::DataBatch(vec![row]))
                    .map_err(|source| ClientError::Decode {
                        kind: "data".to_string(),
                        payload,
                        source,
                    }),
            );
        }
    }
}
