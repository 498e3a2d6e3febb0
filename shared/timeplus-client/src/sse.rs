//! Server-sent event demultiplexer
//!
//! Turns the raw body of a streaming query into [`ServerEvent`]s. The
//! query endpoint frames events as
//!
//! ```text
//! event: query
//! data: {"id": "...", "result": {"header": [...]}}
//!
//! data: [[1, "a"], [2, "b"]]
//!
//! event: metrics
//! data: {"count": 2}
//! ```
//!
//! A typed event is an `event:` line immediately followed by its payload
//! line. Any other line carries a row batch.

use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::types::{DataBatch, QueryMetadata, QueryMetrics, ServerEvent};
use crate::{ClientError, Result};

const QUERY_EVENT: &str = "query";
const METRICS_EVENT: &str = "metrics";
const DATA_EVENT: &str = "data";

/// Source of demultiplexed events, drained by the query pump.
///
/// `None` ends the sequence. A non-recoverable error is the last item a
/// source yields.
#[async_trait]
pub trait EventSource: Send {
    async fn next_event(&mut self) -> Option<Result<ServerEvent>>;
}

/// Reassembles complete lines from arbitrarily split chunks.
pub struct LineReader<S> {
    inner: S,
    buf: BytesMut,
    /// Prefix of `buf` already known to contain no terminator
    scanned: usize,
}

impl<S> LineReader<S>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buf: BytesMut::new(),
            scanned: 0,
        }
    }

    /// Next line without its `\n` / `\r\n` terminator.
    ///
    /// Bytes after the last terminator are dropped at end of stream.
    pub async fn next_line(&mut self) -> Option<Result<String>> {
        loop {
            if let Some(offset) = self.buf[self.scanned..].iter().position(|b| *b == b'\n') {
                let end = self.scanned + offset;
                let mut line = self.buf.split_to(end);
                self.buf.advance(1);
                self.scanned = 0;
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                return Some(Ok(String::from_utf8_lossy(&line).into_owned()));
            }
            self.scanned = self.buf.len();

            match self.inner.next().await {
                Some(Ok(chunk)) => self.buf.extend_from_slice(&chunk),
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    if !self.buf.is_empty() {
                        debug!(len = self.buf.len(), "Dropping unterminated trailing line");
                        self.buf.clear();
                        self.scanned = 0;
                    }
                    return None;
                }
            }
        }
    }
}

/// Demultiplexes an SSE byte stream into typed events, in arrival order.
pub struct EventDemux<S> {
    lines: LineReader<S>,
    finished: bool,
}

impl<S> EventDemux<S>
where
    S: Stream<Item = Result<Bytes>> + Unpin + Send,
{
    pub fn new(inner: S) -> Self {
        Self {
            lines: LineReader::new(inner),
            finished: false,
        }
    }

    async fn read_event(&mut self) -> Option<Result<ServerEvent>> {
        loop {
            let line = match self.lines.next_line().await? {
                Ok(line) => line,
                Err(e) => return Some(Err(e)),
            };

            if line.trim().is_empty() {
                debug!("Keep-alive");
                continue;
            }
            // SSE comment
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = split_field(&line);
            if field != "event" {
                return Some(decode_batch(DATA_EVENT, value.trim()));
            }

            let kind = value.trim().to_string();
            let data_line = match self.lines.next_line().await {
                Some(Ok(line)) => line,
                Some(Err(e)) => return Some(Err(e)),
                None => {
                    return Some(Err(ClientError::Protocol(format!(
                        "stream ended after `event: {}` without a payload line",
                        kind
                    ))))
                }
            };
            let Some(colon) = data_line.find(':') else {
                return Some(Err(ClientError::Protocol(format!(
                    "expected a field/value line after `event: {}`, got {:?}",
                    kind, data_line
                ))));
            };
            let payload = data_line[colon + 1..].trim();

            debug!(kind = %kind, len = payload.len(), "Typed event");
            return Some(decode_typed(&kind, payload));
        }
    }
}

#[async_trait]
impl<S> EventSource for EventDemux<S>
where
    S: Stream<Item = Result<Bytes>> + Unpin + Send,
{
    async fn next_event(&mut self) -> Option<Result<ServerEvent>> {
        if self.finished {
            return None;
        }
        let item = self.read_event().await;
        match &item {
            None => self.finished = true,
            Some(Err(e)) if !e.is_recoverable() => self.finished = true,
            _ => {}
        }
        item
    }
}

fn split_field(line: &str) -> (&str, &str) {
    match line.find(':') {
        Some(colon) => (line[..colon].trim(), &line[colon + 1..]),
        None => (line.trim(), ""),
    }
}

fn decode_typed(kind: &str, payload: &str) -> Result<ServerEvent> {
    match kind {
        QUERY_EVENT => decode::<QueryMetadata>(kind, payload).map(|m| ServerEvent::Metadata(Box::new(m))),
        METRICS_EVENT => decode::<QueryMetrics>(kind, payload).map(ServerEvent::Metrics),
        // unknown kinds carry rows
        _ => decode_batch(kind, payload),
    }
}

fn decode_batch(kind: &str, payload: &str) -> Result<ServerEvent> {
    decode::<DataBatch>(kind, payload).map(ServerEvent::DataBatch)
}

fn decode<T: DeserializeOwned>(kind: &str, payload: &str) -> Result<T> {
    serde_json::from_str(payload).map_err(|source| ClientError::Decode {
        kind: kind.to_string(),
        payload: payload.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;
    use serde_json::json;

    fn chunks(parts: &[&str]) -> impl Stream<Item = Result<Bytes>> + Unpin + Send {
        let owned: Vec<Result<Bytes>> = parts
            .iter()
            .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
            .collect();
        stream::iter(owned)
    }

    async fn collect(parts: &[&str]) -> Vec<Result<ServerEvent>> {
        let mut demux = EventDemux::new(chunks(parts));
        let mut out = Vec::new();
        while let Some(item) = demux.next_event().await {
            out.push(item);
        }
        out
    }

    const FEED: &str = concat!(
        "event: query\n",
        "data: {\"id\": \"q1\", \"sql\": \"select 1\", \"result\": {\"header\": [{\"name\": \"1\", \"type\": \"uint8\"}]}}\n",
        "\n",
        "data: [[1]]\n",
        "\n",
        "event: metrics\n",
        "data: {\"count\": 1}\n",
        "\n",
        "data: [[2], [3]]\n",
    );

    #[tokio::test]
    async fn test_events_in_framing_order() {
        let events: Vec<ServerEvent> = collect(&[FEED]).await.into_iter().map(|e| e.unwrap()).collect();

        let kinds: Vec<&str> = events.iter().map(|e| e.kind()).collect();
        assert_eq!(kinds, vec!["query", "data", "metrics", "data"]);

        match &events[0] {
            ServerEvent::Metadata(meta) => {
                assert_eq!(meta.id, "q1");
                assert_eq!(meta.header()[0].name, "1");
            }
            other => panic!("expected metadata, got {:?}", other),
        }
        assert_eq!(events[1], ServerEvent::DataBatch(vec![vec![json!(1)]]));
        assert_eq!(events[3], ServerEvent::DataBatch(vec![vec![json!(2)], vec![json!(3)]]));
    }

    #[tokio::test]
    async fn test_split_lines_reassemble_identically() {
        let whole = collect(&[FEED]).await;

        // every byte in its own chunk
        let singles: Vec<String> = FEED.chars().map(|c| c.to_string()).collect();
        let refs: Vec<&str> = singles.iter().map(String::as_str).collect();
        let split = collect(&refs).await;

        // uneven chunks cutting through the payloads
        let (a, rest) = FEED.split_at(17);
        let (b, c) = rest.split_at(64);
        let uneven = collect(&[a, b, c]).await;

        let unwrap = |v: Vec<Result<ServerEvent>>| v.into_iter().map(|e| e.unwrap()).collect::<Vec<_>>();
        let whole = unwrap(whole);
        assert_eq!(whole, unwrap(split));
        assert_eq!(whole, unwrap(uneven));
    }

    #[tokio::test]
    async fn test_crlf_terminators() {
        let events = collect(&["event: metrics\r\ndata: {\"rows\": 3}\r\n\r\ndata: [[\"x\"]]\r\n"]).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Ok(ServerEvent::Metrics(ref m)) if m["rows"] == json!(3)));
        assert!(matches!(events[1], Ok(ServerEvent::DataBatch(ref b)) if b[0][0] == json!("x")));
    }

    #[tokio::test]
    async fn test_malformed_payload_does_not_end_stream() {
        let events = collect(&["data: [[1]\n", "event: metrics\ndata: {nope\n", "data: [[2]]\n"]).await;
        assert_eq!(events.len(), 3);

        let first = events[0].as_ref().unwrap_err();
        assert!(first.is_recoverable());
        assert!(matches!(first, ClientError::Decode { kind, .. } if kind == "data"));
        assert!(matches!(&events[1], Err(ClientError::Decode { kind, .. }) if kind == "metrics"));
        assert_eq!(events[2].as_ref().unwrap(), &ServerEvent::DataBatch(vec![vec![json!(2)]]));
    }

    #[tokio::test]
    async fn test_unknown_event_kind_is_data() {
        let events = collect(&["event: data\ndata: [[7]]\n", "event:\ndata: [[8]]\n"]).await;
        let batches: Vec<ServerEvent> = events.into_iter().map(|e| e.unwrap()).collect();
        assert_eq!(
            batches,
            vec![
                ServerEvent::DataBatch(vec![vec![json!(7)]]),
                ServerEvent::DataBatch(vec![vec![json!(8)]]),
            ]
        );
    }

    #[tokio::test]
    async fn test_comments_and_blank_lines_skipped() {
        let events = collect(&[": ping\n\n\n", "data: []\n"]).await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap(), &ServerEvent::DataBatch(vec![]));
    }

    #[tokio::test]
    async fn test_event_without_payload_line_is_fatal() {
        let events = collect(&["event: query\n"]).await;
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Err(ClientError::Protocol(_))));

        let events = collect(&["event: query\nnot a pair\ndata: [[1]]\n"]).await;
        assert_eq!(events.len(), 1, "protocol error must end the sequence");
        assert!(matches!(events[0], Err(ClientError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_read_error_terminates() {
        let parts: Vec<Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"data: [[1]]\n")),
            Err(ClientError::Protocol("connection reset".into())),
            Ok(Bytes::from_static(b"data: [[2]]\n")),
        ];
        let mut demux = EventDemux::new(stream::iter(parts));

        assert!(matches!(demux.next_event().await, Some(Ok(ServerEvent::DataBatch(_)))));
        assert!(matches!(demux.next_event().await, Some(Err(ClientError::Protocol(_)))));
        assert!(demux.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_unterminated_tail_is_dropped() {
        let mut lines = LineReader::new(chunks(&["data: [[1]]\ndata: [[2"]));
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "data: [[1]]");
        assert!(lines.next_line().await.is_none());
    }
}
