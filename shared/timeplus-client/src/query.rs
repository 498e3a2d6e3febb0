//! Streaming query results
//!
//! A background task owns the connection and pushes row batches through a
//! single-slot channel; the caller drains them through [`QueryStream`].
//! Cancellation is a `watch` flag raced against every read and send, so a
//! task blocked on the socket still stops promptly.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info_span, warn, Instrument};

use crate::sse::EventSource;
use crate::types::{DataBatch, QueryMetadata, QueryMetrics, ServerEvent};
use crate::{ClientError, Result};

/// A running query
#[derive(Debug)]
pub struct StreamingQuery {
    pub metadata: QueryMetadata,
    pub stream: QueryStream,
    pub canceller: QueryCanceller,
    /// Latest metrics event reported by the server, if any
    pub metrics: watch::Receiver<Option<QueryMetrics>>,
}

impl StreamingQuery {
    pub fn into_parts(self) -> (QueryStream, QueryCanceller, QueryMetadata) {
        (self.stream, self.canceller, self.metadata)
    }
}

/// Cancels a running query. Cheap to clone; cancelling twice is a no-op.
#[derive(Debug, Clone)]
pub struct QueryCanceller {
    signal: Arc<watch::Sender<bool>>,
}

impl QueryCanceller {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { signal: Arc::new(tx) }, rx)
    }

    /// Stop delivery and close the underlying connection.
    pub fn cancel(&self) {
        self.signal.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.signal.borrow()
    }
}

/// Row batches of a running query, in server order.
///
/// Items are `Err` for a malformed event (the stream continues) or for a
/// transport failure (the stream then ends). Dropping the stream cancels
/// the query.
#[derive(Debug)]
pub struct QueryStream {
    rx: mpsc::Receiver<Result<DataBatch>>,
    canceller: QueryCanceller,
}

impl QueryStream {
    /// Next batch, or `None` once the server closed the stream or the query
    /// was cancelled.
    pub async fn next_batch(&mut self) -> Option<Result<DataBatch>> {
        if self.canceller.is_cancelled() {
            return None;
        }
        let item = self.rx.recv().await;
        if self.canceller.is_cancelled() {
            return None;
        }
        item
    }
}

impl Stream for QueryStream {
    type Item = Result<DataBatch>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.canceller.is_cancelled() {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            // cancel() may have landed while this item was in the slot
            Poll::Ready(Some(_)) if self.canceller.is_cancelled() => Poll::Ready(None),
            other => other,
        }
    }
}

impl Drop for QueryStream {
    fn drop(&mut self) {
        self.canceller.cancel();
    }
}

/// Read the mandatory metadata event, then hand the rest of the source to a
/// background pump.
pub(crate) async fn start<E>(sql: &str, mut source: E) -> Result<StreamingQuery>
where
    E: EventSource + 'static,
{
    let metadata = match source.next_event().await {
        Some(Ok(ServerEvent::Metadata(metadata))) => *metadata,
        Some(Ok(other)) => {
            return Err(ClientError::query(
                sql,
                ClientError::Protocol(format!(
                    "expected query metadata as first event, got {} event",
                    other.kind()
                )),
            ))
        }
        Some(Err(e)) => return Err(ClientError::query(sql, e)),
        None => {
            return Err(ClientError::query(
                sql,
                ClientError::Protocol("stream closed before query metadata".to_string()),
            ))
        }
    };

    Ok(spawn(metadata, source))
}

/// Pump an event source that has no metadata preamble.
pub(crate) fn spawn<E>(metadata: QueryMetadata, source: E) -> StreamingQuery
where
    E: EventSource + 'static,
{
    let (tx, rx) = mpsc::channel(1);
    let (canceller, cancelled) = QueryCanceller::new();
    let (metrics_tx, metrics_rx) = watch::channel(None);

    let span = info_span!("query", id = %metadata.id);
    tokio::spawn(pump(source, tx, cancelled, metrics_tx).instrument(span));

    StreamingQuery {
        metadata,
        stream: QueryStream {
            rx,
            canceller: canceller.clone(),
        },
        canceller,
        metrics: metrics_rx,
    }
}

async fn pump<E>(
    mut source: E,
    tx: mpsc::Sender<Result<DataBatch>>,
    mut cancelled: watch::Receiver<bool>,
    metrics: watch::Sender<Option<QueryMetrics>>,
) where
    E: EventSource,
{
    loop {
        let next = tokio::select! {
            biased;
            _ = wait_cancelled(&mut cancelled) => {
                debug!("Query cancelled");
                break;
            }
            next = source.next_event() => next,
        };

        let item = match next {
            None => {
                debug!("Server closed the query stream");
                break;
            }
            Some(Ok(ServerEvent::DataBatch(batch))) => Ok(batch),
            Some(Ok(ServerEvent::Metrics(m))) => {
                metrics.send_replace(Some(m));
                continue;
            }
            Some(Ok(ServerEvent::Metadata(_))) => {
                warn!("Ignoring repeated query metadata event");
                continue;
            }
            Some(Err(e)) => Err(e),
        };

        let terminal = matches!(&item, Err(e) if !e.is_recoverable());
        if let Err(e) = &item {
            debug!(error = %e, terminal, "Query stream error");
        }

        tokio::select! {
            biased;
            _ = wait_cancelled(&mut cancelled) => break,
            sent = tx.send(item) => {
                if sent.is_err() {
                    debug!("Query stream consumer dropped");
                    break;
                }
            }
        }

        if terminal {
            break;
        }
    }
    // dropping `source` closes the connection, dropping `tx` ends the stream
}

async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    let closed = rx.wait_for(|cancelled| *cancelled).await.is_err();
    if closed {
        // every canceller is gone without cancelling
        std::future::pending::<()>().await;
    }
}
