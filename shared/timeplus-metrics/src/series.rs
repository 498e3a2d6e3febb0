//! Metrics series
//!
//! Observations are buffered in memory and flushed into the series' backing
//! stream on a fixed interval, one ingest call per flush.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use timeplus_client::{ClientError, IngestData, IngestPayload};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};

use crate::catalog::StreamCatalog;
use crate::observation::{ExtraTags, Observation};
use crate::schema::{stream_name, SeriesSchema};
use crate::{MetricsError, Result};

/// Flush counters of a series
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushStats {
    pub flushed_batches: u64,
    pub flushed_rows: u64,
    pub dropped_batches: u64,
    pub dropped_rows: u64,
}

#[derive(Default)]
struct Counters {
    flushed_batches: AtomicU64,
    flushed_rows: AtomicU64,
    dropped_batches: AtomicU64,
    dropped_rows: AtomicU64,
}

struct SeriesInner {
    name: String,
    stream_name: String,
    schema: SeriesSchema,
    catalog: Arc<dyn StreamCatalog>,
    buffer: Mutex<Vec<Observation>>,
    counters: Counters,
}

/// Handle to a metrics series. Clones share the buffer and flush loop; the
/// loop stops once every handle is dropped.
#[derive(Clone)]
pub struct MetricsSeries {
    inner: Arc<SeriesInner>,
}

impl std::fmt::Debug for MetricsSeries {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsSeries")
            .field("name", &self.inner.name)
            .field("stream", &self.inner.stream_name)
            .field("tags", &self.inner.schema.tag_names)
            .field("values", &self.inner.schema.value_names)
            .finish()
    }
}

impl MetricsSeries {
    /// Provision `_tp_metric_<name>` and start flushing into it.
    pub async fn create<C: StreamCatalog>(
        name: &str,
        tag_names: Vec<String>,
        value_names: Vec<String>,
        catalog: Arc<C>,
        flush_interval: Duration,
    ) -> Result<Self> {
        check_interval(flush_interval)?;
        let stream = stream_name(name);
        if catalog.exist_stream(&stream).await? {
            return Err(MetricsError::AlreadyExists(stream));
        }

        let schema = SeriesSchema::declare(tag_names, value_names);
        let def = schema.stream_def(&stream);
        def.validate()?;
        catalog.create_stream(&def).await?;

        info!(stream = %stream, columns = ?schema.columns, "Metrics stream created");
        Ok(Self::start(name, stream, schema, catalog, flush_interval))
    }

    /// Resolve an existing `_tp_metric_<name>` stream and start flushing
    /// into it.
    pub async fn attach<C: StreamCatalog>(name: &str, catalog: Arc<C>, flush_interval: Duration) -> Result<Self> {
        check_interval(flush_interval)?;
        let stream = stream_name(name);
        if !catalog.exist_stream(&stream).await? {
            return Err(MetricsError::NotFound(stream));
        }

        let def = match catalog.get_stream(&stream).await {
            Ok(def) => def,
            Err(ClientError::StreamNotFound(_)) => return Err(MetricsError::NotFound(stream)),
            Err(e) => return Err(e.into()),
        };
        let schema = SeriesSchema::infer(&def)?;

        info!(stream = %stream, columns = ?schema.columns, "Metrics stream attached");
        Ok(Self::start(name, stream, schema, catalog, flush_interval))
    }

    /// Attach to the series if its stream exists, create it otherwise.
    pub async fn open<C: StreamCatalog>(
        name: &str,
        tag_names: Vec<String>,
        value_names: Vec<String>,
        catalog: Arc<C>,
        flush_interval: Duration,
    ) -> Result<Self> {
        match Self::attach(name, catalog.clone(), flush_interval).await {
            Err(MetricsError::NotFound(_)) => {
                Self::create(name, tag_names, value_names, catalog, flush_interval).await
            }
            other => other,
        }
    }

    fn start<C: StreamCatalog>(
        name: &str,
        stream_name: String,
        schema: SeriesSchema,
        catalog: Arc<C>,
        flush_interval: Duration,
    ) -> Self {
        let inner = Arc::new(SeriesInner {
            name: name.to_string(),
            stream_name,
            schema,
            catalog,
            buffer: Mutex::new(Vec::new()),
            counters: Counters::default(),
        });

        let span = tracing::info_span!("metrics", stream = %inner.stream_name);
        tokio::spawn(flush_loop(Arc::downgrade(&inner), flush_interval).instrument(span));
        Self { inner }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn stream_name(&self) -> &str {
        &self.inner.stream_name
    }

    pub fn tag_names(&self) -> &[String] {
        &self.inner.schema.tag_names
    }

    pub fn value_names(&self) -> &[String] {
        &self.inner.schema.value_names
    }

    /// Ingest column order
    pub fn columns(&self) -> &[String] {
        &self.inner.schema.columns
    }

    /// Record one sample. Never waits on I/O.
    pub fn observe(
        &self,
        namespace: &str,
        subsystem: &str,
        tags: Vec<Option<String>>,
        values: Vec<Option<f64>>,
        extra_tags: Option<ExtraTags>,
    ) -> Result<()> {
        let schema = &self.inner.schema;
        if tags.len() != schema.tag_names.len() {
            return Err(MetricsError::Validation {
                field: "tags",
                expected: schema.tag_names.len(),
                actual: tags.len(),
            });
        }
        if values.len() != schema.value_names.len() {
            return Err(MetricsError::Validation {
                field: "values",
                expected: schema.value_names.len(),
                actual: values.len(),
            });
        }

        let observation = Observation::now(namespace, subsystem, tags, values, extra_tags);
        self.inner.buffer.lock().push(observation);
        Ok(())
    }

    /// Observations waiting for the next flush
    pub fn pending(&self) -> usize {
        self.inner.buffer.lock().len()
    }

    /// Flush the buffer now. Returns the number of rows ingested; a failed
    /// batch is dropped.
    pub async fn flush(&self) -> Result<usize> {
        self.inner.flush().await
    }

    pub fn stats(&self) -> FlushStats {
        let c = &self.inner.counters;
        FlushStats {
            flushed_batches: c.flushed_batches.load(Ordering::Relaxed),
            flushed_rows: c.flushed_rows.load(Ordering::Relaxed),
            dropped_batches: c.dropped_batches.load(Ordering::Relaxed),
            dropped_rows: c.dropped_rows.load(Ordering::Relaxed),
        }
    }
}

impl SeriesInner {
    async fn flush(&self) -> Result<usize> {
        let observations = std::mem::take(&mut *self.buffer.lock());
        if observations.is_empty() {
            return Ok(0);
        }

        let rows = observations.len();
        let payload = IngestPayload {
            stream: self.stream_name.clone(),
            data: IngestData {
                columns: self.schema.columns.clone(),
                data: observations.into_iter().map(Observation::into_row).collect(),
            },
        };

        match self.catalog.insert_data(&payload).await {
            Ok(()) => {
                self.counters.flushed_batches.fetch_add(1, Ordering::Relaxed);
                self.counters.flushed_rows.fetch_add(rows as u64, Ordering::Relaxed);
                debug!(rows, "Metrics flushed");
                Ok(rows)
            }
            Err(source) => {
                self.counters.dropped_batches.fetch_add(1, Ordering::Relaxed);
                self.counters.dropped_rows.fetch_add(rows as u64, Ordering::Relaxed);
                Err(MetricsError::Flush {
                    stream: self.stream_name.clone(),
                    rows,
                    source,
                })
            }
        }
    }
}

async fn flush_loop(inner: Weak<SeriesInner>, every: Duration) {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            debug!("Metrics series dropped, stopping flush loop");
            break;
        };
        if let Err(e) = inner.flush().await {
            warn!(error = %e, "Metrics flush failed, batch dropped");
        }
    }
}

fn check_interval(every: Duration) -> Result<()> {
    if every.is_zero() {
        return Err(MetricsError::Config("flush interval must be non-zero".to_string()));
    }
    Ok(())
}
