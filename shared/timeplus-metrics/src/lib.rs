//! Metrics reporting on top of Timeplus streams
//!
//! A series owns a `_tp_metric_<name>` stream. Callers record observations
//! with [`MetricsSeries::observe`]; a background task flushes them in
//! batches.

mod catalog;
mod error;
mod observation;
mod schema;
mod series;

pub use catalog::StreamCatalog;
pub use error::{MetricsError, Result};
pub use observation::{ExtraTags, Observation};
pub use schema::{
    stream_name, SeriesSchema, DEFAULT_LOGSTORE_RETENTION_BYTES, DEFAULT_LOGSTORE_RETENTION_MS, DEFAULT_TTL,
    EVENT_TIME_COLUMN, RESERVED_COLUMNS, STREAM_PREFIX, TAG_TYPE, VALUE_TYPE,
};
pub use series::{FlushStats, MetricsSeries};
