//! Metrics stream schema
//!
//! A metrics stream is laid out as
//! `timestamp, namespace, subsystem, tags(json), <tag>..., <value>...`
//! with tags as `string` and values as `float64` columns.

use timeplus_client::{ColumnDef, StreamDef};
use tracing::debug;

use crate::{MetricsError, Result};

pub const STREAM_PREFIX: &str = "_tp_metric_";

/// Columns every metrics stream starts with
pub const RESERVED_COLUMNS: [(&str, &str); 4] = [
    ("timestamp", "string"),
    ("namespace", "string"),
    ("subsystem", "string"),
    ("tags", "json"),
];

pub const TAG_TYPE: &str = "string";
pub const VALUE_TYPE: &str = "float64";

pub const EVENT_TIME_COLUMN: &str = "to_datetime64(timestamp,9)";
pub const DEFAULT_TTL: &str = "to_datetime(_tp_time) + INTERVAL 30 DAY";
pub const DEFAULT_LOGSTORE_RETENTION_BYTES: i64 = 604_800_000;
pub const DEFAULT_LOGSTORE_RETENTION_MS: i64 = 1_342_177_280;

/// Columns the server adds on its own
const INTERNAL_PREFIX: &str = "_tp_";

/// Backing stream of the series `name`
pub fn stream_name(name: &str) -> String {
    format!("{}{}", STREAM_PREFIX, name)
}

/// Declared layout of a series and the ingest column order it implies
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesSchema {
    pub tag_names: Vec<String>,
    pub value_names: Vec<String>,
    /// Ingest columns, aligned with observation rows
    pub columns: Vec<String>,
}

impl SeriesSchema {
    pub fn declare(tag_names: Vec<String>, value_names: Vec<String>) -> Self {
        let columns = RESERVED_COLUMNS
            .iter()
            .map(|(name, _)| name.to_string())
            .chain(tag_names.iter().cloned())
            .chain(value_names.iter().cloned())
            .collect();
        Self {
            tag_names,
            value_names,
            columns,
        }
    }

    /// Recover the layout from an existing stream. String columns after the
    /// reserved prefix are tags, float columns are values; server-internal
    /// columns are ignored.
    pub fn infer(stream: &StreamDef) -> Result<Self> {
        let user_columns: Vec<&ColumnDef> = stream
            .columns
            .iter()
            .filter(|c| !c.name.starts_with(INTERNAL_PREFIX))
            .collect();

        if user_columns.len() < RESERVED_COLUMNS.len() {
            return Err(MetricsError::Schema(format!(
                "stream {} has {} columns, a metrics stream needs at least {}",
                stream.name,
                user_columns.len(),
                RESERVED_COLUMNS.len()
            )));
        }

        let (reserved, declared) = user_columns.split_at(RESERVED_COLUMNS.len());
        let mut tag_names = Vec::new();
        let mut value_names = Vec::new();
        for column in declared {
            if column.column_type == TAG_TYPE {
                tag_names.push(column.name.clone());
            } else if column.column_type.starts_with("float") {
                value_names.push(column.name.clone());
            } else {
                debug!(column = %column.name, column_type = %column.column_type, "Skipping column");
            }
        }

        // keep the stream's own spelling of the reserved columns
        let columns = reserved
            .iter()
            .map(|c| c.name.clone())
            .chain(tag_names.iter().cloned())
            .chain(value_names.iter().cloned())
            .collect();

        Ok(Self {
            tag_names,
            value_names,
            columns,
        })
    }

    /// Stream definition provisioned for a new series
    pub fn stream_def(&self, stream_name: &str) -> StreamDef {
        let columns = RESERVED_COLUMNS
            .iter()
            .map(|(name, column_type)| ColumnDef::new(*name, *column_type))
            .chain(self.tag_names.iter().map(|n| ColumnDef::new(n.as_str(), TAG_TYPE)))
            .chain(self.value_names.iter().map(|n| ColumnDef::new(n.as_str(), VALUE_TYPE)))
            .collect();

        StreamDef {
            name: stream_name.to_string(),
            columns,
            event_time_column: Some(EVENT_TIME_COLUMN.to_string()),
            event_time_timezone: None,
            ttl_expression: Some(DEFAULT_TTL.to_string()),
            logstore_retention_bytes: Some(DEFAULT_LOGSTORE_RETENTION_BYTES),
            logstore_retention_ms: Some(DEFAULT_LOGSTORE_RETENTION_MS),
        }
    }
}
