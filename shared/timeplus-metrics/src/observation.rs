//! Buffered metric samples

use chrono::Utc;
use serde_json::{Map, Value};
use timeplus_client::Row;

/// Extra tags stored in the json `tags` column
pub type ExtraTags = Map<String, Value>;

/// One recorded sample awaiting ingestion
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    /// Unix time in nanoseconds
    pub timestamp: String,
    pub namespace: String,
    pub subsystem: String,
    pub tags: Vec<Option<String>>,
    pub values: Vec<Option<f64>>,
    pub extra_tags: Option<ExtraTags>,
}

impl Observation {
    pub fn now(
        namespace: &str,
        subsystem: &str,
        tags: Vec<Option<String>>,
        values: Vec<Option<f64>>,
        extra_tags: Option<ExtraTags>,
    ) -> Self {
        let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        Self {
            timestamp: nanos.to_string(),
            namespace: namespace.to_string(),
            subsystem: subsystem.to_string(),
            tags,
            values,
            extra_tags,
        }
    }

    /// `[timestamp, namespace, subsystem, extra_tags, tags..., values...]`
    pub fn into_row(self) -> Row {
        let mut row = Vec::with_capacity(4 + self.tags.len() + self.values.len());
        row.push(Value::String(self.timestamp));
        row.push(Value::String(self.namespace));
        row.push(Value::String(self.subsystem));
        row.push(self.extra_tags.map(Value::Object).unwrap_or(Value::Null));
        row.extend(self.tags.into_iter().map(|t| t.map(Value::String).unwrap_or(Value::Null)));
        // non-finite floats become null
        row.extend(self.values.into_iter().map(|v| v.map(Value::from).unwrap_or(Value::Null)));
        row
    }
}
