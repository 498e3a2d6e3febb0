//! Timeplus data types

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ClientError, Result};

/// One result row, positionally aligned with the query header
pub type Row = Vec<Value>;

/// A group of rows emitted together by the server
pub type DataBatch = Vec<Row>;

/// Free-form metrics reported by a running query
pub type QueryMetrics = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: String,
    #[serde(default)]
    pub default: String,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, column_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: column_type.into(),
            default: String::new(),
        }
    }
}

/// Stream definition as accepted and returned by `/streams`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDef {
    pub name: String,
    #[serde(default)]
    pub columns: Vec<ColumnDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_time_timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logstore_retention_bytes: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logstore_retention_ms: Option<i64>,
}

impl StreamDef {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnDef>) -> Self {
        Self {
            name: name.into(),
            columns,
            ..Self::default()
        }
    }

    /// Column names in definition order
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// Rejects definitions the server would refuse: empty names and
    /// duplicate column names.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ClientError::Validation("stream name is empty".to_string()));
        }

        let mut seen = HashSet::with_capacity(self.columns.len());
        for column in &self.columns {
            if !seen.insert(column.name.as_str()) {
                return Err(ClientError::Validation(format!(
                    "duplicate column `{}` in stream {}",
                    column.name, self.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct View {
    pub name: String,
    pub query: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub materialized: bool,
}

/// Body of an ingest request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngestData {
    pub columns: Vec<String>,
    pub data: Vec<Row>,
}

/// Ingest body together with its target stream
#[derive(Debug, Clone, PartialEq)]
pub struct IngestPayload {
    pub stream: String,
    pub data: IngestData,
}

/// Server-side hint for how rows are grouped into batches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchingPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_ms: Option<u32>,
}

impl BatchingPolicy {
    /// Zero means "let the server decide" for either threshold.
    pub fn new(count: u32, time_ms: u32) -> Self {
        Self {
            count: (count > 0).then_some(count),
            time_ms: (time_ms > 0).then_some(time_ms),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub sql: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, rename = "batching_policy")]
    pub policy: BatchingPolicy,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }

    pub fn with_policy(mut self, policy: BatchingPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyStat {
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub avg: f64,
    pub latest: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThroughputStat {
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryStat {
    pub count: i64,
    pub latency: LatencyStat,
    pub throughput: ThroughputStat,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryResult {
    pub header: Vec<ColumnDef>,
    pub data: Vec<Row>,
}

/// Query description sent once, as the first event of a query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryMetadata {
    pub id: String,
    pub name: String,
    pub sql: String,
    pub description: String,
    pub tags: Vec<String>,
    pub stat: QueryStat,
    pub start_time: i64,
    pub end_time: i64,
    pub duration: i64,
    pub response_time: i64,
    pub status: String,
    pub message: String,
    pub result: QueryResult,
}

impl QueryMetadata {
    /// Result schema
    pub fn header(&self) -> &[ColumnDef] {
        &self.result.header
    }
}

/// One demultiplexed server-sent event
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Metadata(Box<QueryMetadata>),
    Metrics(QueryMetrics),
    DataBatch(DataBatch),
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Metadata(_) => "query",
            Self::Metrics(_) => "metrics",
            Self::DataBatch(_) => "data",
        }
    }
}
