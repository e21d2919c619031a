use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub mod memory;
pub mod registry;

pub use memory::InMemoryConnector;
pub use registry::ConnectorRegistry;

/// One CRM record in transit. Field order is preserved so mapped output stays
/// stable across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: String,
    pub fields: IndexMap<String, Value>,
}

impl SourceRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: IndexMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }
}

/// One page of extracted records. `next_cursor` is opaque to the caller and
/// `None` marks the end of the object type.
#[derive(Debug, Clone)]
pub struct RecordBatch {
    pub records: Vec<SourceRecord>,
    pub next_cursor: Option<String>,
}

/// Result of loading one batch into the destination. Record-level rejections
/// are reported here rather than failing the whole call.
#[derive(Debug)]
pub struct LoadReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, ConnectorError)>,
}

/// Failures crossing the connector boundary. Callers match on the variant to
/// decide between retry, skip, and abort.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },

    #[error("validation failed for record {record_id}: {message}")]
    Validation { record_id: String, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("unsupported object type: {0}")]
    Unsupported(String),
}

/// Opaque handle to one side of a migration. Connections are brokered
/// externally; the engine only sees this trait.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Field names for an object type, as reported by the upstream schema
    /// endpoint.
    async fn describe_fields(&self, object_type: &str) -> Result<Vec<String>, ConnectorError>;

    /// Total record count for an object type.
    async fn count_records(&self, object_type: &str) -> Result<u64, ConnectorError>;

    /// Extract up to `limit` records starting after `cursor`. Passing a cursor
    /// returned by a previous call must never re-yield records before it.
    async fn extract_batch(
        &self,
        object_type: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<RecordBatch, ConnectorError>;

    /// Write one batch of already-mapped records into the destination.
    async fn load_batch(
        &self,
        object_type: &str,
        records: Vec<SourceRecord>,
    ) -> Result<LoadReport, ConnectorError>;

    /// Write a single record, used by operator-initiated error retry.
    async fn load_record(
        &self,
        object_type: &str,
        record: SourceRecord,
    ) -> Result<(), ConnectorError>;
}
