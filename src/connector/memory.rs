use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;

use super::{Connector, ConnectorError, LoadReport, RecordBatch, SourceRecord};

/// Deterministic in-memory connector used by tests and the offline `run`
/// command. Acts as either side of a migration: seeded records are the source
/// dataset, loaded records accumulate as the destination dataset.
///
/// Failures are scripted with [`Fault`]s so retry and error paths can be
/// exercised without a live CRM.
#[derive(Default)]
pub struct InMemoryConnector {
    schemas: RwLock<HashMap<String, Vec<String>>>,
    records: RwLock<HashMap<String, Vec<SourceRecord>>>,
    loaded: RwLock<HashMap<String, Vec<SourceRecord>>>,
    faults: Mutex<Vec<Fault>>,
    rejects: Mutex<Vec<RecordReject>>,
    load_calls: AtomicU64,
    load_delay: Option<Duration>,
    fail_describe: AtomicBool,
}

/// Failure classes the connector can be scripted to produce.
#[derive(Debug, Clone)]
pub enum FaultKind {
    RateLimited,
    Network,
    Auth,
}

#[derive(Debug)]
enum FaultTrigger {
    /// Fires on `extract_batch` for the batch at this index (offset / limit).
    ExtractBatch(usize),
    /// Fires on `load_batch` when the batch contains this record id.
    LoadBatchWith(String),
}

#[derive(Debug)]
struct Fault {
    object_type: String,
    trigger: FaultTrigger,
    kind: FaultKind,
    remaining: u32,
}

/// Permanent per-record rejection applied at load time.
#[derive(Debug, Clone)]
struct RecordReject {
    object_type: String,
    record_id: String,
    message: String,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    pub fn set_schema(&self, object_type: &str, fields: Vec<String>) {
        self.schemas
            .write()
            .unwrap()
            .insert(object_type.to_string(), fields);
    }

    pub fn seed(&self, object_type: &str, records: Vec<SourceRecord>) {
        self.records
            .write()
            .unwrap()
            .insert(object_type.to_string(), records);
    }

    /// Script a batch-level failure on extraction of batch `batch_index`,
    /// firing `times` times before the call succeeds again.
    pub fn fail_extract(&self, object_type: &str, batch_index: usize, kind: FaultKind, times: u32) {
        self.faults.lock().unwrap().push(Fault {
            object_type: object_type.to_string(),
            trigger: FaultTrigger::ExtractBatch(batch_index),
            kind,
            remaining: times,
        });
    }

    /// Script a batch-level failure on any load batch containing `record_id`,
    /// firing `times` times before the call succeeds again.
    pub fn fail_load_with(&self, object_type: &str, record_id: &str, kind: FaultKind, times: u32) {
        self.faults.lock().unwrap().push(Fault {
            object_type: object_type.to_string(),
            trigger: FaultTrigger::LoadBatchWith(record_id.to_string()),
            kind,
            remaining: times,
        });
    }

    /// Permanently reject a single record at load time with a validation
    /// error. The rest of its batch still loads.
    pub fn reject_record(&self, object_type: &str, record_id: &str, message: &str) {
        self.rejects.lock().unwrap().push(RecordReject {
            object_type: object_type.to_string(),
            record_id: record_id.to_string(),
            message: message.to_string(),
        });
    }

    /// Make `describe_fields` fail, forcing callers onto their fallback path.
    pub fn fail_describe_fields(&self, fail: bool) {
        self.fail_describe.store(fail, Ordering::SeqCst);
    }

    /// Records loaded into this connector as a destination, in arrival order.
    /// Duplicate loads of the same id show up as duplicate entries.
    pub fn loaded_records(&self, object_type: &str) -> Vec<SourceRecord> {
        self.loaded
            .read()
            .unwrap()
            .get(object_type)
            .cloned()
            .unwrap_or_default()
    }

    pub fn load_call_count(&self) -> u64 {
        self.load_calls.load(Ordering::SeqCst)
    }

    fn fault_error(kind: &FaultKind) -> ConnectorError {
        match kind {
            FaultKind::RateLimited => ConnectorError::RateLimited {
                retry_after: Some(Duration::from_millis(10)),
            },
            FaultKind::Network => ConnectorError::Network("connection reset".to_string()),
            FaultKind::Auth => ConnectorError::Auth("token revoked".to_string()),
        }
    }

    fn take_fault(
        &self,
        object_type: &str,
        matches: impl Fn(&FaultTrigger) -> bool,
    ) -> Option<FaultKind> {
        let mut faults = self.faults.lock().unwrap();
        for fault in faults.iter_mut() {
            if fault.object_type == object_type && fault.remaining > 0 && matches(&fault.trigger) {
                fault.remaining -= 1;
                return Some(fault.kind.clone());
            }
        }
        None
    }
}

// Rejects live outside the fault list: they are permanent and per record.
impl InMemoryConnector {
    fn reject_for(&self, object_type: &str, record_id: &str) -> Option<String> {
        self.rejects
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.object_type == object_type && r.record_id == record_id)
            .map(|r| r.message.clone())
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn describe_fields(&self, object_type: &str) -> Result<Vec<String>, ConnectorError> {
        if self.fail_describe.load(Ordering::SeqCst) {
            return Err(ConnectorError::Network(
                "schema endpoint unreachable".to_string(),
            ));
        }
        self.schemas
            .read()
            .unwrap()
            .get(object_type)
            .cloned()
            .ok_or_else(|| ConnectorError::Unsupported(object_type.to_string()))
    }

    async fn count_records(&self, object_type: &str) -> Result<u64, ConnectorError> {
        let seeded = self
            .records
            .read()
            .unwrap()
            .get(object_type)
            .map(|r| r.len())
            .unwrap_or(0);
        let loaded = self
            .loaded
            .read()
            .unwrap()
            .get(object_type)
            .map(|r| r.len())
            .unwrap_or(0);
        Ok((seeded + loaded) as u64)
    }

    async fn extract_batch(
        &self,
        object_type: &str,
        cursor: Option<&str>,
        limit: usize,
    ) -> Result<RecordBatch, ConnectorError> {
        let offset: usize = match cursor {
            Some(c) => c
                .parse()
                .map_err(|_| ConnectorError::Network(format!("bad cursor: {c}")))?,
            None => 0,
        };
        let limit = limit.max(1);
        let batch_index = offset / limit;

        if let Some(kind) = self.take_fault(object_type, |t| {
            matches!(t, FaultTrigger::ExtractBatch(i) if *i == batch_index)
        }) {
            return Err(Self::fault_error(&kind));
        }

        let records = self.records.read().unwrap();
        let all = records
            .get(object_type)
            .ok_or_else(|| ConnectorError::Unsupported(object_type.to_string()))?;

        let end = (offset + limit).min(all.len());
        let page: Vec<SourceRecord> = all[offset.min(all.len())..end].to_vec();
        let next_cursor = if end < all.len() {
            Some(end.to_string())
        } else {
            None
        };

        Ok(RecordBatch {
            records: page,
            next_cursor,
        })
    }

    async fn load_batch(
        &self,
        object_type: &str,
        records: Vec<SourceRecord>,
    ) -> Result<LoadReport, ConnectorError> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }

        if let Some(kind) = self.take_fault(object_type, |t| {
            matches!(t, FaultTrigger::LoadBatchWith(id) if records.iter().any(|r| &r.id == id))
        }) {
            return Err(Self::fault_error(&kind));
        }

        let mut report = LoadReport {
            succeeded: Vec::new(),
            failed: Vec::new(),
        };
        let mut loaded = self.loaded.write().unwrap();
        let bucket = loaded.entry(object_type.to_string()).or_default();
        for record in records {
            if let Some(message) = self.reject_for(object_type, &record.id) {
                report.failed.push((
                    record.id.clone(),
                    ConnectorError::Validation {
                        record_id: record.id,
                        message,
                    },
                ));
            } else {
                report.succeeded.push(record.id.clone());
                bucket.push(record);
            }
        }
        Ok(report)
    }

    async fn load_record(
        &self,
        object_type: &str,
        record: SourceRecord,
    ) -> Result<(), ConnectorError> {
        if let Some(message) = self.reject_for(object_type, &record.id) {
            return Err(ConnectorError::Validation {
                record_id: record.id,
                message,
            });
        }
        self.loaded
            .write()
            .unwrap()
            .entry(object_type.to_string())
            .or_default()
            .push(record);
        Ok(())
    }
}
