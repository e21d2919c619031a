use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Runtime stage of one object type within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Pending,
    Mapping,
    Extracting,
    Loading,
    Verifying,
    Done,
    Failed,
}

impl Stage {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Stage::Mapping,
            2 => Stage::Extracting,
            3 => Stage::Loading,
            4 => Stage::Verifying,
            5 => Stage::Done,
            6 => Stage::Failed,
            _ => Stage::Pending,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Stage::Pending => 0,
            Stage::Mapping => 1,
            Stage::Extracting => 2,
            Stage::Loading => 3,
            Stage::Verifying => 4,
            Stage::Done => 5,
            Stage::Failed => 6,
        }
    }

    pub fn is_active(self) -> bool {
        matches!(
            self,
            Stage::Mapping | Stage::Extracting | Stage::Loading | Stage::Verifying
        )
    }
}

/// Lock-free counters for one object type. Increments are commutative so
/// concurrent batch completions can report in any order.
pub struct ObjectProgress {
    pub id: i32,
    pub name: String,
    total: AtomicU64,
    migrated: AtomicU64,
    failed: AtomicU64,
    stage: AtomicU8,
}

impl ObjectProgress {
    fn new(id: i32, name: String, total: u64) -> Self {
        Self {
            id,
            name,
            total: AtomicU64::new(total),
            migrated: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            stage: AtomicU8::new(Stage::Pending.as_u8()),
        }
    }

    pub fn record(&self, migrated: u64, failed: u64) {
        self.migrated.fetch_add(migrated, Ordering::Relaxed);
        self.failed.fetch_add(failed, Ordering::Relaxed);
    }

    pub fn set_total(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
    }

    pub fn set_stage(&self, stage: Stage) {
        self.stage.store(stage.as_u8(), Ordering::Relaxed);
    }

    pub fn stage(&self) -> Stage {
        Stage::from_u8(self.stage.load(Ordering::Relaxed))
    }

    fn snapshot(&self) -> ObjectSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let migrated = self.migrated.load(Ordering::Relaxed);
        let failed = self.failed.load(Ordering::Relaxed);
        ObjectSnapshot {
            object_type_id: self.id,
            name: self.name.clone(),
            stage: self.stage(),
            total,
            migrated,
            failed,
            percentage: percentage(migrated, total),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectSnapshot {
    pub object_type_id: i32,
    pub name: String,
    pub stage: Stage,
    pub total: u64,
    pub migrated: u64,
    pub failed: u64,
    pub percentage: f32,
}

/// Point-in-time view over a whole project, recomputed from raw counters on
/// every call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSnapshot {
    pub stage: Stage,
    pub percentage: f32,
    pub current_object: Option<String>,
    pub processed_records: u64,
    pub failed_records: u64,
    pub total_records: u64,
    pub records_per_second: f64,
    pub estimated_seconds_remaining: Option<u64>,
    pub error_count: u64,
    pub objects: Vec<ObjectSnapshot>,
}

impl ProjectSnapshot {
    /// Builds a snapshot from persisted counts for projects with no live
    /// run. Rate and ETA need a running clock, so both stay empty.
    pub fn from_objects(objects: Vec<ObjectSnapshot>, error_count: u64) -> Self {
        let total: u64 = objects.iter().map(|o| o.total).sum();
        let migrated: u64 = objects.iter().map(|o| o.migrated).sum();
        let failed: u64 = objects.iter().map(|o| o.failed).sum();
        let stage = overall_stage(&objects);
        let current_object = objects
            .iter()
            .find(|o| o.stage.is_active())
            .map(|o| o.name.clone());

        ProjectSnapshot {
            stage,
            percentage: percentage(migrated, total),
            current_object,
            processed_records: migrated,
            failed_records: failed,
            total_records: total,
            records_per_second: 0.0,
            estimated_seconds_remaining: None,
            error_count,
            objects,
        }
    }
}

/// Shared per-run progress state. Batch tasks only touch atomics; the object
/// list itself is fixed at registration time.
pub struct ProgressTracker {
    started: Instant,
    objects: RwLock<Vec<Arc<ObjectProgress>>>,
    errors: AtomicU64,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            objects: RwLock::new(Vec::new()),
            errors: AtomicU64::new(0),
        }
    }

    pub fn register(&self, id: i32, name: &str, total: u64) -> Arc<ObjectProgress> {
        let progress = Arc::new(ObjectProgress::new(id, name.to_string(), total));
        self.objects.write().unwrap().push(progress.clone());
        progress
    }

    pub fn object(&self, id: i32) -> Option<Arc<ObjectProgress>> {
        self.objects
            .read()
            .unwrap()
            .iter()
            .find(|o| o.id == id)
            .cloned()
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProjectSnapshot {
        let objects: Vec<ObjectSnapshot> = self
            .objects
            .read()
            .unwrap()
            .iter()
            .map(|o| o.snapshot())
            .collect();

        let total: u64 = objects.iter().map(|o| o.total).sum();
        let migrated: u64 = objects.iter().map(|o| o.migrated).sum();
        let failed: u64 = objects.iter().map(|o| o.failed).sum();

        let elapsed = self.started.elapsed().as_secs_f64();
        let records_per_second = if elapsed > 0.0 {
            migrated as f64 / elapsed
        } else {
            0.0
        };
        let remaining = total.saturating_sub(migrated + failed);
        let estimated_seconds_remaining = if records_per_second > 0.0 && remaining > 0 {
            Some((remaining as f64 / records_per_second).ceil() as u64)
        } else {
            None
        };

        let stage = overall_stage(&objects);
        let current_object = objects
            .iter()
            .find(|o| o.stage.is_active())
            .map(|o| o.name.clone());

        ProjectSnapshot {
            stage,
            percentage: percentage(migrated, total),
            current_object,
            processed_records: migrated,
            failed_records: failed,
            total_records: total,
            records_per_second,
            estimated_seconds_remaining,
            error_count: self.errors.load(Ordering::Relaxed),
            objects,
        }
    }
}

fn overall_stage(objects: &[ObjectSnapshot]) -> Stage {
    if objects.is_empty() {
        return Stage::Pending;
    }
    if let Some(active) = objects.iter().find(|o| o.stage.is_active()) {
        return active.stage;
    }
    if objects.iter().all(|o| o.stage == Stage::Done) {
        Stage::Done
    } else if objects.iter().any(|o| o.stage == Stage::Failed) {
        Stage::Failed
    } else {
        Stage::Pending
    }
}

fn percentage(migrated: u64, total: u64) -> f32 {
    if total == 0 {
        0.0
    } else {
        (migrated as f32 / total as f32) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn increments_commute() {
        let deltas = [(3u64, 1u64), (5, 0), (2, 2), (10, 0)];

        let forward = ProgressTracker::new();
        let object = forward.register(1, "contact", 100);
        for (m, f) in deltas {
            object.record(m, f);
        }

        let reverse = ProgressTracker::new();
        let object = reverse.register(1, "contact", 100);
        for (m, f) in deltas.iter().rev() {
            object.record(*m, *f);
        }

        let a = forward.snapshot();
        let b = reverse.snapshot();
        assert_eq!(a.processed_records, b.processed_records);
        assert_eq!(a.failed_records, b.failed_records);
        assert_eq!(a.percentage, b.percentage);
    }

    #[test]
    fn migrated_plus_failed_never_exceeds_total() {
        let tracker = ProgressTracker::new();
        let object = tracker.register(1, "contact", 50);
        object.record(30, 20);

        let snapshot = tracker.snapshot();
        let obj = &snapshot.objects[0];
        assert!(obj.migrated + obj.failed <= obj.total);
        assert!((snapshot.percentage - 60.0).abs() < 1e-3);
    }

    #[test]
    fn overall_stage_tracks_active_object() {
        let tracker = ProgressTracker::new();
        let contacts = tracker.register(1, "contact", 10);
        let deals = tracker.register(2, "deal", 10);

        contacts.set_stage(Stage::Done);
        deals.set_stage(Stage::Loading);

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.stage, Stage::Loading);
        assert_eq!(snapshot.current_object.as_deref(), Some("deal"));

        deals.set_stage(Stage::Done);
        assert_eq!(tracker.snapshot().stage, Stage::Done);
    }

    #[test]
    fn empty_project_reports_zero_percent() {
        let tracker = ProgressTracker::new();
        tracker.register(1, "contact", 0);
        assert_eq!(tracker.snapshot().percentage, 0.0);
    }
}
