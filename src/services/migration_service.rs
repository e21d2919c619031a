use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::*;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::concurrency::run_concurrent;
use crate::config::{EngineConfig, RetryPolicy};
use crate::connector::{Connector, ConnectorError, SourceRecord};
use crate::database::entities::{
    migration_projects,
    migration_projects::{ProjectStatus, Strategy},
    object_types,
    object_types::ObjectStatus,
};
use crate::errors::{classify, Classification, ErrorKind, Severity};
use crate::mapping;
use crate::progress::{ObjectProgress, ProgressTracker, ProjectSnapshot, Stage};
use crate::retry::{with_retry, RetryError};
use crate::services::{ErrorService, MappingService, NewError};

/// Progress reporter integration for real-time updates.
#[async_trait]
pub trait ProgressReporter: Send + Sync {
    async fn report_progress(&self, project_id: i32, snapshot: &ProjectSnapshot);
    async fn report_stage(&self, project_id: i32, object_type: &str, stage: Stage);
    async fn report_error(&self, project_id: i32, message: &str);
    async fn report_completion(&self, project_id: i32, status: ProjectStatus);
}

/// Default progress reporter that logs to the console.
pub struct LogProgressReporter;

#[async_trait]
impl ProgressReporter for LogProgressReporter {
    async fn report_progress(&self, project_id: i32, snapshot: &ProjectSnapshot) {
        info!(
            project_id,
            percentage = snapshot.percentage,
            processed = snapshot.processed_records,
            failed = snapshot.failed_records,
            "migration progress"
        );
    }

    async fn report_stage(&self, project_id: i32, object_type: &str, stage: Stage) {
        info!(project_id, object_type, ?stage, "stage change");
    }

    async fn report_error(&self, project_id: i32, message: &str) {
        error!(project_id, "migration error: {message}");
    }

    async fn report_completion(&self, project_id: i32, status: ProjectStatus) {
        info!(project_id, ?status, "migration finished");
    }
}

/// When a new project should first run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Schedule {
    Immediate,
    /// Cron expression, persisted for an external scheduler to fire.
    Cron(String),
}

impl Default for Schedule {
    fn default() -> Self {
        Schedule::Immediate
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub source_connection_id: String,
    pub destination_connection_id: String,
    pub strategy: Strategy,
    #[serde(default)]
    pub schedule: Schedule,
    pub object_types: Vec<String>,
}

struct RunHandle {
    run_id: String,
    pause: CancellationToken,
    cancel: CancellationToken,
    tracker: Arc<ProgressTracker>,
    #[allow(dead_code)]
    task: JoinHandle<()>,
}

/// Orchestrates migration runs: one state machine per project, batches
/// processed concurrently within a bounded pool, cursors persisted so a
/// paused or crashed run resumes without reprocessing committed batches.
#[derive(Clone)]
pub struct MigrationService {
    db: DatabaseConnection,
    reporter: Arc<dyn ProgressReporter>,
    active_runs: Arc<RwLock<HashMap<i32, RunHandle>>>,
}

/// How one object type's processing ended.
enum ObjectOutcome {
    Finished,
    NeedsMapping,
    ObjectFailed,
    Paused,
    Cancelled,
    Fatal(String),
}

/// Result of loading one batch, returned as a value so sibling batches keep
/// running regardless.
enum BatchOutcome {
    Loaded {
        loaded: usize,
        rejected: Vec<(SourceRecord, ConnectorError)>,
        recovered: Option<(Classification, String, u32)>,
    },
    BatchFailed {
        classification: Classification,
        message: String,
        attempts: u32,
        record_count: usize,
    },
}

struct WaveBatch {
    records: Vec<SourceRecord>,
    cursor_after: Option<String>,
}

impl MigrationService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self::with_reporter(db, Arc::new(LogProgressReporter))
    }

    pub fn with_reporter(db: DatabaseConnection, reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            db,
            reporter,
            active_runs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Creates a project with its object types, all `pending`. Cron schedules
    /// are persisted; only an explicit `start` call triggers a run here.
    pub async fn create_project(
        &self,
        request: CreateProjectRequest,
    ) -> Result<migration_projects::Model> {
        let now = Utc::now();
        let schedule = match &request.schedule {
            Schedule::Immediate => None,
            Schedule::Cron(expr) => Some(expr.clone()),
        };

        let project = migration_projects::ActiveModel {
            name: Set(request.name),
            source_connection_id: Set(request.source_connection_id),
            destination_connection_id: Set(request.destination_connection_id),
            status: Set(ProjectStatus::Scheduled.into()),
            strategy: Set(request.strategy.into()),
            schedule: Set(schedule),
            total_records: Set(0),
            migrated_records: Set(0),
            failed_records: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        let project = migration_projects::Entity::insert(project)
            .exec_with_returning(&self.db)
            .await?;

        for name in request.object_types {
            let object_type = object_types::ActiveModel {
                project_id: Set(project.id),
                name: Set(name),
                status: Set(ObjectStatus::Pending.into()),
                total_records: Set(0),
                processed_records: Set(0),
                failed_records: Set(0),
                updated_at: Set(now),
                ..Default::default()
            };
            object_types::Entity::insert(object_type)
                .exec(&self.db)
                .await?;
        }

        info!(project_id = project.id, "created migration project");
        Ok(project)
    }

    /// Renames a project or changes its schedule. Refused while a run is in
    /// progress; everything else about a project is owned by the run loop.
    pub async fn update_project(
        &self,
        project_id: i32,
        name: Option<String>,
        schedule: Option<Schedule>,
    ) -> Result<Option<migration_projects::Model>> {
        let Some(project) = self.get_project(project_id).await? else {
            return Ok(None);
        };
        if project.get_status() == ProjectStatus::InProgress {
            bail!("project {} has a run in progress", project_id);
        }

        let mut update: migration_projects::ActiveModel = project.into();
        if let Some(name) = name {
            update.name = Set(name);
        }
        if let Some(schedule) = schedule {
            update.schedule = Set(match schedule {
                Schedule::Immediate => None,
                Schedule::Cron(expr) => Some(expr),
            });
        }
        update.updated_at = Set(Utc::now());
        Ok(Some(update.update(&self.db).await?))
    }

    pub async fn get_project(&self, project_id: i32) -> Result<Option<migration_projects::Model>> {
        migration_projects::Entity::find_by_id(project_id)
            .one(&self.db)
            .await
            .map_err(Into::into)
    }

    pub async fn list_projects(&self) -> Result<Vec<migration_projects::Model>> {
        migration_projects::Entity::find()
            .order_by_desc(migration_projects::Column::CreatedAt)
            .all(&self.db)
            .await
            .map_err(Into::into)
    }

    pub async fn list_object_types(&self, project_id: i32) -> Result<Vec<object_types::Model>> {
        object_types::Entity::find()
            .filter(object_types::Column::ProjectId.eq(project_id))
            .order_by_asc(object_types::Column::Id)
            .all(&self.db)
            .await
            .map_err(Into::into)
    }

    /// Starts (or resumes) a run for a `scheduled` or `paused` project.
    pub async fn start(
        &self,
        project_id: i32,
        config: EngineConfig,
        source: Arc<dyn Connector>,
        destination: Arc<dyn Connector>,
    ) -> Result<String> {
        let project = self
            .get_project(project_id)
            .await?
            .context("project not found")?;
        if !project.get_status().can_start() {
            bail!(
                "project {} cannot start from status '{}'",
                project_id,
                project.status
            );
        }
        if self.active_runs.read().await.contains_key(&project_id) {
            bail!("project {} is already running", project_id);
        }

        let run_id = Uuid::new_v4().to_string();
        self.update_project_status(project_id, ProjectStatus::InProgress, None)
            .await?;

        let tracker = Arc::new(ProgressTracker::new());
        let pause = CancellationToken::new();
        let cancel = CancellationToken::new();

        let service = self.clone();
        let task = {
            let tracker = tracker.clone();
            let pause = pause.clone();
            let cancel = cancel.clone();
            let run_id = run_id.clone();
            tokio::spawn(async move {
                service
                    .run_project(run_id, project_id, config, source, destination, tracker, pause, cancel)
                    .await;
            })
        };

        self.active_runs.write().await.insert(
            project_id,
            RunHandle {
                run_id: run_id.clone(),
                pause,
                cancel,
                tracker,
                task,
            },
        );

        info!(project_id, run_id, "migration run started");
        Ok(run_id)
    }

    /// Same preconditions as `start`; reads better at call sites resuming a
    /// paused project.
    pub async fn resume(
        &self,
        project_id: i32,
        config: EngineConfig,
        source: Arc<dyn Connector>,
        destination: Arc<dyn Connector>,
    ) -> Result<String> {
        self.start(project_id, config, source, destination).await
    }

    /// Requests a pause. Observed at the next wave boundary; in-flight
    /// batches drain and commit first.
    pub async fn pause(&self, project_id: i32) -> Result<bool> {
        let runs = self.active_runs.read().await;
        if let Some(handle) = runs.get(&project_id) {
            info!(project_id, run_id = handle.run_id, "pause requested");
            handle.pause.cancel();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Cancels a run (or a not-yet-started project). Terminal.
    pub async fn cancel(&self, project_id: i32) -> Result<bool> {
        {
            let runs = self.active_runs.read().await;
            if let Some(handle) = runs.get(&project_id) {
                info!(project_id, run_id = handle.run_id, "cancel requested");
                handle.cancel.cancel();
                return Ok(true);
            }
        }
        let project = self
            .get_project(project_id)
            .await?
            .context("project not found")?;
        if project.get_status().can_start() {
            self.update_project_status(project_id, ProjectStatus::Cancelled, None)
                .await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Live snapshot for an active run; otherwise reconstructed from the
    /// persisted object-type rows.
    pub async fn snapshot(&self, project_id: i32) -> Result<ProjectSnapshot> {
        if let Some(handle) = self.active_runs.read().await.get(&project_id) {
            return Ok(handle.tracker.snapshot());
        }

        let objects = self.list_object_types(project_id).await?;
        let object_snapshots = objects
            .iter()
            .map(|o| crate::progress::ObjectSnapshot {
                object_type_id: o.id,
                name: o.name.clone(),
                stage: stage_for_status(o.get_status()),
                total: o.total_records.max(0) as u64,
                migrated: o.processed_records.max(0) as u64,
                failed: o.failed_records.max(0) as u64,
                percentage: if o.total_records > 0 {
                    (o.processed_records as f32 / o.total_records as f32) * 100.0
                } else {
                    0.0
                },
            })
            .collect();

        let open_errors = ErrorService::new(self.db.clone())
            .list_open(project_id)
            .await?
            .len() as u64;
        Ok(ProjectSnapshot::from_objects(object_snapshots, open_errors))
    }

    /// Polls until the project leaves `in_progress`. Used by the CLI and
    /// tests; callers wanting a bound wrap this in `tokio::time::timeout`.
    pub async fn wait_until_idle(&self, project_id: i32) -> Result<ProjectStatus> {
        loop {
            let project = self
                .get_project(project_id)
                .await?
                .context("project not found")?;
            let status = project.get_status();
            if status != ProjectStatus::InProgress {
                return Ok(status);
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }
    }

    pub async fn is_active(&self, project_id: i32) -> bool {
        self.active_runs.read().await.contains_key(&project_id)
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_project(
        &self,
        run_id: String,
        project_id: i32,
        config: EngineConfig,
        source: Arc<dyn Connector>,
        destination: Arc<dyn Connector>,
        tracker: Arc<ProgressTracker>,
        pause: CancellationToken,
        cancel: CancellationToken,
    ) {
        let result = self
            .run_project_inner(
                project_id,
                &config,
                source,
                destination,
                &tracker,
                &pause,
                &cancel,
            )
            .await;

        match result {
            Ok(status) => {
                self.reporter.report_completion(project_id, status).await;
            }
            Err(e) => {
                let message = format!("migration run aborted: {e:#}");
                error!(project_id, run_id, "{message}");
                if let Err(persist_err) = self
                    .update_project_status(project_id, ProjectStatus::Failed, Some(&message))
                    .await
                {
                    error!(project_id, "failed to persist failure status: {persist_err}");
                }
                self.reporter.report_error(project_id, &message).await;
                self.reporter
                    .report_completion(project_id, ProjectStatus::Failed)
                    .await;
            }
        }

        self.active_runs.write().await.remove(&project_id);
    }

    async fn run_project_inner(
        &self,
        project_id: i32,
        config: &EngineConfig,
        source: Arc<dyn Connector>,
        destination: Arc<dyn Connector>,
        tracker: &ProgressTracker,
        pause: &CancellationToken,
        cancel: &CancellationToken,
    ) -> Result<ProjectStatus> {
        let objects = self.list_object_types(project_id).await?;
        if objects.is_empty() {
            bail!("project has no object types");
        }

        // Seed the tracker with persisted counts so resumed runs report
        // absolute progress.
        for object in &objects {
            let progress = tracker.register(object.id, &object.name, object.total_records.max(0) as u64);
            progress.record(
                object.processed_records.max(0) as u64,
                object.failed_records.max(0) as u64,
            );
            match object.get_status() {
                ObjectStatus::Done => progress.set_stage(Stage::Done),
                ObjectStatus::ObjectFailed => progress.set_stage(Stage::Failed),
                _ => {}
            }
        }

        let mut fatal: Option<String> = None;
        let mut interrupted: Option<ObjectOutcome> = None;

        for object in objects.iter().filter(|o| !o.is_finished()) {
            if cancel.is_cancelled() {
                interrupted = Some(ObjectOutcome::Cancelled);
                break;
            }
            if pause.is_cancelled() {
                interrupted = Some(ObjectOutcome::Paused);
                break;
            }

            let outcome = self
                .process_object(
                    project_id,
                    object,
                    config,
                    source.clone(),
                    destination.clone(),
                    tracker,
                    pause,
                    cancel,
                )
                .await?;

            match outcome {
                ObjectOutcome::Finished
                | ObjectOutcome::NeedsMapping
                | ObjectOutcome::ObjectFailed => {}
                ObjectOutcome::Paused => {
                    interrupted = Some(ObjectOutcome::Paused);
                    break;
                }
                ObjectOutcome::Cancelled => {
                    interrupted = Some(ObjectOutcome::Cancelled);
                    break;
                }
                ObjectOutcome::Fatal(message) => {
                    fatal = Some(message);
                    break;
                }
            }
        }

        let final_status = if let Some(message) = fatal {
            self.reporter.report_error(project_id, &message).await;
            self.update_project_status(project_id, ProjectStatus::Failed, Some(&message))
                .await?;
            ProjectStatus::Failed
        } else if matches!(interrupted, Some(ObjectOutcome::Cancelled)) {
            self.update_project_status(project_id, ProjectStatus::Cancelled, None)
                .await?;
            ProjectStatus::Cancelled
        } else if matches!(interrupted, Some(ObjectOutcome::Paused)) {
            self.update_project_status(project_id, ProjectStatus::Paused, None)
                .await?;
            ProjectStatus::Paused
        } else {
            let objects = self.list_object_types(project_id).await?;
            let all_done = objects
                .iter()
                .all(|o| o.get_status() == ObjectStatus::Done);
            let any_failures = objects.iter().any(|o| {
                o.failed_records > 0
                    || matches!(
                        o.get_status(),
                        ObjectStatus::ObjectFailed | ObjectStatus::NeedsMapping
                    )
            });
            let status = if all_done && !any_failures {
                ProjectStatus::Completed
            } else {
                ProjectStatus::CompletedWithErrors
            };
            self.update_project_status(project_id, status, None).await?;
            status
        };

        Ok(final_status)
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_object(
        &self,
        project_id: i32,
        object: &object_types::Model,
        config: &EngineConfig,
        source: Arc<dyn Connector>,
        destination: Arc<dyn Connector>,
        tracker: &ProgressTracker,
        pause: &CancellationToken,
        cancel: &CancellationToken,
    ) -> Result<ObjectOutcome> {
        let progress = tracker
            .object(object.id)
            .context("object type not registered in tracker")?;
        let error_service = ErrorService::new(self.db.clone());
        let mapping_service = MappingService::new(self.db.clone());

        // Mapping gate: without a valid stored mapping set the object stays
        // behind and the run carries on with the next one.
        let specs = mapping_service.stored_specs(object.id).await?;
        if specs.is_empty() || mapping::validate_required_coverage(&specs, &[]).is_err() {
            warn!(
                object_type = object.name,
                "no usable field mappings, marking needs_mapping"
            );
            self.set_object_status(object.id, ObjectStatus::NeedsMapping)
                .await?;
            tracker.record_error();
            error_service
                .record(NewError {
                    project_id,
                    object_type_id: Some(object.id),
                    classification: Classification {
                        kind: ErrorKind::ValidationError,
                        severity: Severity::Medium,
                        retryable: false,
                        project_level: false,
                    },
                    message: format!(
                        "object type '{}' has no usable field mappings",
                        object.name
                    ),
                    record_id: None,
                    record_data: None,
                    batch_cursor: None,
                    attempts: 0,
                    max_attempts: 0,
                    resolved: false,
                })
                .await?;
            return Ok(ObjectOutcome::NeedsMapping);
        }

        progress.set_stage(Stage::Mapping);
        self.set_object_status(object.id, ObjectStatus::Mapping).await?;
        self.reporter
            .report_stage(project_id, &object.name, Stage::Mapping)
            .await;

        let total = {
            let source = source.clone();
            let name = object.name.clone();
            match with_retry(&config.retry, || {
                let source = source.clone();
                let name = name.clone();
                async move { source.count_records(&name).await }
            })
            .await
            {
                Ok(attempted) => attempted.value,
                Err(retry_error) => {
                    return self
                        .handle_terminal_failure(
                            project_id,
                            object,
                            retry_error,
                            object.cursor.clone(),
                            &error_service,
                            &progress,
                        )
                        .await;
                }
            }
        };
        progress.set_total(total);

        progress.set_stage(Stage::Extracting);
        self.set_object_status(object.id, ObjectStatus::Running).await?;
        self.reporter
            .report_stage(project_id, &object.name, Stage::Extracting)
            .await;

        let batch_size = config.batch.effective_batch_size();
        let concurrency = config.batch.effective_concurrency();
        let mut cursor = object.cursor.clone();
        let mut end_reached = false;

        while !end_reached {
            if cancel.is_cancelled() {
                self.persist_wave(project_id, object.id, cursor.clone(), tracker)
                    .await?;
                return Ok(ObjectOutcome::Cancelled);
            }
            if pause.is_cancelled() {
                self.persist_wave(project_id, object.id, cursor.clone(), tracker)
                    .await?;
                return Ok(ObjectOutcome::Paused);
            }

            // Extract one wave of batches sequentially; cursors chain.
            let wave_start_cursor = cursor.clone();
            let mut wave: Vec<WaveBatch> = Vec::new();
            for _ in 0..concurrency {
                let page = {
                    let source = source.clone();
                    let name = object.name.clone();
                    let current = cursor.clone();
                    match with_retry(&config.retry, || {
                        let source = source.clone();
                        let name = name.clone();
                        let current = current.clone();
                        async move {
                            source
                                .extract_batch(&name, current.as_deref(), batch_size)
                                .await
                        }
                    })
                    .await
                    {
                        Ok(attempted) => {
                            if let Some((classification, message)) = attempted.last_error {
                                self.record_recovered(
                                    project_id,
                                    object.id,
                                    classification,
                                    message,
                                    attempted.failed_attempts,
                                    config,
                                    &error_service,
                                )
                                .await?;
                            }
                            attempted.value
                        }
                        Err(retry_error) => {
                            self.persist_wave(project_id, object.id, cursor.clone(), tracker)
                                .await?;
                            return self
                                .handle_terminal_failure(
                                    project_id,
                                    object,
                                    retry_error,
                                    cursor.clone(),
                                    &error_service,
                                    &progress,
                                )
                                .await;
                        }
                    }
                };

                if page.records.is_empty() && page.next_cursor.is_none() {
                    end_reached = true;
                    break;
                }

                // Apply the stored mappings; records a transform cannot
                // handle are recorded failed and skipped.
                let mut mapped = Vec::with_capacity(page.records.len());
                for record in page.records {
                    match mapping::map_record(&record, &specs) {
                        Ok(m) => mapped.push(m),
                        Err(e) => {
                            progress.record(0, 1);
                            tracker.record_error();
                            error_service
                                .record(NewError {
                                    project_id,
                                    object_type_id: Some(object.id),
                                    classification: Classification {
                                        kind: ErrorKind::ValidationError,
                                        severity: Severity::Low,
                                        retryable: false,
                                        project_level: false,
                                    },
                                    message: format!("mapping failed: {e}"),
                                    record_id: Some(record.id.clone()),
                                    record_data: serde_json::to_string(&record).ok(),
                                    batch_cursor: None,
                                    attempts: 1,
                                    max_attempts: 1,
                                    resolved: false,
                                })
                                .await?;
                        }
                    }
                }

                let next_cursor = page.next_cursor.clone();
                wave.push(WaveBatch {
                    records: mapped,
                    cursor_after: next_cursor.clone(),
                });
                cursor = next_cursor;
                if cursor.is_none() {
                    end_reached = true;
                    break;
                }
            }

            if wave.is_empty() {
                break;
            }

            progress.set_stage(Stage::Loading);
            let tasks: Vec<_> = wave
                .iter()
                .map(|batch| {
                    let destination = destination.clone();
                    let name = object.name.clone();
                    let records = batch.records.clone();
                    let policy = config.retry.clone();
                    async move {
                        Ok::<BatchOutcome, anyhow::Error>(
                            load_one_batch(destination, name, records, policy).await,
                        )
                    }
                })
                .collect();

            let outcomes = run_concurrent(tasks, concurrency, cancel).await;

            // Only the contiguous committed prefix counts; the cursor never
            // advances past an unprocessed batch.
            let mut committed = 0usize;
            for outcome in &outcomes {
                if outcome.index != committed || outcome.result.is_err() {
                    break;
                }
                committed += 1;
            }

            let mut fatal: Option<String> = None;
            for outcome in outcomes.iter().take(committed) {
                let Ok(batch_outcome) = &outcome.result else {
                    continue;
                };
                match batch_outcome {
                    BatchOutcome::Loaded {
                        loaded,
                        rejected,
                        recovered,
                    } => {
                        progress.record(*loaded as u64, rejected.len() as u64);
                        for (record, connector_error) in rejected {
                            tracker.record_error();
                            error_service
                                .record(NewError {
                                    project_id,
                                    object_type_id: Some(object.id),
                                    classification: classify(connector_error),
                                    message: connector_error.to_string(),
                                    record_id: Some(record.id.clone()),
                                    record_data: serde_json::to_string(record).ok(),
                                    batch_cursor: None,
                                    attempts: 1,
                                    max_attempts: 1,
                                    resolved: false,
                                })
                                .await?;
                        }
                        if let Some((classification, message, attempts)) = recovered {
                            self.record_recovered(
                                project_id,
                                object.id,
                                *classification,
                                message.clone(),
                                *attempts,
                                config,
                                &error_service,
                            )
                            .await?;
                        }
                    }
                    BatchOutcome::BatchFailed {
                        classification,
                        message,
                        attempts,
                        record_count,
                    } => {
                        if classification.project_level {
                            fatal = Some(message.clone());
                        } else {
                            progress.record(0, *record_count as u64);
                        }
                        tracker.record_error();
                        // Keyed on the batch's start cursor so failures of
                        // distinct batches stay distinct in the monitor.
                        let batch_cursor = if outcome.index == 0 {
                            wave_start_cursor.clone()
                        } else {
                            wave[outcome.index - 1].cursor_after.clone()
                        };
                        error_service
                            .record(NewError {
                                project_id,
                                object_type_id: Some(object.id),
                                classification: *classification,
                                message: format!(
                                    "batch of {record_count} records failed: {message}"
                                ),
                                record_id: None,
                                record_data: None,
                                batch_cursor,
                                attempts: *attempts,
                                max_attempts: max_attempts_for(classification.kind, &config.retry),
                                resolved: false,
                            })
                            .await?;
                    }
                }
            }

            // Project-level failures on uncommitted batches still abort the
            // run; their records stay uncounted and re-extract on resume.
            for outcome in outcomes.iter().skip(committed) {
                if let Ok(BatchOutcome::BatchFailed {
                    classification,
                    message,
                    ..
                }) = &outcome.result
                {
                    if classification.project_level && fatal.is_none() {
                        fatal = Some(message.clone());
                    }
                }
            }

            let committed_cursor = if committed > 0 {
                wave[committed - 1].cursor_after.clone()
            } else {
                cursor.clone()
            };
            if committed < wave.len() {
                // Cancellation stopped scheduling mid-wave; rewind so the
                // unloaded batches re-extract on resume.
                cursor = committed_cursor.clone();
                end_reached = false;
            } else {
                cursor = committed_cursor.clone();
            }

            self.persist_wave(project_id, object.id, committed_cursor, tracker)
                .await?;
            self.reporter
                .report_progress(project_id, &tracker.snapshot())
                .await;

            if let Some(message) = fatal {
                return Ok(ObjectOutcome::Fatal(message));
            }
            if cursor.is_none() && committed == wave.len() {
                end_reached = true;
            }
            progress.set_stage(Stage::Extracting);
        }

        self.verify_object(project_id, object, &progress, destination, config, tracker)
            .await
    }

    /// Verification pass: counts must reconcile before the object is `done`.
    async fn verify_object(
        &self,
        project_id: i32,
        object: &object_types::Model,
        progress: &Arc<ObjectProgress>,
        destination: Arc<dyn Connector>,
        config: &EngineConfig,
        tracker: &ProgressTracker,
    ) -> Result<ObjectOutcome> {
        progress.set_stage(Stage::Verifying);
        self.set_object_status(object.id, ObjectStatus::Verifying)
            .await?;
        self.reporter
            .report_stage(project_id, &object.name, Stage::Verifying)
            .await;

        let snapshot = tracker.snapshot();
        let counts = snapshot
            .objects
            .iter()
            .find(|o| o.object_type_id == object.id)
            .context("object type missing from tracker snapshot")?;

        // The source count can drift while extraction runs; the committed
        // counts are authoritative.
        if counts.migrated + counts.failed != counts.total {
            warn!(
                object_type = object.name,
                total = counts.total,
                processed = counts.migrated + counts.failed,
                "source count drifted during extraction, adjusting total"
            );
            progress.set_total(counts.migrated + counts.failed);
        }

        {
            let destination = destination.clone();
            let name = object.name.clone();
            if let Ok(attempted) = with_retry(&config.retry, || {
                let destination = destination.clone();
                let name = name.clone();
                async move { destination.count_records(&name).await }
            })
            .await
            {
                if attempted.value < counts.migrated {
                    warn!(
                        object_type = object.name,
                        destination_count = attempted.value,
                        migrated = counts.migrated,
                        "destination count below migrated count"
                    );
                }
            }
        }

        let failed_everything = counts.migrated == 0 && counts.failed > 0;
        let status = if failed_everything {
            progress.set_stage(Stage::Failed);
            ObjectStatus::ObjectFailed
        } else {
            progress.set_stage(Stage::Done);
            ObjectStatus::Done
        };
        self.set_object_status(object.id, status).await?;
        self.persist_wave(project_id, object.id, None, tracker).await?;
        self.reporter
            .report_stage(
                project_id,
                &object.name,
                if failed_everything { Stage::Failed } else { Stage::Done },
            )
            .await;

        if failed_everything {
            Ok(ObjectOutcome::ObjectFailed)
        } else {
            Ok(ObjectOutcome::Finished)
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_terminal_failure(
        &self,
        project_id: i32,
        object: &object_types::Model,
        retry_error: RetryError,
        batch_cursor: Option<String>,
        error_service: &ErrorService,
        progress: &Arc<ObjectProgress>,
    ) -> Result<ObjectOutcome> {
        let classification = retry_error.classification;
        let message = retry_error.to_string();
        tracker_error_and_record(
            error_service,
            project_id,
            object.id,
            classification,
            message.clone(),
            batch_cursor,
            retry_error.attempts,
        )
        .await?;

        if classification.project_level {
            Ok(ObjectOutcome::Fatal(message))
        } else {
            progress.set_stage(Stage::Failed);
            self.set_object_status(object.id, ObjectStatus::ObjectFailed)
                .await?;
            Ok(ObjectOutcome::ObjectFailed)
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_recovered(
        &self,
        project_id: i32,
        object_type_id: i32,
        classification: Classification,
        message: String,
        attempts: u32,
        config: &EngineConfig,
        error_service: &ErrorService,
    ) -> Result<()> {
        // Recovered failures are kept for audit but never surface as open.
        error_service
            .record(NewError {
                project_id,
                object_type_id: Some(object_type_id),
                classification,
                message: format!("recovered after {attempts} retries: {message}"),
                record_id: None,
                record_data: None,
                batch_cursor: None,
                attempts,
                max_attempts: max_attempts_for(classification.kind, &config.retry),
                resolved: true,
            })
            .await?;
        Ok(())
    }

    /// Durable commit of one wave: object counters + cursor and the project
    /// aggregates move together or not at all.
    async fn persist_wave(
        &self,
        project_id: i32,
        object_type_id: i32,
        cursor: Option<String>,
        tracker: &ProgressTracker,
    ) -> Result<()> {
        let snapshot = tracker.snapshot();
        let counts = snapshot
            .objects
            .iter()
            .find(|o| o.object_type_id == object_type_id)
            .context("object type missing from tracker snapshot")?;
        let now = Utc::now();

        let txn = self.db.begin().await?;

        let object_update = object_types::ActiveModel {
            total_records: Set(counts.total as i64),
            processed_records: Set(counts.migrated as i64),
            failed_records: Set(counts.failed as i64),
            cursor: Set(cursor),
            updated_at: Set(now),
            ..Default::default()
        };
        object_types::Entity::update_many()
            .set(object_update)
            .filter(object_types::Column::Id.eq(object_type_id))
            .exec(&txn)
            .await?;

        let project_update = migration_projects::ActiveModel {
            total_records: Set(snapshot.total_records as i64),
            migrated_records: Set(snapshot.processed_records as i64),
            failed_records: Set(snapshot.failed_records as i64),
            updated_at: Set(now),
            ..Default::default()
        };
        migration_projects::Entity::update_many()
            .set(project_update)
            .filter(migration_projects::Column::Id.eq(project_id))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(())
    }

    async fn set_object_status(&self, object_type_id: i32, status: ObjectStatus) -> Result<()> {
        let update = object_types::ActiveModel {
            status: Set(status.into()),
            updated_at: Set(Utc::now()),
            ..Default::default()
        };
        object_types::Entity::update_many()
            .set(update)
            .filter(object_types::Column::Id.eq(object_type_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    async fn update_project_status(
        &self,
        project_id: i32,
        status: ProjectStatus,
        message: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now();
        let mut update = migration_projects::ActiveModel {
            status: Set(status.into()),
            updated_at: Set(now),
            ..Default::default()
        };
        if let Some(message) = message {
            update.error = Set(Some(message.to_string()));
        }
        match status {
            ProjectStatus::InProgress => {
                update.started_at = Set(Some(now));
            }
            s if s.is_terminal() => {
                update.completed_at = Set(Some(now));
            }
            _ => {}
        }

        migration_projects::Entity::update_many()
            .set(update)
            .filter(migration_projects::Column::Id.eq(project_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }
}

async fn tracker_error_and_record(
    error_service: &ErrorService,
    project_id: i32,
    object_type_id: i32,
    classification: Classification,
    message: String,
    batch_cursor: Option<String>,
    attempts: u32,
) -> Result<()> {
    error_service
        .record(NewError {
            project_id,
            object_type_id: Some(object_type_id),
            classification,
            message,
            record_id: None,
            record_data: None,
            batch_cursor,
            attempts,
            max_attempts: attempts.max(1),
            resolved: false,
        })
        .await?;
    Ok(())
}

fn max_attempts_for(kind: ErrorKind, policy: &RetryPolicy) -> u32 {
    match kind {
        ErrorKind::Unknown => 2,
        ErrorKind::ValidationError | ErrorKind::AuthFailure | ErrorKind::UnrecoverableProject => 1,
        _ => policy.max_attempts.max(1),
    }
}

fn stage_for_status(status: ObjectStatus) -> Stage {
    match status {
        ObjectStatus::Pending | ObjectStatus::NeedsMapping => Stage::Pending,
        ObjectStatus::Mapping => Stage::Mapping,
        ObjectStatus::Running => Stage::Loading,
        ObjectStatus::Verifying => Stage::Verifying,
        ObjectStatus::Done => Stage::Done,
        ObjectStatus::ObjectFailed => Stage::Failed,
    }
}

/// Loads one batch with retry. Failures come back as values so the pool
/// never cancels sibling batches.
async fn load_one_batch(
    destination: Arc<dyn Connector>,
    object_name: String,
    records: Vec<SourceRecord>,
    policy: RetryPolicy,
) -> BatchOutcome {
    let record_count = records.len();
    let result = with_retry(&policy, || {
        let destination = destination.clone();
        let object_name = object_name.clone();
        let records = records.clone();
        async move { destination.load_batch(&object_name, records).await }
    })
    .await;

    match result {
        Ok(attempted) => {
            let report = attempted.value;
            let rejected = report
                .failed
                .into_iter()
                .map(|(id, connector_error)| {
                    let record = records
                        .iter()
                        .find(|r| r.id == id)
                        .cloned()
                        .unwrap_or_else(|| SourceRecord::new(id));
                    (record, connector_error)
                })
                .collect();
            BatchOutcome::Loaded {
                loaded: report.succeeded.len(),
                rejected,
                recovered: attempted
                    .last_error
                    .map(|(classification, message)| {
                        (classification, message, attempted.failed_attempts)
                    }),
            }
        }
        Err(retry_error) => BatchOutcome::BatchFailed {
            classification: retry_error.classification,
            message: retry_error.error.to_string(),
            attempts: retry_error.attempts,
            record_count,
        },
    }
}
