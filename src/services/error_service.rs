use anyhow::{Context, Result};
use chrono::Utc;
use sea_orm::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::connector::{Connector, SourceRecord};
use crate::database::entities::{migration_errors, migration_projects, object_types};
use crate::errors::{remediation, Classification};

/// Records, lists, and retries migration failures.
#[derive(Clone)]
pub struct ErrorService {
    db: DatabaseConnection,
}

/// One failure to record. `attempts` counts failed tries already spent;
/// `resolved` marks failures that recovered on their own (kept for audit).
pub struct NewError {
    pub project_id: i32,
    pub object_type_id: Option<i32>,
    pub classification: Classification,
    pub message: String,
    pub record_id: Option<String>,
    pub record_data: Option<String>,
    pub batch_cursor: Option<String>,
    pub attempts: u32,
    pub max_attempts: u32,
    pub resolved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryOutcome {
    Retried,
    RetryFailed { message: String },
    NotRetryable,
    AlreadyResolved,
}

impl ErrorService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Persists one failure. An unresolved row for the same logical failure
    /// (project, object type, kind, record or batch cursor) is updated in
    /// place so a failure retried N times still yields exactly one row.
    pub async fn record(&self, new_error: NewError) -> Result<migration_errors::Model, DbErr> {
        let kind: String = new_error.classification.kind.into();
        let now = Utc::now();

        if !new_error.resolved {
            let mut query = migration_errors::Entity::find()
                .filter(migration_errors::Column::ProjectId.eq(new_error.project_id))
                .filter(migration_errors::Column::Kind.eq(kind.clone()))
                .filter(migration_errors::Column::Resolved.eq(false));
            query = match new_error.object_type_id {
                Some(id) => query.filter(migration_errors::Column::ObjectTypeId.eq(id)),
                None => query.filter(migration_errors::Column::ObjectTypeId.is_null()),
            };
            query = match &new_error.record_id {
                Some(id) => query.filter(migration_errors::Column::RecordId.eq(id.clone())),
                None => query.filter(migration_errors::Column::RecordId.is_null()),
            };
            query = match &new_error.batch_cursor {
                Some(c) => query.filter(migration_errors::Column::BatchCursor.eq(c.clone())),
                None => query.filter(migration_errors::Column::BatchCursor.is_null()),
            };
            let existing = query.one(&self.db).await?;

            if let Some(existing) = existing {
                let attempts = existing.attempts.max(new_error.attempts as i32);
                let mut update: migration_errors::ActiveModel = existing.into();
                update.attempts = Set(attempts);
                update.message = Set(new_error.message);
                update.updated_at = Set(now);
                return update.update(&self.db).await;
            }
        }

        let row = migration_errors::ActiveModel {
            project_id: Set(new_error.project_id),
            object_type_id: Set(new_error.object_type_id),
            kind: Set(kind),
            severity: Set(new_error.classification.severity.into()),
            message: Set(new_error.message),
            record_id: Set(new_error.record_id),
            record_data: Set(new_error.record_data),
            batch_cursor: Set(new_error.batch_cursor),
            retryable: Set(new_error.classification.retryable),
            attempts: Set(new_error.attempts as i32),
            max_attempts: Set(new_error.max_attempts as i32),
            remediation: Set(Some(remediation(new_error.classification.kind).to_string())),
            resolved: Set(new_error.resolved),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        migration_errors::Entity::insert(row)
            .exec_with_returning(&self.db)
            .await
    }

    /// Unresolved failures for the operator monitor, newest last.
    pub async fn list_open(&self, project_id: i32) -> Result<Vec<migration_errors::Model>, DbErr> {
        migration_errors::Entity::find()
            .filter(migration_errors::Column::ProjectId.eq(project_id))
            .filter(migration_errors::Column::Resolved.eq(false))
            .order_by_asc(migration_errors::Column::CreatedAt)
            .all(&self.db)
            .await
    }

    pub async fn list_all(&self, project_id: i32) -> Result<Vec<migration_errors::Model>, DbErr> {
        migration_errors::Entity::find()
            .filter(migration_errors::Column::ProjectId.eq(project_id))
            .order_by_asc(migration_errors::Column::CreatedAt)
            .all(&self.db)
            .await
    }

    /// Operator-initiated retry of a single recorded failure. Only failures
    /// that kept the record payload can be replayed; success marks the row
    /// resolved and moves the record from failed to migrated counts.
    pub async fn retry(
        &self,
        error_id: i32,
        destination: &dyn Connector,
    ) -> Result<RetryOutcome> {
        let error = migration_errors::Entity::find_by_id(error_id)
            .one(&self.db)
            .await?
            .context("error not found")?;

        if error.resolved {
            return Ok(RetryOutcome::AlreadyResolved);
        }
        let Some(record_data) = &error.record_data else {
            return Ok(RetryOutcome::NotRetryable);
        };
        let record: SourceRecord =
            serde_json::from_str(record_data).context("stored record payload is unreadable")?;

        let object_type = match error.object_type_id {
            Some(id) => object_types::Entity::find_by_id(id).one(&self.db).await?,
            None => None,
        };
        let Some(object_type) = object_type else {
            return Ok(RetryOutcome::NotRetryable);
        };

        match destination.load_record(&object_type.name, record).await {
            Ok(()) => {
                let mut update: migration_errors::ActiveModel = error.into();
                update.resolved = Set(true);
                update.updated_at = Set(Utc::now());
                update.update(&self.db).await?;

                self.shift_failed_to_migrated(&object_type).await?;
                info!(error_id, "record retry succeeded");
                Ok(RetryOutcome::Retried)
            }
            Err(e) => {
                let message = e.to_string();
                let attempts = error.attempts + 1;
                let mut update: migration_errors::ActiveModel = error.into();
                update.attempts = Set(attempts);
                update.message = Set(message.clone());
                update.updated_at = Set(Utc::now());
                update.update(&self.db).await?;

                warn!(error_id, attempts, "record retry failed: {message}");
                Ok(RetryOutcome::RetryFailed { message })
            }
        }
    }

    async fn shift_failed_to_migrated(&self, object_type: &object_types::Model) -> Result<()> {
        let txn = self.db.begin().await?;

        let mut object_update: object_types::ActiveModel = object_type.clone().into();
        object_update.processed_records = Set(object_type.processed_records + 1);
        object_update.failed_records = Set((object_type.failed_records - 1).max(0));
        object_update.updated_at = Set(Utc::now());
        object_update.update(&txn).await?;

        if let Some(project) = migration_projects::Entity::find_by_id(object_type.project_id)
            .one(&txn)
            .await?
        {
            let mut project_update: migration_projects::ActiveModel = project.clone().into();
            project_update.migrated_records = Set(project.migrated_records + 1);
            project_update.failed_records = Set((project.failed_records - 1).max(0));
            project_update.updated_at = Set(Utc::now());
            project_update.update(&txn).await?;
        }

        txn.commit().await?;
        Ok(())
    }
}
