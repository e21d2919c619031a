use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "migration_projects")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub name: String,
    pub source_connection_id: String,
    pub destination_connection_id: String,
    pub status: String,
    pub strategy: String,
    /// Cron expression for recurring runs; NULL means run immediately on
    /// start. Firing recurring schedules is left to an external scheduler.
    pub schedule: Option<String>,
    pub total_records: i64,
    pub migrated_records: i64,
    pub failed_records: i64,
    pub error: Option<String>,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
    pub started_at: Option<ChronoDateTimeUtc>,
    pub completed_at: Option<ChronoDateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::object_types::Entity")]
    ObjectTypes,
    #[sea_orm(has_many = "super::migration_errors::Entity")]
    MigrationErrors,
}

impl Related<super::object_types::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ObjectTypes.def()
    }
}

impl Related<super::migration_errors::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MigrationErrors.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Scheduled,
    InProgress,
    Paused,
    Completed,
    CompletedWithErrors,
    Failed,
    Cancelled,
}

impl From<ProjectStatus> for String {
    fn from(status: ProjectStatus) -> Self {
        match status {
            ProjectStatus::Scheduled => "scheduled",
            ProjectStatus::InProgress => "in_progress",
            ProjectStatus::Paused => "paused",
            ProjectStatus::Completed => "completed",
            ProjectStatus::CompletedWithErrors => "completed_with_errors",
            ProjectStatus::Failed => "failed",
            ProjectStatus::Cancelled => "cancelled",
        }
        .to_string()
    }
}

impl From<String> for ProjectStatus {
    fn from(status: String) -> Self {
        match status.as_str() {
            "in_progress" => ProjectStatus::InProgress,
            "paused" => ProjectStatus::Paused,
            "completed" => ProjectStatus::Completed,
            "completed_with_errors" => ProjectStatus::CompletedWithErrors,
            "failed" => ProjectStatus::Failed,
            "cancelled" => ProjectStatus::Cancelled,
            _ => ProjectStatus::Scheduled,
        }
    }
}

impl ProjectStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProjectStatus::Completed
                | ProjectStatus::CompletedWithErrors
                | ProjectStatus::Failed
                | ProjectStatus::Cancelled
        )
    }

    /// Only `scheduled` and `paused` projects may (re)start a run.
    pub fn can_start(&self) -> bool {
        matches!(self, ProjectStatus::Scheduled | ProjectStatus::Paused)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Full,
    Incremental,
    Parallel,
}

impl From<Strategy> for String {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Full => "full",
            Strategy::Incremental => "incremental",
            Strategy::Parallel => "parallel",
        }
        .to_string()
    }
}

impl From<String> for Strategy {
    fn from(strategy: String) -> Self {
        match strategy.as_str() {
            "incremental" => Strategy::Incremental,
            "parallel" => Strategy::Parallel,
            _ => Strategy::Full,
        }
    }
}

impl Model {
    pub fn get_status(&self) -> ProjectStatus {
        ProjectStatus::from(self.status.clone())
    }

    pub fn is_running(&self) -> bool {
        matches!(self.get_status(), ProjectStatus::InProgress)
    }

    pub fn duration_seconds(&self) -> Option<i64> {
        if let (Some(started), Some(completed)) = (&self.started_at, &self.completed_at) {
            Some((completed.timestamp() - started.timestamp()).abs())
        } else {
            None
        }
    }
}
