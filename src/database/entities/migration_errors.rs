use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::{ErrorKind, Severity};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "migration_errors")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub project_id: i32,
    pub object_type_id: Option<i32>,
    pub kind: String,
    pub severity: String,
    pub message: String,
    pub record_id: Option<String>,
    /// JSON payload of the failed record, kept so the operator can retry a
    /// single record without re-extracting.
    pub record_data: Option<String>,
    /// Cursor the failed batch started from. Distinguishes batch-level
    /// failures of the same kind within one object type.
    pub batch_cursor: Option<String>,
    pub retryable: bool,
    pub attempts: i32,
    pub max_attempts: i32,
    pub remediation: Option<String>,
    pub resolved: bool,
    pub created_at: ChronoDateTimeUtc,
    pub updated_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::migration_projects::Entity",
        from = "Column::ProjectId",
        to = "super::migration_projects::Column::Id"
    )]
    MigrationProjects,
}

impl Related<super::migration_projects::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MigrationProjects.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn get_kind(&self) -> ErrorKind {
        ErrorKind::from(self.kind.clone())
    }

    pub fn get_severity(&self) -> Severity {
        Severity::from(self.severity.clone())
    }

    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}
