use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "object_types")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub project_id: i32,
    pub name: String,
    pub status: String,
    pub total_records: i64,
    pub processed_records: i64,
    pub failed_records: i64,
    /// Opaque extraction resumption token. NULL means start from the
    /// beginning; only advanced once the batches behind it are committed.
    pub cursor: Option<String>,
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
    #[sea_orm(has_many = "super::field_mappings::Entity")]
    FieldMappings,
}

impl Related<super::migration_projects::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MigrationProjects.def()
    }
}

impl Related<super::field_mappings::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FieldMappings.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectStatus {
    Pending,
    NeedsMapping,
    Mapping,
    Running,
    Verifying,
    Done,
    ObjectFailed,
}

impl From<ObjectStatus> for String {
    fn from(status: ObjectStatus) -> Self {
        match status {
            ObjectStatus::Pending => "pending",
            ObjectStatus::NeedsMapping => "needs_mapping",
            ObjectStatus::Mapping => "mapping",
            ObjectStatus::Running => "running",
            ObjectStatus::Verifying => "verifying",
            ObjectStatus::Done => "done",
            ObjectStatus::ObjectFailed => "object_failed",
        }
        .to_string()
    }
}

impl From<String> for ObjectStatus {
    fn from(status: String) -> Self {
        match status.as_str() {
            "needs_mapping" => ObjectStatus::NeedsMapping,
            "mapping" => ObjectStatus::Mapping,
            "running" => ObjectStatus::Running,
            "verifying" => ObjectStatus::Verifying,
            "done" => ObjectStatus::Done,
            "object_failed" => ObjectStatus::ObjectFailed,
            _ => ObjectStatus::Pending,
        }
    }
}

impl Model {
    pub fn get_status(&self) -> ObjectStatus {
        ObjectStatus::from(self.status.clone())
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.get_status(),
            ObjectStatus::Done | ObjectStatus::ObjectFailed
        )
    }
}
