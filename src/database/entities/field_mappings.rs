use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::mapping::FieldMappingSpec;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "field_mappings")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub object_type_id: i32,
    pub source_field: String,
    pub destination_field: String,
    pub required: bool,
    pub transform: Option<String>,
    /// Confidence of the accepted suggestion; NULL for manual mappings.
    pub confidence: Option<f32>,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::object_types::Entity",
        from = "Column::ObjectTypeId",
        to = "super::object_types::Column::Id"
    )]
    ObjectTypes,
}

impl Related<super::object_types::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ObjectTypes.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub fn to_spec(&self) -> FieldMappingSpec {
        FieldMappingSpec {
            source_field: self.source_field.clone(),
            destination_field: self.destination_field.clone(),
            required: self.required,
            transform: self.transform.clone(),
            confidence: self.confidence,
        }
    }
}
