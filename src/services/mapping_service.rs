use chrono::Utc;
use sea_orm::*;
use thiserror::Error;
use tracing::info;

use crate::database::entities::{field_mappings, object_types, object_types::ObjectStatus};
use crate::mapping::{
    self, FieldMappingSpec, MappingReport, SuggestionProvider,
};

/// Stores and validates field mappings per object type.
#[derive(Clone)]
pub struct MappingService {
    db: DatabaseConnection,
}

#[derive(Debug, Error)]
pub enum ApplyError {
    /// Required destination fields with no mapping, or a destination field
    /// claimed by more than one required mapping.
    #[error("required destination fields not covered: {0:?}")]
    Uncovered(Vec<String>),

    #[error("object type {0} not found")]
    ObjectTypeNotFound(i32),

    #[error(transparent)]
    Db(#[from] DbErr),
}

impl MappingService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Heuristic suggestions, optionally overlaid by an external provider.
    pub async fn suggest(
        &self,
        source_fields: &[String],
        destination_fields: &[String],
        provider: Option<&dyn SuggestionProvider>,
    ) -> MappingReport {
        mapping::suggest_with_provider(source_fields, destination_fields, provider).await
    }

    /// Replaces all mappings of one object type atomically. Validation runs
    /// first; the delete+insert happens inside a single transaction, so a
    /// failure leaves the prior mapping set untouched. An uncovered required
    /// field moves the object type to `needs_mapping`.
    pub async fn apply(
        &self,
        object_type_id: i32,
        specs: Vec<FieldMappingSpec>,
        required_destination_fields: &[String],
    ) -> Result<usize, ApplyError> {
        let object_type = object_types::Entity::find_by_id(object_type_id)
            .one(&self.db)
            .await?
            .ok_or(ApplyError::ObjectTypeNotFound(object_type_id))?;

        if let Err(uncovered) =
            mapping::validate_required_coverage(&specs, required_destination_fields)
        {
            self.set_object_status(&object_type, ObjectStatus::NeedsMapping)
                .await?;
            return Err(ApplyError::Uncovered(uncovered));
        }

        let count = specs.len();
        let txn = self.db.begin().await?;
        field_mappings::Entity::delete_many()
            .filter(field_mappings::Column::ObjectTypeId.eq(object_type_id))
            .exec(&txn)
            .await?;
        for spec in specs {
            let row = field_mappings::ActiveModel {
                object_type_id: Set(object_type_id),
                source_field: Set(spec.source_field),
                destination_field: Set(spec.destination_field),
                required: Set(spec.required),
                transform: Set(spec.transform),
                confidence: Set(spec.confidence),
                created_at: Set(Utc::now()),
                ..Default::default()
            };
            field_mappings::Entity::insert(row).exec(&txn).await?;
        }
        txn.commit().await?;

        if object_type.get_status() == ObjectStatus::NeedsMapping {
            self.set_object_status(&object_type, ObjectStatus::Pending)
                .await?;
        }

        info!(
            object_type_id,
            mappings = count,
            "replaced field mappings"
        );
        Ok(count)
    }

    pub async fn stored_specs(
        &self,
        object_type_id: i32,
    ) -> Result<Vec<FieldMappingSpec>, DbErr> {
        let rows = field_mappings::Entity::find()
            .filter(field_mappings::Column::ObjectTypeId.eq(object_type_id))
            .order_by_asc(field_mappings::Column::Id)
            .all(&self.db)
            .await?;
        Ok(rows.iter().map(|r| r.to_spec()).collect())
    }

    async fn set_object_status(
        &self,
        object_type: &object_types::Model,
        status: ObjectStatus,
    ) -> Result<(), DbErr> {
        let mut update: object_types::ActiveModel = object_type.clone().into();
        update.status = Set(status.into());
        update.updated_at = Set(Utc::now());
        update.update(&self.db).await?;
        Ok(())
    }
}
