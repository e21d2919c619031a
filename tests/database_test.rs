//! Database functionality tests
//!
//! Tests for migrations, entity operations, and the error ledger.

use anyhow::Result;
use chrono::Utc;
use quillswitch::database::connection::setup_database;
use quillswitch::database::entities::*;
use quillswitch::errors::{Classification, ErrorKind, Severity};
use quillswitch::services::{ErrorService, NewError};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use tempfile::NamedTempFile;

/// Create a test database connection with migrations
async fn setup_test_db() -> Result<(DatabaseConnection, NamedTempFile)> {
    let temp_file = NamedTempFile::new()?;
    let db_url = format!("sqlite://{}?mode=rwc", temp_file.path().display());

    let db = Database::connect(&db_url).await?;
    setup_database(&db).await?;

    Ok((db, temp_file))
}

async fn insert_project(db: &DatabaseConnection, name: &str) -> Result<migration_projects::Model> {
    let now = Utc::now();
    let project = migration_projects::ActiveModel {
        name: Set(name.to_string()),
        source_connection_id: Set("memory:source".to_string()),
        destination_connection_id: Set("memory:destination".to_string()),
        status: Set("scheduled".to_string()),
        strategy: Set("full".to_string()),
        total_records: Set(0),
        migrated_records: Set(0),
        failed_records: Set(0),
        created_at: Set(now),
        updated_at: Set(now),
        ..Default::default()
    };
    Ok(project.insert(db).await?)
}

#[tokio::test]
async fn test_database_migrations() -> Result<()> {
    let (db, _temp_file) = setup_test_db().await?;

    let projects = migration_projects::Entity::find().all(&db).await?;
    assert_eq!(projects.len(), 0);

    let object_types = object_types::Entity::find().all(&db).await?;
    assert_eq!(object_types.len(), 0);

    let mappings = field_mappings::Entity::find().all(&db).await?;
    assert_eq!(mappings.len(), 0);

    let errors = migration_errors::Entity::find().all(&db).await?;
    assert_eq!(errors.len(), 0);

    Ok(())
}

#[tokio::test]
async fn test_project_status_round_trip() -> Result<()> {
    let (db, _temp_file) = setup_test_db().await?;

    let project = insert_project(&db, "Acme CRM switch").await?;
    assert_eq!(
        project.get_status(),
        migration_projects::ProjectStatus::Scheduled
    );
    assert!(project.get_status().can_start());
    assert!(!project.get_status().is_terminal());

    let mut update: migration_projects::ActiveModel = project.into();
    update.status = Set("completed_with_errors".to_string());
    let project = update.update(&db).await?;

    assert_eq!(
        project.get_status(),
        migration_projects::ProjectStatus::CompletedWithErrors
    );
    assert!(project.get_status().is_terminal());

    Ok(())
}

#[tokio::test]
async fn test_cascade_delete_removes_children() -> Result<()> {
    let (db, _temp_file) = setup_test_db().await?;

    let project = insert_project(&db, "cascade").await?;
    let now = Utc::now();

    let object_type = object_types::ActiveModel {
        project_id: Set(project.id),
        name: Set("contact".to_string()),
        status: Set("pending".to_string()),
        total_records: Set(0),
        processed_records: Set(0),
        failed_records: Set(0),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&db)
    .await?;

    field_mappings::ActiveModel {
        object_type_id: Set(object_type.id),
        source_field: Set("email".to_string()),
        destination_field: Set("email_address".to_string()),
        required: Set(true),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(&db)
    .await?;

    migration_projects::Entity::delete_by_id(project.id)
        .exec(&db)
        .await?;

    let remaining = object_types::Entity::find()
        .filter(object_types::Column::ProjectId.eq(project.id))
        .all(&db)
        .await?;
    assert_eq!(remaining.len(), 0);

    let remaining = field_mappings::Entity::find()
        .filter(field_mappings::Column::ObjectTypeId.eq(object_type.id))
        .all(&db)
        .await?;
    assert_eq!(remaining.len(), 0);

    Ok(())
}

#[tokio::test]
async fn test_error_ledger_dedupes_unresolved_rows() -> Result<()> {
    let (db, _temp_file) = setup_test_db().await?;
    let project = insert_project(&db, "dedupe").await?;
    let service = ErrorService::new(db.clone());

    let classification = Classification {
        kind: ErrorKind::TransientNetwork,
        severity: Severity::Medium,
        retryable: true,
        project_level: false,
    };

    for attempt in 1..=3 {
        service
            .record(NewError {
                project_id: project.id,
                object_type_id: None,
                classification,
                message: format!("connection reset (attempt {attempt})"),
                record_id: None,
                record_data: None,
                batch_cursor: Some("200".to_string()),
                attempts: attempt,
                max_attempts: 3,
                resolved: false,
            })
            .await?;
    }

    let open = service.list_open(project.id).await?;
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].attempts, 3);
    assert!(open[0].message.contains("attempt 3"));
    assert_eq!(open[0].kind, "transient_network");
    assert!(open[0].remediation.is_some());

    Ok(())
}

#[tokio::test]
async fn test_distinct_batch_failures_stay_distinct() -> Result<()> {
    let (db, _temp_file) = setup_test_db().await?;
    let project = insert_project(&db, "batches").await?;
    let service = ErrorService::new(db.clone());

    let classification = Classification {
        kind: ErrorKind::TransientNetwork,
        severity: Severity::Medium,
        retryable: true,
        project_level: false,
    };

    // Two batches of the same object type exhaust retries on the same error
    // kind; each gets its own row, keyed by its start cursor.
    for cursor in ["0", "200"] {
        service
            .record(NewError {
                project_id: project.id,
                object_type_id: None,
                classification,
                message: format!("batch starting at {cursor} failed: connection reset"),
                record_id: None,
                record_data: None,
                batch_cursor: Some(cursor.to_string()),
                attempts: 3,
                max_attempts: 3,
                resolved: false,
            })
            .await?;
    }

    let open = service.list_open(project.id).await?;
    assert_eq!(open.len(), 2);
    assert!(open[0].message.contains("starting at 0"));
    assert!(open[1].message.contains("starting at 200"));

    Ok(())
}

#[tokio::test]
async fn test_resolved_audit_rows_do_not_dedupe() -> Result<()> {
    let (db, _temp_file) = setup_test_db().await?;
    let project = insert_project(&db, "audit").await?;
    let service = ErrorService::new(db.clone());

    let classification = Classification {
        kind: ErrorKind::RateLimited,
        severity: Severity::Medium,
        retryable: true,
        project_level: false,
    };

    for _ in 0..2 {
        service
            .record(NewError {
                project_id: project.id,
                object_type_id: None,
                classification,
                message: "recovered after 1 retries: rate limited".to_string(),
                record_id: None,
                record_data: None,
                batch_cursor: None,
                attempts: 1,
                max_attempts: 3,
                resolved: true,
            })
            .await?;
    }

    let all = service.list_all(project.id).await?;
    assert_eq!(all.len(), 2);
    assert!(all.iter().all(|e| e.resolved));
    assert!(service.list_open(project.id).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_field_mapping_spec_conversion() -> Result<()> {
    let (db, _temp_file) = setup_test_db().await?;
    let project = insert_project(&db, "specs").await?;
    let now = Utc::now();

    let object_type = object_types::ActiveModel {
        project_id: Set(project.id),
        name: Set("deal".to_string()),
        status: Set("pending".to_string()),
        total_records: Set(0),
        processed_records: Set(0),
        failed_records: Set(0),
        updated_at: Set(now),
        ..Default::default()
    }
    .insert(&db)
    .await?;

    let row = field_mappings::ActiveModel {
        object_type_id: Set(object_type.id),
        source_field: Set("amount".to_string()),
        destination_field: Set("deal_value".to_string()),
        required: Set(false),
        transform: Set(Some("trim".to_string())),
        confidence: Set(Some(0.92)),
        created_at: Set(now),
        ..Default::default()
    }
    .insert(&db)
    .await?;

    let spec = row.to_spec();
    assert_eq!(spec.source_field, "amount");
    assert_eq!(spec.destination_field, "deal_value");
    assert_eq!(spec.transform.as_deref(), Some("trim"));
    assert_eq!(spec.confidence, Some(0.92));

    Ok(())
}
