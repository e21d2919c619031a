//! Mapping service integration tests
//!
//! Atomic replacement of stored mappings, the required-coverage gate, and
//! suggestion plumbing against a real database.

use anyhow::Result;
use chrono::Utc;
use quillswitch::database::connection::setup_database;
use quillswitch::database::entities::{migration_projects, object_types, object_types::ObjectStatus};
use quillswitch::mapping::FieldMappingSpec;
use quillswitch::services::{ApplyError, MappingService};
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection, EntityTrait, Set};
use tempfile::NamedTempFile;

async fn setup_test_db() -> Result<(DatabaseConnection, NamedTempFile)> {
    let temp_file = NamedTempFile::new()?;
    let db_url = format!("sqlite://{}?mode=rwc", temp_file.path().display());

    let db = Database::connect(&db_url).await?;
    setup_database(&db).await?;

    Ok((db, temp_file))
}

async fn insert_object_type(db: &DatabaseConnection) -> Result<object_types::Model> {
    let now = Utc::now();
    let project = migration_projects::ActiveModel {
        name: Set("mapping test".to_string()),
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
    }
    .insert(db)
    .await?;

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
    .insert(db)
    .await?;

    Ok(object_type)
}

fn spec(source: &str, destination: &str, required: bool) -> FieldMappingSpec {
    FieldMappingSpec {
        source_field: source.to_string(),
        destination_field: destination.to_string(),
        required,
        transform: None,
        confidence: None,
    }
}

#[tokio::test]
async fn apply_replaces_the_whole_mapping_set() -> Result<()> {
    let (db, _temp) = setup_test_db().await?;
    let object_type = insert_object_type(&db).await?;
    let service = MappingService::new(db.clone());

    service
        .apply(
            object_type.id,
            vec![spec("email", "email_address", true)],
            &["email_address".to_string()],
        )
        .await?;

    service
        .apply(
            object_type.id,
            vec![
                spec("email", "email_address", true),
                spec("phone", "phone_number", false),
            ],
            &["email_address".to_string()],
        )
        .await?;

    let stored = service.stored_specs(object_type.id).await?;
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].destination_field, "phone_number");

    Ok(())
}

#[tokio::test]
async fn uncovered_required_field_leaves_prior_set_untouched() -> Result<()> {
    let (db, _temp) = setup_test_db().await?;
    let object_type = insert_object_type(&db).await?;
    let service = MappingService::new(db.clone());

    service
        .apply(
            object_type.id,
            vec![spec("email", "email_address", true)],
            &["email_address".to_string()],
        )
        .await?;

    // This set misses the required field; validation must reject it before
    // anything is written.
    let err = service
        .apply(
            object_type.id,
            vec![spec("phone", "phone_number", false)],
            &["email_address".to_string()],
        )
        .await
        .unwrap_err();
    match err {
        ApplyError::Uncovered(fields) => assert_eq!(fields, vec!["email_address".to_string()]),
        other => panic!("unexpected error: {other:?}"),
    }

    let stored = service.stored_specs(object_type.id).await?;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].destination_field, "email_address");

    Ok(())
}

#[tokio::test]
async fn failed_apply_flags_object_until_a_valid_set_arrives() -> Result<()> {
    let (db, _temp) = setup_test_db().await?;
    let object_type = insert_object_type(&db).await?;
    let service = MappingService::new(db.clone());

    let _ = service
        .apply(object_type.id, vec![], &["email_address".to_string()])
        .await
        .unwrap_err();

    let row = object_types::Entity::find_by_id(object_type.id)
        .one(&db)
        .await?
        .unwrap();
    assert_eq!(row.get_status(), ObjectStatus::NeedsMapping);

    service
        .apply(
            object_type.id,
            vec![spec("email", "email_address", true)],
            &["email_address".to_string()],
        )
        .await?;

    let row = object_types::Entity::find_by_id(object_type.id)
        .one(&db)
        .await?
        .unwrap();
    assert_eq!(row.get_status(), ObjectStatus::Pending);

    Ok(())
}

#[tokio::test]
async fn duplicate_required_destination_is_rejected() -> Result<()> {
    let (db, _temp) = setup_test_db().await?;
    let object_type = insert_object_type(&db).await?;
    let service = MappingService::new(db.clone());

    let err = service
        .apply(
            object_type.id,
            vec![
                spec("email", "email_address", true),
                spec("work_email", "email_address", true),
            ],
            &["email_address".to_string()],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApplyError::Uncovered(_)));

    Ok(())
}

#[tokio::test]
async fn suggestions_cover_common_crm_renames() -> Result<()> {
    let (db, _temp) = setup_test_db().await?;
    let service = MappingService::new(db.clone());

    let source = vec![
        "Email".to_string(),
        "FirstName".to_string(),
        "Company".to_string(),
        "custom_field_17".to_string(),
    ];
    let destination = vec![
        "email_address".to_string(),
        "first_name".to_string(),
        "account_name".to_string(),
        "fax".to_string(),
    ];

    let report = service.suggest(&source, &destination, None).await;

    let pair = |src: &str| {
        report
            .suggestions
            .iter()
            .find(|s| s.source_field == src)
            .map(|s| s.destination_field.clone())
    };
    assert_eq!(pair("Email").as_deref(), Some("email_address"));
    assert_eq!(pair("FirstName").as_deref(), Some("first_name"));
    assert_eq!(pair("Company").as_deref(), Some("account_name"));
    assert!(pair("custom_field_17").is_none());
    assert!(report
        .unmapped_destination_fields
        .contains(&"fax".to_string()));

    Ok(())
}
