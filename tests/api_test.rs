//! API integration tests
//!
//! Tests for the REST endpoints: project lifecycle, mapping workflow, and
//! the error monitor, against in-memory connectors.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::http::StatusCode;
use axum_test::TestServer;
use quillswitch::connector::{ConnectorRegistry, InMemoryConnector, SourceRecord};
use quillswitch::database::connection::setup_database;
use quillswitch::server::app::create_app;
use sea_orm::Database;
use serde_json::{json, Value};
use tempfile::NamedTempFile;

struct TestContext {
    server: TestServer,
    source: Arc<InMemoryConnector>,
    destination: Arc<InMemoryConnector>,
    _temp_file: NamedTempFile,
}

/// Create a test server backed by a scratch database and two registered
/// in-memory connectors.
async fn setup_test_server() -> Result<TestContext> {
    let temp_file = NamedTempFile::new()?;
    let db_url = format!("sqlite://{}?mode=rwc", temp_file.path().display());

    let db = Database::connect(&db_url).await?;
    setup_database(&db).await?;

    let registry = Arc::new(ConnectorRegistry::new());
    let source = registry.register_memory("memory:source");
    let destination = registry.register_memory("memory:destination");

    let app = create_app(db, registry, Some("*")).await?;
    let server = TestServer::new(app)?;

    Ok(TestContext {
        server,
        source,
        destination,
        _temp_file: temp_file,
    })
}

fn seed_contacts(ctx: &TestContext, count: usize) {
    ctx.source.set_schema(
        "contact",
        vec!["email".to_string(), "first_name".to_string()],
    );
    ctx.destination.set_schema(
        "contact",
        vec!["email_address".to_string(), "first_name".to_string()],
    );
    let records = (0..count)
        .map(|i| {
            SourceRecord::new(format!("rec-{i}"))
                .with_field("email", json!(format!("user{i}@example.com")))
                .with_field("first_name", json!(format!("User{i}")))
        })
        .collect();
    ctx.source.seed("contact", records);
}

async fn create_contact_project(ctx: &TestContext) -> Value {
    let response = ctx
        .server
        .post("/api/v1/projects")
        .json(&json!({
            "name": "Acme CRM switch",
            "source_connection_id": "memory:source",
            "destination_connection_id": "memory:destination",
            "strategy": "full",
            "object_types": ["contact"],
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    response.json()
}

async fn apply_contact_mappings(ctx: &TestContext, object_type_id: i64) {
    let response = ctx
        .server
        .put(&format!("/api/v1/object-types/{object_type_id}/mappings"))
        .json(&json!({
            "mappings": [
                {"source_field": "email", "destination_field": "email_address", "required": true},
                {"source_field": "first_name", "destination_field": "first_name"},
            ],
            "required_destination_fields": ["email_address"],
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
}

async fn wait_for_terminal_status(ctx: &TestContext, project_id: i64) -> String {
    for _ in 0..200 {
        let project: Value = ctx
            .server
            .get(&format!("/api/v1/projects/{project_id}"))
            .await
            .json();
        let status = project["status"].as_str().unwrap().to_string();
        if status != "scheduled" && status != "in_progress" {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("project {project_id} never reached a terminal status");
}

#[tokio::test]
async fn test_health_endpoint() -> Result<()> {
    let ctx = setup_test_server().await?;

    let response = ctx.server.get("/health").await;

    assert_eq!(response.status_code(), StatusCode::OK);

    let body: Value = response.json();
    assert_eq!(body["service"], "quillswitch-server");
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());

    Ok(())
}

#[tokio::test]
async fn test_project_crud_api() -> Result<()> {
    let ctx = setup_test_server().await?;

    let project = create_contact_project(&ctx).await;
    let project_id = project["id"].as_i64().unwrap();
    assert_eq!(project["name"], "Acme CRM switch");
    assert_eq!(project["status"], "scheduled");

    let response = ctx.server.get("/api/v1/projects").await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let projects: Vec<Value> = response.json();
    assert_eq!(projects.len(), 1);
    assert_eq!(projects[0]["id"], project_id);

    let response = ctx
        .server
        .get(&format!("/api/v1/projects/{project_id}"))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);

    let response = ctx
        .server
        .put(&format!("/api/v1/projects/{project_id}"))
        .json(&json!({"name": "Acme CRM switch (Q3)"}))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let updated: Value = response.json();
    assert_eq!(updated["name"], "Acme CRM switch (Q3)");

    let response = ctx.server.get("/api/v1/projects/9999").await;
    assert_eq!(response.status_code(), StatusCode::NOT_FOUND);

    // A project with no object types is useless; reject it up front.
    let response = ctx
        .server
        .post("/api/v1/projects")
        .json(&json!({
            "name": "empty",
            "source_connection_id": "memory:source",
            "destination_connection_id": "memory:destination",
            "strategy": "full",
            "object_types": [],
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);

    Ok(())
}

#[tokio::test]
async fn test_mapping_workflow_api() -> Result<()> {
    let ctx = setup_test_server().await?;
    seed_contacts(&ctx, 5);

    let project = create_contact_project(&ctx).await;
    let project_id = project["id"].as_i64().unwrap();

    let objects: Vec<Value> = ctx
        .server
        .get(&format!("/api/v1/projects/{project_id}/object-types"))
        .await
        .json();
    assert_eq!(objects.len(), 1);
    let object_type_id = objects[0]["id"].as_i64().unwrap();

    let response = ctx
        .server
        .get(&format!("/api/v1/object-types/{object_type_id}/schema"))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let schema: Value = response.json();
    assert_eq!(schema["source"], "api");
    assert!(schema["fields"]
        .as_array()
        .unwrap()
        .contains(&json!("email")));

    let response = ctx
        .server
        .post(&format!(
            "/api/v1/object-types/{object_type_id}/mappings/suggest"
        ))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let report: Value = response.json();
    let suggested: Vec<&str> = report["suggestions"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["destination_field"].as_str().unwrap())
        .collect();
    assert!(suggested.contains(&"email_address"));

    // Missing required coverage is a client error and must not store anything.
    let response = ctx
        .server
        .put(&format!("/api/v1/object-types/{object_type_id}/mappings"))
        .json(&json!({
            "mappings": [
                {"source_field": "first_name", "destination_field": "first_name"},
            ],
            "required_destination_fields": ["email_address"],
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    let body: Value = response.json();
    assert_eq!(body["uncovered_fields"], json!(["email_address"]));

    apply_contact_mappings(&ctx, object_type_id).await;

    let stored: Vec<Value> = ctx
        .server
        .get(&format!("/api/v1/object-types/{object_type_id}/mappings"))
        .await
        .json();
    assert_eq!(stored.len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_full_run_via_api() -> Result<()> {
    let ctx = setup_test_server().await?;
    seed_contacts(&ctx, 30);

    let project = create_contact_project(&ctx).await;
    let project_id = project["id"].as_i64().unwrap();

    let objects: Vec<Value> = ctx
        .server
        .get(&format!("/api/v1/projects/{project_id}/object-types"))
        .await
        .json();
    apply_contact_mappings(&ctx, objects[0]["id"].as_i64().unwrap()).await;

    let response = ctx
        .server
        .post(&format!("/api/v1/projects/{project_id}/start"))
        .json(&json!({
            "config": {
                "batch": {
                    "batch_size": 10,
                    "concurrent_batches": 2,
                    "streaming": false,
                    "advanced_concurrency": false,
                },
            },
        }))
        .await;
    assert_eq!(response.status_code(), StatusCode::ACCEPTED);
    let body: Value = response.json();
    assert!(body["run_id"].is_string());

    let status = wait_for_terminal_status(&ctx, project_id).await;
    assert_eq!(status, "completed");

    assert_eq!(ctx.destination.loaded_records("contact").len(), 30);

    let response = ctx
        .server
        .get(&format!("/api/v1/projects/{project_id}/progress"))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let snapshot: Value = response.json();
    assert_eq!(snapshot["processed_records"], 30);
    assert_eq!(snapshot["failed_records"], 0);
    assert_eq!(snapshot["percentage"], 100.0);

    let errors: Value = ctx
        .server
        .get(&format!("/api/v1/projects/{project_id}/errors"))
        .await
        .json();
    assert_eq!(errors["errors"].as_array().unwrap().len(), 0);

    // Starting a completed project again is a conflict.
    let response = ctx
        .server
        .post(&format!("/api/v1/projects/{project_id}/start"))
        .json(&json!({}))
        .await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);

    Ok(())
}

#[tokio::test]
async fn test_error_monitor_and_retry_api() -> Result<()> {
    let ctx = setup_test_server().await?;
    seed_contacts(&ctx, 10);
    ctx.destination
        .reject_record("contact", "rec-3", "email_address domain is blocked");

    let project = create_contact_project(&ctx).await;
    let project_id = project["id"].as_i64().unwrap();

    let objects: Vec<Value> = ctx
        .server
        .get(&format!("/api/v1/projects/{project_id}/object-types"))
        .await
        .json();
    apply_contact_mappings(&ctx, objects[0]["id"].as_i64().unwrap()).await;

    let response = ctx
        .server
        .post(&format!("/api/v1/projects/{project_id}/start"))
        .json(&json!({}))
        .await;
    assert_eq!(response.status_code(), StatusCode::ACCEPTED);

    let status = wait_for_terminal_status(&ctx, project_id).await;
    assert_eq!(status, "completed_with_errors");

    let errors: Value = ctx
        .server
        .get(&format!("/api/v1/projects/{project_id}/errors"))
        .await
        .json();
    let open = errors["errors"].as_array().unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0]["kind"], "validation_error");
    assert_eq!(open[0]["record_id"], "rec-3");
    assert_eq!(errors["counts_by_kind"]["validation_error"], 1);
    let error_id = open[0]["id"].as_i64().unwrap();

    // The destination still rejects the record; the retry fails and reports it.
    let response = ctx
        .server
        .post(&format!(
            "/api/v1/projects/{project_id}/errors/{error_id}/retry"
        ))
        .await;
    assert_eq!(response.status_code(), StatusCode::OK);
    let body: Value = response.json();
    assert!(body["outcome"]["retry_failed"]["message"]
        .as_str()
        .unwrap()
        .contains("blocked"));

    Ok(())
}

#[tokio::test]
async fn test_cancel_scheduled_project_api() -> Result<()> {
    let ctx = setup_test_server().await?;
    seed_contacts(&ctx, 5);

    let project = create_contact_project(&ctx).await;
    let project_id = project["id"].as_i64().unwrap();

    let response = ctx
        .server
        .post(&format!("/api/v1/projects/{project_id}/cancel"))
        .await;
    assert_eq!(response.status_code(), StatusCode::ACCEPTED);

    let project: Value = ctx
        .server
        .get(&format!("/api/v1/projects/{project_id}"))
        .await
        .json();
    assert_eq!(project["status"], "cancelled");

    // Cancelled is terminal; a second cancel has nothing to do.
    let response = ctx
        .server
        .post(&format!("/api/v1/projects/{project_id}/cancel"))
        .await;
    assert_eq!(response.status_code(), StatusCode::CONFLICT);

    Ok(())
}
