use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing::Level;
use tracing_subscriber::EnvFilter;

use quillswitch::connector::InMemoryConnector;
use quillswitch::database::connection::{establish_connection, get_database_url};
use quillswitch::database::migrations::Migrator;
use quillswitch::mapping::{self, FieldMappingSpec};
use quillswitch::plan::MigrationPlan;
use quillswitch::server;
use quillswitch::services::{CreateProjectRequest, MappingService, MigrationService, Schedule};
use sea_orm_migration::MigratorTrait;

#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    #[clap(short, long, global = true)]
    log_level: Option<String>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a migration plan against in-memory connectors
    Run {
        #[clap(short, long)]
        plan: String,
    },
    /// Start the API server
    Serve {
        #[clap(short, long, default_value = "3000")]
        port: u16,
        #[clap(short, long, default_value = "quillswitch.db")]
        database: String,
        #[clap(long)]
        cors_origin: Option<String>,
    },
    Db {
        #[clap(subcommand)]
        command: DbCommands,
    },
}

#[derive(Subcommand, Debug)]
enum DbCommands {
    Init {
        #[clap(short, long, default_value = "quillswitch.db")]
        database: String,
    },
    Migrate {
        #[clap(subcommand)]
        direction: server::MigrateDirection,
        #[clap(short, long, default_value = "quillswitch.db")]
        database: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();
    setup_logging(&args.log_level);

    match args.command {
        Commands::Run { plan } => {
            info!("Running migration plan: {}", plan);
            run_plan(&plan).await?;
        }
        Commands::Serve {
            port,
            database,
            cors_origin,
        } => {
            info!("Starting server on port {}", port);
            server::start_server(port, &database, cors_origin.as_deref()).await?;
        }
        Commands::Db { command } => match command {
            DbCommands::Init { database } => {
                info!("Initializing database: {}", database);
                server::migrate_database(&database, server::MigrateDirection::Up).await?;
            }
            DbCommands::Migrate {
                direction,
                database,
            } => {
                info!("Running database migration: {:?}", direction);
                server::migrate_database(&database, direction).await?;
            }
        },
    }

    Ok(())
}

/// Drives a whole migration from a YAML plan: seeds in-memory connectors,
/// applies (or suggests) field mappings, runs to completion, and prints a
/// summary.
async fn run_plan(plan_path: &str) -> Result<()> {
    let plan = MigrationPlan::from_file(Path::new(plan_path))?;

    // Scratch database per run; plan runs are ephemeral by design.
    let db_path = std::env::temp_dir().join(format!("quillswitch-run-{}.db", uuid::Uuid::new_v4()));
    let db_path = db_path.to_string_lossy().to_string();
    let db = establish_connection(&get_database_url(Some(&db_path))).await?;
    Migrator::up(&db, None).await?;

    let source = Arc::new(InMemoryConnector::new());
    let destination = Arc::new(InMemoryConnector::new());
    for object in &plan.objects {
        source.set_schema(&object.name, object.source_fields());
        source.seed(
            &object.name,
            object.records.iter().cloned().map(Into::into).collect(),
        );
        let destination_fields = if object.destination_fields.is_empty() {
            object.source_fields()
        } else {
            object.destination_fields.clone()
        };
        destination.set_schema(&object.name, destination_fields);
    }

    let service = MigrationService::new(db.clone());
    let project = service
        .create_project(CreateProjectRequest {
            name: plan.name.clone(),
            source_connection_id: "memory:source".to_string(),
            destination_connection_id: "memory:destination".to_string(),
            strategy: plan.strategy,
            schedule: Schedule::Immediate,
            object_types: plan.objects.iter().map(|o| o.name.clone()).collect(),
        })
        .await?;

    let mapping_service = MappingService::new(db.clone());
    let object_rows = service.list_object_types(project.id).await?;
    for object in &plan.objects {
        let row = object_rows
            .iter()
            .find(|r| r.name == object.name)
            .context("object type row missing")?;

        let specs = if object.mappings.is_empty() {
            let source_fields = object.source_fields();
            let destination_fields = if object.destination_fields.is_empty() {
                source_fields.clone()
            } else {
                object.destination_fields.clone()
            };
            let report = mapping::suggest_mappings(&source_fields, &destination_fields);
            info!(
                object_type = object.name,
                suggested = report.suggestions.len(),
                unmapped = report.unmapped_destination_fields.len(),
                "no explicit mappings in plan, using suggestions"
            );
            report
                .suggestions
                .into_iter()
                .map(|s| FieldMappingSpec {
                    required: object.required_fields.contains(&s.destination_field),
                    source_field: s.source_field,
                    destination_field: s.destination_field,
                    transform: None,
                    confidence: Some(s.confidence),
                })
                .collect()
        } else {
            object.mappings.clone()
        };

        mapping_service
            .apply(row.id, specs, &object.required_fields)
            .await
            .with_context(|| format!("cannot apply mappings for '{}'", object.name))?;
    }

    let run_id = service
        .start(project.id, plan.engine.clone(), source, destination.clone())
        .await?;
    info!(project_id = project.id, run_id, "migration running");

    let status = service.wait_until_idle(project.id).await?;
    let snapshot = service.snapshot(project.id).await?;
    info!(
        ?status,
        migrated = snapshot.processed_records,
        failed = snapshot.failed_records,
        total = snapshot.total_records,
        "migration finished"
    );
    if snapshot.error_count > 0 {
        warn!(
            open_errors = snapshot.error_count,
            "some records need attention, inspect the error monitor"
        );
    }

    Ok(())
}

fn setup_logging(log_level: &Option<String>) {
    let log_level = match log_level
        .as_ref()
        .unwrap_or(&"info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(format!("sqlx=warn,{}", log_level)))
        .without_time()
        .init();
}
