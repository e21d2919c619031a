pub mod app;
pub mod handlers;

use std::sync::Arc;

use anyhow::Result;
use clap::Subcommand;
use tracing::info;

use crate::connector::ConnectorRegistry;
use crate::database::{connection::*, migrations::Migrator};
use sea_orm_migration::prelude::*;

#[derive(Subcommand, Debug)]
pub enum MigrateDirection {
    Up,
    Down,
    Fresh,
}

pub async fn start_server(port: u16, database_path: &str, cors_origin: Option<&str>) -> Result<()> {
    let database_url = get_database_url(Some(database_path));
    let db = establish_connection(&database_url).await?;

    Migrator::up(&db, None).await?;
    info!("Database migrations completed");

    let registry = Arc::new(ConnectorRegistry::new());
    let app = app::create_app(db, registry, cors_origin).await?;

    log_routes();

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("Server running on http://0.0.0.0:{}", port);

    axum::serve(listener, app).await?;

    Ok(())
}

fn log_routes() {
    info!("API Endpoints:");
    info!("  /health                     - Health check");
    info!("  /api/v1/projects            - Migration projects (CRUD + start/pause/resume/cancel)");
    info!("  /api/v1/projects/:id/progress        - Progress snapshot");
    info!("  /api/v1/projects/:id/progress/stream - Progress via Server-Sent Events");
    info!("  /api/v1/projects/:id/errors          - Error monitor + per-record retry");
    info!("  /api/v1/object-types/:id/mappings    - Field mapping suggest/apply");
}

pub async fn migrate_database(database_path: &str, direction: MigrateDirection) -> Result<()> {
    let database_url = get_database_url(Some(database_path));
    let db = establish_connection(&database_url).await?;

    match direction {
        MigrateDirection::Up => {
            info!("Running migrations up");
            Migrator::up(&db, None).await?;
        }
        MigrateDirection::Down => {
            info!("Running migrations down");
            Migrator::down(&db, None).await?;
        }
        MigrateDirection::Fresh => {
            info!("Running fresh migrations (down then up)");
            Migrator::down(&db, None).await?;
            Migrator::up(&db, None).await?;
        }
    }

    info!("Database migration completed");
    Ok(())
}
