use std::sync::Arc;

use anyhow::Result;
use axum::{
    routing::{get, post, put},
    Router,
};
use sea_orm::DatabaseConnection;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

use super::handlers::{errors, health, mappings, progress, projects};
use crate::connector::ConnectorRegistry;
use crate::services::MigrationService;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub service: MigrationService,
    pub registry: Arc<ConnectorRegistry>,
}

pub async fn create_app(
    db: DatabaseConnection,
    registry: Arc<ConnectorRegistry>,
    cors_origin: Option<&str>,
) -> Result<Router> {
    let service = MigrationService::new(db.clone());
    let state = AppState {
        db,
        service,
        registry,
    };

    let cors = match cors_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(origin.parse::<axum::http::HeaderValue>()?)
            .allow_methods(Any)
            .allow_headers(Any),
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    let app = Router::new()
        .route("/health", get(health::health_check))
        .nest("/api/v1", api_v1_routes())
        .layer(ServiceBuilder::new().layer(cors))
        .with_state(state);

    Ok(app)
}

fn api_v1_routes() -> Router<AppState> {
    Router::new()
        // Project lifecycle
        .route("/projects", get(projects::list_projects))
        .route("/projects", post(projects::create_project))
        .route("/projects/:id", get(projects::get_project))
        .route("/projects/:id", put(projects::update_project))
        .route("/projects/:id/object-types", get(projects::list_object_types))
        .route("/projects/:id/start", post(projects::start_project))
        .route("/projects/:id/pause", post(projects::pause_project))
        .route("/projects/:id/resume", post(projects::resume_project))
        .route("/projects/:id/cancel", post(projects::cancel_project))
        // Progress
        .route("/projects/:id/progress", get(progress::get_progress))
        .route(
            "/projects/:id/progress/stream",
            get(progress::stream_progress),
        )
        // Error monitor
        .route("/projects/:id/errors", get(errors::list_errors))
        .route(
            "/projects/:id/errors/:error_id/retry",
            post(errors::retry_error),
        )
        // Schema and mappings
        .route("/object-types/:id/schema", get(mappings::get_schema))
        .route("/object-types/:id/mappings", get(mappings::get_mappings))
        .route("/object-types/:id/mappings", put(mappings::apply_mappings))
        .route(
            "/object-types/:id/mappings/suggest",
            post(mappings::suggest_mappings),
        )
}
