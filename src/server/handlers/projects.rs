use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::config::EngineConfig;
use crate::connector::Connector;
use crate::database::entities::{migration_projects, object_types};
use crate::server::app::AppState;
use crate::services::CreateProjectRequest;

#[derive(Debug, Serialize, Deserialize)]
pub struct StartRunRequest {
    #[serde(default)]
    pub config: EngineConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UpdateProjectRequest {
    pub name: Option<String>,
    pub schedule: Option<crate::services::Schedule>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StartRunResponse {
    pub run_id: String,
    pub status: String,
    pub message: String,
}

pub async fn list_projects(
    State(state): State<AppState>,
) -> Result<Json<Vec<migration_projects::Model>>, StatusCode> {
    let projects = state.service.list_projects().await.map_err(|e| {
        error!("Failed to list projects: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(projects))
}

pub async fn create_project(
    State(state): State<AppState>,
    Json(payload): Json<CreateProjectRequest>,
) -> Result<Json<migration_projects::Model>, StatusCode> {
    if payload.object_types.is_empty() {
        return Err(StatusCode::UNPROCESSABLE_ENTITY);
    }

    let project = state.service.create_project(payload).await.map_err(|e| {
        error!("Failed to create project: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;
    Ok(Json(project))
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<migration_projects::Model>, StatusCode> {
    let project = state
        .service
        .get_project(id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok(Json(project))
}

pub async fn update_project(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<UpdateProjectRequest>,
) -> Result<Json<migration_projects::Model>, StatusCode> {
    match state
        .service
        .update_project(id, payload.name, payload.schedule)
        .await
    {
        Ok(Some(project)) => Ok(Json(project)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!(project_id = id, "Failed to update project: {}", e);
            Err(StatusCode::CONFLICT)
        }
    }
}

pub async fn list_object_types(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<object_types::Model>>, StatusCode> {
    let objects = state
        .service
        .list_object_types(id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(objects))
}

pub async fn start_project(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<StartRunRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let (source, destination) = resolve_connectors(&state, id).await?;

    match state
        .service
        .start(id, payload.config, source, destination)
        .await
    {
        Ok(run_id) => {
            info!(project_id = id, run_id, "migration started via API");
            Ok((
                StatusCode::ACCEPTED,
                Json(StartRunResponse {
                    run_id,
                    status: "accepted".to_string(),
                    message: "Migration run started".to_string(),
                }),
            ))
        }
        Err(e) => {
            error!(project_id = id, "Failed to start migration: {}", e);
            Err(StatusCode::CONFLICT)
        }
    }
}

pub async fn resume_project(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<StartRunRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let (source, destination) = resolve_connectors(&state, id).await?;

    match state
        .service
        .resume(id, payload.config, source, destination)
        .await
    {
        Ok(run_id) => Ok((
            StatusCode::ACCEPTED,
            Json(StartRunResponse {
                run_id,
                status: "accepted".to_string(),
                message: "Migration run resumed".to_string(),
            }),
        )),
        Err(e) => {
            error!(project_id = id, "Failed to resume migration: {}", e);
            Err(StatusCode::CONFLICT)
        }
    }
}

pub async fn pause_project(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, StatusCode> {
    match state.service.pause(id).await {
        Ok(true) => Ok(StatusCode::ACCEPTED),
        Ok(false) => Err(StatusCode::NOT_FOUND),
        Err(e) => {
            error!(project_id = id, "Failed to pause migration: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

pub async fn cancel_project(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<StatusCode, StatusCode> {
    match state.service.cancel(id).await {
        Ok(true) => Ok(StatusCode::ACCEPTED),
        Ok(false) => Err(StatusCode::CONFLICT),
        Err(e) => {
            error!(project_id = id, "Failed to cancel migration: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Looks up both connectors named by the project. Unknown connection ids are
/// a client problem, not a server one.
pub async fn resolve_connectors(
    state: &AppState,
    project_id: i32,
) -> Result<(Arc<dyn Connector>, Arc<dyn Connector>), StatusCode> {
    let project = state
        .service
        .get_project(project_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let source = state
        .registry
        .resolve(&project.source_connection_id)
        .ok_or(StatusCode::UNPROCESSABLE_ENTITY)?;
    let destination = state
        .registry
        .resolve(&project.destination_connection_id)
        .ok_or(StatusCode::UNPROCESSABLE_ENTITY)?;
    Ok((source, destination))
}
