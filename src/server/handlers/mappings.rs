use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use sea_orm::EntityTrait;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::database::entities::object_types;
use crate::mapping::{FieldMappingSpec, MappingReport};
use crate::schema::{ResolvedSchema, SchemaResolver};
use crate::server::app::AppState;
use crate::services::{ApplyError, MappingService};

#[derive(Debug, Deserialize)]
pub struct SchemaQuery {
    /// Which side of the migration to describe: `source` or `destination`.
    #[serde(default = "default_role")]
    pub role: String,
}

fn default_role() -> String {
    "source".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApplyMappingsRequest {
    pub mappings: Vec<FieldMappingSpec>,
    #[serde(default)]
    pub required_destination_fields: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApplyMappingsResponse {
    pub applied: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UncoveredResponse {
    pub error: String,
    pub uncovered_fields: Vec<String>,
}

pub async fn get_schema(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Query(query): Query<SchemaQuery>,
) -> Result<Json<ResolvedSchema>, StatusCode> {
    let (object_type, project) = load_object_with_project(&state, id).await?;

    let connection_id = match query.role.as_str() {
        "destination" => &project.destination_connection_id,
        _ => &project.source_connection_id,
    };
    let connector = state
        .registry
        .resolve(connection_id)
        .ok_or(StatusCode::UNPROCESSABLE_ENTITY)?;

    match SchemaResolver::resolve(connector.as_ref(), &object_type.name).await {
        Ok(schema) => Ok(Json(schema)),
        Err(e) => {
            error!(object_type_id = id, "Failed to resolve schema: {}", e);
            Err(StatusCode::BAD_GATEWAY)
        }
    }
}

/// Suggests mappings from the live source and destination schemas.
pub async fn suggest_mappings(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<MappingReport>, StatusCode> {
    let (object_type, project) = load_object_with_project(&state, id).await?;

    let source = state
        .registry
        .resolve(&project.source_connection_id)
        .ok_or(StatusCode::UNPROCESSABLE_ENTITY)?;
    let destination = state
        .registry
        .resolve(&project.destination_connection_id)
        .ok_or(StatusCode::UNPROCESSABLE_ENTITY)?;

    let source_schema = SchemaResolver::resolve(source.as_ref(), &object_type.name)
        .await
        .map_err(|e| {
            error!(object_type_id = id, "Failed to resolve source schema: {}", e);
            StatusCode::BAD_GATEWAY
        })?;
    let destination_schema = SchemaResolver::resolve(destination.as_ref(), &object_type.name)
        .await
        .map_err(|e| {
            error!(
                object_type_id = id,
                "Failed to resolve destination schema: {}", e
            );
            StatusCode::BAD_GATEWAY
        })?;

    let service = MappingService::new(state.db.clone());
    let report = service
        .suggest(&source_schema.fields, &destination_schema.fields, None)
        .await;
    Ok(Json(report))
}

pub async fn get_mappings(
    State(state): State<AppState>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<FieldMappingSpec>>, StatusCode> {
    let service = MappingService::new(state.db.clone());
    let specs = service
        .stored_specs(id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(specs))
}

pub async fn apply_mappings(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Json(payload): Json<ApplyMappingsRequest>,
) -> Result<Json<ApplyMappingsResponse>, (StatusCode, Json<UncoveredResponse>)> {
    let service = MappingService::new(state.db.clone());
    match service
        .apply(id, payload.mappings, &payload.required_destination_fields)
        .await
    {
        Ok(applied) => Ok(Json(ApplyMappingsResponse { applied })),
        Err(ApplyError::Uncovered(fields)) => Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(UncoveredResponse {
                error: "required destination fields not covered".to_string(),
                uncovered_fields: fields,
            }),
        )),
        Err(ApplyError::ObjectTypeNotFound(_)) => Err((
            StatusCode::NOT_FOUND,
            Json(UncoveredResponse {
                error: "object type not found".to_string(),
                uncovered_fields: Vec::new(),
            }),
        )),
        Err(ApplyError::Db(e)) => {
            error!(object_type_id = id, "Failed to apply mappings: {}", e);
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(UncoveredResponse {
                    error: "database error".to_string(),
                    uncovered_fields: Vec::new(),
                }),
            ))
        }
    }
}

async fn load_object_with_project(
    state: &AppState,
    object_type_id: i32,
) -> Result<
    (
        object_types::Model,
        crate::database::entities::migration_projects::Model,
    ),
    StatusCode,
> {
    let object_type = object_types::Entity::find_by_id(object_type_id)
        .one(&state.db)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    let project = state
        .service
        .get_project(object_type.project_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;
    Ok((object_type, project))
}
