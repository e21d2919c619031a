use std::collections::BTreeMap;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::database::entities::migration_errors;
use crate::server::app::AppState;
use crate::services::{ErrorService, RetryOutcome};

use super::projects::resolve_connectors;

#[derive(Debug, Deserialize)]
pub struct ErrorListQuery {
    /// Include rows that already recovered or were retried successfully.
    #[serde(default)]
    pub include_resolved: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub id: i32,
    pub object_type_id: Option<i32>,
    pub kind: String,
    pub severity: String,
    pub message: String,
    pub record_id: Option<String>,
    pub batch_cursor: Option<String>,
    pub retryable: bool,
    pub attempts: i32,
    pub max_attempts: i32,
    pub remediation: Option<String>,
    pub resolved: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorListResponse {
    pub errors: Vec<ErrorResponse>,
    /// Open error counts keyed by kind, for the monitor's summary strip.
    pub counts_by_kind: BTreeMap<String, u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RetryResponse {
    pub outcome: RetryOutcome,
}

pub async fn list_errors(
    State(state): State<AppState>,
    Path(id): Path<i32>,
    Query(query): Query<ErrorListQuery>,
) -> Result<Json<ErrorListResponse>, StatusCode> {
    let service = ErrorService::new(state.db.clone());
    let rows = if query.include_resolved {
        service.list_all(id).await
    } else {
        service.list_open(id).await
    }
    .map_err(|e| {
        error!(project_id = id, "Failed to list errors: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    let mut counts_by_kind: BTreeMap<String, u64> = BTreeMap::new();
    for row in rows.iter().filter(|r| !r.resolved) {
        *counts_by_kind.entry(row.kind.clone()).or_insert(0) += 1;
    }

    let errors = rows.into_iter().map(to_response).collect();
    Ok(Json(ErrorListResponse {
        errors,
        counts_by_kind,
    }))
}

/// Operator-initiated retry of a single failed record against the
/// destination connector.
pub async fn retry_error(
    State(state): State<AppState>,
    Path((project_id, error_id)): Path<(i32, i32)>,
) -> Result<Json<RetryResponse>, StatusCode> {
    let (_, destination) = resolve_connectors(&state, project_id).await?;

    let service = ErrorService::new(state.db.clone());
    match service.retry(error_id, destination.as_ref()).await {
        Ok(outcome) => Ok(Json(RetryResponse { outcome })),
        Err(e) => {
            error!(project_id, error_id, "Failed to retry error: {}", e);
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

fn to_response(row: migration_errors::Model) -> ErrorResponse {
    ErrorResponse {
        id: row.id,
        object_type_id: row.object_type_id,
        kind: row.kind,
        severity: row.severity,
        message: row.message,
        record_id: row.record_id,
        batch_cursor: row.batch_cursor,
        retryable: row.retryable,
        attempts: row.attempts,
        max_attempts: row.max_attempts,
        remediation: row.remediation,
        resolved: row.resolved,
        created_at: row.created_at.to_rfc3339(),
        updated_at: row.updated_at.to_rfc3339(),
    }
}
