use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::NaiveDate;
use platto_core::projection::nearby;
use platto_core::types::jst_today;
use platto_core::{NewProgram, Program, ProgramId, ProgramPatch};
use serde::Deserialize;

use super::{api_error, remote_error, require_controller, ApiError};
use crate::state::AppState;

const DEFAULT_NEARBY_LIMIT: usize = 10;

#[derive(Deserialize)]
pub struct NearbyQuery {
    /// YYYY-MM-DD; defaults to today in JST.
    date: Option<String>,
    limit: Option<usize>,
}

/// Programs as the board currently shows them (pending move applied).
pub async fn list_programs(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let controller = require_controller(&state, "platto.api.programs")?;
    let snapshot = controller.snapshot();
    Ok(Json(serde_json::json!({
        "programs": snapshot.programs,
        "loaded": snapshot.loaded,
    })))
}

pub async fn create_program(
    State(state): State<AppState>,
    Json(body): Json<NewProgram>,
) -> Result<(StatusCode, Json<Program>), ApiError> {
    const TARGET: &str = "platto.api.create_program";
    let controller = require_controller(&state, TARGET)?;
    if body.title.trim().is_empty() || body.program_id.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            TARGET,
            "program_id and title are required",
        ));
    }
    let created = controller
        .create(&body)
        .await
        .map_err(|e| remote_error(TARGET, e))?;
    log::info!(target: TARGET, "Created program {} ({})", created.id, created.program_id);
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_program(
    State(state): State<AppState>,
    Path(id): Path<ProgramId>,
    Json(patch): Json<ProgramPatch>,
) -> Result<Json<Program>, ApiError> {
    const TARGET: &str = "platto.api.update_program";
    let controller = require_controller(&state, TARGET)?;
    if patch.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, TARGET, "Empty update"));
    }
    let updated = controller
        .update(id, &patch)
        .await
        .map_err(|e| remote_error(TARGET, e))?;
    Ok(Json(updated))
}

pub async fn delete_program(
    State(state): State<AppState>,
    Path(id): Path<ProgramId>,
) -> Result<StatusCode, ApiError> {
    const TARGET: &str = "platto.api.delete_program";
    let controller = require_controller(&state, TARGET)?;
    controller
        .delete(id)
        .await
        .map_err(|e| remote_error(TARGET, e))?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn nearby_programs(
    State(state): State<AppState>,
    Query(query): Query<NearbyQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    const TARGET: &str = "platto.api.nearby";
    let controller = require_controller(&state, TARGET)?;
    let date = match query.date.as_deref() {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|e| api_error(StatusCode::BAD_REQUEST, TARGET, format!("Invalid date {:?}: {}", raw, e)))?,
        None => jst_today(),
    };
    let limit = query.limit.unwrap_or(DEFAULT_NEARBY_LIMIT);

    let snapshot = controller.snapshot();
    let programs: Vec<_> = nearby(&snapshot.programs, date)
        .into_iter()
        .take(limit)
        .collect();
    Ok(Json(serde_json::json!({
        "date": date,
        "programs": programs,
    })))
}
