use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use platto_core::overlay::MoveOutcome;
use platto_core::types::jst_today;
use platto_core::{BoardFilter, ProgramId, Stage};
use serde::Deserialize;

use super::{api_error, board_error, insert_header_safe, require_controller, ApiError};
use crate::state::AppState;

#[derive(Deserialize)]
pub struct BoardQuery {
    #[serde(default)]
    q: String,
    /// Include programs whose first air date is past.
    #[serde(default)]
    aired: bool,
}

#[derive(Deserialize)]
pub struct MoveBody {
    stage: String,
}

pub async fn get_board(
    State(state): State<AppState>,
    Query(query): Query<BoardQuery>,
    headers: HeaderMap,
) -> Result<(StatusCode, HeaderMap, Json<serde_json::Value>), ApiError> {
    const TARGET: &str = "platto.api.board";
    let controller = require_controller(&state, TARGET)?;
    let snapshot = controller.snapshot();

    if let Some(error) = &snapshot.load_error {
        return Err(api_error(StatusCode::BAD_GATEWAY, TARGET, error.clone()));
    }
    if !snapshot.loaded {
        return Err(api_error(StatusCode::SERVICE_UNAVAILABLE, TARGET, "Board is loading"));
    }

    // The projection depends on "today" as well as on the snapshot.
    let today = jst_today();
    let etag = format!("\"{}-{}\"", snapshot.revision, today);

    if let Some(if_none_match) = headers.get("if-none-match") {
        if let Ok(value) = if_none_match.to_str() {
            if value == etag {
                let mut resp_headers = HeaderMap::new();
                insert_header_safe(&mut resp_headers, "etag", &etag);
                return Ok((
                    StatusCode::NOT_MODIFIED,
                    resp_headers,
                    Json(serde_json::json!({})),
                ));
            }
        }
    }

    let filter = BoardFilter {
        search: query.q,
        show_aired: query.aired,
    };
    let view = snapshot.project(&filter, today);

    let mut resp_headers = HeaderMap::new();
    insert_header_safe(&mut resp_headers, "etag", &etag);

    Ok((
        StatusCode::OK,
        resp_headers,
        Json(serde_json::json!({
            "board": view,
            "revision": snapshot.revision,
            "lastError": snapshot.last_error,
            "feedConnected": snapshot.feed_connected,
        })),
    ))
}

pub async fn move_program(
    State(state): State<AppState>,
    Path(id): Path<ProgramId>,
    Json(body): Json<MoveBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    const TARGET: &str = "platto.api.move";
    let controller = require_controller(&state, TARGET)?;
    let stage: Stage = body
        .stage
        .parse()
        .map_err(|e: String| api_error(StatusCode::BAD_REQUEST, TARGET, e))?;

    match controller.move_program(id, stage).await {
        Ok(MoveOutcome::Started(pending)) => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({ "pending": pending })),
        )),
        Ok(MoveOutcome::Unchanged) => Ok((
            StatusCode::OK,
            Json(serde_json::json!({ "unchanged": true })),
        )),
        Err(e) => Err(board_error(TARGET, e)),
    }
}

pub async fn refresh(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    const TARGET: &str = "platto.api.refresh";
    let controller = require_controller(&state, TARGET)?;
    let count = controller
        .refresh()
        .await
        .map_err(|e| board_error(TARGET, e))?;
    Ok(Json(serde_json::json!({ "count": count })))
}
