use axum::{
    http::{HeaderMap, StatusCode},
    response::Json,
    routing::{get, post},
    Router,
};
use platto_core::{BoardError, ControllerHandle, RemoteError};
use serde::Serialize;

mod board;
mod events;
mod programs;
mod session;

use crate::state::AppState;

/// Axum REST API routes.
///
///   GET    /board?q=&aired=            -> projected board (+ ETag)
///   POST   /programs/:id/move          -> optimistic stage move
///   POST   /refresh                    -> refetch the whole table
///   GET    /programs                   -> programs as the board sees them
///   POST   /programs                   -> create
///   PATCH  /programs/:id               -> update fields
///   DELETE /programs/:id               -> delete
///   GET    /programs/nearby?date=      -> ordered by distance to first air date
///   GET    /session                    -> current session
///   POST   /session                    -> sign in (token from the external auth flow)
///   DELETE /session                    -> sign out
///   GET    /events                     -> SSE stream of board notices
///   GET    /status                     -> health check
///   GET    /logs, /logs/stream         -> backend log ring and live tail
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/board", get(board::get_board))
        .route("/refresh", post(board::refresh))
        .route("/programs", get(programs::list_programs).post(programs::create_program))
        .route("/programs/nearby", get(programs::nearby_programs))
        .route(
            "/programs/{id}",
            axum::routing::patch(programs::update_program).delete(programs::delete_program),
        )
        .route("/programs/{id}/move", post(board::move_program))
        .route(
            "/session",
            get(session::get_session)
                .post(session::sign_in)
                .delete(session::sign_out),
        )
        .route("/events", get(events::sse_events))
        .route("/status", get(events::status))
        .route("/logs", get(events::list_logs))
        .route("/logs/stream", get(events::stream_logs))
}

// ── Shared types and helpers used across sub-modules ────────────────────

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, target: &'static str, error: impl Into<String>) -> ApiError {
    let error = error.into();
    log_api_issue(status, target, &error);
    (status, Json(ErrorResponse { error }))
}

fn board_error(target: &'static str, err: BoardError) -> ApiError {
    let status = match &err {
        BoardError::ProgramNotFound(_) => StatusCode::NOT_FOUND,
        BoardError::MoveInFlight(_) => StatusCode::CONFLICT,
        BoardError::Fetch(_) | BoardError::StageUpdateFailed { .. } => StatusCode::BAD_GATEWAY,
        BoardError::ControllerClosed => StatusCode::SERVICE_UNAVAILABLE,
    };
    api_error(status, target, err.to_string())
}

fn remote_error(target: &'static str, err: RemoteError) -> ApiError {
    let status = if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::BAD_GATEWAY
    };
    api_error(status, target, err.to_string())
}

/// The running board, or 401 when nobody is signed in.
fn require_controller(state: &AppState, target: &'static str) -> Result<ControllerHandle, ApiError> {
    state
        .sessions
        .controller()
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, target, "Not signed in"))
}

fn insert_header_safe(headers: &mut HeaderMap, name: &'static str, value: &str) {
    match value.parse() {
        Ok(parsed) => {
            headers.insert(name, parsed);
        }
        Err(e) => {
            log::warn!("Failed to set header {}={} ({})", name, value, e);
        }
    }
}

fn log_api_issue(status: StatusCode, target: &'static str, message: impl AsRef<str>) {
    let message = message.as_ref();
    if status.is_server_error() {
        log::error!(target: target, "{}", message);
    } else {
        log::warn!(target: target, "{}", message);
    }
}
