use axum::{extract::State, http::StatusCode, response::Json};
use platto_core::Session;
use serde::Deserialize;

use super::{api_error, ApiError};
use crate::state::AppState;

/// Credentials handed over by the external sign-in flow.
#[derive(Deserialize)]
pub struct SignInBody {
    access_token: String,
    user_id: String,
    #[serde(default)]
    email: Option<String>,
}

pub async fn get_session(State(state): State<AppState>) -> Json<serde_json::Value> {
    let session = state.sessions.session();
    Json(serde_json::json!({
        "signedIn": session.is_some(),
        "session": session,
        "boardRunning": state.sessions.controller().is_some(),
    }))
}

pub async fn sign_in(
    State(state): State<AppState>,
    Json(body): Json<SignInBody>,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    if body.user_id.trim().is_empty() || body.access_token.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "platto.api.session",
            "user_id and access_token are required",
        ));
    }
    log::info!(target: "platto.api.session", "Sign-in for user {}", body.user_id);
    let user_id = body.user_id.clone();
    state.sessions.sign_in(Session {
        user_id: body.user_id,
        email: body.email,
        access_token: body.access_token,
    });
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "userId": user_id })),
    ))
}

pub async fn sign_out(State(state): State<AppState>) -> StatusCode {
    log::info!(target: "platto.api.session", "Sign-out");
    state.sessions.sign_out();
    StatusCode::NO_CONTENT
}
