use axum::{
    extract::{Query, State},
    response::{sse::Event, Json, Sse},
};
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use crate::state::AppState;

const DEFAULT_LOG_LIMIT: usize = 200;

#[derive(Deserialize)]
pub struct LogQuery {
    limit: Option<usize>,
    /// Minimum level: error, warn, info, debug or trace.
    level: Option<String>,
}

/// SSE endpoint: streams BoardNotice as JSON to connected clients. The
/// stream outlives sessions; it reports their start and end too.
pub async fn sse_events(
    State(state): State<AppState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.sessions.notices();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(notice) => {
            let json = serde_json::to_string(&notice).unwrap_or_default();
            Some(Ok(Event::default().data(json)))
        }
        Err(_) => None,
    });

    // Keep-alive every 30 seconds
    let stream = stream.merge(tokio_stream::StreamExt::map(
        tokio_stream::wrappers::IntervalStream::new(tokio::time::interval(
            std::time::Duration::from_secs(30),
        )),
        |_| Ok(Event::default().comment("keep-alive")),
    ));

    Sse::new(stream)
}

pub async fn status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let board = state.sessions.controller().map(|controller| {
        let snapshot = controller.snapshot();
        serde_json::json!({
            "loaded": snapshot.loaded,
            "programs": snapshot.programs.len(),
            "revision": snapshot.revision,
            "pending": snapshot.pending,
            "feedConnected": snapshot.feed_connected,
            "loadError": snapshot.load_error,
        })
    });
    Json(serde_json::json!({
        "status": "running",
        "mode": state.mode,
        "port": state.actual_port(),
        "bind_address": state.bind_address,
        "signedIn": state.sessions.session().is_some(),
        "board": board,
    }))
}

pub async fn list_logs(Query(query): Query<LogQuery>) -> Json<serde_json::Value> {
    let level = query
        .level
        .as_deref()
        .and_then(|l| l.parse().ok())
        .unwrap_or(log::Level::Trace);
    Json(serde_json::json!({
        "entries": crate::log_bridge::recent_entries(query.limit.unwrap_or(DEFAULT_LOG_LIMIT), level),
        "filePath": crate::log_bridge::log_file_path(),
    }))
}

pub async fn stream_logs() -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = crate::log_bridge::subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|item| {
        let entry = match item {
            Ok(entry) => entry,
            Err(_) => return None,
        };
        let payload = match serde_json::to_string(&entry) {
            Ok(payload) => payload,
            Err(_) => return None,
        };
        Some(Ok(Event::default().data(payload)))
    });
    Sse::new(stream)
}
