/// Platto backend: config loading, service wiring, session gate, HTTP server.
pub mod api;
pub mod config;
pub mod log_bridge;
pub mod postgrest;
pub mod realtime;
pub mod server;
pub mod state;

use platto_core::memory::MemoryService;
use platto_core::session::ServiceFactory;
use platto_core::{ProgramService, Session, SessionSupervisor};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackendConfig, ConfigError, ServiceMode};
use crate::postgrest::PostgrestService;
use crate::state::AppState;

const SUPERVISOR_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Build the per-session service constructor for the configured mode.
pub fn build_factory(config: &BackendConfig) -> Result<Arc<dyn ServiceFactory>, ConfigError> {
    match config.mode {
        ServiceMode::Memory => {
            let rows = match &config.seed_file {
                Some(path) => config::load_seed(path)?,
                None => Vec::new(),
            };
            log::info!("Memory mode with {} seeded programs", rows.len());
            // Every session shares one table, like the hosted one.
            let service: Arc<dyn ProgramService> = Arc::new(MemoryService::with_programs(rows));
            Ok(Arc::new(move |_: &Session| Arc::clone(&service)))
        }
        ServiceMode::Supabase => {
            let supabase = config.supabase.clone();
            log::info!("Supabase mode against {} (table {})", supabase.url, supabase.table);
            Ok(Arc::new(move |session: &Session| -> Arc<dyn ProgramService> {
                Arc::new(PostgrestService::new(&supabase, &session.access_token))
            }))
        }
    }
}

/// Session to start with, if the config provides one.
fn startup_session(config: &BackendConfig) -> Option<Session> {
    match (&config.access_token, config.mode) {
        (Some(token), _) => Some(Session {
            user_id: "config".to_string(),
            email: None,
            access_token: token.clone(),
        }),
        (None, ServiceMode::Memory) => Some(Session {
            user_id: "local".to_string(),
            email: None,
            access_token: String::new(),
        }),
        (None, ServiceMode::Supabase) => None,
    }
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    // Read .env before the logger so RUST_LOG from it applies.
    let dotenv = dotenvy::dotenv();
    if let Err(e) = log_bridge::init() {
        log_bridge::write_fallback_line(&format!("failed to initialize backend logger: {}", e));
    }
    match dotenv {
        Ok(path) => log::info!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => log::warn!("Failed to read .env: {}", e),
    }

    let config_path = std::env::var("PLATTO_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| config::default_config_path());
    let mut config = config::load_config(&config_path);
    config.apply_env(|key| std::env::var(key).ok());
    config.validate()?;

    let factory = build_factory(&config)?;
    let (sessions, supervisor) = SessionSupervisor::spawn(factory);
    match startup_session(&config) {
        Some(session) => sessions.sign_in(session),
        None => log::info!("Waiting for POST /session to start the board"),
    }

    let state = AppState::new(
        sessions.clone(),
        config.mode,
        config.port,
        config.bind_address.clone(),
    );
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let (port, server) = server::spawn_server(state, shutdown_rx).await?;
    log::info!("Server started on port {}", port);

    tokio::signal::ctrl_c().await?;
    log::info!(target: "platto.shutdown", "Shutting down");

    sessions.sign_out();
    let _ = shutdown_tx.send(true);
    if let Err(e) = server.await {
        log::error!(target: "platto.shutdown", "Server task failed: {}", e);
    }
    drop(sessions);
    if tokio::time::timeout(SUPERVISOR_STOP_TIMEOUT, supervisor).await.is_err() {
        log::warn!(target: "platto.shutdown", "Session supervisor did not stop in time");
    }
    Ok(())
}
