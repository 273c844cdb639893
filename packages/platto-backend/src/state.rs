/// Shared application state passed to axum handlers.
use platto_core::SessionHandle;
use std::sync::{Arc, Mutex};

use crate::config::ServiceMode;

#[derive(Clone)]
pub struct AppState {
    /// Session gate; the board controller lives behind it.
    pub sessions: SessionHandle,
    pub mode: ServiceMode,
    pub port: u16,
    pub bind_address: String,
    /// Port actually bound (differs from `port` when it was 0).
    pub live_port: Arc<Mutex<u16>>,
}

impl AppState {
    pub fn new(sessions: SessionHandle, mode: ServiceMode, port: u16, bind_address: String) -> Self {
        Self {
            sessions,
            mode,
            port,
            bind_address,
            live_port: Arc::new(Mutex::new(port)),
        }
    }

    pub fn actual_port(&self) -> u16 {
        *self.live_port.lock().unwrap_or_else(|e| e.into_inner())
    }
}
