/// The remote table service the board consumes.
///
/// Implementations: `MemoryService` (in-process) and the backend's
/// PostgREST adapter. The board never talks to a transport directly.
use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::event::FeedItem;
use crate::types::{NewProgram, Program, ProgramId, ProgramPatch};

/// Transport or policy failure reported by the remote service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{message} ({code})")]
pub struct RemoteError {
    /// Machine-readable code (PostgREST/Postgres code, HTTP status, or
    /// one of `transport`, `not_found`, `decode`).
    pub code: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::new("transport", message)
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::new("decode", message)
    }

    pub fn not_found(id: ProgramId) -> Self {
        Self::new("not_found", format!("Program not found: {}", id))
    }

    pub fn is_not_found(&self) -> bool {
        self.code == "not_found"
    }
}

/// A live change feed. Dropping it tells the producer to stop and release
/// its connection.
pub struct Subscription {
    items: mpsc::Receiver<FeedItem>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl Subscription {
    pub fn new(items: mpsc::Receiver<FeedItem>, shutdown: oneshot::Sender<()>) -> Self {
        Self {
            items,
            shutdown: Some(shutdown),
        }
    }

    /// Next feed item; `None` once the producer has gone away.
    pub async fn recv(&mut self) -> Option<FeedItem> {
        self.items.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

#[async_trait]
pub trait ProgramService: Send + Sync {
    /// All rows, newest first.
    async fn fetch_all(&self) -> Result<Vec<Program>, RemoteError>;

    async fn create(&self, program: &NewProgram) -> Result<Program, RemoteError>;

    async fn update(&self, id: ProgramId, patch: &ProgramPatch) -> Result<Program, RemoteError>;

    /// Deleting an absent row is not an error.
    async fn delete(&self, id: ProgramId) -> Result<(), RemoteError>;

    /// Open a change feed for the program table.
    async fn subscribe(&self) -> Result<Subscription, RemoteError>;
}
