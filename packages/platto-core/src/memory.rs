/// In-process program table with a broadcast change feed.
///
/// Behaves like the hosted table from the board's point of view: every
/// successful mutation is echoed on the feed, and the mutation response
/// itself is never trusted by the board. Used for offline runs and tests.
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::event::{ChangeEvent, FeedItem};
use crate::remote::{ProgramService, RemoteError, Subscription};
use crate::types::{NewProgram, Program, ProgramId, ProgramPatch};

const FEED_CAPACITY: usize = 256;

#[derive(Default)]
struct Table {
    /// Newest first.
    rows: Vec<Program>,
    next_id: ProgramId,
    fail_fetch: Option<RemoteError>,
    fail_mutation: Option<RemoteError>,
}

pub struct MemoryService {
    table: Mutex<Table>,
    events: broadcast::Sender<ChangeEvent>,
}

impl MemoryService {
    pub fn new() -> Self {
        Self::with_programs(Vec::new())
    }

    /// Seed the table. Rows keep the given order; new ids continue after
    /// the highest seeded id.
    pub fn with_programs(rows: Vec<Program>) -> Self {
        let next_id = rows.iter().map(|p| p.id).max().unwrap_or(0) + 1;
        let (events, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            table: Mutex::new(Table {
                rows,
                next_id,
                ..Table::default()
            }),
            events,
        }
    }

    /// Make every `fetch_all` fail with `error` until cleared with `None`.
    pub fn fail_fetches(&self, error: Option<RemoteError>) {
        self.lock().fail_fetch = error;
    }

    /// Make every create/update/delete fail with `error` until cleared.
    pub fn fail_mutations(&self, error: Option<RemoteError>) {
        self.lock().fail_mutation = error;
    }

    /// Push an event onto the feed without touching the table, as a
    /// replayed or out-of-order notification would.
    pub fn inject_event(&self, event: ChangeEvent) {
        let _ = self.events.send(event);
    }

    pub fn rows(&self) -> Vec<Program> {
        self.lock().rows.clone()
    }

    /// Open change feeds.
    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Table> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn now() -> String {
        Utc::now().to_rfc3339_opts(SecondsFormat::Millis, false)
    }

    fn emit(&self, event: ChangeEvent) {
        // No subscribers is fine; the table is still authoritative.
        let _ = self.events.send(event);
    }
}

impl Default for MemoryService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProgramService for MemoryService {
    async fn fetch_all(&self) -> Result<Vec<Program>, RemoteError> {
        let table = self.lock();
        if let Some(err) = &table.fail_fetch {
            return Err(err.clone());
        }
        Ok(table.rows.clone())
    }

    async fn create(&self, program: &NewProgram) -> Result<Program, RemoteError> {
        let created = {
            let mut table = self.lock();
            if let Some(err) = &table.fail_mutation {
                return Err(err.clone());
            }
            let id = table.next_id;
            table.next_id += 1;
            let row = program.clone().into_program(id, &Self::now());
            table.rows.insert(0, row.clone());
            row
        };
        self.emit(ChangeEvent::Created(created.clone()));
        Ok(created)
    }

    async fn update(&self, id: ProgramId, patch: &ProgramPatch) -> Result<Program, RemoteError> {
        let updated = {
            let mut table = self.lock();
            if let Some(err) = &table.fail_mutation {
                return Err(err.clone());
            }
            let row = table
                .rows
                .iter_mut()
                .find(|p| p.id == id)
                .ok_or_else(|| RemoteError::not_found(id))?;
            patch.apply_to(row);
            row.updated_at = Some(Self::now());
            row.clone()
        };
        self.emit(ChangeEvent::Updated(updated.clone()));
        Ok(updated)
    }

    async fn delete(&self, id: ProgramId) -> Result<(), RemoteError> {
        let removed = {
            let mut table = self.lock();
            if let Some(err) = &table.fail_mutation {
                return Err(err.clone());
            }
            let before = table.rows.len();
            table.rows.retain(|p| p.id != id);
            table.rows.len() != before
        };
        if removed {
            self.emit(ChangeEvent::Deleted(id));
        }
        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription, RemoteError> {
        let mut events = self.events.subscribe();
        let (tx, rx) = mpsc::channel(FEED_CAPACITY);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    received = events.recv() => match received {
                        Ok(event) => FeedItem::Change(event),
                        Err(RecvError::Lagged(n)) => {
                            log::warn!(target: "platto.memory", "Feed lagged by {} events", n);
                            FeedItem::Resync {
                                reason: format!("feed lagged by {} events", n),
                            }
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = &mut shutdown_rx => break,
                };
                if tx.send(item).await.is_err() {
                    break;
                }
            }
            log::debug!(target: "platto.memory", "Feed forwarder stopped");
        });

        Ok(Subscription::new(rx, shutdown_tx))
    }
}
