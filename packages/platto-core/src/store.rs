/// Server-confirmed program cache.
///
/// - Replaced wholesale by `refresh()`
/// - Patched incrementally by change events, idempotently
/// - Entries are `Arc`s so no-op updates keep the same allocation and
///   readers can cheaply tell what actually changed
use std::sync::Arc;

use crate::event::ChangeEvent;
use crate::remote::{ProgramService, RemoteError};
use crate::types::{Program, ProgramId};

/// Effect of applying a single change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted,
    Replaced,
    Removed,
    /// Duplicate, stale or no-op event.
    Unchanged,
}

impl ApplyOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

#[derive(Debug, Default)]
pub struct ProgramStore {
    /// Newest first, matching the remote ordering.
    programs: Vec<Arc<Program>>,
    /// Bumped on every effective change.
    version: u64,
}

impl ProgramStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_programs(programs: Vec<Program>) -> Self {
        let mut store = Self::new();
        store.replace_all(programs);
        store
    }

    pub fn programs(&self) -> &[Arc<Program>] {
        &self.programs
    }

    pub fn get(&self, id: ProgramId) -> Option<&Arc<Program>> {
        self.programs.iter().find(|p| p.id == id)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Replace the cache with a fresh `fetch_all()`.
    /// On failure the previous cache is left untouched.
    pub async fn refresh(&mut self, service: &dyn ProgramService) -> Result<usize, RemoteError> {
        let programs = service.fetch_all().await.map_err(|e| {
            log::warn!(target: "platto.store", "Refresh failed: {}", e);
            e
        })?;
        let count = programs.len();
        self.replace_all(programs);
        log::info!(target: "platto.store", "Loaded {} programs (version {})", count, self.version);
        Ok(count)
    }

    pub fn replace_all(&mut self, programs: Vec<Program>) {
        self.programs = programs.into_iter().map(Arc::new).collect();
        self.version += 1;
    }

    /// Minimal patch for one event.
    pub fn apply_event(&mut self, event: &ChangeEvent) -> ApplyOutcome {
        let outcome = match event {
            ChangeEvent::Created(program) => {
                if self.position(program.id).is_some() {
                    ApplyOutcome::Unchanged
                } else {
                    self.programs.insert(0, Arc::new(program.clone()));
                    ApplyOutcome::Inserted
                }
            }
            ChangeEvent::Updated(program) => match self.position(program.id) {
                Some(idx) if !self.programs[idx].same_content(program) => {
                    self.programs[idx] = Arc::new(program.clone());
                    ApplyOutcome::Replaced
                }
                // Identical echo, or an update for a row we never saw.
                _ => ApplyOutcome::Unchanged,
            },
            ChangeEvent::Deleted(id) => match self.position(*id) {
                Some(idx) => {
                    self.programs.remove(idx);
                    ApplyOutcome::Removed
                }
                None => ApplyOutcome::Unchanged,
            },
        };

        if outcome.changed() {
            self.version += 1;
        }
        log::debug!(
            target: "platto.store",
            "{} event for program {}: {:?}",
            event.kind(),
            event.program_id(),
            outcome
        );
        outcome
    }

    fn position(&self, id: ProgramId) -> Option<usize> {
        self.programs.iter().position(|p| p.id == id)
    }
}
