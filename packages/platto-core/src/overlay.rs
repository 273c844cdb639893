/// Optimistic overlay and the policy that decides when to drop it.
///
/// Two states:
///   Idle              -> the board reads the store directly
///   Pending(id, to)   -> the board reads the store with `id` moved to `to`
///
/// The overlay is never a stored copy; it is re-derived from the current
/// store on every read, so events for other programs show through while a
/// move is pending. Only the confirming change event (or a refresh that
/// already shows the target stage) ends a successful move. A successful
/// mutation response on its own does not.
use std::sync::Arc;

use serde::Serialize;

use crate::error::BoardError;
use crate::event::ChangeEvent;
use crate::store::ProgramStore;
use crate::types::{Program, ProgramId, Stage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PendingMove {
    /// Distinguishes successive moves of the same program.
    pub seq: u64,
    pub program_id: ProgramId,
    pub from: Stage,
    pub target: Stage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum OverlayState {
    #[default]
    Idle,
    Pending(PendingMove),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// Overlay applied; the caller must now issue the stage update.
    Started(PendingMove),
    /// Dropped onto the stage it is already in. Nothing to send.
    Unchanged,
}

/// Result of offering an observation to the policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    Idle,
    StillPending,
    /// The store caught up with the overlay.
    Confirmed(PendingMove),
    /// The pending program was deleted remotely.
    Vanished(PendingMove),
    /// The mutation failed; the overlay has been discarded.
    RolledBack(PendingMove),
}

#[derive(Debug, Default)]
pub struct Reconciler {
    state: OverlayState,
    next_seq: u64,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> Option<PendingMove> {
        match self.state {
            OverlayState::Idle => None,
            OverlayState::Pending(p) => Some(p),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending().is_some()
    }

    /// Idle -> Pending. Only one move may be in flight.
    pub fn begin_move(
        &mut self,
        store: &ProgramStore,
        id: ProgramId,
        target: Stage,
    ) -> Result<MoveOutcome, BoardError> {
        if let Some(pending) = self.pending() {
            return Err(BoardError::MoveInFlight(pending.program_id));
        }
        let program = store.get(id).ok_or(BoardError::ProgramNotFound(id))?;
        if program.status == target {
            return Ok(MoveOutcome::Unchanged);
        }

        self.next_seq += 1;
        let pending = PendingMove {
            seq: self.next_seq,
            program_id: id,
            from: program.status,
            target,
        };
        self.state = OverlayState::Pending(pending);
        log::info!(
            target: "platto.reconcile",
            "Optimistic move of program {}: {} -> {}",
            id,
            pending.from,
            target
        );
        Ok(MoveOutcome::Started(pending))
    }

    /// Offer an event that has already been applied to the store.
    pub fn observe_event(&mut self, event: &ChangeEvent) -> Reconciliation {
        let Some(pending) = self.pending() else {
            return Reconciliation::Idle;
        };
        match event {
            ChangeEvent::Updated(p) if p.id == pending.program_id && p.status == pending.target => {
                self.state = OverlayState::Idle;
                log::info!(
                    target: "platto.reconcile",
                    "Move of program {} to {} confirmed by change feed",
                    pending.program_id,
                    pending.target
                );
                Reconciliation::Confirmed(pending)
            }
            ChangeEvent::Deleted(id) if *id == pending.program_id => {
                self.state = OverlayState::Idle;
                log::info!(
                    target: "platto.reconcile",
                    "Program {} deleted while its move was pending",
                    id
                );
                Reconciliation::Vanished(pending)
            }
            _ => Reconciliation::StillPending,
        }
    }

    /// Offer a freshly refreshed store.
    pub fn observe_store(&mut self, store: &ProgramStore) -> Reconciliation {
        let Some(pending) = self.pending() else {
            return Reconciliation::Idle;
        };
        match store.get(pending.program_id) {
            Some(p) if p.status == pending.target => {
                self.state = OverlayState::Idle;
                log::info!(
                    target: "platto.reconcile",
                    "Move of program {} to {} confirmed by refresh",
                    pending.program_id,
                    pending.target
                );
                Reconciliation::Confirmed(pending)
            }
            Some(_) => Reconciliation::StillPending,
            None => {
                self.state = OverlayState::Idle;
                Reconciliation::Vanished(pending)
            }
        }
    }

    /// The request for `done` went through; keep masking until the feed
    /// confirms.
    pub fn mutation_succeeded(&self, done: &PendingMove) -> Reconciliation {
        match self.pending() {
            Some(p) if p == *done => {
                log::debug!(
                    target: "platto.reconcile",
                    "Stage update for program {} accepted, waiting for change feed",
                    done.program_id
                );
                Reconciliation::StillPending
            }
            Some(_) => Reconciliation::StillPending,
            None => Reconciliation::Idle,
        }
    }

    /// The request for `done` failed. Discards the overlay immediately, but
    /// only if `done` is still the pending move; a late failure of an
    /// earlier, already settled move leaves the current one alone.
    pub fn mutation_failed(&mut self, done: &PendingMove) -> Reconciliation {
        match self.pending() {
            Some(p) if p == *done => {
                self.state = OverlayState::Idle;
                log::warn!(
                    target: "platto.reconcile",
                    "Rolling back optimistic move of program {} to {}",
                    p.program_id,
                    p.target
                );
                Reconciliation::RolledBack(p)
            }
            Some(_) => Reconciliation::StillPending,
            None => Reconciliation::Idle,
        }
    }

    /// Programs the board should show right now.
    pub fn active_programs(&self, store: &ProgramStore) -> Vec<Arc<Program>> {
        let Some(pending) = self.pending() else {
            return store.programs().to_vec();
        };
        store
            .programs()
            .iter()
            .map(|p| {
                if p.id == pending.program_id && p.status != pending.target {
                    Arc::new(Program {
                        status: pending.target,
                        ..Program::clone(p)
                    })
                } else {
                    Arc::clone(p)
                }
            })
            .collect()
    }

    /// Forget any pending move (session end).
    pub fn reset(&mut self) {
        self.state = OverlayState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures::program;

    fn setup() -> (ProgramStore, Reconciler) {
        let store = ProgramStore::from_programs(vec![
            program(1, "A", Stage::RecordingPrep),
            program(2, "B", Stage::Scheduling),
        ]);
        (store, Reconciler::new())
    }

    fn started(outcome: MoveOutcome) -> PendingMove {
        match outcome {
            MoveOutcome::Started(pending) => pending,
            MoveOutcome::Unchanged => panic!("move did not start"),
        }
    }

    fn stage_of(programs: &[Arc<Program>], id: ProgramId) -> Stage {
        programs.iter().find(|p| p.id == id).unwrap().status
    }

    #[test]
    fn test_move_applies_overlay_immediately() {
        let (store, mut rec) = setup();
        let outcome = rec.begin_move(&store, 1, Stage::Editing).unwrap();
        assert!(matches!(outcome, MoveOutcome::Started(p) if p.from == Stage::RecordingPrep));

        let view = rec.active_programs(&store);
        assert_eq!(stage_of(&view, 1), Stage::Editing);
        // Store itself is untouched.
        assert_eq!(store.get(1).unwrap().status, Stage::RecordingPrep);
    }

    #[test]
    fn test_move_to_same_stage_is_noop() {
        let (store, mut rec) = setup();
        assert_eq!(
            rec.begin_move(&store, 1, Stage::RecordingPrep).unwrap(),
            MoveOutcome::Unchanged
        );
        assert!(!rec.is_pending());
    }

    #[test]
    fn test_move_unknown_program() {
        let (store, mut rec) = setup();
        assert_eq!(
            rec.begin_move(&store, 99, Stage::Editing),
            Err(BoardError::ProgramNotFound(99))
        );
    }

    #[test]
    fn test_second_move_rejected_while_pending() {
        let (store, mut rec) = setup();
        rec.begin_move(&store, 1, Stage::Editing).unwrap();
        assert_eq!(
            rec.begin_move(&store, 2, Stage::Editing),
            Err(BoardError::MoveInFlight(1))
        );
    }

    #[test]
    fn test_success_response_alone_keeps_overlay() {
        let (store, mut rec) = setup();
        let pending = started(rec.begin_move(&store, 1, Stage::Editing).unwrap());
        assert_eq!(rec.mutation_succeeded(&pending), Reconciliation::StillPending);
        assert!(rec.is_pending());
    }

    #[test]
    fn test_confirming_event_clears_overlay() {
        let (mut store, mut rec) = setup();
        rec.begin_move(&store, 1, Stage::Editing).unwrap();

        let event = ChangeEvent::Updated(program(1, "A", Stage::Editing));
        store.apply_event(&event);
        assert!(matches!(rec.observe_event(&event), Reconciliation::Confirmed(_)));
        assert!(!rec.is_pending());

        let view = rec.active_programs(&store);
        assert_eq!(stage_of(&view, 1), Stage::Editing);
        assert!(Arc::ptr_eq(&view[0], store.get(1).unwrap()));
    }

    #[test]
    fn test_unrelated_events_keep_overlay() {
        let (mut store, mut rec) = setup();
        rec.begin_move(&store, 1, Stage::Editing).unwrap();

        let other = ChangeEvent::Updated(program(2, "B2", Stage::Preview));
        store.apply_event(&other);
        assert_eq!(rec.observe_event(&other), Reconciliation::StillPending);

        // Stale event for the pending program with the old stage.
        let stale = ChangeEvent::Updated(program(1, "A", Stage::RecordingPrep));
        store.apply_event(&stale);
        assert_eq!(rec.observe_event(&stale), Reconciliation::StillPending);

        let view = rec.active_programs(&store);
        assert_eq!(stage_of(&view, 1), Stage::Editing);
        // Other programs show through the overlay.
        assert_eq!(stage_of(&view, 2), Stage::Preview);
    }

    #[test]
    fn test_failure_rolls_back() {
        let (store, mut rec) = setup();
        let pending = started(rec.begin_move(&store, 1, Stage::Editing).unwrap());
        assert!(matches!(rec.mutation_failed(&pending), Reconciliation::RolledBack(p) if p.target == Stage::Editing));

        let view = rec.active_programs(&store);
        assert_eq!(stage_of(&view, 1), Stage::RecordingPrep);
    }

    #[test]
    fn test_late_failure_after_confirmation_is_ignored() {
        let (mut store, mut rec) = setup();
        let pending = started(rec.begin_move(&store, 1, Stage::Editing).unwrap());
        let event = ChangeEvent::Updated(program(1, "A", Stage::Editing));
        store.apply_event(&event);
        rec.observe_event(&event);

        assert_eq!(rec.mutation_failed(&pending), Reconciliation::Idle);
    }

    #[test]
    fn test_late_failure_of_earlier_move_keeps_current_move() {
        let (mut store, mut rec) = setup();
        let first = started(rec.begin_move(&store, 1, Stage::Editing).unwrap());
        let event = ChangeEvent::Updated(program(1, "A", Stage::Editing));
        store.apply_event(&event);
        rec.observe_event(&event);

        let second = started(rec.begin_move(&store, 1, Stage::Preview).unwrap());
        assert_ne!(first.seq, second.seq);
        assert_eq!(first.program_id, second.program_id);

        assert_eq!(rec.mutation_failed(&first), Reconciliation::StillPending);
        assert_eq!(rec.pending(), Some(second));
        assert_eq!(stage_of(&rec.active_programs(&store), 1), Stage::Preview);

        assert!(matches!(rec.mutation_failed(&second), Reconciliation::RolledBack(p) if p == second));
        assert_eq!(stage_of(&rec.active_programs(&store), 1), Stage::Editing);
    }

    #[test]
    fn test_delete_of_pending_program_clears_overlay() {
        let (mut store, mut rec) = setup();
        rec.begin_move(&store, 1, Stage::Editing).unwrap();
        let event = ChangeEvent::Deleted(1);
        store.apply_event(&event);
        assert!(matches!(rec.observe_event(&event), Reconciliation::Vanished(_)));
        assert_eq!(rec.active_programs(&store).len(), 1);
    }

    #[test]
    fn test_refresh_showing_target_confirms() {
        let (_, mut rec) = setup();
        let store = ProgramStore::from_programs(vec![program(1, "A", Stage::RecordingPrep)]);
        rec.begin_move(&store, 1, Stage::Editing).unwrap();

        let refreshed = ProgramStore::from_programs(vec![program(1, "A", Stage::Editing)]);
        assert!(matches!(rec.observe_store(&refreshed), Reconciliation::Confirmed(_)));
    }

    #[test]
    fn test_refresh_with_old_stage_keeps_pending() {
        let (store, mut rec) = setup();
        rec.begin_move(&store, 1, Stage::Editing).unwrap();
        assert_eq!(rec.observe_store(&store), Reconciliation::StillPending);
    }
}
