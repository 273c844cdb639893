/// The reconciliation loop.
///
/// One task owns the store and the reconciler. Everything that can change
/// them arrives as a message:
///   - commands from handles (move, refresh, shutdown)
///   - items from the change feed
///   - completions of stage updates, each run in its own task
///
/// Readers never touch the loop's state; they read the latest published
/// `BoardSnapshot` from a watch channel and project it themselves.
use std::sync::Arc;

use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::error::BoardError;
use crate::event::FeedItem;
use crate::overlay::{MoveOutcome, PendingMove, Reconciler, Reconciliation};
use crate::projection::{project, BoardFilter, BoardView};
use crate::remote::{ProgramService, RemoteError, Subscription};
use crate::store::ProgramStore;
use crate::types::{NewProgram, Program, ProgramId, ProgramPatch, Stage};

const COMMAND_CAPACITY: usize = 64;

/// What readers see: the active program list (overlay applied) plus status.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardSnapshot {
    pub programs: Vec<Arc<Program>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingMove>,
    pub store_version: u64,
    /// Bumped on every publish.
    pub revision: u64,
    pub loaded: bool,
    /// Set while the last fetch failed; the board must not be rendered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_error: Option<String>,
    /// Last surfaced mutation failure, cleared by the next move.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub feed_connected: bool,
}

impl BoardSnapshot {
    pub fn project(&self, filter: &BoardFilter, today: NaiveDate) -> BoardView {
        let mut view = project(&self.programs, filter, today);
        view.pending = self.pending;
        view
    }
}

/// Notifications for the UI layer, including the error channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BoardNotice {
    SessionStarted { user_id: String },
    SessionEnded,
    Refreshed { count: usize, version: u64 },
    BoardChanged { program_id: ProgramId, change: String, version: u64 },
    MoveStarted { pending: PendingMove },
    MoveConfirmed { pending: PendingMove },
    /// The program disappeared while its move was pending.
    MoveAbandoned { pending: PendingMove },
    MoveRolledBack { pending: PendingMove, error: String },
    Error { kind: String, message: String },
}

impl BoardNotice {
    fn error(err: &BoardError) -> Self {
        Self::Error {
            kind: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

enum Command {
    Move {
        id: ProgramId,
        target: Stage,
        reply: oneshot::Sender<Result<MoveOutcome, BoardError>>,
    },
    Refresh {
        reply: oneshot::Sender<Result<usize, BoardError>>,
    },
    Shutdown,
}

struct Completion {
    pending: PendingMove,
    result: Result<(), RemoteError>,
}

enum Wake {
    Command(Option<Command>),
    Completion(Completion),
    Feed(Option<FeedItem>),
}

/// Cheap, cloneable access to a running controller.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<BoardSnapshot>,
    notices: broadcast::Sender<BoardNotice>,
    service: Arc<dyn ProgramService>,
}

impl ControllerHandle {
    /// Start an optimistic move. Returns once the overlay is visible; the
    /// outcome of the remote update arrives on the notice channel.
    pub async fn move_program(&self, id: ProgramId, target: Stage) -> Result<MoveOutcome, BoardError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Move { id, target, reply }).await?;
        rx.await.map_err(|_| BoardError::ControllerClosed)?
    }

    pub async fn refresh(&self) -> Result<usize, BoardError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Refresh { reply }).await?;
        rx.await.map_err(|_| BoardError::ControllerClosed)?
    }

    /// Stop the loop. Its change feed is released when the loop exits.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn board(&self, filter: &BoardFilter, today: NaiveDate) -> BoardView {
        self.snapshot.borrow().project(filter, today)
    }

    pub fn watch(&self) -> watch::Receiver<BoardSnapshot> {
        self.snapshot.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<BoardNotice> {
        self.notices.subscribe()
    }

    /// Wait for the first successful or failed load.
    pub async fn loaded(&self) -> BoardSnapshot {
        let mut rx = self.snapshot.clone();
        let result = rx
            .wait_for(|s| s.loaded || s.load_error.is_some())
            .await
            .map(|s| s.clone());
        result.unwrap_or_else(|_| self.snapshot())
    }

    // Plain passthroughs: the change feed brings the results into the store.

    pub async fn create(&self, program: &NewProgram) -> Result<Program, RemoteError> {
        self.service.create(program).await
    }

    pub async fn update(&self, id: ProgramId, patch: &ProgramPatch) -> Result<Program, RemoteError> {
        self.service.update(id, patch).await
    }

    pub async fn delete(&self, id: ProgramId) -> Result<(), RemoteError> {
        self.service.delete(id).await
    }

    async fn send(&self, command: Command) -> Result<(), BoardError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| BoardError::ControllerClosed)
    }
}

pub struct BoardController {
    service: Arc<dyn ProgramService>,
    store: ProgramStore,
    reconciler: Reconciler,
    feed: Option<Subscription>,
    commands: mpsc::Receiver<Command>,
    completions_tx: mpsc::Sender<Completion>,
    completions: mpsc::Receiver<Completion>,
    snapshot: watch::Sender<BoardSnapshot>,
    notices: broadcast::Sender<BoardNotice>,
    revision: u64,
    loaded: bool,
    load_error: Option<String>,
    last_error: Option<String>,
}

impl BoardController {
    /// Spawn the loop. It performs the initial refresh itself; subscribe
    /// before calling this so no event between fetch and feed is lost.
    pub fn spawn(
        service: Arc<dyn ProgramService>,
        feed: Option<Subscription>,
        notices: broadcast::Sender<BoardNotice>,
    ) -> (ControllerHandle, JoinHandle<()>) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (completions_tx, completions) = mpsc::channel(COMMAND_CAPACITY);
        let (snapshot, snapshot_rx) = watch::channel(BoardSnapshot {
            feed_connected: feed.is_some(),
            ..BoardSnapshot::default()
        });

        let handle = ControllerHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
            notices: notices.clone(),
            service: Arc::clone(&service),
        };
        let controller = BoardController {
            service,
            store: ProgramStore::new(),
            reconciler: Reconciler::new(),
            feed,
            commands,
            completions_tx,
            completions,
            snapshot,
            notices,
            revision: 0,
            loaded: false,
            load_error: None,
            last_error: None,
        };
        let task = tokio::spawn(controller.run());
        (handle, task)
    }

    async fn run(mut self) {
        let _ = self.refresh().await;

        loop {
            let wake = tokio::select! {
                cmd = self.commands.recv() => Wake::Command(cmd),
                Some(done) = self.completions.recv() => Wake::Completion(done),
                item = recv_feed(&mut self.feed), if self.feed.is_some() => Wake::Feed(item),
            };

            match wake {
                Wake::Command(None) | Wake::Command(Some(Command::Shutdown)) => break,
                Wake::Command(Some(cmd)) => self.handle_command(cmd).await,
                Wake::Completion(done) => self.handle_completion(done),
                Wake::Feed(Some(item)) => self.handle_feed(item).await,
                Wake::Feed(None) => {
                    log::warn!(target: "platto.controller", "Change feed closed");
                    self.feed = None;
                    self.notify(BoardNotice::Error {
                        kind: "feed".to_string(),
                        message: "Change feed closed".to_string(),
                    });
                    self.publish();
                }
            }
        }

        self.reconciler.reset();
        log::info!(target: "platto.controller", "Board controller stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Move { id, target, reply } => {
                let result = self.reconciler.begin_move(&self.store, id, target);
                if let Ok(MoveOutcome::Started(pending)) = &result {
                    self.last_error = None;
                    self.spawn_stage_update(*pending);
                    self.notify(BoardNotice::MoveStarted { pending: *pending });
                    self.publish();
                }
                let _ = reply.send(result);
            }
            Command::Refresh { reply } => {
                let result = self.refresh().await;
                let _ = reply.send(result);
            }
            Command::Shutdown => {}
        }
    }

    fn spawn_stage_update(&self, pending: PendingMove) {
        let service = Arc::clone(&self.service);
        let done = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = service
                .update(pending.program_id, &ProgramPatch::stage(pending.target))
                .await
                .map(|_| ());
            let _ = done.send(Completion { pending, result }).await;
        });
    }

    fn handle_completion(&mut self, done: Completion) {
        let id = done.pending.program_id;
        match done.result {
            Ok(()) => {
                self.reconciler.mutation_succeeded(&done.pending);
            }
            Err(e) => {
                let err = BoardError::StageUpdateFailed {
                    id,
                    reason: e.to_string(),
                };
                match self.reconciler.mutation_failed(&done.pending) {
                    Reconciliation::RolledBack(pending) => {
                        log::warn!(target: "platto.controller", "{}", err);
                        self.last_error = Some(err.to_string());
                        self.notify(BoardNotice::MoveRolledBack {
                            pending,
                            error: err.to_string(),
                        });
                        self.notify(BoardNotice::error(&err));
                        self.publish();
                    }
                    // The move already settled; the board has nothing to undo.
                    _ => log::info!(
                        target: "platto.controller",
                        "Ignoring late failure of settled move #{}: {}",
                        done.pending.seq,
                        err
                    ),
                }
            }
        }
    }

    async fn handle_feed(&mut self, item: FeedItem) {
        match item {
            FeedItem::Change(event) => {
                let outcome = self.store.apply_event(&event);
                let reconciliation = self.reconciler.observe_event(&event);

                if outcome.changed() {
                    self.notify(BoardNotice::BoardChanged {
                        program_id: event.program_id(),
                        change: event.kind().to_string(),
                        version: self.store.version(),
                    });
                }
                let settled = self.notify_settled(reconciliation);
                if outcome.changed() || settled {
                    self.publish();
                }
            }
            FeedItem::Resync { reason } => {
                log::info!(target: "platto.controller", "Resync requested: {}", reason);
                let _ = self.refresh().await;
            }
        }
    }

    async fn refresh(&mut self) -> Result<usize, BoardError> {
        match self.store.refresh(self.service.as_ref()).await {
            Ok(count) => {
                self.loaded = true;
                self.load_error = None;
                let reconciliation = self.reconciler.observe_store(&self.store);
                self.notify_settled(reconciliation);
                self.notify(BoardNotice::Refreshed {
                    count,
                    version: self.store.version(),
                });
                self.publish();
                Ok(count)
            }
            Err(e) => {
                let err = BoardError::Fetch(e);
                self.load_error = Some(err.to_string());
                self.notify(BoardNotice::error(&err));
                self.publish();
                Err(err)
            }
        }
    }

    /// Emit a notice if the pending move ended; returns whether it did.
    fn notify_settled(&self, reconciliation: Reconciliation) -> bool {
        match reconciliation {
            Reconciliation::Confirmed(pending) => {
                self.notify(BoardNotice::MoveConfirmed { pending });
                true
            }
            Reconciliation::Vanished(pending) => {
                self.notify(BoardNotice::MoveAbandoned { pending });
                true
            }
            Reconciliation::RolledBack(_) => true,
            Reconciliation::Idle | Reconciliation::StillPending => false,
        }
    }

    fn notify(&self, notice: BoardNotice) {
        // Nobody listening is fine.
        let _ = self.notices.send(notice);
    }

    fn publish(&mut self) {
        self.revision += 1;
        self.snapshot.send_replace(BoardSnapshot {
            programs: self.reconciler.active_programs(&self.store),
            pending: self.reconciler.pending(),
            store_version: self.store.version(),
            revision: self.revision,
            loaded: self.loaded,
            load_error: self.load_error.clone(),
            last_error: self.last_error.clone(),
            feed_connected: self.feed.is_some(),
        });
    }
}

async fn recv_feed(feed: &mut Option<Subscription>) -> Option<FeedItem> {
    match feed {
        Some(feed) => feed.recv().await,
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChangeEvent;
    use crate::memory::MemoryService;
    use crate::types::fixtures::program;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Semaphore;

    /// Holds every stage update until the test releases it.
    struct GatedService {
        inner: MemoryService,
        gate: Semaphore,
        finished: AtomicUsize,
    }

    impl GatedService {
        fn new(programs: Vec<Program>) -> Arc<Self> {
            Arc::new(Self {
                inner: MemoryService::with_programs(programs),
                gate: Semaphore::new(0),
                finished: AtomicUsize::new(0),
            })
        }

        fn release(&self) {
            self.gate.add_permits(1);
        }
    }

    #[async_trait]
    impl ProgramService for GatedService {
        async fn fetch_all(&self) -> Result<Vec<Program>, RemoteError> {
            self.inner.fetch_all().await
        }
        async fn create(&self, program: &NewProgram) -> Result<Program, RemoteError> {
            self.inner.create(program).await
        }
        async fn update(&self, id: ProgramId, patch: &ProgramPatch) -> Result<Program, RemoteError> {
            let permit = self.gate.acquire().await.expect("gate open");
            permit.forget();
            let result = self.inner.update(id, patch).await;
            self.finished.fetch_add(1, Ordering::SeqCst);
            result
        }
        async fn delete(&self, id: ProgramId) -> Result<(), RemoteError> {
            self.inner.delete(id).await
        }
        async fn subscribe(&self) -> Result<Subscription, RemoteError> {
            self.inner.subscribe().await
        }
    }

    async fn start(service: Arc<GatedService>) -> (ControllerHandle, broadcast::Receiver<BoardNotice>) {
        let feed = service.subscribe().await.unwrap();
        let (notices, rx) = broadcast::channel(64);
        let (handle, _task) = BoardController::spawn(service, Some(feed), notices);
        let snapshot = handle.loaded().await;
        assert!(snapshot.loaded);
        (handle, rx)
    }

    async fn wait_for_notice<F>(rx: &mut broadcast::Receiver<BoardNotice>, pred: F) -> BoardNotice
    where
        F: Fn(&BoardNotice) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let notice = rx.recv().await.expect("notice channel open");
                if pred(&notice) {
                    return notice;
                }
            }
        })
        .await
        .expect("notice within timeout")
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()
    }

    fn shown_stage(handle: &ControllerHandle, id: ProgramId) -> Option<Stage> {
        handle.board(&BoardFilter::default(), today()).stage_of(id)
    }

    #[tokio::test]
    async fn test_move_then_confirmation() {
        let service = GatedService::new(vec![program(1, "A", Stage::RecordingPrep)]);
        let (handle, mut notices) = start(Arc::clone(&service)).await;

        let outcome = handle.move_program(1, Stage::Editing).await.unwrap();
        assert!(matches!(outcome, MoveOutcome::Started(_)));
        assert_eq!(shown_stage(&handle, 1), Some(Stage::Editing));
        assert!(handle.snapshot().pending.is_some());

        service.release();
        wait_for_notice(&mut notices, |n| matches!(n, BoardNotice::MoveConfirmed { .. })).await;

        let snapshot = handle.snapshot();
        assert!(snapshot.pending.is_none());
        assert_eq!(shown_stage(&handle, 1), Some(Stage::Editing));
        assert_eq!(snapshot.programs[0].status, Stage::Editing);
    }

    #[tokio::test]
    async fn test_failed_move_rolls_back_with_error() {
        let service = GatedService::new(vec![program(1, "A", Stage::RecordingPrep)]);
        service
            .inner
            .fail_mutations(Some(RemoteError::transport("network")));
        let (handle, mut notices) = start(Arc::clone(&service)).await;

        handle.move_program(1, Stage::Editing).await.unwrap();
        assert_eq!(shown_stage(&handle, 1), Some(Stage::Editing));

        service.release();
        let notice = wait_for_notice(&mut notices, |n| {
            matches!(n, BoardNotice::MoveRolledBack { .. })
        })
        .await;
        match notice {
            BoardNotice::MoveRolledBack { error, .. } => assert!(error.contains("network")),
            other => panic!("unexpected notice {:?}", other),
        }

        let snapshot = handle.snapshot();
        assert!(snapshot.pending.is_none());
        assert!(snapshot.last_error.unwrap().contains("network"));
        assert_eq!(shown_stage(&handle, 1), Some(Stage::RecordingPrep));
    }

    #[tokio::test]
    async fn test_confirmation_before_response() {
        let service = GatedService::new(vec![program(1, "A", Stage::RecordingPrep)]);
        let (handle, mut notices) = start(Arc::clone(&service)).await;

        handle.move_program(1, Stage::Editing).await.unwrap();
        // Someone else's identical write reaches the feed first.
        service
            .inner
            .inject_event(ChangeEvent::Updated(program(1, "A", Stage::Editing)));
        wait_for_notice(&mut notices, |n| matches!(n, BoardNotice::MoveConfirmed { .. })).await;
        assert!(handle.snapshot().pending.is_none());

        // The late response changes nothing.
        service.release();
        for _ in 0..50 {
            if service.inner.rows()[0].status == Stage::Editing {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.refresh().await.unwrap();
        assert!(handle.snapshot().pending.is_none());
        assert_eq!(shown_stage(&handle, 1), Some(Stage::Editing));
    }

    #[tokio::test]
    async fn test_late_failure_of_confirmed_move_keeps_next_move() {
        let service = GatedService::new(vec![program(1, "A", Stage::RecordingPrep)]);
        let (handle, mut notices) = start(Arc::clone(&service)).await;

        // First move is confirmed by the feed while its request is held.
        handle.move_program(1, Stage::Editing).await.unwrap();
        service
            .inner
            .inject_event(ChangeEvent::Updated(program(1, "A", Stage::Editing)));
        wait_for_notice(&mut notices, |n| matches!(n, BoardNotice::MoveConfirmed { .. })).await;

        // Second move of the same program, also held.
        handle.move_program(1, Stage::Preview).await.unwrap();
        assert_eq!(shown_stage(&handle, 1), Some(Stage::Preview));

        // Only the first request gets through, and it fails.
        service
            .inner
            .fail_mutations(Some(RemoteError::transport("network")));
        service.release();
        for _ in 0..100 {
            if service.finished.load(Ordering::SeqCst) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(service.finished.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = handle.snapshot();
        let pending = snapshot.pending.expect("second move still pending");
        assert_eq!(pending.target, Stage::Preview);
        assert!(snapshot.last_error.is_none());
        assert_eq!(shown_stage(&handle, 1), Some(Stage::Preview));
        assert_eq!(
            handle.move_program(1, Stage::Aired).await,
            Err(BoardError::MoveInFlight(1))
        );
        while let Ok(notice) = notices.try_recv() {
            assert!(
                !matches!(notice, BoardNotice::MoveRolledBack { .. } | BoardNotice::Error { .. }),
                "unexpected notice {:?}",
                notice
            );
        }

        // The second request completes and the feed confirms it.
        service.inner.fail_mutations(None);
        service.release();
        let notice = wait_for_notice(&mut notices, |n| matches!(n, BoardNotice::MoveConfirmed { .. })).await;
        match notice {
            BoardNotice::MoveConfirmed { pending: confirmed } => assert_eq!(confirmed, pending),
            other => panic!("unexpected notice {:?}", other),
        }
        assert_eq!(shown_stage(&handle, 1), Some(Stage::Preview));
    }

    #[tokio::test]
    async fn test_stale_event_does_not_end_pending() {
        let service = GatedService::new(vec![
            program(1, "A", Stage::RecordingPrep),
            program(2, "B", Stage::Scheduling),
        ]);
        let (handle, mut notices) = start(Arc::clone(&service)).await;

        handle.move_program(1, Stage::Editing).await.unwrap();
        service
            .inner
            .inject_event(ChangeEvent::Updated(program(2, "B", Stage::Preview)));
        wait_for_notice(&mut notices, |n| matches!(n, BoardNotice::BoardChanged { program_id: 2, .. }))
            .await;

        let snapshot = handle.snapshot();
        assert!(snapshot.pending.is_some());
        assert_eq!(shown_stage(&handle, 1), Some(Stage::Editing));
        assert_eq!(shown_stage(&handle, 2), Some(Stage::Preview));
    }

    #[tokio::test]
    async fn test_second_move_rejected_while_pending() {
        let service = GatedService::new(vec![
            program(1, "A", Stage::RecordingPrep),
            program(2, "B", Stage::Scheduling),
        ]);
        let (handle, _notices) = start(Arc::clone(&service)).await;

        handle.move_program(1, Stage::Editing).await.unwrap();
        assert_eq!(
            handle.move_program(2, Stage::Editing).await,
            Err(BoardError::MoveInFlight(1))
        );
    }

    #[tokio::test]
    async fn test_noop_echo_does_not_republish() {
        let service = GatedService::new(vec![program(1, "A", Stage::RecordingPrep)]);
        let (handle, mut notices) = start(Arc::clone(&service)).await;
        let revision = handle.snapshot().revision;

        let mut echo = program(1, "A", Stage::RecordingPrep);
        echo.updated_at = Some("2030-01-01T00:00:00+00:00".into());
        service.inner.inject_event(ChangeEvent::Updated(echo));
        // A real change afterwards proves the echo was processed first.
        service
            .inner
            .inject_event(ChangeEvent::Created(program(2, "B", Stage::Scheduling)));
        wait_for_notice(&mut notices, |n| matches!(n, BoardNotice::BoardChanged { program_id: 2, .. }))
            .await;

        assert_eq!(handle.snapshot().revision, revision + 1);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_page_level() {
        let service = GatedService::new(vec![program(1, "A", Stage::RecordingPrep)]);
        service
            .inner
            .fail_fetches(Some(RemoteError::new("42501", "permission denied")));
        let (notices, _rx) = broadcast::channel(16);
        let (handle, _task) = BoardController::spawn(service.clone(), None, notices);

        let snapshot = handle.loaded().await;
        assert!(!snapshot.loaded);
        assert!(snapshot.load_error.unwrap().contains("permission denied"));

        service.inner.fail_fetches(None);
        assert_eq!(handle.refresh().await, Ok(1));
        let snapshot = handle.snapshot();
        assert!(snapshot.loaded);
        assert!(snapshot.load_error.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_closes_handle() {
        let service = GatedService::new(vec![]);
        let (notices, _rx) = broadcast::channel(16);
        let (handle, task) = BoardController::spawn(service, None, notices);
        handle.shutdown().await;
        task.await.unwrap();
        assert_eq!(handle.refresh().await, Err(BoardError::ControllerClosed));
    }

    /// store = [{id:1, title:"A", stage:収録準備中}], move to 編集中, the update
    /// fails with "network": the board keeps 収録準備中 and surfaces the error.
    #[tokio::test]
    async fn test_rejected_move_scenario() {
        let service = Arc::new(MemoryService::with_programs(vec![program(1, "A", Stage::RecordingPrep)]));
        service.fail_mutations(Some(RemoteError::transport("network")));
        let feed = service.subscribe().await.unwrap();
        let (notices, mut rx) = broadcast::channel(16);
        let (handle, _task) = BoardController::spawn(service.clone(), Some(feed), notices);
        handle.loaded().await;

        handle.move_program(1, Stage::Editing).await.unwrap();
        let notice = wait_for_notice(&mut rx, |n| matches!(n, BoardNotice::Error { .. })).await;
        match notice {
            BoardNotice::Error { kind, message } => {
                assert_eq!(kind, "mutation");
                assert!(message.contains("network"));
            }
            other => panic!("unexpected notice {:?}", other),
        }
        assert_eq!(shown_stage(&handle, 1), Some(Stage::RecordingPrep));
    }
}
