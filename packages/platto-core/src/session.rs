/// Session gating for the board.
///
/// A supervisor task follows sign-in/sign-out events. On sign-in it opens
/// the change feed, then spawns a controller (which does the initial fetch).
/// On sign-out or a new sign-in it shuts the running controller down and
/// waits for it, so the old feed is released before anything new starts.
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::controller::{BoardController, BoardNotice, ControllerHandle};
use crate::remote::ProgramService;

const NOTICE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn(Session),
    SignedOut,
}

/// Builds the program service for a session (per-user credentials).
pub trait ServiceFactory: Send + Sync {
    fn service_for(&self, session: &Session) -> Arc<dyn ProgramService>;
}

impl<F> ServiceFactory for F
where
    F: Fn(&Session) -> Arc<dyn ProgramService> + Send + Sync,
{
    fn service_for(&self, session: &Session) -> Arc<dyn ProgramService> {
        self(session)
    }
}

#[derive(Clone)]
pub struct SessionHandle {
    events: Arc<watch::Sender<SessionEvent>>,
    current: Arc<watch::Sender<Option<ControllerHandle>>>,
    notices: broadcast::Sender<BoardNotice>,
}

impl SessionHandle {
    /// Start (or restart) the board for `session`. Repeating the current
    /// session is a no-op.
    pub fn sign_in(&self, session: Session) {
        let next = SessionEvent::SignedIn(session);
        let current = &self.current;
        self.events.send_if_modified(|event| {
            if *event == next {
                return false;
            }
            // Readers must not see the old board once a new session is requested.
            current.send_replace(None);
            *event = next;
            true
        });
    }

    pub fn sign_out(&self) {
        let current = &self.current;
        self.events.send_if_modified(|event| {
            if *event == SessionEvent::SignedOut {
                return false;
            }
            current.send_replace(None);
            *event = SessionEvent::SignedOut;
            true
        });
    }

    pub fn session(&self) -> Option<Session> {
        match &*self.events.borrow() {
            SessionEvent::SignedIn(session) => Some(session.clone()),
            SessionEvent::SignedOut => None,
        }
    }

    /// The running controller, if signed in and started.
    pub fn controller(&self) -> Option<ControllerHandle> {
        self.current.borrow().clone()
    }

    /// Wait until a controller for the current session is running.
    pub async fn wait_for_controller(&self) -> Option<ControllerHandle> {
        let mut rx = self.current.subscribe();
        let result = rx.wait_for(|c| c.is_some()).await.ok().and_then(|c| (*c).clone());
        result
    }

    pub fn notices(&self) -> broadcast::Receiver<BoardNotice> {
        self.notices.subscribe()
    }
}

pub struct SessionSupervisor;

impl SessionSupervisor {
    /// Spawn the supervisor in the signed-out state. It stops once every
    /// `SessionHandle` is dropped.
    pub fn spawn(factory: Arc<dyn ServiceFactory>) -> (SessionHandle, JoinHandle<()>) {
        let (events, events_rx) = watch::channel(SessionEvent::SignedOut);
        let (current, _) = watch::channel(None);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);

        let handle = SessionHandle {
            events: Arc::new(events),
            current: Arc::new(current),
            notices: notices.clone(),
        };
        let task = tokio::spawn(supervise(
            factory,
            events_rx,
            Arc::clone(&handle.current),
            notices,
        ));
        (handle, task)
    }
}

struct Running {
    handle: ControllerHandle,
    task: JoinHandle<()>,
}

async fn supervise(
    factory: Arc<dyn ServiceFactory>,
    mut events: watch::Receiver<SessionEvent>,
    current: Arc<watch::Sender<Option<ControllerHandle>>>,
    notices: broadcast::Sender<BoardNotice>,
) {
    let mut running: Option<Running> = None;

    loop {
        let event = events.borrow_and_update().clone();

        if let Some(old) = running.take() {
            current.send_replace(None);
            stop(old, &notices).await;
        }

        if let SessionEvent::SignedIn(session) = event {
            let started = start(factory.as_ref(), &session, &notices).await;
            // A newer event may have arrived while starting; it wins.
            if events.has_changed().unwrap_or(false) {
                running = Some(started);
                continue;
            }
            current.send_replace(Some(started.handle.clone()));
            running = Some(started);
        }

        if events.changed().await.is_err() {
            break;
        }
    }

    current.send_replace(None);
    if let Some(old) = running.take() {
        stop(old, &notices).await;
    }
    log::debug!(target: "platto.session", "Session supervisor stopped");
}

async fn start(
    factory: &dyn ServiceFactory,
    session: &Session,
    notices: &broadcast::Sender<BoardNotice>,
) -> Running {
    log::info!(target: "platto.session", "Starting board for user {}", session.user_id);
    let service = factory.service_for(session);

    // Subscribe first. A feed that is live at once queues events from the
    // initial fetch on; one that joins later sends a Resync once joined.
    let feed = match service.subscribe().await {
        Ok(feed) => Some(feed),
        Err(e) => {
            log::warn!(target: "platto.session", "Change feed unavailable: {}", e);
            let _ = notices.send(BoardNotice::Error {
                kind: "feed".to_string(),
                message: e.to_string(),
            });
            None
        }
    };

    let (handle, task) = BoardController::spawn(service, feed, notices.clone());
    let _ = notices.send(BoardNotice::SessionStarted {
        user_id: session.user_id.clone(),
    });
    Running { handle, task }
}

async fn stop(old: Running, notices: &broadcast::Sender<BoardNotice>) {
    old.handle.shutdown().await;
    if let Err(e) = old.task.await {
        log::error!(target: "platto.session", "Board controller task failed: {}", e);
    }
    let _ = notices.send(BoardNotice::SessionEnded);
    log::info!(target: "platto.session", "Board stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryService;
    use crate::types::fixtures::program;
    use crate::types::Stage;
    use std::time::Duration;

    fn session(user: &str) -> Session {
        Session {
            user_id: user.to_string(),
            email: None,
            access_token: format!("token-{}", user),
        }
    }

    fn setup() -> (Arc<MemoryService>, SessionHandle) {
        let service = Arc::new(MemoryService::with_programs(vec![program(1, "A", Stage::Editing)]));
        let shared = Arc::clone(&service);
        let factory = move |_: &Session| -> Arc<dyn ProgramService> { shared.clone() };
        let (handle, _task) = SessionSupervisor::spawn(Arc::new(factory));
        (service, handle)
    }

    async fn eventually<F: Fn() -> bool>(cond: F) {
        for _ in 0..100 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_signed_out_has_no_board() {
        let (service, handle) = setup();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(handle.controller().is_none());
        assert!(handle.session().is_none());
        assert_eq!(service.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_sign_in_starts_board() {
        let (service, handle) = setup();
        handle.sign_in(session("u1"));

        let controller = handle.wait_for_controller().await.unwrap();
        let snapshot = controller.loaded().await;
        assert!(snapshot.loaded);
        assert_eq!(snapshot.programs.len(), 1);
        assert!(snapshot.feed_connected);
        assert_eq!(service.subscriber_count(), 1);
        assert_eq!(handle.session().unwrap().user_id, "u1");
    }

    #[tokio::test]
    async fn test_sign_out_releases_feed() {
        let (service, handle) = setup();
        let mut notices = handle.notices();
        handle.sign_in(session("u1"));
        handle.wait_for_controller().await.unwrap();

        handle.sign_out();
        assert!(handle.controller().is_none());

        loop {
            if let BoardNotice::SessionEnded = notices.recv().await.unwrap() {
                break;
            }
        }
        eventually(|| service.subscriber_count() == 0).await;
    }

    #[tokio::test]
    async fn test_switching_sessions_keeps_one_feed() {
        let (service, handle) = setup();
        handle.sign_in(session("u1"));
        let first = handle.wait_for_controller().await.unwrap();

        handle.sign_in(session("u2"));
        let second = handle.wait_for_controller().await.unwrap();
        second.loaded().await;

        assert!(first.refresh().await.is_err());
        eventually(|| service.subscriber_count() == 1).await;
    }

    #[test]
    fn test_session_serialization_hides_token() {
        let json = serde_json::to_value(session("u1")).unwrap();
        assert_eq!(json["userId"], "u1");
        assert!(json.get("accessToken").is_none());
    }
}
