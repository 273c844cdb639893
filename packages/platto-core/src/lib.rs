/// Platto core: the production board model, its optimistic stage moves and
/// the reconciliation loop that keeps them consistent with the remote table.
pub mod controller;
pub mod error;
pub mod event;
pub mod memory;
pub mod overlay;
pub mod projection;
pub mod remote;
pub mod search;
pub mod session;
pub mod store;
pub mod types;

pub use controller::{BoardController, BoardNotice, BoardSnapshot, ControllerHandle};
pub use error::BoardError;
pub use event::{ChangeEvent, FeedItem};
pub use projection::{BoardFilter, BoardView};
pub use remote::{ProgramService, RemoteError, Subscription};
pub use session::{Session, SessionHandle, SessionSupervisor};
pub use types::{NewProgram, Program, ProgramId, ProgramPatch, Stage};
