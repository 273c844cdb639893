use crate::remote::RemoteError;
use crate::types::ProgramId;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BoardError {
    /// Page-level: the board cannot be shown at all.
    #[error("Failed to load programs: {0}")]
    Fetch(RemoteError),

    /// Transient: the optimistic move has been rolled back.
    #[error("Failed to update stage of program {id}: {reason}")]
    StageUpdateFailed { id: ProgramId, reason: String },

    #[error("Program not found: {0}")]
    ProgramNotFound(ProgramId),

    #[error("A move for program {0} is still waiting for confirmation")]
    MoveInFlight(ProgramId),

    #[error("Board controller is not running")]
    ControllerClosed,
}

impl BoardError {
    /// Short machine-readable kind, used on the notice channel.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Fetch(_) => "fetch",
            Self::StageUpdateFailed { .. } => "mutation",
            Self::ProgramNotFound(_) => "not_found",
            Self::MoveInFlight(_) => "busy",
            Self::ControllerClosed => "closed",
        }
    }
}
