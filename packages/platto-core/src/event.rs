/// Change notifications pushed by the remote table.
use serde::{Deserialize, Serialize};

use crate::types::{Program, ProgramId};

/// A create/update/delete on the remote store.
///
/// Delivered in arrival order only: an event may be stale, duplicated, or
/// describe a state the local overlay has already moved past.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "record")]
pub enum ChangeEvent {
    Created(Program),
    Updated(Program),
    /// Carries the id of the row before deletion.
    Deleted(ProgramId),
}

impl ChangeEvent {
    pub fn program_id(&self) -> ProgramId {
        match self {
            Self::Created(p) | Self::Updated(p) => p.id,
            Self::Deleted(id) => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Updated(_) => "updated",
            Self::Deleted(_) => "deleted",
        }
    }
}

/// What a change feed yields.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedItem {
    Change(ChangeEvent),
    /// The feed can no longer vouch for incremental state (unknown event
    /// type, lagged receiver, reconnect). The consumer must refetch.
    Resync { reason: String },
}
