//! Node-side protocol handler: persisted state, the applicator seam, and the
//! ACCEPTING/PREPARED state machine guarded by the fencing counter.

pub mod applicator;
pub mod server;
pub mod state;
pub mod store;

pub use applicator::{
    ApplicatorError, ChangeApplicator, PotentialApplicationResult, SettingsApplicator,
};
pub use server::NodeServer;
pub use state::{ChangeRecord, ChangeRequestState, ChangeResult, NodeMode, NodeState};
pub use store::{FileStateStore, InMemoryStateStore, NodeStateStore, STATE_FILE_NAME};

use crate::util::error::StateStoreError;
use thiserror::Error;
use uuid::Uuid;

/// Failure of a node operation that is not a protocol rejection.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("node state storage failed: {0}")]
    Storage(#[from] StateStoreError),
    #[error("applying change {change_uuid} failed: {source}")]
    Apply {
        change_uuid: Uuid,
        #[source]
        source: ApplicatorError,
    },
}
