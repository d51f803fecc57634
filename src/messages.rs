//! Request/response records exchanged between the client process and a node.
//!
//! Every mutative message carries a [`MutationHeader`]: the caller's view of
//! the node's fencing counter plus the attribution recorded on success.

use crate::change::Change;
use crate::node::{ChangeRecord, ChangeRequestState, ChangeResult, NodeMode};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationHeader {
    pub expected_mutative_message_count: u64,
    pub mutation_host: String,
    pub mutation_user: String,
    pub mutation_timestamp_ms: u64,
}

impl MutationHeader {
    pub fn new(
        expected_mutative_message_count: u64,
        mutation_host: impl Into<String>,
        mutation_user: impl Into<String>,
        mutation_timestamp_ms: u64,
    ) -> Self {
        Self {
            expected_mutative_message_count,
            mutation_host: mutation_host.into(),
            mutation_user: mutation_user.into(),
            mutation_timestamp_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrepareMessage {
    #[serde(flatten)]
    pub header: MutationHeader,
    pub change_uuid: Uuid,
    pub version: u64,
    pub change: Change,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMessage {
    #[serde(flatten)]
    pub header: MutationHeader,
    pub change_uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackMessage {
    #[serde(flatten)]
    pub header: MutationHeader,
    pub change_uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TakeoverMessage {
    #[serde(flatten)]
    pub header: MutationHeader,
}

/// Point-in-time view of one node, returned by `discover`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoverResponse {
    pub mode: NodeMode,
    pub mutative_message_count: u64,
    pub last_mutation_host: Option<String>,
    pub last_mutation_user: Option<String>,
    pub last_mutation_timestamp_ms: Option<u64>,
    pub current_version: u64,
    pub highest_version: u64,
    pub latest_change: Option<ChangeDetails>,
    pub latest_committed_change: Option<ChangeDetails>,
}

impl DiscoverResponse {
    pub fn latest_change_uuid(&self) -> Option<Uuid> {
        self.latest_change.as_ref().map(|details| details.uuid)
    }

    pub fn latest_change_state(&self) -> Option<ChangeRequestState> {
        self.latest_change.as_ref().map(|details| details.state)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeDetails {
    pub uuid: Uuid,
    pub state: ChangeRequestState,
    pub version: u64,
    pub change: Change,
    pub summary: String,
    pub result: Option<ChangeResult>,
    pub creation_host: String,
    pub creation_user: String,
    pub creation_timestamp_ms: u64,
}

impl From<&ChangeRecord> for ChangeDetails {
    fn from(record: &ChangeRecord) -> Self {
        Self {
            uuid: record.uuid,
            state: record.state,
            version: record.version,
            change: record.change.clone(),
            summary: record.change.summary(),
            result: record.result.clone(),
            creation_host: record.creation_host.clone(),
            creation_user: record.creation_user.clone(),
            creation_timestamp_ms: record.creation_timestamp_ms,
        }
    }
}

/// Closed set of reasons a node refuses a mutative message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    /// The caller's view of the fencing counter is stale: another client mutated the node.
    StaleFencingToken { expected: u64, actual: u64 },
    WrongMode { expected: NodeMode, actual: NodeMode },
    VersionMismatch { proposed: u64, highest: u64 },
    DuplicateChange { change_uuid: Uuid },
    UnknownChange { change_uuid: Uuid },
    /// The change applicator refused the change; the text is surfaced verbatim.
    Unacceptable { message: String },
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectionReason::StaleFencingToken { expected, actual } => write!(
                f,
                "expectedMutativeMessageCount ({expected}) != actualMutativeMessageCount ({actual})"
            ),
            RejectionReason::WrongMode { expected, actual } => {
                write!(f, "expected mode: {expected}, was: {actual}")
            }
            RejectionReason::VersionMismatch { proposed, highest } => write!(
                f,
                "wrong change version number {proposed}: highest known version is {highest}"
            ),
            RejectionReason::DuplicateChange { change_uuid } => {
                write!(f, "change {change_uuid} already exists")
            }
            RejectionReason::UnknownChange { change_uuid } => {
                write!(f, "change {change_uuid} is not the pending change")
            }
            RejectionReason::Unacceptable { message } => f.write_str(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub reason: RejectionReason,
    pub last_mutation_host: Option<String>,
    pub last_mutation_user: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AcceptRejectResponse {
    Accepted,
    Rejected(Rejection),
}

impl AcceptRejectResponse {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AcceptRejectResponse::Accepted)
    }

    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            AcceptRejectResponse::Accepted => None,
            AcceptRejectResponse::Rejected(rejection) => Some(rejection),
        }
    }
}
