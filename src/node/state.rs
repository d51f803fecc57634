use crate::change::Change;
use crate::messages::{ChangeDetails, DiscoverResponse, MutationHeader};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque result data computed by the applicator at prepare time.
pub type ChangeResult = serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeMode {
    Accepting,
    Prepared,
}

impl fmt::Display for NodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeMode::Accepting => f.write_str("ACCEPTING"),
            NodeMode::Prepared => f.write_str("PREPARED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeRequestState {
    Prepared,
    Committed,
    RolledBack,
}

impl fmt::Display for ChangeRequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeRequestState::Prepared => f.write_str("PREPARED"),
            ChangeRequestState::Committed => f.write_str("COMMITTED"),
            ChangeRequestState::RolledBack => f.write_str("ROLLED_BACK"),
        }
    }
}

/// One entry of a node's append-only change history.
///
/// Commit and rollback append a new record for the same uuid; the creation
/// attribution is copied from the PREPARED record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub uuid: Uuid,
    pub version: u64,
    pub change: Change,
    pub state: ChangeRequestState,
    #[serde(default)]
    pub result: Option<ChangeResult>,
    pub creation_host: String,
    pub creation_user: String,
    pub creation_timestamp_ms: u64,
}

impl ChangeRecord {
    pub(crate) fn transitioned(&self, state: ChangeRequestState) -> Self {
        Self {
            state,
            ..self.clone()
        }
    }
}

/// Durable per-node protocol state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeState {
    pub mode: NodeMode,
    pub mutative_message_count: u64,
    pub last_mutation_host: Option<String>,
    pub last_mutation_user: Option<String>,
    pub last_mutation_timestamp_ms: Option<u64>,
    pub current_version: u64,
    pub highest_version: u64,
    #[serde(default)]
    pub history: Vec<ChangeRecord>,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            mode: NodeMode::Accepting,
            mutative_message_count: 0,
            last_mutation_host: None,
            last_mutation_user: None,
            last_mutation_timestamp_ms: None,
            current_version: 0,
            highest_version: 0,
            history: Vec::new(),
        }
    }
}

impl NodeState {
    pub fn latest_change(&self) -> Option<&ChangeRecord> {
        self.history.last()
    }

    /// Latest record of the change identified by `uuid`.
    pub fn change_state(&self, uuid: Uuid) -> Option<&ChangeRecord> {
        self.history.iter().rev().find(|record| record.uuid == uuid)
    }

    pub fn latest_committed(&self) -> Option<&ChangeRecord> {
        self.history
            .iter()
            .rev()
            .find(|record| record.state == ChangeRequestState::Committed)
    }

    /// The PREPARED record awaiting commit or rollback, if any.
    pub fn pending_change(&self) -> Option<&ChangeRecord> {
        match self.mode {
            NodeMode::Prepared => self
                .latest_change()
                .filter(|record| record.state == ChangeRequestState::Prepared),
            NodeMode::Accepting => None,
        }
    }

    pub fn contains_change(&self, uuid: Uuid) -> bool {
        self.history.iter().any(|record| record.uuid == uuid)
    }

    pub fn snapshot(&self) -> DiscoverResponse {
        DiscoverResponse {
            mode: self.mode,
            mutative_message_count: self.mutative_message_count,
            last_mutation_host: self.last_mutation_host.clone(),
            last_mutation_user: self.last_mutation_user.clone(),
            last_mutation_timestamp_ms: self.last_mutation_timestamp_ms,
            current_version: self.current_version,
            highest_version: self.highest_version,
            latest_change: self.latest_change().map(ChangeDetails::from),
            latest_committed_change: self.latest_committed().map(ChangeDetails::from),
        }
    }

    /// Records attribution and bumps the fencing counter by exactly one.
    pub(crate) fn stamp(&mut self, header: &MutationHeader) {
        self.mutative_message_count = self.mutative_message_count.saturating_add(1);
        self.last_mutation_host = Some(header.mutation_host.clone());
        self.last_mutation_user = Some(header.mutation_user.clone());
        self.last_mutation_timestamp_ms = Some(header.mutation_timestamp_ms);
    }
}
