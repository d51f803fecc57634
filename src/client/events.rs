use crate::messages::DiscoverResponse;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Final classification of a run that got past discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Consistency {
    Consistent,
    MayNeedRecovery,
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Consistency::Consistent => f.write_str("CONSISTENT"),
            Consistency::MayNeedRecovery => f.write_str("MAY_NEED_RECOVERY"),
        }
    }
}

/// Everything the client process reports while it runs, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProtocolEvent {
    StartDiscovery {
        nodes: Vec<String>,
    },
    Discovered {
        node: String,
        response: Box<DiscoverResponse>,
    },
    DiscoverFail {
        node: String,
        reason: String,
    },
    DiscoverAlreadyPrepared {
        node: String,
        change_uuid: Uuid,
        creation_host: String,
        creation_user: String,
    },
    /// The same change is COMMITTED on some nodes and ROLLED_BACK on others.
    DiscoverClusterInconsistent {
        change_uuid: Uuid,
        committed_on: Vec<String>,
        rolled_back_on: Vec<String>,
    },
    /// ACCEPTING nodes disagree on their latest committed change.
    DiscoverClusterDesynchronized {
        last_committed: BTreeMap<String, Option<Uuid>>,
    },
    EndDiscovery,

    StartSecondDiscovery,
    DiscoverRepeated {
        node: String,
    },
    DiscoverOtherClient {
        node: String,
        last_mutation_host: Option<String>,
        last_mutation_user: Option<String>,
    },
    EndSecondDiscovery,

    StartTakeover,
    TakeoverOk {
        node: String,
    },
    TakeoverFail {
        node: String,
        reason: String,
    },
    TakeoverOtherClient {
        node: String,
        last_mutation_host: Option<String>,
        last_mutation_user: Option<String>,
    },
    EndTakeover,

    StartPrepare {
        change_uuid: Uuid,
    },
    Prepared {
        node: String,
    },
    PrepareFail {
        node: String,
        reason: String,
    },
    PrepareOtherClient {
        node: String,
        last_mutation_host: Option<String>,
        last_mutation_user: Option<String>,
    },
    /// The node's applicator refused the change; `rejection` is its text verbatim.
    PrepareChangeUnacceptable {
        node: String,
        rejection: String,
    },
    EndPrepare,

    StartCommit,
    Committed {
        node: String,
    },
    CommitFail {
        node: String,
        reason: String,
    },
    CommitOtherClient {
        node: String,
        last_mutation_host: Option<String>,
        last_mutation_user: Option<String>,
    },
    EndCommit,

    StartRollback,
    RolledBack {
        node: String,
    },
    RollbackFail {
        node: String,
        reason: String,
    },
    RollbackOtherClient {
        node: String,
        last_mutation_host: Option<String>,
        last_mutation_user: Option<String>,
    },
    EndRollback,

    CannotDecideOverCommitOrRollback,
    Done {
        consistency: Consistency,
    },
}

impl ProtocolEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolEvent::StartDiscovery { .. } => "start_discovery",
            ProtocolEvent::Discovered { .. } => "discovered",
            ProtocolEvent::DiscoverFail { .. } => "discover_fail",
            ProtocolEvent::DiscoverAlreadyPrepared { .. } => "discover_already_prepared",
            ProtocolEvent::DiscoverClusterInconsistent { .. } => "discover_cluster_inconsistent",
            ProtocolEvent::DiscoverClusterDesynchronized { .. } => {
                "discover_cluster_desynchronized"
            }
            ProtocolEvent::EndDiscovery => "end_discovery",
            ProtocolEvent::StartSecondDiscovery => "start_second_discovery",
            ProtocolEvent::DiscoverRepeated { .. } => "discover_repeated",
            ProtocolEvent::DiscoverOtherClient { .. } => "discover_other_client",
            ProtocolEvent::EndSecondDiscovery => "end_second_discovery",
            ProtocolEvent::StartTakeover => "start_takeover",
            ProtocolEvent::TakeoverOk { .. } => "takeover_ok",
            ProtocolEvent::TakeoverFail { .. } => "takeover_fail",
            ProtocolEvent::TakeoverOtherClient { .. } => "takeover_other_client",
            ProtocolEvent::EndTakeover => "end_takeover",
            ProtocolEvent::StartPrepare { .. } => "start_prepare",
            ProtocolEvent::Prepared { .. } => "prepared",
            ProtocolEvent::PrepareFail { .. } => "prepare_fail",
            ProtocolEvent::PrepareOtherClient { .. } => "prepare_other_client",
            ProtocolEvent::PrepareChangeUnacceptable { .. } => "prepare_change_unacceptable",
            ProtocolEvent::EndPrepare => "end_prepare",
            ProtocolEvent::StartCommit => "start_commit",
            ProtocolEvent::Committed { .. } => "committed",
            ProtocolEvent::CommitFail { .. } => "commit_fail",
            ProtocolEvent::CommitOtherClient { .. } => "commit_other_client",
            ProtocolEvent::EndCommit => "end_commit",
            ProtocolEvent::StartRollback => "start_rollback",
            ProtocolEvent::RolledBack { .. } => "rolled_back",
            ProtocolEvent::RollbackFail { .. } => "rollback_fail",
            ProtocolEvent::RollbackOtherClient { .. } => "rollback_other_client",
            ProtocolEvent::EndRollback => "end_rollback",
            ProtocolEvent::CannotDecideOverCommitOrRollback => {
                "cannot_decide_over_commit_or_rollback"
            }
            ProtocolEvent::Done { .. } => "done",
        }
    }

    /// The node a per-node event refers to.
    pub fn node(&self) -> Option<&str> {
        match self {
            ProtocolEvent::Discovered { node, .. }
            | ProtocolEvent::DiscoverFail { node, .. }
            | ProtocolEvent::DiscoverAlreadyPrepared { node, .. }
            | ProtocolEvent::DiscoverRepeated { node }
            | ProtocolEvent::DiscoverOtherClient { node, .. }
            | ProtocolEvent::TakeoverOk { node }
            | ProtocolEvent::TakeoverFail { node, .. }
            | ProtocolEvent::TakeoverOtherClient { node, .. }
            | ProtocolEvent::Prepared { node }
            | ProtocolEvent::PrepareFail { node, .. }
            | ProtocolEvent::PrepareOtherClient { node, .. }
            | ProtocolEvent::PrepareChangeUnacceptable { node, .. }
            | ProtocolEvent::Committed { node }
            | ProtocolEvent::CommitFail { node, .. }
            | ProtocolEvent::CommitOtherClient { node, .. }
            | ProtocolEvent::RolledBack { node }
            | ProtocolEvent::RollbackFail { node, .. }
            | ProtocolEvent::RollbackOtherClient { node, .. } => Some(node),
            _ => None,
        }
    }

    /// Failures and foreign mutations; used to pick the log level.
    pub fn is_problem(&self) -> bool {
        matches!(
            self,
            ProtocolEvent::DiscoverFail { .. }
                | ProtocolEvent::DiscoverAlreadyPrepared { .. }
                | ProtocolEvent::DiscoverClusterInconsistent { .. }
                | ProtocolEvent::DiscoverClusterDesynchronized { .. }
                | ProtocolEvent::DiscoverOtherClient { .. }
                | ProtocolEvent::TakeoverFail { .. }
                | ProtocolEvent::TakeoverOtherClient { .. }
                | ProtocolEvent::PrepareFail { .. }
                | ProtocolEvent::PrepareOtherClient { .. }
                | ProtocolEvent::PrepareChangeUnacceptable { .. }
                | ProtocolEvent::CommitFail { .. }
                | ProtocolEvent::CommitOtherClient { .. }
                | ProtocolEvent::RollbackFail { .. }
                | ProtocolEvent::RollbackOtherClient { .. }
                | ProtocolEvent::CannotDecideOverCommitOrRollback
                | ProtocolEvent::Done {
                    consistency: Consistency::MayNeedRecovery
                }
        )
    }
}
