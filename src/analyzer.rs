//! Cluster-wide classification of a discovery snapshot.
//!
//! The analyzer turns what discovery saw (plus which nodes are known to be
//! offline) into a [`GlobalState`], which in turn says whether a recovery run
//! should commit, roll back, or needs an operator decision.

use crate::client::divergence::{find_divergence, Divergence};
use crate::client::{ProtocolEvent, ResultReceiver};
use crate::messages::DiscoverResponse;
use crate::node::{ChangeRequestState, NodeMode};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Liveness {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GlobalState {
    Accepting,
    Prepared,
    Inconsistent,
    ConcurrentAccess,
    DiscoveryFailure,
    PartiallyPrepared,
    PartiallyCommitted,
    PartiallyRolledBack,
    Unknown,
    MaybePartiallyCommitted,
    MaybePartiallyRolledBack,
    MaybePrepared,
    MaybeUnknown,
}

impl fmt::Display for GlobalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GlobalState::Accepting => "ACCEPTING",
            GlobalState::Prepared => "PREPARED",
            GlobalState::Inconsistent => "INCONSISTENT",
            GlobalState::ConcurrentAccess => "CONCURRENT_ACCESS",
            GlobalState::DiscoveryFailure => "DISCOVERY_FAILURE",
            GlobalState::PartiallyPrepared => "PARTIALLY_PREPARED",
            GlobalState::PartiallyCommitted => "PARTIALLY_COMMITTED",
            GlobalState::PartiallyRolledBack => "PARTIALLY_ROLLED_BACK",
            GlobalState::Unknown => "UNKNOWN",
            GlobalState::MaybePartiallyCommitted => "MAYBE_PARTIALLY_COMMITTED",
            GlobalState::MaybePartiallyRolledBack => "MAYBE_PARTIALLY_ROLLED_BACK",
            GlobalState::MaybePrepared => "MAYBE_PREPARED",
            GlobalState::MaybeUnknown => "MAYBE_UNKNOWN",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryDecision {
    Commit,
    Rollback,
}

impl fmt::Display for RecoveryDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryDecision::Commit => f.write_str("commit"),
            RecoveryDecision::Rollback => f.write_str("rollback"),
        }
    }
}

impl GlobalState {
    /// The only decision that can restore consistency, when the state dictates one.
    pub fn required_decision(self) -> Option<RecoveryDecision> {
        match self {
            GlobalState::PartiallyCommitted => Some(RecoveryDecision::Commit),
            GlobalState::PartiallyPrepared | GlobalState::PartiallyRolledBack => {
                Some(RecoveryDecision::Rollback)
            }
            _ => None,
        }
    }

    /// Decision taken when the operator does not force one.
    pub fn default_decision(self) -> Option<RecoveryDecision> {
        match self {
            GlobalState::Prepared => Some(RecoveryDecision::Commit),
            other => other.required_decision(),
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            GlobalState::Accepting => "all nodes are accepting new changes",
            GlobalState::Prepared => {
                "all nodes are prepared for the same change; a commit or rollback is needed"
            }
            GlobalState::Inconsistent => {
                "nodes disagree on the outcome of a change; manual intervention is required"
            }
            GlobalState::ConcurrentAccess => {
                "another client mutated the cluster during discovery; retry later"
            }
            GlobalState::DiscoveryFailure => "some nodes could not be discovered",
            GlobalState::PartiallyPrepared => {
                "a change is prepared on only some nodes; a rollback is needed"
            }
            GlobalState::PartiallyCommitted => {
                "a change is committed on some nodes and prepared on the others; a commit is needed"
            }
            GlobalState::PartiallyRolledBack => {
                "a change is rolled back on some nodes and prepared on the others; a rollback is needed"
            }
            GlobalState::Unknown => "the cluster state cannot be classified",
            GlobalState::MaybePartiallyCommitted => {
                "a change is partially committed but some nodes are offline; force a commit or rollback"
            }
            GlobalState::MaybePartiallyRolledBack => {
                "a change is partially rolled back but some nodes are offline; force a commit or rollback"
            }
            GlobalState::MaybePrepared => {
                "a change is prepared on all reachable nodes but some nodes are offline; force a commit or rollback"
            }
            GlobalState::MaybeUnknown => {
                "the cluster state cannot be classified and some nodes are offline"
            }
        }
    }
}

/// Raw inputs to [`classify`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClusterObservation {
    pub responses: BTreeMap<String, DiscoverResponse>,
    /// Configured nodes that could not be queried.
    pub unreachable: usize,
    pub discover_failed: bool,
    pub inconsistent: bool,
    pub concurrent_access: bool,
}

/// Priority-ordered classification of a snapshot.
///
/// Online nodes without any change history take no part in the tally. An
/// unreachable node is counted as possibly prepared in the `Maybe*` rows.
pub fn classify(observation: &ClusterObservation) -> GlobalState {
    if observation.discover_failed {
        return GlobalState::DiscoveryFailure;
    }
    let split_outcome = matches!(
        find_divergence(
            observation
                .responses
                .iter()
                .map(|(node, response)| (node.as_str(), response))
        ),
        Some(Divergence::Inconsistent { .. })
    );
    if observation.inconsistent || split_outcome {
        return GlobalState::Inconsistent;
    }
    if observation.concurrent_access {
        return GlobalState::ConcurrentAccess;
    }

    let configured: Vec<&DiscoverResponse> = observation
        .responses
        .values()
        .filter(|response| response.latest_change.is_some())
        .collect();
    let unreachable = observation.unreachable;
    let total = configured.len() + unreachable;

    if unreachable == 0
        && configured
            .iter()
            .all(|response| response.mode == NodeMode::Accepting)
    {
        return GlobalState::Accepting;
    }

    let mut prepared = 0usize;
    let mut committed = 0usize;
    let mut rolled_back = 0usize;
    let mut uuids = BTreeSet::new();
    for latest in configured
        .iter()
        .filter_map(|response| response.latest_change.as_ref())
    {
        uuids.insert(latest.uuid);
        match latest.state {
            ChangeRequestState::Prepared => prepared += 1,
            ChangeRequestState::Committed => committed += 1,
            ChangeRequestState::RolledBack => rolled_back += 1,
        }
    }
    let maybe_prepared = prepared + unreachable;
    let single_change = uuids.len() == 1;

    if single_change && rolled_back == 0 && committed == 0 && prepared > 0 {
        if prepared >= total {
            return GlobalState::Prepared;
        }
        if unreachable > 0 {
            return GlobalState::MaybePrepared;
        }
    }
    if uuids.len() > 1 && prepared > 0 {
        return GlobalState::PartiallyPrepared;
    }
    if single_change && rolled_back == 0 && committed > 0 {
        if prepared > 0 && committed + prepared >= total {
            return GlobalState::PartiallyCommitted;
        }
        if unreachable > 0 && committed + maybe_prepared >= total {
            return GlobalState::MaybePartiallyCommitted;
        }
    }
    if single_change && rolled_back > 0 && committed == 0 {
        if prepared > 0 && rolled_back + prepared >= total {
            return GlobalState::PartiallyRolledBack;
        }
        if unreachable > 0 && rolled_back + maybe_prepared >= total {
            return GlobalState::MaybePartiallyRolledBack;
        }
    }

    if unreachable == 0 {
        GlobalState::Unknown
    } else {
        GlobalState::MaybeUnknown
    }
}

/// Receiver that accumulates discovery events into a [`ClusterObservation`].
#[derive(Debug, Clone)]
pub struct ConsistencyAnalyzer {
    liveness: BTreeMap<String, Liveness>,
    observation: ClusterObservation,
}

impl ConsistencyAnalyzer {
    /// `nodes` lists every configured node; offline ones count as unreachable.
    pub fn new<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = (S, Liveness)>,
        S: Into<String>,
    {
        let liveness: BTreeMap<String, Liveness> = nodes
            .into_iter()
            .map(|(name, liveness)| (name.into(), liveness))
            .collect();
        let unreachable = liveness
            .values()
            .filter(|liveness| **liveness == Liveness::Offline)
            .count();
        Self {
            liveness,
            observation: ClusterObservation {
                unreachable,
                ..ClusterObservation::default()
            },
        }
    }

    pub fn liveness(&self) -> &BTreeMap<String, Liveness> {
        &self.liveness
    }

    pub fn observation(&self) -> &ClusterObservation {
        &self.observation
    }

    pub fn global_state(&self) -> GlobalState {
        classify(&self.observation)
    }

    pub fn describe(&self) -> String {
        let state = self.global_state();
        format!("{}: {}", state, state.description())
    }
}

impl ResultReceiver for ConsistencyAnalyzer {
    fn on_event(&mut self, event: &ProtocolEvent) {
        match event {
            ProtocolEvent::Discovered { node, response } => {
                self.observation
                    .responses
                    .insert(node.clone(), (**response).clone());
            }
            ProtocolEvent::DiscoverFail { .. } => self.observation.discover_failed = true,
            ProtocolEvent::DiscoverClusterInconsistent { .. }
            | ProtocolEvent::DiscoverClusterDesynchronized { .. } => {
                self.observation.inconsistent = true
            }
            ProtocolEvent::DiscoverOtherClient { .. } => {
                self.observation.concurrent_access = true
            }
            _ => {}
        }
    }
}
