use super::decider::{ChangeDecider, Decider, PhaseTally, RecoveryDecider, RoundState};
use super::divergence::{find_divergence, Divergence};
use super::endpoint::{EndpointError, NodeEndpoint};
use super::events::{Consistency, ProtocolEvent};
use super::receivers::ResultReceiver;
use super::sender::{FanOut, MessageSender};
use crate::analyzer::{classify, ClusterObservation, GlobalState, RecoveryDecision};
use crate::change::Change;
use crate::messages::{
    AcceptRejectResponse, CommitMessage, DiscoverResponse, MutationHeader, PrepareMessage,
    RejectionReason, RollbackMessage, TakeoverMessage,
};
use crate::node::NodeMode;
use log::{info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Source of the `*_timestamp_ms` values stamped on mutative messages.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Attribution recorded on every node this client mutates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIdentity {
    pub host: String,
    pub user: String,
}

impl ClientIdentity {
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AbortReason {
    DiscoveryFailure,
    Inconsistent,
    ConcurrentAccess,
    /// Recovery cannot pick between commit and rollback without a forced decision.
    UndecidedRecovery { state: GlobalState },
    /// The forced decision contradicts the only one that restores consistency.
    ConflictingDecision {
        state: GlobalState,
        forced: RecoveryDecision,
        required: RecoveryDecision,
    },
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::DiscoveryFailure => f.write_str("discovery failure"),
            AbortReason::Inconsistent => f.write_str("cluster inconsistent"),
            AbortReason::ConcurrentAccess => f.write_str("concurrent access by another client"),
            AbortReason::UndecidedRecovery { state } => {
                write!(f, "cluster is {state}: a forced commit or rollback is required")
            }
            AbortReason::ConflictingDecision {
                state,
                forced,
                required,
            } => write!(
                f,
                "cluster is {state}: a {required} is needed, a {forced} cannot be executed"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Done(Consistency),
    Aborted(AbortReason),
}

impl RunOutcome {
    pub fn is_consistent(&self) -> bool {
        matches!(self, RunOutcome::Done(Consistency::Consistent))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Takeover,
    Prepare(Uuid),
    Commit,
    Rollback,
}

impl Phase {
    fn start(self) -> ProtocolEvent {
        match self {
            Phase::Takeover => ProtocolEvent::StartTakeover,
            Phase::Prepare(change_uuid) => ProtocolEvent::StartPrepare { change_uuid },
            Phase::Commit => ProtocolEvent::StartCommit,
            Phase::Rollback => ProtocolEvent::StartRollback,
        }
    }

    fn end(self) -> ProtocolEvent {
        match self {
            Phase::Takeover => ProtocolEvent::EndTakeover,
            Phase::Prepare(_) => ProtocolEvent::EndPrepare,
            Phase::Commit => ProtocolEvent::EndCommit,
            Phase::Rollback => ProtocolEvent::EndRollback,
        }
    }

    fn accepted(self, node: String) -> ProtocolEvent {
        match self {
            Phase::Takeover => ProtocolEvent::TakeoverOk { node },
            Phase::Prepare(_) => ProtocolEvent::Prepared { node },
            Phase::Commit => ProtocolEvent::Committed { node },
            Phase::Rollback => ProtocolEvent::RolledBack { node },
        }
    }

    fn failed(self, node: String, reason: String) -> ProtocolEvent {
        match self {
            Phase::Takeover => ProtocolEvent::TakeoverFail { node, reason },
            Phase::Prepare(_) => ProtocolEvent::PrepareFail { node, reason },
            Phase::Commit => ProtocolEvent::CommitFail { node, reason },
            Phase::Rollback => ProtocolEvent::RollbackFail { node, reason },
        }
    }

    fn other_client(
        self,
        node: String,
        last_mutation_host: Option<String>,
        last_mutation_user: Option<String>,
    ) -> ProtocolEvent {
        match self {
            Phase::Takeover => ProtocolEvent::TakeoverOtherClient {
                node,
                last_mutation_host,
                last_mutation_user,
            },
            Phase::Prepare(_) => ProtocolEvent::PrepareOtherClient {
                node,
                last_mutation_host,
                last_mutation_user,
            },
            Phase::Commit => ProtocolEvent::CommitOtherClient {
                node,
                last_mutation_host,
                last_mutation_user,
            },
            Phase::Rollback => ProtocolEvent::RollbackOtherClient {
                node,
                last_mutation_host,
                last_mutation_user,
            },
        }
    }
}

/// Drives discovery, prepare/commit/rollback and takeover across every
/// endpoint of the cluster. One instance may run many flows; each run starts
/// from a fresh discovery.
pub struct ClientProcess {
    endpoints: Vec<Arc<dyn NodeEndpoint>>,
    identity: ClientIdentity,
    sender: MessageSender,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for ClientProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientProcess")
            .field("endpoints", &self.addresses())
            .field("identity", &self.identity)
            .field("fan_out", &self.sender.fan_out())
            .finish()
    }
}

impl ClientProcess {
    pub fn new(endpoints: Vec<Arc<dyn NodeEndpoint>>, identity: ClientIdentity) -> Self {
        Self {
            endpoints,
            identity,
            sender: MessageSender::new(FanOut::default()),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_fan_out(mut self, fan_out: FanOut) -> Self {
        self.sender = MessageSender::new(fan_out);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn addresses(&self) -> Vec<String> {
        self.endpoints
            .iter()
            .map(|endpoint| endpoint.address().to_string())
            .collect()
    }

    /// Runs both discovery passes without mutating anything. In-flight
    /// changes do not abort the run.
    pub fn try_discovery(
        &self,
        receiver: &mut dyn ResultReceiver,
    ) -> Result<BTreeMap<String, DiscoverResponse>, AbortReason> {
        let mut round = RoundState::default();
        let responses = self
            .discover(&RecoveryDecider, &mut round, receiver)
            .map_err(|reason| self.aborted("discovery", reason))?;
        Ok(self.addresses().into_iter().zip(responses).collect())
    }

    /// Prepares `change` on every node and commits it if all of them accept;
    /// otherwise rolls it back on the nodes that did.
    pub fn apply_change(&self, change: &Change, receiver: &mut dyn ResultReceiver) -> RunOutcome {
        let decider = ChangeDecider;
        let mut round = RoundState::default();
        info!(
            "event=change_start nodes={} summary=\"{}\"",
            self.endpoints.len(),
            change.summary()
        );
        let responses = match self.discover(&decider, &mut round, receiver) {
            Ok(responses) => responses,
            Err(reason) => return self.abort("change", reason),
        };

        let version = responses
            .iter()
            .map(|response| response.highest_version)
            .max()
            .unwrap_or(0)
            + 1;
        let change_uuid = Uuid::new_v4();
        let now = self.clock.now_ms();
        let everyone: Vec<usize> = (0..self.endpoints.len()).collect();
        let (tally, prepared) =
            self.run_phase(Phase::Prepare(change_uuid), &everyone, receiver, |idx, endpoint| {
                endpoint.prepare(&PrepareMessage {
                    header: self.header(responses[idx].mutative_message_count, now),
                    change_uuid,
                    version,
                    change: change.clone(),
                })
            });
        round.prepare = tally;

        let commit = decider.should_proceed_to_commit(&round);
        let closing = if commit { Phase::Commit } else { Phase::Rollback };
        if !prepared.is_empty() {
            let (tally, _) = self.run_phase(closing, &prepared, receiver, |idx, endpoint| {
                self.finish(
                    endpoint,
                    closing,
                    change_uuid,
                    self.header(responses[idx].mutative_message_count + 1, now),
                )
            });
            round.finish = tally;
        }

        let consistency = decider.final_consistency(&round);
        receiver.on_event(&ProtocolEvent::Done { consistency });
        info!(
            "event=change_done change_uuid={} version={} committed={} consistency={}",
            change_uuid, version, commit, consistency
        );
        RunOutcome::Done(consistency)
    }

    /// Completes a change left PREPARED on some nodes.
    ///
    /// `expected_node_count` is the size of the whole cluster; nodes missing
    /// from this client's endpoints count as unreachable when deciding.
    /// `forced` overrides the decision derived from the cluster state.
    pub fn try_recovery(
        &self,
        receiver: &mut dyn ResultReceiver,
        expected_node_count: usize,
        forced: Option<RecoveryDecision>,
    ) -> RunOutcome {
        let decider = RecoveryDecider;
        let mut round = RoundState::default();
        info!(
            "event=recovery_start nodes={} expected_node_count={} forced={}",
            self.endpoints.len(),
            expected_node_count,
            forced.map_or_else(|| "-".to_string(), |decision| decision.to_string())
        );
        let responses = match self.discover(&decider, &mut round, receiver) {
            Ok(responses) => responses,
            Err(reason) => return self.abort("recovery", reason),
        };

        if decider.is_whole_cluster_accepting(&round) {
            receiver.on_event(&ProtocolEvent::Done {
                consistency: Consistency::Consistent,
            });
            info!("event=recovery_done action=none consistency=CONSISTENT");
            return RunOutcome::Done(Consistency::Consistent);
        }

        let observation = ClusterObservation {
            responses: self
                .addresses()
                .into_iter()
                .zip(responses.iter().cloned())
                .collect(),
            unreachable: expected_node_count.saturating_sub(self.endpoints.len()),
            ..ClusterObservation::default()
        };
        let state = classify(&observation);
        let decision = match (forced, state.required_decision()) {
            (Some(forced), Some(required)) if forced != required => {
                let reason = AbortReason::ConflictingDecision {
                    state,
                    forced,
                    required,
                };
                return self.abort("recovery", reason);
            }
            (Some(forced), _) => forced,
            (None, _) => match state.default_decision() {
                Some(decision) => decision,
                None => {
                    receiver.on_event(&ProtocolEvent::CannotDecideOverCommitOrRollback);
                    return self.abort("recovery", AbortReason::UndecidedRecovery { state });
                }
            },
        };
        info!(
            "event=recovery_decision state={} decision={}",
            state, decision
        );

        let now = self.clock.now_ms();
        let everyone: Vec<usize> = (0..self.endpoints.len()).collect();
        let (tally, taken_over) =
            self.run_phase(Phase::Takeover, &everyone, receiver, |idx, endpoint| {
                endpoint.takeover(&TakeoverMessage {
                    header: self.header(responses[idx].mutative_message_count, now),
                })
            });
        round.takeover = tally;

        let pending: Vec<usize> = taken_over
            .into_iter()
            .filter(|idx| responses[*idx].mode == NodeMode::Prepared)
            .collect();
        let closing = match decision {
            RecoveryDecision::Commit => Phase::Commit,
            RecoveryDecision::Rollback => Phase::Rollback,
        };
        if !pending.is_empty() {
            let (tally, _) = self.run_phase(closing, &pending, receiver, |idx, endpoint| {
                let response = &responses[idx];
                let change_uuid = response
                    .latest_change_uuid()
                    .ok_or_else(|| {
                        EndpointError::unreachable(endpoint.address(), "no pending change")
                    })?;
                self.finish(
                    endpoint,
                    closing,
                    change_uuid,
                    self.header(response.mutative_message_count + 1, now),
                )
            });
            round.finish = tally;
        }

        let consistency = decider.final_consistency(&round);
        receiver.on_event(&ProtocolEvent::Done { consistency });
        info!(
            "event=recovery_done state={} decision={} consistency={}",
            state, decision, consistency
        );
        RunOutcome::Done(consistency)
    }

    fn header(&self, expected_mutative_message_count: u64, now: u64) -> MutationHeader {
        MutationHeader::new(
            expected_mutative_message_count,
            &self.identity.host,
            &self.identity.user,
            now,
        )
    }

    fn finish(
        &self,
        endpoint: &dyn NodeEndpoint,
        phase: Phase,
        change_uuid: Uuid,
        header: MutationHeader,
    ) -> Result<AcceptRejectResponse, EndpointError> {
        match phase {
            Phase::Rollback => endpoint.rollback(&RollbackMessage {
                header,
                change_uuid,
            }),
            _ => endpoint.commit(&CommitMessage {
                header,
                change_uuid,
            }),
        }
    }

    fn discover(
        &self,
        decider: &dyn Decider,
        round: &mut RoundState,
        receiver: &mut dyn ResultReceiver,
    ) -> Result<Vec<DiscoverResponse>, AbortReason> {
        if self.endpoints.is_empty() {
            round.discover_failed = true;
            return Err(AbortReason::DiscoveryFailure);
        }
        let nodes = self.addresses();
        receiver.on_event(&ProtocolEvent::StartDiscovery {
            nodes: nodes.clone(),
        });
        let results = self
            .sender
            .send(&self.endpoints, |_, endpoint| endpoint.discover());
        let mut responses = Vec::with_capacity(results.len());
        for (node, result) in nodes.iter().zip(results) {
            match result {
                Ok(response) => {
                    receiver.on_event(&ProtocolEvent::Discovered {
                        node: node.clone(),
                        response: Box::new(response.clone()),
                    });
                    responses.push(response);
                }
                Err(err) => {
                    round.discover_failed = true;
                    receiver.on_event(&ProtocolEvent::DiscoverFail {
                        node: node.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        if round.discover_failed {
            receiver.on_event(&ProtocolEvent::EndDiscovery);
            return Err(AbortReason::DiscoveryFailure);
        }

        match find_divergence(nodes.iter().map(String::as_str).zip(responses.iter())) {
            Some(Divergence::Inconsistent {
                change_uuid,
                committed_on,
                rolled_back_on,
            }) => {
                round.divergent = true;
                receiver.on_event(&ProtocolEvent::DiscoverClusterInconsistent {
                    change_uuid,
                    committed_on,
                    rolled_back_on,
                });
            }
            Some(Divergence::Desynchronized { last_committed }) => {
                round.divergent = true;
                receiver.on_event(&ProtocolEvent::DiscoverClusterDesynchronized {
                    last_committed,
                });
            }
            None => {}
        }

        for (node, response) in nodes.iter().zip(responses.iter()) {
            if response.mode != NodeMode::Prepared {
                continue;
            }
            round.prepared_nodes.push(node.clone());
            if let Some(latest) = &response.latest_change {
                receiver.on_event(&ProtocolEvent::DiscoverAlreadyPrepared {
                    node: node.clone(),
                    change_uuid: latest.uuid,
                    creation_host: latest.creation_host.clone(),
                    creation_user: latest.creation_user.clone(),
                });
            }
        }
        receiver.on_event(&ProtocolEvent::EndDiscovery);

        if !decider.is_discover_successful(round) {
            return Err(AbortReason::Inconsistent);
        }
        if !decider.may_proceed_after_discovery(round) {
            return Err(AbortReason::ConcurrentAccess);
        }

        receiver.on_event(&ProtocolEvent::StartSecondDiscovery);
        let results = self
            .sender
            .send(&self.endpoints, |_, endpoint| endpoint.discover());
        for ((node, first), result) in nodes.iter().zip(responses.iter()).zip(results) {
            match result {
                Ok(second) if second.mutative_message_count == first.mutative_message_count => {
                    receiver.on_event(&ProtocolEvent::DiscoverRepeated { node: node.clone() });
                }
                Ok(second) => {
                    round.other_client = true;
                    receiver.on_event(&ProtocolEvent::DiscoverOtherClient {
                        node: node.clone(),
                        last_mutation_host: second.last_mutation_host,
                        last_mutation_user: second.last_mutation_user,
                    });
                }
                Err(err) => {
                    round.discover_failed = true;
                    receiver.on_event(&ProtocolEvent::DiscoverFail {
                        node: node.clone(),
                        reason: err.to_string(),
                    });
                }
            }
        }
        receiver.on_event(&ProtocolEvent::EndSecondDiscovery);

        if round.discover_failed {
            return Err(AbortReason::DiscoveryFailure);
        }
        if round.other_client {
            return Err(AbortReason::ConcurrentAccess);
        }
        Ok(responses)
    }

    /// Sends one phase to `targets` (indices into the endpoint list) and
    /// returns the tally plus the indices that accepted.
    fn run_phase<F>(
        &self,
        phase: Phase,
        targets: &[usize],
        receiver: &mut dyn ResultReceiver,
        call: F,
    ) -> (PhaseTally, Vec<usize>)
    where
        F: Fn(usize, &dyn NodeEndpoint) -> Result<AcceptRejectResponse, EndpointError> + Sync,
    {
        receiver.on_event(&phase.start());
        let subset: Vec<Arc<dyn NodeEndpoint>> = targets
            .iter()
            .map(|idx| Arc::clone(&self.endpoints[*idx]))
            .collect();
        let results = self
            .sender
            .send(&subset, |local, endpoint| call(targets[local], endpoint));

        let mut tally = PhaseTally::default();
        let mut accepted = Vec::new();
        for ((idx, endpoint), result) in targets.iter().zip(subset.iter()).zip(results) {
            let node = endpoint.address().to_string();
            let event = match result {
                Ok(AcceptRejectResponse::Accepted) => {
                    accepted.push(*idx);
                    tally.accepted.push(node.clone());
                    phase.accepted(node)
                }
                Ok(AcceptRejectResponse::Rejected(rejection)) => match rejection.reason {
                    RejectionReason::StaleFencingToken { .. } => {
                        tally.other_client.push(node.clone());
                        phase.other_client(
                            node,
                            rejection.last_mutation_host,
                            rejection.last_mutation_user,
                        )
                    }
                    RejectionReason::Unacceptable { message }
                        if matches!(phase, Phase::Prepare(_)) =>
                    {
                        tally.unacceptable.push(node.clone());
                        ProtocolEvent::PrepareChangeUnacceptable {
                            node,
                            rejection: message,
                        }
                    }
                    reason => {
                        tally.failed.push(node.clone());
                        phase.failed(node, reason.to_string())
                    }
                },
                Err(err) => {
                    tally.failed.push(node.clone());
                    phase.failed(node, err.to_string())
                }
            };
            receiver.on_event(&event);
        }
        receiver.on_event(&phase.end());
        (tally, accepted)
    }

    fn abort(&self, flow: &str, reason: AbortReason) -> RunOutcome {
        RunOutcome::Aborted(self.aborted(flow, reason))
    }

    fn aborted(&self, flow: &str, reason: AbortReason) -> AbortReason {
        warn!("event=run_aborted flow={} reason=\"{}\"", flow, reason);
        reason
    }
}
