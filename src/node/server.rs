use super::applicator::{ChangeApplicator, PotentialApplicationResult};
use super::state::{ChangeRecord, ChangeRequestState, ChangeResult, NodeMode, NodeState};
use super::store::NodeStateStore;
use super::NodeError;
use crate::messages::{
    AcceptRejectResponse, CommitMessage, DiscoverResponse, MutationHeader, PrepareMessage,
    Rejection, RejectionReason, RollbackMessage, TakeoverMessage,
};
use crate::telemetry::{MetricsRegistry, MetricsSnapshot};
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Prepare,
    Commit,
    Rollback,
    Takeover,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Operation::Prepare => "prepare",
            Operation::Commit => "commit",
            Operation::Rollback => "rollback",
            Operation::Takeover => "takeover",
        }
    }
}

/// Protocol handler of a single node.
///
/// Mutative operations hold the write lock for their whole duration, so at
/// most one runs at a time; `discover` takes the read lock. A mutation is
/// computed on a copy of the state and only swapped in once it is persisted.
pub struct NodeServer {
    name: String,
    state: RwLock<NodeState>,
    store: Box<dyn NodeStateStore>,
    applicator: Arc<dyn ChangeApplicator>,
    metrics: Mutex<MetricsRegistry>,
}

impl fmt::Debug for NodeServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeServer")
            .field("name", &self.name)
            .field("state", &*self.state.read())
            .finish()
    }
}

impl NodeServer {
    /// Loads the persisted state, or initialises and persists a fresh one.
    pub fn open(
        name: impl Into<String>,
        store: Box<dyn NodeStateStore>,
        applicator: Arc<dyn ChangeApplicator>,
    ) -> Result<Self, NodeError> {
        let name = name.into();
        let state = match store.load()? {
            Some(state) => state,
            None => {
                let state = NodeState::default();
                store.persist(&state)?;
                state
            }
        };
        info!(
            "event=node_open node={} mode={} mutative_message_count={} current_version={}",
            name, state.mode, state.mutative_message_count, state.current_version
        );
        let mut metrics = MetricsRegistry::new(format!("concord.node.{name}"));
        record_gauges(&mut metrics, &state);
        Ok(Self {
            name,
            state: RwLock::new(state),
            store,
            applicator,
            metrics: Mutex::new(metrics),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn discover(&self) -> DiscoverResponse {
        let state = self.state.read();
        debug!(
            "event=node_discover node={} mode={} mutative_message_count={}",
            self.name, state.mode, state.mutative_message_count
        );
        state.snapshot()
    }

    pub fn prepare(&self, message: &PrepareMessage) -> Result<AcceptRejectResponse, NodeError> {
        let mut state = self.state.write();
        let op = Operation::Prepare;
        if let Some(reason) = check_fencing(&state, &message.header)
            .or_else(|| check_mode(&state, NodeMode::Accepting))
        {
            return Ok(self.reject(&state, op, reason));
        }
        if message.version <= state.highest_version {
            let reason = RejectionReason::VersionMismatch {
                proposed: message.version,
                highest: state.highest_version,
            };
            return Ok(self.reject(&state, op, reason));
        }
        if state.contains_change(message.change_uuid) {
            let reason = RejectionReason::DuplicateChange {
                change_uuid: message.change_uuid,
            };
            return Ok(self.reject(&state, op, reason));
        }

        let previous = state.latest_committed().and_then(|record| record.result.as_ref());
        let result = match self.applicator.try_apply(previous, &message.change) {
            PotentialApplicationResult::Allow(result) => result,
            PotentialApplicationResult::Reject(message) => {
                return Ok(self.reject(&state, op, RejectionReason::Unacceptable { message }));
            }
        };

        let mut next = state.clone();
        next.history.push(ChangeRecord {
            uuid: message.change_uuid,
            version: message.version,
            change: message.change.clone(),
            state: ChangeRequestState::Prepared,
            result: Some(result),
            creation_host: message.header.mutation_host.clone(),
            creation_user: message.header.mutation_user.clone(),
            creation_timestamp_ms: message.header.mutation_timestamp_ms,
        });
        next.mode = NodeMode::Prepared;
        next.highest_version = message.version;
        next.stamp(&message.header);
        self.install(&mut state, next, op)?;
        info!(
            "event=node_prepared node={} change_uuid={} version={} summary={}",
            self.name,
            message.change_uuid,
            message.version,
            message.change.summary()
        );
        Ok(AcceptRejectResponse::Accepted)
    }

    pub fn commit(&self, message: &CommitMessage) -> Result<AcceptRejectResponse, NodeError> {
        let mut state = self.state.write();
        let op = Operation::Commit;
        let pending = match self.check_pending(&state, &message.header, message.change_uuid) {
            Ok(pending) => pending,
            Err(reason) => return Ok(self.reject(&state, op, reason)),
        };

        if let Err(source) = self.applicator.apply(&pending.change) {
            warn!(
                "event=node_apply_failed node={} change_uuid={} error={}",
                self.name, message.change_uuid, source
            );
            self.metrics.lock().inc_counter("commit.failed", 1);
            return Err(NodeError::Apply {
                change_uuid: message.change_uuid,
                source,
            });
        }

        let mut next = state.clone();
        next.history
            .push(pending.transitioned(ChangeRequestState::Committed));
        next.current_version = pending.version;
        next.mode = NodeMode::Accepting;
        next.stamp(&message.header);
        self.install(&mut state, next, op)?;
        info!(
            "event=node_committed node={} change_uuid={} version={}",
            self.name, message.change_uuid, pending.version
        );
        Ok(AcceptRejectResponse::Accepted)
    }

    pub fn rollback(&self, message: &RollbackMessage) -> Result<AcceptRejectResponse, NodeError> {
        let mut state = self.state.write();
        let op = Operation::Rollback;
        let pending = match self.check_pending(&state, &message.header, message.change_uuid) {
            Ok(pending) => pending,
            Err(reason) => return Ok(self.reject(&state, op, reason)),
        };

        let mut next = state.clone();
        next.history
            .push(pending.transitioned(ChangeRequestState::RolledBack));
        next.mode = NodeMode::Accepting;
        next.stamp(&message.header);
        self.install(&mut state, next, op)?;
        info!(
            "event=node_rolled_back node={} change_uuid={} version={}",
            self.name, message.change_uuid, pending.version
        );
        Ok(AcceptRejectResponse::Accepted)
    }

    /// Reassigns mutation attribution without touching mode or pending change.
    pub fn takeover(&self, message: &TakeoverMessage) -> Result<AcceptRejectResponse, NodeError> {
        let mut state = self.state.write();
        let op = Operation::Takeover;
        if let Some(reason) = check_fencing(&state, &message.header) {
            return Ok(self.reject(&state, op, reason));
        }
        let mut next = state.clone();
        next.stamp(&message.header);
        self.install(&mut state, next, op)?;
        info!(
            "event=node_takeover node={} host={} user={}",
            self.name, message.header.mutation_host, message.header.mutation_user
        );
        Ok(AcceptRejectResponse::Accepted)
    }

    pub fn has_incomplete_change(&self) -> bool {
        self.state.read().mode == NodeMode::Prepared
    }

    pub fn change_state(&self, uuid: Uuid) -> Option<ChangeRecord> {
        self.state.read().change_state(uuid).cloned()
    }

    pub fn current_committed_result(&self) -> Option<ChangeResult> {
        self.state
            .read()
            .latest_committed()
            .and_then(|record| record.result.clone())
    }

    pub fn history(&self) -> Vec<ChangeRecord> {
        self.state.read().history.clone()
    }

    pub fn state(&self) -> NodeState {
        self.state.read().clone()
    }

    /// Discards all protocol state and persists a fresh ACCEPTING record.
    pub fn reset(&self) -> Result<(), NodeError> {
        let mut state = self.state.write();
        let fresh = NodeState::default();
        self.store.persist(&fresh)?;
        *state = fresh;
        record_gauges(&mut self.metrics.lock(), &state);
        warn!("event=node_reset node={}", self.name);
        Ok(())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.lock().snapshot()
    }

    fn check_pending(
        &self,
        state: &NodeState,
        header: &MutationHeader,
        change_uuid: Uuid,
    ) -> Result<ChangeRecord, RejectionReason> {
        if let Some(reason) =
            check_fencing(state, header).or_else(|| check_mode(state, NodeMode::Prepared))
        {
            return Err(reason);
        }
        state
            .pending_change()
            .filter(|pending| pending.uuid == change_uuid)
            .cloned()
            .ok_or(RejectionReason::UnknownChange { change_uuid })
    }

    fn reject(
        &self,
        state: &NodeState,
        op: Operation,
        reason: RejectionReason,
    ) -> AcceptRejectResponse {
        warn!(
            "event=node_rejected node={} op={} reason=\"{}\"",
            self.name,
            op.as_str(),
            reason
        );
        self.metrics
            .lock()
            .inc_counter(format!("{}.rejected", op.as_str()), 1);
        AcceptRejectResponse::Rejected(Rejection {
            reason,
            last_mutation_host: state.last_mutation_host.clone(),
            last_mutation_user: state.last_mutation_user.clone(),
        })
    }

    fn install(
        &self,
        current: &mut NodeState,
        next: NodeState,
        op: Operation,
    ) -> Result<(), NodeError> {
        if let Err(err) = self.store.persist(&next) {
            warn!(
                "event=node_persist_failed node={} op={} error={}",
                self.name,
                op.as_str(),
                err
            );
            self.metrics
                .lock()
                .inc_counter(format!("{}.failed", op.as_str()), 1);
            return Err(NodeError::Storage(err));
        }
        *current = next;
        let mut metrics = self.metrics.lock();
        metrics.inc_counter(format!("{}.accepted", op.as_str()), 1);
        record_gauges(&mut metrics, current);
        Ok(())
    }
}

fn check_fencing(state: &NodeState, header: &MutationHeader) -> Option<RejectionReason> {
    (header.expected_mutative_message_count != state.mutative_message_count).then(|| {
        RejectionReason::StaleFencingToken {
            expected: header.expected_mutative_message_count,
            actual: state.mutative_message_count,
        }
    })
}

fn check_mode(state: &NodeState, expected: NodeMode) -> Option<RejectionReason> {
    (state.mode != expected).then_some(RejectionReason::WrongMode {
        expected,
        actual: state.mode,
    })
}

fn record_gauges(metrics: &mut MetricsRegistry, state: &NodeState) {
    metrics.set_gauge("mutative_message_count", state.mutative_message_count);
    metrics.set_gauge("current_version", state.current_version);
    metrics.set_gauge("highest_version", state.highest_version);
}
