use super::events::Consistency;

/// Per-node outcomes of one mutative phase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseTally {
    pub accepted: Vec<String>,
    pub failed: Vec<String>,
    pub other_client: Vec<String>,
    pub unacceptable: Vec<String>,
}

impl PhaseTally {
    pub fn all_accepted(&self) -> bool {
        self.failed.is_empty() && self.other_client.is_empty() && self.unacceptable.is_empty()
    }
}

/// Everything a run has learned so far, fed to the [`Decider`] predicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundState {
    pub discover_failed: bool,
    pub divergent: bool,
    /// Nodes found PREPARED during discovery.
    pub prepared_nodes: Vec<String>,
    pub other_client: bool,
    pub prepare: PhaseTally,
    pub takeover: PhaseTally,
    /// Commit or rollback outcomes, whichever the run ended with.
    pub finish: PhaseTally,
}

/// Pure decisions taken between phases. The change flow and the recovery
/// flow differ only in whether an in-flight change blocks the run.
pub trait Decider {
    fn requires_idle_cluster(&self) -> bool;

    fn is_discover_successful(&self, round: &RoundState) -> bool {
        !round.discover_failed && !round.divergent
    }

    fn is_whole_cluster_accepting(&self, round: &RoundState) -> bool {
        round.prepared_nodes.is_empty()
    }

    fn may_proceed_after_discovery(&self, round: &RoundState) -> bool {
        self.is_discover_successful(round)
            && !round.other_client
            && (!self.requires_idle_cluster() || self.is_whole_cluster_accepting(round))
    }

    fn should_proceed_to_commit(&self, round: &RoundState) -> bool {
        round.prepare.all_accepted()
    }

    fn is_takeover_successful(&self, round: &RoundState) -> bool {
        round.takeover.all_accepted()
    }

    fn final_consistency(&self, round: &RoundState) -> Consistency {
        if round.takeover.all_accepted() && round.finish.all_accepted() {
            Consistency::Consistent
        } else {
            Consistency::MayNeedRecovery
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ChangeDecider;

impl Decider for ChangeDecider {
    fn requires_idle_cluster(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryDecider;

impl Decider for RecoveryDecider {
    fn requires_idle_cluster(&self) -> bool {
        false
    }
}
