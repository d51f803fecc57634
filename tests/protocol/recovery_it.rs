use crate::cluster_support::{prepare_on, FlakyApplicator, TestCluster};
use concord::analyzer::{GlobalState, RecoveryDecision};
use concord::change::{Change, ChangeScope};
use concord::client::{AbortReason, Consistency, RecordingReceiver, RunOutcome};
use concord::node::{ChangeApplicator, ChangeRequestState, NodeMode, SettingsApplicator};
use std::sync::Arc;
use uuid::Uuid;

const NODES: [&str; 3] = ["node-a", "node-b", "node-c"];

/// Three nodes where the first commit on node-a fails, leaving it PREPARED
/// while node-b and node-c committed.
fn partially_committed() -> (TestCluster, Arc<FlakyApplicator>) {
    let flaky = Arc::new(FlakyApplicator::failing(1));
    let flaky_dyn: Arc<dyn ChangeApplicator> = flaky.clone();
    let settings_b: Arc<dyn ChangeApplicator> = Arc::new(SettingsApplicator::new());
    let settings_c: Arc<dyn ChangeApplicator> = Arc::new(SettingsApplicator::new());
    let cluster = TestCluster::with_applicators(vec![
        ("node-a", flaky_dyn),
        ("node-b", settings_b),
        ("node-c", settings_c),
    ]);

    let mut recorder = RecordingReceiver::new();
    let outcome = cluster.client().apply_change(
        &Change::set(ChangeScope::Cluster, "offheap", "512MB"),
        &mut recorder,
    );
    assert_eq!(outcome, RunOutcome::Done(Consistency::MayNeedRecovery));
    assert_eq!(recorder.count("commit_fail"), 1);
    assert_eq!(recorder.count("committed"), 2);
    assert_eq!(cluster.server("node-a").state().mode, NodeMode::Prepared);
    (cluster, flaky)
}

#[test]
fn failed_commit_is_completed_by_a_forced_commit() {
    let (cluster, flaky) = partially_committed();
    let pending = cluster
        .server("node-a")
        .state()
        .pending_change()
        .map(|record| record.uuid)
        .expect("pending change");

    let mut recorder = RecordingReceiver::new();
    let outcome = cluster
        .client()
        .try_recovery(&mut recorder, 3, Some(RecoveryDecision::Commit));

    assert_eq!(outcome, RunOutcome::Done(Consistency::Consistent));
    assert_eq!(recorder.count("takeover_ok"), 3);
    assert_eq!(recorder.count("committed"), 1);
    assert_eq!(recorder.count("discover_already_prepared"), 1);
    assert_eq!(flaky.applied().len(), 1);
    assert_eq!(
        cluster.server("node-a").change_state(pending).map(|record| record.state),
        Some(ChangeRequestState::Committed)
    );
    cluster.assert_uniform();
}

#[test]
fn partially_committed_cluster_commits_without_a_forced_decision() {
    let (cluster, _) = partially_committed();
    let outcome = cluster
        .client()
        .try_recovery(&mut RecordingReceiver::new(), 3, None);
    assert!(outcome.is_consistent());
    cluster.assert_uniform();
    assert!(cluster
        .servers
        .iter()
        .all(|server| server.state().current_version == 1));
}

#[test]
fn forced_rollback_of_a_partial_commit_is_refused() {
    let (cluster, _) = partially_committed();
    let before = cluster.server("node-a").state();

    let mut recorder = RecordingReceiver::new();
    let outcome = cluster
        .client()
        .try_recovery(&mut recorder, 3, Some(RecoveryDecision::Rollback));

    assert_eq!(
        outcome,
        RunOutcome::Aborted(AbortReason::ConflictingDecision {
            state: GlobalState::PartiallyCommitted,
            forced: RecoveryDecision::Rollback,
            required: RecoveryDecision::Commit,
        })
    );
    assert!(!recorder.contains("start_takeover"));
    assert_eq!(cluster.server("node-a").state(), before);
}

#[test]
fn fully_prepared_cluster_commits_by_default() {
    let cluster = TestCluster::new(&NODES);
    let uuid = Uuid::new_v4();
    let change = Change::activate("tc-1");
    for server in &cluster.servers {
        assert!(prepare_on(server, uuid, 1, &change).is_accepted());
    }

    let mut recorder = RecordingReceiver::new();
    let outcome = cluster.client().try_recovery(&mut recorder, 3, None);
    assert!(outcome.is_consistent());
    assert_eq!(recorder.count("committed"), 3);
    for server in &cluster.servers {
        let state = server.state();
        assert_eq!(state.mode, NodeMode::Accepting);
        assert_eq!(state.current_version, 1);
        // prepare, takeover, commit
        assert_eq!(state.mutative_message_count, 3);
    }
}

#[test]
fn offline_node_leaves_a_prepared_cluster_undecided() {
    let cluster = TestCluster::new(&NODES);
    let uuid = Uuid::new_v4();
    let change = Change::activate("tc-1");
    for name in ["node-a", "node-b"] {
        prepare_on(cluster.server(name), uuid, 1, &change);
    }
    let client = cluster.client_for(&["node-a", "node-b"]);

    let mut recorder = RecordingReceiver::new();
    let outcome = client.try_recovery(&mut recorder, 3, None);
    assert_eq!(
        outcome,
        RunOutcome::Aborted(AbortReason::UndecidedRecovery {
            state: GlobalState::MaybePrepared,
        })
    );
    assert!(recorder.contains("cannot_decide_over_commit_or_rollback"));
    assert!(!recorder.contains("start_takeover"));

    let mut recorder = RecordingReceiver::new();
    let outcome = client.try_recovery(&mut recorder, 3, Some(RecoveryDecision::Rollback));
    assert!(outcome.is_consistent());
    assert_eq!(recorder.count("rolled_back"), 2);
    for name in ["node-a", "node-b"] {
        assert_eq!(
            cluster.server(name).change_state(uuid).map(|record| record.state),
            Some(ChangeRequestState::RolledBack)
        );
    }
}

#[test]
fn change_prepared_on_one_node_is_rolled_back() {
    let cluster = TestCluster::new(&NODES);
    let client = cluster.client();
    assert!(client
        .apply_change(&Change::activate("tc-1"), &mut RecordingReceiver::new())
        .is_consistent());

    let stray = Uuid::new_v4();
    prepare_on(
        cluster.server("node-a"),
        stray,
        2,
        &Change::set(ChangeScope::Cluster, "k", "v"),
    );

    let mut recorder = RecordingReceiver::new();
    let outcome = client.try_recovery(&mut recorder, 3, None);
    assert!(outcome.is_consistent());
    assert_eq!(recorder.count("rolled_back"), 1);
    assert!(!recorder.contains("start_commit"));
    cluster.assert_uniform();
    assert_eq!(
        cluster.server("node-a").change_state(stray).map(|record| record.state),
        Some(ChangeRequestState::RolledBack)
    );
}
