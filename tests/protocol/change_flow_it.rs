use crate::cluster_support::{
    prepare_on, RejectingApplicator, TestCluster, CLIENT_HOST, CLIENT_USER, FIXED_NOW_MS,
};
use concord::change::{Change, ChangeScope};
use concord::client::{
    AbortReason, Consistency, FanOut, LoggingReceiver, MuxReceiver, ProtocolEvent,
    RecordingReceiver, RunOutcome,
};
use concord::node::{ChangeApplicator, ChangeRequestState, NodeMode, SettingsApplicator};
use std::sync::Arc;
use uuid::Uuid;

const NODES: [&str; 3] = ["node-a", "node-b", "node-c"];

#[test]
fn two_changes_commit_in_order_on_every_node() {
    let cluster = TestCluster::new(&NODES);
    let client = cluster.client();

    let mut recorder = RecordingReceiver::new();
    let first = client.apply_change(&Change::activate("tc-1"), &mut recorder);
    assert_eq!(first, RunOutcome::Done(Consistency::Consistent));
    assert_eq!(recorder.count("prepared"), 3);
    assert_eq!(recorder.count("committed"), 3);
    assert_eq!(recorder.consistency(), Some(Consistency::Consistent));

    let mut recorder = RecordingReceiver::new();
    let second = client.apply_change(
        &Change::set(ChangeScope::Cluster, "offheap", "1GB"),
        &mut recorder,
    );
    assert!(second.is_consistent());

    for server in &cluster.servers {
        let state = server.state();
        assert_eq!(state.mode, NodeMode::Accepting);
        assert_eq!(state.current_version, 2);
        assert_eq!(state.highest_version, 2);
        assert_eq!(state.mutative_message_count, 4);
        assert_eq!(state.history.len(), 4);
        let committed: Vec<u64> = state
            .history
            .iter()
            .filter(|record| record.state == ChangeRequestState::Committed)
            .map(|record| record.version)
            .collect();
        assert_eq!(committed, vec![1, 2]);
        let latest = state.latest_change().expect("latest");
        assert_eq!(latest.creation_host, CLIENT_HOST);
        assert_eq!(latest.creation_user, CLIENT_USER);
        assert_eq!(latest.creation_timestamp_ms, FIXED_NOW_MS);
    }
    cluster.assert_uniform();
    assert_eq!(
        cluster.server("node-b").current_committed_result(),
        Some(serde_json::json!({
            "cluster_name": "tc-1",
            "settings": { "cluster.offheap": "1GB" }
        }))
    );
}

#[test]
fn one_unacceptable_node_rolls_the_change_back_everywhere() {
    let settings = || -> Arc<dyn ChangeApplicator> { Arc::new(SettingsApplicator::new()) };
    let rejecting: Arc<dyn ChangeApplicator> = Arc::new(RejectingApplicator::new("fail"));
    let cluster = TestCluster::with_applicators(vec![
        ("node-a", settings()),
        ("node-b", rejecting),
        ("node-c", settings()),
    ]);
    let client = cluster.client();
    let mut recorder = RecordingReceiver::new();
    let outcome = client.apply_change(&Change::activate("tc-1"), &mut recorder);

    assert_eq!(outcome, RunOutcome::Done(Consistency::Consistent));
    assert_eq!(recorder.rejections(), vec!["fail"]);
    assert_eq!(recorder.count("prepared"), 2);
    assert_eq!(recorder.count("rolled_back"), 2);
    assert!(!recorder.contains("start_commit"));

    for name in ["node-a", "node-c"] {
        let state = cluster.server(name).state();
        assert_eq!(state.mode, NodeMode::Accepting);
        assert_eq!(state.current_version, 0);
        assert_eq!(state.highest_version, 1);
        assert_eq!(
            state.latest_change().map(|record| record.state),
            Some(ChangeRequestState::RolledBack)
        );
    }
    let rejecting = cluster.server("node-b").state();
    assert!(rejecting.history.is_empty());
    assert_eq!(rejecting.mutative_message_count, 0);
    assert!(cluster
        .servers
        .iter()
        .all(|server| server.current_committed_result().is_none()));
}

#[test]
fn applicator_rejections_are_checked_against_the_committed_result() {
    let cluster = TestCluster::new(&NODES);
    let client = cluster.client();
    assert!(client
        .apply_change(&Change::activate("tc-1"), &mut RecordingReceiver::new())
        .is_consistent());

    let mut recorder = RecordingReceiver::new();
    client.apply_change(&Change::activate("tc-2"), &mut recorder);
    assert_eq!(recorder.rejections().len(), 3);
    assert!(recorder
        .rejections()
        .iter()
        .all(|reason| *reason == "cluster already activated as tc-1"));
    assert!(!recorder.contains("start_rollback"));
    cluster.assert_uniform();
}

#[test]
fn unreachable_node_aborts_the_run_before_any_mutation() {
    let cluster = TestCluster::new(&NODES);
    cluster.set_down("node-c", true);
    let mut recorder = RecordingReceiver::new();
    let outcome = cluster
        .client()
        .apply_change(&Change::activate("tc-1"), &mut recorder);

    assert_eq!(outcome, RunOutcome::Aborted(AbortReason::DiscoveryFailure));
    assert_eq!(recorder.count("discover_fail"), 1);
    assert!(!recorder.contains("done"));
    assert!(cluster
        .servers
        .iter()
        .all(|server| server.discover().mutative_message_count == 0));
}

#[test]
fn pending_change_blocks_a_new_one() {
    let cluster = TestCluster::new(&NODES);
    let uuid = Uuid::new_v4();
    prepare_on(cluster.server("node-b"), uuid, 1, &Change::activate("tc-1"));

    let mut recorder = RecordingReceiver::new();
    let outcome = cluster
        .client()
        .apply_change(&Change::set(ChangeScope::Cluster, "k", "v"), &mut recorder);
    assert_eq!(outcome, RunOutcome::Aborted(AbortReason::ConcurrentAccess));
    let already_prepared: Vec<&ProtocolEvent> = recorder
        .events()
        .iter()
        .filter(|event| event.name() == "discover_already_prepared")
        .collect();
    assert_eq!(already_prepared.len(), 1);
    assert!(matches!(
        already_prepared[0],
        ProtocolEvent::DiscoverAlreadyPrepared { node, change_uuid, .. }
            if node == "node-b" && *change_uuid == uuid
    ));
    assert!(!recorder.contains("start_prepare"));
}

#[test]
fn concurrent_client_between_discoveries_aborts_the_run() {
    let cluster = TestCluster::new(&NODES);
    cluster.endpoint("node-a").intrude_once();

    let mut recorder = RecordingReceiver::new();
    let outcome = cluster
        .client()
        .apply_change(&Change::activate("tc-1"), &mut recorder);
    assert_eq!(outcome, RunOutcome::Aborted(AbortReason::ConcurrentAccess));
    assert!(recorder.events().iter().any(|event| matches!(
        event,
        ProtocolEvent::DiscoverOtherClient { node, last_mutation_user, .. }
            if node == "node-a" && last_mutation_user.as_deref() == Some("mallory")
    )));
    assert_eq!(recorder.count("discover_repeated"), 2);
    assert!(!recorder.contains("start_prepare"));
}

#[test]
fn parallel_fan_out_matches_sequential_outcome() {
    let cluster = TestCluster::new(&NODES);
    let client = cluster.client().with_fan_out(FanOut::Parallel);
    let mut recorder = RecordingReceiver::new();
    let mut logging = LoggingReceiver;
    let outcome = {
        let mut mux = MuxReceiver::new().with(&mut recorder).with(&mut logging);
        client.apply_change(&Change::activate("tc-1"), &mut mux)
    };
    assert!(outcome.is_consistent());
    let prepared: Vec<Option<&str>> = recorder
        .events()
        .iter()
        .filter(|event| event.name() == "prepared")
        .map(ProtocolEvent::node)
        .collect();
    assert_eq!(
        prepared,
        vec![Some("node-a"), Some("node-b"), Some("node-c")]
    );
    cluster.assert_uniform();
}
