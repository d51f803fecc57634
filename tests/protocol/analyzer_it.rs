use crate::cluster_support::{commit_on, prepare_on, rollback_on, FlakyApplicator, TestCluster};
use concord::analyzer::{ConsistencyAnalyzer, GlobalState, Liveness};
use concord::change::{Change, ChangeScope};
use concord::client::{AbortReason, ClientProcess, MuxReceiver, RecordingReceiver};
use concord::node::{ChangeApplicator, SettingsApplicator};
use std::sync::Arc;
use uuid::Uuid;

const NODES: [&str; 3] = ["node-a", "node-b", "node-c"];

fn analyzer_for(offline: &[&str]) -> ConsistencyAnalyzer {
    ConsistencyAnalyzer::new(NODES.iter().map(|name| {
        let liveness = if offline.contains(name) {
            Liveness::Offline
        } else {
            Liveness::Online
        };
        (*name, liveness)
    }))
}

fn diagnose(client: &ClientProcess, analyzer: &mut ConsistencyAnalyzer) -> RecordingReceiver {
    let mut recorder = RecordingReceiver::new();
    let mut mux = MuxReceiver::new().with(&mut recorder).with(analyzer);
    let _ = client.try_discovery(&mut mux);
    drop(mux);
    recorder
}

#[test]
fn idle_cluster_is_accepting() {
    let cluster = TestCluster::new(&NODES);
    let client = cluster.client();
    let mut analyzer = analyzer_for(&[]);
    diagnose(&client, &mut analyzer);
    assert_eq!(analyzer.global_state(), GlobalState::Accepting);

    assert!(client
        .apply_change(&Change::activate("tc-1"), &mut RecordingReceiver::new())
        .is_consistent());
    let mut analyzer = analyzer_for(&[]);
    diagnose(&client, &mut analyzer);
    assert_eq!(analyzer.global_state(), GlobalState::Accepting);
    assert_eq!(analyzer.observation().responses.len(), 3);
}

#[test]
fn cluster_prepared_everywhere_is_prepared() {
    let cluster = TestCluster::new(&NODES);
    let uuid = Uuid::new_v4();
    for server in &cluster.servers {
        prepare_on(server, uuid, 1, &Change::activate("tc-1"));
    }
    let mut analyzer = analyzer_for(&[]);
    let recorder = diagnose(&cluster.client(), &mut analyzer);
    assert_eq!(analyzer.global_state(), GlobalState::Prepared);
    assert_eq!(recorder.count("discover_already_prepared"), 3);
    assert_eq!(
        analyzer.describe(),
        "PREPARED: all nodes are prepared for the same change; a commit or rollback is needed"
    );
}

fn two_committed_one_prepared() -> TestCluster {
    let flaky: Arc<dyn ChangeApplicator> = Arc::new(FlakyApplicator::failing(1));
    let settings_b: Arc<dyn ChangeApplicator> = Arc::new(SettingsApplicator::new());
    let settings_c: Arc<dyn ChangeApplicator> = Arc::new(SettingsApplicator::new());
    let cluster = TestCluster::with_applicators(vec![
        ("node-a", flaky),
        ("node-b", settings_b),
        ("node-c", settings_c),
    ]);
    cluster.client().apply_change(
        &Change::set(ChangeScope::Cluster, "offheap", "512MB"),
        &mut RecordingReceiver::new(),
    );
    cluster
}

#[test]
fn two_committed_and_one_prepared_is_partially_committed() {
    let cluster = two_committed_one_prepared();
    let mut analyzer = analyzer_for(&[]);
    diagnose(&cluster.client(), &mut analyzer);
    assert_eq!(analyzer.global_state(), GlobalState::PartiallyCommitted);
}

#[test]
fn unreachable_prepared_node_makes_the_commit_uncertain() {
    let cluster = two_committed_one_prepared();
    let mut analyzer = analyzer_for(&["node-a"]);
    diagnose(&cluster.client_for(&["node-b", "node-c"]), &mut analyzer);
    assert_eq!(analyzer.observation().unreachable, 1);
    assert_eq!(
        analyzer.global_state(),
        GlobalState::MaybePartiallyCommitted
    );
}

#[test]
fn committed_and_rolled_back_copies_of_one_change_are_inconsistent() {
    let cluster = TestCluster::new(&NODES);
    let uuid = Uuid::new_v4();
    for server in &cluster.servers {
        prepare_on(server, uuid, 1, &Change::activate("tc-1"));
    }
    commit_on(cluster.server("node-a"), uuid);
    commit_on(cluster.server("node-b"), uuid);
    rollback_on(cluster.server("node-c"), uuid);

    let client = cluster.client();
    let mut analyzer = analyzer_for(&[]);
    let recorder = diagnose(&client, &mut analyzer);
    assert_eq!(analyzer.global_state(), GlobalState::Inconsistent);
    assert!(recorder.contains("discover_cluster_inconsistent"));
    assert_eq!(
        client.try_discovery(&mut RecordingReceiver::new()),
        Err(AbortReason::Inconsistent)
    );
}

#[test]
fn failed_discovery_is_reported_as_such() {
    let cluster = TestCluster::new(&NODES);
    cluster.set_down("node-b", true);
    let mut analyzer = analyzer_for(&[]);
    let recorder = diagnose(&cluster.client(), &mut analyzer);
    assert_eq!(analyzer.global_state(), GlobalState::DiscoveryFailure);
    assert_eq!(recorder.count("discover_fail"), 1);
}
