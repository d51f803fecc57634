use crate::cluster_support::{commit_on, current_header, prepare_on, rollback_on, TestCluster};
use concord::change::{Change, ChangeScope};
use concord::messages::{AcceptRejectResponse, MutationHeader, PrepareMessage, RejectionReason};
use concord::node::{ChangeRequestState, NodeMode};
use uuid::Uuid;

fn rejection_reason(response: AcceptRejectResponse) -> RejectionReason {
    response
        .rejection()
        .map(|rejection| rejection.reason.clone())
        .expect("rejected")
}

#[test]
fn discovery_does_not_change_node_state() {
    let cluster = TestCluster::new(&["node-a"]);
    let node = cluster.server("node-a");
    let first = node.discover();
    let second = node.discover();
    assert_eq!(first, second);
    assert_eq!(first.mutative_message_count, 0);
    assert_eq!(first.mode, NodeMode::Accepting);
    assert!(first.latest_change.is_none());
}

#[test]
fn every_accepted_mutation_bumps_the_counter_by_one() {
    let cluster = TestCluster::new(&["node-a"]);
    let node = cluster.server("node-a");
    let change = Change::set(ChangeScope::Cluster, "offheap", "512MB");

    let first = Uuid::new_v4();
    assert!(prepare_on(node, first, 1, &change).is_accepted());
    assert_eq!(node.discover().mutative_message_count, 1);
    assert!(commit_on(node, first).is_accepted());
    assert_eq!(node.discover().mutative_message_count, 2);

    let takeover = node
        .takeover(&concord::messages::TakeoverMessage {
            header: current_header(node),
        })
        .expect("takeover");
    assert!(takeover.is_accepted());
    assert_eq!(node.discover().mutative_message_count, 3);

    let second = Uuid::new_v4();
    assert!(prepare_on(node, second, 2, &change).is_accepted());
    assert!(rollback_on(node, second).is_accepted());
    assert_eq!(node.discover().mutative_message_count, 5);
}

#[test]
fn rejected_messages_leave_the_counter_alone() {
    let cluster = TestCluster::new(&["node-a"]);
    let node = cluster.server("node-a");
    let unknown = Uuid::new_v4();
    let reason = rejection_reason(commit_on(node, unknown));
    assert_eq!(
        reason,
        RejectionReason::WrongMode {
            expected: NodeMode::Prepared,
            actual: NodeMode::Accepting,
        }
    );
    assert_eq!(node.discover().mutative_message_count, 0);
}

#[test]
fn second_prepare_is_rejected_while_a_change_is_pending() {
    let cluster = TestCluster::new(&["node-a"]);
    let node = cluster.server("node-a");
    let change = Change::activate("tc-1");
    assert!(prepare_on(node, Uuid::new_v4(), 1, &change).is_accepted());

    let reason = rejection_reason(prepare_on(node, Uuid::new_v4(), 2, &change));
    assert_eq!(
        reason,
        RejectionReason::WrongMode {
            expected: NodeMode::Accepting,
            actual: NodeMode::Prepared,
        }
    );
    assert!(node.has_incomplete_change());
    assert_eq!(node.history().len(), 1);
}

#[test]
fn stale_fencing_token_is_rejected_with_attribution() {
    let cluster = TestCluster::new(&["node-a"]);
    let node = cluster.server("node-a");
    let uuid = Uuid::new_v4();
    prepare_on(node, uuid, 1, &Change::activate("tc-1"));
    commit_on(node, uuid);

    let stale = PrepareMessage {
        header: MutationHeader::new(0, "ops-9", "bob", 5),
        change_uuid: Uuid::new_v4(),
        version: 2,
        change: Change::set(ChangeScope::Cluster, "k", "v"),
    };
    let response = node.prepare(&stale).expect("prepare");
    let rejection = response.rejection().expect("rejected").clone();
    assert_eq!(
        rejection.reason,
        RejectionReason::StaleFencingToken {
            expected: 0,
            actual: 2,
        }
    );
    assert_eq!(rejection.last_mutation_host.as_deref(), Some("ops-1"));
    assert_eq!(rejection.last_mutation_user.as_deref(), Some("alice"));
    assert_eq!(
        rejection.reason.to_string(),
        "expectedMutativeMessageCount (0) != actualMutativeMessageCount (2)"
    );
}

#[test]
fn versions_must_increase_and_uuids_are_single_use() {
    let cluster = TestCluster::new(&["node-a"]);
    let node = cluster.server("node-a");
    let change = Change::set(ChangeScope::Stripe("stripe-1".into()), "lease", "20s");
    let uuid = Uuid::new_v4();
    prepare_on(node, uuid, 3, &change);
    rollback_on(node, uuid);

    assert_eq!(
        rejection_reason(prepare_on(node, Uuid::new_v4(), 3, &change)),
        RejectionReason::VersionMismatch {
            proposed: 3,
            highest: 3,
        }
    );
    assert_eq!(
        rejection_reason(prepare_on(node, uuid, 4, &change)),
        RejectionReason::DuplicateChange { change_uuid: uuid }
    );
}

#[test]
fn commit_appends_a_record_carrying_the_creation_attribution() {
    let cluster = TestCluster::new(&["node-a"]);
    let node = cluster.server("node-a");
    let uuid = Uuid::new_v4();
    prepare_on(node, uuid, 1, &Change::set(ChangeScope::Node("node-a".into()), "port", "9410"));

    let other = concord::messages::CommitMessage {
        header: MutationHeader::new(1, "ops-2", "carol", 99),
        change_uuid: uuid,
    };
    assert!(node.commit(&other).expect("commit").is_accepted());

    let history = node.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].state, ChangeRequestState::Prepared);
    assert_eq!(history[1].state, ChangeRequestState::Committed);
    assert_eq!(history[1].creation_user, "alice");
    assert_eq!(history[1].creation_host, "ops-1");

    let discovered = node.discover();
    assert_eq!(discovered.last_mutation_user.as_deref(), Some("carol"));
    assert_eq!(discovered.current_version, 1);
    assert_eq!(
        node.change_state(uuid).map(|record| record.state),
        Some(ChangeRequestState::Committed)
    );
    assert_eq!(
        node.current_committed_result(),
        Some(serde_json::json!({
            "cluster_name": null,
            "settings": { "node.node-a.port": "9410" }
        }))
    );
}

#[test]
fn commit_of_a_different_uuid_is_refused() {
    let cluster = TestCluster::new(&["node-a"]);
    let node = cluster.server("node-a");
    let pending = Uuid::new_v4();
    prepare_on(node, pending, 1, &Change::activate("tc-1"));
    let other = Uuid::new_v4();
    assert_eq!(
        rejection_reason(commit_on(node, other)),
        RejectionReason::UnknownChange { change_uuid: other }
    );
    assert!(node.has_incomplete_change());
}
