#[path = "../support/cluster.rs"]
mod cluster_support;

mod analyzer_it;
mod change_flow_it;
mod node_protocol_it;
mod recovery_it;
