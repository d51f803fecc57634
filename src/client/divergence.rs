use crate::messages::DiscoverResponse;
use crate::node::{ChangeRequestState, NodeMode};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Discovery results that cannot both be true of a healthy cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Divergence {
    /// One change is COMMITTED on some nodes and ROLLED_BACK on others.
    Inconsistent {
        change_uuid: Uuid,
        committed_on: Vec<String>,
        rolled_back_on: Vec<String>,
    },
    /// ACCEPTING nodes report different latest committed changes.
    Desynchronized {
        last_committed: BTreeMap<String, Option<Uuid>>,
    },
}

/// Checks a discovery snapshot for divergence. Inconsistency wins over
/// desynchronization when both are present.
pub fn find_divergence<'a, I>(responses: I) -> Option<Divergence>
where
    I: IntoIterator<Item = (&'a str, &'a DiscoverResponse)>,
{
    let mut committed: BTreeMap<Uuid, BTreeSet<&str>> = BTreeMap::new();
    let mut rolled_back: BTreeMap<Uuid, BTreeSet<&str>> = BTreeMap::new();
    let mut last_committed: BTreeMap<String, Option<Uuid>> = BTreeMap::new();

    for (node, response) in responses {
        if let Some(latest) = &response.latest_change {
            match latest.state {
                ChangeRequestState::Committed => {
                    committed.entry(latest.uuid).or_default().insert(node);
                }
                ChangeRequestState::RolledBack => {
                    rolled_back.entry(latest.uuid).or_default().insert(node);
                }
                ChangeRequestState::Prepared => {}
            }
        }
        if let Some(latest_committed) = &response.latest_committed_change {
            committed
                .entry(latest_committed.uuid)
                .or_default()
                .insert(node);
        }
        if response.mode == NodeMode::Accepting {
            last_committed.insert(
                node.to_string(),
                response
                    .latest_committed_change
                    .as_ref()
                    .map(|details| details.uuid),
            );
        }
    }

    for (uuid, rolled_back_on) in &rolled_back {
        if let Some(committed_on) = committed.get(uuid) {
            return Some(Divergence::Inconsistent {
                change_uuid: *uuid,
                committed_on: committed_on.iter().map(|n| n.to_string()).collect(),
                rolled_back_on: rolled_back_on.iter().map(|n| n.to_string()).collect(),
            });
        }
    }

    let distinct: BTreeSet<_> = last_committed.values().collect();
    if distinct.len() > 1 {
        return Some(Divergence::Desynchronized { last_committed });
    }
    None
}
