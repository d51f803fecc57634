//! Change payloads carried through prepare/commit.
//!
//! The protocol core never interprets a change beyond its wire tag and its
//! summary; meaning is supplied by the node's `ChangeApplicator`. Changes are
//! a closed sum type so that every variant has a stable discriminator for the
//! binary codec in [`codec`].

pub mod codec;

pub use codec::{ChangeCodec, ChangeCodecError, ChangeDecoder, MAX_COMPOSITE_DEPTH};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Wire discriminator of a [`Change`] variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChangeTag(pub u8);

impl ChangeTag {
    pub const SETTING: ChangeTag = ChangeTag(0x01);
    pub const CLUSTER_ACTIVATION: ChangeTag = ChangeTag(0x02);
    pub const COMPOSITE: ChangeTag = ChangeTag(0x03);
}

impl fmt::Display for ChangeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02x}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Change {
    Setting(SettingChange),
    ClusterActivation(ClusterActivation),
    /// Ordered sub-changes applied as one atomic unit.
    Composite(CompositeChange),
}

impl Change {
    pub fn tag(&self) -> ChangeTag {
        match self {
            Change::Setting(_) => ChangeTag::SETTING,
            Change::ClusterActivation(_) => ChangeTag::CLUSTER_ACTIVATION,
            Change::Composite(_) => ChangeTag::COMPOSITE,
        }
    }

    pub fn summary(&self) -> String {
        match self {
            Change::Setting(setting) => setting.summary(),
            Change::ClusterActivation(activation) => {
                format!("activating cluster {}", activation.cluster_name)
            }
            Change::Composite(composite) => composite.summary(),
        }
    }

    /// Flattens composites into the leaf changes they carry, in apply order.
    pub fn leaves(&self) -> Vec<&Change> {
        match self {
            Change::Composite(composite) => composite
                .changes
                .iter()
                .flat_map(|change| change.leaves())
                .collect(),
            other => vec![other],
        }
    }

    pub fn set(scope: ChangeScope, name: impl Into<String>, value: impl Into<String>) -> Self {
        Change::Setting(SettingChange {
            operation: SettingOperation::Set,
            scope,
            name: name.into(),
            value: Some(value.into()),
        })
    }

    pub fn unset(scope: ChangeScope, name: impl Into<String>) -> Self {
        Change::Setting(SettingChange {
            operation: SettingOperation::Unset,
            scope,
            name: name.into(),
            value: None,
        })
    }

    pub fn activate(cluster_name: impl Into<String>) -> Self {
        Change::ClusterActivation(ClusterActivation {
            cluster_name: cluster_name.into(),
        })
    }

    pub fn composite(changes: Vec<Change>) -> Self {
        Change::Composite(CompositeChange { changes })
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettingOperation {
    Set,
    Unset,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "level", content = "name", rename_all = "snake_case")]
pub enum ChangeScope {
    Cluster,
    Stripe(String),
    Node(String),
}

impl fmt::Display for ChangeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeScope::Cluster => write!(f, "cluster"),
            ChangeScope::Stripe(name) => write!(f, "stripe {name}"),
            ChangeScope::Node(name) => write!(f, "node {name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingChange {
    pub operation: SettingOperation,
    pub scope: ChangeScope,
    pub name: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl SettingChange {
    pub fn summary(&self) -> String {
        match (&self.operation, &self.value) {
            (SettingOperation::Set, Some(value)) => {
                format!("set {}={} on {}", self.name, value, self.scope)
            }
            (SettingOperation::Set, None) => format!("set {} on {}", self.name, self.scope),
            (SettingOperation::Unset, _) => format!("unset {} on {}", self.name, self.scope),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterActivation {
    pub cluster_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompositeChange {
    pub changes: Vec<Change>,
}

impl CompositeChange {
    pub fn summary(&self) -> String {
        self.changes
            .iter()
            .map(Change::summary)
            .collect::<Vec<_>>()
            .join(", ")
    }
}
