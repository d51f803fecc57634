//! YAML description of a cluster as seen by an operator tool.
//!
//! ```yaml
//! client:
//!   host: ops-1
//!   user: alice
//! fan_out: parallel
//! state_root: state
//! nodes:
//!   - name: node-a
//!   - name: node-b
//!     state_dir: /var/lib/concord/node-b
//! ```

use crate::client::{ClientIdentity, FanOut};
use crate::util::{resolve_relative, state_dir_for_node};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_STATE_ROOT: &str = "state";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub client: ClientConfig,
    #[serde(default)]
    pub fan_out: FanOut,
    #[serde(default = "default_state_root")]
    pub state_root: PathBuf,
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub host: String,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    /// Defaults to `<state_root>/<name>`.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

fn default_state_root() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_ROOT)
}

impl ClusterConfig {
    pub fn identity(&self) -> ClientIdentity {
        ClientIdentity::new(&self.client.host, &self.client.user)
    }

    pub fn node(&self, name: &str) -> Option<&NodeConfig> {
        self.nodes.iter().find(|node| node.name == name)
    }

    /// State directory of `node`, with relative paths anchored at the config file.
    pub fn state_dir(&self, config_path: &Path, node: &NodeConfig) -> PathBuf {
        match &node.state_dir {
            Some(dir) => {
                let base = config_path
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("."));
                resolve_relative(&base, dir)
            }
            None => state_dir_for_node(config_path, &self.state_root, &node.name),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.nodes.is_empty() {
            return Err(ConfigError::NoNodes);
        }
        if self.client.host.trim().is_empty() || self.client.user.trim().is_empty() {
            return Err(ConfigError::MissingIdentity);
        }
        let mut seen = BTreeSet::new();
        for node in &self.nodes {
            if node.name.trim().is_empty() {
                return Err(ConfigError::EmptyNodeName);
            }
            if !seen.insert(node.name.as_str()) {
                return Err(ConfigError::DuplicateNode(node.name.clone()));
            }
        }
        Ok(())
    }
}

pub fn parse_cluster_config(raw: &str) -> Result<ClusterConfig, ConfigError> {
    let config: ClusterConfig = serde_yaml::from_str(raw)?;
    config.validate()?;
    Ok(config)
}

pub fn load_cluster_config(path: &Path) -> Result<ClusterConfig, ConfigError> {
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_cluster_config(&raw)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid cluster config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("cluster config lists no nodes")]
    NoNodes,
    #[error("client host and user must not be empty")]
    MissingIdentity,
    #[error("node names must not be empty")]
    EmptyNodeName,
    #[error("node {0} is listed more than once")]
    DuplicateNode(String),
}
