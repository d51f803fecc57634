use crate::messages::{
    AcceptRejectResponse, CommitMessage, DiscoverResponse, PrepareMessage, RollbackMessage,
    TakeoverMessage,
};
use crate::node::{NodeError, NodeServer};
use std::sync::Arc;
use thiserror::Error;

/// Per-node RPC surface used by the client process.
///
/// Protocol rejections travel inside `Ok(AcceptRejectResponse::Rejected)`;
/// `Err` is reserved for nodes that could not be reached or failed.
pub trait NodeEndpoint: Send + Sync {
    fn address(&self) -> &str;
    fn discover(&self) -> Result<DiscoverResponse, EndpointError>;
    fn prepare(&self, message: &PrepareMessage) -> Result<AcceptRejectResponse, EndpointError>;
    fn commit(&self, message: &CommitMessage) -> Result<AcceptRejectResponse, EndpointError>;
    fn rollback(&self, message: &RollbackMessage) -> Result<AcceptRejectResponse, EndpointError>;
    fn takeover(&self, message: &TakeoverMessage) -> Result<AcceptRejectResponse, EndpointError>;
}

#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("endpoint {address} unreachable: {reason}")]
    Unreachable { address: String, reason: String },
    #[error("node {address} failed: {source}")]
    Node {
        address: String,
        #[source]
        source: NodeError,
    },
}

impl EndpointError {
    pub fn unreachable(address: impl Into<String>, reason: impl Into<String>) -> Self {
        EndpointError::Unreachable {
            address: address.into(),
            reason: reason.into(),
        }
    }

    pub fn address(&self) -> &str {
        match self {
            EndpointError::Unreachable { address, .. }
            | EndpointError::Node { address, .. } => address,
        }
    }
}

/// In-process endpoint calling straight into a [`NodeServer`].
#[derive(Debug, Clone)]
pub struct LocalEndpoint {
    server: Arc<NodeServer>,
}

impl LocalEndpoint {
    pub fn new(server: Arc<NodeServer>) -> Self {
        Self { server }
    }

    pub fn server(&self) -> &Arc<NodeServer> {
        &self.server
    }

    fn wrap(
        &self,
        result: Result<AcceptRejectResponse, NodeError>,
    ) -> Result<AcceptRejectResponse, EndpointError> {
        result.map_err(|source| EndpointError::Node {
            address: self.server.name().to_string(),
            source,
        })
    }
}

impl NodeEndpoint for LocalEndpoint {
    fn address(&self) -> &str {
        self.server.name()
    }

    fn discover(&self) -> Result<DiscoverResponse, EndpointError> {
        Ok(self.server.discover())
    }

    fn prepare(&self, message: &PrepareMessage) -> Result<AcceptRejectResponse, EndpointError> {
        self.wrap(self.server.prepare(message))
    }

    fn commit(&self, message: &CommitMessage) -> Result<AcceptRejectResponse, EndpointError> {
        self.wrap(self.server.commit(message))
    }

    fn rollback(&self, message: &RollbackMessage) -> Result<AcceptRejectResponse, EndpointError> {
        self.wrap(self.server.rollback(message))
    }

    fn takeover(&self, message: &TakeoverMessage) -> Result<AcceptRejectResponse, EndpointError> {
        self.wrap(self.server.takeover(message))
    }
}

/// Endpoint for a node known to be down; every call fails as unreachable.
#[derive(Debug, Clone)]
pub struct OfflineEndpoint {
    address: String,
    reason: String,
}

impl OfflineEndpoint {
    pub fn new(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            reason: reason.into(),
        }
    }

    fn fail<T>(&self) -> Result<T, EndpointError> {
        Err(EndpointError::unreachable(&self.address, &self.reason))
    }
}

impl NodeEndpoint for OfflineEndpoint {
    fn address(&self) -> &str {
        &self.address
    }

    fn discover(&self) -> Result<DiscoverResponse, EndpointError> {
        self.fail()
    }

    fn prepare(&self, _: &PrepareMessage) -> Result<AcceptRejectResponse, EndpointError> {
        self.fail()
    }

    fn commit(&self, _: &CommitMessage) -> Result<AcceptRejectResponse, EndpointError> {
        self.fail()
    }

    fn rollback(&self, _: &RollbackMessage) -> Result<AcceptRejectResponse, EndpointError> {
        self.fail()
    }

    fn takeover(&self, _: &TakeoverMessage) -> Result<AcceptRejectResponse, EndpointError> {
        self.fail()
    }
}
