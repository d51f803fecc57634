use crate::change::ChangeCodecError;
use crate::client::EndpointError;
use crate::config::ConfigError;
use crate::node::NodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Change(#[from] ChangeCodecError),
}

#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("state store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for StateStoreError {
    fn from(err: serde_json::Error) -> Self {
        StateStoreError::Serialization(SerializationError::from(err))
    }
}

#[derive(Debug, Error)]
pub enum ConcordError {
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error(transparent)]
    Endpoint(#[from] EndpointError),
    #[error(transparent)]
    StateStore(#[from] StateStoreError),
    #[error(transparent)]
    Serialization(#[from] SerializationError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Other(String),
}

pub type Result<T, E = ConcordError> = std::result::Result<T, E>;
