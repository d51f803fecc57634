//! Core library for concord, an all-member two-phase configuration change
//! protocol. Every node must accept a change before it is committed; a
//! per-node mutative message counter fences out concurrent clients, and a
//! consistency analyzer drives recovery of interrupted changes.

pub mod analyzer;
pub mod change;
pub mod client;
pub mod config;
pub mod messages;
pub mod node;
pub mod prelude;
pub mod telemetry;
pub mod util;

pub use analyzer::{
    classify, ClusterObservation, ConsistencyAnalyzer, GlobalState, Liveness, RecoveryDecision,
};
pub use change::{
    Change, ChangeCodec, ChangeCodecError, ChangeScope, ChangeTag, ClusterActivation,
    CompositeChange, SettingChange, SettingOperation,
};
pub use client::{
    AbortReason, ClientIdentity, ClientProcess, Clock, Consistency, EndpointError, FanOut,
    LocalEndpoint, LoggingReceiver, MuxReceiver, NodeEndpoint, OfflineEndpoint, ProtocolEvent,
    RecordingReceiver, ResultReceiver, RunOutcome, SystemClock,
};
pub use config::{load_cluster_config, parse_cluster_config, ClusterConfig, ConfigError, NodeConfig};
pub use messages::{
    AcceptRejectResponse, ChangeDetails, CommitMessage, DiscoverResponse, MutationHeader,
    PrepareMessage, Rejection, RejectionReason, RollbackMessage, TakeoverMessage,
};
pub use node::{
    ApplicatorError, ChangeApplicator, ChangeRecord, ChangeRequestState, ChangeResult,
    FileStateStore, InMemoryStateStore, NodeError, NodeMode, NodeServer, NodeState,
    NodeStateStore, PotentialApplicationResult, SettingsApplicator,
};
pub use telemetry::{MetricsRegistry, MetricsSnapshot};
pub use util::error::{ConcordError, Result, SerializationError, StateStoreError};
