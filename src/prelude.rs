//! Convenience re-exports for downstream crates. Pull this module in via
//! `use concord::prelude::*;` when you want the most common types without
//! spelunking the module tree.

pub use crate::change::{Change, ChangeScope};
pub use crate::client::{
    ClientIdentity, ClientProcess, Consistency, LocalEndpoint, NodeEndpoint, ResultReceiver,
    RunOutcome,
};
pub use crate::node::{ChangeApplicator, NodeServer, PotentialApplicationResult};
pub use crate::util::error::{ConcordError, Result as ConcordResult, SerializationError};
