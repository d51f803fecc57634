//! Client side of the protocol: endpoints, the phase fan-out, decision
//! predicates, the observer surface, and the change/recovery flows.

pub mod decider;
pub mod divergence;
pub mod endpoint;
pub mod events;
pub mod process;
pub mod receivers;
pub mod sender;

pub use decider::{ChangeDecider, Decider, PhaseTally, RecoveryDecider, RoundState};
pub use divergence::{find_divergence, Divergence};
pub use endpoint::{EndpointError, LocalEndpoint, NodeEndpoint, OfflineEndpoint};
pub use events::{Consistency, ProtocolEvent};
pub use process::{AbortReason, ClientIdentity, ClientProcess, Clock, RunOutcome, SystemClock};
pub use receivers::{LoggingReceiver, MuxReceiver, RecordingReceiver, ResultReceiver};
pub use sender::{FanOut, MessageSender};
