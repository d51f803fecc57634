use super::events::{Consistency, ProtocolEvent};
use log::{debug, info, log, warn, Level};

/// Single observer hook for everything a client run reports.
pub trait ResultReceiver {
    fn on_event(&mut self, event: &ProtocolEvent);
}

/// Renders every event as an `event=...` log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingReceiver;

impl ResultReceiver for LoggingReceiver {
    fn on_event(&mut self, event: &ProtocolEvent) {
        let node = event.node().unwrap_or("-");
        match event {
            ProtocolEvent::Discovered { node, response } => debug!(
                "event=discovered node={} mode={} mutative_message_count={} current_version={} highest_version={}",
                node,
                response.mode,
                response.mutative_message_count,
                response.current_version,
                response.highest_version
            ),
            ProtocolEvent::DiscoverFail { reason, .. }
            | ProtocolEvent::TakeoverFail { reason, .. }
            | ProtocolEvent::PrepareFail { reason, .. }
            | ProtocolEvent::CommitFail { reason, .. }
            | ProtocolEvent::RollbackFail { reason, .. } => warn!(
                "event={} node={} reason=\"{}\"",
                event.name(),
                node,
                reason
            ),
            ProtocolEvent::DiscoverAlreadyPrepared {
                change_uuid,
                creation_host,
                creation_user,
                ..
            } => warn!(
                "event={} node={} change_uuid={} creation_host={} creation_user={}",
                event.name(),
                node,
                change_uuid,
                creation_host,
                creation_user
            ),
            ProtocolEvent::DiscoverClusterInconsistent {
                change_uuid,
                committed_on,
                rolled_back_on,
            } => warn!(
                "event={} change_uuid={} committed_on={:?} rolled_back_on={:?}",
                event.name(),
                change_uuid,
                committed_on,
                rolled_back_on
            ),
            ProtocolEvent::DiscoverClusterDesynchronized { last_committed } => warn!(
                "event={} last_committed={:?}",
                event.name(),
                last_committed
            ),
            ProtocolEvent::DiscoverOtherClient {
                last_mutation_host,
                last_mutation_user,
                ..
            }
            | ProtocolEvent::TakeoverOtherClient {
                last_mutation_host,
                last_mutation_user,
                ..
            }
            | ProtocolEvent::PrepareOtherClient {
                last_mutation_host,
                last_mutation_user,
                ..
            }
            | ProtocolEvent::CommitOtherClient {
                last_mutation_host,
                last_mutation_user,
                ..
            }
            | ProtocolEvent::RollbackOtherClient {
                last_mutation_host,
                last_mutation_user,
                ..
            } => warn!(
                "event={} node={} last_mutation_host={} last_mutation_user={}",
                event.name(),
                node,
                last_mutation_host.as_deref().unwrap_or("-"),
                last_mutation_user.as_deref().unwrap_or("-")
            ),
            ProtocolEvent::PrepareChangeUnacceptable { rejection, .. } => warn!(
                "event={} node={} rejection=\"{}\"",
                event.name(),
                node,
                rejection
            ),
            ProtocolEvent::StartPrepare { change_uuid } => {
                info!("event={} change_uuid={}", event.name(), change_uuid)
            }
            ProtocolEvent::CannotDecideOverCommitOrRollback => warn!("event={}", event.name()),
            ProtocolEvent::Done { consistency } => log!(
                log_level(event, Level::Info),
                "event={} consistency={}",
                event.name(),
                consistency
            ),
            _ => log!(
                log_level(event, Level::Debug),
                "event={} node={}",
                event.name(),
                node
            ),
        }
    }
}

/// `Warn` for problem events, `routine` otherwise.
fn log_level(event: &ProtocolEvent, routine: Level) -> Level {
    if event.is_problem() {
        Level::Warn
    } else {
        routine
    }
}

/// Forwards each event to every registered receiver, in registration order.
#[derive(Default)]
pub struct MuxReceiver<'a> {
    receivers: Vec<&'a mut dyn ResultReceiver>,
}

impl<'a> MuxReceiver<'a> {
    pub fn new() -> Self {
        Self {
            receivers: Vec::new(),
        }
    }

    pub fn with(mut self, receiver: &'a mut dyn ResultReceiver) -> Self {
        self.receivers.push(receiver);
        self
    }

    pub fn push(&mut self, receiver: &'a mut dyn ResultReceiver) {
        self.receivers.push(receiver);
    }
}

impl ResultReceiver for MuxReceiver<'_> {
    fn on_event(&mut self, event: &ProtocolEvent) {
        for receiver in self.receivers.iter_mut() {
            receiver.on_event(event);
        }
    }
}

/// Keeps every event for later inspection.
#[derive(Debug, Default, Clone)]
pub struct RecordingReceiver {
    events: Vec<ProtocolEvent>,
}

impl RecordingReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[ProtocolEvent] {
        &self.events
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events.iter().map(ProtocolEvent::name).collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events.iter().filter(|event| event.name() == name).count()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.count(name) > 0
    }

    /// Applicator rejection texts reported during prepare.
    pub fn rejections(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ProtocolEvent::PrepareChangeUnacceptable { rejection, .. } => {
                    Some(rejection.as_str())
                }
                _ => None,
            })
            .collect()
    }

    /// Consistency reported by the terminal `Done` event, if one was emitted.
    pub fn consistency(&self) -> Option<Consistency> {
        self.events.iter().rev().find_map(|event| match event {
            ProtocolEvent::Done { consistency } => Some(*consistency),
            _ => None,
        })
    }
}

impl ResultReceiver for RecordingReceiver {
    fn on_event(&mut self, event: &ProtocolEvent) {
        self.events.push(event.clone());
    }
}
