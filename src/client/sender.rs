use super::endpoint::{EndpointError, NodeEndpoint};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread;

/// How a phase reaches its endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FanOut {
    #[default]
    Sequential,
    /// One scoped thread per endpoint.
    Parallel,
}

/// Sends one phase's messages and waits for every endpoint to answer.
///
/// Results come back in `targets` order regardless of completion order.
#[derive(Debug, Clone, Copy)]
pub struct MessageSender {
    fan_out: FanOut,
}

impl MessageSender {
    pub fn new(fan_out: FanOut) -> Self {
        Self { fan_out }
    }

    pub fn fan_out(&self) -> FanOut {
        self.fan_out
    }

    pub fn send<T, F>(
        &self,
        targets: &[Arc<dyn NodeEndpoint>],
        call: F,
    ) -> Vec<Result<T, EndpointError>>
    where
        T: Send,
        F: Fn(usize, &dyn NodeEndpoint) -> Result<T, EndpointError> + Sync,
    {
        match self.fan_out {
            FanOut::Sequential => targets
                .iter()
                .enumerate()
                .map(|(idx, endpoint)| call(idx, endpoint.as_ref()))
                .collect(),
            FanOut::Parallel => thread::scope(|scope| {
                let call = &call;
                let handles: Vec<_> = targets
                    .iter()
                    .enumerate()
                    .map(|(idx, endpoint)| {
                        let endpoint = endpoint.as_ref();
                        (
                            endpoint.address(),
                            scope.spawn(move || call(idx, endpoint)),
                        )
                    })
                    .collect();
                handles
                    .into_iter()
                    .map(|(address, handle)| {
                        handle.join().unwrap_or_else(|_| {
                            Err(EndpointError::unreachable(address, "request worker panicked"))
                        })
                    })
                    .collect()
            }),
        }
    }
}
