//! The shutdown phase, the terminal state of the state machine.

use async_trait::async_trait;
use tracing::debug;

use crate::state_machine::{
    phases::{Phase, PhaseError, PhaseName, PhaseState, Shared},
    requests::RequestError,
    StateMachine,
};

/// The shutdown phase.
#[derive(Debug)]
pub struct Shutdown;

#[async_trait]
impl Phase for PhaseState<Shutdown> {
    const NAME: PhaseName = PhaseName::Shutdown;

    /// Closes the request channel and rejects whatever is still queued, then
    /// drops every registration.
    async fn run(&mut self) -> Result<(), PhaseError> {
        self.shared.request_rx.close();
        for (_, _, resp_tx) in self.shared.deferred.drain(..) {
            let _ = resp_tx.send(Err(RequestError::UpdateRejected(
                "the coordinator is shutting down",
            )));
        }
        while let Some((_, _, resp_tx)) = self.shared.request_rx.try_recv() {
            debug!("rejecting request received during shutdown");
            let _ = resp_tx.send(Err(RequestError::UpdateRejected(
                "the coordinator is shutting down",
            )));
        }
        self.shared.registry.clear();
        Ok(())
    }

    fn next(self) -> Option<StateMachine> {
        None
    }
}

impl PhaseState<Shutdown> {
    pub fn new(shared: Shared) -> Self {
        Self {
            private: Shutdown,
            shared,
        }
    }
}
