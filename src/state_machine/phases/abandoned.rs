//! The phase the state machine enters when a round cannot finish.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::state_machine::{
    events::StatusEvent,
    phases::{AwaitingParticipants, Phase, PhaseError, PhaseName, PhaseState, Shared, Shutdown},
    requests::RequestError,
    StateMachine,
};

/// The abandoned phase, holding the error that ended the round.
#[derive(Debug)]
pub struct Abandoned(pub(in crate::state_machine) PhaseError);

#[async_trait]
impl Phase for PhaseState<Abandoned> {
    const NAME: PhaseName = PhaseName::Abandoned;

    async fn run(&mut self) -> Result<(), PhaseError> {
        warn!("round {} abandoned: {}", self.shared.round_id(), self.private.0);
        if let PhaseError::Abandon(reason) = &self.private.0 {
            self.shared
                .events
                .broadcast_status(StatusEvent::RoundAbandoned { reason: *reason });
        }
        // requests held back for a collection window that never opened
        for (_, span, resp_tx) in self.shared.deferred.drain(..) {
            let _enter = span.enter();
            let _ = resp_tx.send(Err(RequestError::UpdateRejected("the round was abandoned")));
        }
        Ok(())
    }

    /// An abandoned round still counts against the round budget, and an
    /// unusable request channel ends the whole run.
    fn next(self) -> Option<StateMachine> {
        if let PhaseError::RequestChannel(_) = self.private.0 {
            return Some(PhaseState::<Shutdown>::new(self.shared).into());
        }
        if self.shared.round_id() >= self.shared.state.rounds {
            info!("all {} rounds have run", self.shared.state.rounds);
            return Some(PhaseState::<Shutdown>::new(self.shared).into());
        }
        Some(PhaseState::<AwaitingParticipants>::new(self.shared).into())
    }
}

impl PhaseState<Abandoned> {
    pub fn new(shared: Shared, err: PhaseError) -> Self {
        Self {
            private: Abandoned(err),
            shared,
        }
    }
}
