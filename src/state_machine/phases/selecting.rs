//! The phase that picks the round's cohort from the registry.

use async_trait::async_trait;
use tracing::info;

use crate::{
    message::ParticipantId,
    state_machine::{
        events::StatusEvent,
        phases::{Broadcasting, Phase, PhaseError, PhaseName, PhaseState, Shared},
        StateMachine,
    },
};

/// The selecting phase.
#[derive(Debug)]
pub struct Selecting {
    /// The participants picked for this round, in selection order.
    selected: Vec<ParticipantId>,
}

#[async_trait]
impl Phase for PhaseState<Selecting> {
    const NAME: PhaseName = PhaseName::Selecting;

    async fn run(&mut self) -> Result<(), PhaseError> {
        let snapshot = self.shared.registry.snapshot();
        let round_id = self.shared.round_id();
        let selected = self.shared.selector.select(
            &snapshot,
            round_id,
            self.shared.state.target_participants,
        );
        info!("selected {} of {} participants", selected.len(), snapshot.len());

        self.shared.registry.mark_selected(&selected, round_id);
        self.shared.events.broadcast_status(StatusEvent::RoundStarted {
            selected: selected.clone(),
        });
        self.private.selected = selected;
        Ok(())
    }

    fn next(self) -> Option<StateMachine> {
        Some(PhaseState::<Broadcasting>::new(self.shared, self.private.selected).into())
    }
}

impl PhaseState<Selecting> {
    pub fn new(shared: Shared) -> Self {
        Self {
            private: Selecting { selected: Vec::new() },
            shared,
        }
    }
}
