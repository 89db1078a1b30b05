//! The phase that opens a round and waits for participants to register.

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::info;

use crate::state_machine::{
    events::AbandonReason,
    phases::{Phase, PhaseError, PhaseName, PhaseState, Selecting, Shared},
    StateMachine,
};

/// The awaiting-participants phase.
#[derive(Debug)]
pub struct AwaitingParticipants;

#[async_trait]
impl Phase for PhaseState<AwaitingParticipants> {
    const NAME: PhaseName = PhaseName::AwaitingParticipants;

    /// Holds the registration window open. The window closes early once the
    /// registry can fill the round's target cohort, and the round is
    /// abandoned if nobody registered at all.
    async fn run(&mut self) -> Result<(), PhaseError> {
        let window = self.shared.state.registration_window;
        let target = self.shared.state.target_participants;
        info!(
            "round {} open, waiting up to {:?} for participants",
            self.shared.round_id(),
            window,
        );

        let deadline = sleep(window);
        tokio::pin!(deadline);
        let mut count_rx = self.shared.registry.count_watch();

        loop {
            if *count_rx.borrow() >= target {
                info!("target cohort of {} participants reached", target);
                break;
            }
            tokio::select! {
                _ = deadline.as_mut() => {
                    info!("registration window closed");
                    break;
                }
                changed = count_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        if self.shared.registry.is_empty() {
            return Err(PhaseError::Abandon(AbandonReason::NoParticipants));
        }
        Ok(())
    }

    fn next(self) -> Option<StateMachine> {
        Some(PhaseState::<Selecting>::new(self.shared).into())
    }
}

impl PhaseState<AwaitingParticipants> {
    /// Opens the next round: the round number is assigned here and never
    /// reused, even when the round is later abandoned.
    pub fn new(mut shared: Shared) -> Self {
        let round_id = shared.round_id() + 1;
        shared.set_round_id(round_id);
        Self {
            private: AwaitingParticipants,
            shared,
        }
    }
}
