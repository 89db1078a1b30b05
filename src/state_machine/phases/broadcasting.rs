//! The phase that sends the current global model to the selected cohort.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    message::{Message, ParticipantId},
    state_machine::{
        events::{AbandonReason, StatusEvent},
        phases::{Collecting, Phase, PhaseError, PhaseName, PhaseState, Shared},
        StateMachine,
    },
};

/// The broadcasting phase.
#[derive(Debug)]
pub struct Broadcasting {
    /// The cohort picked by the selecting phase.
    selected: Vec<ParticipantId>,
    /// The participants that actually received the broadcast.
    reached: BTreeSet<ParticipantId>,
}

#[async_trait]
impl Phase for PhaseState<Broadcasting> {
    const NAME: PhaseName = PhaseName::Broadcasting;

    /// Sends the model to each selected participant in turn. A participant
    /// whose channel fails is dropped from the round and evicted from the
    /// registry; the round goes on with the survivors, and is only abandoned
    /// when nobody was reached at all.
    async fn run(&mut self) -> Result<(), PhaseError> {
        let round_id = self.shared.round_id();
        let channels: HashMap<_, _> = self
            .shared
            .registry
            .snapshot()
            .into_iter()
            .map(|info| (info.id, info.channel))
            .collect();

        for id in &self.private.selected {
            let message = Message::Broadcast {
                round_number: round_id,
                model: (*self.shared.state.global_model).clone(),
            };
            let sent = match channels.get(id) {
                Some(channel) => channel.send(message).await.is_ok(),
                // disconnected between selection and broadcast
                None => false,
            };

            if sent {
                self.shared
                    .events
                    .broadcast_status(StatusEvent::BroadcastSent {
                        participant_id: id.clone(),
                    });
                self.private.reached.insert(id.clone());
            } else {
                warn!("failed to send the model to {:?}, evicting", id);
                self.shared.registry.unregister(id);
                self.shared
                    .events
                    .broadcast_status(StatusEvent::Unregistered {
                        participant_id: id.clone(),
                    });
            }
        }

        info!(
            "model broadcast to {} of {} selected participants",
            self.private.reached.len(),
            self.private.selected.len(),
        );

        if self.private.reached.is_empty() {
            return Err(PhaseError::Abandon(AbandonReason::BroadcastFailed));
        }
        Ok(())
    }

    fn next(self) -> Option<StateMachine> {
        Some(PhaseState::<Collecting>::new(self.shared, self.private.reached).into())
    }
}

impl PhaseState<Broadcasting> {
    pub fn new(shared: Shared, selected: Vec<ParticipantId>) -> Self {
        Self {
            private: Broadcasting {
                selected,
                reached: BTreeSet::new(),
            },
            shared,
        }
    }
}
