//! The phase that closes a successful round.

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    message::Message,
    state_machine::{
        events::StatusEvent,
        phases::{AwaitingParticipants, Phase, PhaseError, PhaseName, PhaseState, Shared, Shutdown},
        StateMachine,
    },
};

/// The completed phase.
#[derive(Debug)]
pub struct Completed {
    /// The averaged training metric reported by the round's participants.
    metric: Option<f64>,
}

#[async_trait]
impl Phase for PhaseState<Completed> {
    const NAME: PhaseName = PhaseName::Completed;

    /// Announces the round's outcome. A peer that cannot receive its wire
    /// summary within the send timeout has a broken channel and is evicted.
    async fn run(&mut self) -> Result<(), PhaseError> {
        let round_id = self.shared.round_id();
        let summary = match self.private.metric {
            Some(metric) => format!("round {} complete, mean metric {:.4}", round_id, metric),
            None => format!("round {} complete", round_id),
        };
        info!("{}", summary);

        self.shared
            .events
            .broadcast_status(StatusEvent::RoundCompleted {
                metric: self.private.metric,
            });

        for info in self.shared.registry.snapshot() {
            if info
                .channel
                .send(Message::Status {
                    text: summary.clone(),
                })
                .await
                .is_err()
            {
                warn!("failed to send the round summary to {:?}, evicting", info.id);
                self.shared.registry.unregister(&info.id);
                self.shared
                    .events
                    .broadcast_status(StatusEvent::Unregistered {
                        participant_id: info.id,
                    });
            }
        }
        Ok(())
    }

    fn next(self) -> Option<StateMachine> {
        if self.shared.round_id() >= self.shared.state.rounds {
            info!("all {} rounds have run", self.shared.state.rounds);
            Some(PhaseState::<Shutdown>::new(self.shared).into())
        } else {
            Some(PhaseState::<AwaitingParticipants>::new(self.shared).into())
        }
    }
}

impl PhaseState<Completed> {
    pub fn new(shared: Shared, metric: Option<f64>) -> Self {
        Self {
            private: Completed { metric },
            shared,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::ContextDescriptor,
        coordinator::{
            aggregator::AggregationEngine,
            channel::tests::{broken_handle, loopback_handle},
            registry::{ParticipantEntry, Registry},
            selector::ParticipantSelector,
        },
        settings::{
            ModelSettings,
            PrivacySettings,
            RoundSettings,
            SelectionSettings,
            TransportSettings,
        },
        state_machine::{
            coordinator::CoordinatorState,
            events::EventPublisher,
            requests::RequestReceiver,
        },
    };

    #[tokio::test]
    async fn test_unreachable_peer_is_evicted_on_summary_send() {
        let registry = Registry::new();
        let (channel, _anna_rx) = loopback_handle();
        registry
            .register(
                "anna".to_string(),
                ParticipantEntry::new(channel, ContextDescriptor::default(), 10),
            )
            .unwrap();
        registry
            .register(
                "bert".to_string(),
                ParticipantEntry::new(broken_handle(), ContextDescriptor::default(), 10),
            )
            .unwrap();

        let state = CoordinatorState::new(
            &RoundSettings::default(),
            &TransportSettings { send_timeout: 5 },
            &ModelSettings { length: 2 },
        );
        let (request_rx, _request_tx) = RequestReceiver::new();
        let (publisher, _subscriber) = EventPublisher::init(1, PhaseName::Completed);
        let shared = Shared::new(
            state,
            registry.clone(),
            ParticipantSelector::new(SelectionSettings::default()),
            AggregationEngine::new(PrivacySettings::default()),
            request_rx,
            publisher,
        );

        let mut phase = PhaseState::<Completed>::new(shared, None);
        phase.run().await.unwrap();

        // bert's channel is broken, so the summary send evicts him
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.snapshot()[0].id, "anna");
    }
}
