//! The phase that collects model updates until the deadline.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tokio::time::sleep;
use tracing::{debug, info, Span};

use crate::{
    message::{ParticipantId, Update},
    state_machine::{
        events::{AbandonReason, StatusEvent},
        phases::{Aggregating, Phase, PhaseError, PhaseName, PhaseState, Shared},
        requests::{RequestError, StateMachineRequest},
        StateMachine,
    },
};

/// The collecting phase.
#[derive(Debug)]
pub struct Collecting {
    /// The participants the broadcast reached. Fixed for the round.
    selected: BTreeSet<ParticipantId>,
    /// The selected participants whose update is still outstanding.
    pending: BTreeSet<ParticipantId>,
    /// The updates accepted so far, keyed by sender.
    updates: BTreeMap<ParticipantId, Update>,
}

#[async_trait]
impl Phase for PhaseState<Collecting> {
    const NAME: PhaseName = PhaseName::Collecting;

    /// Accepts one update per selected participant until either every
    /// outstanding update arrived or the collection deadline passes. The
    /// round is abandoned when fewer than the configured minimum arrived.
    async fn run(&mut self) -> Result<(), PhaseError> {
        let min_updates = self.shared.state.min_updates;
        info!(
            "collecting updates from {} participants (min {})",
            self.private.pending.len(),
            min_updates,
        );

        // requests that queued up while the round was being set up
        for (req, span, resp_tx) in std::mem::take(&mut self.shared.deferred) {
            let response = self.process_request(req, span);
            let _ = resp_tx.send(response);
        }

        let deadline = sleep(self.shared.state.collection_deadline);
        tokio::pin!(deadline);

        while !self.private.pending.is_empty() {
            tokio::select! {
                biased;

                _ = deadline.as_mut() => {
                    info!("collection deadline passed");
                    break;
                }
                next = self.next_request() => {
                    let (req, span, resp_tx) = next?;
                    let response = self.process_request(req, span);
                    let _ = resp_tx.send(response);
                }
            }
        }

        let received = self.private.updates.len();
        info!(
            "collected {} of {} updates",
            received,
            self.private.selected.len(),
        );
        if received < min_updates {
            return Err(PhaseError::Abandon(AbandonReason::NotEnoughUpdates));
        }
        Ok(())
    }

    fn next(self) -> Option<StateMachine> {
        Some(PhaseState::<Aggregating>::new(self.shared, self.private.updates).into())
    }
}

impl PhaseState<Collecting> {
    pub fn new(shared: Shared, selected: BTreeSet<ParticipantId>) -> Self {
        Self {
            private: Collecting {
                pending: selected.clone(),
                selected,
                updates: BTreeMap::new(),
            },
            shared,
        }
    }

    fn process_request(
        &mut self,
        req: StateMachineRequest,
        span: Span,
    ) -> Result<(), RequestError> {
        let _enter = span.enter();
        match req {
            StateMachineRequest::Update(update) => self.accept_update(update),
            StateMachineRequest::Disconnect(id) => {
                if self.private.pending.remove(&id) {
                    debug!("{:?} disconnected, no longer waiting for its update", id);
                }
                Ok(())
            }
        }
    }

    /// Validates an incoming update against the current round and records
    /// it. A rejection never affects the sender's registration.
    fn accept_update(&mut self, update: Update) -> Result<(), RequestError> {
        if update.round_number != self.shared.round_id() {
            return Err(RequestError::UpdateRejected(
                "the update is for a different round",
            ));
        }
        if update.delta.len() != self.shared.state.model_length {
            return Err(RequestError::UpdateRejected(
                "the update has the wrong model length",
            ));
        }
        if !self.private.pending.contains(&update.participant_id) {
            if self.private.updates.contains_key(&update.participant_id) {
                return Err(RequestError::UpdateRejected(
                    "an update from this participant was already accepted",
                ));
            }
            return Err(RequestError::UpdateRejected(
                "the sender is not part of the current round",
            ));
        }

        let id = update.participant_id.clone();
        debug!("accepting update from {:?}", id);
        self.private.pending.remove(&id);
        self.private.updates.insert(id.clone(), update);
        self.shared
            .events
            .broadcast_status(StatusEvent::UpdateReceived { participant_id: id });
        Ok(())
    }
}
