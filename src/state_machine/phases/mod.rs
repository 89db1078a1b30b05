//! This module provides the phases of the coordinator state machine.

mod abandoned;
mod aggregating;
mod awaiting;
mod broadcasting;
mod collecting;
mod complete;
mod selecting;
mod shutdown;

pub use self::{
    abandoned::Abandoned,
    aggregating::Aggregating,
    awaiting::AwaitingParticipants,
    broadcasting::Broadcasting,
    collecting::Collecting,
    complete::Completed,
    selecting::Selecting,
    shutdown::Shutdown,
};

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, error_span, info, warn, Instrument};

use crate::{
    coordinator::{
        aggregator::{AggregationEngine, AggregationError},
        registry::Registry,
        selector::ParticipantSelector,
    },
    state_machine::{
        coordinator::CoordinatorState,
        events::{AbandonReason, EventPublisher},
        requests::{RequestError, RequestReceiver, ResponseSender, StateMachineRequest, TracedRequest},
        StateMachine,
    },
};

/// The name of the current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum PhaseName {
    #[display(fmt = "AwaitingParticipants")]
    AwaitingParticipants,
    #[display(fmt = "Selecting")]
    Selecting,
    #[display(fmt = "Broadcasting")]
    Broadcasting,
    #[display(fmt = "Collecting")]
    Collecting,
    #[display(fmt = "Aggregating")]
    Aggregating,
    #[display(fmt = "Completed")]
    Completed,
    #[display(fmt = "Abandoned")]
    Abandoned,
    #[display(fmt = "Shutdown")]
    Shutdown,
}

/// Error returned when a phase cannot finish its round.
#[derive(Debug, Error)]
pub enum PhaseError {
    /// The round cannot proceed and is abandoned.
    #[error("round abandoned: {0}")]
    Abandon(AbandonReason),

    /// The request channel is gone, so no further round can run either.
    #[error("request channel error: {0}")]
    RequestChannel(&'static str),

    /// Aggregation rejected the collected updates.
    #[error("aggregation failed: {0}")]
    Aggregation(#[from] AggregationError),
}

/// A trait that must be implemented by a state in order to move to a next
/// state.
#[async_trait]
pub trait Phase {
    /// The name of the current phase.
    const NAME: PhaseName;

    /// Runs this phase to completion.
    async fn run(&mut self) -> Result<(), PhaseError>;

    /// Moves from this phase to the next phase.
    fn next(self) -> Option<StateMachine>;
}

/// The state corresponding to a phase of the coordinator state machine.
pub struct PhaseState<S> {
    /// The private state of this phase.
    pub(in crate::state_machine) private: S,
    /// The shared coordinator state.
    pub(in crate::state_machine) shared: Shared,
}

/// The state shared between the phases.
pub struct Shared {
    /// The round parameters and the current global model.
    pub(in crate::state_machine) state: CoordinatorState,
    /// The participant registry.
    pub(in crate::state_machine) registry: Registry,
    /// The participant selector.
    pub(in crate::state_machine) selector: ParticipantSelector,
    /// The aggregation engine, carried across rounds so the noise stream
    /// keeps advancing.
    pub(in crate::state_machine) aggregator: AggregationEngine,
    /// The receiver of the request channel.
    pub(in crate::state_machine) request_rx: RequestReceiver,
    /// Requests that arrived before the collection window opened and are
    /// held back for the collecting phase.
    pub(in crate::state_machine) deferred: Vec<TracedRequest>,
    /// The event publisher.
    pub(in crate::state_machine) events: EventPublisher,
}

impl Shared {
    pub fn new(
        state: CoordinatorState,
        registry: Registry,
        selector: ParticipantSelector,
        aggregator: AggregationEngine,
        request_rx: RequestReceiver,
        events: EventPublisher,
    ) -> Self {
        Self {
            state,
            registry,
            selector,
            aggregator,
            request_rx,
            deferred: Vec::new(),
            events,
        }
    }

    /// Sets the round ID to the given value.
    pub fn set_round_id(&mut self, id: u64) {
        self.state.round_id = id;
        self.events.set_round_id(id);
    }

    /// Returns the current round ID.
    pub fn round_id(&self) -> u64 {
        self.state.round_id
    }
}

impl<S> PhaseState<S>
where
    Self: Phase,
{
    /// Runs the current phase to completion, then transitions to the next
    /// phase or shuts down if the request channel is broken.
    pub async fn run_phase(mut self) -> Option<StateMachine> {
        let phase = <Self as Phase>::NAME;
        let span = error_span!("run_phase", phase = %phase);

        async move {
            info!("starting phase");
            self.shared.events.broadcast_phase(phase);

            if let Err(err) = self.run().await {
                warn!("phase failed: {}", err);
                return Some(self.into_abandoned_state(err));
            }

            info!("phase ran successfully");

            debug!("purging outdated requests before transitioning");
            if let Err(err) = self.purge_outdated_requests() {
                warn!("failed to purge outdated requests");
                return Some(self.into_abandoned_state(err));
            }

            self.next()
        }
        .instrument(span)
        .await
    }

    /// Drains the request channel at the phase boundary.
    ///
    /// As long as the round's collection window lies ahead, updates for the
    /// current round and disconnects are held back for the collecting phase,
    /// which validates them like any live request. Everything else missed its
    /// window and is rejected.
    fn purge_outdated_requests(&mut self) -> Result<(), PhaseError> {
        let collection_ahead = matches!(
            <Self as Phase>::NAME,
            PhaseName::AwaitingParticipants | PhaseName::Selecting | PhaseName::Broadcasting
        );
        while let Some((req, span, resp_tx)) = self.shared.request_rx.try_recv() {
            let keep = collection_ahead
                && match &req {
                    StateMachineRequest::Update(update) => {
                        update.round_number == self.shared.round_id()
                    }
                    StateMachineRequest::Disconnect(_) => true,
                };
            if keep {
                self.shared.deferred.push((req, span, resp_tx));
            } else {
                let _enter = span.enter();
                debug!("rejecting outdated request");
                let _ = resp_tx.send(Err(RequestError::UpdateRejected(
                    "no collection window is open",
                )));
            }
        }
        Ok(())
    }
}

impl<S> PhaseState<S> {
    /// Receives the next request from the request channel.
    ///
    /// # Errors
    /// Fails only when the channel is closed and fully drained, which means
    /// the coordinator front end is gone.
    pub async fn next_request(
        &mut self,
    ) -> Result<(StateMachineRequest, tracing::Span, ResponseSender), PhaseError> {
        debug!("waiting for the next incoming request");
        self.shared.request_rx.recv().await.ok_or({
            PhaseError::RequestChannel("all request senders have been dropped!")
        })
    }

    /// Converts the phase into the abandoned phase, preserving the error.
    fn into_abandoned_state(self, err: PhaseError) -> StateMachine {
        PhaseState::<Abandoned>::new(self.shared, err).into()
    }
}
