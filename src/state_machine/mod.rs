//! The state machine that drives the coordinator through its rounds.
//!
//! # Overview
//!
//! The state machine is driven by a single task that owns all round state.
//! Each round passes through the phases
//!
//! ```text
//! AwaitingParticipants -> Selecting -> Broadcasting -> Collecting
//!     -> Aggregating -> Completed
//! ```
//!
//! A round that cannot finish ends up in `Abandoned` instead, which either
//! opens the next round or shuts the machine down. `Shutdown` is the
//! terminal phase.
//!
//! The connection tasks communicate with the state machine through the
//! [`RequestSender`] and observe it through the [`EventSubscriber`].

pub mod coordinator;
pub mod events;
pub mod phases;
pub mod requests;

use derive_more::From;

use self::{
    coordinator::CoordinatorState,
    events::{EventPublisher, EventSubscriber, StatusEmitter},
    phases::{
        Abandoned,
        Aggregating,
        AwaitingParticipants,
        Broadcasting,
        Collecting,
        Completed,
        PhaseName,
        PhaseState,
        Selecting,
        Shared,
        Shutdown,
    },
    requests::{RequestReceiver, RequestSender},
};
use crate::{
    coordinator::{aggregator::AggregationEngine, registry::Registry, selector::ParticipantSelector},
    settings::{
        ModelSettings,
        PrivacySettings,
        RoundSettings,
        SelectionSettings,
        TransportSettings,
    },
};

/// The state machine, wrapping the state of the current phase.
#[derive(From)]
pub enum StateMachine {
    AwaitingParticipants(PhaseState<AwaitingParticipants>),
    Selecting(PhaseState<Selecting>),
    Broadcasting(PhaseState<Broadcasting>),
    Collecting(PhaseState<Collecting>),
    Aggregating(PhaseState<Aggregating>),
    Completed(PhaseState<Completed>),
    Abandoned(PhaseState<Abandoned>),
    Shutdown(PhaseState<Shutdown>),
}

impl StateMachine {
    /// Moves the state machine to the next phase and consumes the current
    /// one. Returns `None` if the machine reached its terminal phase.
    pub async fn next(self) -> Option<Self> {
        match self {
            StateMachine::AwaitingParticipants(state) => state.run_phase().await,
            StateMachine::Selecting(state) => state.run_phase().await,
            StateMachine::Broadcasting(state) => state.run_phase().await,
            StateMachine::Collecting(state) => state.run_phase().await,
            StateMachine::Aggregating(state) => state.run_phase().await,
            StateMachine::Completed(state) => state.run_phase().await,
            StateMachine::Abandoned(state) => state.run_phase().await,
            StateMachine::Shutdown(state) => state.run_phase().await,
        }
    }

    /// Runs the state machine until it shuts down.
    pub async fn run(mut self) -> Option<()> {
        loop {
            self = self.next().await?;
        }
    }
}

/// The handles the connection layer needs to talk to a running state
/// machine.
pub struct StateMachineHandle {
    /// The sender half of the request channel.
    pub requests: RequestSender,
    /// The subscriber for the state machine events.
    pub events: EventSubscriber,
    /// A status event emitter for the connection tasks.
    pub status: StatusEmitter,
}

/// The initializer assembles the state machine and its channels from the
/// validated settings.
pub struct StateMachineInitializer {
    round: RoundSettings,
    transport: TransportSettings,
    selection: SelectionSettings,
    privacy: PrivacySettings,
    model: ModelSettings,
    registry: Registry,
}

impl StateMachineInitializer {
    pub fn new(
        round: RoundSettings,
        transport: TransportSettings,
        selection: SelectionSettings,
        privacy: PrivacySettings,
        model: ModelSettings,
        registry: Registry,
    ) -> Self {
        Self {
            round,
            transport,
            selection,
            privacy,
            model,
            registry,
        }
    }

    /// Initializes a new state machine in its first phase.
    pub fn init(self) -> (StateMachine, StateMachineHandle) {
        let state = CoordinatorState::new(&self.round, &self.transport, &self.model);
        let (request_rx, request_tx) = RequestReceiver::new();
        let (publisher, subscriber) =
            EventPublisher::init(state.round_id, PhaseName::AwaitingParticipants);
        let status = publisher.status_emitter();

        let shared = Shared::new(
            state,
            self.registry,
            ParticipantSelector::new(self.selection),
            AggregationEngine::new(self.privacy),
            request_rx,
            publisher,
        );

        let handle = StateMachineHandle {
            requests: request_tx,
            events: subscriber,
            status,
        };
        (
            PhaseState::<AwaitingParticipants>::new(shared).into(),
            handle,
        )
    }
}

#[cfg(test)]
impl StateMachine {
    pub fn is_awaiting_participants(&self) -> bool {
        matches!(self, StateMachine::AwaitingParticipants(_))
    }

    pub fn is_abandoned(&self) -> bool {
        matches!(self, StateMachine::Abandoned(_))
    }

    pub fn is_shutdown(&self) -> bool {
        matches!(self, StateMachine::Shutdown(_))
    }

    pub fn round_id(&self) -> u64 {
        match self {
            StateMachine::AwaitingParticipants(state) => state.shared.round_id(),
            StateMachine::Selecting(state) => state.shared.round_id(),
            StateMachine::Broadcasting(state) => state.shared.round_id(),
            StateMachine::Collecting(state) => state.shared.round_id(),
            StateMachine::Aggregating(state) => state.shared.round_id(),
            StateMachine::Completed(state) => state.shared.round_id(),
            StateMachine::Abandoned(state) => state.shared.round_id(),
            StateMachine::Shutdown(state) => state.shared.round_id(),
        }
    }
}
