//! This module provides the state machine's event channels.
//!
//! The phases publish their progress through an [`EventPublisher`], and the
//! rest of the process (connection handling, binaries, tests) observes it
//! through an [`EventSubscriber`]. Continuous state (current phase, latest
//! global model) goes over watch channels where only the most recent value
//! matters; discrete occurrences (registrations, received updates, round
//! outcomes) go over a broadcast channel.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use tokio::sync::{broadcast, watch};

use crate::{
    message::ParticipantId,
    model::Model,
    state_machine::phases::PhaseName,
};

/// Number of discrete events buffered per subscriber before it starts
/// lagging.
const STATUS_EVENT_CAPACITY: usize = 256;

/// An event emitted by the state machine, tagged with the round it occurred
/// in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event<E> {
    /// Metadata that associates this event to the round in which it is
    /// emitted.
    pub round_id: u64,
    /// The event itself
    pub event: E,
}

/// Global model update event.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelUpdate {
    Invalidate,
    New(Arc<Model>),
}

/// The reason a round was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum AbandonReason {
    /// No participant registered within the registration window.
    #[display(fmt = "no participants registered in time")]
    NoParticipants,
    /// Every broadcast send failed, leaving nobody to collect from.
    #[display(fmt = "broadcast reached no participant")]
    BroadcastFailed,
    /// Fewer than the minimum number of updates arrived before the collection
    /// deadline.
    #[display(fmt = "not enough updates before the deadline")]
    NotEnoughUpdates,
}

/// A discrete occurrence worth reporting outside the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    /// A participant registered.
    Registered { participant_id: ParticipantId },
    /// A participant's registration was removed.
    Unregistered { participant_id: ParticipantId },
    /// A round opened with the given selection.
    RoundStarted { selected: Vec<ParticipantId> },
    /// The current model was sent to a selected participant.
    BroadcastSent { participant_id: ParticipantId },
    /// An update was accepted into the current round.
    UpdateReceived { participant_id: ParticipantId },
    /// The round aggregated successfully.
    RoundCompleted { metric: Option<f64> },
    /// The round was abandoned before aggregation.
    RoundAbandoned { reason: AbandonReason },
}

/// The `EventPublisher` holds the senders for the state machine events.
#[derive(Debug)]
pub struct EventPublisher {
    round_id: Arc<AtomicU64>,
    phase_tx: watch::Sender<Event<PhaseName>>,
    model_tx: watch::Sender<Event<ModelUpdate>>,
    status_tx: broadcast::Sender<Event<StatusEvent>>,
}

/// The `EventSubscriber` holds the receivers for the state machine events.
#[derive(Debug)]
pub struct EventSubscriber {
    phase_rx: watch::Receiver<Event<PhaseName>>,
    model_rx: watch::Receiver<Event<ModelUpdate>>,
    status_tx: broadcast::Sender<Event<StatusEvent>>,
}

impl EventPublisher {
    /// Initializes a new event publisher and subscriber pair.
    pub fn init(round_id: u64, phase: PhaseName) -> (Self, EventSubscriber) {
        let round_id = Arc::new(AtomicU64::new(round_id));
        let (phase_tx, phase_rx) = watch::channel(Event {
            round_id: round_id.load(Ordering::SeqCst),
            event: phase,
        });
        let (model_tx, model_rx) = watch::channel(Event {
            round_id: round_id.load(Ordering::SeqCst),
            event: ModelUpdate::Invalidate,
        });
        let (status_tx, _) = broadcast::channel(STATUS_EVENT_CAPACITY);

        let publisher = EventPublisher {
            round_id: round_id.clone(),
            phase_tx,
            model_tx,
            status_tx: status_tx.clone(),
        };
        let subscriber = EventSubscriber {
            phase_rx,
            model_rx,
            status_tx,
        };
        (publisher, subscriber)
    }

    pub fn set_round_id(&mut self, id: u64) {
        self.round_id.store(id, Ordering::SeqCst);
    }

    pub fn round_id(&self) -> u64 {
        self.round_id.load(Ordering::SeqCst)
    }

    /// Emits a phase event. Failing to publish means there is no subscriber
    /// left, which the state machine tolerates.
    pub fn broadcast_phase(&mut self, phase: PhaseName) {
        let _ = self.phase_tx.send(Event {
            round_id: self.round_id(),
            event: phase,
        });
    }

    /// Emits a global model event.
    pub fn broadcast_model(&mut self, update: ModelUpdate) {
        let _ = self.model_tx.send(Event {
            round_id: self.round_id(),
            event: update,
        });
    }

    /// Emits a discrete status event.
    pub fn broadcast_status(&mut self, event: StatusEvent) {
        let _ = self.status_tx.send(Event {
            round_id: self.round_id(),
            event,
        });
    }

    /// Creates an emitter handle for tasks outside the state machine.
    pub fn status_emitter(&self) -> StatusEmitter {
        StatusEmitter {
            round_id: self.round_id.clone(),
            status_tx: self.status_tx.clone(),
        }
    }
}

/// A cloneable handle for emitting status events from outside the state
/// machine, for instance from the connection tasks.
#[derive(Debug, Clone)]
pub struct StatusEmitter {
    round_id: Arc<AtomicU64>,
    status_tx: broadcast::Sender<Event<StatusEvent>>,
}

impl StatusEmitter {
    pub fn emit(&self, event: StatusEvent) {
        let _ = self.status_tx.send(Event {
            round_id: self.round_id.load(Ordering::SeqCst),
            event,
        });
    }
}

impl EventSubscriber {
    /// Gets a listener for the phase events.
    pub fn phase_listener(&self) -> EventListener<PhaseName> {
        EventListener(self.phase_rx.clone())
    }

    /// Gets a listener for the global model events.
    pub fn model_listener(&self) -> EventListener<ModelUpdate> {
        EventListener(self.model_rx.clone())
    }

    /// Gets a listener for the discrete status events.
    pub fn status_listener(&self) -> StatusListener {
        StatusListener(self.status_tx.subscribe())
    }
}

/// A listener for one of the continuous event channels.
#[derive(Debug, Clone)]
pub struct EventListener<E>(watch::Receiver<Event<E>>);

impl<E> EventListener<E>
where
    E: Clone,
{
    /// Returns the most recently published event.
    pub fn get_latest(&self) -> Event<E> {
        self.0.borrow().clone()
    }

    /// Waits for the next event. `None` means the publisher dropped.
    pub async fn next(&mut self) -> Option<Event<E>> {
        self.0.changed().await.ok()?;
        Some(self.0.borrow().clone())
    }
}

/// A listener for the discrete status events.
#[derive(Debug)]
pub struct StatusListener(broadcast::Receiver<Event<StatusEvent>>);

impl StatusListener {
    /// Waits for the next status event, skipping over any the listener was
    /// too slow to read. `None` means the publisher dropped.
    pub async fn next(&mut self) -> Option<Event<StatusEvent>> {
        loop {
            match self.0.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_phase_listener_tracks_latest() {
        let (mut publisher, subscriber) = EventPublisher::init(0, PhaseName::AwaitingParticipants);
        let listener = subscriber.phase_listener();
        assert_eq!(
            listener.get_latest(),
            Event {
                round_id: 0,
                event: PhaseName::AwaitingParticipants
            }
        );

        publisher.set_round_id(1);
        publisher.broadcast_phase(PhaseName::Selecting);
        assert_eq!(
            listener.get_latest(),
            Event {
                round_id: 1,
                event: PhaseName::Selecting
            }
        );
    }

    #[tokio::test]
    async fn test_status_listener_receives_emitter_events() {
        let (publisher, subscriber) = EventPublisher::init(3, PhaseName::Collecting);
        let mut listener = subscriber.status_listener();
        let emitter = publisher.status_emitter();

        emitter.emit(StatusEvent::Registered {
            participant_id: "anna".to_string(),
        });
        let event = listener.next().await.unwrap();
        assert_eq!(event.round_id, 3);
        assert_eq!(
            event.event,
            StatusEvent::Registered {
                participant_id: "anna".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_model_listener_sees_new_model() {
        let (mut publisher, subscriber) = EventPublisher::init(0, PhaseName::AwaitingParticipants);
        let mut listener = subscriber.model_listener();
        assert_eq!(listener.get_latest().event, ModelUpdate::Invalidate);

        let model = Arc::new(Model::from(vec![1.0, 2.0]));
        publisher.broadcast_model(ModelUpdate::New(model.clone()));
        let event = listener.next().await.unwrap();
        assert_eq!(event.event, ModelUpdate::New(model));
    }
}
