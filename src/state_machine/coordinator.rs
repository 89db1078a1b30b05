//! The coordinator state.

use std::{sync::Arc, time::Duration};

use crate::{
    model::Model,
    settings::{ModelSettings, RoundSettings, TransportSettings},
};

/// The state of the coordinator that is shared across rounds.
#[derive(Debug, Clone)]
pub struct CoordinatorState {
    /// The current round number. Rounds are numbered from `1`; the number is
    /// assigned when the round opens and is never reused, even when the
    /// round is abandoned.
    pub round_id: u64,
    /// The total number of rounds in the run.
    pub rounds: u64,
    /// The target number of participants selected per round.
    pub target_participants: usize,
    /// The minimal number of updates required for a round to aggregate.
    pub min_updates: usize,
    /// How long the registration window holds open.
    pub registration_window: Duration,
    /// How long the collection phase waits for updates.
    pub collection_deadline: Duration,
    /// The per-peer send timeout.
    pub send_timeout: Duration,
    /// The fixed number of weights of the model.
    pub model_length: usize,
    /// The current global model. Replaced, never mutated: readers hold onto
    /// the `Arc` and always observe a consistent vector.
    pub global_model: Arc<Model>,
}

impl CoordinatorState {
    pub fn new(
        round: &RoundSettings,
        transport: &TransportSettings,
        model: &ModelSettings,
    ) -> Self {
        Self {
            round_id: 0,
            rounds: round.count,
            target_participants: round.participants,
            min_updates: round.min_updates,
            registration_window: Duration::from_secs(round.time.registration),
            collection_deadline: Duration::from_secs(round.time.collection),
            send_timeout: Duration::from_secs(transport.send_timeout),
            model_length: model.length,
            global_model: Arc::new(Model::zeros(model.length)),
        }
    }
}
