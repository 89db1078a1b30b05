//! The phase that folds the collected updates into the global model.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::{
    message::{ParticipantId, Update},
    state_machine::{
        events::ModelUpdate,
        phases::{Completed, Phase, PhaseError, PhaseName, PhaseState, Shared},
        StateMachine,
    },
};

/// The aggregating phase.
#[derive(Debug)]
pub struct Aggregating {
    /// The updates accepted during collection.
    updates: BTreeMap<ParticipantId, Update>,
    /// The averaged training metric of the aggregated updates.
    metric: Option<f64>,
}

#[async_trait]
impl Phase for PhaseState<Aggregating> {
    const NAME: PhaseName = PhaseName::Aggregating;

    async fn run(&mut self) -> Result<(), PhaseError> {
        let aggregate = self
            .shared
            .aggregator
            .aggregate(&self.private.updates, self.shared.state.model_length)?;

        let mut model = (*self.shared.state.global_model).clone();
        model.add_scaled(&aggregate.delta, 1.0);
        let model = Arc::new(model);

        self.shared.state.global_model = model.clone();
        self.shared.events.broadcast_model(ModelUpdate::New(model));
        self.private.metric = aggregate.metric;

        info!(
            "aggregated {} updates into the global model",
            self.private.updates.len(),
        );
        Ok(())
    }

    fn next(self) -> Option<StateMachine> {
        Some(PhaseState::<Completed>::new(self.shared, self.private.metric).into())
    }
}

impl PhaseState<Aggregating> {
    pub fn new(shared: Shared, updates: BTreeMap<ParticipantId, Update>) -> Self {
        Self {
            private: Aggregating {
                updates,
                metric: None,
            },
            shared,
        }
    }
}
