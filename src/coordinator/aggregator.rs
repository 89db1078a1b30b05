//! Aggregation of participant updates.
//!
//! The [`AggregationEngine`] combines the updates collected during one round
//! into a single delta: a weighted average (weights proportional to each
//! update's local sample count, uniform when no counts were reported),
//! perturbed element-wise with zero-mean Laplace noise whose scale is
//! `sensitivity / epsilon`. A smaller privacy budget therefore yields larger
//! noise; a sensitivity of zero disables the mechanism.
//!
//! The noise generator is a ChaCha20 stream seeded from the configuration
//! when a seed is given, which makes aggregation bit-reproducible.

use std::collections::BTreeMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use thiserror::Error;
use tracing::debug;

use crate::{
    message::{ParticipantId, Update},
    model::Model,
    settings::PrivacySettings,
};

#[derive(Debug, Error)]
pub enum AggregationError {
    /// Aggregating zero updates is a precondition violation: the collection
    /// phase never aggregates below the minimum response count.
    #[error("no updates to aggregate")]
    NoUpdates,
    /// An update's delta has the wrong number of weights.
    #[error("update from {participant_id:?} has length {actual}, expected {expected}")]
    ModelLengthMismatch {
        participant_id: ParticipantId,
        expected: usize,
        actual: usize,
    },
}

/// The result of aggregating one round's updates.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    /// The combined, noised delta to apply to the global model.
    pub delta: Model,
    /// The mean of the metrics the participants reported, if any did.
    pub metric: Option<f64>,
}

pub struct AggregationEngine {
    settings: PrivacySettings,
    rng: ChaCha20Rng,
}

impl AggregationEngine {
    pub fn new(settings: PrivacySettings) -> Self {
        let rng = match settings.seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed),
            None => ChaCha20Rng::from_entropy(),
        };
        Self { settings, rng }
    }

    /// Aggregates the collected updates of one round into a noised delta.
    pub fn aggregate(
        &mut self,
        updates: &BTreeMap<ParticipantId, Update>,
        model_length: usize,
    ) -> Result<Aggregate, AggregationError> {
        if updates.is_empty() {
            return Err(AggregationError::NoUpdates);
        }
        for (id, update) in updates {
            if update.delta.len() != model_length {
                return Err(AggregationError::ModelLengthMismatch {
                    participant_id: id.clone(),
                    expected: model_length,
                    actual: update.delta.len(),
                });
            }
        }

        let total_samples: u64 = updates.values().map(|update| update.sample_count).sum();
        let mut delta = Model::zeros(model_length);
        if total_samples == 0 {
            debug!("no sample counts reported, falling back to uniform weighting");
            let weight = 1. / updates.len() as f64;
            for update in updates.values() {
                delta.add_scaled(&update.delta, weight);
            }
        } else {
            for update in updates.values() {
                let weight = update.sample_count as f64 / total_samples as f64;
                delta.add_scaled(&update.delta, weight);
            }
        }

        self.perturb(&mut delta);

        let metrics: Vec<f64> = updates.values().filter_map(|update| update.metric).collect();
        let metric = if metrics.is_empty() {
            None
        } else {
            Some(metrics.iter().sum::<f64>() / metrics.len() as f64)
        };

        Ok(Aggregate { delta, metric })
    }

    /// Adds zero-mean Laplace noise with scale `sensitivity / epsilon` to
    /// every element.
    fn perturb(&mut self, delta: &mut Model) {
        if self.settings.sensitivity == 0. {
            return;
        }
        let scale = self.settings.sensitivity / self.settings.epsilon;
        for weight in delta.iter_mut() {
            *weight += scale * self.sample_standard_laplace();
        }
    }

    /// Samples Laplace(0, 1) as the difference of two unit exponentials.
    fn sample_standard_laplace(&mut self) -> f64 {
        let u1: f64 = self.rng.gen();
        let u2: f64 = self.rng.gen();
        // u in [0, 1) so the arguments stay in (0, 1]
        (1. - u1).ln() - (1. - u2).ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(id: &str, delta: Vec<f64>, sample_count: u64, metric: Option<f64>) -> Update {
        Update {
            participant_id: id.to_string(),
            round_number: 1,
            delta: Model::from(delta),
            sample_count,
            metric,
        }
    }

    fn updates(entries: Vec<Update>) -> BTreeMap<ParticipantId, Update> {
        entries
            .into_iter()
            .map(|u| (u.participant_id.clone(), u))
            .collect()
    }

    fn noiseless() -> AggregationEngine {
        AggregationEngine::new(PrivacySettings {
            epsilon: 1.,
            sensitivity: 0.,
            seed: Some(1),
        })
    }

    #[test]
    fn test_empty_input_is_an_error() {
        assert!(matches!(
            noiseless().aggregate(&BTreeMap::new(), 2),
            Err(AggregationError::NoUpdates)
        ));
    }

    #[test]
    fn test_weighted_average() {
        let updates = updates(vec![
            update("a", vec![1., 1.], 30, None),
            update("b", vec![4., 0.], 10, None),
        ]);
        let aggregate = noiseless().aggregate(&updates, 2).unwrap();
        // weights 0.75 and 0.25
        assert_eq!(aggregate.delta, Model::from(vec![1.75, 0.75]));
    }

    #[test]
    fn test_uniform_fallback_when_no_sample_counts() {
        let updates = updates(vec![
            update("a", vec![2., 0.], 0, None),
            update("b", vec![0., 2.], 0, None),
        ]);
        let aggregate = noiseless().aggregate(&updates, 2).unwrap();
        assert_eq!(aggregate.delta, Model::from(vec![1., 1.]));
    }

    #[test]
    fn test_metric_is_averaged() {
        let updates = updates(vec![
            update("a", vec![0.], 1, Some(0.8)),
            update("b", vec![0.], 1, Some(0.6)),
            update("c", vec![0.], 1, None),
        ]);
        let aggregate = noiseless().aggregate(&updates, 1).unwrap();
        assert!((aggregate.metric.unwrap() - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let updates = updates(vec![update("a", vec![1., 2., 3.], 1, None)]);
        assert!(matches!(
            noiseless().aggregate(&updates, 2),
            Err(AggregationError::ModelLengthMismatch { .. })
        ));
    }

    #[test]
    fn test_fixed_seed_is_bit_reproducible() {
        let settings = PrivacySettings {
            epsilon: 0.5,
            sensitivity: 1.,
            seed: Some(42),
        };
        let updates = updates(vec![
            update("a", vec![1., 2., 3.], 5, None),
            update("b", vec![3., 2., 1.], 7, None),
        ]);
        let first = AggregationEngine::new(settings).aggregate(&updates, 3).unwrap();
        let second = AggregationEngine::new(settings).aggregate(&updates, 3).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_noise_actually_perturbs() {
        let settings = PrivacySettings {
            epsilon: 0.1,
            sensitivity: 1.,
            seed: Some(7),
        };
        let updates = updates(vec![update("a", vec![1., 1.], 1, None)]);
        let aggregate = AggregationEngine::new(settings).aggregate(&updates, 2).unwrap();
        assert_ne!(aggregate.delta, Model::from(vec![1., 1.]));
    }

    #[test]
    fn test_smaller_budget_larger_noise() {
        let updates = updates(vec![update("a", vec![0.; 512], 1, None)]);
        let magnitude = |epsilon: f64| {
            let settings = PrivacySettings {
                epsilon,
                sensitivity: 1.,
                seed: Some(3),
            };
            let aggregate = AggregationEngine::new(settings).aggregate(&updates, 512).unwrap();
            aggregate.delta.iter().map(|w| w.abs()).sum::<f64>() / 512.
        };
        // identical noise stream, scaled by sensitivity/epsilon
        assert!(magnitude(0.1) > magnitude(10.));
    }
}
