//! Model representation.
//!
//! A [`Model`] is the opaque parameter vector exchanged between the
//! coordinator and the participants: a fixed-length sequence of `f64`
//! weights. The length is fixed for the lifetime of a run; a published
//! global model is never mutated in place, the coordinator always publishes
//! a replacement (see [`ModelUpdate`]).
//!
//! [`ModelUpdate`]: crate::state_machine::events::ModelUpdate

use std::{
    iter::FromIterator,
    slice::{Iter, IterMut},
};

use derive_more::{From, Index, IndexMut, Into};
use serde::{Deserialize, Serialize};

/// A numerical representation of a machine learning model.
#[derive(Debug, Clone, PartialEq, From, Index, IndexMut, Into, Serialize, Deserialize)]
pub struct Model(Vec<f64>);

#[allow(clippy::len_without_is_empty)]
impl Model {
    /// Creates a model of the given length with all weights set to zero.
    pub fn zeros(len: usize) -> Self {
        Model(vec![0.; len])
    }

    /// Gets the number of weights/parameters of this model.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Creates an iterator that yields references to the weights/parameters of this model.
    pub fn iter(&self) -> Iter<'_, f64> {
        self.0.iter()
    }

    /// Creates an iterator that yields mutable references to the weights/parameters of this model.
    pub fn iter_mut(&mut self) -> IterMut<'_, f64> {
        self.0.iter_mut()
    }

    /// Adds `other`, scaled by `scale`, element-wise onto this model.
    ///
    /// # Panics
    /// Panics if the lengths differ. Callers are expected to validate
    /// lengths before aggregating (see [`AggregationEngine`]).
    ///
    /// [`AggregationEngine`]: crate::coordinator::aggregator::AggregationEngine
    pub fn add_scaled(&mut self, other: &Model, scale: f64) {
        assert_eq!(self.len(), other.len());
        for (weight, &delta) in self.0.iter_mut().zip(other.iter()) {
            *weight += scale * delta;
        }
    }
}

impl FromIterator<f64> for Model {
    fn from_iter<I: IntoIterator<Item = f64>>(iter: I) -> Self {
        Model(iter.into_iter().collect())
    }
}

impl IntoIterator for Model {
    type Item = f64;
    type IntoIter = std::vec::IntoIter<f64>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros() {
        let model = Model::zeros(4);
        assert_eq!(model.len(), 4);
        assert!(model.iter().all(|&w| w == 0.));
    }

    #[test]
    fn test_add_scaled() {
        let mut model = Model::from(vec![1., 2., 3.]);
        model.add_scaled(&Model::from(vec![2., 4., 6.]), 0.5);
        assert_eq!(model, Model::from(vec![2., 4., 6.]));
    }

    #[test]
    #[should_panic]
    fn test_add_scaled_length_mismatch() {
        let mut model = Model::zeros(3);
        model.add_scaled(&Model::zeros(2), 1.);
    }
}
