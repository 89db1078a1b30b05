//! Participant context descriptors.
//!
//! Each participant declares a [`ContextDescriptor`] when it registers. The
//! descriptor feeds the context-similarity term of the participant selector:
//! rounds can be targeted at a context (for example a region, or a set of
//! capabilities such as `routing` or `music`), and participants whose
//! declared context overlaps the target score higher.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// A structured description of a participant's capabilities and environment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContextDescriptor {
    /// The geographic or logical region the participant operates in.
    pub region: String,
    /// The set of capabilities the participant supports.
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
}

impl ContextDescriptor {
    pub fn new(region: impl Into<String>, capabilities: impl IntoIterator<Item = String>) -> Self {
        Self {
            region: region.into(),
            capabilities: capabilities.into_iter().collect(),
        }
    }

    /// Computes the similarity between this context and `other`, in `[0, 1]`.
    ///
    /// The score is the overlap (Jaccard index) of the two token sets, where
    /// a token set is the region plus the capabilities. Identical contexts
    /// score `1.0`, fully disjoint contexts score `0.0`.
    pub fn similarity(&self, other: &ContextDescriptor) -> f64 {
        let mine = self.tokens();
        let theirs = other.tokens();
        let union = mine.union(&theirs).count();
        if union == 0 {
            // both contexts empty: nothing distinguishes them
            return 1.;
        }
        let shared = mine.intersection(&theirs).count();
        shared as f64 / union as f64
    }

    fn tokens(&self) -> BTreeSet<&str> {
        let mut tokens: BTreeSet<&str> = self.capabilities.iter().map(String::as_str).collect();
        if !self.region.is_empty() {
            tokens.insert(self.region.as_str());
        }
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(region: &str, capabilities: &[&str]) -> ContextDescriptor {
        ContextDescriptor::new(region, capabilities.iter().map(|c| c.to_string()))
    }

    #[test]
    fn test_identical_contexts_are_maximally_similar() {
        let a = descriptor("north", &["routing", "music"]);
        assert_eq!(a.similarity(&a.clone()), 1.);
    }

    #[test]
    fn test_disjoint_contexts_score_zero() {
        let a = descriptor("north", &["routing"]);
        let b = descriptor("south", &["music"]);
        assert_eq!(a.similarity(&b), 0.);
    }

    #[test]
    fn test_partial_overlap() {
        let a = descriptor("north", &["routing"]);
        let b = descriptor("north", &["music"]);
        // tokens: {north, routing} vs {north, music} => 1 shared of 3
        let score = a.similarity(&b);
        assert!((score - 1. / 3.).abs() < f64::EPSILON);
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let a = descriptor("north", &["routing", "charging"]);
        let b = descriptor("south", &["routing"]);
        assert_eq!(a.similarity(&b), b.similarity(&a));
    }

    #[test]
    fn test_empty_contexts() {
        let empty = ContextDescriptor::default();
        assert_eq!(empty.similarity(&empty.clone()), 1.);
    }
}
