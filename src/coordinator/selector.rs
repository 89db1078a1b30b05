//! Participant selection.
//!
//! Selection is a pure function of the registry snapshot, the round number
//! and the configured weights, so repeated invocations over the same inputs
//! always return the same set. Each candidate is scored by two criteria:
//!
//! - *recency*: participants that have not been selected recently score
//!   higher, which rotates participation across the fleet,
//! - *context similarity*: participants whose declared context overlaps the
//!   round's target context score higher.
//!
//! The relative weighting of the two criteria is configurable (see
//! [`SelectionSettings`]). Ties break by ascending participant id.

use crate::{
    coordinator::registry::RegistrySnapshot,
    message::ParticipantId,
    settings::SelectionSettings,
};

pub struct ParticipantSelector {
    settings: SelectionSettings,
}

impl ParticipantSelector {
    pub fn new(settings: SelectionSettings) -> Self {
        Self { settings }
    }

    /// Selects `min(target_count, snapshot.len())` participants for the
    /// given round. Never returns an empty set for a non-empty snapshot.
    pub fn select(
        &self,
        snapshot: &RegistrySnapshot,
        round_number: u64,
        target_count: usize,
    ) -> Vec<ParticipantId> {
        let mut scored: Vec<(f64, &ParticipantId)> = snapshot
            .iter()
            .map(|candidate| {
                let similarity = match &self.settings.target_context {
                    Some(target) => candidate.context.similarity(target),
                    // no target configured: the criterion cannot
                    // distinguish candidates
                    None => 1.,
                };
                let score = self.settings.recency_weight
                    * recency_score(candidate.last_selected_round, round_number)
                    + self.settings.similarity_weight * similarity;
                (score, &candidate.id)
            })
            .collect();

        // descending score, ties by ascending id; the snapshot is id-sorted
        // so a stable sort on the score alone would suffice, but the explicit
        // key keeps the ordering contract independent of the input order
        scored.sort_by(|(score_a, id_a), (score_b, id_b)| {
            score_b
                .partial_cmp(score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| id_a.cmp(id_b))
        });

        scored
            .into_iter()
            .take(target_count)
            .map(|(_, id)| id.clone())
            .collect()
    }
}

/// Scores how long ago a participant was last selected, in `[0, 1)`.
///
/// `last_selected_round` is `0` for participants that were never selected,
/// which maximizes the gap and therefore the score.
fn recency_score(last_selected_round: u64, round_number: u64) -> f64 {
    let gap = round_number.saturating_sub(last_selected_round);
    1. - 1. / (1. + gap as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        context::ContextDescriptor,
        coordinator::{channel::tests::broken_handle, registry::ParticipantInfo},
    };

    fn info(id: &str, last_selected_round: u64, context: ContextDescriptor) -> ParticipantInfo {
        ParticipantInfo {
            id: id.to_string(),
            channel: broken_handle(),
            context,
            sample_count: 10,
            last_selected_round,
        }
    }

    fn snapshot(ids: &[(&str, u64)]) -> RegistrySnapshot {
        ids.iter()
            .map(|(id, last)| info(id, *last, ContextDescriptor::default()))
            .collect()
    }

    fn selector() -> ParticipantSelector {
        ParticipantSelector::new(SelectionSettings {
            recency_weight: 0.5,
            similarity_weight: 0.5,
            target_context: None,
        })
    }

    #[test]
    fn test_selection_size_is_min_of_target_and_registry() {
        let snapshot = snapshot(&[("a", 0), ("b", 0), ("c", 0)]);
        assert_eq!(selector().select(&snapshot, 1, 2).len(), 2);
        assert_eq!(selector().select(&snapshot, 1, 5).len(), 3);
        assert_eq!(selector().select(&snapshot, 1, 3).len(), 3);
    }

    #[test]
    fn test_non_empty_registry_never_selects_nobody() {
        let snapshot = snapshot(&[("a", 0)]);
        assert_eq!(selector().select(&snapshot, 1, 1), vec!["a".to_string()]);
    }

    #[test]
    fn test_selection_is_deterministic() {
        let snapshot = snapshot(&[("a", 1), ("b", 0), ("c", 2), ("d", 0), ("e", 1)]);
        let first = selector().select(&snapshot, 3, 4);
        for _ in 0..10 {
            assert_eq!(selector().select(&snapshot, 3, 4), first);
        }
    }

    #[test]
    fn test_recency_rotates_participants() {
        // a and b were selected last round, c and d never
        let snapshot = snapshot(&[("a", 2), ("b", 2), ("c", 0), ("d", 0)]);
        let selected = selector().select(&snapshot, 3, 2);
        assert_eq!(selected, vec!["c".to_string(), "d".to_string()]);
    }

    #[test]
    fn test_ties_break_by_ascending_id() {
        let snapshot = snapshot(&[("d", 0), ("c", 0), ("b", 0), ("a", 0)]);
        let selected = selector().select(&snapshot, 1, 2);
        assert_eq!(selected, vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_context_similarity_prefers_matching_candidates() {
        let target = ContextDescriptor::new("north", ["routing".to_string()]);
        let selector = ParticipantSelector::new(SelectionSettings {
            recency_weight: 0.,
            similarity_weight: 1.,
            target_context: Some(target.clone()),
        });

        let snapshot = vec![
            info("far", 0, ContextDescriptor::new("south", ["music".to_string()])),
            info("near", 0, target),
        ];
        assert_eq!(selector.select(&snapshot, 1, 1), vec!["near".to_string()]);
    }

    #[test]
    fn test_scenario_four_of_five() {
        let snapshot = snapshot(&[("A", 0), ("B", 0), ("C", 0), ("D", 0), ("E", 0)]);
        let selected = selector().select(&snapshot, 1, 4);
        assert_eq!(selected.len(), 4);
        // all scores equal, ids break the tie
        assert_eq!(selected, vec!["A", "B", "C", "D"]);
    }
}
