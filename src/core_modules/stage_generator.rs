// THEORY:
// The `StageGenerator` is the configuration model of a parameter-sweep
// experiment. The user places one or more candidate operations at each stage of
// the pipeline; the generator then produces one fully specified pipeline per
// combination of choices.
//
// Key architectural principles:
// 1.  **Keyed Candidate Lists**: Candidates are grouped under a `StageKey`
//     (order + operation kind). Each list keeps insertion order, may hold equal
//     operations more than once, and is never empty: removing the last
//     candidate removes the key.
// 2.  **Delegated Enumeration**: The cartesian product itself is computed by the
//     generic `CombinationGenerator`. This module only re-attaches the domain
//     keys to the positional tuples it gets back.
// 3.  **Deterministic Rendering**: The externally consumed artifact is an ordered
//     `Vec<Operation>` per combination, sorted by `StageKey`. Because the
//     candidate sets live in a `BTreeMap`, the rendering is a pure function of
//     the keys and never of the order of `add_item` calls.
// 4.  **Flat Item Exchange**: For persistence the generator exports and imports a
//     flat list of `Item { order, operation }`. Replaying the items through
//     `add_item` restores the exact same candidate sets, however the persisted
//     form chose to group them.

use crate::core_modules::multiple_loop::CombinationGenerator;
use crate::core_modules::operation::Operation;
use crate::core_modules::stage_key::StageKey;
use crate::error::{SweepError, SweepResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One candidate operation together with the stage order it was added at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub order: usize,
    pub operation: Operation,
}

impl Item {
    pub fn new(order: usize, operation: Operation) -> Self {
        Self { order, operation }
    }

    pub fn key(&self) -> StageKey {
        StageKey::for_operation(self.order, &self.operation)
    }
}

/// One selected operation per stage key.
pub type Combination = BTreeMap<StageKey, Operation>;

/// Candidate operations per stage key, and the combinations they span.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageGenerator {
    candidates: BTreeMap<StageKey, Vec<Operation>>,
}

impl StageGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `operation` to the candidates of its key, creating the key if needed.
    pub fn add_item(&mut self, order: usize, operation: Operation) -> StageKey {
        let key = StageKey::for_operation(order, &operation);
        let candidates = self.candidates.entry(key).or_default();
        candidates.push(operation);
        tracing::debug!(key = %key, candidates = candidates.len(), "Added candidate operation");
        key
    }

    /// Removes every candidate stored under the key of (`order`, `operation`).
    pub fn clear_item(&mut self, order: usize, operation: &Operation) -> SweepResult<Vec<Operation>> {
        let key = StageKey::for_operation(order, operation);
        let removed = self
            .candidates
            .remove(&key)
            .ok_or_else(|| SweepError::KeyNotFound(key.to_string()))?;
        tracing::debug!(key = %key, removed = removed.len(), "Cleared stage key");
        Ok(removed)
    }

    /// Removes the first candidate equal to `operation`. The key disappears with
    /// its last candidate.
    pub fn remove_item(&mut self, order: usize, operation: &Operation) -> SweepResult<Operation> {
        let key = StageKey::for_operation(order, operation);
        let candidates = self
            .candidates
            .get_mut(&key)
            .ok_or_else(|| SweepError::KeyNotFound(key.to_string()))?;
        let position = candidates
            .iter()
            .position(|candidate| candidate == operation)
            .ok_or_else(|| SweepError::OperationNotFound(format!("{} at {}", operation, key)))?;

        let removed = candidates.remove(position);
        if candidates.is_empty() {
            self.candidates.remove(&key);
        }
        Ok(removed)
    }

    /// Snapshot of the candidate lists.
    pub fn items(&self) -> BTreeMap<StageKey, Vec<Operation>> {
        self.candidates.clone()
    }

    /// Snapshot of the keys, in ascending order.
    pub fn keys(&self) -> Vec<StageKey> {
        self.candidates.keys().copied().collect()
    }

    pub fn candidates(&self, key: &StageKey) -> Option<&[Operation]> {
        self.candidates.get(key).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Number of combinations `combinations` would produce, or `None` when it
    /// does not fit in a `usize`.
    pub fn combination_count(&self) -> Option<usize> {
        if self.candidates.is_empty() {
            return Some(0);
        }
        self.candidates
            .values()
            .map(Vec::len)
            .try_fold(1usize, |acc, n| acc.checked_mul(n))
    }

    /// Keys holding more than one candidate, i.e. the swept axes.
    pub fn varied_keys(&self) -> Vec<StageKey> {
        self.candidates
            .iter()
            .filter(|(_, candidates)| candidates.len() > 1)
            .map(|(key, _)| *key)
            .collect()
    }

    /// Every combination of one candidate per key.
    ///
    /// Fails with `EmptyParameter` only if a candidate list was left empty, which
    /// the mutators never do.
    pub fn combinations(&self) -> SweepResult<Vec<Combination>> {
        let generator =
            CombinationGenerator::new(self.candidates.iter().map(|(key, ops)| (*key, ops.clone())))?;

        tracing::debug!(
            keys = generator.names().len(),
            varied = generator.varied().len(),
            combinations = generator.len(),
            "Generated stage combinations"
        );

        Ok(generator.combinations_map())
    }

    /// Every combination rendered as an operation sequence in key order.
    pub fn combinations_operations(&self) -> SweepResult<Vec<Vec<Operation>>> {
        Ok(self.combinations()?.into_iter().map(render).collect())
    }

    /// Flattens the candidate sets into one item per operation instance.
    pub fn export_items(&self) -> Vec<Item> {
        self.candidates
            .iter()
            .flat_map(|(key, ops)| ops.iter().map(move |op| Item::new(key.order, op.clone())))
            .collect()
    }

    /// Replays `add_item` for every item.
    pub fn import_items<I>(&mut self, items: I)
    where
        I: IntoIterator<Item = Item>,
    {
        for item in items {
            self.add_item(item.order, item.operation);
        }
    }

    pub fn from_items<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Item>,
    {
        let mut generator = Self::new();
        generator.import_items(items);
        generator
    }
}

/// Orders the operations of a combination by ascending stage key.
pub fn render(combination: Combination) -> Vec<Operation> {
    // BTreeMap iteration is already sorted by `StageKey`.
    combination.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn smoothing(kernel_size: u32) -> Operation {
        Operation::Smoothing { kernel_size }
    }

    fn threshold(value: u32) -> Operation {
        Operation::Threshold { value }
    }

    #[test]
    fn add_item_appends_in_insertion_order() {
        let mut generator = StageGenerator::new();
        let k1 = generator.add_item(0, smoothing(3));
        let k2 = generator.add_item(0, smoothing(5));
        let k3 = generator.add_item(0, smoothing(3));

        assert_eq!(k1, k2);
        assert_eq!(k2, k3);
        assert_eq!(generator.keys(), vec![k1]);
        assert_eq!(generator.candidates(&k1).unwrap(), &[smoothing(3), smoothing(5), smoothing(3)]);
    }

    #[test]
    fn same_order_different_kind_are_separate_axes() {
        let mut generator = StageGenerator::new();
        generator.add_item(0, smoothing(3));
        generator.add_item(0, Operation::ImageQuality);
        generator.add_item(0, Operation::AverageIntensity);

        assert_eq!(generator.keys().len(), 3);
        assert_eq!(generator.combination_count(), Some(1));
    }

    #[test]
    fn combinations_render_sorted_by_key() {
        let mut generator = StageGenerator::new();
        generator.add_item(1, threshold(10));
        generator.add_item(0, smoothing(3));
        generator.add_item(0, smoothing(5));

        let sequences = generator.combinations_operations().unwrap();
        assert_eq!(
            sequences,
            vec![vec![smoothing(3), threshold(10)], vec![smoothing(5), threshold(10)]]
        );
    }

    #[test]
    fn rendering_ignores_insertion_order() {
        let mut a = StageGenerator::new();
        a.add_item(2, Operation::PeakCount { max: 8 });
        a.add_item(0, smoothing(3));
        a.add_item(1, Operation::HoughTransform { resolution: 1.0 });

        let mut b = StageGenerator::new();
        b.add_item(1, Operation::HoughTransform { resolution: 1.0 });
        b.add_item(0, smoothing(3));
        b.add_item(2, Operation::PeakCount { max: 8 });

        assert_eq!(a.combinations_operations().unwrap(), b.combinations_operations().unwrap());
        assert_eq!(a.combinations_operations().unwrap(), a.combinations_operations().unwrap());
    }

    #[test]
    fn every_key_appears_once_per_combination() {
        let mut generator = StageGenerator::new();
        generator.add_item(0, smoothing(3));
        generator.add_item(0, smoothing(5));
        generator.add_item(1, Operation::HoughTransform { resolution: 0.5 });
        generator.add_item(1, Operation::HoughTransform { resolution: 1.0 });
        generator.add_item(1, Operation::HoughTransform { resolution: 2.0 });
        generator.add_item(2, threshold(10));

        let keys = generator.keys();
        let combinations = generator.combinations().unwrap();
        assert_eq!(combinations.len(), 2 * 3);
        assert_eq!(Some(combinations.len()), generator.combination_count());
        for combination in &combinations {
            assert_eq!(combination.keys().copied().collect::<Vec<_>>(), keys);
        }
        for sequence in generator.combinations_operations().unwrap() {
            assert_eq!(sequence.len(), keys.len());
        }
    }

    #[test]
    fn varied_keys_skip_single_candidates() {
        let mut generator = StageGenerator::new();
        let swept = generator.add_item(0, smoothing(3));
        generator.add_item(0, smoothing(5));
        generator.add_item(1, threshold(10));

        assert_eq!(generator.varied_keys(), vec![swept]);
    }

    #[test]
    fn empty_generator_has_no_combinations() {
        let generator = StageGenerator::new();
        assert_eq!(generator.combination_count(), Some(0));
        assert!(generator.combinations().unwrap().is_empty());
        assert!(generator.combinations_operations().unwrap().is_empty());
    }

    #[test]
    fn combination_count_reports_overflow() {
        let mut generator = StageGenerator::new();
        for order in 0..65 {
            generator.add_item(order, smoothing(3));
            generator.add_item(order, smoothing(5));
        }
        assert_eq!(generator.combination_count(), None);

        generator.clear_item(64, &smoothing(3)).unwrap();
        assert_eq!(generator.combination_count(), None);
        generator.clear_item(63, &smoothing(3)).unwrap();
        assert_eq!(generator.combination_count(), Some(1usize << 63));
    }

    #[test]
    fn emptied_candidate_list_is_an_error() {
        let mut generator = StageGenerator::new();
        let key = generator.add_item(0, smoothing(3));
        generator.candidates.insert(key, Vec::new());

        let err = generator.combinations().unwrap_err();
        assert!(matches!(err, SweepError::EmptyParameter(name) if name == key.to_string()));
    }

    #[test]
    fn nan_candidate_can_be_removed_and_round_trips() {
        let nan = Operation::HoughTransform { resolution: f64::NAN };
        let mut generator = StageGenerator::new();
        generator.add_item(0, nan.clone());
        generator.add_item(0, Operation::HoughTransform { resolution: 1.0 });

        assert_eq!(StageGenerator::from_items(generator.export_items()), generator);

        generator.remove_item(0, &nan).unwrap();
        assert_eq!(
            generator.combinations_operations().unwrap(),
            vec![vec![Operation::HoughTransform { resolution: 1.0 }]]
        );
    }

    #[test]
    fn clear_item_removes_whole_key() {
        let mut generator = StageGenerator::new();
        generator.add_item(0, smoothing(3));
        generator.add_item(0, smoothing(5));
        generator.add_item(1, threshold(10));

        let removed = generator.clear_item(0, &smoothing(99)).unwrap();
        assert_eq!(removed, vec![smoothing(3), smoothing(5)]);
        assert_eq!(generator.keys().len(), 1);
    }

    #[test]
    fn clear_item_on_missing_key_fails_and_changes_nothing() {
        let mut generator = StageGenerator::new();
        generator.add_item(0, smoothing(3));
        let before = generator.items();

        let err = generator.clear_item(1, &smoothing(3)).unwrap_err();
        assert!(matches!(err, SweepError::KeyNotFound(_)));
        assert_eq!(generator.items(), before);
    }

    #[test]
    fn remove_item_drops_key_with_last_candidate() {
        let mut generator = StageGenerator::new();
        let key = generator.add_item(0, smoothing(3));
        generator.add_item(0, smoothing(5));

        assert_eq!(generator.remove_item(0, &smoothing(3)).unwrap(), smoothing(3));
        assert_eq!(generator.candidates(&key).unwrap(), &[smoothing(5)]);

        let err = generator.remove_item(0, &smoothing(3)).unwrap_err();
        assert!(matches!(err, SweepError::OperationNotFound(_)));

        generator.remove_item(0, &smoothing(5)).unwrap();
        assert!(generator.is_empty());
        assert!(matches!(
            generator.remove_item(0, &smoothing(5)),
            Err(SweepError::KeyNotFound(_))
        ));
    }

    #[test]
    fn items_returns_a_copy() {
        let mut generator = StageGenerator::new();
        generator.add_item(0, smoothing(3));

        let mut snapshot = generator.items();
        snapshot.clear();
        assert_eq!(generator.keys().len(), 1);
    }

    #[test]
    fn export_then_import_restores_candidate_sets() {
        let mut generator = StageGenerator::new();
        generator.add_item(0, smoothing(5));
        generator.add_item(0, smoothing(3));
        generator.add_item(0, smoothing(5));
        generator.add_item(0, Operation::AverageIntensity);
        generator.add_item(3, threshold(10));

        let items = generator.export_items();
        assert_eq!(items.len(), 5);
        assert!(items.contains(&Item::new(3, threshold(10))));

        let restored = StageGenerator::from_items(items.clone());
        assert_eq!(restored, generator);

        // Grouping of the flat list does not matter.
        let mut reversed = items;
        reversed.reverse();
        let mut shuffled = StageGenerator::new();
        shuffled.import_items(reversed.into_iter().filter(|i| i.operation.kind() != smoothing(0).kind()));
        for item in generator.export_items().into_iter().filter(|i| i.operation.kind() == smoothing(0).kind()) {
            shuffled.add_item(item.order, item.operation);
        }
        assert_eq!(shuffled, generator);
    }
}
