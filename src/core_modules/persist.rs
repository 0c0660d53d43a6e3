// THEORY:
// The `persist` module is the boundary between the in-memory sweep model and its
// saved form. The core only exchanges a flat list of `Item { order, operation }`
// with the outside world; this module turns that list into a document that a
// person can read and edit, and back.
//
// Key architectural principles:
// 1.  **Grouped Presentation**: The document has one section per stage category.
//     Each section lists entries of `{ order, candidates }`. This grouping is a
//     presentation detail only: loading flattens it back into items and replays
//     them through `StageGenerator::import_items`.
// 2.  **Static Section Table**: Sections are reached through `section` /
//     `section_mut`, a `match` on `StageCategory`. Every operation type carries its
//     own serde model (see `Operation`), so no runtime type matching is needed.
// 3.  **Explicit Collision Policy**: Two entries resolving to the same stage key
//     would silently merge or shadow each other. `DuplicatePolicy` makes the
//     choice explicit: keep the first entry and warn (the default), or reject
//     the document.

use crate::core_modules::operation::{Operation, StageCategory};
use crate::core_modules::stage_generator::{Item, StageGenerator};
use crate::core_modules::stage_key::StageKey;
use crate::error::{SweepError, SweepResult};
use crate::experiment::SweepConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// What to do when a document lists the same stage key in two entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Keep the first entry, log a warning and skip the later ones.
    #[default]
    KeepFirst,
    /// Fail the load with `DuplicateKey`.
    Reject,
}

/// The candidates of one stage key, as written in a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEntry {
    pub order: usize,
    pub candidates: Vec<Operation>,
}

/// Saved form of a sweep: optional settings plus candidates grouped by category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<SweepConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pattern_acquisition: Vec<StageEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pre_transform: Vec<StageEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transform: Vec<StageEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub post_transform: Vec<StageEntry>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub result_computation: Vec<StageEntry>,
}

impl SweepDocument {
    pub fn section(&self, category: StageCategory) -> &[StageEntry] {
        match category {
            StageCategory::PatternAcquisition => &self.pattern_acquisition,
            StageCategory::PreTransform => &self.pre_transform,
            StageCategory::Transform => &self.transform,
            StageCategory::PostTransform => &self.post_transform,
            StageCategory::ResultComputation => &self.result_computation,
        }
    }

    pub fn section_mut(&mut self, category: StageCategory) -> &mut Vec<StageEntry> {
        match category {
            StageCategory::PatternAcquisition => &mut self.pattern_acquisition,
            StageCategory::PreTransform => &mut self.pre_transform,
            StageCategory::Transform => &mut self.transform,
            StageCategory::PostTransform => &mut self.post_transform,
            StageCategory::ResultComputation => &mut self.result_computation,
        }
    }

    /// Builds a document from the items exported by `generator`.
    pub fn from_generator(generator: &StageGenerator, config: Option<SweepConfig>) -> Self {
        let mut grouped: BTreeMap<StageKey, Vec<Operation>> = BTreeMap::new();
        for item in generator.export_items() {
            grouped.entry(item.key()).or_default().push(item.operation);
        }

        let mut document = Self { config, ..Self::default() };
        for (key, candidates) in grouped {
            document.section_mut(key.category()).push(StageEntry {
                order: key.order,
                candidates,
            });
        }
        document
    }

    /// Flattens the document into items, applying `policy` to repeated keys.
    pub fn to_items(&self, policy: DuplicatePolicy) -> SweepResult<Vec<Item>> {
        let mut items = Vec::new();
        let mut seen: HashSet<StageKey> = HashSet::new();

        for category in StageCategory::ALL {
            for entry in self.section(category) {
                if entry.candidates.is_empty() {
                    tracing::warn!(section = %category, order = entry.order, "Skipping entry without candidates");
                    continue;
                }

                let mut entry_keys = HashSet::new();
                for operation in &entry.candidates {
                    if operation.category() != category {
                        return Err(SweepError::MisplacedOperation {
                            operation: operation.to_string(),
                            section: category.to_string(),
                        });
                    }
                    entry_keys.insert(StageKey::for_operation(entry.order, operation));
                }

                let mut skipped = HashSet::new();
                for key in &entry_keys {
                    if seen.contains(key) {
                        match policy {
                            DuplicatePolicy::Reject => return Err(SweepError::DuplicateKey(key.to_string())),
                            DuplicatePolicy::KeepFirst => {
                                tracing::warn!(key = %key, "Duplicate stage key, keeping the first entry");
                                skipped.insert(*key);
                            }
                        }
                    }
                }

                items.extend(
                    entry
                        .candidates
                        .iter()
                        .filter(|op| !skipped.contains(&StageKey::for_operation(entry.order, op)))
                        .map(|op| Item::new(entry.order, op.clone())),
                );
                seen.extend(entry_keys);
            }
        }

        Ok(items)
    }

    /// Rebuilds the generator described by this document.
    pub fn to_generator(&self, policy: DuplicatePolicy) -> SweepResult<StageGenerator> {
        Ok(StageGenerator::from_items(self.to_items(policy)?))
    }

    pub fn from_json_str(json: &str) -> SweepResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json_string_pretty(&self) -> SweepResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
