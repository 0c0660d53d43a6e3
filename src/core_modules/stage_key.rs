// THEORY:
// A `StageKey` names one branching point of a sweep: "the operation of kind K at
// pipeline position N". Candidate operations are grouped under their key, and a
// combination picks exactly one candidate per key.
//
// The key deliberately carries the variant kind and not only the order. Two
// unrelated operation families anchored at the same numeric order (say a
// pre-transform filter and a result computation, both at order 0) must remain
// separate axes of the sweep instead of collapsing into one candidate list.
//
// Keys are totally ordered: first by `order`, then by the canonical type name of
// the kind. Rendering a combination into an operation sequence is a sort on this
// order, so the output never depends on the order in which candidates were added.

use crate::core_modules::operation::{Operation, OperationKind, StageCategory};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageKey {
    /// Position of the stage in the pipeline.
    pub order: usize,
    /// Variant of the operations stored under this key.
    pub kind: OperationKind,
}

impl StageKey {
    pub fn new(order: usize, kind: OperationKind) -> Self {
        Self { order, kind }
    }

    /// Key under which `operation` is stored at `order`.
    pub fn for_operation(order: usize, operation: &Operation) -> Self {
        Self::new(order, operation.kind())
    }

    pub fn category(&self) -> StageCategory {
        self.kind.category()
    }
}

impl Ord for StageKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order
            .cmp(&other.order)
            .then_with(|| self.kind.type_name().cmp(other.kind.type_name()))
    }
}

impl PartialOrd for StageKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.order, self.kind.type_name())
    }
}
