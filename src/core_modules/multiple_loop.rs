// THEORY:
// The `CombinationGenerator` is the generic engine behind every parameter sweep.
// It knows nothing about operations or stages: it receives named parameters,
// each with an ordered list of candidate values, and enumerates the full
// cartesian product of those lists.
//
// Key architectural principles:
// 1.  **Incremental Expansion**: The product is built one parameter at a time.
//     The first parameter seeds one partial combination per value. Every later
//     parameter replaces the current partial combinations with one copy per
//     candidate value, each extended by that value. This keeps the ordering of
//     the output obvious: the first parameter varies slowest.
// 2.  **Positional Tuples**: A combination is a `Vec<V>` whose i-th entry belongs
//     to `names()[i]`. The map view (`combinations_map`) is derived from that.
// 3.  **Sweep Reporting**: `varied()` lists the parameters with more than one
//     candidate, i.e. the axes that actually change between combinations.
// 4.  **Pure Computation**: Everything is computed once in `new` from owned data.
//     There is no interior mutability and no I/O.

use crate::error::{SweepError, SweepResult};
use std::collections::BTreeMap;
use std::fmt::Display;

/// Cartesian product over named lists of candidate values.
#[derive(Debug, Clone)]
pub struct CombinationGenerator<K, V> {
    /// Parameter names, in the order used to build `all`.
    names: Vec<K>,
    /// Parameters whose candidate list has more than one value.
    varied: Vec<K>,
    /// Every combination, positionally aligned with `names`.
    all: Vec<Vec<V>>,
}

impl<K, V> CombinationGenerator<K, V>
where
    K: Clone + Ord + Display,
    V: Clone,
{
    /// Builds every combination of `params`, taken in iteration order.
    ///
    /// Fails with `EmptyParameter` if any parameter has no candidate values. An
    /// empty `params` yields zero combinations.
    pub fn new<I>(params: I) -> SweepResult<Self>
    where
        I: IntoIterator<Item = (K, Vec<V>)>,
    {
        let mut names = Vec::new();
        let mut varied = Vec::new();
        let mut all: Vec<Vec<V>> = Vec::new();

        for (name, values) in params {
            if values.is_empty() {
                return Err(SweepError::EmptyParameter(name.to_string()));
            }
            if values.len() > 1 {
                varied.push(name.clone());
            }

            all = if names.is_empty() {
                values.iter().map(|v| vec![v.clone()]).collect()
            } else {
                Self::expand(all, &values)
            };
            names.push(name);
        }

        Ok(Self { names, varied, all })
    }

    /// Extends every partial combination with each candidate value.
    fn expand(partials: Vec<Vec<V>>, values: &[V]) -> Vec<Vec<V>> {
        let mut expanded = Vec::with_capacity(partials.len() * values.len());
        for partial in partials {
            for value in values {
                let mut next = Vec::with_capacity(partial.len() + 1);
                next.extend(partial.iter().cloned());
                next.push(value.clone());
                expanded.push(next);
            }
        }
        expanded
    }

    pub fn all(&self) -> &[Vec<V>] {
        &self.all
    }

    pub fn names(&self) -> &[K] {
        &self.names
    }

    pub fn varied(&self) -> &[K] {
        &self.varied
    }

    /// Every combination with each value re-associated to its parameter name.
    pub fn combinations_map(&self) -> Vec<BTreeMap<K, V>> {
        self.all
            .iter()
            .map(|combination| {
                self.names
                    .iter()
                    .cloned()
                    .zip(combination.iter().cloned())
                    .collect()
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }
}
