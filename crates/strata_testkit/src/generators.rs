//! Property-based test generators using proptest.
//!
//! Provides strategies for generating geometries, value columns and
//! mutation scripts for packed sequences.

use proptest::prelude::*;
use strata_packed::TreeGeometry;

/// Strategy for generating small tree geometries (fan-ins 2, 4 or 8).
pub fn geometry_strategy() -> impl Strategy<Value = TreeGeometry> {
    (1u32..=3, 1u32..=3).prop_map(|(vpb, bf)| {
        TreeGeometry::new(1 << vpb, 1 << bf).expect("powers of two are valid")
    })
}

/// Strategy for unsigned values concentrated around the `Varint248`
/// header threshold, with occasional wide values.
pub fn varint_value_strategy() -> impl Strategy<Value = u64> {
    prop_oneof![
        4 => 0u64..16,
        2 => 240u64..260,
        1 => any::<u32>().prop_map(u64::from),
        1 => any::<u64>(),
    ]
}

/// Strategy for signed values concentrated around the `ZigZagVarint126`
/// header threshold.
pub fn signed_value_strategy() -> impl Strategy<Value = i64> {
    prop_oneof![
        4 => -70i64..70,
        1 => any::<i32>().prop_map(i64::from),
        1 => any::<i64>(),
    ]
}

/// Strategy for a column of small values whose sums cannot overflow.
pub fn column_strategy(max_len: usize) -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..1000, 0..max_len)
}

/// A single mutation applied to a sequence and to its reference model.
#[derive(Debug, Clone)]
pub enum SequenceOp {
    /// Insert values at a position (taken modulo `size + 1`).
    Insert {
        /// Insertion point seed.
        at: usize,
        /// Values to insert.
        values: Vec<u64>,
    },
    /// Remove a range (both ends taken modulo `size + 1`).
    Remove {
        /// Range start seed.
        start: usize,
        /// Range length seed.
        len: usize,
    },
    /// Overwrite one value (index taken modulo `size`).
    Set {
        /// Index seed.
        at: usize,
        /// New value.
        value: u64,
    },
}

impl SequenceOp {
    /// Applies the operation to a plain vector, the reference model.
    pub fn apply_to_model(&self, model: &mut Vec<u64>) {
        match self {
            Self::Insert { at, values } => {
                let at = at % (model.len() + 1);
                model.splice(at..at, values.iter().copied());
            }
            Self::Remove { .. } => {
                if let Some((start, end)) = self.remove_range(model.len()) {
                    model.drain(start..end);
                }
            }
            Self::Set { at, value } => {
                if !model.is_empty() {
                    let at = at % model.len();
                    model[at] = *value;
                }
            }
        }
    }

    /// Concrete `[start, end)` for a [`SequenceOp::Remove`] against a
    /// sequence of `size` elements.
    #[must_use]
    pub fn remove_range(&self, size: usize) -> Option<(usize, usize)> {
        match self {
            Self::Remove { start, len } => {
                let start = start % (size + 1);
                let end = (start + len).min(size);
                Some((start, end))
            }
            _ => None,
        }
    }
}

/// Strategy for sequence mutations.
pub fn sequence_op_strategy() -> impl Strategy<Value = SequenceOp> {
    prop_oneof![
        3 => (any::<usize>(), prop::collection::vec(0u64..1000, 1..20))
            .prop_map(|(at, values)| SequenceOp::Insert { at, values }),
        1 => (any::<usize>(), 0usize..12).prop_map(|(start, len)| SequenceOp::Remove { start, len }),
        2 => (any::<usize>(), 0u64..100_000).prop_map(|(at, value)| SequenceOp::Set { at, value }),
    ]
}

/// Strategy for generating a script of mutations.
pub fn op_script_strategy(min_ops: usize, max_ops: usize) -> impl Strategy<Value = Vec<SequenceOp>> {
    prop::collection::vec(sequence_op_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn geometry_is_small_power_of_two(g in geometry_strategy()) {
            prop_assert!(g.values_per_branch().is_power_of_two());
            prop_assert!((2..=8).contains(&g.branching_factor()));
        }

        #[test]
        fn model_ops_keep_indices_in_range(script in op_script_strategy(1, 30)) {
            let mut model = Vec::new();
            for op in &script {
                op.apply_to_model(&mut model);
            }
            prop_assert!(model.iter().all(|&v| v < 100_000));
        }
    }
}
