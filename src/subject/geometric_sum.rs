//! Number of terms of the series 1 + 1/2 + 1/4 + ... needed to reach `x`.

use std::collections::BTreeMap;

use rand::RngCore;

use super::{Mutant, Subject, EPSILON};
use crate::config::{default_domain_size_bounds, SubjectConfig, ValueRange};
use crate::error::{ExecutionError, RelationError};
use crate::model::{InputSpace, TestCase};
use crate::relation::MetamorphicRelation;

pub const UPPER: f64 = 2.0 - 1e-4;

/// The series converges to 2; inputs at or above the limit never terminate.
const MAX_TERMS: u32 = 1100;

pub static SUBJECT: Subject = Subject {
    name: "geometric_sum",
    description: "terms of the halving geometric series needed to exceed x",
    program: geometric_sum,
    mutants: &MUTANTS,
    relations: &[("mr_1", SquareHalving::boxed), ("mr_2", SubtractStep::boxed)],
    precision: None,
    default_config,
};

fn default_config() -> SubjectConfig {
    let edges = [0.0, 1.0, 1.5, 1.75, 1.875, 1.9375, 1.96875, UPPER];
    let partitions: Vec<_> = edges
        .windows(2)
        .map(|w| ValueRange::new(w[0], w[1]))
        .collect();
    SubjectConfig {
        input_range: ValueRange::new(0.0, UPPER),
        partition_ratio: vec![1.0; partitions.len()],
        partitions,
        relation_weights: BTreeMap::from([("mr_1".to_string(), 1), ("mr_2".to_string(), 1)]),
        domain_size_bounds: default_domain_size_bounds(),
    }
}

/// Sums `term(n)` from `start` while `below(x, sum)`, returning the term count.
fn count_terms(
    x: f64,
    start: f64,
    below: fn(f64, f64) -> bool,
    term: fn(u32) -> f64,
) -> Result<u32, ExecutionError> {
    let mut n = 0;
    let mut sum = start;
    while below(x, sum) {
        if n >= MAX_TERMS {
            return Err(ExecutionError::Fault(format!(
                "series did not reach {} within {} terms",
                x, MAX_TERMS
            )));
        }
        sum += term(n);
        n += 1;
    }
    Ok(n)
}

fn halving(n: u32) -> f64 {
    0.5f64.powi(n as i32)
}

fn exceeds(x: f64, sum: f64) -> bool {
    x > sum
}

pub fn geometric_sum(x: f64) -> Result<f64, ExecutionError> {
    count_terms(x, 0.0, exceeds, halving).map(|n| f64::from(n + 1))
}

// ============================================================================
// Mutants
// ============================================================================

static MUTANTS: [Mutant; 8] = [
    Mutant {
        name: "mutant_1",
        program: |x| {
            count_terms(x, 0.0, |x, s| x > 1.01 * s, halving).map(|n| f64::from(n + 1))
        },
    },
    Mutant {
        name: "mutant_2",
        program: |x| count_terms(x, 0.0, exceeds, halving).map(|n| f64::from(n + 2)),
    },
    Mutant {
        name: "mutant_3",
        program: |x| count_terms(x, 0.0, exceeds, |n| halving(n + 1)).map(|n| f64::from(n + 1)),
    },
    Mutant {
        name: "mutant_4",
        program: |x| {
            count_terms(x, 0.0, exceeds, |n| (1.0 / 3.0f64).powi(n as i32))
                .map(|n| f64::from(n + 1))
        },
    },
    Mutant {
        name: "mutant_5",
        program: |x| count_terms(x, 0.0, exceeds, halving).map(|n| f64::from(2 * n + 1)),
    },
    Mutant {
        name: "mutant_6",
        program: |x| count_terms(x, 0.0, exceeds, halving).map(|n| f64::from(n * 2)),
    },
    Mutant {
        name: "mutant_7",
        program: |x| {
            count_terms(x, 0.0, |x, s| x > s + 0.1, halving).map(|n| f64::from(n + 1))
        },
    },
    Mutant {
        name: "mutant_8",
        program: |x| count_terms(x, 0.5, exceeds, halving).map(|n| f64::from(n + 1)),
    },
];

// ============================================================================
// Relations
// ============================================================================

/// `sut(x * x / 2) <= sut(x)`.
struct SquareHalving {
    multiplicity: u32,
}

impl SquareHalving {
    fn boxed(multiplicity: u32) -> Box<dyn MetamorphicRelation> {
        Box::new(Self { multiplicity })
    }
}

impl MetamorphicRelation for SquareHalving {
    fn id(&self) -> &str {
        "mr_1"
    }

    fn description(&self) -> &str {
        "square halving: sut(x * x / 2) <= sut(x)"
    }

    fn generate_followups(
        &self,
        source: &TestCase,
        space: &InputSpace,
        _rng: &mut dyn RngCore,
    ) -> Result<Vec<TestCase>, RelationError> {
        let value = source.value * source.value / 2.0;
        Ok((0..self.multiplicity).map(|_| space.case(value)).collect())
    }

    fn verify(&self, _: &TestCase, _: &TestCase, source_out: f64, followup_out: f64) -> bool {
        followup_out <= source_out + EPSILON
    }

    fn is_applicable(&self, _case: &TestCase, _space: &InputSpace) -> bool {
        true
    }
}

/// Removing the last series term costs exactly one term:
/// for `y = x - 1 / 2^(sut(x) - 2)`, `sut(y) == sut(x) - 1` when both lie in (0, 2).
struct SubtractStep {
    multiplicity: u32,
}

impl SubtractStep {
    fn boxed(multiplicity: u32) -> Box<dyn MetamorphicRelation> {
        Box::new(Self { multiplicity })
    }
}

impl MetamorphicRelation for SubtractStep {
    fn id(&self) -> &str {
        "mr_2"
    }

    fn description(&self) -> &str {
        "subtraction: sut(x - 1 / 2^(sut(x) - 2)) == sut(x) - 1 inside (0, 2)"
    }

    fn generate_followups(
        &self,
        source: &TestCase,
        space: &InputSpace,
        _rng: &mut dyn RngCore,
    ) -> Result<Vec<TestCase>, RelationError> {
        let terms = geometric_sum(source.value).map_err(|e| RelationError(e.to_string()))?;
        let step = 1.0 / 2f64.powf(terms - 2.0);
        let value = source.value - step;
        Ok((0..self.multiplicity).map(|_| space.case(value)).collect())
    }

    fn verify(
        &self,
        source: &TestCase,
        followup: &TestCase,
        source_out: f64,
        followup_out: f64,
    ) -> bool {
        let inside = |v: f64| 0.0 < v && v < 2.0;
        if inside(source.value) && inside(followup.value) {
            followup_out == source_out - 1.0
        } else {
            true
        }
    }

    fn is_applicable(&self, _case: &TestCase, _space: &InputSpace) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_term_counts() {
        assert_eq!(geometric_sum(0.0).unwrap(), 1.0);
        assert_eq!(geometric_sum(0.5).unwrap(), 2.0);
        assert_eq!(geometric_sum(1.0).unwrap(), 2.0);
        assert_eq!(geometric_sum(1.2).unwrap(), 3.0);
        assert_eq!(geometric_sum(1.9).unwrap(), 6.0);
    }

    #[test]
    fn test_non_terminating_input_is_fault() {
        let err = geometric_sum(2.5).unwrap_err();
        assert!(matches!(err, ExecutionError::Fault(_)));

        let mutant_3 = MUTANTS[2].program;
        assert!(mutant_3(1.2).is_err());
    }

    #[test]
    fn test_subtract_step_holds_on_original() {
        let mut rng = StdRng::seed_from_u64(1);
        let space = SUBJECT.input_space(&default_config());
        let relation = SubtractStep { multiplicity: 1 };
        let source = space.case(1.8);
        let followup = relation
            .generate_followups(&source, &space, &mut rng)
            .unwrap()[0];
        assert!((followup.value - 1.675).abs() < 1e-12);
        assert!(relation.verify(
            &source,
            &followup,
            geometric_sum(source.value).unwrap(),
            geometric_sum(followup.value).unwrap(),
        ));
    }

    #[test]
    fn test_subtract_step_detects_mutant_5() {
        let mut rng = StdRng::seed_from_u64(1);
        let space = SUBJECT.input_space(&default_config());
        let relation = SubtractStep { multiplicity: 1 };
        let source = space.case(1.8);
        let followup = relation
            .generate_followups(&source, &space, &mut rng)
            .unwrap()[0];
        let mutant = MUTANTS[4].program;
        assert!(!relation.verify(
            &source,
            &followup,
            mutant(source.value).unwrap(),
            mutant(followup.value).unwrap(),
        ));
    }

    #[test]
    fn test_partitions() {
        let space = SUBJECT.input_space(&default_config());
        assert_eq!(space.partition_count(), 7);
        assert_eq!(space.partition_of(0.5), 1);
        assert_eq!(space.partition_of(1.9), 5);
        assert_eq!(space.partition_of(1.99), 7);
    }
}
