//! Progressive income tax over six brackets.

use rand::{Rng, RngCore};
use std::collections::BTreeMap;

use super::{Mutant, Subject, EPSILON};
use crate::config::{default_domain_size_bounds, SubjectConfig, ValueRange};
use crate::error::{ExecutionError, RelationError};
use crate::model::{InputSpace, TestCase};
use crate::relation::MetamorphicRelation;

pub const MIN_INCOME: f64 = 1.0;
pub const MAX_INCOME: f64 = 1_400_000.0;

const BOUNDS: [f64; 5] = [20_000.0, 30_000.0, 40_000.0, 50_000.0, 500_000.0];

pub static SUBJECT: Subject = Subject {
    name: "income_tax",
    description: "income tax over progressive brackets",
    program: income_tax,
    mutants: &MUTANTS,
    relations: &[
        ("mr_1", InputIncrease::boxed),
        ("mr_2", Superadditive::boxed),
        ("mr_3", InputScaling::boxed),
    ],
    precision: Some(2),
    default_config,
};

fn default_config() -> SubjectConfig {
    let mut edges = vec![MIN_INCOME];
    edges.extend(BOUNDS);
    edges.push(MAX_INCOME);
    let partitions: Vec<_> = edges
        .windows(2)
        .map(|w| ValueRange::new(w[0], w[1]))
        .collect();
    SubjectConfig {
        input_range: ValueRange::new(MIN_INCOME, MAX_INCOME),
        partition_ratio: vec![1.0; partitions.len()],
        partitions,
        relation_weights: BTreeMap::from([
            ("mr_1".to_string(), 1),
            ("mr_2".to_string(), 2),
            ("mr_3".to_string(), 2),
        ]),
        domain_size_bounds: default_domain_size_bounds(),
    }
}

fn tax(income: f64) -> f64 {
    if income <= 20_000.0 {
        0.0
    } else if income <= 30_000.0 {
        0.12 * (income - 20_000.0)
    } else if income <= 40_000.0 {
        1200.0 + 0.14 * (income - 30_000.0)
    } else if income <= 50_000.0 {
        2600.0 + 0.17 * (income - 40_000.0)
    } else if income <= 500_000.0 {
        0.15 * income
    } else {
        0.165 * income
    }
}

pub fn income_tax(income: f64) -> Result<f64, ExecutionError> {
    Ok(tax(income))
}

// ============================================================================
// Mutants
// ============================================================================

static MUTANTS: [Mutant; 8] = [
    Mutant {
        name: "mutant_1",
        program: |x| {
            Ok(if x > 40_000.0 && x <= 50_000.0 {
                2400.0 + 0.17 * (x - 40_000.0)
            } else {
                tax(x)
            })
        },
    },
    Mutant {
        name: "mutant_2",
        program: |x| {
            Ok(if x > 20_000.0 && x <= 30_000.0 {
                0.13 * (x - 20_000.0)
            } else {
                tax(x)
            })
        },
    },
    Mutant {
        name: "mutant_3",
        program: |x| {
            Ok(if x > 30_000.0 && x <= 40_000.0 {
                1300.0 + 0.14 * (x - 30_000.0)
            } else {
                tax(x)
            })
        },
    },
    Mutant {
        name: "mutant_4",
        program: |x| {
            Ok(if x > 30_000.0 && x <= 40_000.0 {
                1200.0 - 0.14 * (x - 30_000.0)
            } else {
                tax(x)
            })
        },
    },
    Mutant {
        name: "mutant_5",
        program: |x| {
            Ok(if x > 50_000.0 && x <= 500_000.0 {
                0.05 * x
            } else {
                tax(x)
            })
        },
    },
    Mutant {
        name: "mutant_6",
        program: |x| Ok(if x > 500_000.0 { 0.1 * x } else { tax(x) }),
    },
    Mutant {
        name: "mutant_7",
        program: |x| {
            Ok(if x > 20_000.0 && x <= 30_000.0 {
                0.12 * (x - 2_000.0)
            } else {
                tax(x)
            })
        },
    },
    Mutant {
        name: "mutant_8",
        program: |x| {
            Ok(if x > 250_000.0 && x <= 500_000.0 {
                0.165 * x
            } else {
                tax(x)
            })
        },
    },
];

// ============================================================================
// Relations
// ============================================================================

/// Raising the income never lowers the tax.
struct InputIncrease {
    multiplicity: u32,
}

impl InputIncrease {
    fn boxed(multiplicity: u32) -> Box<dyn MetamorphicRelation> {
        Box::new(Self { multiplicity })
    }
}

impl MetamorphicRelation for InputIncrease {
    fn id(&self) -> &str {
        "mr_1"
    }

    fn description(&self) -> &str {
        "input increase: tax(x + d) >= tax(x) for d in [20, 100]"
    }

    fn generate_followups(
        &self,
        source: &TestCase,
        space: &InputSpace,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<TestCase>, RelationError> {
        Ok((0..self.multiplicity)
            .map(|_| {
                let delta = rng.gen_range(20.0..=100.0);
                space.case((source.value + delta).min(space.range.max))
            })
            .collect())
    }

    fn verify(&self, _: &TestCase, _: &TestCase, source_out: f64, followup_out: f64) -> bool {
        followup_out >= source_out - EPSILON
    }

    fn is_applicable(&self, case: &TestCase, space: &InputSpace) -> bool {
        case.value < space.range.max - 100.0
    }
}

/// Splitting an income never raises the total tax:
/// `tax(a) + tax(b - a) <= tax(b)`.
struct Superadditive {
    multiplicity: u32,
}

impl Superadditive {
    fn boxed(multiplicity: u32) -> Box<dyn MetamorphicRelation> {
        Box::new(Self { multiplicity })
    }
}

impl MetamorphicRelation for Superadditive {
    fn id(&self) -> &str {
        "mr_2"
    }

    fn description(&self) -> &str {
        "composite: tax(a) + tax(b - a) <= tax(b) for b in [a, max]"
    }

    fn generate_followups(
        &self,
        source: &TestCase,
        space: &InputSpace,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<TestCase>, RelationError> {
        if source.value >= space.range.max {
            return Err(RelationError(format!(
                "no room above {} for a composite income",
                source.value
            )));
        }
        Ok((0..self.multiplicity)
            .map(|_| space.case(rng.gen_range(source.value..space.range.max)))
            .collect())
    }

    fn verify(
        &self,
        source: &TestCase,
        followup: &TestCase,
        source_out: f64,
        followup_out: f64,
    ) -> bool {
        let remainder = tax(followup.value - source.value);
        source_out + remainder - EPSILON < followup_out
    }

    fn is_applicable(&self, case: &TestCase, space: &InputSpace) -> bool {
        case.value < space.range.max - 1.0
    }
}

/// Scaling the income up by a factor in [1, 2] never lowers the tax.
struct InputScaling {
    multiplicity: u32,
}

impl InputScaling {
    fn boxed(multiplicity: u32) -> Box<dyn MetamorphicRelation> {
        Box::new(Self { multiplicity })
    }
}

impl MetamorphicRelation for InputScaling {
    fn id(&self) -> &str {
        "mr_3"
    }

    fn description(&self) -> &str {
        "input scaling: tax(k * x) >= tax(x) for k in [1, 2]"
    }

    fn generate_followups(
        &self,
        source: &TestCase,
        space: &InputSpace,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<TestCase>, RelationError> {
        Ok((0..self.multiplicity)
            .map(|_| {
                let factor = rng.gen_range(1.0..=2.0);
                space.case((source.value * factor).min(space.range.max))
            })
            .collect())
    }

    fn verify(&self, _: &TestCase, _: &TestCase, source_out: f64, followup_out: f64) -> bool {
        followup_out >= source_out - EPSILON
    }

    fn is_applicable(&self, _case: &TestCase, _space: &InputSpace) -> bool {
        true
    }
}
