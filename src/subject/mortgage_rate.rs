//! Mortgage amount from a house value with a rate step at 205000.

use rand::{Rng, RngCore};
use std::collections::BTreeMap;

use super::{Mutant, Subject, EPSILON};
use crate::config::{default_domain_size_bounds, SubjectConfig, ValueRange};
use crate::error::{ExecutionError, RelationError};
use crate::model::{InputSpace, TestCase};
use crate::relation::MetamorphicRelation;

pub const THRESHOLD: f64 = 205_000.0;
pub const MAX_VALUE: f64 = 600_000.0;

const LOW_RATIO: f64 = 2.27;
const HIGH_RATIO: f64 = 2.75;

pub static SUBJECT: Subject = Subject {
    name: "mortgage_rate",
    description: "mortgage amount with a rate step at the threshold value",
    program: mortgage_rate,
    mutants: &MUTANTS,
    relations: &[
        ("mr_1", InputIncrease::boxed),
        ("mr_2", IncreaseRatio::boxed),
        ("mr_3", InputScaling::boxed),
        ("mr_4", ScaledRatio::boxed),
        ("mr_5", EquivalentInputs::boxed),
        ("mr_6", RatioUpperBound::boxed),
    ],
    precision: Some(2),
    default_config,
};

/// `mr_5` is registered but not enabled by default: it fails on the
/// original program for every value except the threshold.
fn default_config() -> SubjectConfig {
    SubjectConfig {
        input_range: ValueRange::new(1.0, MAX_VALUE),
        partitions: vec![
            ValueRange::new(1.0, THRESHOLD),
            ValueRange::new(THRESHOLD, MAX_VALUE),
        ],
        partition_ratio: vec![1.0, 1.0],
        relation_weights: BTreeMap::from([
            ("mr_1".to_string(), 1),
            ("mr_2".to_string(), 3),
            ("mr_3".to_string(), 2),
            ("mr_4".to_string(), 3),
            ("mr_6".to_string(), 1),
        ]),
        domain_size_bounds: default_domain_size_bounds(),
    }
}

fn amount(value: f64, threshold: f64, high: f64, low: f64) -> f64 {
    let rate = if value >= threshold { 1.0 + high } else { 1.0 + low };
    rate * value
}

pub fn mortgage_rate(value: f64) -> Result<f64, ExecutionError> {
    Ok(amount(value, THRESHOLD, 1.75, 1.27))
}

// ============================================================================
// Mutants
// ============================================================================

static MUTANTS: [Mutant; 8] = [
    Mutant {
        name: "mutant_1",
        program: |x| Ok(amount(x, THRESHOLD, 1.57, 1.27)),
    },
    Mutant {
        name: "mutant_2",
        program: |x| Ok(amount(x, THRESHOLD, 1.75, 1.72)),
    },
    Mutant {
        name: "mutant_3",
        program: |x| Ok(amount(x, 250_000.0, 1.75, 1.27)),
    },
    Mutant {
        name: "mutant_4",
        program: |x| {
            let rate = if x < THRESHOLD { 2.75 } else { 2.27 };
            Ok(rate * x)
        },
    },
    Mutant {
        name: "mutant_5",
        program: |x| Ok(amount(x, THRESHOLD, 1.75, 1.27) / 2.0 + x),
    },
    Mutant {
        name: "mutant_6",
        program: |x| {
            let rate = if x >= THRESHOLD { 2.75 } else { 2.27 };
            Ok(rate + x)
        },
    },
    Mutant {
        name: "mutant_7",
        program: |x| Ok(amount(x, THRESHOLD, 1.75, 0.27)),
    },
    Mutant {
        name: "mutant_8",
        program: |x| Ok(amount(x, THRESHOLD, 1.75, 1.27).min(1_500_000.0)),
    },
];

/// Ratio and scaling follow-ups may overshoot the input range by one unit.
fn followup_cap(space: &InputSpace) -> f64 {
    space.range.max + 1.0
}

fn increase_ratio(source: &TestCase, followup: &TestCase, source_out: f64, followup_out: f64) -> Option<f64> {
    let delta = followup.value - source.value;
    if delta == 0.0 {
        None
    } else {
        Some((followup_out - source_out) / delta)
    }
}

// ============================================================================
// Relations
// ============================================================================

macro_rules! relation_ctor {
    ($ty:ident) => {
        impl $ty {
            fn boxed(multiplicity: u32) -> Box<dyn MetamorphicRelation> {
                Box::new(Self { multiplicity })
            }
        }
    };
}

/// A higher house value never lowers the amount.
struct InputIncrease {
    multiplicity: u32,
}
relation_ctor!(InputIncrease);

impl MetamorphicRelation for InputIncrease {
    fn id(&self) -> &str {
        "mr_1"
    }

    fn description(&self) -> &str {
        "input increase: f(x + d) >= f(x) for integer d in [20, 100]"
    }

    fn generate_followups(
        &self,
        source: &TestCase,
        space: &InputSpace,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<TestCase>, RelationError> {
        Ok((0..self.multiplicity)
            .map(|_| {
                let delta = rng.gen_range(20..=100) as f64;
                space.case((source.value + delta).min(space.range.max))
            })
            .collect())
    }

    fn verify(&self, _: &TestCase, _: &TestCase, source_out: f64, followup_out: f64) -> bool {
        followup_out >= source_out - EPSILON
    }

    fn is_applicable(&self, case: &TestCase, space: &InputSpace) -> bool {
        case.value < space.range.max - 20.0
    }
}

/// The amount grows at least at the lower rate.
struct IncreaseRatio {
    multiplicity: u32,
}
relation_ctor!(IncreaseRatio);

const DELTA_RANGES: [(u32, u32); 3] = [(20, 50), (51, 80), (81, 100)];

impl MetamorphicRelation for IncreaseRatio {
    fn id(&self) -> &str {
        "mr_2"
    }

    fn description(&self) -> &str {
        "input/output ratio: (f(x + d) - f(x)) / d >= 2.27"
    }

    fn generate_followups(
        &self,
        source: &TestCase,
        space: &InputSpace,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<TestCase>, RelationError> {
        Ok((0..self.multiplicity as usize)
            .map(|i| {
                let (lo, hi) = DELTA_RANGES[i.min(DELTA_RANGES.len() - 1)];
                let delta = rng.gen_range(lo..=hi) as f64;
                space.case((source.value + delta).min(followup_cap(space)))
            })
            .collect())
    }

    fn verify(
        &self,
        source: &TestCase,
        followup: &TestCase,
        source_out: f64,
        followup_out: f64,
    ) -> bool {
        increase_ratio(source, followup, source_out, followup_out)
            .map_or(true, |ratio| ratio >= LOW_RATIO - EPSILON)
    }

    fn is_applicable(&self, case: &TestCase, space: &InputSpace) -> bool {
        case.value < followup_cap(space) - 20.0
    }
}

/// Scaling the house value up never lowers the amount.
struct InputScaling {
    multiplicity: u32,
}
relation_ctor!(InputScaling);

impl MetamorphicRelation for InputScaling {
    fn id(&self) -> &str {
        "mr_3"
    }

    fn description(&self) -> &str {
        "input scaling: f(k * x) >= f(x) for k in [1.01, 1.2]"
    }

    fn generate_followups(
        &self,
        source: &TestCase,
        space: &InputSpace,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<TestCase>, RelationError> {
        Ok((0..self.multiplicity)
            .map(|i| {
                let factor = if i == 0 {
                    rng.gen_range(1.01..=1.1)
                } else {
                    rng.gen_range(1.11..=1.2)
                };
                space.case((source.value * factor).min(followup_cap(space)))
            })
            .collect())
    }

    fn verify(&self, _: &TestCase, _: &TestCase, source_out: f64, followup_out: f64) -> bool {
        followup_out >= source_out - EPSILON
    }

    fn is_applicable(&self, case: &TestCase, space: &InputSpace) -> bool {
        case.value * 1.2 <= followup_cap(space)
    }
}

/// Scaled inputs grow the amount at least at the lower rate.
struct ScaledRatio {
    multiplicity: u32,
}
relation_ctor!(ScaledRatio);

const SCALE_RANGES: [(f64, f64); 3] = [(1.01, 1.07), (1.08, 1.14), (1.15, 1.2)];

impl MetamorphicRelation for ScaledRatio {
    fn id(&self) -> &str {
        "mr_4"
    }

    fn description(&self) -> &str {
        "scaled ratio: (f(k * x) - f(x)) / (k * x - x) >= 2.27"
    }

    fn generate_followups(
        &self,
        source: &TestCase,
        space: &InputSpace,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<TestCase>, RelationError> {
        Ok(SCALE_RANGES
            .iter()
            .take(self.multiplicity as usize)
            .map(|&(lo, hi)| {
                let factor = rng.gen_range(lo..=hi);
                space.case((source.value * factor).min(followup_cap(space)))
            })
            .collect())
    }

    fn verify(
        &self,
        source: &TestCase,
        followup: &TestCase,
        source_out: f64,
        followup_out: f64,
    ) -> bool {
        increase_ratio(source, followup, source_out, followup_out)
            .map_or(true, |ratio| ratio >= LOW_RATIO - EPSILON)
    }

    fn is_applicable(&self, case: &TestCase, space: &InputSpace) -> bool {
        case.value * 1.2 <= followup_cap(space)
    }
}

fn threshold_square(source: &TestCase, space: &InputSpace, multiplicity: u32) -> Vec<TestCase> {
    let value = source.value / THRESHOLD * source.value;
    (0..multiplicity).map(|_| space.case(value)).collect()
}

/// `f(x) == f(x / 205000 * x)`.
struct EquivalentInputs {
    multiplicity: u32,
}
relation_ctor!(EquivalentInputs);

impl MetamorphicRelation for EquivalentInputs {
    fn id(&self) -> &str {
        "mr_5"
    }

    fn description(&self) -> &str {
        "equivalent inputs: f(x) == f(x / 205000 * x)"
    }

    fn generate_followups(
        &self,
        source: &TestCase,
        space: &InputSpace,
        _rng: &mut dyn RngCore,
    ) -> Result<Vec<TestCase>, RelationError> {
        Ok(threshold_square(source, space, self.multiplicity))
    }

    fn verify(&self, _: &TestCase, _: &TestCase, source_out: f64, followup_out: f64) -> bool {
        (followup_out - source_out).abs() < EPSILON
    }

    fn is_applicable(&self, _case: &TestCase, _space: &InputSpace) -> bool {
        true
    }
}

/// The amount never grows faster than the upper rate.
struct RatioUpperBound {
    multiplicity: u32,
}
relation_ctor!(RatioUpperBound);

impl MetamorphicRelation for RatioUpperBound {
    fn id(&self) -> &str {
        "mr_6"
    }

    fn description(&self) -> &str {
        "ratio upper bound: (f(y) - f(x)) / (y - x) < 2.75 for y = x / 205000 * x"
    }

    fn generate_followups(
        &self,
        source: &TestCase,
        space: &InputSpace,
        _rng: &mut dyn RngCore,
    ) -> Result<Vec<TestCase>, RelationError> {
        Ok(threshold_square(source, space, self.multiplicity))
    }

    fn verify(
        &self,
        source: &TestCase,
        followup: &TestCase,
        source_out: f64,
        followup_out: f64,
    ) -> bool {
        increase_ratio(source, followup, source_out, followup_out)
            .map_or(true, |ratio| ratio < HIGH_RATIO + EPSILON)
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

    fn space() -> InputSpace {
        SUBJECT.input_space(&default_config())
    }

    #[test]
    fn test_rate_step() {
        assert!((mortgage_rate(100_000.0).unwrap() - 227_000.0).abs() < 1e-6);
        assert!((mortgage_rate(THRESHOLD).unwrap() - 563_750.0).abs() < 1e-6);
    }

    #[test]
    fn test_increase_ratio_cycles_delta_ranges() {
        let mut rng = StdRng::seed_from_u64(5);
        let relation = IncreaseRatio { multiplicity: 3 };
        let source = space().case(1000.0);
        let followups = relation
            .generate_followups(&source, &space(), &mut rng)
            .unwrap();
        let deltas: Vec<f64> = followups.iter().map(|f| f.value - 1000.0).collect();
        assert!((20.0..=50.0).contains(&deltas[0]));
        assert!((51.0..=80.0).contains(&deltas[1]));
        assert!((81.0..=100.0).contains(&deltas[2]));
    }

    #[test]
    fn test_scaled_ratio_limits_followups_to_ranges() {
        let mut rng = StdRng::seed_from_u64(5);
        let relation = ScaledRatio { multiplicity: 5 };
        let source = space().case(1000.0);
        let followups = relation
            .generate_followups(&source, &space(), &mut rng)
            .unwrap();
        assert_eq!(followups.len(), SCALE_RANGES.len());
    }

    #[test]
    fn test_caps_follow_narrowed_input_range() {
        let mut config = default_config();
        config.input_range = ValueRange::new(1.0, 300_000.0);
        let narrow = SUBJECT.input_space(&config);
        let mut rng = StdRng::seed_from_u64(2);

        let near_top = narrow.case(299_990.0);
        assert!(!InputIncrease { multiplicity: 1 }.is_applicable(&near_top, &narrow));
        assert!(!IncreaseRatio { multiplicity: 1 }.is_applicable(&near_top, &narrow));
        assert!(!InputScaling { multiplicity: 1 }.is_applicable(&near_top, &narrow));
        assert!(!ScaledRatio { multiplicity: 1 }.is_applicable(&near_top, &narrow));

        let followups = IncreaseRatio { multiplicity: 3 }
            .generate_followups(&near_top, &narrow, &mut rng)
            .unwrap();
        assert!(followups.iter().all(|f| f.value <= 300_001.0));

        let scaling = InputScaling { multiplicity: 2 };
        let wide = narrow.case(260_000.0);
        assert!(!scaling.is_applicable(&wide, &narrow));
        assert!(scaling.is_applicable(&wide, &space()));

        let source = narrow.case(250_000.0);
        assert!(scaling.is_applicable(&source, &narrow));
        let followups = scaling
            .generate_followups(&source, &narrow, &mut rng)
            .unwrap();
        assert!(followups.iter().all(|f| f.value <= 300_001.0));
    }

    #[test]
    fn test_ratio_relations_ignore_zero_delta() {
        let case = space().case(THRESHOLD);
        assert!(IncreaseRatio { multiplicity: 1 }.verify(&case, &case, 1.0, 5.0));
        assert!(RatioUpperBound { multiplicity: 1 }.verify(&case, &case, 1.0, 5.0));
    }

    #[test]
    fn test_mutant_4_violates_increase_across_threshold() {
        let relation = InputIncrease { multiplicity: 1 };
        let space = space();
        let source = space.case(THRESHOLD - 10.0);
        let followup = space.case(THRESHOLD + 10.0);
        let mutant = MUTANTS[3].program;
        assert!(!relation.verify(
            &source,
            &followup,
            mutant(source.value).unwrap(),
            mutant(followup.value).unwrap(),
        ));
    }

    #[test]
    fn test_equivalent_inputs_fails_on_original() {
        let space = space();
        let source = space.case(100_000.0);
        let followup = threshold_square(&source, &space, 1)[0];
        let relation = EquivalentInputs { multiplicity: 1 };
        assert!(!relation.verify(
            &source,
            &followup,
            mortgage_rate(source.value).unwrap(),
            mortgage_rate(followup.value).unwrap(),
        ));
    }
}
