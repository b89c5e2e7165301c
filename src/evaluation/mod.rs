//! P-measure estimation: repeated trials of a selection strategy against a mutant.

pub mod executor;
pub mod results;

use rand::RngCore;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::domain::CandidateDomain;
use crate::error::{ExecutionError, SelectionError};
use crate::generation::{derive_groups, Strategy};
use crate::model::{GroupRef, InputSpace, MetamorphicGroup, Phase};
use crate::relation::RelationRegistry;
use crate::subject::ProgramFn;

/// Run one program call, converting panics and budget overruns into errors.
pub fn execute(program: ProgramFn, input: f64, timeout: Duration) -> Result<f64, ExecutionError> {
    let start = Instant::now();
    let result = panic::catch_unwind(AssertUnwindSafe(|| program(input)));
    let elapsed = start.elapsed();

    let output = match result {
        Ok(output) => output?,
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            return Err(ExecutionError::Panicked(message));
        }
    };

    if elapsed > timeout {
        return Err(ExecutionError::Timeout(timeout.as_millis() as u64));
    }
    Ok(output)
}

/// Trial loop shared by every strategy of one (subject, phase).
pub struct Evaluator {
    relations: Arc<RelationRegistry>,
    space: Arc<InputSpace>,
    domain: Option<Arc<CandidateDomain>>,
    internal_iteration: usize,
    call_timeout: Duration,
}

impl Evaluator {
    /// Phase 1: strategies generate sources, one group is derived per source.
    pub fn phase1(
        relations: Arc<RelationRegistry>,
        space: Arc<InputSpace>,
        internal_iteration: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            relations,
            space,
            domain: None,
            internal_iteration,
            call_timeout,
        }
    }

    /// Phase 2: strategies sample groups from a prebuilt domain.
    pub fn phase2(
        relations: Arc<RelationRegistry>,
        space: Arc<InputSpace>,
        domain: Arc<CandidateDomain>,
        internal_iteration: usize,
        call_timeout: Duration,
    ) -> Self {
        Self {
            relations,
            space,
            domain: Some(domain),
            internal_iteration,
            call_timeout,
        }
    }

    pub fn phase(&self) -> Phase {
        if self.domain.is_some() {
            Phase::Phase2
        } else {
            Phase::Phase1
        }
    }

    /// Draw the groups of one trial.
    pub fn sample(
        &self,
        strategy: &mut Strategy,
        size: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<GroupRef>, SelectionError> {
        match (strategy, &self.domain) {
            (Strategy::Source(generator), None) => {
                let sources = generator.generate(size, rng)?;
                Ok(derive_groups(&sources, &self.relations, &self.space, rng))
            }
            (Strategy::Group(sampler), Some(domain)) => sampler.generate(size, domain, rng),
            _ => Err(SelectionError::config(format!(
                "strategy does not match {} evaluation",
                self.phase()
            ))),
        }
    }

    /// A group detects the mutant when either call fails or the relation is violated.
    pub fn detects(
        &self,
        program: ProgramFn,
        group: &MetamorphicGroup,
    ) -> Result<bool, SelectionError> {
        let relation = self.relations.get(&group.relation).ok_or_else(|| {
            SelectionError::config(format!("group refers to unknown relation '{}'", group.relation))
        })?;

        let outputs = execute(program, group.source.value, self.call_timeout).and_then(|s| {
            execute(program, group.followup.value, self.call_timeout).map(|f| (s, f))
        });
        Ok(match outputs {
            Ok((source_out, followup_out)) => {
                !relation.verify(&group.source, &group.followup, source_out, followup_out)
            }
            Err(e) => {
                tracing::trace!("Execution failure counted as detection: {}", e);
                true
            }
        })
    }

    /// Fraction of `internal_iteration` trials in which the sample detects the mutant.
    pub fn p_measure(
        &self,
        program: ProgramFn,
        strategy: &mut Strategy,
        size: usize,
        rng: &mut dyn RngCore,
    ) -> Result<f64, SelectionError> {
        if self.internal_iteration == 0 {
            return Err(SelectionError::invalid("internal_iteration must be positive"));
        }
        let mut detections = 0usize;
        for _ in 0..self.internal_iteration {
            let groups = self.sample(strategy, size, rng)?;
            for group in &groups {
                if self.detects(program, group)? {
                    detections += 1;
                    break;
                }
            }
        }
        Ok(detections as f64 / self.internal_iteration as f64)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::config::ValueRange;
    use crate::relation::testing::halving;
    use std::collections::BTreeMap;

    pub fn space() -> Arc<InputSpace> {
        Arc::new(InputSpace::new(
            ValueRange::new(0.0, 50.0),
            vec![ValueRange::new(0.0, 25.0), ValueRange::new(25.0, 50.0)],
            None,
        ))
    }

    pub fn relations() -> Arc<RelationRegistry> {
        let weights = BTreeMap::from([("halve".to_string(), 1)]);
        Arc::new(RelationRegistry::build(&[("halve", halving)], &weights).unwrap())
    }

    pub fn linear(x: f64) -> Result<f64, ExecutionError> {
        Ok(2.0 * x)
    }

    pub fn shifted(x: f64) -> Result<f64, ExecutionError> {
        Ok(2.0 * x + 1.0)
    }

    pub fn faulty(_: f64) -> Result<f64, ExecutionError> {
        Err(ExecutionError::Fault("always".to_string()))
    }

    pub fn domain() -> Arc<CandidateDomain> {
        let space = space();
        Arc::new(CandidateDomain::from_groups(
            (1..=40)
                .map(|i| {
                    let v = i as f64;
                    MetamorphicGroup::new("halve", space.case(v), space.case(v / 2.0))
                })
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::config::{ExperimentConfig, SubjectConfig};
    use crate::generation::{build_strategy, strategy_names, StrategyContext};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeMap;

    const TIMEOUT: Duration = Duration::from_secs(3);

    fn context() -> StrategyContext {
        let subject = SubjectConfig {
            input_range: space().range,
            partitions: space().partitions.clone(),
            partition_ratio: vec![1.0, 1.0],
            relation_weights: BTreeMap::from([("halve".to_string(), 1)]),
            domain_size_bounds: crate::config::default_domain_size_bounds(),
        };
        StrategyContext::new(space(), &subject, &ExperimentConfig::default())
    }

    fn evaluators() -> Vec<Evaluator> {
        vec![
            Evaluator::phase1(relations(), space(), 100, TIMEOUT),
            Evaluator::phase2(relations(), space(), domain(), 100, TIMEOUT),
        ]
    }

    // =========================================================================
    // Execution tests
    // =========================================================================

    #[test]
    fn test_execute_passes_output() {
        assert_eq!(execute(linear, 3.0, TIMEOUT), Ok(6.0));
    }

    #[test]
    fn test_execute_catches_panic() {
        fn panicking(_: f64) -> Result<f64, ExecutionError> {
            panic!("boom")
        }
        assert_eq!(
            execute(panicking, 1.0, TIMEOUT),
            Err(ExecutionError::Panicked("boom".to_string()))
        );
    }

    #[test]
    fn test_execute_reports_overrun() {
        fn slow(x: f64) -> Result<f64, ExecutionError> {
            std::thread::sleep(Duration::from_millis(20));
            Ok(x)
        }
        assert_eq!(
            execute(slow, 1.0, Duration::from_millis(1)),
            Err(ExecutionError::Timeout(1))
        );
    }

    // =========================================================================
    // P-measure tests
    // =========================================================================

    #[test]
    fn test_identical_mutant_scores_zero() {
        let ctx = context();
        for evaluator in evaluators() {
            for name in strategy_names(evaluator.phase()) {
                let mut strategy = build_strategy(name, evaluator.phase(), &ctx).unwrap();
                let mut rng = StdRng::seed_from_u64(1);
                let p = evaluator
                    .p_measure(linear, &mut strategy, 5, &mut rng)
                    .unwrap();
                assert_eq!(p, 0.0, "{} {}", evaluator.phase(), name);
            }
        }
    }

    #[test]
    fn test_always_violating_mutant_scores_one() {
        let ctx = context();
        for evaluator in evaluators() {
            for name in strategy_names(evaluator.phase()) {
                for size in [1, 4] {
                    let mut strategy = build_strategy(name, evaluator.phase(), &ctx).unwrap();
                    let mut rng = StdRng::seed_from_u64(2);
                    let p = evaluator
                        .p_measure(shifted, &mut strategy, size, &mut rng)
                        .unwrap();
                    assert_eq!(p, 1.0, "{} {} size {}", evaluator.phase(), name, size);
                }
            }
        }
    }

    #[test]
    fn test_execution_failure_counts_as_detection() {
        let evaluator = Evaluator::phase2(relations(), space(), domain(), 10, TIMEOUT);
        let mut strategy = build_strategy("random", Phase::Phase2, &context()).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let p = evaluator
            .p_measure(faulty, &mut strategy, 2, &mut rng)
            .unwrap();
        assert_eq!(p, 1.0);
    }

    #[test]
    fn test_p_measure_bounded() {
        fn partial(x: f64) -> Result<f64, ExecutionError> {
            Ok(if x > 30.0 { 2.0 * x + 1.0 } else { 2.0 * x })
        }
        let ctx = context();
        for evaluator in evaluators() {
            for name in strategy_names(evaluator.phase()) {
                let mut strategy = build_strategy(name, evaluator.phase(), &ctx).unwrap();
                let mut rng = StdRng::seed_from_u64(4);
                let p = evaluator
                    .p_measure(partial, &mut strategy, 2, &mut rng)
                    .unwrap();
                assert!((0.0..=1.0).contains(&p));
            }
        }
    }

    #[test]
    fn test_strategy_phase_mismatch() {
        let evaluator = Evaluator::phase1(relations(), space(), 10, TIMEOUT);
        let mut strategy = build_strategy("random", Phase::Phase2, &context()).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let err = evaluator
            .p_measure(linear, &mut strategy, 2, &mut rng)
            .unwrap_err();
        assert!(matches!(err, SelectionError::Configuration(_)));
    }

    #[test]
    fn test_oversized_sample_propagates_invalid_argument() {
        let evaluator = Evaluator::phase2(relations(), space(), domain(), 10, TIMEOUT);
        let mut strategy = build_strategy("random", Phase::Phase2, &context()).unwrap();
        let mut rng = StdRng::seed_from_u64(6);
        let err = evaluator
            .p_measure(linear, &mut strategy, 41, &mut rng)
            .unwrap_err();
        assert!(matches!(err, SelectionError::InvalidArgument(_)));
    }
}
