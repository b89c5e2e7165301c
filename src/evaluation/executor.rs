//! Worker pool running the trial loop of every mutant in parallel.
//!
//! Tasks go through a shared `mpsc` channel; each worker pulls one mutant at a
//! time and runs its whole (size x external run) loop on the blocking pool,
//! with its own strategy instance and its own seeded RNG.

use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::Mutex as TokioMutex;

use super::results::{RunResults, SizeSeries};
use super::Evaluator;
use crate::config::SizeRange;
use crate::generation::{build_strategy, StrategyContext};
use crate::subject::Mutant;

/// Settings of one (subject, phase, strategy) run.
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub strategy: String,
    pub sizes: SizeRange,
    pub external_iteration: usize,
    pub seed: u64,
    pub threads: Option<usize>,
}

/// A mutant to be evaluated by a worker
struct MutantTask {
    index: usize,
    mutant: Mutant,
}

/// Everything one mutant produced.
#[derive(Debug, Clone, Default)]
pub struct MutantOutcome {
    pub name: String,
    pub p_measures: SizeSeries,
    pub timings: SizeSeries,
    pub error: Option<String>,
}

impl MutantOutcome {
    fn failed(name: &str, error: String) -> Self {
        Self {
            name: name.to_string(),
            error: Some(error),
            ..Default::default()
        }
    }
}

/// Seed of one mutant's RNG, spread across the 64-bit space.
pub fn mutant_seed(base: u64, index: usize) -> u64 {
    base.wrapping_add((index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}

/// Seed of the phase-2 candidate domain; never equal to a mutant's seed for the same base.
pub fn domain_seed(base: u64) -> u64 {
    base.rotate_left(32) ^ 0xD1B5_4A32_D192_ED03
}

/// Number of workers: the configured or available parallelism, capped by the task count.
pub fn worker_count(threads: Option<usize>, tasks: usize) -> usize {
    let available = threads.unwrap_or_else(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    });
    available.min(tasks).max(1)
}

/// Evaluate every size and external run of one mutant.
///
/// A failure stops the mutant; sizes completed before it are kept.
fn evaluate_mutant(
    evaluator: &Evaluator,
    context: &StrategyContext,
    plan: &RunPlan,
    task: &MutantTask,
) -> MutantOutcome {
    let name = task.mutant.name;
    let mut outcome = MutantOutcome {
        name: name.to_string(),
        ..Default::default()
    };

    let mut strategy = match build_strategy(&plan.strategy, evaluator.phase(), context) {
        Ok(strategy) => strategy,
        Err(e) => return MutantOutcome::failed(name, e.to_string()),
    };
    let mut rng = StdRng::seed_from_u64(mutant_seed(plan.seed, task.index));

    for size in plan.sizes.sizes() {
        let mut values = Vec::with_capacity(plan.external_iteration);
        let mut timings = Vec::with_capacity(plan.external_iteration);
        for _ in 0..plan.external_iteration {
            let start = Instant::now();
            match evaluator.p_measure(task.mutant.program, &mut strategy, size, &mut rng) {
                Ok(p) => values.push(p),
                Err(e) => {
                    tracing::warn!("Mutant {} failed at size {}: {}", name, size, e);
                    outcome.error = Some(format!("size {}: {}", size, e));
                    return outcome;
                }
            }
            timings.push(start.elapsed().as_secs_f64() * 1000.0);
        }
        tracing::debug!(
            "Mutant {} size {}: mean P-measure {:.4}",
            name,
            size,
            values.iter().sum::<f64>() / values.len().max(1) as f64
        );
        outcome.p_measures.insert(size.to_string(), values);
        outcome.timings.insert(size.to_string(), timings);
    }
    outcome
}

async fn mutant_worker(
    worker_id: usize,
    receiver: Arc<TokioMutex<mpsc::Receiver<MutantTask>>>,
    results: mpsc::Sender<(usize, MutantOutcome)>,
    evaluator: Arc<Evaluator>,
    context: Arc<StrategyContext>,
    plan: Arc<RunPlan>,
) {
    loop {
        let task = {
            let mut rx = receiver.lock().await;
            rx.recv().await
        };

        let task = match task {
            Some(t) => t,
            None => {
                tracing::debug!("Worker {} finished - no more mutants", worker_id);
                break;
            }
        };

        let index = task.index;
        let name = task.mutant.name;
        let evaluator = Arc::clone(&evaluator);
        let context = Arc::clone(&context);
        let plan = Arc::clone(&plan);

        let outcome = tokio::task::spawn_blocking(move || {
            evaluate_mutant(&evaluator, &context, &plan, &task)
        })
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("Worker {} lost mutant {}: {}", worker_id, name, e);
            MutantOutcome::failed(name, format!("worker failed: {}", e))
        });

        if results.send((index, outcome)).await.is_err() {
            break;
        }
    }
}

/// Evaluate all mutants with a bounded worker pool; outcomes come back in mutant order.
pub async fn run_mutants(
    evaluator: Arc<Evaluator>,
    context: Arc<StrategyContext>,
    mutants: &[Mutant],
    plan: RunPlan,
) -> Vec<MutantOutcome> {
    if mutants.is_empty() {
        return Vec::new();
    }

    let workers = worker_count(plan.threads, mutants.len());
    tracing::info!(
        "Evaluating {} mutants with strategy '{}' on {} workers",
        mutants.len(),
        plan.strategy,
        workers
    );

    let (tx, rx) = mpsc::channel::<MutantTask>(mutants.len());
    let rx = Arc::new(TokioMutex::new(rx));
    let (result_tx, mut result_rx) = mpsc::channel::<(usize, MutantOutcome)>(mutants.len());
    let plan = Arc::new(plan);

    let mut worker_handles = Vec::new();
    for worker_id in 0..workers {
        let worker_rx = Arc::clone(&rx);
        let results = result_tx.clone();
        let evaluator = Arc::clone(&evaluator);
        let context = Arc::clone(&context);
        let plan = Arc::clone(&plan);

        let handle = tokio::spawn(async move {
            mutant_worker(worker_id, worker_rx, results, evaluator, context, plan).await
        });
        worker_handles.push(handle);
    }
    drop(result_tx);

    for (index, mutant) in mutants.iter().enumerate() {
        let task = MutantTask {
            index,
            mutant: *mutant,
        };
        if tx.send(task).await.is_err() {
            break;
        }
    }
    drop(tx);

    let mut slots: Vec<Option<MutantOutcome>> = vec![None; mutants.len()];
    while let Some((index, outcome)) = result_rx.recv().await {
        slots[index] = Some(outcome);
    }

    for handle in worker_handles {
        if let Err(e) = handle.await {
            tracing::warn!("Mutant worker failed: {}", e);
        }
    }

    slots
        .into_iter()
        .zip(mutants)
        .map(|(slot, mutant)| {
            slot.unwrap_or_else(|| {
                MutantOutcome::failed(mutant.name, "no result returned".to_string())
            })
        })
        .collect()
}

/// Fold outcomes into the persisted documents, in mutant order.
pub fn collect_results(outcomes: Vec<MutantOutcome>) -> RunResults {
    let mut results = RunResults::default();
    for outcome in outcomes {
        if let Some(error) = outcome.error {
            results.errors.insert(outcome.name.clone(), error);
        }
        results.p_measures.insert(outcome.name.clone(), outcome.p_measures);
        results.timings.insert(outcome.name, outcome.timings);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ExperimentConfig, SubjectConfig};
    use crate::error::ExecutionError;
    use crate::evaluation::testing::*;
    use crate::model::Phase;
    use rand::RngCore;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn context() -> Arc<StrategyContext> {
        let subject = SubjectConfig {
            input_range: space().range,
            partitions: space().partitions.clone(),
            partition_ratio: vec![1.0, 1.0],
            relation_weights: BTreeMap::from([("halve".to_string(), 1)]),
            domain_size_bounds: crate::config::default_domain_size_bounds(),
        };
        Arc::new(StrategyContext::new(
            space(),
            &subject,
            &ExperimentConfig::default(),
        ))
    }

    fn plan(strategy: &str, threads: Option<usize>) -> RunPlan {
        RunPlan {
            strategy: strategy.to_string(),
            sizes: SizeRange { min: 2, max: 4 },
            external_iteration: 3,
            seed: 17,
            threads,
        }
    }

    fn mutants() -> Vec<Mutant> {
        vec![
            Mutant {
                name: "same",
                program: linear,
            },
            Mutant {
                name: "shifted",
                program: shifted,
            },
            Mutant {
                name: "faulty",
                program: faulty,
            },
        ]
    }

    fn evaluator(phase: Phase) -> Arc<Evaluator> {
        let timeout = Duration::from_secs(3);
        Arc::new(match phase {
            Phase::Phase1 => Evaluator::phase1(relations(), space(), 20, timeout),
            Phase::Phase2 => Evaluator::phase2(relations(), space(), domain(), 20, timeout),
        })
    }

    // =========================================================================
    // Helper tests
    // =========================================================================

    #[test]
    fn test_mutant_seeds_differ() {
        assert_eq!(mutant_seed(5, 0), 5);
        assert_ne!(mutant_seed(5, 1), mutant_seed(5, 2));
        assert_eq!(mutant_seed(u64::MAX, 1), 0x9E37_79B9_7F4A_7C14);
    }

    #[test]
    fn test_domain_stream_differs_from_mutant_streams() {
        for base in [0, 5, 17, u64::MAX] {
            let domain: Vec<u64> = {
                let mut rng = StdRng::seed_from_u64(domain_seed(base));
                (0..8).map(|_| rng.next_u64()).collect()
            };
            for index in 0..64 {
                assert_ne!(domain_seed(base), mutant_seed(base, index));
                let mut rng = StdRng::seed_from_u64(mutant_seed(base, index));
                let mutant: Vec<u64> = (0..8).map(|_| rng.next_u64()).collect();
                assert_ne!(domain, mutant);
            }
        }
    }

    #[test]
    fn test_worker_count_capped() {
        assert_eq!(worker_count(Some(8), 3), 3);
        assert_eq!(worker_count(Some(2), 10), 2);
        assert_eq!(worker_count(Some(0), 10), 1);
        assert!(worker_count(None, 4) >= 1);
    }

    // =========================================================================
    // Pool tests
    // =========================================================================

    #[tokio::test]
    async fn test_outcomes_in_mutant_order() {
        let outcomes = run_mutants(
            evaluator(Phase::Phase2),
            context(),
            &mutants(),
            plan("partition", Some(2)),
        )
        .await;

        let names: Vec<_> = outcomes.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["same", "shifted", "faulty"]);

        let sizes: Vec<_> = outcomes[0].p_measures.keys().collect();
        assert_eq!(sizes, vec!["2", "3", "4"]);
        for (_, values) in outcomes[0].p_measures.iter() {
            assert_eq!(values, &vec![0.0; 3]);
        }
        for (_, values) in outcomes[1].p_measures.iter() {
            assert_eq!(values, &vec![1.0; 3]);
        }
        assert_eq!(outcomes[2].p_measures.get("3"), Some(&vec![1.0; 3]));
        assert_eq!(outcomes[1].timings.get("4").map(Vec::len), Some(3));
        assert!(outcomes.iter().all(|o| o.error.is_none()));
    }

    #[tokio::test]
    async fn test_runs_are_reproducible() {
        fn partial(x: f64) -> Result<f64, ExecutionError> {
            Ok(if x > 20.0 { 2.0 * x + 1.0 } else { 2.0 * x })
        }
        let mutants = vec![Mutant {
            name: "partial",
            program: partial,
        }];
        let first = run_mutants(
            evaluator(Phase::Phase1),
            context(),
            &mutants,
            plan("art", Some(1)),
        )
        .await;
        let second = run_mutants(
            evaluator(Phase::Phase1),
            context(),
            &mutants,
            plan("art", Some(4)),
        )
        .await;
        assert_eq!(first[0].p_measures, second[0].p_measures);
    }

    #[tokio::test]
    async fn test_failing_mutant_keeps_completed_sizes() {
        // Sizes past the domain size fail with InvalidArgument
        let mut plan = plan("random", Some(2));
        plan.sizes = SizeRange { min: 39, max: 41 };
        let outcomes = run_mutants(evaluator(Phase::Phase2), context(), &mutants(), plan).await;

        for outcome in &outcomes {
            assert_eq!(outcome.p_measures.keys().collect::<Vec<_>>(), vec!["39", "40"]);
            assert!(outcome.error.as_deref().unwrap().contains("size 41"));
        }

        let results = collect_results(outcomes);
        assert_eq!(results.errors.len(), 3);
        assert_eq!(results.p_measures.len(), 3);
    }

    #[tokio::test]
    async fn test_unknown_strategy_fails_every_mutant() {
        let outcomes = run_mutants(
            evaluator(Phase::Phase1),
            context(),
            &mutants(),
            plan("mtart", None),
        )
        .await;
        assert!(outcomes.iter().all(|o| o.error.is_some() && o.p_measures.is_empty()));
    }

    #[tokio::test]
    async fn test_no_mutants() {
        let outcomes = run_mutants(evaluator(Phase::Phase1), context(), &[], plan("random", None)).await;
        assert!(outcomes.is_empty());
    }
}
