//! Mutant classification: which inputs kill which mutant, subsumption between
//! mutants, and a greedy independent set of non-redundant mutants.

use indexmap::IndexMap;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use crate::error::{ExecutionError, SelectionError};
use crate::evaluation::execute;
use crate::generation::random::RandomSourceGenerator;
use crate::generation::SourceGenerator;
use crate::model::InputSpace;
use crate::subject::{Mutant, ProgramFn};

/// Classification of a mutant against the sampled inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutantKind {
    /// Killed by some but not all inputs, not subsumed
    Normal,
    /// Never killed
    Equivalent,
    /// Its kill set strictly contains another mutant's
    Subsumed,
    /// Killed by every input
    AllKilled,
    /// Raised an error on some input
    Error,
    /// Exceeded the call budget; analysis of the mutant stopped there
    Timeout,
}

impl MutantKind {
    const ALL: [MutantKind; 6] = [
        MutantKind::Normal,
        MutantKind::Equivalent,
        MutantKind::Subsumed,
        MutantKind::AllKilled,
        MutantKind::Error,
        MutantKind::Timeout,
    ];

    /// Error and timeout mutants have unreliable kill sets; equivalent ones have none.
    fn takes_part_in_subsumption(self) -> bool {
        !matches!(
            self,
            MutantKind::Equivalent | MutantKind::Error | MutantKind::Timeout
        )
    }
}

impl std::fmt::Display for MutantKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::Equivalent => write!(f, "equivalent"),
            Self::Subsumed => write!(f, "subsumed"),
            Self::AllKilled => write!(f, "all_killed"),
            Self::Error => write!(f, "error"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

#[derive(Debug, Clone)]
struct Profile {
    name: String,
    kind: MutantKind,
    kills: BTreeSet<usize>,
    subsumes: BTreeSet<usize>,
    subsumed_by: BTreeSet<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportStatistics {
    pub total_mutants: usize,
    pub normal: usize,
    pub equivalent: usize,
    pub subsumed: usize,
    pub all_killed: usize,
    pub error: usize,
    pub timeout: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndependentSet {
    pub size: usize,
    pub mutants: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subsumption {
    pub subsumer: String,
    pub subsumed: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutantReport {
    pub inputs: usize,
    pub statistics: ReportStatistics,
    pub maximum_independent_set: IndependentSet,
    pub subsumption_relations: Vec<Subsumption>,
    pub mutants_by_type: IndexMap<String, Vec<String>>,
    /// Mutant -> number of killing inputs
    pub kill_counts: IndexMap<String, usize>,
}

impl MutantReport {
    pub fn save(&self, path: &Path) -> Result<(), SelectionError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// `count` uniform inputs over the subject's range.
pub fn sample_inputs(
    space: &InputSpace,
    count: usize,
    rng: &mut dyn RngCore,
) -> Result<Vec<f64>, SelectionError> {
    let mut generator = RandomSourceGenerator::new(space.clone());
    Ok(generator
        .generate(count, rng)?
        .into_iter()
        .map(|case| case.value)
        .collect())
}

/// Kill set of one mutant. An input kills it when both programs return and
/// the outputs differ, or when only the original fails. A mutant failure is
/// never a kill: it marks the mutant as error (or timeout, which ends the run).
fn profile(
    expected: &[Result<f64, ExecutionError>],
    mutant: &Mutant,
    inputs: &[f64],
    timeout: Duration,
) -> Profile {
    let mut kind = MutantKind::Normal;
    let mut kills = BTreeSet::new();

    for (i, (&input, expected)) in inputs.iter().zip(expected).enumerate() {
        let actual = execute(mutant.program, input, timeout);
        let killed = match (expected, &actual) {
            (Ok(a), Ok(b)) => a != b,
            (Err(_), Ok(_)) => true,
            (_, Err(_)) => false,
        };
        if killed {
            kills.insert(i);
        }
        match actual {
            Err(ExecutionError::Timeout(_)) => {
                tracing::debug!("{} timed out on input {}", mutant.name, input);
                kind = MutantKind::Timeout;
                break;
            }
            Err(e) => {
                tracing::trace!("{} failed on input {}: {}", mutant.name, input, e);
                kind = MutantKind::Error;
            }
            Ok(_) => {}
        }
    }

    if kind == MutantKind::Normal {
        if kills.is_empty() {
            kind = MutantKind::Equivalent;
        } else if kills.len() == inputs.len() {
            kind = MutantKind::AllKilled;
        }
    }
    Profile {
        name: mutant.name.to_string(),
        kind,
        kills,
        subsumes: BTreeSet::new(),
        subsumed_by: BTreeSet::new(),
    }
}

/// Mark every mutant whose kill set strictly contains another's as subsumed,
/// repeating until nothing changes.
fn resolve_subsumption(profiles: &mut [Profile]) {
    loop {
        let mut changed = false;
        for a in 0..profiles.len() {
            for b in 0..profiles.len() {
                if a == b
                    || !profiles[a].kind.takes_part_in_subsumption()
                    || !profiles[b].kind.takes_part_in_subsumption()
                    || profiles[a].kills.is_empty()
                    || profiles[a].kills.len() >= profiles[b].kills.len()
                    || !profiles[a].kills.is_subset(&profiles[b].kills)
                {
                    continue;
                }
                if profiles[b].subsumed_by.insert(a) {
                    changed = true;
                }
                profiles[a].subsumes.insert(b);
                if profiles[b].kind != MutantKind::Subsumed {
                    profiles[b].kind = MutantKind::Subsumed;
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
}

/// Greedy independent set over normal and subsumed mutants: repeatedly keep the
/// node with the fewest subsumption edges and drop its neighbours.
fn independent_set(profiles: &[Profile]) -> Vec<usize> {
    let mut remaining: BTreeSet<usize> = profiles
        .iter()
        .enumerate()
        .filter(|(_, p)| matches!(p.kind, MutantKind::Normal | MutantKind::Subsumed))
        .map(|(i, _)| i)
        .collect();

    let neighbours = |i: usize, remaining: &BTreeSet<usize>| -> Vec<usize> {
        remaining
            .iter()
            .copied()
            .filter(|&j| {
                j != i && (profiles[i].subsumes.contains(&j) || profiles[i].subsumed_by.contains(&j))
            })
            .collect()
    };

    let mut chosen = Vec::new();
    while let Some(pick) = remaining
        .iter()
        .copied()
        .min_by_key(|&i| neighbours(i, &remaining).len())
    {
        for j in neighbours(pick, &remaining) {
            remaining.remove(&j);
        }
        remaining.remove(&pick);
        chosen.push(pick);
    }
    chosen
}

/// Classify `mutants` against `original` on the given inputs.
pub fn analyze(
    original: ProgramFn,
    mutants: &[Mutant],
    inputs: &[f64],
    timeout: Duration,
) -> MutantReport {
    let expected: Vec<_> = inputs
        .iter()
        .map(|&input| execute(original, input, timeout))
        .collect();
    let mut profiles: Vec<Profile> = mutants
        .iter()
        .map(|mutant| profile(&expected, mutant, inputs, timeout))
        .collect();
    resolve_subsumption(&mut profiles);
    let independent = independent_set(&profiles);

    let mut statistics = ReportStatistics {
        total_mutants: profiles.len(),
        ..Default::default()
    };
    let mut by_type = IndexMap::new();
    for kind in MutantKind::ALL {
        let names: Vec<String> = profiles
            .iter()
            .filter(|p| p.kind == kind)
            .map(|p| p.name.clone())
            .collect();
        let slot = match kind {
            MutantKind::Normal => &mut statistics.normal,
            MutantKind::Equivalent => &mut statistics.equivalent,
            MutantKind::Subsumed => &mut statistics.subsumed,
            MutantKind::AllKilled => &mut statistics.all_killed,
            MutantKind::Error => &mut statistics.error,
            MutantKind::Timeout => &mut statistics.timeout,
        };
        *slot = names.len();
        by_type.insert(kind.to_string(), names);
    }

    let subsumption_relations = profiles
        .iter()
        .filter(|p| !p.subsumes.is_empty())
        .map(|p| Subsumption {
            subsumer: p.name.clone(),
            subsumed: p.subsumes.iter().map(|&j| profiles[j].name.clone()).collect(),
        })
        .collect();

    let kill_counts = profiles
        .iter()
        .map(|p| (p.name.clone(), p.kills.len()))
        .collect();

    MutantReport {
        inputs: inputs.len(),
        statistics,
        maximum_independent_set: IndependentSet {
            size: independent.len(),
            mutants: independent
                .iter()
                .map(|&i| profiles[i].name.clone())
                .collect(),
        },
        subsumption_relations,
        mutants_by_type: by_type,
        kill_counts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(3);

    fn identity(x: f64) -> Result<f64, ExecutionError> {
        Ok(x)
    }

    fn same(x: f64) -> Result<f64, ExecutionError> {
        Ok(x)
    }

    fn negated(x: f64) -> Result<f64, ExecutionError> {
        Ok(-x)
    }

    /// Killed when x > 5
    fn clipped_high(x: f64) -> Result<f64, ExecutionError> {
        Ok(x.min(5.0))
    }

    /// Killed when x > 2 (strict superset of `clipped_high`'s kills)
    fn clipped_low(x: f64) -> Result<f64, ExecutionError> {
        Ok(x.min(2.0))
    }

    /// Killed when x < 5
    fn floored(x: f64) -> Result<f64, ExecutionError> {
        Ok(x.max(5.0))
    }

    fn failing(x: f64) -> Result<f64, ExecutionError> {
        if x > 8.0 {
            Err(ExecutionError::Fault("overflow".to_string()))
        } else {
            Ok(x)
        }
    }

    fn mutant(name: &'static str, program: ProgramFn) -> Mutant {
        Mutant { name, program }
    }

    fn inputs() -> Vec<f64> {
        (1..=10).map(|i| i as f64).collect()
    }

    fn report() -> MutantReport {
        let mutants = [
            mutant("same", same),
            mutant("negated", negated),
            mutant("clipped_high", clipped_high),
            mutant("clipped_low", clipped_low),
            mutant("floored", floored),
            mutant("failing", failing),
        ];
        analyze(identity, &mutants, &inputs(), TIMEOUT)
    }

    #[test]
    fn test_classification() {
        let report = report();
        let by_type = &report.mutants_by_type;
        assert_eq!(by_type.get("equivalent").unwrap(), &vec!["same".to_string()]);
        assert_eq!(by_type.get("error").unwrap(), &vec!["failing".to_string()]);
        assert_eq!(
            by_type.get("normal").unwrap(),
            &vec!["clipped_high".to_string(), "floored".to_string()]
        );
        // negated kills every input but also contains every other kill set
        assert_eq!(
            by_type.get("subsumed").unwrap(),
            &vec!["negated".to_string(), "clipped_low".to_string()]
        );
        assert!(by_type.get("all_killed").unwrap().is_empty());

        assert_eq!(report.statistics.total_mutants, 6);
        assert_eq!(report.statistics.normal, 2);
        assert_eq!(report.statistics.subsumed, 2);
        assert_eq!(report.statistics.timeout, 0);
        assert_eq!(report.kill_counts.get("clipped_high"), Some(&5));
        assert_eq!(report.kill_counts.get("clipped_low"), Some(&8));
        assert_eq!(report.kill_counts.get("failing"), Some(&0));
    }

    #[test]
    fn test_only_output_mismatches_kill() {
        /// Off by one, and failing above 8
        fn shifted_failing(x: f64) -> Result<f64, ExecutionError> {
            if x > 8.0 {
                Err(ExecutionError::Fault("overflow".to_string()))
            } else {
                Ok(x + 1.0)
            }
        }
        let report = analyze(
            identity,
            &[mutant("shifted_failing", shifted_failing)],
            &inputs(),
            TIMEOUT,
        );
        assert_eq!(report.statistics.error, 1);
        assert_eq!(report.kill_counts.get("shifted_failing"), Some(&8));
    }

    #[test]
    fn test_original_failure_kills_surviving_mutant() {
        fn picky(x: f64) -> Result<f64, ExecutionError> {
            if x > 8.0 {
                Err(ExecutionError::Fault("overflow".to_string()))
            } else {
                Ok(x)
            }
        }
        let report = analyze(picky, &[mutant("identity", identity)], &inputs(), TIMEOUT);
        assert_eq!(report.kill_counts.get("identity"), Some(&2));
        assert_eq!(report.statistics.normal, 1);
    }

    #[test]
    fn test_all_killed_without_smaller_kill_sets() {
        let report = analyze(identity, &[mutant("negated", negated)], &inputs(), TIMEOUT);
        assert_eq!(report.statistics.all_killed, 1);
        assert!(report.subsumption_relations.is_empty());
        assert_eq!(report.maximum_independent_set.size, 0);
    }

    #[test]
    fn test_subsumption_relations() {
        let report = report();
        let relations: Vec<_> = report
            .subsumption_relations
            .iter()
            .map(|r| (r.subsumer.as_str(), r.subsumed.clone()))
            .collect();
        assert_eq!(
            relations,
            vec![
                (
                    "clipped_high",
                    vec!["negated".to_string(), "clipped_low".to_string()]
                ),
                ("clipped_low", vec!["negated".to_string()]),
                ("floored", vec!["negated".to_string()]),
            ]
        );
    }

    #[test]
    fn test_independent_set_excludes_neighbours() {
        let report = report();
        let chosen = &report.maximum_independent_set.mutants;
        assert_eq!(report.maximum_independent_set.size, chosen.len());
        // floored has the fewest edges and knocks out negated; clipped_high then
        // wins the tie against clipped_low
        assert_eq!(chosen, &vec!["floored".to_string(), "clipped_high".to_string()]);
    }

    #[test]
    fn test_timeout_stops_analysis() {
        fn slow(x: f64) -> Result<f64, ExecutionError> {
            std::thread::sleep(Duration::from_millis(5));
            Ok(x)
        }
        let report = analyze(
            identity,
            &[mutant("slow", slow)],
            &inputs(),
            Duration::from_millis(1),
        );
        assert_eq!(report.statistics.timeout, 1);
        assert_eq!(report.kill_counts.get("slow"), Some(&0));
    }

    #[test]
    fn test_sample_inputs_within_range() {
        use crate::config::ValueRange;
        use rand::rngs::StdRng;
        use rand::SeedableRng;

        let space = InputSpace::new(
            ValueRange::new(1.0, 100.0),
            vec![ValueRange::new(1.0, 100.0)],
            Some(2),
        );
        let mut rng = StdRng::seed_from_u64(7);
        let values = sample_inputs(&space, 200, &mut rng).unwrap();
        assert_eq!(values.len(), 200);
        assert!(values.iter().all(|v| (1.0..=100.0).contains(v)));
    }

    #[test]
    fn test_report_saves_json() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("analysis").join("report.json");
        report().save(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(value["statistics"]["total_mutants"], 6);
        assert_eq!(value["maximum_independent_set"]["size"], 2);
        assert_eq!(value["mutants_by_type"]["equivalent"][0], "same");
    }
}
