use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use psalm::config::{Config, SizeRange};
use psalm::domain::CandidateDomain;
use psalm::evaluation::executor::{collect_results, domain_seed, run_mutants, RunPlan};
use psalm::evaluation::results::{load_errors, load_p_measures};
use psalm::evaluation::Evaluator;
use psalm::generation::{strategy_names, validate_strategy, StrategyContext};
use psalm::model::Phase;
use psalm::subject::Mutant;
use psalm::{mutant_analysis, stats, subject};

#[derive(Parser)]
#[command(name = "psalm")]
#[command(version)]
#[command(about = "Partition- and diversity-based selection of metamorphic test groups")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Estimate P-measures of selection strategies against every mutant of a subject
    Run {
        #[arg(short, long)]
        subject: String,

        #[arg(short, long, value_enum)]
        phase: Phase,

        /// Strategies to run (defaults to every strategy of the phase)
        #[arg(long = "strategy")]
        strategies: Vec<String>,

        /// Mutants to evaluate (defaults to all mutants of the subject)
        #[arg(long = "mutant")]
        mutants: Vec<String>,

        /// Smallest sample size
        #[arg(long)]
        min_size: Option<usize>,

        /// Largest sample size
        #[arg(long)]
        max_size: Option<usize>,

        /// Trials per P-measure estimate
        #[arg(long)]
        internal: Option<usize>,

        /// P-measure estimates per sample size
        #[arg(long)]
        external: Option<usize>,

        #[arg(long)]
        seed: Option<u64>,

        #[arg(long)]
        threads: Option<usize>,
    },

    /// Compare two strategies' P-measures per mutant
    Compare {
        #[arg(short, long)]
        subject: String,

        #[arg(short, long, value_enum)]
        phase: Phase,

        #[arg(long)]
        a: String,

        #[arg(long)]
        b: String,

        /// Sample size to compare (defaults to the smallest configured one)
        #[arg(long)]
        size: Option<usize>,

        /// Runs per mutant (defaults to `external_iteration`)
        #[arg(long)]
        runs: Option<usize>,

        #[arg(long, default_value_t = 0.05)]
        alpha: f64,
    },

    /// Build the candidate domain of a subject and print its relation x partition table
    Domain {
        #[arg(short, long)]
        subject: String,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Write a configuration file holding the built-in subject tables
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Classify the mutants of a subject and find redundant ones
    AnalyzeMutants {
        #[arg(short, long)]
        subject: String,

        /// Number of random inputs
        #[arg(long, default_value_t = 1000)]
        cases: usize,

        #[arg(long)]
        seed: Option<u64>,

        /// Report path (defaults to `<data_dir>/mutant_analysis/<subject>.json`)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli.config.clone().or_else(Config::default_config_path);
    let mut config = Config::load(cli.config.as_deref())?;

    // Initialize logging
    let filter = EnvFilter::try_new(&config.general.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    tracing::info!(
        "Config path: {}",
        config_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none, using defaults)".to_string())
    );
    tracing::info!("Data directory: {}", config.data_dir().display());

    match cli.command {
        Commands::Run {
            subject,
            phase,
            strategies,
            mutants,
            min_size,
            max_size,
            internal,
            external,
            seed,
            threads,
        } => {
            let settings = &mut config.experiment;
            if let Some(n) = internal {
                settings.internal_iteration = n;
            }
            if let Some(n) = external {
                settings.external_iteration = n;
            }
            if seed.is_some() {
                settings.seed = seed;
            }
            if threads.is_some() {
                settings.threads = threads;
            }
            if min_size.is_some() || max_size.is_some() {
                let current = settings.sample_size_range;
                let min = min_size.or(current.map(|r| r.min));
                let max = max_size.or(current.map(|r| r.max));
                settings.sample_size_range = Some(SizeRange {
                    min: min.or(max).unwrap_or(1),
                    max: max.or(min).unwrap_or(1),
                });
            }
            run(&config, &subject, phase, strategies, mutants).await?;
        }
        Commands::Compare {
            subject,
            phase,
            a,
            b,
            size,
            runs,
            alpha,
        } => compare(&config, &subject, phase, &a, &b, size, runs, alpha)?,
        Commands::Domain { subject, seed } => {
            let subject = subject::lookup(&subject)?;
            let subject_config = config.subject_config(subject.name, (subject.default_config)());
            subject_config.validate()?;
            let seed = seed.or(config.experiment.seed).unwrap_or_else(rand::random);
            let relations = subject.relation_registry(&subject_config)?;
            let mut rng = StdRng::seed_from_u64(domain_seed(seed));
            let domain = CandidateDomain::build(
                &subject.input_space(&subject_config),
                &relations,
                &subject_config,
                &config.experiment,
                &mut rng,
            )?;
            tracing::info!("Domain of {} built with seed {}", subject.name, seed);
            for relation in relations.iter() {
                println!(
                    "{} (x{}): {}",
                    relation.id(),
                    relations.weight(relation.id()).unwrap_or(0),
                    relation.description()
                );
            }
            println!();
            println!("{}", domain.statistics());
        }
        Commands::InitConfig { force } => {
            let target = cli.config.clone().or_else(Config::default_config_path);
            if let Some(existing) = target.as_ref().filter(|p| p.exists()) {
                if !force {
                    anyhow::bail!(
                        "{} already exists (use --force to overwrite)",
                        existing.display()
                    );
                }
            }
            for subject in subject::all() {
                config
                    .subjects
                    .entry(subject.name.to_string())
                    .or_insert_with(subject.default_config);
            }
            let path = config.save(target.as_deref())?;
            tracing::info!("Configuration written to {}", path.display());
        }
        Commands::AnalyzeMutants {
            subject,
            cases,
            seed,
            output,
        } => {
            let subject = subject::lookup(&subject)?;
            let subject_config = config.subject_config(subject.name, (subject.default_config)());
            subject_config.validate()?;
            let seed = seed.or(config.experiment.seed).unwrap_or_else(rand::random);
            let mut rng = StdRng::seed_from_u64(seed);
            let inputs =
                mutant_analysis::sample_inputs(&subject.input_space(&subject_config), cases, &mut rng)?;

            tracing::info!(
                "Analyzing {} mutants of {} on {} inputs (seed {})",
                subject.mutants.len(),
                subject.name,
                inputs.len(),
                seed
            );
            let report = mutant_analysis::analyze(
                subject.program,
                subject.mutants,
                &inputs,
                Duration::from_millis(config.experiment.call_timeout_ms),
            );

            let path = output.unwrap_or_else(|| {
                config
                    .data_dir()
                    .join("mutant_analysis")
                    .join(format!("{}.json", subject.name))
            });
            report
                .save(&path)
                .with_context(|| format!("Failed to write mutant report to {:?}", path))?;

            let s = &report.statistics;
            tracing::info!(
                "{} mutants: {} normal, {} equivalent, {} subsumed, {} all killed, {} error, {} timeout",
                s.total_mutants,
                s.normal,
                s.equivalent,
                s.subsumed,
                s.all_killed,
                s.error,
                s.timeout
            );
            tracing::info!(
                "Independent set ({}): {}",
                report.maximum_independent_set.size,
                report.maximum_independent_set.mutants.join(", ")
            );
            tracing::info!("Report written to {}", path.display());
        }
    }

    Ok(())
}

async fn run(
    config: &Config,
    name: &str,
    phase: Phase,
    strategies: Vec<String>,
    mutant_names: Vec<String>,
) -> Result<()> {
    let subject = subject::lookup(name)?;
    let mutants: Vec<Mutant> = if mutant_names.is_empty() {
        subject.mutants.to_vec()
    } else {
        mutant_names
            .iter()
            .map(|m| {
                subject
                    .mutant(m)
                    .copied()
                    .with_context(|| format!("Subject {} has no mutant '{}'", subject.name, m))
            })
            .collect::<Result<_>>()?
    };
    let subject_config = config.subject_config(subject.name, (subject.default_config)());
    subject_config.validate()?;
    let settings = &config.experiment;
    settings.validate()?;

    let strategies: Vec<String> = if strategies.is_empty() {
        strategy_names(phase).into_iter().map(String::from).collect()
    } else {
        strategies
    };
    for strategy in &strategies {
        validate_strategy(strategy, phase)?;
    }

    let space = Arc::new(subject.input_space(&subject_config));
    let relations = Arc::new(subject.relation_registry(&subject_config)?);
    let seed = settings.seed.unwrap_or_else(rand::random);
    let sizes = settings.sample_sizes(space.partition_count());
    let call_timeout = Duration::from_millis(settings.call_timeout_ms);

    let started_at = chrono::Local::now();
    tracing::info!(
        "Run started {}: subject {}, {}, {} mutants, sizes {}..={}, {} x {} iterations, seed {}",
        started_at.format("%Y-%m-%d %H:%M:%S"),
        subject.name,
        phase,
        mutants.len(),
        sizes.min,
        sizes.max,
        settings.external_iteration,
        settings.internal_iteration,
        seed
    );
    tracing::info!("{}: {}", subject.name, subject.description);
    tracing::info!(
        "Relations: {}; strategies: {}",
        relations.ids().collect::<Vec<_>>().join(", "),
        strategies.join(", ")
    );

    let evaluator = Arc::new(match phase {
        Phase::Phase1 => Evaluator::phase1(
            relations,
            Arc::clone(&space),
            settings.internal_iteration,
            call_timeout,
        ),
        Phase::Phase2 => {
            let mut rng = StdRng::seed_from_u64(domain_seed(seed));
            let domain =
                CandidateDomain::build(&space, &relations, &subject_config, settings, &mut rng)?;
            tracing::debug!("Domain table:\n{}", domain.statistics());
            Evaluator::phase2(
                relations,
                Arc::clone(&space),
                Arc::new(domain),
                settings.internal_iteration,
                call_timeout,
            )
        }
    });
    let context = Arc::new(StrategyContext::new(
        Arc::clone(&space),
        &subject_config,
        settings,
    ));
    let dir = config.results_dir(subject.name, &phase.to_string());

    for strategy in &strategies {
        let start = Instant::now();
        let plan = RunPlan {
            strategy: strategy.clone(),
            sizes,
            external_iteration: settings.external_iteration,
            seed,
            threads: settings.threads,
        };
        let outcomes = run_mutants(
            Arc::clone(&evaluator),
            Arc::clone(&context),
            &mutants,
            plan,
        )
        .await;
        let results = collect_results(outcomes);
        results
            .save(&dir, strategy)
            .with_context(|| format!("Failed to write results to {:?}", dir))?;

        tracing::info!(
            "Strategy {} finished in {:.1}s ({} mutants failed)",
            strategy,
            start.elapsed().as_secs_f64(),
            results.errors.len()
        );
        for row in results.summary() {
            tracing::info!(
                "  size {:>4}: mean {:.4}  min {:.4}  max {:.4}",
                row.size,
                row.mean,
                row.min,
                row.max
            );
        }
    }

    tracing::info!(
        "Run finished {}; results in {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        dir.display()
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn compare(
    config: &Config,
    name: &str,
    phase: Phase,
    a: &str,
    b: &str,
    size: Option<usize>,
    runs: Option<usize>,
    alpha: f64,
) -> Result<()> {
    let subject = subject::lookup(name)?;
    let subject_config = config.subject_config(subject.name, (subject.default_config)());
    let dir = config.results_dir(subject.name, &phase.to_string());

    let mut doc_a = load_p_measures(&dir, a)
        .with_context(|| format!("Failed to load P-measures of {} from {:?}", a, dir))?;
    let mut doc_b = load_p_measures(&dir, b)
        .with_context(|| format!("Failed to load P-measures of {} from {:?}", b, dir))?;

    // Mutants that failed in either run stay out of the comparison
    let errors_a = load_errors(&dir, a)?;
    let errors_b = load_errors(&dir, b)?;
    for (mutant, message) in errors_a.iter().chain(errors_b.iter()) {
        tracing::warn!("Excluding {}: {}", mutant, message);
    }
    let failed = |mutant: &str| errors_a.contains_key(mutant) || errors_b.contains_key(mutant);
    doc_a.retain(|mutant, _| !failed(mutant));
    doc_b.retain(|mutant, _| !failed(mutant));

    let size = size.unwrap_or_else(|| {
        config
            .experiment
            .sample_sizes(subject_config.partitions.len())
            .min
    });
    let runs = runs.unwrap_or(config.experiment.external_iteration);
    let rows = stats::compare(&doc_a, &doc_b, &size.to_string(), runs, alpha);
    if rows.is_empty() {
        tracing::warn!(
            "No mutant has {} runs at size {} for both {} and {}",
            runs,
            size,
            a,
            b
        );
    }
    for row in rows.iter().filter(|r| r.mutant == stats::SUMMARY) {
        tracing::info!(
            "{} vs {} at size {}: {} (A12 {:.3}, p {})",
            a,
            b,
            size,
            row.verdict,
            row.a12,
            row.p_value
                .map(|p| format!("{:.4}", p))
                .unwrap_or_else(|| "n/a".to_string())
        );
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&rows).context("Failed to serialize comparison")?
    );
    Ok(())
}
