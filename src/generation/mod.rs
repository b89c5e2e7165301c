//! Test selection strategies.
//!
//! Phase 1 strategies produce source test cases from the raw input space
//! ([`SourceGenerator`]); phase 2 strategies sample metamorphic groups from a
//! candidate domain ([`GroupSampler`]). Strategies are resolved by name through
//! an explicit registry.

pub mod art;
pub mod mtart;
pub mod partition;
pub mod random;

use rand::seq::SliceRandom;
use rand::RngCore;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::{ExperimentConfig, SubjectConfig};
use crate::domain::CandidateDomain;
use crate::error::SelectionError;
use crate::model::{GroupRef, InputSpace, MetamorphicGroup, Phase, TestCase};
use crate::relation::RelationRegistry;

/// Generates source test cases directly from the input space.
pub trait SourceGenerator: Send {
    fn generate(
        &mut self,
        count: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<TestCase>, SelectionError>;
}

/// Samples metamorphic groups from a candidate domain.
pub trait GroupSampler: Send {
    fn generate(
        &mut self,
        count: usize,
        domain: &CandidateDomain,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<GroupRef>, SelectionError>;
}

/// Everything a strategy constructor may need.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    pub space: Arc<InputSpace>,
    pub partition_ratio: Vec<f64>,
    pub relation_weights: BTreeMap<String, u32>,
    pub art_candidates: usize,
    pub mtart_candidates: usize,
    pub mtart_window: usize,
}

impl StrategyContext {
    pub fn new(space: Arc<InputSpace>, subject: &SubjectConfig, settings: &ExperimentConfig) -> Self {
        Self {
            space,
            partition_ratio: subject.partition_ratio.clone(),
            relation_weights: subject.relation_weights.clone(),
            art_candidates: settings.art_candidates,
            mtart_candidates: settings.mtart_candidates,
            mtart_window: settings.mtart_window,
        }
    }
}

/// A constructed strategy, owned by exactly one worker.
pub enum Strategy {
    Source(Box<dyn SourceGenerator>),
    Group(Box<dyn GroupSampler>),
}

type SourceCtor = fn(&StrategyContext) -> Box<dyn SourceGenerator>;
type GroupCtor = fn(&StrategyContext) -> Box<dyn GroupSampler>;

const SOURCE_STRATEGIES: &[(&str, SourceCtor)] = &[
    ("random", |ctx| {
        Box::new(random::RandomSourceGenerator::new(ctx.space.as_ref().clone()))
    }),
    ("partition", |ctx| {
        Box::new(partition::PartitionSourceGenerator::new(
            ctx.space.as_ref().clone(),
            ctx.partition_ratio.clone(),
        ))
    }),
    ("art", |ctx| {
        Box::new(art::ArtGenerator::new(
            ctx.space.as_ref().clone(),
            ctx.art_candidates,
        ))
    }),
];

const GROUP_STRATEGIES: &[(&str, GroupCtor)] = &[
    ("random", |_| Box::new(random::RandomGroupSampler)),
    ("partition", |ctx| {
        Box::new(partition::PartitionGroupSampler::new(
            ctx.partition_ratio.clone(),
            ctx.relation_weights.clone(),
        ))
    }),
    ("mtart", |ctx| {
        Box::new(mtart::MtArtSampler::new(ctx.mtart_candidates, ctx.mtart_window))
    }),
];

/// Names of the strategies available in a phase.
pub fn strategy_names(phase: Phase) -> Vec<&'static str> {
    match phase {
        Phase::Phase1 => SOURCE_STRATEGIES.iter().map(|(n, _)| *n).collect(),
        Phase::Phase2 => GROUP_STRATEGIES.iter().map(|(n, _)| *n).collect(),
    }
}

/// Fail fast on a strategy name the phase does not know.
pub fn validate_strategy(name: &str, phase: Phase) -> Result<(), SelectionError> {
    if strategy_names(phase).contains(&name) {
        Ok(())
    } else {
        Err(SelectionError::config(format!(
            "unknown {} strategy '{}' (known: {})",
            phase,
            name,
            strategy_names(phase).join(", ")
        )))
    }
}

pub fn build_strategy(
    name: &str,
    phase: Phase,
    ctx: &StrategyContext,
) -> Result<Strategy, SelectionError> {
    validate_strategy(name, phase)?;
    let strategy = match phase {
        Phase::Phase1 => SOURCE_STRATEGIES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, ctor)| Strategy::Source(ctor(ctx))),
        Phase::Phase2 => GROUP_STRATEGIES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, ctor)| Strategy::Group(ctor(ctx))),
    };
    strategy.ok_or_else(|| SelectionError::config(format!("unknown strategy '{}'", name)))
}

/// Derive one group per source: a random applicable relation, then one of its
/// follow-ups. Sources without a usable relation yield no group.
pub fn derive_groups(
    sources: &[TestCase],
    relations: &RelationRegistry,
    space: &InputSpace,
    rng: &mut dyn RngCore,
) -> Vec<GroupRef> {
    let mut groups = Vec::with_capacity(sources.len());
    for source in sources {
        let applicable = relations.applicable(source, space);
        let Some(relation) = applicable.choose(rng) else {
            continue;
        };
        match relation.generate_followups(source, space, rng) {
            Ok(followups) => {
                if let Some(followup) = followups.choose(rng) {
                    groups.push(MetamorphicGroup::new(relation.id(), *source, *followup));
                }
            }
            Err(e) => tracing::debug!("{} produced no follow-up: {}", relation.id(), e),
        }
    }
    groups
}
