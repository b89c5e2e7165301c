//! Candidate domain: a precomputed pool of metamorphic groups, stratified by
//! (source partition, relation).

use rand::RngCore;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::config::{ExperimentConfig, SubjectConfig};
use crate::error::SelectionError;
use crate::generation::partition::PartitionSourceGenerator;
use crate::generation::SourceGenerator;
use crate::model::{GroupRef, InputSpace, MetamorphicGroup};
use crate::relation::RelationRegistry;

/// Members of one (partition, relation) stratum, as indices into the domain.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub partition: u32,
    pub relation: String,
    pub members: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct CandidateDomain {
    groups: Vec<GroupRef>,
    cells: Vec<Cell>,
}

impl CandidateDomain {
    /// Index an existing list of groups into cells ordered by (partition, relation).
    pub fn from_groups(groups: Vec<GroupRef>) -> Self {
        let mut index: BTreeMap<(u32, &str), Vec<usize>> = BTreeMap::new();
        for (i, group) in groups.iter().enumerate() {
            index
                .entry((group.source.partition, group.relation.as_str()))
                .or_default()
                .push(i);
        }
        let cells = index
            .into_iter()
            .map(|((partition, relation), members)| Cell {
                partition,
                relation: relation.to_string(),
                members,
            })
            .collect();
        Self { groups, cells }
    }

    /// Number of source cases to generate for a subject:
    /// `min(max(min_samples_per_cell * cells * safety_factor, floor), ceiling)`.
    pub fn target_size(
        config: &SubjectConfig,
        settings: &ExperimentConfig,
    ) -> Result<usize, SelectionError> {
        let bounds = config.domain_size_bounds;
        if bounds.min > bounds.max {
            return Err(SelectionError::invalid(format!(
                "domain size floor {} exceeds ceiling {}",
                bounds.min, bounds.max
            )));
        }
        let wanted = (settings.min_samples_per_cell * config.cell_count()) as f64
            * settings.safety_factor;
        Ok((wanted.ceil() as usize).clamp(bounds.min, bounds.max))
    }

    /// Generate partition-balanced sources and apply every applicable relation to each.
    pub fn build(
        space: &InputSpace,
        relations: &RelationRegistry,
        config: &SubjectConfig,
        settings: &ExperimentConfig,
        rng: &mut dyn RngCore,
    ) -> Result<Self, SelectionError> {
        let size = Self::target_size(config, settings)?;
        let mut sources =
            PartitionSourceGenerator::new(space.clone(), config.partition_ratio.clone());
        let sources = sources.generate(size, rng)?;

        let mut groups = Vec::new();
        let mut skipped = 0usize;
        let mut produced: BTreeSet<&str> = BTreeSet::new();
        let mut failures: BTreeMap<&str, String> = BTreeMap::new();
        for source in &sources {
            for relation in relations.applicable(source, space) {
                match relation.generate_followups(source, space, rng) {
                    Ok(followups) => {
                        produced.insert(relation.id());
                        groups.extend(
                            followups
                                .into_iter()
                                .map(|f| MetamorphicGroup::new(relation.id(), *source, f)),
                        );
                    }
                    Err(e) => {
                        skipped += 1;
                        tracing::debug!(
                            "Skipping {} for source {}: {}",
                            relation.id(),
                            source.value,
                            e
                        );
                        failures.insert(relation.id(), e.to_string());
                    }
                }
            }
        }

        // Fatal only for a relation that failed on every source it applied to
        if let Some((relation, message)) = failures
            .into_iter()
            .find(|(id, _)| !produced.contains(id))
        {
            return Err(SelectionError::Relation {
                relation: relation.to_string(),
                message,
            });
        }
        if groups.is_empty() {
            return Err(SelectionError::invalid(
                "no relation is applicable to any generated source",
            ));
        }

        tracing::info!(
            "Built candidate domain: {} groups from {} sources ({} relation failures)",
            groups.len(),
            sources.len(),
            skipped
        );
        Ok(Self::from_groups(groups))
    }

    pub fn groups(&self) -> &[GroupRef] {
        &self.groups
    }

    pub fn cells(&self) -> &[Cell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn statistics(&self) -> DomainStatistics {
        let mut counts = BTreeMap::new();
        for cell in &self.cells {
            counts.insert((cell.relation.clone(), cell.partition), cell.members.len());
        }
        DomainStatistics {
            counts,
            total: self.groups.len(),
        }
    }
}

/// Relation x partition cross table of a domain.
#[derive(Debug, Clone, PartialEq)]
pub struct DomainStatistics {
    pub counts: BTreeMap<(String, u32), usize>,
    pub total: usize,
}

impl DomainStatistics {
    pub fn relations(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.counts.keys().map(|(r, _)| r.as_str()).collect();
        ids.dedup();
        ids
    }

    pub fn partitions(&self) -> Vec<u32> {
        let mut ids: Vec<u32> = self.counts.keys().map(|(_, p)| *p).collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn relation_total(&self, relation: &str) -> usize {
        self.counts
            .iter()
            .filter(|((r, _), _)| r == relation)
            .map(|(_, n)| n)
            .sum()
    }

    pub fn partition_total(&self, partition: u32) -> usize {
        self.counts
            .iter()
            .filter(|((_, p), _)| *p == partition)
            .map(|(_, n)| n)
            .sum()
    }
}

impl fmt::Display for DomainStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let partitions = self.partitions();
        write!(f, "{:<10}", "relation")?;
        for p in &partitions {
            write!(f, "{:>8}", format!("P{}", p))?;
        }
        writeln!(f, "{:>8}", "total")?;

        for relation in self.relations() {
            write!(f, "{:<10}", relation)?;
            for p in &partitions {
                let n = self
                    .counts
                    .get(&(relation.to_string(), *p))
                    .copied()
                    .unwrap_or(0);
                write!(f, "{:>8}", n)?;
            }
            writeln!(f, "{:>8}", self.relation_total(relation))?;
        }

        write!(f, "{:<10}", "total")?;
        for p in &partitions {
            write!(f, "{:>8}", self.partition_total(*p))?;
        }
        write!(f, "{:>8}", self.total)
    }
}
