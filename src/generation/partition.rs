//! Partition-balanced selection.
//!
//! Cells carry an expected weight; every round the cell with the lowest
//! achieved ratio `selected / weight` receives the next draw. Ties go to the
//! heavier cell, then to the lower cell index. The cell order lives in a
//! binary heap so each round costs O(log cells).

use rand::seq::SliceRandom;
use rand::{Rng, RngCore};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};

use super::{GroupSampler, SourceGenerator};
use crate::domain::CandidateDomain;
use crate::error::SelectionError;
use crate::model::{GroupRef, InputSpace, TestCase};

#[derive(Debug, Clone, Copy)]
struct Slot {
    ratio: f64,
    weight: f64,
    index: usize,
}

impl PartialEq for Slot {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Slot {}

impl PartialOrd for Slot {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Slot {
    /// Greatest = next to draw: lowest ratio, then largest weight, then lowest index.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .ratio
            .total_cmp(&self.ratio)
            .then_with(|| self.weight.total_cmp(&other.weight))
            .then_with(|| other.index.cmp(&self.index))
    }
}

/// Greedy lowest-ratio allocation over weighted cells.
#[derive(Debug, Clone)]
pub struct BalancedAllocator {
    heap: BinaryHeap<Slot>,
    weights: Vec<f64>,
    selected: Vec<usize>,
}

impl BalancedAllocator {
    /// Cells with a non-positive weight never receive draws.
    pub fn new(weights: Vec<f64>) -> Self {
        let heap = weights
            .iter()
            .enumerate()
            .filter(|(_, w)| w.is_finite() && **w > 0.0)
            .map(|(index, &weight)| Slot {
                ratio: 0.0,
                weight,
                index,
            })
            .collect();
        let selected = vec![0; weights.len()];
        Self {
            heap,
            weights,
            selected,
        }
    }

    /// Index of the cell receiving the next draw, or `None` when no cell is eligible.
    pub fn next_cell(&mut self) -> Option<usize> {
        let slot = self.heap.pop()?;
        self.selected[slot.index] += 1;
        self.heap.push(Slot {
            ratio: self.selected[slot.index] as f64 / self.weights[slot.index],
            ..slot
        });
        Some(slot.index)
    }

    pub fn counts(&self) -> &[usize] {
        &self.selected
    }
}

/// Phase 1: one uniform value inside the partition chosen by the allocator.
pub struct PartitionSourceGenerator {
    space: InputSpace,
    partition_ratio: Vec<f64>,
}

impl PartitionSourceGenerator {
    pub fn new(space: InputSpace, partition_ratio: Vec<f64>) -> Self {
        Self {
            space,
            partition_ratio,
        }
    }
}

impl SourceGenerator for PartitionSourceGenerator {
    fn generate(
        &mut self,
        count: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<TestCase>, SelectionError> {
        let ranges: Vec<_> = self
            .space
            .partitions
            .iter()
            .map(|p| (p.min.max(self.space.range.min), p.max.min(self.space.range.max)))
            .collect();
        let weights = ranges
            .iter()
            .enumerate()
            .map(|(i, (lo, hi))| {
                if lo < hi {
                    self.partition_ratio.get(i).copied().unwrap_or(0.0)
                } else {
                    0.0
                }
            })
            .collect();

        let mut allocator = BalancedAllocator::new(weights);
        let mut cases = Vec::with_capacity(count);
        while cases.len() < count {
            let Some(cell) = allocator.next_cell() else {
                break;
            };
            let (lo, hi) = ranges[cell];
            cases.push(self.space.case(rng.gen_range(lo..hi)));
        }
        Ok(cases)
    }
}

/// Phase 2: one uniform member of the (partition, relation) cell chosen by the allocator.
pub struct PartitionGroupSampler {
    partition_ratio: Vec<f64>,
    relation_weights: BTreeMap<String, u32>,
}

impl PartitionGroupSampler {
    pub fn new(partition_ratio: Vec<f64>, relation_weights: BTreeMap<String, u32>) -> Self {
        Self {
            partition_ratio,
            relation_weights,
        }
    }

    fn cell_weight(&self, partition: u32, relation: &str) -> f64 {
        let ratio = (partition as usize)
            .checked_sub(1)
            .and_then(|i| self.partition_ratio.get(i))
            .copied()
            .unwrap_or(0.0);
        let weight = self.relation_weights.get(relation).copied().unwrap_or(0);
        ratio * f64::from(weight)
    }
}

impl GroupSampler for PartitionGroupSampler {
    fn generate(
        &mut self,
        count: usize,
        domain: &CandidateDomain,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<GroupRef>, SelectionError> {
        let cells = domain.cells();
        let weights = cells
            .iter()
            .map(|cell| {
                if cell.members.is_empty() {
                    0.0
                } else {
                    self.cell_weight(cell.partition, &cell.relation)
                }
            })
            .collect();

        let mut allocator = BalancedAllocator::new(weights);
        let mut sample = Vec::with_capacity(count);
        while sample.len() < count {
            let Some(cell) = allocator.next_cell() else {
                break;
            };
            if let Some(&member) = cells[cell].members.choose(rng) {
                sample.push(domain.groups()[member].clone());
            }
        }
        Ok(sample)
    }
}
