//! Metamorphic adaptive random testing over (source, follow-up) pairs.
//!
//! The source coordinate range of the domain is cut into `max(1, 1.5 * count)`
//! equal-width bins. Each step samples a few uncovered, non-empty bins, takes
//! one random member of each and keeps the candidate farthest (mean Manhattan
//! distance) from a sliding window of recent selections. The source and
//! follow-up bins of the winner become covered. Scoring against the window
//! instead of every prior selection keeps each step O(window).

use rand::seq::{index, SliceRandom};
use rand::RngCore;
use std::collections::VecDeque;

use super::GroupSampler;
use crate::domain::CandidateDomain;
use crate::error::SelectionError;
use crate::model::{GroupRef, TestCase};

/// Weight of the source/follow-up spread relative to the cross-selection distance.
const INTERNAL_WEIGHT: f64 = 0.001;

pub type Coordinate = fn(&TestCase) -> f64;

fn input_value(case: &TestCase) -> f64 {
    case.value
}

pub struct MtArtSampler {
    candidates_per_iter: usize,
    window: usize,
    coordinate: Coordinate,
}

impl MtArtSampler {
    pub fn new(candidates_per_iter: usize, window: usize) -> Self {
        Self {
            candidates_per_iter: candidates_per_iter.max(1),
            window: window.max(1),
            coordinate: input_value,
        }
    }

    /// Use a different coordinate for distances and binning.
    pub fn with_coordinate(mut self, coordinate: Coordinate) -> Self {
        self.coordinate = coordinate;
        self
    }
}

struct Bins {
    low: f64,
    width: f64,
    count: usize,
}

impl Bins {
    fn new(low: f64, high: f64, count: usize) -> Self {
        Self {
            low,
            width: (high - low) / count as f64,
            count,
        }
    }

    /// Bin of a coordinate; values outside the range clamp to the edge bins.
    fn of(&self, x: f64) -> usize {
        if self.width.is_nan() || self.width <= 0.0 || !x.is_finite() {
            return 0;
        }
        let bin = ((x - self.low) / self.width).floor();
        if bin < 0.0 {
            0
        } else {
            (bin as usize).min(self.count - 1)
        }
    }
}

fn score(pair: (f64, f64), window: &VecDeque<(f64, f64)>) -> f64 {
    if window.is_empty() {
        return f64::INFINITY;
    }
    let spread: f64 = window
        .iter()
        .map(|&(s, f)| (pair.0 - s).abs() + (pair.1 - f).abs())
        .sum();
    spread / window.len() as f64 + INTERNAL_WEIGHT * (pair.0 - pair.1).abs()
}

impl GroupSampler for MtArtSampler {
    fn generate(
        &mut self,
        count: usize,
        domain: &CandidateDomain,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<GroupRef>, SelectionError> {
        if count > domain.len() {
            return Err(SelectionError::invalid(format!(
                "sample size {} exceeds domain size {}",
                count,
                domain.len()
            )));
        }
        if count == 0 {
            return Ok(Vec::new());
        }

        let coordinate = self.coordinate;
        let groups = domain.groups();
        let (low, high) = groups
            .iter()
            .map(|g| coordinate(&g.source))
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| {
                (lo.min(x), hi.max(x))
            });
        let bins = Bins::new(low, high, ((1.5 * count as f64) as usize).max(1));

        let mut members: Vec<Vec<usize>> = vec![Vec::new(); bins.count];
        for (i, group) in groups.iter().enumerate() {
            members[bins.of(coordinate(&group.source))].push(i);
        }
        let mut covered = vec![false; bins.count];
        let mut window: VecDeque<(f64, f64)> = VecDeque::with_capacity(self.window);
        let mut selected = Vec::with_capacity(count);

        while selected.len() < count {
            let open: Vec<usize> = (0..bins.count)
                .filter(|&b| !covered[b] && !members[b].is_empty())
                .collect();
            if open.is_empty() {
                break;
            }

            let picks = index::sample(rng, open.len(), self.candidates_per_iter.min(open.len()));
            let mut best: Option<(f64, usize)> = None;
            for pick in picks {
                let Some(&candidate) = members[open[pick]].choose(rng) else {
                    continue;
                };
                let group = &groups[candidate];
                let s = score(
                    (coordinate(&group.source), coordinate(&group.followup)),
                    &window,
                );
                if best.map_or(true, |(top, _)| s > top) {
                    best = Some((s, candidate));
                }
            }
            let Some((_, winner)) = best else {
                break;
            };

            let group = &groups[winner];
            let pair = (coordinate(&group.source), coordinate(&group.followup));
            covered[bins.of(pair.0)] = true;
            covered[bins.of(pair.1)] = true;
            if window.len() == self.window {
                window.pop_front();
            }
            window.push_back(pair);
            selected.push(group.clone());
        }

        if selected.len() < count {
            tracing::debug!(
                "MT-ART stopped early: {} of {} groups selected",
                selected.len(),
                count
            );
        }
        Ok(selected)
    }
}
