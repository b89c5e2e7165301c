//! Adaptive random testing over raw input values (maximin selection).

use rand::{Rng, RngCore};

use super::SourceGenerator;
use crate::error::SelectionError;
use crate::model::{InputSpace, TestCase};

pub struct ArtGenerator {
    space: InputSpace,
    candidates_per_iter: usize,
}

impl ArtGenerator {
    pub fn new(space: InputSpace, candidates_per_iter: usize) -> Self {
        Self {
            space,
            candidates_per_iter: candidates_per_iter.max(1),
        }
    }
}

/// Distance from `value` to its nearest neighbour in a sorted, non-empty slice.
fn nearest_distance(sorted: &[f64], value: f64) -> f64 {
    let at = sorted.partition_point(|&v| v < value);
    let above = sorted.get(at).map(|&v| v - value);
    let below = at.checked_sub(1).map(|i| value - sorted[i]);
    match (below, above) {
        (Some(b), Some(a)) => b.min(a),
        (Some(d), None) | (None, Some(d)) => d,
        (None, None) => f64::INFINITY,
    }
}

impl SourceGenerator for ArtGenerator {
    fn generate(
        &mut self,
        count: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<TestCase>, SelectionError> {
        let range = self.space.range;
        let mut cases = Vec::with_capacity(count);
        let mut sorted: Vec<f64> = Vec::with_capacity(count);

        while cases.len() < count {
            let value = if sorted.is_empty() {
                rng.gen_range(range.min..=range.max)
            } else {
                let mut best = (f64::NEG_INFINITY, range.min);
                for _ in 0..self.candidates_per_iter {
                    let candidate = rng.gen_range(range.min..=range.max);
                    let distance = nearest_distance(&sorted, candidate);
                    if distance > best.0 {
                        best = (distance, candidate);
                    }
                }
                best.1
            };

            let case = self.space.case(value);
            let at = sorted.partition_point(|&v| v < case.value);
            sorted.insert(at, case.value);
            cases.push(case);
        }
        Ok(cases)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ValueRange;
    use crate::generation::random::RandomSourceGenerator;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn space() -> InputSpace {
        InputSpace::new(
            ValueRange::new(0.0, 1000.0),
            vec![ValueRange::new(0.0, 500.0), ValueRange::new(500.0, 1000.0)],
            None,
        )
    }

    fn min_gap(cases: &[TestCase]) -> f64 {
        let mut values: Vec<f64> = cases.iter().map(|c| c.value).collect();
        values.sort_by(f64::total_cmp);
        values
            .windows(2)
            .map(|w| w[1] - w[0])
            .fold(f64::INFINITY, f64::min)
    }

    #[test]
    fn test_nearest_distance() {
        let sorted = [1.0, 4.0, 10.0];
        assert_eq!(nearest_distance(&sorted, 0.0), 1.0);
        assert_eq!(nearest_distance(&sorted, 5.0), 1.0);
        assert_eq!(nearest_distance(&sorted, 8.0), 2.0);
        assert_eq!(nearest_distance(&sorted, 12.0), 2.0);
        assert_eq!(nearest_distance(&sorted, 4.0), 0.0);
    }

    #[test]
    fn test_generates_requested_count_in_range() {
        let mut rng = StdRng::seed_from_u64(12);
        let cases = ArtGenerator::new(space(), 10).generate(30, &mut rng).unwrap();
        assert_eq!(cases.len(), 30);
        assert!(cases.iter().all(|c| (0.0..=1000.0).contains(&c.value)));
        assert!(ArtGenerator::new(space(), 10)
            .generate(0, &mut rng)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_spreads_wider_than_random() {
        let mut art_total = 0.0;
        let mut random_total = 0.0;
        for seed in 0..20 {
            let mut rng = StdRng::seed_from_u64(seed);
            art_total += min_gap(&ArtGenerator::new(space(), 10).generate(20, &mut rng).unwrap());
            let mut rng = StdRng::seed_from_u64(seed);
            random_total +=
                min_gap(&RandomSourceGenerator::new(space()).generate(20, &mut rng).unwrap());
        }
        assert!(art_total > random_total);
    }
}
