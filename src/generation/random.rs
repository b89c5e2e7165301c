//! Uniform random selection, the baseline every other strategy is measured against.

use rand::seq::index;
use rand::{Rng, RngCore};

use super::{GroupSampler, SourceGenerator};
use crate::domain::CandidateDomain;
use crate::error::SelectionError;
use crate::model::{GroupRef, InputSpace, TestCase};

/// Uniform values over the whole input range.
pub struct RandomSourceGenerator {
    space: InputSpace,
}

impl RandomSourceGenerator {
    pub fn new(space: InputSpace) -> Self {
        Self { space }
    }
}

impl SourceGenerator for RandomSourceGenerator {
    fn generate(
        &mut self,
        count: usize,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<TestCase>, SelectionError> {
        let range = self.space.range;
        Ok((0..count)
            .map(|_| self.space.case(rng.gen_range(range.min..=range.max)))
            .collect())
    }
}

/// Distinct groups drawn uniformly without replacement.
pub struct RandomGroupSampler;

impl GroupSampler for RandomGroupSampler {
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
        Ok(index::sample(rng, domain.len(), count)
            .into_iter()
            .map(|i| domain.groups()[i].clone())
            .collect())
    }
}
