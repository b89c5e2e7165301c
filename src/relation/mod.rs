//! Metamorphic relations and the id-keyed registry a subject builds them through.

use rand::RngCore;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{RelationError, SelectionError};
use crate::model::{InputSpace, TestCase};

/// A checkable property linking a source input/output to follow-up inputs/outputs.
pub trait MetamorphicRelation: Send + Sync {
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    /// Derive follow-up cases from a source case.
    fn generate_followups(
        &self,
        source: &TestCase,
        space: &InputSpace,
        rng: &mut dyn RngCore,
    ) -> Result<Vec<TestCase>, RelationError>;

    /// True iff the relation holds for the observed outputs.
    fn verify(
        &self,
        source: &TestCase,
        followup: &TestCase,
        source_out: f64,
        followup_out: f64,
    ) -> bool;

    /// Whether follow-ups of this case stay inside `space`.
    fn is_applicable(&self, case: &TestCase, space: &InputSpace) -> bool;
}

/// Builds a relation producing `multiplicity` follow-ups per source.
pub type RelationCtor = fn(multiplicity: u32) -> Box<dyn MetamorphicRelation>;

struct Entry {
    relation: Arc<dyn MetamorphicRelation>,
    weight: u32,
}

/// The relations enabled for one run, ordered by id.
pub struct RelationRegistry {
    entries: Vec<Entry>,
}

impl RelationRegistry {
    /// Instantiate every relation named in `weights` from the subject's table.
    pub fn build(
        table: &[(&str, RelationCtor)],
        weights: &BTreeMap<String, u32>,
    ) -> Result<Self, SelectionError> {
        if weights.is_empty() {
            return Err(SelectionError::config("no relations enabled"));
        }
        let mut entries = Vec::with_capacity(weights.len());
        for (id, &weight) in weights {
            let ctor = table
                .iter()
                .find(|(name, _)| name == id)
                .map(|(_, ctor)| *ctor)
                .ok_or_else(|| SelectionError::config(format!("unknown relation '{}'", id)))?;
            entries.push(Entry {
                relation: Arc::from(ctor(weight)),
                weight,
            });
        }
        Ok(Self { entries })
    }

    pub fn get(&self, id: &str) -> Option<&dyn MetamorphicRelation> {
        self.entries
            .iter()
            .find(|e| e.relation.id() == id)
            .map(|e| e.relation.as_ref())
    }

    pub fn weight(&self, id: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.relation.id() == id)
            .map(|e| e.weight)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.relation.id())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn MetamorphicRelation> {
        self.entries.iter().map(|e| e.relation.as_ref())
    }

    /// Relations whose follow-ups of `case` stay inside `space`.
    pub fn applicable(
        &self,
        case: &TestCase,
        space: &InputSpace,
    ) -> Vec<&dyn MetamorphicRelation> {
        self.iter().filter(|r| r.is_applicable(case, space)).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
