//! Subject programs under test: the original program, its mutants, relations
//! and the built-in partition tables.

pub mod geometric_sum;
pub mod income_tax;
pub mod mortgage_rate;

use crate::config::SubjectConfig;
use crate::error::{ExecutionError, SelectionError};
use crate::model::InputSpace;
use crate::relation::{RelationCtor, RelationRegistry};

/// A program under test maps one input to one output or fails.
pub type ProgramFn = fn(f64) -> Result<f64, ExecutionError>;

/// A deliberately faulty variant of a subject program.
#[derive(Debug, Clone, Copy)]
pub struct Mutant {
    pub name: &'static str,
    pub program: ProgramFn,
}

pub struct Subject {
    pub name: &'static str,
    pub description: &'static str,
    pub program: ProgramFn,
    pub mutants: &'static [Mutant],
    pub relations: &'static [(&'static str, RelationCtor)],
    /// Decimal places inputs are rounded to
    pub precision: Option<u32>,
    pub default_config: fn() -> SubjectConfig,
}

static SUBJECTS: [&Subject; 3] = [
    &income_tax::SUBJECT,
    &mortgage_rate::SUBJECT,
    &geometric_sum::SUBJECT,
];

/// All built-in subjects.
pub fn all() -> impl Iterator<Item = &'static Subject> {
    SUBJECTS.iter().copied()
}

/// Look up a subject by name.
pub fn lookup(name: &str) -> Result<&'static Subject, SelectionError> {
    all().find(|s| s.name == name).ok_or_else(|| {
        let known: Vec<_> = all().map(|s| s.name).collect();
        SelectionError::config(format!(
            "unknown subject '{}' (known: {})",
            name,
            known.join(", ")
        ))
    })
}

impl Subject {
    pub fn input_space(&self, config: &SubjectConfig) -> InputSpace {
        InputSpace::from_config(config, self.precision)
    }

    pub fn relation_registry(
        &self,
        config: &SubjectConfig,
    ) -> Result<RelationRegistry, SelectionError> {
        RelationRegistry::build(self.relations, &config.relation_weights)
    }

    pub fn mutant(&self, name: &str) -> Option<&'static Mutant> {
        self.mutants.iter().find(|m| m.name == name)
    }
}

/// Relative-epsilon float comparison used by the relations.
pub(crate) const EPSILON: f64 = 1e-6;
