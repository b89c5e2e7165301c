//! Selection strategies for metamorphic test groups and their P-measure
//! evaluation against mutants.

pub mod config;
pub mod domain;
pub mod error;
pub mod evaluation;
pub mod generation;
pub mod model;
pub mod mutant_analysis;
pub mod relation;
pub mod stats;
pub mod subject;
