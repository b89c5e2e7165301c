//! Result documents: mutant -> sample size -> per-run values, in insertion order.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::SelectionError;

/// Sample size (as a string key) -> one value per external run.
pub type SizeSeries = IndexMap<String, Vec<f64>>;

/// Mutant -> sample size -> values.
pub type ResultDocument = IndexMap<String, SizeSeries>;

/// Mutant -> error message.
pub type ErrorDocument = IndexMap<String, String>;

/// Everything one (subject, phase, strategy) run persists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunResults {
    pub p_measures: ResultDocument,
    /// Milliseconds per external run
    pub timings: ResultDocument,
    /// Mutant -> error message, for mutants that did not complete
    pub errors: ErrorDocument,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    PMeasure,
    Timing,
    Errors,
}

impl DocumentKind {
    fn prefix(self) -> &'static str {
        match self {
            DocumentKind::PMeasure => "P-measure",
            DocumentKind::Timing => "Timing",
            DocumentKind::Errors => "Errors",
        }
    }
}

/// `<dir>/<Kind>_<strategy>.json`
pub fn document_path(dir: &Path, kind: DocumentKind, strategy: &str) -> PathBuf {
    dir.join(format!("{}_{}.json", kind.prefix(), strategy))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), SelectionError> {
    let contents = serde_json::to_string_pretty(value)?;
    std::fs::write(path, contents)?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, SelectionError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Load only the P-measure document of a strategy.
pub fn load_p_measures(dir: &Path, strategy: &str) -> Result<ResultDocument, SelectionError> {
    read_json(&document_path(dir, DocumentKind::PMeasure, strategy))
}

/// Mutant -> error message; empty when the run had no failures.
pub fn load_errors(dir: &Path, strategy: &str) -> Result<ErrorDocument, SelectionError> {
    let path = document_path(dir, DocumentKind::Errors, strategy);
    if path.exists() {
        read_json(&path)
    } else {
        Ok(ErrorDocument::new())
    }
}

impl RunResults {
    /// Write all documents; the error document is written only when non-empty.
    pub fn save(&self, dir: &Path, strategy: &str) -> Result<(), SelectionError> {
        std::fs::create_dir_all(dir)?;
        write_json(
            &document_path(dir, DocumentKind::PMeasure, strategy),
            &self.p_measures,
        )?;
        write_json(
            &document_path(dir, DocumentKind::Timing, strategy),
            &self.timings,
        )?;
        let errors = document_path(dir, DocumentKind::Errors, strategy);
        if !self.errors.is_empty() {
            write_json(&errors, &self.errors)?;
        } else if errors.exists() {
            std::fs::remove_file(&errors)?;
        }
        Ok(())
    }

    pub fn load(dir: &Path, strategy: &str) -> Result<Self, SelectionError> {
        Ok(Self {
            p_measures: load_p_measures(dir, strategy)?,
            timings: read_json(&document_path(dir, DocumentKind::Timing, strategy))?,
            errors: load_errors(dir, strategy)?,
        })
    }

    /// Per-size mean / min / max over every run of the mutants that completed.
    pub fn summary(&self) -> Vec<SizeSummary> {
        let mut sizes: IndexMap<&str, Vec<f64>> = IndexMap::new();
        for (mutant, series) in &self.p_measures {
            if self.errors.contains_key(mutant) {
                continue;
            }
            for (size, values) in series {
                sizes.entry(size.as_str()).or_default().extend(values);
            }
        }
        sizes
            .iter()
            .filter(|(_, values)| !values.is_empty())
            .map(|(size, values)| SizeSummary {
                size: size.to_string(),
                mean: values.iter().sum::<f64>() / values.len() as f64,
                min: values.iter().copied().fold(f64::INFINITY, f64::min),
                max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SizeSummary {
    pub size: String,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}
