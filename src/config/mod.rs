use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::SelectionError;

/// Configuration file contents; every section is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings
    #[serde(default)]
    pub general: GeneralConfig,

    /// Trial loop and sampler settings
    #[serde(default)]
    pub experiment: ExperimentConfig,

    /// Per-subject overrides of the built-in partition / relation tables
    #[serde(default)]
    pub subjects: BTreeMap<String, SubjectConfig>,

    /// Data directory (where raw result documents are written)
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Settings of the P-measure experiment and of the samplers it drives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperimentConfig {
    /// Trials per P-measure estimate
    #[serde(default = "default_internal_iteration")]
    pub internal_iteration: usize,

    /// P-measure estimates per (mutant, sample size)
    #[serde(default = "default_external_iteration")]
    pub external_iteration: usize,

    /// Inclusive range of sample sizes. Defaults to three test cases per partition.
    #[serde(default)]
    pub sample_size_range: Option<SizeRange>,

    /// Base seed; a fresh one is drawn when absent
    #[serde(default)]
    pub seed: Option<u64>,

    /// Worker count cap (defaults to the available parallelism)
    #[serde(default)]
    pub threads: Option<usize>,

    /// Wall-clock budget of a single program call, in milliseconds
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Random candidates per ART step
    #[serde(default = "default_art_candidates")]
    pub art_candidates: usize,

    /// Bins sampled per MT-ART step
    #[serde(default = "default_mtart_candidates")]
    pub mtart_candidates: usize,

    /// Number of recent MT-ART selections used for diversity scoring
    #[serde(default = "default_mtart_window")]
    pub mtart_window: usize,

    /// Minimum expected members of every (partition, relation) cell of the domain
    #[serde(default = "default_min_samples_per_cell")]
    pub min_samples_per_cell: usize,

    /// Multiplier applied on top of the minimal domain size
    #[serde(default = "default_safety_factor")]
    pub safety_factor: f64,
}

/// Inclusive integer range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeRange {
    pub min: usize,
    pub max: usize,
}

/// Numeric interval, half-open `[min, max)` when used as a partition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f64,
    pub max: f64,
}

/// Input space and relation weights of one subject program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectConfig {
    /// Valid input values
    pub input_range: ValueRange,

    /// Ordered partition table
    pub partitions: Vec<ValueRange>,

    /// Expected share of each partition (same length as `partitions`)
    pub partition_ratio: Vec<f64>,

    /// Relation id -> multiplicity (number of follow-ups it contributes)
    pub relation_weights: BTreeMap<String, u32>,

    /// Floor and ceiling of the candidate domain size
    #[serde(default = "default_domain_size_bounds")]
    pub domain_size_bounds: SizeRange,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_internal_iteration() -> usize {
    1000
}

fn default_external_iteration() -> usize {
    50
}

fn default_call_timeout_ms() -> u64 {
    3000
}

fn default_art_candidates() -> usize {
    10
}

fn default_mtart_candidates() -> usize {
    5
}

fn default_mtart_window() -> usize {
    5
}

fn default_min_samples_per_cell() -> usize {
    5
}

fn default_safety_factor() -> f64 {
    1.5
}

pub fn default_domain_size_bounds() -> SizeRange {
    SizeRange {
        min: 1000,
        max: 10000,
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            internal_iteration: default_internal_iteration(),
            external_iteration: default_external_iteration(),
            sample_size_range: None,
            seed: None,
            threads: None,
            call_timeout_ms: default_call_timeout_ms(),
            art_candidates: default_art_candidates(),
            mtart_candidates: default_mtart_candidates(),
            mtart_window: default_mtart_window(),
            min_samples_per_cell: default_min_samples_per_cell(),
            safety_factor: default_safety_factor(),
        }
    }
}

impl SizeRange {
    pub fn sizes(&self) -> std::ops::RangeInclusive<usize> {
        self.min..=self.max
    }
}

impl ValueRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

impl ExperimentConfig {
    /// Sample sizes to evaluate for a subject with `partitions` partitions.
    pub fn sample_sizes(&self, partitions: usize) -> SizeRange {
        self.sample_size_range.unwrap_or(SizeRange {
            min: partitions * 3,
            max: partitions * 3,
        })
    }

    pub fn validate(&self) -> Result<(), SelectionError> {
        if self.internal_iteration == 0 || self.external_iteration == 0 {
            return Err(SelectionError::config(
                "internal_iteration and external_iteration must be positive",
            ));
        }
        if let Some(range) = self.sample_size_range {
            if range.min == 0 || range.min > range.max {
                return Err(SelectionError::config(format!(
                    "invalid sample_size_range [{}, {}]",
                    range.min, range.max
                )));
            }
        }
        if self.art_candidates == 0 || self.mtart_candidates == 0 || self.mtart_window == 0 {
            return Err(SelectionError::config(
                "art_candidates, mtart_candidates and mtart_window must be positive",
            ));
        }
        if !(self.safety_factor.is_finite() && self.safety_factor > 0.0) {
            return Err(SelectionError::config("safety_factor must be positive"));
        }
        Ok(())
    }
}

impl SubjectConfig {
    /// Check the partition table and weights; fatal at startup.
    pub fn validate(&self) -> Result<(), SelectionError> {
        let range = self.input_range;
        if !(range.min.is_finite() && range.max.is_finite() && range.min < range.max) {
            return Err(SelectionError::config(format!(
                "invalid input_range [{}, {}]",
                range.min, range.max
            )));
        }
        if self.partitions.is_empty() {
            return Err(SelectionError::config("no partitions configured"));
        }
        for (i, part) in self.partitions.iter().enumerate() {
            if !(part.min.is_finite() && part.max.is_finite() && part.min < part.max) {
                return Err(SelectionError::config(format!(
                    "partition {} has invalid bounds [{}, {})",
                    i + 1,
                    part.min,
                    part.max
                )));
            }
            if i > 0 && part.min < self.partitions[i - 1].min {
                return Err(SelectionError::config(format!(
                    "partition {} is not ordered after partition {}",
                    i + 1,
                    i
                )));
            }
        }
        if self.partition_ratio.len() != self.partitions.len() {
            return Err(SelectionError::config(format!(
                "partition_ratio has {} entries for {} partitions",
                self.partition_ratio.len(),
                self.partitions.len()
            )));
        }
        if self
            .partition_ratio
            .iter()
            .any(|r| !(r.is_finite() && *r > 0.0))
        {
            return Err(SelectionError::config(
                "partition_ratio entries must be positive",
            ));
        }
        if self.relation_weights.is_empty() {
            return Err(SelectionError::config("no relation weights configured"));
        }
        let bounds = self.domain_size_bounds;
        if bounds.min == 0 || bounds.min > bounds.max {
            return Err(SelectionError::config(format!(
                "invalid domain_size_bounds [{}, {}]",
                bounds.min, bounds.max
            )));
        }
        Ok(())
    }

    /// Number of (partition, relation) cells.
    pub fn cell_count(&self) -> usize {
        self.partitions.len() * self.relation_weights.len()
    }
}

impl Config {
    /// Read `path` (or the default location). A missing file yields the built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path.map(PathBuf::from).or_else(Self::default_config_path) else {
            return Ok(Config::default());
        };
        if !path.exists() {
            return Ok(Config::default());
        }

        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config from {:?}", path))?;
        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config from {:?}", path))?;
        Ok(config)
    }

    /// Write the configuration as TOML, creating parent directories as needed.
    pub fn save(&self, path: Option<&Path>) -> Result<PathBuf> {
        let path = path
            .map(PathBuf::from)
            .or_else(Self::default_config_path)
            .context("No config path available")?;

        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory {:?}", dir))?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&path, contents)
            .with_context(|| format!("Failed to write config to {:?}", path))?;
        Ok(path)
    }

    /// `<config dir>/psalm/config.toml`
    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "psalm", "psalm").map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Configured data directory, else the platform data dir, else `.psalm`
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(|| {
            ProjectDirs::from("com", "psalm", "psalm")
                .map(|dirs| dirs.data_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".psalm"))
        })
    }

    /// Directory holding the result documents of one subject and phase
    pub fn results_dir(&self, subject: &str, phase: &str) -> PathBuf {
        self.data_dir()
            .join("raw_results")
            .join(subject)
            .join(phase)
    }

    /// Subject configuration: the user override if present, else the built-in one.
    pub fn subject_config(&self, name: &str, builtin: SubjectConfig) -> SubjectConfig {
        self.subjects.get(name).cloned().unwrap_or(builtin)
    }
}
