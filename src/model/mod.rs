//! Core data model: test cases, the partitioned input space and metamorphic groups.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::config::{SubjectConfig, ValueRange};

/// One input value with the partition it falls into (numbered from 1).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    pub value: f64,
    pub partition: u32,
}

/// Input range, ordered partition table and rounding of one subject.
#[derive(Debug, Clone, PartialEq)]
pub struct InputSpace {
    pub range: ValueRange,
    pub partitions: Vec<ValueRange>,
    /// Decimal places inputs are rounded to, if any
    pub precision: Option<u32>,
}

impl InputSpace {
    pub fn new(range: ValueRange, partitions: Vec<ValueRange>, precision: Option<u32>) -> Self {
        Self {
            range,
            partitions,
            precision,
        }
    }

    pub fn from_config(config: &SubjectConfig, precision: Option<u32>) -> Self {
        Self::new(config.input_range, config.partitions.clone(), precision)
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Partition of a value: the last partition whose lower bound is at or
    /// below it. Values under the first lower bound belong to partition 1.
    pub fn partition_of(&self, value: f64) -> u32 {
        self.partitions
            .iter()
            .rposition(|p| value >= p.min)
            .map_or(1, |i| i as u32 + 1)
    }

    pub fn round(&self, value: f64) -> f64 {
        match self.precision {
            Some(digits) => {
                let scale = 10f64.powi(digits as i32);
                (value * scale).round() / scale
            }
            None => value,
        }
    }

    /// Whether `value` lies inside the input range (bounds included).
    pub fn contains(&self, value: f64) -> bool {
        self.range.min <= value && value <= self.range.max
    }

    /// Build a test case, deriving its partition from the (rounded) value.
    pub fn case(&self, value: f64) -> TestCase {
        let value = self.round(value);
        TestCase {
            value,
            partition: self.partition_of(value),
        }
    }
}

/// A relation applied to one source, yielding one follow-up.
#[derive(Debug, Clone, PartialEq)]
pub struct MetamorphicGroup {
    pub relation: String,
    pub source: TestCase,
    pub followup: TestCase,
}

/// Shared handle to a group. Identity is the allocation, not the value.
pub type GroupRef = Arc<MetamorphicGroup>;

impl MetamorphicGroup {
    pub fn new(relation: impl Into<String>, source: TestCase, followup: TestCase) -> GroupRef {
        Arc::new(Self {
            relation: relation.into(),
            source,
            followup,
        })
    }
}

/// Which level test cases are generated at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Generate source cases, then derive one group per source
    Phase1,
    /// Sample groups from the candidate domain
    Phase2,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Phase1 => write!(f, "phase1"),
            Phase::Phase2 => write!(f, "phase2"),
        }
    }
}
