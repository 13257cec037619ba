//! Failure injection and monitoring.

pub mod generator;
pub mod monitor;

use serde::{Deserialize, Serialize};

use crate::distribution::DistributionConfig;
use crate::error::{Error, Result};
use crate::reclustering::ReclusteringParams;

pub use generator::{Decision, FailureGenerator, FailureScope, Outcome};
pub use monitor::{FailureKey, FailureMonitor, FailureRecord, MonitorMode};

/// Failure distribution for a set of (VM, level) coordinates.
///
/// Missing `vm` or `level` means every VM or every level. When several entries cover the same coordinate,
/// the last one wins.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct FailureDistribution {
    #[serde(default)]
    pub vm: Option<usize>,
    #[serde(default)]
    pub level: Option<usize>,
    pub distribution: DistributionConfig,
}

/// Failure configuration.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct FailureParams {
    #[serde(default)]
    pub monitor: MonitorMode,
    #[serde(default)]
    pub scope: FailureScope,
    #[serde(default)]
    pub reclustering: ReclusteringParams,
    /// Time-to-failure distributions.
    #[serde(default)]
    pub generators: Vec<FailureDistribution>,
}

impl FailureParams {
    pub fn with_generator(mut self, vm: Option<usize>, level: Option<usize>, distribution: DistributionConfig) -> Self {
        self.generators.push(FailureDistribution {
            vm,
            level,
            distribution,
        });
        self
    }

    pub fn validate(&self) -> Result<()> {
        for entry in self.generators.iter() {
            entry.distribution.validate()?;
        }
        if self.scope == FailureScope::None && !self.generators.is_empty() {
            return Err(Error::configuration(format!(
                "{} failure generators are registered but failure scope is none, set scope to job or vm_job",
                self.generators.len()
            )));
        }
        self.reclustering.validate()
    }
}
