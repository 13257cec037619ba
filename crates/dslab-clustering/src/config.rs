//! Simulation configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::clustering::ClusteringParams;
use crate::error::{Error, Result};
use crate::failure::FailureParams;
use crate::overhead::OverheadParams;

/// Holds raw simulation config parsed from YAML file.
#[derive(Serialize, Deserialize)]
struct RawSimulationConfig {
    pub seed: Option<u64>,
    pub vm_count: Option<usize>,
    pub vm_speed: Option<f64>,
    pub max_attempts: Option<u32>,
    pub overhead: Option<OverheadParams>,
    pub clustering: Option<ClusteringParams>,
    pub failure: Option<FailureParams>,
}

/// Represents simulation configuration.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct SimulationConfig {
    /// Base seed, every random stream of the simulation is derived from it.
    pub seed: u64,
    /// Number of VMs executing jobs.
    pub vm_count: usize,
    /// Speed of every VM, task execution time is its runtime divided by the speed.
    pub vm_speed: f64,
    /// Maximum number of execution attempts per task, tasks exceeding it are abandoned.
    pub max_attempts: u32,
    pub overhead: OverheadParams,
    pub clustering: ClusteringParams,
    pub failure: FailureParams,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 123,
            vm_count: 1,
            vm_speed: 1.,
            max_attempts: 100,
            overhead: OverheadParams::default(),
            clustering: ClusteringParams::default(),
            failure: FailureParams::default(),
        }
    }
}

impl SimulationConfig {
    /// Creates simulation config by reading parameter values from YAML file
    /// (uses default values if some parameters are absent).
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let raw: RawSimulationConfig = serde_yaml::from_str(content)?;
        let default = Self::default();
        let config = Self {
            seed: raw.seed.unwrap_or(default.seed),
            vm_count: raw.vm_count.unwrap_or(default.vm_count),
            vm_speed: raw.vm_speed.unwrap_or(default.vm_speed),
            max_attempts: raw.max_attempts.unwrap_or(default.max_attempts),
            overhead: raw.overhead.unwrap_or_default(),
            clustering: raw.clustering.unwrap_or_default(),
            failure: raw.failure.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.vm_count == 0 {
            return Err(Error::configuration("at least one VM is required"));
        }
        if !(self.vm_speed > 0. && self.vm_speed.is_finite()) {
            return Err(Error::configuration(format!(
                "VM speed must be positive, got {}",
                self.vm_speed
            )));
        }
        if self.max_attempts == 0 {
            return Err(Error::configuration("max attempts must be positive"));
        }
        self.overhead.validate()?;
        self.clustering.validate()?;
        self.failure.validate()
    }
}
