//! Synthetic overhead delays.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::distribution::{derive_seed, DistributionConfig, DistributionGenerator};
use crate::error::{Error, Result};

/// Overhead phases surrounding a job execution.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OverheadPhase {
    /// Delay of merging tasks into a job, paid once when the job is created.
    Clustering,
    /// Delay of the workflow engine releasing a job.
    Engine,
    /// Delay of a job waiting in the remote queue.
    Queue,
    /// Delay of the postscript run after a job execution.
    Postscript,
}

impl OverheadPhase {
    pub const ALL: [OverheadPhase; 4] = [
        OverheadPhase::Clustering,
        OverheadPhase::Engine,
        OverheadPhase::Queue,
        OverheadPhase::Postscript,
    ];

    fn stream(&self) -> u64 {
        match self {
            OverheadPhase::Clustering => 1,
            OverheadPhase::Engine => 2,
            OverheadPhase::Queue => 3,
            OverheadPhase::Postscript => 4,
        }
    }
}

/// Overhead configuration of a single phase.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PhaseOverheadParams {
    /// Delay used for levels without a distribution (falls back to the global fixed overhead).
    #[serde(default)]
    pub fixed: Option<f64>,
    /// Per-level delay distributions.
    #[serde(default)]
    pub levels: BTreeMap<usize, DistributionConfig>,
}

/// Overhead configuration.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct OverheadParams {
    /// Delay applied to every phase without more specific settings.
    #[serde(default)]
    pub fixed: f64,
    #[serde(default)]
    pub clustering: PhaseOverheadParams,
    #[serde(default)]
    pub engine: PhaseOverheadParams,
    #[serde(default)]
    pub queue: PhaseOverheadParams,
    #[serde(default)]
    pub postscript: PhaseOverheadParams,
}

impl OverheadParams {
    pub fn phase(&self, phase: OverheadPhase) -> &PhaseOverheadParams {
        match phase {
            OverheadPhase::Clustering => &self.clustering,
            OverheadPhase::Engine => &self.engine,
            OverheadPhase::Queue => &self.queue,
            OverheadPhase::Postscript => &self.postscript,
        }
    }

    pub fn phase_mut(&mut self, phase: OverheadPhase) -> &mut PhaseOverheadParams {
        match phase {
            OverheadPhase::Clustering => &mut self.clustering,
            OverheadPhase::Engine => &mut self.engine,
            OverheadPhase::Queue => &mut self.queue,
            OverheadPhase::Postscript => &mut self.postscript,
        }
    }

    /// Registers delay distribution for the given phase and level.
    pub fn with_level_delay(mut self, phase: OverheadPhase, level: usize, config: DistributionConfig) -> Self {
        self.phase_mut(phase).levels.insert(level, config);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.fixed >= 0.) {
            return Err(Error::configuration(format!(
                "fixed overhead must be non-negative, got {}",
                self.fixed
            )));
        }
        for phase in OverheadPhase::ALL {
            let params = self.phase(phase);
            if let Some(fixed) = params.fixed {
                if !(fixed >= 0.) {
                    return Err(Error::configuration(format!(
                        "fixed {:?} overhead must be non-negative, got {}",
                        phase, fixed
                    )));
                }
            }
            for config in params.levels.values() {
                config.validate()?;
            }
        }
        Ok(())
    }
}

/// Samples overhead delays for jobs of a given level.
pub struct OverheadModel {
    fixed: BTreeMap<OverheadPhase, f64>,
    generators: BTreeMap<(OverheadPhase, usize), DistributionGenerator>,
}

impl OverheadModel {
    pub fn new(params: &OverheadParams, seed: u64) -> Result<Self> {
        params.validate()?;
        let mut fixed = BTreeMap::new();
        let mut generators = BTreeMap::new();
        for phase in OverheadPhase::ALL {
            let phase_params = params.phase(phase);
            fixed.insert(phase, phase_params.fixed.unwrap_or(params.fixed));
            for (&level, config) in phase_params.levels.iter() {
                let generator = DistributionGenerator::new(config, derive_seed(seed, phase.stream(), 0, level))?;
                generators.insert((phase, level), generator);
            }
        }
        Ok(Self { fixed, generators })
    }

    /// Returns a freshly sampled delay of the given phase for a job at the given level.
    pub fn delay_for(&mut self, phase: OverheadPhase, level: usize) -> f64 {
        match self.generators.get_mut(&(phase, level)) {
            Some(generator) => generator.sample(),
            None => self.fixed.get(&phase).copied().unwrap_or(0.),
        }
    }

    pub fn reset(&mut self) {
        for generator in self.generators.values_mut() {
            generator.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_params_give_zero_delays() {
        let mut model = OverheadModel::new(&OverheadParams::default(), 1).unwrap();
        for phase in OverheadPhase::ALL {
            assert_eq!(model.delay_for(phase, 0), 0.);
            assert_eq!(model.delay_for(phase, 5), 0.);
        }
    }

    #[test]
    fn fixed_fallbacks() {
        let mut params = OverheadParams {
            fixed: 2.,
            ..Default::default()
        };
        params.queue.fixed = Some(7.);
        let mut model = OverheadModel::new(&params, 1).unwrap();
        assert_eq!(model.delay_for(OverheadPhase::Engine, 3), 2.);
        assert_eq!(model.delay_for(OverheadPhase::Queue, 3), 7.);
    }

    #[test]
    fn level_generators_are_sampled_independently() {
        let params = OverheadParams::default().with_level_delay(
            OverheadPhase::Queue,
            1,
            DistributionConfig::gamma(2., 50.),
        );
        let mut model = OverheadModel::new(&params, 5).unwrap();
        let a = model.delay_for(OverheadPhase::Queue, 1);
        let b = model.delay_for(OverheadPhase::Queue, 1);
        assert_ne!(a, b);
        assert_eq!(model.delay_for(OverheadPhase::Queue, 0), 0.);

        model.reset();
        assert_eq!(model.delay_for(OverheadPhase::Queue, 1), a);
        assert_eq!(model.delay_for(OverheadPhase::Queue, 1), b);
    }

    #[test]
    fn invalid_distribution_is_rejected() {
        let params = OverheadParams::default().with_level_delay(
            OverheadPhase::Engine,
            0,
            DistributionConfig::weibull(-1., 1.),
        );
        assert!(OverheadModel::new(&params, 0).is_err());
    }
}
