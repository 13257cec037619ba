//! Seeded random distribution generators.
//!
//! Generators are used both for synthetic overhead delays and for failure timing.
//! Each generator owns its random source, so the produced sequence depends only on the configured seed
//! and the number of samples drawn so far.

use std::str::FromStr;

use rand::distributions::Uniform;
use rand::prelude::*;
use rand_distr::{Exp, Gamma, LogNormal, Normal, Weibull};
use rand_pcg::Pcg64;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Supported distribution families.
///
/// Parameters are named and their meaning is family-specific:
///
/// | family        | parameters          | notes                                   |
/// |---------------|---------------------|-----------------------------------------|
/// | `fixed`       | `value`             |                                         |
/// | `uniform`     | `min`, `max`        | samples from `[min, max)`               |
/// | `exponential` | `scale`             | scale is the mean, i.e. `1 / rate`      |
/// | `normal`      | `mean`, `std_dev`   |                                         |
/// | `gamma`       | `shape`, `scale`    |                                         |
/// | `weibull`     | `scale`, `shape`    |                                         |
/// | `lognormal`   | `mean`, `std_dev`   | parameters of the underlying normal     |
///
/// For every family except `uniform` the optional `min` and `max` bound the produced samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DistributionFamily {
    Fixed,
    Uniform,
    Exponential,
    Normal,
    Gamma,
    Weibull,
    LogNormal,
}

impl FromStr for DistributionFamily {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        match input.to_lowercase().as_str() {
            "fixed" | "constant" => Ok(DistributionFamily::Fixed),
            "uniform" => Ok(DistributionFamily::Uniform),
            "exponential" | "exp" => Ok(DistributionFamily::Exponential),
            "normal" => Ok(DistributionFamily::Normal),
            "gamma" => Ok(DistributionFamily::Gamma),
            "weibull" => Ok(DistributionFamily::Weibull),
            "lognormal" | "log_normal" => Ok(DistributionFamily::LogNormal),
            _ => Err(Error::UnknownDistributionFamily(input.to_string())),
        }
    }
}

/// Distribution configuration as it appears in YAML configs.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DistributionConfig {
    pub family: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shape: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub std_dev: Option<f64>,
    /// Lower bound of produced samples.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    /// Upper bound of produced samples.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Overrides the seed derived from the simulation seed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl DistributionConfig {
    fn with_family(family: &str) -> Self {
        Self {
            family: family.to_string(),
            ..Default::default()
        }
    }

    pub fn fixed(value: f64) -> Self {
        Self {
            value: Some(value),
            ..Self::with_family("fixed")
        }
    }

    pub fn uniform(min: f64, max: f64) -> Self {
        Self::with_family("uniform").with_bounds(min, max)
    }

    pub fn exponential(scale: f64) -> Self {
        Self {
            scale: Some(scale),
            ..Self::with_family("exponential")
        }
    }

    pub fn normal(mean: f64, std_dev: f64) -> Self {
        Self {
            mean: Some(mean),
            std_dev: Some(std_dev),
            ..Self::with_family("normal")
        }
    }

    pub fn gamma(shape: f64, scale: f64) -> Self {
        Self {
            shape: Some(shape),
            scale: Some(scale),
            ..Self::with_family("gamma")
        }
    }

    pub fn weibull(scale: f64, shape: f64) -> Self {
        Self {
            scale: Some(scale),
            shape: Some(shape),
            ..Self::with_family("weibull")
        }
    }

    pub fn lognormal(mean: f64, std_dev: f64) -> Self {
        Self {
            mean: Some(mean),
            std_dev: Some(std_dev),
            ..Self::with_family("lognormal")
        }
    }

    pub fn with_bounds(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Checks that the config can be turned into a generator.
    pub fn validate(&self) -> Result<()> {
        Sampler::build(self).map(|_| ())
    }
}

#[derive(Clone, Debug)]
enum Sampler {
    Fixed(f64),
    Uniform(Uniform<f64>),
    Exponential(Exp<f64>),
    Normal(Normal<f64>),
    Gamma(Gamma<f64>),
    Weibull(Weibull<f64>),
    LogNormal(LogNormal<f64>),
}

fn require(config: &DistributionConfig, name: &str, value: Option<f64>) -> Result<f64> {
    match value {
        Some(value) if value.is_finite() => Ok(value),
        Some(value) => Err(Error::configuration(format!(
            "{} distribution has non-finite parameter {} = {}",
            config.family, name, value
        ))),
        None => Err(Error::configuration(format!(
            "{} distribution requires parameter {}",
            config.family, name
        ))),
    }
}

fn invalid<E: std::fmt::Debug>(config: &DistributionConfig, err: E) -> Error {
    Error::configuration(format!("invalid {} distribution parameters: {:?}", config.family, err))
}

impl Sampler {
    fn build(config: &DistributionConfig) -> Result<(DistributionFamily, Self)> {
        let family = config.family.parse::<DistributionFamily>()?;
        if let (Some(min), Some(max)) = (config.min, config.max) {
            if min > max {
                return Err(Error::configuration(format!(
                    "{} distribution has min bound {} greater than max bound {}",
                    config.family, min, max
                )));
            }
        }
        let sampler = match family {
            DistributionFamily::Fixed => Sampler::Fixed(require(config, "value", config.value)?),
            DistributionFamily::Uniform => {
                let min = require(config, "min", config.min)?;
                let max = require(config, "max", config.max)?;
                if min >= max {
                    return Err(invalid(config, "min must be less than max"));
                }
                Sampler::Uniform(Uniform::new(min, max))
            }
            DistributionFamily::Exponential => {
                let scale = require(config, "scale", config.scale)?;
                if scale <= 0. {
                    return Err(invalid(config, "scale must be positive"));
                }
                Sampler::Exponential(Exp::new(1. / scale).map_err(|e| invalid(config, e))?)
            }
            DistributionFamily::Normal => Sampler::Normal(
                Normal::new(
                    require(config, "mean", config.mean)?,
                    require(config, "std_dev", config.std_dev)?,
                )
                .map_err(|e| invalid(config, e))?,
            ),
            DistributionFamily::Gamma => Sampler::Gamma(
                Gamma::new(
                    require(config, "shape", config.shape)?,
                    require(config, "scale", config.scale)?,
                )
                .map_err(|e| invalid(config, e))?,
            ),
            DistributionFamily::Weibull => Sampler::Weibull(
                Weibull::new(
                    require(config, "scale", config.scale)?,
                    require(config, "shape", config.shape)?,
                )
                .map_err(|e| invalid(config, e))?,
            ),
            DistributionFamily::LogNormal => Sampler::LogNormal(
                LogNormal::new(
                    require(config, "mean", config.mean)?,
                    require(config, "std_dev", config.std_dev)?,
                )
                .map_err(|e| invalid(config, e))?,
            ),
        };
        Ok((family, sampler))
    }

    fn sample(&self, rng: &mut Pcg64) -> f64 {
        match self {
            Sampler::Fixed(value) => *value,
            Sampler::Uniform(dist) => dist.sample(rng),
            Sampler::Exponential(dist) => dist.sample(rng),
            Sampler::Normal(dist) => dist.sample(rng),
            Sampler::Gamma(dist) => dist.sample(rng),
            Sampler::Weibull(dist) => dist.sample(rng),
            Sampler::LogNormal(dist) => dist.sample(rng),
        }
    }
}

/// Derives a seed for an independent random stream identified by `stream` and a pair of coordinates.
pub fn derive_seed(base: u64, stream: u64, a: usize, b: usize) -> u64 {
    let mut rng = Pcg64::seed_from_u64(
        base ^ stream.rotate_left(48) ^ (a as u64).rotate_left(24) ^ (b as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15),
    );
    rng.next_u64()
}

/// Produces a restartable sequence of non-negative samples from a configured distribution.
#[derive(Clone, Debug)]
pub struct DistributionGenerator {
    config: DistributionConfig,
    family: DistributionFamily,
    sampler: Sampler,
    seed: u64,
    rng: Pcg64,
    cursor: u64,
}

impl DistributionGenerator {
    /// Creates generator from config. The seed stored in config (if any) takes precedence over `seed`.
    pub fn new(config: &DistributionConfig, seed: u64) -> Result<Self> {
        let (family, sampler) = Sampler::build(config)?;
        let seed = config.seed.unwrap_or(seed);
        Ok(Self {
            config: config.clone(),
            family,
            sampler,
            seed,
            rng: Pcg64::seed_from_u64(seed),
            cursor: 0,
        })
    }

    pub fn family(&self) -> DistributionFamily {
        self.family
    }

    pub fn config(&self) -> &DistributionConfig {
        &self.config
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of samples drawn since creation or the last reset.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Draws the next sample.
    pub fn sample(&mut self) -> f64 {
        self.cursor += 1;
        let mut value = self.sampler.sample(&mut self.rng);
        if self.family != DistributionFamily::Uniform {
            if let Some(min) = self.config.min {
                value = value.max(min);
            }
            if let Some(max) = self.config.max {
                value = value.min(max);
            }
        }
        value.max(0.)
    }

    /// Rewinds the generator to the beginning of its sequence.
    pub fn reset(&mut self) {
        self.rng = Pcg64::seed_from_u64(self.seed);
        self.cursor = 0;
    }

    /// Returns an endless iterator over the next samples.
    pub fn samples(&mut self) -> Samples<'_> {
        Samples { generator: self }
    }
}

/// Lazy iterator returned by [`DistributionGenerator::samples`].
pub struct Samples<'a> {
    generator: &'a mut DistributionGenerator,
}

impl Iterator for Samples<'_> {
    type Item = f64;

    fn next(&mut self) -> Option<f64> {
        Some(self.generator.sample())
    }
}
