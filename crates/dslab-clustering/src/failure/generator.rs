//! Failure injection.

use std::collections::BTreeMap;
use std::sync::Mutex;

use log::trace;
use serde::{Deserialize, Serialize};

use crate::distribution::{derive_seed, DistributionGenerator};
use crate::error::Result;
use crate::failure::FailureParams;
use crate::job::Job;

const FAILURE_STREAM: u64 = 10;

/// Defines which tasks of a job are affected by a failure.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailureScope {
    /// Failures are not injected.
    #[default]
    None,
    /// A failure affects the job as a unit, none of its tasks is considered executed.
    Job,
    /// The VM fails at the sampled time: tasks finished before it are kept, the rest are lost.
    VmJob,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Success,
    Failed,
}

/// Result of a job execution attempt.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Decision {
    pub outcome: Outcome,
    /// Sampled time to failure, if a generator is registered for the coordinate.
    pub time_to_failure: Option<f64>,
    /// Member tasks completed during the attempt.
    pub completed: Vec<usize>,
    /// Member tasks that have to be executed again.
    pub unexecuted: Vec<usize>,
    /// Execution time consumed by the attempt.
    pub elapsed: f64,
}

impl Decision {
    fn success(job: &Job, time_to_failure: Option<f64>, window: f64) -> Self {
        Self {
            outcome: Outcome::Success,
            time_to_failure,
            completed: job.tasks.clone(),
            unexecuted: Vec::new(),
            elapsed: window,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.outcome == Outcome::Failed
    }
}

/// Decides outcomes of job executions using time-to-failure distributions registered per (VM, level).
///
/// Each coordinate owns a separate generator guarded by its own mutex, so concurrent decisions for
/// different coordinates do not interleave their random streams.
pub struct FailureGenerator {
    scope: FailureScope,
    generators: BTreeMap<(usize, usize), Mutex<DistributionGenerator>>,
}

impl FailureGenerator {
    /// Creates generator without any registered distributions.
    pub fn new(scope: FailureScope) -> Self {
        Self {
            scope,
            generators: BTreeMap::new(),
        }
    }

    /// Builds the (VM, level) table from config for the given number of VMs and levels.
    pub fn from_params(params: &FailureParams, vm_count: usize, level_count: usize, seed: u64) -> Result<Self> {
        let mut generator = Self::new(params.scope);
        for entry in params.generators.iter() {
            let vms = match entry.vm {
                Some(vm) => vm..vm + 1,
                None => 0..vm_count,
            };
            let levels = match entry.level {
                Some(level) => level..level + 1,
                None => 0..level_count,
            };
            for vm in vms {
                for level in levels.clone() {
                    let dist = DistributionGenerator::new(
                        &entry.distribution,
                        derive_seed(seed, FAILURE_STREAM, vm, level),
                    )?;
                    generator.register(vm, level, dist);
                }
            }
        }
        Ok(generator)
    }

    pub fn scope(&self) -> FailureScope {
        self.scope
    }

    /// Registers (or replaces) the time-to-failure distribution for the coordinate.
    pub fn register(&mut self, vm: usize, level: usize, generator: DistributionGenerator) {
        self.generators.insert((vm, level), Mutex::new(generator));
    }

    pub fn has_generator(&self, vm: usize, level: usize) -> bool {
        self.generators.contains_key(&(vm, level))
    }

    /// Decides the outcome of `job` executed on `vm`.
    ///
    /// `task_runtimes` are execution times of the job tasks on this VM in the job order.
    /// The job fails if the sampled time to failure is shorter than the total execution time.
    pub fn decide(&self, job: &Job, vm: usize, level: usize, task_runtimes: &[f64]) -> Decision {
        assert_eq!(
            job.tasks.len(),
            task_runtimes.len(),
            "Runtimes are not provided for all tasks of job {}",
            job.id
        );
        let window: f64 = task_runtimes.iter().sum();
        if self.scope == FailureScope::None {
            return Decision::success(job, None, window);
        }
        let time_to_failure = match self.generators.get(&(vm, level)) {
            Some(generator) => generator.lock().unwrap_or_else(|e| e.into_inner()).sample(),
            None => return Decision::success(job, None, window),
        };
        trace!(
            "job {} on vm {} at level {}: time to failure {:.3}, window {:.3}",
            job.id,
            vm,
            level,
            time_to_failure,
            window
        );
        if time_to_failure >= window {
            return Decision::success(job, Some(time_to_failure), window);
        }

        let mut completed = Vec::new();
        let mut unexecuted = Vec::new();
        match self.scope {
            FailureScope::Job => unexecuted.extend(job.tasks.iter().copied()),
            _ => {
                let mut finish = 0.;
                for (&task, &runtime) in job.tasks.iter().zip(task_runtimes.iter()) {
                    finish += runtime;
                    if finish <= time_to_failure && unexecuted.is_empty() {
                        completed.push(task);
                    } else {
                        unexecuted.push(task);
                    }
                }
            }
        }
        Decision {
            outcome: Outcome::Failed,
            time_to_failure: Some(time_to_failure),
            completed,
            unexecuted,
            elapsed: time_to_failure,
        }
    }

    /// Rewinds all distributions to the beginning of their sequences.
    pub fn reset(&mut self) {
        for generator in self.generators.values_mut() {
            generator.get_mut().unwrap_or_else(|e| e.into_inner()).reset();
        }
    }
}
