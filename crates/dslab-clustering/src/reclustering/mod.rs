//! Reclustering of tasks after job failures.

pub mod dynamic;
pub mod dynamic_clustering;
pub mod noop;
pub mod selective;

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::clustering::ClusteringPolicy;
use crate::error::{Error, Result};
use crate::failure::{Decision, FailureRecord};
use crate::job::Job;
use crate::workflow::{TaskState, Workflow};

pub use dynamic::DynamicReclustering;
pub use dynamic_clustering::DynamicClustering;
pub use noop::NoopReclustering;
pub use selective::SelectiveReclustering;

/// Reclustering algorithm.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReclusteringAlgorithm {
    /// Failures do not change clustering.
    #[default]
    Noop,
    /// Selective reclustering: splits the failed job only.
    Sr,
    /// Dynamic reclustering: adapts job size of subsequent levels to the observed failure rate.
    Dr,
    /// Dynamic clustering: picks job size for the next level with an overhead/retry cost model.
    Dc,
}

impl FromStr for ReclusteringAlgorithm {
    type Err = Error;

    fn from_str(input: &str) -> Result<Self> {
        match input.to_lowercase().as_str() {
            "noop" => Ok(ReclusteringAlgorithm::Noop),
            "sr" => Ok(ReclusteringAlgorithm::Sr),
            "dr" => Ok(ReclusteringAlgorithm::Dr),
            "dc" => Ok(ReclusteringAlgorithm::Dc),
            _ => Err(Error::configuration(format!("unknown reclustering algorithm {}", input))),
        }
    }
}

fn default_split_factor() -> usize {
    2
}

fn default_target_success() -> f64 {
    0.5
}

/// Reclustering configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ReclusteringParams {
    #[serde(default)]
    pub algorithm: ReclusteringAlgorithm,
    /// Number of jobs the failed job is split into by selective reclustering.
    #[serde(default = "default_split_factor")]
    pub split_factor: usize,
    /// Minimum success probability of a job targeted by dynamic reclustering.
    #[serde(default = "default_target_success")]
    pub target_success: f64,
}

impl Default for ReclusteringParams {
    fn default() -> Self {
        Self {
            algorithm: ReclusteringAlgorithm::default(),
            split_factor: default_split_factor(),
            target_success: default_target_success(),
        }
    }
}

impl ReclusteringParams {
    pub fn new(algorithm: ReclusteringAlgorithm) -> Self {
        Self {
            algorithm,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.split_factor < 2 {
            return Err(Error::configuration(format!(
                "split factor must be at least 2, got {}",
                self.split_factor
            )));
        }
        if !(self.target_success > 0. && self.target_success < 1.) {
            return Err(Error::configuration(format!(
                "target success probability must be in (0, 1), got {}",
                self.target_success
            )));
        }
        Ok(())
    }
}

/// Failed job execution passed to reclustering.
pub struct FailedJob<'a> {
    pub job: &'a Job,
    pub vm: usize,
    pub decision: &'a Decision,
}

/// State available to reclustering algorithms.
pub struct ReclusteringContext<'a> {
    pub workflow: &'a Workflow,
    pub clustering: &'a mut ClusteringPolicy,
    /// Lowest level which is not clustered yet.
    pub next_level: Option<usize>,
    /// Mean overhead paid per job so far.
    pub mean_overhead: f64,
    /// Speed of VMs executing the jobs.
    pub vm_speed: f64,
}

impl ReclusteringContext<'_> {
    /// Returns the tasks of the failed job which may be regrouped.
    ///
    /// Completed and abandoned tasks are never regrouped.
    pub fn eligible_tasks(&self, failed: &FailedJob) -> Vec<usize> {
        failed
            .decision
            .unexecuted
            .iter()
            .copied()
            .filter(|&t| !matches!(self.workflow.get_task(t).state, TaskState::Done | TaskState::Abandoned))
            .collect()
    }

    /// Mean execution time of the given tasks.
    pub fn mean_runtime(&self, tasks: &[usize]) -> f64 {
        if tasks.is_empty() {
            return 0.;
        }
        tasks.iter().map(|&t| self.workflow.get_task(t).runtime).sum::<f64>() / (tasks.len() as f64 * self.vm_speed)
    }

    /// Creates replacement jobs of at most `size` tasks for the failed job.
    pub fn repackage(&mut self, failed: &FailedJob, tasks: &[usize], size: usize) -> Vec<Job> {
        let mut jobs = self.clustering.repackage(tasks, size, self.workflow);
        for job in jobs.iter_mut() {
            job.reclustered_from = Some(failed.job.id);
        }
        jobs
    }
}

/// Algorithm invoked when a job fails.
///
/// Returns replacement jobs for the failed job tasks. An empty result means that the failed job
/// stays failed and its tasks are resubmitted individually.
pub trait Reclustering {
    fn on_job_failed(&mut self, failed: &FailedJob, record: &FailureRecord, ctx: &mut ReclusteringContext) -> Vec<Job>;

    fn name(&self) -> &'static str;
}

/// Creates reclustering algorithm from config.
pub fn resolve_reclustering(params: &ReclusteringParams) -> Box<dyn Reclustering> {
    match params.algorithm {
        ReclusteringAlgorithm::Noop => Box::new(NoopReclustering::new()),
        ReclusteringAlgorithm::Sr => Box::new(SelectiveReclustering::new(params.split_factor)),
        ReclusteringAlgorithm::Dr => Box::new(DynamicReclustering::new(params.target_success)),
        ReclusteringAlgorithm::Dc => Box::new(DynamicClustering::new()),
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use crate::clustering::{ClusteringParams, ClusteringPolicy};
    use crate::failure::{Decision, Outcome};
    use crate::job::Job;
    use crate::workflow::Workflow;

    pub fn workflow(levels: &[usize], runtime: f64) -> Workflow {
        let mut wf = Workflow::new();
        let mut previous: Vec<usize> = Vec::new();
        for (level, &count) in levels.iter().enumerate() {
            let current: Vec<usize> = (0..count)
                .map(|i| wf.add_task(&format!("l{}-{}", level, i), runtime))
                .collect();
            for &child in current.iter() {
                for &parent in previous.iter() {
                    wf.add_dependency(parent, child).unwrap();
                }
            }
            previous = current;
        }
        wf
    }

    pub fn policy(params: ClusteringParams) -> ClusteringPolicy {
        ClusteringPolicy::new(params).unwrap()
    }

    pub fn failure(job: &Job, completed: usize) -> Decision {
        Decision {
            outcome: Outcome::Failed,
            time_to_failure: Some(1.),
            completed: job.tasks[..completed].to_vec(),
            unexecuted: job.tasks[completed..].to_vec(),
            elapsed: 1.,
        }
    }
}
