use serde::{Deserialize, Serialize};

use crate::failure::Decision;
use crate::workflow::{TaskState, Workflow};

/// Contains metrics collected from a simulation run.
#[derive(Serialize, Deserialize, Clone, Default, Debug)]
pub struct RunStats {
    /// Name of the reclustering algorithm.
    pub reclustering: String,
    /// Workflow makespan, calculated as the last event time.
    pub makespan: f64,
    /// Number of jobs created by clustering and reclustering.
    pub jobs_created: usize,
    /// Number of job executions.
    pub jobs_dispatched: usize,
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,
    /// Number of failed jobs whose tasks were repackaged by reclustering.
    pub jobs_reclustered: usize,
    /// Average number of tasks in a dispatched job.
    pub mean_job_size: f64,
    /// Number of task executions including the failed ones.
    pub task_attempts: u64,
    pub completed_tasks: usize,
    /// Tasks which exceeded the attempt limit.
    pub abandoned_tasks: usize,
    /// Tasks which were not executed, e.g. because they depend on abandoned tasks.
    pub unfinished_tasks: usize,
    /// Total execution time of all job attempts.
    pub total_execution_time: f64,
    /// Execution time lost in failed attempts.
    pub wasted_time: f64,
    /// Total delay of all overhead phases.
    pub total_overhead: f64,
}

impl RunStats {
    pub fn new(reclustering: &str) -> Self {
        Self {
            reclustering: reclustering.to_string(),
            ..Default::default()
        }
    }

    pub fn add_job_created(&mut self) {
        self.jobs_created += 1;
    }

    pub fn set_job_dispatch(&mut self, task_count: usize) {
        self.jobs_dispatched += 1;
        self.task_attempts += task_count as u64;
    }

    pub fn set_job_return(&mut self, decision: &Decision, overhead: f64, time: f64) {
        self.total_execution_time += decision.elapsed;
        self.total_overhead += overhead;
        if decision.is_failed() {
            self.jobs_failed += 1;
            self.wasted_time += decision.elapsed;
        } else {
            self.jobs_succeeded += 1;
        }
        self.makespan = self.makespan.max(time);
    }

    pub fn add_job_reclustered(&mut self) {
        self.jobs_reclustered += 1;
    }

    /// Average overhead paid by a returned job.
    pub fn mean_job_overhead(&self) -> f64 {
        let returned = self.jobs_succeeded + self.jobs_failed;
        if returned == 0 {
            0.
        } else {
            self.total_overhead / returned as f64
        }
    }

    pub fn finalize(&mut self, time: f64, workflow: &Workflow) {
        self.makespan = self.makespan.max(time);
        self.mean_job_size = if self.jobs_dispatched > 0 {
            self.task_attempts as f64 / self.jobs_dispatched as f64
        } else {
            0.
        };
        self.completed_tasks = workflow.completed_task_count();
        self.abandoned_tasks = workflow
            .get_tasks()
            .iter()
            .filter(|t| t.state == TaskState::Abandoned)
            .count();
        self.unfinished_tasks = workflow.len() - self.completed_tasks - self.abandoned_tasks;
    }
}
