use log::debug;

use crate::failure::FailureRecord;
use crate::job::Job;
use crate::reclustering::{FailedJob, Reclustering, ReclusteringContext};

/// Selective reclustering.
///
/// Splits the remaining tasks of the failed job into `split_factor` smaller jobs, so repeated failures
/// of the same tasks quickly approach singleton jobs. Other jobs are not affected.
pub struct SelectiveReclustering {
    split_factor: usize,
}

impl SelectiveReclustering {
    pub fn new(split_factor: usize) -> Self {
        Self {
            split_factor: split_factor.max(2),
        }
    }
}

impl Reclustering for SelectiveReclustering {
    fn on_job_failed(&mut self, failed: &FailedJob, _record: &FailureRecord, ctx: &mut ReclusteringContext) -> Vec<Job> {
        let tasks = ctx.eligible_tasks(failed);
        if tasks.is_empty() {
            return Vec::new();
        }
        let size = (tasks.len() + self.split_factor - 1) / self.split_factor;
        debug!(
            "SR: splitting {} tasks of job {} into jobs of size {}",
            tasks.len(),
            failed.job.id,
            size
        );
        ctx.repackage(failed, &tasks, size)
    }

    fn name(&self) -> &'static str {
        "SR"
    }
}
