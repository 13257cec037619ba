use log::debug;

use crate::failure::FailureRecord;
use crate::job::Job;
use crate::reclustering::{FailedJob, Reclustering, ReclusteringContext};

/// Dynamic reclustering.
///
/// Estimates the per-task failure probability `p` from the failure record and picks the largest job size `k`
/// such that a job succeeds with probability `(1 - p)^k >= target_success`. The size never exceeds the
/// configured size of the failed job level. The failed job tasks are repackaged into jobs of this size,
/// and it becomes the job size limit of all levels clustered later.
pub struct DynamicReclustering {
    target_success: f64,
}

impl DynamicReclustering {
    pub fn new(target_success: f64) -> Self {
        Self { target_success }
    }

    /// Returns the largest job size satisfying the target success probability, limited by `max_size`.
    pub fn job_size(&self, task_failure_rate: f64, max_size: usize) -> usize {
        let max_size = max_size.max(1);
        if task_failure_rate <= 0. {
            return max_size;
        }
        if task_failure_rate >= 1. {
            return 1;
        }
        let size = (self.target_success.ln() / (1. - task_failure_rate).ln()).floor();
        (size as usize).clamp(1, max_size)
    }
}

impl Reclustering for DynamicReclustering {
    fn on_job_failed(&mut self, failed: &FailedJob, record: &FailureRecord, ctx: &mut ReclusteringContext) -> Vec<Job> {
        let tasks = ctx.eligible_tasks(failed);
        if tasks.is_empty() {
            return Vec::new();
        }
        let level = failed.job.level;
        let max_size = ctx
            .clustering
            .configured_size(level, ctx.workflow.tasks_at_level(level).len())
            .max(failed.job.len());
        let size = self.job_size(record.task_failure_rate(), max_size);
        debug!(
            "DR: task failure rate {:.3}, job size {} (max {})",
            record.task_failure_rate(),
            size,
            max_size
        );
        ctx.clustering.set_dynamic_size(Some(size));
        ctx.repackage(failed, &tasks, size)
    }

    fn name(&self) -> &'static str {
        "DR"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::{ClusteringParams, Granularity};
    use crate::reclustering::test_util::*;

    #[test]
    fn job_size_follows_failure_rate() {
        let dr = DynamicReclustering::new(0.5);
        assert_eq!(dr.job_size(0., 10), 10);
        assert_eq!(dr.job_size(1., 10), 1);
        // 0.9^6 = 0.53, 0.9^7 = 0.48
        assert_eq!(dr.job_size(0.1, 10), 6);
        assert_eq!(dr.job_size(0.01, 10), 10);
        assert_eq!(dr.job_size(0.6, 10), 1);
    }

    #[test]
    fn shrinks_subsequent_levels() {
        let wf = workflow(&[10, 10], 1.);
        let mut clustering = policy(ClusteringParams::horizontal_count(1));
        let job = clustering.cluster(0, &wf.tasks_at_level(0), &wf).remove(0);
        let decision = failure(&job, 0);
        let failed = FailedJob { job: &job, vm: 0, decision: &decision };
        let record = FailureRecord {
            attempts: 10,
            failures: 5,
            tasks: 100,
            failed_tasks: 10,
            ..Default::default()
        };
        let mut dr = DynamicReclustering::new(0.5);
        let mut ctx = ReclusteringContext {
            workflow: &wf,
            clustering: &mut clustering,
            next_level: Some(1),
            mean_overhead: 0.,
            vm_speed: 1.,
        };
        let jobs = dr.on_job_failed(&failed, &record, &mut ctx);
        assert_eq!(jobs.iter().map(|j| j.len()).collect::<Vec<_>>(), vec![6, 4]);
        assert_eq!(clustering.dynamic_size(), Some(6));
        assert_eq!(clustering.granularity_for(1), Some(Granularity::Count(1)));
        assert_eq!(clustering.cluster(1, &wf.tasks_at_level(1), &wf).len(), 2);
    }

    #[test]
    fn never_coarsens_subsequent_levels() {
        let wf = workflow(&[100, 20], 1.);
        let mut clustering = policy(ClusteringParams::horizontal_count(20));
        let job = clustering.cluster(0, &wf.tasks_at_level(0), &wf).remove(19);
        let decision = failure(&job, 0);
        let failed = FailedJob { job: &job, vm: 19, decision: &decision };
        // one failed job of five tasks out of twenty
        let record = FailureRecord {
            attempts: 20,
            failures: 1,
            tasks: 100,
            failed_tasks: 5,
            ..Default::default()
        };
        let mut ctx = ReclusteringContext {
            workflow: &wf,
            clustering: &mut clustering,
            next_level: Some(1),
            mean_overhead: 0.,
            vm_speed: 1.,
        };
        let jobs = DynamicReclustering::new(0.5).on_job_failed(&failed, &record, &mut ctx);
        assert_eq!(jobs.len(), 1);
        assert_eq!(clustering.dynamic_size(), Some(5));
        let level_one = clustering.cluster(1, &wf.tasks_at_level(1), &wf);
        assert_eq!(level_one.len(), 20);
        assert!(level_one.iter().all(|j| j.len() == 1));
    }

    #[test]
    fn no_failures_keep_job_size() {
        let wf = workflow(&[8], 1.);
        let mut clustering = policy(ClusteringParams::horizontal_size(4));
        let job = clustering.cluster(0, &wf.tasks_at_level(0), &wf).remove(0);
        let decision = failure(&job, 1);
        let failed = FailedJob { job: &job, vm: 0, decision: &decision };
        let mut ctx = ReclusteringContext {
            workflow: &wf,
            clustering: &mut clustering,
            next_level: None,
            mean_overhead: 0.,
            vm_speed: 1.,
        };
        let jobs = DynamicReclustering::new(0.5).on_job_failed(&failed, &FailureRecord::default(), &mut ctx);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].tasks, vec![1, 2, 3]);
    }
}
