use log::debug;

use crate::clustering::Granularity;
use crate::failure::FailureRecord;
use crate::job::Job;
use crate::reclustering::{FailedJob, Reclustering, ReclusteringContext};

/// Dynamic clustering.
///
/// Chooses job size `k` minimizing the expected time per task
/// `c(k) = (overhead + k * runtime) / (k * (1 - p)^k)`, where `p` is the observed per-task failure
/// probability and `(1 - p)^-k` is the expected number of attempts of a job with `k` tasks.
/// The size is used to repackage the failed job tasks and to cluster the next level.
pub struct DynamicClustering {}

impl DynamicClustering {
    pub fn new() -> Self {
        DynamicClustering {}
    }

    /// Returns the job size in `[1, max_size]` with the lowest expected time per task.
    pub fn best_size(max_size: usize, runtime: f64, overhead: f64, task_failure_rate: f64) -> usize {
        if task_failure_rate >= 1. {
            return 1;
        }
        let success = 1. - task_failure_rate.max(0.);
        let mut best = (1, f64::INFINITY);
        for k in 1..=max_size.max(1) {
            let cost = (overhead + k as f64 * runtime) / (k as f64 * success.powi(k as i32));
            if cost < best.1 {
                best = (k, cost);
            }
        }
        best.0
    }
}

impl Default for DynamicClustering {
    fn default() -> Self {
        Self::new()
    }
}

impl Reclustering for DynamicClustering {
    fn on_job_failed(&mut self, failed: &FailedJob, record: &FailureRecord, ctx: &mut ReclusteringContext) -> Vec<Job> {
        let p = record.task_failure_rate();
        if let Some(level) = ctx.next_level {
            let tasks = ctx.workflow.tasks_at_level(level);
            if !tasks.is_empty() {
                let size = Self::best_size(tasks.len(), ctx.mean_runtime(&tasks), ctx.mean_overhead, p);
                debug!("DC: level {} will be clustered with job size {}", level, size);
                ctx.clustering.set_level_granularity(level, Granularity::Size(size));
            }
        }

        let tasks = ctx.eligible_tasks(failed);
        if tasks.is_empty() {
            return Vec::new();
        }
        let size = Self::best_size(tasks.len(), ctx.mean_runtime(&tasks), ctx.mean_overhead, p);
        debug!(
            "DC: task failure rate {:.3}, splitting {} tasks of job {} into jobs of size {}",
            p,
            tasks.len(),
            failed.job.id,
            size
        );
        ctx.repackage(failed, &tasks, size)
    }

    fn name(&self) -> &'static str {
        "DC"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::ClusteringParams;
    use crate::reclustering::test_util::*;

    #[test]
    fn best_size_balances_overhead_and_retries() {
        // no failures: larger jobs amortize overhead
        assert_eq!(DynamicClustering::best_size(10, 1., 5., 0.), 10);
        // certain failures: singleton jobs
        assert_eq!(DynamicClustering::best_size(10, 1., 5., 1.), 1);
        // no overhead: retries make every merge unprofitable
        assert_eq!(DynamicClustering::best_size(10, 1., 0., 0.1), 1);
        let size = DynamicClustering::best_size(20, 1., 5., 0.1);
        assert!(size > 1 && size < 20, "size = {}", size);
    }

    #[test]
    fn sets_granularity_of_next_level() {
        let wf = workflow(&[6, 12], 1.);
        let mut clustering = policy(ClusteringParams::horizontal_count(1));
        let job = clustering.cluster(0, &wf.tasks_at_level(0), &wf).remove(0);
        let decision = failure(&job, 2);
        let failed = FailedJob { job: &job, vm: 0, decision: &decision };
        let record = FailureRecord {
            attempts: 4,
            failures: 2,
            tasks: 40,
            failed_tasks: 4,
            ..Default::default()
        };
        let mut dc = DynamicClustering::new();
        let mut ctx = ReclusteringContext {
            workflow: &wf,
            clustering: &mut clustering,
            next_level: Some(1),
            mean_overhead: 5.,
            vm_speed: 1.,
        };
        let jobs = dc.on_job_failed(&failed, &record, &mut ctx);
        assert_eq!(jobs.iter().map(|j| j.len()).sum::<usize>(), 4);

        let expected = DynamicClustering::best_size(12, 1., 5., 0.1);
        assert_eq!(clustering.granularity_for(1), Some(Granularity::Size(expected)));
        assert_eq!(clustering.granularity_for(2), Some(Granularity::Count(1)));
    }
}
