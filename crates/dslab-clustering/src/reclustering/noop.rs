use crate::failure::FailureRecord;
use crate::job::Job;
use crate::reclustering::{FailedJob, Reclustering, ReclusteringContext};

/// Leaves clustering unchanged after failures.
pub struct NoopReclustering {}

impl NoopReclustering {
    pub fn new() -> Self {
        NoopReclustering {}
    }
}

impl Default for NoopReclustering {
    fn default() -> Self {
        Self::new()
    }
}

impl Reclustering for NoopReclustering {
    fn on_job_failed(&mut self, _failed: &FailedJob, _record: &FailureRecord, _ctx: &mut ReclusteringContext) -> Vec<Job> {
        Vec::new()
    }

    fn name(&self) -> &'static str {
        "NOOP"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clustering::ClusteringParams;
    use crate::reclustering::test_util::*;

    #[test]
    fn always_empty() {
        let wf = workflow(&[6, 3], 1.);
        let mut clustering = policy(ClusteringParams::horizontal_count(2));
        let jobs = clustering.cluster(0, &wf.tasks_at_level(0), &wf);
        let mut noop = NoopReclustering::new();
        for job in jobs.iter() {
            for completed in 0..job.len() {
                let decision = failure(job, completed);
                let failed = FailedJob { job, vm: 0, decision: &decision };
                let record = FailureRecord {
                    attempts: 10,
                    failures: 9,
                    tasks: 30,
                    failed_tasks: 27,
                    ..Default::default()
                };
                let mut ctx = ReclusteringContext {
                    workflow: &wf,
                    clustering: &mut clustering,
                    next_level: Some(1),
                    mean_overhead: 10.,
                    vm_speed: 1.,
                };
                assert!(noop.on_job_failed(&failed, &record, &mut ctx).is_empty());
            }
        }
        assert_eq!(clustering.dynamic_size(), None);
    }
}
