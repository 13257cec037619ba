//! Workflow execution runtime.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use enum_iterator::IntoEnumIterator;
use serde::Serialize;

use dslab_core::cast;
use dslab_core::context::SimulationContext;
use dslab_core::event::Event;
use dslab_core::handler::EventHandler;
use dslab_core::{log_debug, log_info, log_warn};

use crate::clustering::{ClusteringMethod, ClusteringPolicy};
use crate::config::SimulationConfig;
use crate::error::Result;
use crate::failure::{Decision, FailureGenerator, FailureMonitor};
use crate::job::{Job, JobState};
use crate::overhead::{OverheadModel, OverheadPhase};
use crate::reclustering::{resolve_reclustering, FailedJob, Reclustering, ReclusteringContext};
use crate::run_stats::RunStats;
use crate::trace_log::{Event as TraceEvent, TraceLog};
use crate::workflow::{TaskState, Workflow};

#[derive(Clone, Serialize)]
pub struct Start {}

/// Clustering delay of the job is over.
#[derive(Clone, Serialize)]
pub struct JobReleased {
    pub job_id: usize,
}

/// Job finished executing on the VM.
#[derive(Clone, Serialize)]
pub struct JobExecuted {
    pub job_id: usize,
    pub vm: usize,
}

/// Postscript of the job is over, the outcome is visible to the runner.
#[derive(Clone, Serialize)]
pub struct JobReturned {
    pub job_id: usize,
    pub vm: usize,
    pub decision: Decision,
}

/// Executes a workflow on a pool of identical VMs with task clustering, failure injection and reclustering.
///
/// Levels are clustered lazily when the first of their tasks becomes ready, so that granularity changes made
/// by reclustering apply to them. Vertical clustering is done for the whole workflow at start.
/// Ready jobs are dispatched in creation order to idle VMs, lowest VM index first.
pub struct WorkflowRunner {
    config: SimulationConfig,
    workflow: Workflow,
    jobs: BTreeMap<usize, Job>,
    clustering: ClusteringPolicy,
    overheads: OverheadModel,
    failure_generator: FailureGenerator,
    monitor: FailureMonitor,
    reclustering: Box<dyn Reclustering>,
    idle_vms: BTreeSet<usize>,
    released_jobs: BTreeSet<usize>,
    job_overheads: HashMap<usize, f64>,
    next_level: usize,
    run_stats: RunStats,
    trace_log: TraceLog,
    trace_log_enabled: bool,
    aborted: bool,
    ctx: SimulationContext,
}

impl WorkflowRunner {
    pub fn new(config: SimulationConfig, workflow: Workflow, ctx: SimulationContext) -> Result<Self> {
        config.validate()?;
        workflow.topological_order()?;
        let clustering = ClusteringPolicy::new(config.clustering.clone())?;
        let overheads = OverheadModel::new(&config.overhead, config.seed)?;
        let failure_generator =
            FailureGenerator::from_params(&config.failure, config.vm_count, workflow.level_count(), config.seed)?;
        let monitor = FailureMonitor::new(config.failure.monitor);
        let reclustering = resolve_reclustering(&config.failure.reclustering);
        let mut trace_log = TraceLog::new();
        trace_log.log_workflow(&workflow, config.vm_count);
        Ok(Self {
            idle_vms: (0..config.vm_count).collect(),
            run_stats: RunStats::new(reclustering.name()),
            config,
            workflow,
            jobs: BTreeMap::new(),
            clustering,
            overheads,
            failure_generator,
            monitor,
            reclustering,
            released_jobs: BTreeSet::new(),
            job_overheads: HashMap::new(),
            next_level: 0,
            trace_log,
            trace_log_enabled: true,
            aborted: false,
            ctx,
        })
    }

    /// Enables or disables [trace log](crate::trace_log::TraceLog).
    pub fn enable_trace_log(&mut self, flag: bool) {
        self.trace_log_enabled = flag;
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    /// Returns all jobs created so far ordered by id.
    pub fn jobs(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    pub fn job(&self, job_id: usize) -> Option<&Job> {
        self.jobs.get(&job_id)
    }

    /// Counts jobs per state.
    pub fn job_state_counts(&self) -> Vec<(JobState, usize)> {
        JobState::into_enum_iter()
            .map(|state| (state, self.jobs.values().filter(|j| j.state == state).count()))
            .filter(|(_, count)| *count > 0)
            .collect()
    }

    pub fn monitor(&self) -> &FailureMonitor {
        &self.monitor
    }

    pub fn clustering(&self) -> &ClusteringPolicy {
        &self.clustering
    }

    pub fn trace_log(&self) -> &TraceLog {
        &self.trace_log
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// Returns metrics of the run so far.
    pub fn run_stats(&self) -> RunStats {
        let mut stats = self.run_stats.clone();
        stats.finalize(self.ctx.time(), &self.workflow);
        stats
    }

    pub fn log_finished(&self, stats: &RunStats) {
        log_info!(
            self.ctx,
            "finished: {} of {} tasks completed, {} jobs failed, {} abandoned tasks",
            stats.completed_tasks,
            self.workflow.len(),
            stats.jobs_failed,
            stats.abandoned_tasks
        );
        log_debug!(
            self.ctx,
            "task states: {:?}, job states: {:?}",
            self.workflow.state_counts(),
            self.job_state_counts()
        );
    }

    /// Discards released and running jobs, the pending events are cancelled by the caller.
    ///
    /// Discarded jobs are neither recorded by the failure monitor nor passed to reclustering.
    pub fn abort(&mut self) {
        let running = self.config.vm_count - self.idle_vms.len();
        log_warn!(
            self.ctx,
            "aborted with {} released and {} running jobs",
            self.released_jobs.len(),
            running
        );
        self.released_jobs.clear();
        self.aborted = true;
    }

    /// Returns the runner to the initial state keeping the configuration and the workflow.
    ///
    /// All random streams are rewound, so the next run repeats the previous one.
    pub fn reset(&mut self, ctx: SimulationContext) {
        self.ctx = ctx;
        self.workflow.reset();
        self.jobs.clear();
        self.clustering.reset();
        self.overheads.reset();
        self.failure_generator.reset();
        self.monitor.reset();
        self.reclustering = resolve_reclustering(&self.config.failure.reclustering);
        self.idle_vms = (0..self.config.vm_count).collect();
        self.released_jobs.clear();
        self.job_overheads.clear();
        self.next_level = 0;
        self.run_stats = RunStats::new(self.reclustering.name());
        self.trace_log.events.clear();
        self.aborted = false;
    }

    fn start(&mut self) {
        log_info!(
            self.ctx,
            "started workflow execution: {} tasks, {} levels, {} VMs, {:?} clustering, {} reclustering",
            self.workflow.len(),
            self.workflow.level_count(),
            self.config.vm_count,
            self.clustering.method(),
            self.reclustering.name()
        );
        if self.clustering.method() == ClusteringMethod::Vertical {
            let jobs = self.clustering.cluster_vertical(&self.workflow);
            self.next_level = self.workflow.level_count();
            self.add_jobs(jobs);
        } else {
            self.cluster_ready_levels();
        }
    }

    fn log_event(&mut self, event: TraceEvent) {
        if self.trace_log_enabled {
            self.trace_log.log_event(&self.ctx, event);
        } else {
            log_debug!(self.ctx, "{}", event.to_string());
        }
    }

    /// Clusters subsequent levels as soon as some of their tasks are ready.
    fn cluster_ready_levels(&mut self) {
        while self.next_level < self.workflow.level_count() {
            let tasks = self.workflow.tasks_at_level(self.next_level);
            if !tasks.iter().any(|&t| self.workflow.is_ready(t)) {
                break;
            }
            let jobs = self.clustering.cluster(self.next_level, &tasks, &self.workflow);
            self.next_level += 1;
            self.add_jobs(jobs);
        }
    }

    fn add_jobs(&mut self, jobs: Vec<Job>) {
        for job in jobs {
            let delay = self.overheads.delay_for(OverheadPhase::Clustering, job.level);
            for &task_id in job.tasks.iter() {
                self.workflow.update_task_state(task_id, TaskState::Queued);
                self.workflow.get_task_mut(task_id).job = Some(job.id);
            }
            self.job_overheads.insert(job.id, delay);
            self.run_stats.add_job_created();
            self.log_event(TraceEvent::JobCreated {
                time: self.ctx.time(),
                job_id: job.id,
                level: job.level,
                tasks: job.tasks.clone(),
                reclustered_from: job.reclustered_from,
            });
            self.ctx.emit_self(JobReleased { job_id: job.id }, delay);
            self.jobs.insert(job.id, job);
        }
    }

    /// Checks that all dependencies of the job tasks outside of the job are completed.
    fn is_job_ready(&self, job: &Job) -> bool {
        job.tasks.iter().all(|&t| {
            self.workflow
                .get_task(t)
                .predecessors
                .iter()
                .all(|p| job.tasks.contains(p) || self.workflow.get_task(*p).state == TaskState::Done)
        })
    }

    fn dispatch_jobs(&mut self) {
        if self.idle_vms.is_empty() {
            return;
        }
        let ready: Vec<usize> = self
            .released_jobs
            .iter()
            .copied()
            .filter(|id| self.is_job_ready(&self.jobs[id]))
            .collect();
        for job_id in ready {
            let vm = match self.idle_vms.iter().next().copied() {
                Some(vm) => vm,
                None => break,
            };
            self.idle_vms.remove(&vm);
            self.released_jobs.remove(&job_id);
            self.dispatch(job_id, vm);
        }
    }

    fn dispatch(&mut self, job_id: usize, vm: usize) {
        let job = match self.jobs.get_mut(&job_id) {
            Some(job) => job,
            None => return,
        };
        job.dispatch(vm);
        let level = job.level;
        let task_count = job.len();
        let mut runtime = 0.;
        for &task_id in job.tasks.iter() {
            self.workflow.update_task_state(task_id, TaskState::Running);
            let task = self.workflow.get_task_mut(task_id);
            task.attempts += 1;
            runtime += task.runtime;
        }
        let execution_time = runtime / self.config.vm_speed;
        let delay = self.overheads.delay_for(OverheadPhase::Engine, level)
            + self.overheads.delay_for(OverheadPhase::Queue, level);
        *self.job_overheads.entry(job_id).or_default() += delay;
        self.run_stats.set_job_dispatch(task_count);
        self.log_event(TraceEvent::JobDispatched {
            time: self.ctx.time(),
            job_id,
            vm,
        });
        self.ctx.emit_self(JobExecuted { job_id, vm }, delay + execution_time);
    }

    fn on_job_released(&mut self, job_id: usize) {
        self.released_jobs.insert(job_id);
        self.dispatch_jobs();
    }

    fn on_job_executed(&mut self, job_id: usize, vm: usize) {
        let job = &self.jobs[&job_id];
        let runtimes: Vec<f64> = job
            .tasks
            .iter()
            .map(|&t| self.workflow.get_task(t).runtime / self.config.vm_speed)
            .collect();
        let decision = self.failure_generator.decide(job, vm, job.level, &runtimes);
        let postscript = self.overheads.delay_for(OverheadPhase::Postscript, job.level);
        *self.job_overheads.entry(job_id).or_default() += postscript;
        self.idle_vms.insert(vm);
        self.ctx.emit_self(JobReturned { job_id, vm, decision }, postscript);
        self.dispatch_jobs();
    }

    fn on_job_returned(&mut self, job_id: usize, vm: usize, decision: Decision) {
        self.monitor.record(&self.jobs[&job_id], vm, &decision);
        let overhead = self.job_overheads.remove(&job_id).unwrap_or(0.);
        self.run_stats.set_job_return(&decision, overhead, self.ctx.time());
        for &task_id in decision.completed.iter() {
            self.workflow.update_task_state(task_id, TaskState::Done);
        }
        if decision.is_failed() {
            if let Some(job) = self.jobs.get_mut(&job_id) {
                job.set_state(JobState::Failed);
            }
            self.log_event(TraceEvent::JobFailed {
                time: self.ctx.time(),
                job_id,
                vm,
                completed: decision.completed.clone(),
                unexecuted: decision.unexecuted.clone(),
            });
            self.on_job_failed(job_id, vm, &decision);
        } else {
            if let Some(job) = self.jobs.get_mut(&job_id) {
                job.set_state(JobState::Succeeded);
            }
            self.log_event(TraceEvent::JobSucceeded {
                time: self.ctx.time(),
                job_id,
                vm,
            });
        }
        self.cluster_ready_levels();
        self.dispatch_jobs();
    }

    fn on_job_failed(&mut self, job_id: usize, vm: usize, decision: &Decision) {
        let job = self.jobs[&job_id].clone();
        for &task_id in decision.unexecuted.iter() {
            let task = self.workflow.get_task(task_id);
            if task.attempts >= self.config.max_attempts {
                let (task_name, attempts) = (task.name.clone(), task.attempts);
                log_warn!(self.ctx, "task {} is abandoned after {} attempts", task_name, attempts);
                self.workflow.update_task_state(task_id, TaskState::Abandoned);
                self.log_event(TraceEvent::TaskAbandoned {
                    time: self.ctx.time(),
                    task_id,
                    task_name,
                    attempts,
                });
            }
        }

        let record = self.monitor.query(vm, job.level);
        let failed = FailedJob {
            job: &job,
            vm,
            decision,
        };
        let mut ctx = ReclusteringContext {
            workflow: &self.workflow,
            clustering: &mut self.clustering,
            next_level: (self.next_level < self.workflow.level_count()).then_some(self.next_level),
            mean_overhead: self.run_stats.mean_job_overhead(),
            vm_speed: self.config.vm_speed,
        };
        let replacements = self.reclustering.on_job_failed(&failed, &record, &mut ctx);
        let remaining = ctx.eligible_tasks(&failed);

        if replacements.is_empty() {
            if remaining.is_empty() {
                return;
            }
            log_debug!(
                self.ctx,
                "resubmitting {} tasks of failed job {} as singleton jobs",
                remaining.len(),
                job_id
            );
            let jobs = self.clustering.singletons(&remaining, &self.workflow);
            self.add_jobs(jobs);
        } else {
            if let Some(job) = self.jobs.get_mut(&job_id) {
                job.set_state(JobState::Reclustered);
            }
            self.run_stats.add_job_reclustered();
            self.log_event(TraceEvent::JobReclustered {
                time: self.ctx.time(),
                job_id,
                algorithm: self.reclustering.name().to_string(),
                new_jobs: replacements.iter().map(|j| j.id).collect(),
            });
            self.add_jobs(replacements);
        }
    }
}

impl EventHandler for WorkflowRunner {
    fn on(&mut self, event: Event) {
        cast!(match event.data {
            Start {} => {
                self.start()
            }
            JobReleased { job_id } => {
                self.on_job_released(job_id)
            }
            JobExecuted { job_id, vm } => {
                self.on_job_executed(job_id, vm)
            }
            JobReturned { job_id, vm, decision } => {
                self.on_job_returned(job_id, vm, decision)
            }
        })
    }
}
