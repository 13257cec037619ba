//! Simulation configuration and execution.

use std::cell::{Ref, RefCell};
use std::rc::Rc;

use dslab_core::simulation::Simulation;

use crate::clustering::ClusteringPolicy;
use crate::config::SimulationConfig;
use crate::error::Result;
use crate::failure::FailureMonitor;
use crate::job::{Job, JobState};
use crate::run_stats::RunStats;
use crate::runner::{Start, WorkflowRunner};
use crate::trace_log::TraceLog;
use crate::workflow::Workflow;

/// Provides a convenient API for running a workflow with task clustering and failures.
///
/// Owns the simulation and the [runner](crate::runner::WorkflowRunner) component registered in it.
pub struct WorkflowEngine {
    sim: Simulation,
    runner: Rc<RefCell<WorkflowRunner>>,
}

impl WorkflowEngine {
    /// Validates the config and prepares the simulation, no event is processed until the first step.
    pub fn new(config: SimulationConfig, workflow: Workflow) -> Result<Self> {
        let mut sim = Simulation::new(config.seed);
        let runner = Rc::new(RefCell::new(WorkflowRunner::new(
            config,
            workflow,
            sim.create_context("runner"),
        )?));
        Self::init(&mut sim, &runner);
        Ok(Self { sim, runner })
    }

    fn init(sim: &mut Simulation, runner: &Rc<RefCell<WorkflowRunner>>) {
        let runner_id = sim.add_handler("runner", runner.clone());
        let mut client = sim.create_context("client");
        client.emit_now(Start {}, runner_id);
    }

    /// Enables or disables [trace log](crate::trace_log::TraceLog).
    pub fn enable_trace_log(&mut self, flag: bool) {
        self.runner.borrow_mut().enable_trace_log(flag);
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> f64 {
        self.sim.time()
    }

    /// Returns the total number of created events.
    pub fn event_count(&self) -> u64 {
        self.sim.event_count()
    }

    pub fn config(&self) -> Ref<'_, SimulationConfig> {
        Ref::map(self.runner.borrow(), |r| r.config())
    }

    pub fn workflow(&self) -> Ref<'_, Workflow> {
        Ref::map(self.runner.borrow(), |r| r.workflow())
    }

    /// Returns all jobs created so far ordered by id.
    pub fn jobs(&self) -> Vec<Job> {
        self.runner.borrow().jobs().cloned().collect()
    }

    pub fn job(&self, job_id: usize) -> Option<Job> {
        self.runner.borrow().job(job_id).cloned()
    }

    pub fn job_state_counts(&self) -> Vec<(JobState, usize)> {
        self.runner.borrow().job_state_counts()
    }

    pub fn monitor(&self) -> Ref<'_, FailureMonitor> {
        Ref::map(self.runner.borrow(), |r| r.monitor())
    }

    pub fn clustering(&self) -> Ref<'_, ClusteringPolicy> {
        Ref::map(self.runner.borrow(), |r| r.clustering())
    }

    pub fn trace_log(&self) -> Ref<'_, TraceLog> {
        Ref::map(self.runner.borrow(), |r| r.trace_log())
    }

    pub fn is_aborted(&self) -> bool {
        self.runner.borrow().is_aborted()
    }

    /// Returns metrics of the run so far.
    pub fn run_stats(&self) -> RunStats {
        self.runner.borrow().run_stats()
    }

    /// Performs a single step through the simulation.
    ///
    /// See [Simulation::step()](dslab_core::simulation::Simulation::step).
    pub fn step(&mut self) -> bool {
        self.sim.step()
    }

    /// Performs the specified number of steps through the simulation.
    ///
    /// See [Simulation::steps()](dslab_core::simulation::Simulation::steps).
    pub fn steps(&mut self, step_count: u64) -> bool {
        self.sim.steps(step_count)
    }

    /// Steps through the simulation with duration limit.
    ///
    /// See [Simulation::step_for_duration()](dslab_core::simulation::Simulation::step_for_duration).
    pub fn step_for_duration(&mut self, duration: f64) -> bool {
        self.sim.step_for_duration(duration)
    }

    /// Steps through the simulation until there are no pending events left.
    pub fn step_until_no_events(&mut self) {
        self.sim.step_until_no_events();
    }

    /// Runs the workflow to the end and returns the metrics.
    pub fn run(&mut self) -> RunStats {
        self.step_until_no_events();
        let runner = self.runner.borrow();
        let stats = runner.run_stats();
        runner.log_finished(&stats);
        stats
    }

    /// Stops the simulation discarding queued and running jobs.
    pub fn abort(&mut self) {
        self.runner.borrow_mut().abort();
        self.sim.cancel_events(|_| true);
    }

    /// Returns the engine to the initial state keeping the configuration and the workflow.
    pub fn reset(&mut self) {
        let seed = self.runner.borrow().config().seed;
        self.sim = Simulation::new(seed);
        let ctx = self.sim.create_context("runner");
        self.runner.borrow_mut().reset(ctx);
        Self::init(&mut self.sim, &self.runner);
    }
}
