//! Workflow execution log.

use std::fmt::Display;
use std::fs::File;
use std::io::Write;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use dslab_core::context::SimulationContext;
use dslab_core::log_debug;
use crate::workflow::Workflow;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    JobCreated {
        time: f64,
        job_id: usize,
        level: usize,
        tasks: Vec<usize>,
        reclustered_from: Option<usize>,
    },
    JobDispatched {
        time: f64,
        job_id: usize,
        vm: usize,
    },
    JobSucceeded {
        time: f64,
        job_id: usize,
        vm: usize,
    },
    JobFailed {
        time: f64,
        job_id: usize,
        vm: usize,
        completed: Vec<usize>,
        unexecuted: Vec<usize>,
    },
    JobReclustered {
        time: f64,
        job_id: usize,
        algorithm: String,
        new_jobs: Vec<usize>,
    },
    TaskAbandoned {
        time: f64,
        task_id: usize,
        task_name: String,
        attempts: u32,
    },
}

impl Event {
    pub fn time(&self) -> f64 {
        match self {
            Event::JobCreated { time, .. }
            | Event::JobDispatched { time, .. }
            | Event::JobSucceeded { time, .. }
            | Event::JobFailed { time, .. }
            | Event::JobReclustered { time, .. }
            | Event::TaskAbandoned { time, .. } => *time,
        }
    }
}

impl Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Event::JobCreated {
                job_id, level, tasks, ..
            } => write!(f, "created job {job_id} at level {level} with tasks [{}]", tasks.iter().join(", ")),
            Event::JobDispatched { job_id, vm, .. } => write!(f, "dispatched job {job_id} to vm {vm}"),
            Event::JobSucceeded { job_id, vm, .. } => write!(f, "job {job_id} succeeded on vm {vm}"),
            Event::JobFailed {
                job_id, vm, unexecuted, ..
            } => write!(f, "job {job_id} failed on vm {vm}, {} tasks lost", unexecuted.len()),
            Event::JobReclustered {
                job_id,
                algorithm,
                new_jobs,
                ..
            } => write!(
                f,
                "{algorithm} reclustered job {job_id} into jobs [{}]",
                new_jobs.iter().join(", ")
            ),
            Event::TaskAbandoned {
                task_name, attempts, ..
            } => write!(f, "abandoned task {task_name} after {attempts} attempts"),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Default)]
pub struct Task {
    pub name: String,
    pub runtime: f64,
    pub level: usize,
    pub parents: Vec<usize>,
}

#[derive(Serialize, Deserialize, Clone, Default)]
pub struct TraceLog {
    pub vm_count: usize,
    pub tasks: Vec<Task>,
    pub events: Vec<Event>,
}

impl TraceLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log_event(&mut self, ctx: &SimulationContext, event: Event) {
        log_debug!(ctx, "{}", event.to_string());
        self.events.push(event);
    }

    pub fn log_workflow(&mut self, workflow: &Workflow, vm_count: usize) {
        self.vm_count = vm_count;
        self.tasks = workflow
            .get_tasks()
            .iter()
            .map(|task| Task {
                name: task.name.clone(),
                runtime: task.runtime,
                level: task.level,
                parents: task.predecessors.iter().copied().collect(),
            })
            .collect();
    }

    pub fn save_to_file(&self, filename: &str) -> Result<(), std::io::Error> {
        File::create(filename)?.write_all(serde_json::to_string_pretty(self)?.as_bytes())
    }
}
