//! Jobs, i.e. clusters of tasks dispatched as a single execution unit.

use enum_iterator::IntoEnumIterator;
use serde::Serialize;

/// Represents a job state.
///
/// `Pending -> Dispatched -> {Succeeded, Failed}`, `Failed -> Reclustered`.
#[derive(Eq, PartialEq, Copy, Clone, Debug, IntoEnumIterator, Serialize)]
pub enum JobState {
    /// Created by clustering, waiting for dispatch.
    Pending,
    /// Assigned to a VM and executing.
    Dispatched,
    /// All member tasks are completed.
    Succeeded,
    /// Execution failed.
    Failed,
    /// Failed job whose remaining tasks were repackaged into new jobs.
    Reclustered,
}

impl JobState {
    pub fn can_move_to(&self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Pending, JobState::Dispatched)
                | (JobState::Dispatched, JobState::Succeeded)
                | (JobState::Dispatched, JobState::Failed)
                | (JobState::Failed, JobState::Reclustered)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Reclustered)
    }
}

/// Represents a cluster of one or more workflow tasks.
#[derive(Clone, Debug, Serialize)]
pub struct Job {
    pub id: usize,
    /// Level of the member tasks (level of the first task for vertical clusters).
    pub level: usize,
    /// Member task ids in execution order.
    pub tasks: Vec<usize>,
    pub state: JobState,
    /// VM the job was dispatched to.
    pub vm: Option<usize>,
    /// Job whose tasks were repackaged into this one.
    pub reclustered_from: Option<usize>,
}

impl Job {
    pub fn new(id: usize, level: usize, tasks: Vec<usize>) -> Self {
        Self {
            id,
            level,
            tasks,
            state: JobState::Pending,
            vm: None,
            reclustered_from: None,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Moves the job to the next state.
    ///
    /// Panics if the transition is not allowed by the job state machine.
    pub fn set_state(&mut self, next: JobState) {
        assert!(
            self.state.can_move_to(next),
            "Job {} can't move from {:?} to {:?}",
            self.id,
            self.state,
            next
        );
        self.state = next;
    }

    pub fn dispatch(&mut self, vm: usize) {
        self.set_state(JobState::Dispatched);
        self.vm = Some(vm);
    }
}
