//! Workflow DAG and its tasks.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;

use enum_iterator::IntoEnumIterator;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Represents a workflow task state.
#[derive(Eq, PartialEq, Copy, Clone, Debug, IntoEnumIterator, Serialize)]
pub enum TaskState {
    /// Not yet placed into a job.
    Pending,
    /// Member of a job that is waiting for dispatch.
    Queued,
    /// Member of a dispatched job.
    Running,
    /// Completed successfully.
    Done,
    /// Exceeded the attempt limit and will not be executed anymore.
    Abandoned,
}

/// Represents a workflow task.
///
/// Runtime is measured in seconds on a VM with speed 1. The level is the length of the longest path from
/// a workflow entry task, so tasks with the same level never depend on each other.
#[derive(Clone, Debug)]
pub struct Task {
    pub name: String,
    pub runtime: f64,
    pub level: usize,
    pub predecessors: BTreeSet<usize>,
    pub successors: BTreeSet<usize>,
    /// Job the task currently belongs to.
    pub job: Option<usize>,
    pub state: TaskState,
    /// Number of times the task was dispatched as part of a job.
    pub attempts: u32,
}

impl Task {
    pub fn new(name: &str, runtime: f64) -> Self {
        Self {
            name: name.to_string(),
            runtime,
            level: 0,
            predecessors: BTreeSet::new(),
            successors: BTreeSet::new(),
            job: None,
            state: TaskState::Pending,
            attempts: 0,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Workflow {
    tasks: Vec<Task>,
    level_count: usize,
    completed_task_count: usize,
}

impl Workflow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&mut self, name: &str, runtime: f64) -> usize {
        let task_id = self.tasks.len();
        self.tasks.push(Task::new(name, runtime));
        self.level_count = self.level_count.max(1);
        task_id
    }

    /// Adds dependency `parent -> child` and updates levels of the child and its descendants.
    pub fn add_dependency(&mut self, parent: usize, child: usize) -> Result<()> {
        if parent >= self.tasks.len() || child >= self.tasks.len() {
            return Err(Error::configuration(format!(
                "dependency {} -> {} refers to unknown task",
                parent, child
            )));
        }
        if parent == child {
            return Err(Error::configuration(format!("task {} depends on itself", parent)));
        }
        if self.tasks[parent].successors.contains(&child) {
            return Ok(());
        }
        if self.is_reachable(child, parent) {
            return Err(Error::configuration(format!(
                "dependency {} -> {} creates a cycle",
                self.tasks[parent].name, self.tasks[child].name
            )));
        }
        self.tasks[parent].successors.insert(child);
        self.tasks[child].predecessors.insert(parent);
        self.raise_level(child, self.tasks[parent].level + 1);
        Ok(())
    }

    fn is_reachable(&self, from: usize, to: usize) -> bool {
        let mut visited: HashSet<usize> = HashSet::new();
        let mut stack = vec![from];
        while let Some(task_id) = stack.pop() {
            if task_id == to {
                return true;
            }
            for &succ in self.tasks[task_id].successors.iter() {
                if visited.insert(succ) {
                    stack.push(succ);
                }
            }
        }
        false
    }

    /// Moves the task at least to `level` and pushes its descendants below it.
    fn raise_level(&mut self, task_id: usize, level: usize) {
        let mut queue = VecDeque::from([(task_id, level)]);
        while let Some((task_id, level)) = queue.pop_front() {
            if self.tasks[task_id].level >= level {
                continue;
            }
            self.tasks[task_id].level = level;
            self.level_count = self.level_count.max(level + 1);
            for &succ in self.tasks[task_id].successors.iter() {
                queue.push_back((succ, level + 1));
            }
        }
    }

    pub fn get_task(&self, task_id: usize) -> &Task {
        &self.tasks[task_id]
    }

    pub(crate) fn get_task_mut(&mut self, task_id: usize) -> &mut Task {
        &mut self.tasks[task_id]
    }

    pub fn get_tasks(&self) -> &Vec<Task> {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of distinct levels, i.e. the maximum level plus one.
    pub fn level_count(&self) -> usize {
        self.level_count
    }

    /// Returns ids of tasks at the given level in submission order.
    pub fn tasks_at_level(&self, level: usize) -> Vec<usize> {
        (0..self.tasks.len()).filter(|&t| self.tasks[t].level == level).collect()
    }

    /// Returns task ids in topological order or an error if the graph has a cycle.
    pub fn topological_order(&self) -> Result<Vec<usize>> {
        let mut in_degree: Vec<usize> = self.tasks.iter().map(|t| t.predecessors.len()).collect();
        let mut queue: VecDeque<usize> = (0..self.tasks.len()).filter(|&t| in_degree[t] == 0).collect();
        let mut order = Vec::with_capacity(self.tasks.len());
        while let Some(task_id) = queue.pop_front() {
            order.push(task_id);
            for &succ in self.tasks[task_id].successors.iter() {
                in_degree[succ] -= 1;
                if in_degree[succ] == 0 {
                    queue.push_back(succ);
                }
            }
        }
        if order.len() != self.tasks.len() {
            return Err(Error::configuration("workflow contains a dependency cycle"));
        }
        Ok(order)
    }

    fn compute_levels(&mut self) -> Result<()> {
        let order = self.topological_order()?;
        let mut level_count = 0;
        for task_id in order {
            let level = self.tasks[task_id]
                .predecessors
                .iter()
                .map(|&p| self.tasks[p].level + 1)
                .max()
                .unwrap_or(0);
            self.tasks[task_id].level = level;
            level_count = level_count.max(level + 1);
        }
        self.level_count = level_count;
        Ok(())
    }

    /// Checks whether all predecessors of the task are completed.
    pub fn is_ready(&self, task_id: usize) -> bool {
        self.tasks[task_id]
            .predecessors
            .iter()
            .all(|&p| self.tasks[p].state == TaskState::Done)
    }

    pub fn update_task_state(&mut self, task_id: usize, state: TaskState) {
        let task = &mut self.tasks[task_id];
        if task.state == TaskState::Done {
            panic!("Error: task {} is already completed and can't move to {:?}", task.name, state);
        }
        task.state = state;
        if state == TaskState::Done {
            self.completed_task_count += 1;
        }
    }

    pub fn completed_task_count(&self) -> usize {
        self.completed_task_count
    }

    pub fn is_completed(&self) -> bool {
        self.tasks.len() == self.completed_task_count
    }

    /// Returns all tasks to the initial state.
    pub fn reset(&mut self) {
        for task in self.tasks.iter_mut() {
            task.job = None;
            task.state = TaskState::Pending;
            task.attempts = 0;
        }
        self.completed_task_count = 0;
    }

    /// Counts tasks per state.
    pub fn state_counts(&self) -> Vec<(TaskState, usize)> {
        TaskState::into_enum_iter()
            .map(|state| (state, self.tasks.iter().filter(|t| t.state == state).count()))
            .filter(|(_, count)| *count > 0)
            .collect()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct YamlTask {
    name: String,
    runtime: f64,
    #[serde(default = "Vec::new")]
    parents: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Yaml {
    tasks: Vec<YamlTask>,
}

impl Workflow {
    /// Reads workflow from a YAML file with a list of tasks, each having a name, a runtime and a list of parents.
    ///
    /// ```yaml
    /// tasks:
    ///   - name: split
    ///     runtime: 10
    ///   - name: map
    ///     runtime: 25.5
    ///     parents: [split]
    /// ```
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_yaml_str(&std::fs::read_to_string(path)?)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let yaml: Yaml = serde_yaml::from_str(content)?;
        let mut workflow = Workflow::new();
        let mut ids: HashMap<String, usize> = HashMap::new();
        for task in yaml.tasks.iter() {
            if !(task.runtime >= 0.) {
                return Err(Error::configuration(format!(
                    "task {} has invalid runtime {}",
                    task.name, task.runtime
                )));
            }
            if ids.insert(task.name.clone(), workflow.add_task(&task.name, task.runtime)).is_some() {
                return Err(Error::configuration(format!("duplicate task name {}", task.name)));
            }
        }
        for task in yaml.tasks.iter() {
            let child = ids[&task.name];
            for parent in task.parents.iter() {
                let parent = *ids
                    .get(parent)
                    .ok_or_else(|| Error::configuration(format!("unknown parent {} of task {}", parent, task.name)))?;
                workflow.tasks[parent].successors.insert(child);
                workflow.tasks[child].predecessors.insert(parent);
            }
        }
        workflow.compute_levels()?;
        Ok(workflow)
    }
}

#[cfg(test)]
mod tests {
    use rand::prelude::*;
    use rand_pcg::Pcg64;

    use super::*;

    #[test]
    fn levels_follow_longest_path() {
        let mut wf = Workflow::new();
        let a = wf.add_task("a", 1.);
        let b = wf.add_task("b", 1.);
        let c = wf.add_task("c", 1.);
        let d = wf.add_task("d", 1.);
        wf.add_dependency(a, b).unwrap();
        wf.add_dependency(b, c).unwrap();
        wf.add_dependency(a, c).unwrap();
        wf.add_dependency(c, d).unwrap();
        assert_eq!(wf.get_task(a).level, 0);
        assert_eq!(wf.get_task(b).level, 1);
        assert_eq!(wf.get_task(c).level, 2);
        assert_eq!(wf.get_task(d).level, 3);
        assert_eq!(wf.level_count(), 4);
        assert_eq!(wf.tasks_at_level(2), vec![c]);
    }

    #[test]
    fn levels_are_updated_incrementally() {
        // b -> c -> d is built first, then a and e are attached in front of it
        let mut wf = Workflow::new();
        let ids: Vec<usize> = ["a", "b", "c", "d", "e"].iter().map(|n| wf.add_task(n, 1.)).collect();
        wf.add_dependency(ids[1], ids[2]).unwrap();
        wf.add_dependency(ids[2], ids[3]).unwrap();
        assert_eq!(wf.level_count(), 3);
        wf.add_dependency(ids[0], ids[1]).unwrap();
        wf.add_dependency(ids[4], ids[0]).unwrap();
        let levels: Vec<usize> = ids.iter().map(|&t| wf.get_task(t).level).collect();
        assert_eq!(levels, vec![1, 2, 3, 4, 0]);
        assert_eq!(wf.level_count(), 5);
        // repeated dependency changes nothing
        wf.add_dependency(ids[0], ids[1]).unwrap();
        assert_eq!(wf.get_task(ids[1]).predecessors.len(), 1);
    }

    #[test]
    fn incremental_levels_match_full_computation() {
        let mut rng = Pcg64::seed_from_u64(42);
        let mut wf = Workflow::new();
        for i in 0..300 {
            wf.add_task(&i.to_string(), 1.);
        }
        let mut edges: Vec<(usize, usize)> = (0..900)
            .map(|_| {
                let child = rng.gen_range(1..300);
                (rng.gen_range(0..child), child)
            })
            .collect();
        edges.shuffle(&mut rng);
        for (parent, child) in edges {
            wf.add_dependency(parent, child).unwrap();
        }
        let mut expected = wf.clone();
        expected.compute_levels().unwrap();
        for task_id in 0..wf.len() {
            assert_eq!(wf.get_task(task_id).level, expected.get_task(task_id).level);
        }
        assert_eq!(wf.level_count(), expected.level_count());
    }

    #[test]
    fn cycle_is_rejected() {
        let mut wf = Workflow::new();
        let a = wf.add_task("a", 1.);
        let b = wf.add_task("b", 1.);
        let c = wf.add_task("c", 1.);
        wf.add_dependency(a, b).unwrap();
        wf.add_dependency(b, c).unwrap();
        assert!(matches!(wf.add_dependency(b, a), Err(Error::Configuration(_))));
        assert!(matches!(wf.add_dependency(c, a), Err(Error::Configuration(_))));
        assert!(wf.get_task(a).predecessors.is_empty());
        assert_eq!(wf.level_count(), 3);
        assert!(wf.topological_order().is_ok());
    }

    #[test]
    fn yaml_workflow() {
        let wf = Workflow::from_yaml_str(
            r#"
tasks:
  - name: split
    runtime: 10
  - name: map1
    runtime: 5
    parents: [split]
  - name: map2
    runtime: 6
    parents: [split]
  - name: reduce
    runtime: 1
    parents: [map1, map2]
"#,
        )
        .unwrap();
        assert_eq!(wf.len(), 4);
        assert_eq!(wf.level_count(), 3);
        assert_eq!(wf.tasks_at_level(1), vec![1, 2]);
        assert_eq!(wf.get_task(3).predecessors.len(), 2);
    }

    #[test]
    fn yaml_unknown_parent() {
        let result = Workflow::from_yaml_str("tasks:\n  - name: a\n    runtime: 1\n    parents: [b]\n");
        assert!(matches!(result, Err(Error::Configuration(_))));
    }
}
