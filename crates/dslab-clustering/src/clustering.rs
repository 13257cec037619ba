//! Task clustering.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::job::Job;
use crate::workflow::Workflow;

/// Clustering method.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ClusteringMethod {
    /// Every task becomes its own job.
    #[default]
    None,
    /// Tasks of the same level are merged.
    Horizontal,
    /// Tasks along a single dependency chain are merged.
    Vertical,
}

/// How horizontal clustering distributes tasks between jobs.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PartitionMode {
    /// Consecutive tasks form a job, job sizes differ by at most one.
    #[default]
    Contiguous,
    /// Task `i` goes to job `i mod k`.
    RoundRobin,
}

/// Target granularity of horizontal clustering.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// Desired number of jobs per level.
    Count(usize),
    /// Desired number of tasks per job.
    Size(usize),
}

impl Granularity {
    /// Returns the number of jobs for the given number of tasks.
    pub fn job_count(&self, task_count: usize) -> usize {
        if task_count == 0 {
            return 0;
        }
        match *self {
            Granularity::Count(count) => count.min(task_count),
            Granularity::Size(size) => (task_count - 1) / size.max(1) + 1,
        }
    }

    /// Returns the largest job size for the given number of tasks.
    pub fn job_size(&self, task_count: usize) -> usize {
        match self.job_count(task_count) {
            0 => 0,
            count => (task_count - 1) / count + 1,
        }
    }

    fn validate(&self) -> Result<()> {
        match *self {
            Granularity::Count(0) => Err(Error::configuration("cluster count must be positive")),
            Granularity::Size(0) => Err(Error::configuration("cluster size must be positive")),
            _ => Ok(()),
        }
    }
}

/// Clustering configuration.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct ClusteringParams {
    #[serde(default)]
    pub method: ClusteringMethod,
    /// Desired number of jobs per level, takes precedence over `clusters_size`.
    #[serde(default)]
    pub clusters_num: Option<usize>,
    /// Desired number of tasks per job.
    #[serde(default)]
    pub clusters_size: Option<usize>,
    #[serde(default)]
    pub partition: PartitionMode,
    /// Maximum number of tasks in a vertical cluster.
    #[serde(default)]
    pub max_chain_length: Option<usize>,
    /// Per-level granularity overriding the default one.
    #[serde(default)]
    pub levels: BTreeMap<usize, Granularity>,
}

impl ClusteringParams {
    pub fn new(method: ClusteringMethod) -> Self {
        Self {
            method,
            ..Default::default()
        }
    }

    pub fn horizontal_count(count: usize) -> Self {
        Self {
            clusters_num: Some(count),
            ..Self::new(ClusteringMethod::Horizontal)
        }
    }

    pub fn horizontal_size(size: usize) -> Self {
        Self {
            clusters_size: Some(size),
            ..Self::new(ClusteringMethod::Horizontal)
        }
    }

    pub fn default_granularity(&self) -> Option<Granularity> {
        self.clusters_num
            .map(Granularity::Count)
            .or(self.clusters_size.map(Granularity::Size))
    }

    pub fn validate(&self) -> Result<()> {
        if let Some(granularity) = self.default_granularity() {
            granularity.validate()?;
        }
        if self.clusters_size == Some(0) {
            return Err(Error::configuration("cluster size must be positive"));
        }
        for granularity in self.levels.values() {
            granularity.validate()?;
        }
        if self.max_chain_length == Some(0) {
            return Err(Error::configuration("max chain length must be positive"));
        }
        if self.method == ClusteringMethod::Horizontal && self.default_granularity().is_none() && self.levels.is_empty()
        {
            return Err(Error::configuration(
                "horizontal clustering requires clusters_num or clusters_size",
            ));
        }
        Ok(())
    }
}

/// Partitions workflow tasks into jobs.
///
/// Besides the static configuration, the policy keeps the granularity adjustments made by
/// [reclustering](crate::reclustering) which apply to levels clustered afterwards.
pub struct ClusteringPolicy {
    params: ClusteringParams,
    dynamic_size: Option<usize>,
    dynamic_levels: BTreeMap<usize, Granularity>,
    next_job_id: usize,
}

impl ClusteringPolicy {
    pub fn new(params: ClusteringParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            params,
            dynamic_size: None,
            dynamic_levels: BTreeMap::new(),
            next_job_id: 0,
        })
    }

    pub fn params(&self) -> &ClusteringParams {
        &self.params
    }

    pub fn method(&self) -> ClusteringMethod {
        self.params.method
    }

    /// Returns granularity used for the level, if the level is clustered horizontally.
    ///
    /// The dynamic job size is not part of it, it only bounds the job size (see [`Self::job_count`]).
    pub fn granularity_for(&self, level: usize) -> Option<Granularity> {
        self.dynamic_levels
            .get(&level)
            .copied()
            .or_else(|| self.params.levels.get(&level).copied())
            .or_else(|| self.params.default_granularity())
    }

    /// Returns the number of horizontal jobs for a level with the given number of tasks.
    ///
    /// The dynamic job size splits the jobs produced by the level granularity further,
    /// it never merges them into larger ones.
    pub fn job_count(&self, level: usize, task_count: usize) -> usize {
        let count = self
            .granularity_for(level)
            .map_or(task_count, |g| g.job_count(task_count));
        match self.dynamic_size {
            Some(size) => count.max(Granularity::Size(size).job_count(task_count)),
            None => count,
        }
    }

    /// Returns the statically configured job size for a level with the given number of tasks.
    pub fn configured_size(&self, level: usize, task_count: usize) -> usize {
        let granularity = match self.params.method {
            ClusteringMethod::None => None,
            ClusteringMethod::Horizontal => self
                .params
                .levels
                .get(&level)
                .copied()
                .or_else(|| self.params.default_granularity()),
            ClusteringMethod::Vertical => self.params.max_chain_length.map(Granularity::Size),
        };
        granularity.map_or(1, |g| g.job_size(task_count).max(1))
    }

    /// Limits the job size of all levels clustered from now on.
    pub fn set_dynamic_size(&mut self, size: Option<usize>) {
        self.dynamic_size = size.map(|s| s.max(1));
    }

    pub fn dynamic_size(&self) -> Option<usize> {
        self.dynamic_size
    }

    /// Sets the granularity for a single level, if it is not clustered yet.
    pub fn set_level_granularity(&mut self, level: usize, granularity: Granularity) {
        self.dynamic_levels.insert(level, granularity);
    }

    /// Forgets all dynamic adjustments and restarts job numbering.
    pub fn reset(&mut self) {
        self.dynamic_size = None;
        self.dynamic_levels.clear();
        self.next_job_id = 0;
    }

    fn max_chain_length(&self) -> Option<usize> {
        match (self.params.max_chain_length, self.dynamic_size) {
            (Some(length), Some(size)) => Some(length.min(size)),
            (length, size) => length.or(size),
        }
    }

    fn new_job(&mut self, tasks: Vec<usize>, workflow: &Workflow) -> Job {
        let id = self.next_job_id;
        self.next_job_id += 1;
        let level = tasks.first().map_or(0, |&t| workflow.get_task(t).level);
        Job::new(id, level, tasks)
    }

    /// Groups the given tasks into jobs according to the clustering method.
    ///
    /// For horizontal clustering the tasks are expected to belong to `level`,
    /// for vertical clustering chains are built among the given tasks.
    pub fn cluster(&mut self, level: usize, tasks: &[usize], workflow: &Workflow) -> Vec<Job> {
        if tasks.is_empty() {
            return Vec::new();
        }
        let groups = match self.params.method {
            ClusteringMethod::None => tasks.iter().map(|&t| vec![t]).collect(),
            ClusteringMethod::Horizontal => {
                partition(tasks, self.job_count(level, tasks.len()), self.params.partition)
            }
            ClusteringMethod::Vertical => chains(tasks, self.max_chain_length(), workflow),
        };
        let cyclic = cyclic_groups(&groups, workflow);
        if !cyclic.is_empty() {
            warn!(
                "{} of {} jobs of level {} form a dependency cycle, falling back to singleton jobs",
                cyclic.len(),
                groups.len(),
                level
            );
            return self.singletons(tasks, workflow);
        }
        debug!(
            "clustered {} tasks of level {} into {} jobs ({:?})",
            tasks.len(),
            level,
            groups.len(),
            self.params.method
        );
        groups.into_iter().map(|group| self.new_job(group, workflow)).collect()
    }

    /// Groups the whole workflow into chains, ignoring level boundaries.
    pub fn cluster_vertical(&mut self, workflow: &Workflow) -> Vec<Job> {
        let tasks: Vec<usize> = (0..workflow.len()).collect();
        self.cluster(0, &tasks, workflow)
    }

    /// Wraps every task into its own job.
    pub fn singletons(&mut self, tasks: &[usize], workflow: &Workflow) -> Vec<Job> {
        tasks.iter().map(|&t| self.new_job(vec![t], workflow)).collect()
    }

    /// Repackages tasks into consecutive jobs of at most `size` tasks.
    pub fn repackage(&mut self, tasks: &[usize], size: usize, workflow: &Workflow) -> Vec<Job> {
        let size = size.max(1);
        tasks
            .chunks(size)
            .map(|chunk| self.new_job(chunk.to_vec(), workflow))
            .collect()
    }
}

fn partition(tasks: &[usize], job_count: usize, mode: PartitionMode) -> Vec<Vec<usize>> {
    let job_count = job_count.clamp(1, tasks.len());
    let mut groups = vec![Vec::new(); job_count];
    match mode {
        PartitionMode::Contiguous => {
            let base = tasks.len() / job_count;
            let extra = tasks.len() % job_count;
            let mut iter = tasks.iter();
            for (i, group) in groups.iter_mut().enumerate() {
                let size = base + usize::from(i < extra);
                group.extend(iter.by_ref().take(size));
            }
        }
        PartitionMode::RoundRobin => {
            for (i, &task) in tasks.iter().enumerate() {
                groups[i % job_count].push(task);
            }
        }
    }
    groups
}

fn chains(tasks: &[usize], max_length: Option<usize>, workflow: &Workflow) -> Vec<Vec<usize>> {
    let allowed: HashSet<usize> = tasks.iter().copied().collect();
    let mut order = tasks.to_vec();
    order.sort_by_key(|&t| (workflow.get_task(t).level, t));
    let max_length = max_length.unwrap_or(usize::MAX);

    let mut assigned: HashSet<usize> = HashSet::new();
    let mut groups = Vec::new();
    for task_id in order {
        if assigned.contains(&task_id) {
            continue;
        }
        assigned.insert(task_id);
        let mut chain = vec![task_id];
        let mut current = task_id;
        while chain.len() < max_length {
            let task = workflow.get_task(current);
            if task.successors.len() != 1 {
                break;
            }
            let next = *task.successors.iter().next().unwrap();
            if !allowed.contains(&next)
                || assigned.contains(&next)
                || workflow.get_task(next).predecessors.len() != 1
            {
                break;
            }
            assigned.insert(next);
            chain.push(next);
            current = next;
        }
        groups.push(chain);
    }
    groups
}

/// Checks that the jobs do not form a dependency cycle.
///
/// Tasks that belong to none of the jobs are treated as singleton jobs, so cycles passing through
/// them are detected as well.
pub fn check_acyclic(jobs: &[Job], workflow: &Workflow) -> Result<()> {
    let groups: Vec<&[usize]> = jobs.iter().map(|job| job.tasks.as_slice()).collect();
    let cyclic = cyclic_groups(&groups, workflow);
    if cyclic.is_empty() {
        return Ok(());
    }
    Err(Error::CyclicCluster {
        jobs: cyclic.into_iter().map(|i| jobs[i].id).collect(),
    })
}

/// Returns indices of the task groups that are left with unresolved dependencies
/// after topological sorting of the group graph.
fn cyclic_groups<G: AsRef<[usize]>>(groups: &[G], workflow: &Workflow) -> Vec<usize> {
    let task_count = workflow.len();
    // nodes [0, groups.len()) are groups, the rest are tasks outside of them
    let mut node_of: Vec<usize> = (0..task_count).map(|t| groups.len() + t).collect();
    for (i, group) in groups.iter().enumerate() {
        for &t in group.as_ref().iter() {
            node_of[t] = i;
        }
    }
    let node_count = groups.len() + task_count;
    let mut edges: HashMap<usize, HashSet<usize>> = HashMap::new();
    let mut in_degree = vec![0; node_count];
    for (t, task) in workflow.get_tasks().iter().enumerate() {
        for &s in task.successors.iter() {
            let (from, to) = (node_of[t], node_of[s]);
            if from != to && edges.entry(from).or_default().insert(to) {
                in_degree[to] += 1;
            }
        }
    }
    let mut queue: VecDeque<usize> = (0..node_count).filter(|&n| in_degree[n] == 0).collect();
    let mut visited = 0;
    while let Some(node) = queue.pop_front() {
        visited += 1;
        if let Some(targets) = edges.get(&node) {
            for &to in targets.iter() {
                in_degree[to] -= 1;
                if in_degree[to] == 0 {
                    queue.push_back(to);
                }
            }
        }
    }
    if visited == node_count {
        return Vec::new();
    }
    (0..groups.len()).filter(|&i| in_degree[i] > 0).collect()
}
