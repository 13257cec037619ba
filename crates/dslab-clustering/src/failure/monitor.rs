//! Failure monitoring.

use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock};

use serde::{Deserialize, Serialize};

use crate::failure::generator::Decision;
use crate::job::Job;

/// Defines how failure observations are classified.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MonitorMode {
    /// Observations are discarded.
    #[default]
    None,
    /// Classified by job level.
    Job,
    /// Classified by VM.
    Vm,
    /// Classified by VM and job level.
    VmJob,
    /// Not classified, all observations go to a single bucket.
    All,
}

/// Aggregation bucket of failure observations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKey {
    Level(usize),
    Vm(usize),
    VmLevel(usize, usize),
    All,
}

/// Aggregated failure statistics of a bucket.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FailureRecord {
    pub key: Option<FailureKey>,
    /// Number of recorded job executions.
    pub attempts: u64,
    /// Number of failed job executions.
    pub failures: u64,
    /// Number of tasks in recorded job executions.
    pub tasks: u64,
    /// Number of tasks that were not executed because of failures.
    pub failed_tasks: u64,
    /// Execution time lost in failed attempts.
    pub wasted_time: f64,
}

impl FailureRecord {
    fn empty(key: Option<FailureKey>) -> Self {
        Self {
            key,
            ..Default::default()
        }
    }

    /// Fraction of failed job executions.
    pub fn failure_rate(&self) -> f64 {
        if self.attempts == 0 {
            0.
        } else {
            self.failures as f64 / self.attempts as f64
        }
    }

    /// Fraction of tasks lost in failed executions, used as the per-task failure probability estimate.
    pub fn task_failure_rate(&self) -> f64 {
        if self.tasks == 0 {
            0.
        } else {
            self.failed_tasks as f64 / self.tasks as f64
        }
    }

    fn add(&mut self, other: &FailureRecord) {
        self.attempts += other.attempts;
        self.failures += other.failures;
        self.tasks += other.tasks;
        self.failed_tasks += other.failed_tasks;
        self.wasted_time += other.wasted_time;
    }
}

/// Accumulates job outcomes at the configured granularity.
///
/// Recording is safe from multiple threads: the bucket table is guarded by a read-write lock
/// and every bucket by its own mutex.
pub struct FailureMonitor {
    mode: MonitorMode,
    records: RwLock<BTreeMap<FailureKey, Mutex<FailureRecord>>>,
}

impl FailureMonitor {
    pub fn new(mode: MonitorMode) -> Self {
        Self {
            mode,
            records: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn mode(&self) -> MonitorMode {
        self.mode
    }

    /// Returns the bucket for an observation of a job at `level` executed on `vm`.
    pub fn key_for(&self, vm: usize, level: usize) -> Option<FailureKey> {
        match self.mode {
            MonitorMode::None => None,
            MonitorMode::Job => Some(FailureKey::Level(level)),
            MonitorMode::Vm => Some(FailureKey::Vm(vm)),
            MonitorMode::VmJob => Some(FailureKey::VmLevel(vm, level)),
            MonitorMode::All => Some(FailureKey::All),
        }
    }

    /// Records the outcome of an execution of `job` on `vm`.
    pub fn record(&self, job: &Job, vm: usize, decision: &Decision) {
        let key = match self.key_for(vm, job.level) {
            Some(key) => key,
            None => return,
        };
        let update = |record: &mut FailureRecord| {
            record.attempts += 1;
            record.tasks += job.tasks.len() as u64;
            if decision.is_failed() {
                record.failures += 1;
                record.failed_tasks += decision.unexecuted.len() as u64;
                record.wasted_time += decision.elapsed;
            }
        };
        {
            let records = self.records.read().unwrap_or_else(|e| e.into_inner());
            if let Some(record) = records.get(&key) {
                update(&mut *record.lock().unwrap_or_else(|e| e.into_inner()));
                return;
            }
        }
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let record = records
            .entry(key)
            .or_insert_with(|| Mutex::new(FailureRecord::empty(Some(key))));
        update(record.get_mut().unwrap_or_else(|e| e.into_inner()));
    }

    /// Returns statistics of the bucket containing observations for (`vm`, `level`).
    pub fn query(&self, vm: usize, level: usize) -> FailureRecord {
        match self.key_for(vm, level) {
            Some(key) => self.query_key(key),
            None => FailureRecord::empty(None),
        }
    }

    pub fn query_key(&self, key: FailureKey) -> FailureRecord {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        match records.get(&key) {
            Some(record) => record.lock().unwrap_or_else(|e| e.into_inner()).clone(),
            None => FailureRecord::empty(Some(key)),
        }
    }

    /// Returns all non-empty buckets ordered by key.
    pub fn records(&self) -> Vec<FailureRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records
            .values()
            .map(|r| r.lock().unwrap_or_else(|e| e.into_inner()).clone())
            .collect()
    }

    /// Returns statistics over all buckets.
    pub fn total(&self) -> FailureRecord {
        let mut total = FailureRecord::empty(None);
        for record in self.records() {
            total.add(&record);
        }
        total
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap_or_else(|e| e.into_inner()).is_empty()
    }

    /// Drops all observations.
    pub fn reset(&self) {
        self.records.write().unwrap_or_else(|e| e.into_inner()).clear();
    }
}
