use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use dslab_core::simulation::Simulation;

use rand::prelude::*;
use rand_pcg::Pcg64;

use crate::clustering::{ClusteringMethod, ClusteringParams, Granularity};
use crate::config::SimulationConfig;
use crate::distribution::DistributionConfig;
use crate::engine::WorkflowEngine;
use crate::failure::{FailureKey, FailureParams, FailureScope, MonitorMode};
use crate::job::JobState;
use crate::overhead::OverheadParams;
use crate::reclustering::{ReclusteringAlgorithm, ReclusteringParams};
use crate::runner::{Start, WorkflowRunner};
use crate::trace_log::Event;
use crate::workflow::{TaskState, Workflow};

fn flat_workflow(n: usize, runtime: f64) -> Workflow {
    let mut wf = Workflow::new();
    for i in 0..n {
        wf.add_task(&format!("t{}", i), runtime);
    }
    wf
}

fn layered_workflow(levels: &[usize], runtime: f64) -> Workflow {
    let mut wf = Workflow::new();
    let mut previous: Vec<usize> = Vec::new();
    for (level, &count) in levels.iter().enumerate() {
        let current: Vec<usize> = (0..count)
            .map(|i| wf.add_task(&format!("l{}-{}", level, i), runtime))
            .collect();
        for &child in current.iter() {
            for &parent in previous.iter() {
                wf.add_dependency(parent, child).unwrap();
            }
        }
        previous = current;
    }
    wf
}

fn gen_workflow(rng: &mut Pcg64, num_tasks: usize) -> Workflow {
    let mut wf = Workflow::new();
    for i in 0..num_tasks {
        wf.add_task(&i.to_string(), rng.gen_range(1.0..10.0));
        if i > 0 {
            for _ in 0..rng.gen_range(0..3) {
                let parent = rng.gen_range(0..i);
                wf.add_dependency(parent, i).unwrap();
            }
        }
    }
    wf
}

fn failing_config(scope: FailureScope, algorithm: ReclusteringAlgorithm, time_to_failure: f64) -> SimulationConfig {
    SimulationConfig {
        clustering: ClusteringParams::horizontal_count(1),
        failure: FailureParams {
            monitor: MonitorMode::Job,
            scope,
            reclustering: ReclusteringParams::new(algorithm),
            ..Default::default()
        }
        .with_generator(Some(0), Some(0), DistributionConfig::fixed(time_to_failure)),
        ..Default::default()
    }
}

fn job_tasks(engine: &WorkflowEngine) -> Vec<Vec<usize>> {
    engine.jobs().iter().map(|j| j.tasks.clone()).collect()
}

#[test]
fn singleton_jobs_without_clustering() {
    let mut engine = WorkflowEngine::new(SimulationConfig::default(), flat_workflow(4, 1.)).unwrap();
    let stats = engine.run();

    assert_eq!(engine.jobs().len(), 4);
    for job in engine.jobs() {
        assert_eq!(job.len(), 1);
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.vm, Some(0));
    }
    assert!(engine.monitor().is_empty());
    assert!(engine.workflow().is_completed());
    assert_eq!(engine.job_state_counts(), vec![(JobState::Succeeded, 4)]);
    assert_eq!(engine.workflow().state_counts(), vec![(TaskState::Done, 4)]);
    assert_eq!(stats.makespan, 4.);
    assert_eq!(stats.jobs_succeeded, 4);
    assert_eq!(stats.jobs_failed, 0);
}

#[test]
fn horizontal_clustering_by_count() {
    let config = SimulationConfig {
        vm_count: 2,
        clustering: ClusteringParams::horizontal_count(2),
        ..Default::default()
    };
    let mut engine = WorkflowEngine::new(config, flat_workflow(10, 1.)).unwrap();
    let stats = engine.run();

    let jobs = engine.jobs();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs.iter().map(|j| j.len()).sum::<usize>(), 10);
    assert!(jobs.iter().all(|j| j.level == 0));
    assert!(jobs.iter().all(|j| j.state == JobState::Succeeded));
    assert_eq!(stats.makespan, 5.);
    assert_eq!(stats.mean_job_size, 5.);
}

#[test]
fn selective_reclustering_of_failed_job() {
    let config = failing_config(FailureScope::Job, ReclusteringAlgorithm::Sr, 5.);
    let mut engine = WorkflowEngine::new(config, flat_workflow(4, 2.)).unwrap();
    let stats = engine.run();

    assert_eq!(job_tasks(&engine), vec![vec![0, 1, 2, 3], vec![0, 1], vec![2, 3]]);
    assert_eq!(engine.job(0).unwrap().state, JobState::Reclustered);
    for job_id in [1, 2] {
        let job = engine.job(job_id).unwrap();
        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.reclustered_from, Some(0));
    }
    let record = engine.monitor().query_key(FailureKey::Level(0));
    assert_eq!(record.attempts, 3);
    assert_eq!(record.failures, 1);
    assert_eq!(record.failed_tasks, 4);
    assert!(engine.workflow().is_completed());
    assert_eq!(stats.jobs_reclustered, 1);
    assert_eq!(stats.wasted_time, 5.);
    assert_eq!(stats.makespan, 16.);
}

#[test]
fn completed_tasks_are_kept_after_vm_failure() {
    let config = failing_config(FailureScope::VmJob, ReclusteringAlgorithm::Sr, 5.);
    let mut engine = WorkflowEngine::new(config, flat_workflow(4, 2.)).unwrap();
    let stats = engine.run();

    // tasks 0 and 1 finish at 2 and 4, before the failure at 5
    assert_eq!(job_tasks(&engine), vec![vec![0, 1, 2, 3], vec![2], vec![3]]);
    assert_eq!(engine.workflow().get_task(0).attempts, 1);
    assert_eq!(engine.workflow().get_task(3).attempts, 2);
    assert!(engine.workflow().is_completed());
    assert_eq!(stats.makespan, 12.);
    assert_eq!(stats.task_attempts, 6);
}

#[test]
fn noop_resubmits_tasks_individually() {
    let config = failing_config(FailureScope::Job, ReclusteringAlgorithm::Noop, 5.);
    let mut engine = WorkflowEngine::new(config, flat_workflow(4, 2.)).unwrap();
    let stats = engine.run();

    assert_eq!(engine.job(0).unwrap().state, JobState::Failed);
    assert_eq!(engine.jobs().len(), 5);
    assert!(engine.jobs()[1..].iter().all(|j| j.len() == 1 && j.reclustered_from.is_none()));
    assert_eq!(stats.jobs_reclustered, 0);
    assert!(engine.workflow().is_completed());
}

#[test]
fn dynamic_reclustering_shrinks_next_level() {
    let mut config = failing_config(FailureScope::Job, ReclusteringAlgorithm::Dr, 5.);
    config.vm_count = 2;
    let mut engine = WorkflowEngine::new(config, layered_workflow(&[8, 8], 1.)).unwrap();
    engine.run();

    // all tasks of the first attempt failed, so the estimated task failure probability is 1
    assert_eq!(engine.clustering().dynamic_size(), Some(1));
    let level_one: Vec<_> = engine.jobs().into_iter().filter(|j| j.level == 1).collect();
    assert_eq!(level_one.len(), 8);
    assert!(engine.workflow().is_completed());
}

#[test]
fn dynamic_reclustering_keeps_fine_levels() {
    let run = |algorithm| {
        let config = SimulationConfig {
            vm_count: 40,
            clustering: ClusteringParams::horizontal_count(20),
            failure: FailureParams {
                monitor: MonitorMode::All,
                scope: FailureScope::Job,
                reclustering: ReclusteringParams::new(algorithm),
                ..Default::default()
            }
            .with_generator(Some(19), Some(0), DistributionConfig::fixed(4.)),
            ..Default::default()
        };
        let mut engine = WorkflowEngine::new(config, layered_workflow(&[100, 20], 1.)).unwrap();
        let stats = engine.run();
        assert!(stats.jobs_failed > 0);
        assert!(engine.workflow().is_completed());
        let mut sizes: Vec<usize> = engine.jobs().iter().filter(|j| j.level == 1).map(|j| j.len()).collect();
        sizes.sort_unstable();
        sizes
    };
    let noop = run(ReclusteringAlgorithm::Noop);
    let dr = run(ReclusteringAlgorithm::Dr);
    assert_eq!(noop, vec![1; 20]);
    assert_eq!(dr, noop);
}

#[test]
fn runner_is_a_simulation_component() {
    let mut sim = Simulation::new(123);
    let runner = Rc::new(RefCell::new(
        WorkflowRunner::new(
            SimulationConfig::default(),
            layered_workflow(&[3, 2], 1.),
            sim.create_context("runner"),
        )
        .unwrap(),
    ));
    let runner_id = sim.add_handler("runner", runner.clone());
    sim.create_context("client").emit_now(Start {}, runner_id);
    sim.step_until_no_events();

    assert!(runner.borrow().workflow().is_completed());
    assert_eq!(runner.borrow().jobs().count(), 5);
    assert_eq!(runner.borrow().run_stats().makespan, sim.time());
    assert_eq!(sim.time(), 5.);
}

#[test]
fn dynamic_clustering_sets_next_level_granularity() {
    let mut config = failing_config(FailureScope::VmJob, ReclusteringAlgorithm::Dc, 3.5);
    config.overhead = OverheadParams {
        fixed: 0.5,
        ..Default::default()
    };
    let mut engine = WorkflowEngine::new(config, layered_workflow(&[6, 6], 1.)).unwrap();
    engine.run();

    assert!(matches!(engine.clustering().granularity_for(1), Some(Granularity::Size(_))));
    assert!(engine.workflow().is_completed());
}

#[test]
fn tasks_are_abandoned_after_max_attempts() {
    let mut wf = flat_workflow(2, 1.);
    wf.add_dependency(0, 1).unwrap();
    let config = SimulationConfig {
        max_attempts: 3,
        failure: FailureParams {
            scope: FailureScope::Job,
            ..Default::default()
        }
        .with_generator(None, Some(0), DistributionConfig::fixed(0.5)),
        ..Default::default()
    };
    let mut engine = WorkflowEngine::new(config, wf).unwrap();
    let stats = engine.run();

    assert_eq!(engine.workflow().get_task(0).state, TaskState::Abandoned);
    assert_eq!(engine.workflow().get_task(0).attempts, 3);
    assert_eq!(stats.jobs_failed, 3);
    assert_eq!(stats.abandoned_tasks, 1);
    assert_eq!(stats.unfinished_tasks, 1);
    assert_eq!(stats.completed_tasks, 0);
    assert!(engine
        .trace_log()
        .events
        .iter()
        .any(|e| matches!(e, Event::TaskAbandoned { task_id: 0, .. })));
}

#[test]
fn overheads_delay_execution() {
    let config = SimulationConfig {
        overhead: OverheadParams {
            fixed: 1.,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut engine = WorkflowEngine::new(config, flat_workflow(2, 1.)).unwrap();
    let stats = engine.run();

    // clustering 1, engine + queue 2, execution 1, postscript 1 for every job on a single VM
    assert_eq!(stats.makespan, 8.);
    assert_eq!(stats.total_overhead, 8.);
}

#[test]
fn vm_speed_scales_execution() {
    let config = SimulationConfig {
        vm_speed: 2.,
        ..Default::default()
    };
    let mut engine = WorkflowEngine::new(config, flat_workflow(3, 4.)).unwrap();
    assert_eq!(engine.run().makespan, 6.);
}

#[test]
fn vertical_clustering_runs_chains() {
    let mut wf = flat_workflow(5, 1.);
    for i in 1..5 {
        wf.add_dependency(i - 1, i).unwrap();
    }
    let config = SimulationConfig {
        clustering: ClusteringParams::new(ClusteringMethod::Vertical),
        ..Default::default()
    };
    let mut engine = WorkflowEngine::new(config, wf).unwrap();
    let stats = engine.run();
    assert_eq!(job_tasks(&engine), vec![vec![0, 1, 2, 3, 4]]);
    assert_eq!(stats.makespan, 5.);
}

#[test]
fn step_for_duration_and_abort() {
    let mut engine = WorkflowEngine::new(SimulationConfig::default(), flat_workflow(4, 1.)).unwrap();
    assert!(engine.step_for_duration(2.5));
    assert!(engine.time() <= 2.5);
    assert_eq!(engine.workflow().completed_task_count(), 2);

    engine.abort();
    assert!(engine.is_aborted());
    assert!(!engine.step());
    let stats = engine.run();
    assert_eq!(stats.completed_tasks, 2);
    assert_eq!(stats.unfinished_tasks, 2);
    assert!(engine.monitor().is_empty());
}

fn random_config(rng: &mut Pcg64, method: ClusteringMethod, algorithm: ReclusteringAlgorithm) -> SimulationConfig {
    let mut clustering = ClusteringParams::new(method);
    match method {
        ClusteringMethod::Horizontal => clustering.clusters_num = Some(rng.gen_range(1..5)),
        ClusteringMethod::Vertical => clustering.max_chain_length = Some(rng.gen_range(2..6)),
        ClusteringMethod::None => {}
    }
    let scope = if rng.gen_bool(0.5) {
        FailureScope::Job
    } else {
        FailureScope::VmJob
    };
    SimulationConfig {
        seed: rng.gen(),
        vm_count: rng.gen_range(1..6),
        max_attempts: 1000,
        overhead: OverheadParams {
            fixed: 0.1,
            ..Default::default()
        },
        clustering,
        failure: FailureParams {
            monitor: MonitorMode::VmJob,
            scope,
            reclustering: ReclusteringParams::new(algorithm),
            ..Default::default()
        }
        .with_generator(None, None, DistributionConfig::weibull(60., 0.78)),
        ..Default::default()
    }
}

#[test]
fn random_workflows_are_completed() {
    let mut rng = Pcg64::seed_from_u64(1);
    for method in [ClusteringMethod::None, ClusteringMethod::Horizontal, ClusteringMethod::Vertical] {
        for algorithm in [
            ReclusteringAlgorithm::Noop,
            ReclusteringAlgorithm::Sr,
            ReclusteringAlgorithm::Dr,
            ReclusteringAlgorithm::Dc,
        ] {
            let wf = gen_workflow(&mut rng, 60);
            let config = random_config(&mut rng, method, algorithm);
            let mut engine = WorkflowEngine::new(config, wf).unwrap();
            let stats = engine.run();
            assert!(
                engine.workflow().is_completed(),
                "{:?}/{:?}: {} tasks completed",
                method,
                algorithm,
                stats.completed_tasks
            );
            assert!(engine.jobs().iter().all(|j| j.state.is_terminal()));

            // every task is completed exactly once
            let mut completions: HashMap<usize, usize> = HashMap::new();
            for event in engine.trace_log().events.iter() {
                let tasks = match event {
                    Event::JobSucceeded { job_id, .. } => engine.job(*job_id).unwrap().tasks.clone(),
                    Event::JobFailed { completed, .. } => completed.clone(),
                    _ => continue,
                };
                for task in tasks {
                    *completions.entry(task).or_default() += 1;
                }
            }
            assert_eq!(completions.len(), engine.workflow().len());
            assert!(completions.values().all(|&c| c == 1));
        }
    }
}

#[test]
fn runs_are_reproducible() {
    let mut rng = Pcg64::seed_from_u64(7);
    let wf = gen_workflow(&mut rng, 80);
    let mut config = random_config(&mut rng, ClusteringMethod::Horizontal, ReclusteringAlgorithm::Dr);
    config.overhead.queue.levels.insert(0, DistributionConfig::gamma(2., 1.5));
    config.overhead.engine.fixed = Some(0.3);

    let mut engine = WorkflowEngine::new(config.clone(), wf.clone()).unwrap();
    let first = serde_json::to_string(&engine.run()).unwrap();
    let first_events = engine.trace_log().events.clone();
    assert!(engine.run_stats().jobs_failed > 0);

    engine.reset();
    assert_eq!(engine.time(), 0.);
    assert!(engine.jobs().is_empty());
    assert_eq!(serde_json::to_string(&engine.run()).unwrap(), first);
    assert_eq!(engine.trace_log().events, first_events);

    let mut other = WorkflowEngine::new(config, wf).unwrap();
    assert_eq!(serde_json::to_string(&other.run()).unwrap(), first);
}
