use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use env_logger::Builder;
use log::error;

use dslab_clustering::config::SimulationConfig;
use dslab_clustering::engine::WorkflowEngine;
use dslab_clustering::error::Error;
use dslab_clustering::reclustering::ReclusteringAlgorithm;
use dslab_clustering::run_stats::RunStats;
use dslab_clustering::workflow::Workflow;

const ALGORITHMS: &[ReclusteringAlgorithm] = &[
    ReclusteringAlgorithm::Noop,
    ReclusteringAlgorithm::Sr,
    ReclusteringAlgorithm::Dr,
    ReclusteringAlgorithm::Dc,
];

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
/// Simulates workflow execution with task clustering and failures
struct Args {
    /// Path to YAML file with simulation configuration
    #[arg(short, long)]
    config: PathBuf,

    /// Path to YAML file with workflow
    #[arg(short, long)]
    workflow: PathBuf,

    /// Path to produced JSON file with run statistics (printed to stdout if not set)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Path to produced JSON file with trace log
    #[arg(short, long)]
    trace_log: Option<PathBuf>,

    /// Run the workflow with every reclustering algorithm and print a summary
    #[arg(long)]
    compare: bool,
}

fn run(config: SimulationConfig, workflow: Workflow, trace_log: Option<&PathBuf>) -> Result<RunStats, Error> {
    let mut engine = WorkflowEngine::new(config, workflow)?;
    engine.enable_trace_log(trace_log.is_some());
    let stats = engine.run();
    if let Some(path) = trace_log {
        engine.trace_log().save_to_file(&path.to_string_lossy())?;
    }
    Ok(stats)
}

fn compare(config: &SimulationConfig, workflow: &Workflow) -> Result<Vec<RunStats>, Error> {
    println!(
        "{:>6}  {:>10}  {:>6}  {:>6}  {:>10}  {:>9}",
        "alg", "makespan", "jobs", "failed", "wasted", "abandoned"
    );
    let mut results = Vec::new();
    for &algorithm in ALGORITHMS {
        let mut config = config.clone();
        config.failure.reclustering.algorithm = algorithm;
        let stats = run(config, workflow.clone(), None)?;
        println!(
            "{:>6}  {:>10.2}  {:>6}  {:>6}  {:>10.2}  {:>9}",
            stats.reclustering,
            stats.makespan,
            stats.jobs_dispatched,
            stats.jobs_failed,
            stats.wasted_time,
            stats.abandoned_tasks
        );
        results.push(stats);
    }
    Ok(results)
}

fn execute(args: &Args) -> Result<(), Error> {
    let config = SimulationConfig::from_file(&args.config)?;
    let workflow = Workflow::from_yaml(&args.workflow)?;

    let json = if args.compare {
        serde_json::to_string_pretty(&compare(&config, &workflow)?)
    } else {
        serde_json::to_string_pretty(&run(config, workflow, args.trace_log.as_ref())?)
    }
    .map_err(|e| Error::Parse(e.to_string()))?;

    match &args.output {
        Some(path) => std::fs::File::create(path)?.write_all(json.as_bytes())?,
        None if !args.compare => println!("{}", json),
        None => {}
    }
    Ok(())
}

fn main() -> ExitCode {
    Builder::from_default_env()
        .format(|buf, record| writeln!(buf, "{}", record.args()))
        .init();

    let args = Args::parse();
    match execute(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
