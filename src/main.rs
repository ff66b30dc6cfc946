//! dagkit CLI Entry Point
//!
//! Provides a command-line interface for inspecting and test-running DAGs.
//!
//! # Usage
//!
//! ```bash
//! # List built-in DAGs
//! dagkit --list
//!
//! # Run a built-in DAG
//! dagkit example_etl_pipeline
//!
//! # Run a DAG from YAML
//! dagkit dags/parallel_tasks_example.yaml --parallel 3 --timeline
//!
//! # Show structure without running
//! dagkit parallel_tasks_example --show
//!
//! # Dry run mode (list tasks in execution order)
//! dagkit example_etl_pipeline --dry-run
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use colored::Colorize;
use log::{error, info};

use dagkit::execution::{Engine, RunReport};
use dagkit::workflow::{load_dag, save_dag, topological_order, Dag, TaskStatus};
use dagkit::{pipelines, APP_NAME, VERSION};

/// Command-line configuration parsed from arguments.
#[derive(Debug)]
struct Config {
    target: Option<String>,
    list: bool,
    show: bool,
    export_path: Option<PathBuf>,
    dry_run: bool,
    working_dir: Option<PathBuf>,
    max_parallel: Option<usize>,
    timeline: bool,
    json: bool,
    verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: None,
            list: false,
            show: false,
            export_path: None,
            dry_run: false,
            working_dir: None,
            max_parallel: None,
            timeline: false,
            json: false,
            verbose: false,
        }
    }
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

fn print_banner() {
    println!();
    println!("{} v{}", APP_NAME.bold(), VERSION);
    println!("Declarative Workflow DAGs");
    println!();
}

fn print_usage() {
    println!("Usage: dagkit [OPTIONS] <DAG>");
    println!();
    println!("Arguments:");
    println!("  <DAG>               Built-in DAG id or path to a DAG YAML file");
    println!();
    println!("Options:");
    println!("  --list              List built-in DAGs");
    println!("  --show              Show tasks, edges and execution order");
    println!("  --export PATH       Write the DAG as YAML");
    println!("  --dry-run           List tasks in execution order without running them");
    println!("  --parallel N        Maximum parallel tasks (default: CPU count)");
    println!("  --working-dir PATH  Working directory for bash tasks");
    println!("  --timeline          Print a Gantt chart after the run");
    println!("  --json              Print the run report as JSON");
    println!("  --verbose           Enable debug logging");
    println!("  --help              Show this help message");
    println!("  --version           Show version information");
    println!();
    println!("Examples:");
    println!("  dagkit --list");
    println!("  dagkit example_etl_pipeline");
    println!("  dagkit dags/parallel_tasks_example.yaml --parallel 3 --timeline");
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut config = Config::default();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("{} {}", APP_NAME, VERSION);
                std::process::exit(0);
            }
            "--list" => config.list = true,
            "--show" => config.show = true,
            "--dry-run" => config.dry_run = true,
            "--timeline" => config.timeline = true,
            "--json" => config.json = true,
            "--verbose" | "-v" => config.verbose = true,
            "--export" => {
                i += 1;
                let path = args.get(i).ok_or("--export requires a path argument")?;
                config.export_path = Some(PathBuf::from(path));
            }
            "--working-dir" => {
                i += 1;
                let path = args.get(i).ok_or("--working-dir requires a path argument")?;
                config.working_dir = Some(PathBuf::from(path));
            }
            "--parallel" => {
                i += 1;
                let value = args.get(i).ok_or("--parallel requires a number argument")?;
                let max_parallel = value
                    .parse()
                    .ok()
                    .filter(|n: &usize| *n > 0)
                    .ok_or_else(|| format!("Invalid parallel value: {}", value))?;
                config.max_parallel = Some(max_parallel);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => {
                if config.target.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                config.target = Some(arg.clone());
            }
        }
        i += 1;
    }

    if config.target.is_none() && !config.list {
        return Err("Missing <DAG> argument".to_string());
    }

    Ok(config)
}

/// Checks the working directory exists.
fn check_working_directory(dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if !dir.exists() {
        return Err(format!("Working directory does not exist: {}", dir.display()).into());
    }
    if !dir.is_dir() {
        return Err(format!("Path is not a directory: {}", dir.display()).into());
    }
    info!("Working directory: {}", dir.display());
    Ok(())
}

/// Resolves a built-in DAG id or a YAML path.
fn resolve_dag(target: &str) -> Result<Dag, Box<dyn std::error::Error>> {
    if let Some(dag) = pipelines::builtin(target) {
        info!("Using built-in DAG: {}", target);
        return Ok(dag?);
    }

    if Path::new(target).exists() {
        info!("Loading DAG: {}", target);
        return match load_dag(target) {
            Ok(dag) => Ok(dag),
            Err(e) => {
                error!("Failed to load DAG: {}", e);
                Err(format!("Could not load DAG from '{}': {}", target, e).into())
            }
        };
    }

    Err(format!(
        "'{}' is neither a built-in DAG nor an existing file (try --list)",
        target
    )
    .into())
}

fn print_catalog() {
    println!("Built-in DAGs:");
    for pipeline in pipelines::list() {
        println!("  {:28} {}", pipeline.dag_id.cyan(), pipeline.description);
    }
}

fn print_structure(dag: &Dag) -> Result<(), Box<dyn std::error::Error>> {
    println!("DAG: {}", dag.dag_id.bold());
    if let Some(ref description) = dag.description {
        println!("  {}", description);
    }
    println!(
        "  schedule: {}  start: {}  catchup: {}",
        dag.schedule,
        dag.start_date.format("%Y-%m-%d"),
        dag.catchup
    );
    println!(
        "  owner: {}  retries: {}  retry delay: {}s",
        dag.default_args.owner, dag.default_args.retries, dag.default_args.retry_delay_secs
    );
    if !dag.tags.is_empty() {
        println!("  tags: {}", dag.tags.join(", "));
    }

    println!();
    println!("Tasks:");
    for task in &dag.tasks {
        println!("  {:12} {}", task.task_id, task.describe());
    }

    println!();
    println!("Edges:");
    for (up, down) in dag.edges() {
        println!("  {} >> {}", up, down);
    }

    println!();
    println!("Execution order: {}", topological_order(dag)?.join(" -> "));
    Ok(())
}

fn colored_status(status: &TaskStatus) -> String {
    match status {
        TaskStatus::Success => "success".green().to_string(),
        TaskStatus::Failed(_) => "failed".red().to_string(),
        TaskStatus::UpstreamFailed => "upstream_failed".yellow().to_string(),
        TaskStatus::UpForRetry => "up_for_retry".yellow().to_string(),
        TaskStatus::Running => "running".blue().to_string(),
        TaskStatus::Pending => "pending".dimmed().to_string(),
    }
}

fn print_summary(report: &RunReport) {
    println!();
    println!("Run: {} ({})", report.run_id, report.dag_id);
    for task in &report.tasks {
        let duration = task
            .duration_ms
            .map(|ms| format!("{} ms", ms))
            .unwrap_or_default();
        println!(
            "  {:12} {:24} try {} {}",
            task.task_id,
            colored_status(&task.status),
            task.try_number,
            duration
        );
    }
    println!("Total: {} ms", report.elapsed_ms);
}

fn print_report(config: &Config, report: &RunReport) -> Result<(), Box<dyn std::error::Error>> {
    if config.json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print_summary(report);
    }
    if config.timeline {
        println!("{}", report.timeline.gantt_chart());
    }
    Ok(())
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    setup_logging(config.verbose);

    if config.list {
        print_catalog();
        if config.target.is_none() {
            return Ok(());
        }
        println!();
    }

    let Some(ref target) = config.target else {
        return Ok(());
    };
    let dag = resolve_dag(target)?;

    if let Some(ref path) = config.export_path {
        save_dag(&dag, path)?;
        println!("Exported '{}' to {}", dag.dag_id, path.display());
    }

    if config.show {
        print_structure(&dag)?;
        return Ok(());
    }
    if config.export_path.is_some() {
        return Ok(());
    }

    if !config.json {
        print_banner();
    }
    if config.dry_run {
        info!("Mode: DRY RUN (tasks will not execute)");
    }

    let mut engine = Engine::new(dag, pipelines::builtin_registry());
    if let Some(max_parallel) = config.max_parallel {
        engine.set_max_parallel(max_parallel);
    }
    engine.set_dry_run(config.dry_run);
    if let Some(ref dir) = config.working_dir {
        check_working_directory(dir)?;
        engine.set_working_dir(dir.clone());
    }

    let result = engine.run();
    if let Some(report) = engine.last_report() {
        print_report(&config, report)?;
    }
    result?;

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
