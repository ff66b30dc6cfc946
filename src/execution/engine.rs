//! DAG Run Engine
//!
//! Runs one DAG run locally:
//! - Validates the DAG and checks every callable is registered
//! - Starts ready tasks on worker threads, bounded by `max_parallel`
//! - Pushes task return values into the run context
//! - Retries failed tasks with the configured fixed delay
//! - Stops scheduling after a task fails for good and drains running tasks

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;
use serde_json::Value;

use super::context::{RunContext, TaskContext};
use super::registry::CallableRegistry;
use super::task::execute_task;
use crate::error::{EngineError, TaskError};
use crate::monitoring::{EventType, ExecutionTimeline};
use crate::workflow::planner::FailureOutcome;
use crate::workflow::{validate_dag, Dag, ExecutionPlanner, TaskStatus};

type Completion = (String, Result<Value, TaskError>);

/// Final state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Success,
    Failed,
    DryRun,
}

/// Outcome of one task instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    pub task_id: String,
    pub status: TaskStatus,
    pub try_number: u32,
    pub duration_ms: Option<u128>,
}

/// Everything observed during one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub dag_id: String,
    pub run_id: String,
    pub logical_date: DateTime<Utc>,
    pub state: RunState,
    /// Task outcomes in topological order
    pub tasks: Vec<TaskSummary>,
    /// Values pushed to the run context, by task id
    pub xcom: BTreeMap<String, Value>,
    pub elapsed_ms: u128,
    #[serde(skip)]
    pub timeline: ExecutionTimeline,
}

impl RunReport {
    pub fn xcom(&self, task_id: &str) -> Option<&Value> {
        self.xcom.get(task_id)
    }

    pub fn task(&self, task_id: &str) -> Option<&TaskSummary> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn status(&self, task_id: &str) -> Option<&TaskStatus> {
        self.task(task_id).map(|t| &t.status)
    }

    pub fn try_number(&self, task_id: &str) -> Option<u32> {
        self.task(task_id).map(|t| t.try_number)
    }

    pub fn is_success(&self) -> bool {
        self.state == RunState::Success
    }
}

/// Local DAG runner.
///
/// # Example
///
/// ```rust,no_run
/// use dagkit::execution::Engine;
/// use dagkit::pipelines;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let mut engine = Engine::new(pipelines::etl::dag()?, pipelines::builtin_registry());
///     engine.set_max_parallel(4);
///
///     let report = engine.run()?;
///     println!("{:?}", report.xcom("load"));
///     Ok(())
/// }
/// ```
pub struct Engine {
    dag: Dag,
    registry: CallableRegistry,
    max_parallel: usize,
    dry_run: bool,
    working_dir: Option<PathBuf>,
    logical_date: Option<DateTime<Utc>>,
    last_report: Option<RunReport>,
}

impl Engine {
    /// Creates an engine for a DAG; parallelism defaults to the CPU count.
    pub fn new(dag: Dag, registry: CallableRegistry) -> Self {
        Self {
            dag,
            registry,
            max_parallel: num_cpus::get().max(1),
            dry_run: false,
            working_dir: None,
            logical_date: None,
            last_report: None,
        }
    }

    /// Sets the maximum number of concurrently running tasks.
    pub fn set_max_parallel(&mut self, max: usize) {
        self.max_parallel = max.max(1);
    }

    /// Enables or disables dry run mode.
    pub fn set_dry_run(&mut self, dry_run: bool) {
        self.dry_run = dry_run;
    }

    /// Sets the working directory for bash tasks.
    pub fn set_working_dir(&mut self, dir: impl Into<PathBuf>) {
        self.working_dir = Some(dir.into());
    }

    /// Pins the logical date of the run (defaults to now).
    pub fn set_logical_date(&mut self, logical_date: DateTime<Utc>) {
        self.logical_date = Some(logical_date);
    }

    /// Report of the most recent run, including failed ones.
    pub fn last_report(&self) -> Option<&RunReport> {
        self.last_report.as_ref()
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }

    /// Executes one run of the DAG.
    ///
    /// # Returns
    ///
    /// * `Ok(report)` - Every task succeeded (or the run was a dry run)
    /// * `Err` - The DAG is invalid, a callable is missing, or a task failed
    ///   after exhausting its retries; [`last_report`](Self::last_report)
    ///   still holds the partial report in that last case
    pub fn run(&mut self) -> Result<RunReport, EngineError> {
        let started = Instant::now();

        let mut dag = self.dag.clone();
        validate_dag(&mut dag)?;

        let required = dag.callable_names();
        let missing = self.registry.missing(&required);
        if !missing.is_empty() {
            return Err(EngineError::MissingCallables(
                missing.into_iter().map(str::to_string).collect(),
            ));
        }

        let logical_date = self.logical_date.unwrap_or_else(Utc::now);
        let run_id = format!("manual__{}", logical_date.to_rfc3339());

        info!(
            "Starting run {} of '{}' (max parallel: {}, dry run: {})",
            run_id, dag.dag_id, self.max_parallel, self.dry_run
        );

        let mut planner = ExecutionPlanner::new(dag, self.max_parallel);
        let mut timeline = ExecutionTimeline::new();
        let xcom = RunContext::new();

        let failure = if self.dry_run {
            self.dry_run_tasks(&mut planner, &mut timeline);
            None
        } else {
            self.drive(&mut planner, &mut timeline, &xcom, &run_id, logical_date)?
        };

        let state = match (&failure, self.dry_run) {
            (Some(_), _) => RunState::Failed,
            (None, true) => RunState::DryRun,
            (None, false) => RunState::Success,
        };

        let report = build_report(&planner, timeline, &xcom, run_id, logical_date, state, started);
        self.last_report = Some(report.clone());

        match failure {
            Some((task_id, error)) => {
                error!("Run of '{}' failed at task '{}'", report.dag_id, task_id);
                Err(EngineError::TaskFailed {
                    dag_id: report.dag_id,
                    task_id,
                    error,
                })
            }
            None => {
                let (done, total) = planner.progress();
                info!(
                    "Run of '{}' finished: {}/{} tasks succeeded in {} ms",
                    report.dag_id, done, total, report.elapsed_ms
                );
                Ok(report)
            }
        }
    }

    /// Lists tasks in execution order without running anything.
    fn dry_run_tasks(&self, planner: &mut ExecutionPlanner, timeline: &mut ExecutionTimeline) {
        loop {
            let ready = planner.get_ready_tasks(Instant::now());
            if ready.is_empty() {
                break;
            }
            for task in ready {
                if task.upstream.is_empty() {
                    info!("[DRY RUN] Task: {} ({})", task.task_id, task.describe());
                } else {
                    info!(
                        "[DRY RUN] Task: {} ({}) after {}",
                        task.task_id,
                        task.describe(),
                        task.upstream.join(", ")
                    );
                }

                timeline.add_event(task.task_id.clone(), EventType::Started);
                planner.mark_task_running(&task.task_id);
                planner.mark_task_success(&task.task_id);
                timeline.add_event(task.task_id.clone(), EventType::Succeeded);
            }
        }
    }

    /// Main scheduling loop. Returns the first terminal failure, if any.
    fn drive(
        &self,
        planner: &mut ExecutionPlanner,
        timeline: &mut ExecutionTimeline,
        xcom: &RunContext,
        run_id: &str,
        logical_date: DateTime<Utc>,
    ) -> Result<Option<(String, String)>, EngineError> {
        let (tx, rx): (Sender<Completion>, Receiver<Completion>) = channel();
        let dag_id = planner.dag().dag_id.clone();
        let mut failure: Option<(String, String)> = None;

        loop {
            if failure.is_none() {
                for task in planner.get_ready_tasks(Instant::now()) {
                    let try_number = planner.mark_task_running(&task.task_id);
                    timeline.add_event(task.task_id.clone(), EventType::Started);
                    info!("Starting task: {} (try {})", task.task_id, try_number);

                    let ctx = TaskContext::new(
                        dag_id.clone(),
                        task.task_id.clone(),
                        run_id,
                        logical_date,
                        try_number,
                        xcom.clone(),
                    );
                    let tx = tx.clone();
                    let registry = self.registry.clone();
                    let working_dir = self.working_dir.clone();

                    thread::spawn(move || {
                        let result = execute_task(&task, &ctx, &registry, &working_dir);
                        if let Err(e) = tx.send((task.task_id.clone(), result)) {
                            error!("Failed to send completion signal: {}", e);
                        }
                    });
                }
            }

            if planner.running_count() == 0 {
                if failure.is_some() || !planner.has_work_remaining() {
                    break;
                }
                match planner.next_retry_at() {
                    Some(at) => {
                        thread::sleep(at.saturating_duration_since(Instant::now()));
                        continue;
                    }
                    None => return Err(EngineError::Stalled(dag_id)),
                }
            }

            let Some((task_id, result)) = self.wait_for_completion(&rx, planner, failure.is_some())?
            else {
                continue;
            };

            match result {
                Ok(value) => {
                    if !value.is_null() {
                        if let Err(e) = xcom.push(&task_id, value) {
                            warn!("{}", e);
                        }
                    }
                    planner.mark_task_success(&task_id);
                    timeline.add_event(task_id.clone(), EventType::Succeeded);
                    info!("Task '{}' succeeded", task_id);
                }
                Err(e) => {
                    error!("Task '{}' failed: {}", task_id, e);
                    match planner.mark_task_failed(&task_id, e.to_string()) {
                        FailureOutcome::Retry { try_number, delay } => {
                            timeline.add_event(task_id.clone(), EventType::Retrying);
                            warn!(
                                "Task '{}' up for retry (try {} in {:?})",
                                task_id, try_number, delay
                            );
                        }
                        FailureOutcome::Failed { upstream_failed } => {
                            timeline.add_event(task_id.clone(), EventType::Failed);
                            for skipped in &upstream_failed {
                                warn!("Task '{}' will not run: upstream failed", skipped);
                            }
                            if failure.is_none() {
                                failure = Some((task_id, e.to_string()));
                            }
                        }
                    }
                }
            }
        }

        Ok(failure)
    }

    /// When the coordinator should wake up for a pending retry.
    ///
    /// `None` while halted or while every slot is busy: a due retry can't
    /// start until a worker finishes anyway.
    fn retry_deadline(&self, planner: &ExecutionPlanner, halted: bool) -> Option<Instant> {
        if halted || planner.running_count() >= self.max_parallel {
            return None;
        }
        planner.next_retry_at()
    }

    /// Waits for the next worker to finish, waking early when a retry is due.
    fn wait_for_completion(
        &self,
        rx: &Receiver<Completion>,
        planner: &ExecutionPlanner,
        halted: bool,
    ) -> Result<Option<Completion>, EngineError> {
        match self.retry_deadline(planner, halted) {
            Some(at) => {
                let timeout = at
                    .saturating_duration_since(Instant::now())
                    .max(Duration::from_millis(1));
                match rx.recv_timeout(timeout) {
                    Ok(completion) => Ok(Some(completion)),
                    Err(RecvTimeoutError::Timeout) => Ok(None),
                    Err(e @ RecvTimeoutError::Disconnected) => {
                        Err(EngineError::Channel(e.to_string()))
                    }
                }
            }
            None => rx
                .recv()
                .map(Some)
                .map_err(|e| EngineError::Channel(e.to_string())),
        }
    }
}

fn build_report(
    planner: &ExecutionPlanner,
    timeline: ExecutionTimeline,
    xcom: &RunContext,
    run_id: String,
    logical_date: DateTime<Utc>,
    state: RunState,
    started: Instant,
) -> RunReport {
    let metrics = planner.get_metrics();
    let tasks = planner
        .dag()
        .tasks
        .iter()
        .filter_map(|task| {
            metrics.get(&task.task_id).map(|m| TaskSummary {
                task_id: task.task_id.clone(),
                status: m.status.clone(),
                try_number: m.try_number,
                duration_ms: m.duration_ms,
            })
        })
        .collect();

    RunReport {
        dag_id: planner.dag().dag_id.clone(),
        run_id,
        logical_date,
        state,
        tasks,
        xcom: xcom.snapshot(),
        elapsed_ms: started.elapsed().as_millis(),
        timeline,
    }
}
