//! Execution Planner
//!
//! Tracks the state of every task instance during a run:
//! - Which tasks are ready (all upstream succeeded)
//! - Parallel slot accounting
//! - Retry bookkeeping (tries used, when the next try is due)
//! - Failure propagation to downstream tasks

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use log::{debug, info};
use serde::Serialize;

use super::model::{Dag, Task};

/// State of a task instance during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for upstream tasks
    Pending,
    /// Currently executing
    Running,
    /// Failed but has tries left; waiting out the retry delay
    UpForRetry,
    /// Finished successfully
    Success,
    /// Failed with no tries left
    Failed(String),
    /// Never ran because an upstream task failed
    UpstreamFailed,
}

impl TaskStatus {
    /// True once the task will not change state again in this run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed(_) | Self::UpstreamFailed)
    }
}

/// Execution metrics for a single task instance.
#[derive(Debug, Clone)]
pub struct TaskMetrics {
    /// When the current (or last) try started
    pub start_time: Option<Instant>,
    /// When the last try finished
    pub end_time: Option<Instant>,
    /// Duration of the last try in milliseconds
    pub duration_ms: Option<u128>,
    /// Number of tries started so far
    pub try_number: u32,
    /// Earliest moment a retry may start
    pub retry_at: Option<Instant>,
    pub status: TaskStatus,
}

impl TaskMetrics {
    fn new() -> Self {
        Self {
            start_time: None,
            end_time: None,
            duration_ms: None,
            try_number: 0,
            retry_at: None,
            status: TaskStatus::Pending,
        }
    }

    fn finish(&mut self, status: TaskStatus) {
        let now = Instant::now();
        self.end_time = Some(now);
        if let Some(start) = self.start_time {
            self.duration_ms = Some(now.duration_since(start).as_millis());
        }
        self.status = status;
    }
}

/// What the planner decided after a failed try.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// The task will be tried again after the delay
    Retry { try_number: u32, delay: Duration },
    /// No tries left; listed tasks were marked upstream-failed
    Failed { upstream_failed: Vec<String> },
}

/// Manages task scheduling state for one run of a DAG.
pub struct ExecutionPlanner {
    dag: Dag,
    max_parallel: usize,
    running: HashSet<String>,
    metrics: HashMap<String, TaskMetrics>,
}

impl ExecutionPlanner {
    /// Creates a planner for a validated DAG.
    ///
    /// # Arguments
    ///
    /// * `dag` - The DAG to run
    /// * `max_parallel` - Maximum concurrently running tasks (at least 1)
    pub fn new(dag: Dag, max_parallel: usize) -> Self {
        let max_parallel = max_parallel.max(1);
        info!(
            "Creating planner for '{}': {} tasks, {} max parallel",
            dag.dag_id,
            dag.len(),
            max_parallel
        );

        let metrics = dag
            .tasks
            .iter()
            .map(|t| (t.task_id.clone(), TaskMetrics::new()))
            .collect();

        Self {
            dag,
            max_parallel,
            running: HashSet::new(),
            metrics,
        }
    }

    fn status_of(&self, task_id: &str) -> Option<&TaskStatus> {
        self.metrics.get(task_id).map(|m| &m.status)
    }

    /// Returns tasks that may start now.
    ///
    /// A task is ready if:
    /// - It is pending, or up for retry with its delay elapsed
    /// - Every upstream task succeeded
    /// - A parallel slot is free
    pub fn get_ready_tasks(&self, now: Instant) -> Vec<Task> {
        let free_slots = self.max_parallel.saturating_sub(self.running.len());
        let mut ready = Vec::new();

        for task in &self.dag.tasks {
            if ready.len() >= free_slots {
                break;
            }

            let Some(metrics) = self.metrics.get(&task.task_id) else {
                continue;
            };

            let due = match metrics.status {
                TaskStatus::Pending => true,
                TaskStatus::UpForRetry => metrics.retry_at.map_or(true, |at| at <= now),
                _ => false,
            };
            if !due {
                continue;
            }

            let upstream_done = task
                .upstream
                .iter()
                .all(|up| self.status_of(up) == Some(&TaskStatus::Success));
            if !upstream_done {
                continue;
            }

            ready.push(task.clone());
        }

        ready
    }

    /// Earliest pending retry time, if any task is waiting to retry.
    pub fn next_retry_at(&self) -> Option<Instant> {
        self.metrics
            .values()
            .filter(|m| m.status == TaskStatus::UpForRetry)
            .filter_map(|m| m.retry_at)
            .min()
    }

    /// Marks a task as running and starts a new try. Returns the try number.
    pub fn mark_task_running(&mut self, task_id: &str) -> u32 {
        self.running.insert(task_id.to_string());

        let Some(metrics) = self.metrics.get_mut(task_id) else {
            return 0;
        };
        metrics.try_number += 1;
        metrics.start_time = Some(Instant::now());
        metrics.end_time = None;
        metrics.retry_at = None;
        metrics.status = TaskStatus::Running;

        debug!(
            "Task '{}' running (try {}, {}/{} slots)",
            task_id,
            metrics.try_number,
            self.running.len(),
            self.max_parallel
        );
        metrics.try_number
    }

    /// Marks a task as succeeded.
    pub fn mark_task_success(&mut self, task_id: &str) {
        self.running.remove(task_id);
        if let Some(metrics) = self.metrics.get_mut(task_id) {
            metrics.finish(TaskStatus::Success);
        }
    }

    /// Records a failed try and decides whether the task retries.
    pub fn mark_task_failed(&mut self, task_id: &str, error: String) -> FailureOutcome {
        self.running.remove(task_id);

        let (retries, delay) = match self.dag.get_task(task_id) {
            Some(task) => self.dag.effective_retries(task),
            None => (0, Duration::ZERO),
        };

        let Some(metrics) = self.metrics.get_mut(task_id) else {
            return FailureOutcome::Failed {
                upstream_failed: Vec::new(),
            };
        };

        if metrics.try_number <= retries {
            metrics.finish(TaskStatus::UpForRetry);
            metrics.retry_at = Some(Instant::now() + delay);
            info!(
                "Task '{}' failed on try {}; retrying in {:?}",
                task_id, metrics.try_number, delay
            );
            return FailureOutcome::Retry {
                try_number: metrics.try_number + 1,
                delay,
            };
        }

        metrics.finish(TaskStatus::Failed(error));
        let upstream_failed = self.propagate_upstream_failed(task_id);
        FailureOutcome::Failed { upstream_failed }
    }

    /// Marks every transitive downstream task that hasn't run as upstream-failed.
    fn propagate_upstream_failed(&mut self, task_id: &str) -> Vec<String> {
        let mut affected = Vec::new();
        let mut queue: VecDeque<String> = self
            .dag
            .get_task(task_id)
            .map(|t| t.downstream.iter().cloned().collect())
            .unwrap_or_default();

        while let Some(current) = queue.pop_front() {
            let Some(metrics) = self.metrics.get_mut(&current) else {
                continue;
            };
            if metrics.status.is_terminal() || metrics.status == TaskStatus::Running {
                continue;
            }
            metrics.status = TaskStatus::UpstreamFailed;
            affected.push(current.clone());

            if let Some(task) = self.dag.get_task(&current) {
                queue.extend(task.downstream.iter().cloned());
            }
        }

        affected
    }

    /// Returns true while any task has not reached a terminal state.
    pub fn has_work_remaining(&self) -> bool {
        self.metrics.values().any(|m| !m.status.is_terminal())
    }

    /// Number of tasks currently running.
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    /// Returns (succeeded, total).
    pub fn progress(&self) -> (usize, usize) {
        let done = self
            .metrics
            .values()
            .filter(|m| m.status == TaskStatus::Success)
            .count();
        (done, self.dag.len())
    }

    pub fn get_metrics(&self) -> &HashMap<String, TaskMetrics> {
        &self.metrics
    }

    pub fn dag(&self) -> &Dag {
        &self.dag
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::{DefaultArgs, Schedule};
    use chrono::{TimeZone, Utc};

    fn build_dag(retries: u32) -> Dag {
        let mut dag = Dag::new(
            "plan",
            Schedule::daily(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
        .with_default_args(
            DefaultArgs::default()
                .with_retries(retries)
                .with_retry_delay(Duration::ZERO),
        );
        for id in ["start", "a", "b", "c", "join"] {
            dag.add_task(Task::bash(id, "true")).unwrap();
        }
        dag.fan_out("start", &["a", "b", "c"]).unwrap();
        dag.fan_in(&["a", "b", "c"], "join").unwrap();
        dag
    }

    fn ready_ids(planner: &ExecutionPlanner) -> Vec<String> {
        planner
            .get_ready_tasks(Instant::now())
            .into_iter()
            .map(|t| t.task_id)
            .collect()
    }

    fn succeed(planner: &mut ExecutionPlanner, id: &str) {
        planner.mark_task_running(id);
        planner.mark_task_success(id);
    }

    #[test]
    fn test_planner_creation() {
        let planner = ExecutionPlanner::new(build_dag(0), 4);
        assert_eq!(planner.progress(), (0, 5));
        assert!(planner.has_work_remaining());
    }

    #[test]
    fn test_only_root_ready_initially() {
        let planner = ExecutionPlanner::new(build_dag(0), 4);
        assert_eq!(ready_ids(&planner), vec!["start"]);
    }

    #[test]
    fn test_fan_out_ready_after_start() {
        let mut planner = ExecutionPlanner::new(build_dag(0), 4);
        succeed(&mut planner, "start");
        assert_eq!(ready_ids(&planner), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_join_waits_for_all_branches() {
        let mut planner = ExecutionPlanner::new(build_dag(0), 4);
        succeed(&mut planner, "start");
        succeed(&mut planner, "b");
        succeed(&mut planner, "c");
        assert_eq!(ready_ids(&planner), vec!["a"]);

        succeed(&mut planner, "a");
        assert_eq!(ready_ids(&planner), vec!["join"]);
    }

    #[test]
    fn test_respects_max_parallel() {
        let mut planner = ExecutionPlanner::new(build_dag(0), 2);
        succeed(&mut planner, "start");
        assert_eq!(ready_ids(&planner).len(), 2);

        planner.mark_task_running("a");
        assert_eq!(ready_ids(&planner), vec!["b"]);
        assert_eq!(planner.running_count(), 1);
    }

    #[test]
    fn test_zero_parallel_is_clamped() {
        let planner = ExecutionPlanner::new(build_dag(0), 0);
        assert_eq!(ready_ids(&planner), vec!["start"]);
    }

    #[test]
    fn test_failure_with_retry_left() {
        let mut planner = ExecutionPlanner::new(build_dag(1), 4);
        assert_eq!(planner.mark_task_running("start"), 1);

        let outcome = planner.mark_task_failed("start", "boom".to_string());
        assert_eq!(
            outcome,
            FailureOutcome::Retry {
                try_number: 2,
                delay: Duration::ZERO
            }
        );
        assert_eq!(
            planner.get_metrics()["start"].status,
            TaskStatus::UpForRetry
        );
        assert_eq!(ready_ids(&planner), vec!["start"]);
        assert_eq!(planner.mark_task_running("start"), 2);
    }

    #[test]
    fn test_retry_waits_for_delay() {
        let mut dag = build_dag(1);
        dag.default_args.retry_delay_secs = 60;
        let mut planner = ExecutionPlanner::new(dag, 4);

        planner.mark_task_running("start");
        planner.mark_task_failed("start", "boom".to_string());

        assert!(ready_ids(&planner).is_empty());
        let retry_at = planner.next_retry_at().unwrap();
        assert!(retry_at > Instant::now());
        assert_eq!(
            planner
                .get_ready_tasks(retry_at)
                .into_iter()
                .map(|t| t.task_id)
                .collect::<Vec<_>>(),
            vec!["start"]
        );
    }

    #[test]
    fn test_terminal_failure_propagates() {
        let mut planner = ExecutionPlanner::new(build_dag(0), 4);
        succeed(&mut planner, "start");
        planner.mark_task_running("a");

        let outcome = planner.mark_task_failed("a", "boom".to_string());
        assert_eq!(
            outcome,
            FailureOutcome::Failed {
                upstream_failed: vec!["join".to_string()]
            }
        );

        let metrics = planner.get_metrics();
        assert_eq!(metrics["a"].status, TaskStatus::Failed("boom".to_string()));
        assert_eq!(metrics["join"].status, TaskStatus::UpstreamFailed);

        // b and c are still pending and runnable
        assert_eq!(ready_ids(&planner), vec!["b", "c"]);
    }

    #[test]
    fn test_has_work_remaining_until_all_terminal() {
        let mut planner = ExecutionPlanner::new(build_dag(0), 4);
        for id in ["start", "a", "b", "c"] {
            succeed(&mut planner, id);
        }
        assert!(planner.has_work_remaining());

        succeed(&mut planner, "join");
        assert!(!planner.has_work_remaining());
        assert_eq!(planner.progress(), (5, 5));
    }

    #[test]
    fn test_metrics_duration() {
        let mut planner = ExecutionPlanner::new(build_dag(0), 4);
        planner.mark_task_running("start");
        std::thread::sleep(Duration::from_millis(10));
        planner.mark_task_success("start");

        let m = &planner.get_metrics()["start"];
        assert!(m.start_time.is_some());
        assert!(m.end_time.is_some());
        assert!(m.duration_ms.unwrap() >= 10);
        assert_eq!(m.try_number, 1);
    }

    #[test]
    fn test_task_metrics_new_default() {
        let metrics = TaskMetrics::new();
        assert!(metrics.start_time.is_none());
        assert_eq!(metrics.try_number, 0);
        assert_eq!(metrics.status, TaskStatus::Pending);
    }
}
