//! Workflow Data Model
//!
//! Core data structures describing a DAG, its tasks and the edges between them.
//!
//! # Example YAML Format
//!
//! ```yaml
//! dag_id: example_etl_pipeline
//! description: Simple ETL pipeline
//! default_args:
//!   owner: dagkit
//!   retries: 1
//!   retry_delay_secs: 300
//! schedule:
//!   interval_secs: 86400
//! start_date: 2024-01-01T00:00:00Z
//! catchup: false
//! tags: [example, etl]
//! tasks:
//!   - task_id: start
//!     operator: bash
//!     bash_command: echo "Starting ETL pipeline"
//!
//!   - task_id: extract
//!     operator: callable
//!     callable: extract_data
//!     upstream: [start]
//! ```

use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DagError;

/// Default owner for DAGs that don't specify one.
pub const DEFAULT_OWNER: &str = "dagkit";

/// Default delay between tries when a DAG doesn't specify one.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 300;

/// What a task does when it runs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "operator", rename_all = "snake_case")]
pub enum Operator {
    /// Runs a shell command with `bash -c`
    Bash { bash_command: String },
    /// Calls a function registered under this name
    Callable { callable: String },
}

/// A single named unit of work in a DAG.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Unique identifier within the DAG
    pub task_id: String,

    /// Task body
    #[serde(flatten)]
    pub operator: Operator,

    /// Tasks that must succeed before this one runs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upstream: Vec<String>,

    /// Tasks that run after this one (mirrors `upstream`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub downstream: Vec<String>,

    /// Overrides `default_args.retries`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,

    /// Overrides `default_args.retry_delay_secs`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_delay_secs: Option<u64>,
}

impl Task {
    /// Creates a task that runs a shell command.
    ///
    /// # Example
    ///
    /// ```
    /// use dagkit::workflow::Task;
    ///
    /// let task = Task::bash("start", "echo hello").with_retries(2);
    /// assert_eq!(task.task_id, "start");
    /// assert_eq!(task.retries, Some(2));
    /// ```
    pub fn bash(task_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self::with_operator(
            task_id,
            Operator::Bash {
                bash_command: command.into().trim().to_string(),
            },
        )
    }

    /// Creates a task that calls a registered function.
    pub fn callable(task_id: impl Into<String>, callable: impl Into<String>) -> Self {
        Self::with_operator(
            task_id,
            Operator::Callable {
                callable: callable.into().trim().to_string(),
            },
        )
    }

    fn with_operator(task_id: impl Into<String>, operator: Operator) -> Self {
        Self {
            task_id: task_id.into().trim().to_string(),
            operator,
            upstream: Vec::new(),
            downstream: Vec::new(),
            retries: None,
            retry_delay_secs: None,
        }
    }

    /// Overrides the retry count for this task.
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Overrides the retry delay for this task.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_secs = Some(delay.as_secs());
        self
    }

    /// Name of the registered callable, if this is a callable task.
    pub fn callable_name(&self) -> Option<&str> {
        match &self.operator {
            Operator::Callable { callable } => Some(callable),
            Operator::Bash { .. } => None,
        }
    }

    /// Short description of the task body, used in listings.
    pub fn describe(&self) -> String {
        match &self.operator {
            Operator::Bash { bash_command } => format!("bash: {}", bash_command),
            Operator::Callable { callable } => format!("callable: {}", callable),
        }
    }
}

/// Options applied to every task unless the task overrides them.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct DefaultArgs {
    #[serde(default = "default_owner")]
    pub owner: String,

    #[serde(default)]
    pub depends_on_past: bool,

    #[serde(default)]
    pub email_on_failure: bool,

    #[serde(default)]
    pub email_on_retry: bool,

    #[serde(default)]
    pub retries: u32,

    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
}

fn default_owner() -> String {
    DEFAULT_OWNER.to_string()
}

fn default_retry_delay_secs() -> u64 {
    DEFAULT_RETRY_DELAY_SECS
}

impl DefaultArgs {
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = owner.into();
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_secs = delay.as_secs();
        self
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }
}

impl Default for DefaultArgs {
    fn default() -> Self {
        Self {
            owner: default_owner(),
            depends_on_past: false,
            email_on_failure: false,
            email_on_retry: false,
            retries: 0,
            retry_delay_secs: DEFAULT_RETRY_DELAY_SECS,
        }
    }
}

/// How often a DAG is meant to run.
///
/// Presets are written as strings (`"@daily"`), fixed periods as
/// `{ interval_secs: N }`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum Schedule {
    Preset(String),
    Every { interval_secs: u64 },
}

impl Schedule {
    pub fn daily() -> Self {
        Self::Preset("@daily".to_string())
    }

    pub fn every(interval: Duration) -> Self {
        Self::Every {
            interval_secs: interval.as_secs(),
        }
    }

    /// Period between runs; `None` for `@once` and unrecognised presets.
    pub fn interval(&self) -> Option<Duration> {
        match self {
            Self::Every { interval_secs } => Some(Duration::from_secs(*interval_secs)),
            Self::Preset(preset) => match preset.as_str() {
                "@hourly" => Some(Duration::from_secs(60 * 60)),
                "@daily" => Some(Duration::from_secs(24 * 60 * 60)),
                "@weekly" => Some(Duration::from_secs(7 * 24 * 60 * 60)),
                _ => None,
            },
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Preset(preset) => write!(f, "{}", preset),
            Self::Every { interval_secs } => write!(f, "every {}s", interval_secs),
        }
    }
}

/// A named, static graph of tasks plus its scheduling metadata.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Dag {
    pub dag_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub default_args: DefaultArgs,

    pub schedule: Schedule,

    pub start_date: DateTime<Utc>,

    #[serde(default)]
    pub catchup: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    /// Tasks in declaration order (topological order once validated)
    #[serde(default)]
    pub tasks: Vec<Task>,
}

impl Dag {
    /// Creates an empty DAG with catch-up disabled and default args.
    pub fn new(dag_id: impl Into<String>, schedule: Schedule, start_date: DateTime<Utc>) -> Self {
        Self {
            dag_id: dag_id.into().trim().to_string(),
            description: None,
            default_args: DefaultArgs::default(),
            schedule,
            start_date,
            catchup: false,
            tags: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_default_args(mut self, default_args: DefaultArgs) -> Self {
        self.default_args = default_args;
        self
    }

    pub fn with_catchup(mut self, catchup: bool) -> Self {
        self.catchup = catchup;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Registers a task on the DAG.
    pub fn add_task(&mut self, task: Task) -> Result<(), DagError> {
        if self.tasks.iter().any(|t| t.task_id == task.task_id) {
            return Err(DagError::DuplicateTask(task.task_id));
        }
        self.tasks.push(task);
        Ok(())
    }

    /// Adds the edge `upstream >> downstream`.
    ///
    /// Both sides are updated so `upstream`/`downstream` stay mirrored.
    /// Adding an existing edge again is a no-op.
    pub fn set_downstream(&mut self, upstream: &str, downstream: &str) -> Result<(), DagError> {
        if upstream == downstream {
            return Err(DagError::SelfDependency(upstream.to_string()));
        }
        if self.get_task(upstream).is_none() {
            return Err(DagError::UnknownTask(upstream.to_string()));
        }
        if self.get_task(downstream).is_none() {
            return Err(DagError::UnknownTask(downstream.to_string()));
        }

        if let Some(up) = self.get_task_mut(upstream) {
            if !up.downstream.iter().any(|d| d == downstream) {
                up.downstream.push(downstream.to_string());
            }
        }
        if let Some(down) = self.get_task_mut(downstream) {
            if !down.upstream.iter().any(|u| u == upstream) {
                down.upstream.push(upstream.to_string());
            }
        }
        Ok(())
    }

    /// Sequence operator: each task runs after the one before it.
    ///
    /// # Example
    ///
    /// ```
    /// use chrono::{TimeZone, Utc};
    /// use dagkit::workflow::{Dag, Schedule, Task};
    ///
    /// let mut dag = Dag::new("demo", Schedule::daily(), Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    /// for id in ["a", "b", "c"] {
    ///     dag.add_task(Task::bash(id, "true")).unwrap();
    /// }
    /// dag.chain(&["a", "b", "c"]).unwrap();
    /// assert_eq!(dag.edges().len(), 2);
    /// ```
    pub fn chain(&mut self, task_ids: &[&str]) -> Result<(), DagError> {
        for pair in task_ids.windows(2) {
            self.set_downstream(pair[0], pair[1])?;
        }
        Ok(())
    }

    /// Fan-out operator: every task in `targets` runs after `source`.
    pub fn fan_out(&mut self, source: &str, targets: &[&str]) -> Result<(), DagError> {
        for target in targets {
            self.set_downstream(source, target)?;
        }
        Ok(())
    }

    /// Fan-in operator: `target` runs after every task in `sources`.
    pub fn fan_in(&mut self, sources: &[&str], target: &str) -> Result<(), DagError> {
        for source in sources {
            self.set_downstream(source, target)?;
        }
        Ok(())
    }

    /// All edges as sorted `(upstream, downstream)` pairs.
    pub fn edges(&self) -> Vec<(String, String)> {
        let mut edges: Vec<(String, String)> = self
            .tasks
            .iter()
            .flat_map(|t| {
                t.upstream
                    .iter()
                    .map(move |up| (up.clone(), t.task_id.clone()))
            })
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        edges.sort();
        edges
    }

    pub fn get_task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.task_id == task_id)
    }

    pub fn get_task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.task_id == task_id)
    }

    /// Tasks with no upstream (entry points).
    pub fn root_tasks(&self) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.upstream.is_empty()).collect()
    }

    /// Tasks with no downstream (exit points).
    pub fn leaf_tasks(&self) -> Vec<&Task> {
        self.tasks.iter().filter(|t| t.downstream.is_empty()).collect()
    }

    /// Names of every callable the DAG needs, sorted and deduplicated.
    pub fn callable_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .tasks
            .iter()
            .filter_map(|t| t.callable_name().map(str::to_string))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Retry count and delay for a task, applying its overrides over `default_args`.
    pub fn effective_retries(&self, task: &Task) -> (u32, Duration) {
        let retries = task.retries.unwrap_or(self.default_args.retries);
        let delay = task
            .retry_delay_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.default_args.retry_delay());
        (retries, delay)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
