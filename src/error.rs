//! Error Types
//!
//! One error enum per concern: building a DAG, running a task body,
//! sharing values through the run context, and driving a run.

use thiserror::Error;

pub use crate::workflow::validator::ValidationError;

/// Errors raised while assembling a DAG in code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DagError {
    #[error("Task '{0}' already exists")]
    DuplicateTask(String),

    #[error("Task '{0}' not found")]
    UnknownTask(String),

    #[error("Task '{0}' cannot depend on itself")]
    SelfDependency(String),

    #[error("Task '{task}' references unknown task '{reference}'")]
    InvalidReference { task: String, reference: String },
}

/// Errors raised by the run context.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum XComError {
    #[error("Task '{0}' already pushed a value for this run")]
    AlreadyPushed(String),
}

/// Errors raised by a task body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    #[error("No callable registered under '{0}'")]
    UnknownCallable(String),

    #[error("Upstream task '{0}' has no value in the run context")]
    MissingXCom(String),

    #[error("Command exited with code {code:?}: {stderr}")]
    CommandFailed { code: Option<i32>, stderr: String },

    #[error("Failed to launch command: {0}")]
    Spawn(String),

    #[error("{0}")]
    Failed(String),
}

impl TaskError {
    /// Convenience constructor for ad-hoc failures inside callables.
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// Errors raised while driving a run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("DAG validation failed: {0}")]
    Invalid(#[from] ValidationError),

    #[error("Tasks reference unregistered callables: {0:?}")]
    MissingCallables(Vec<String>),

    #[error("Run of '{dag_id}' failed at task '{task_id}': {error}")]
    TaskFailed {
        dag_id: String,
        task_id: String,
        error: String,
    },

    #[error("Worker channel closed unexpectedly: {0}")]
    Channel(String),

    #[error("Run of '{0}' stalled with no runnable tasks")]
    Stalled(String),
}
