//! Individual Task Execution
//!
//! Runs one try of a task body:
//! - Bash tasks run via `bash -c` with run metadata in the environment;
//!   the last non-empty stdout line becomes the task's return value
//! - Callable tasks are looked up in the registry and invoked

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::process::Command;

use log::{debug, error, info};
use serde_json::Value;

use super::context::TaskContext;
use super::registry::CallableRegistry;
use crate::error::TaskError;
use crate::workflow::{Operator, Task};

/// Executes a single try of a task.
///
/// # Arguments
///
/// * `task` - The task to run
/// * `ctx` - Run metadata and access to upstream values
/// * `registry` - Callables available to callable tasks
/// * `working_dir` - Optional working directory for bash tasks
///
/// # Returns
///
/// * `Ok(value)` - The task's return value (`Null` for nothing)
/// * `Err` - The try failed
pub fn execute_task(
    task: &Task,
    ctx: &TaskContext,
    registry: &CallableRegistry,
    working_dir: &Option<PathBuf>,
) -> Result<Value, TaskError> {
    match &task.operator {
        Operator::Bash { bash_command } => execute_bash(bash_command, ctx, working_dir),
        Operator::Callable { callable } => {
            let body = registry
                .get(callable)
                .ok_or_else(|| TaskError::UnknownCallable(callable.clone()))?;
            debug!("Task '{}' calling '{}'", ctx.task_id, callable);
            panic::catch_unwind(AssertUnwindSafe(|| body(ctx))).unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                error!("Task '{}' panicked: {}", ctx.task_id, message);
                Err(TaskError::failed(format!("task panicked: {}", message)))
            })
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs a shell command and returns its last non-empty stdout line.
fn execute_bash(
    command_text: &str,
    ctx: &TaskContext,
    working_dir: &Option<PathBuf>,
) -> Result<Value, TaskError> {
    let mut cmd = Command::new("bash");
    cmd.arg("-c")
        .arg(command_text)
        .env("DAGKIT_DAG_ID", &ctx.dag_id)
        .env("DAGKIT_TASK_ID", &ctx.task_id)
        .env("DAGKIT_RUN_ID", &ctx.run_id)
        .env("DAGKIT_LOGICAL_DATE", ctx.logical_date.to_rfc3339())
        .env("DAGKIT_TRY_NUMBER", ctx.try_number.to_string());

    if let Some(dir) = working_dir {
        cmd.current_dir(dir);
        debug!("Executing in directory: {}", dir.display());
    }

    let output = cmd.output().map_err(|e| TaskError::Spawn(e.to_string()))?;
    let stdout = String::from_utf8_lossy(&output.stdout);

    if output.status.success() {
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            info!("[{}] {}", ctx.task_id, line);
        }
        Ok(last_line(&stdout)
            .map(|line| Value::String(line.to_string()))
            .unwrap_or(Value::Null))
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        error!(
            "Task '{}' command failed with exit code: {:?}",
            ctx.task_id,
            output.status.code()
        );
        if !stdout.trim().is_empty() {
            debug!("stdout:\n{}", stdout);
        }
        Err(TaskError::CommandFailed {
            code: output.status.code(),
            stderr,
        })
    }
}

fn last_line(text: &str) -> Option<&str> {
    text.lines().map(str::trim).filter(|l| !l.is_empty()).last()
}
