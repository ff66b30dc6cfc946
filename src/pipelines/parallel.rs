//! Fan-Out/Fan-In Pipeline
//!
//! `start >> [task_a, task_b, task_c] >> aggregate`
//!
//! The three middle tasks simulate independent work and may run at the
//! same time; `aggregate` waits for all of them.

use std::thread;
use std::time::Duration;

use log::info;
use serde_json::{json, Value};

use super::pipeline_start_date;
use crate::error::{DagError, TaskError};
use crate::execution::{CallableRegistry, TaskContext};
use crate::workflow::{Dag, DefaultArgs, Schedule, Task};

pub const DAG_ID: &str = "parallel_tasks_example";

/// Simulated work per parallel task.
pub const DEFAULT_WORK_DELAY: Duration = Duration::from_secs(2);

const BRANCHES: [(&str, &str, &str); 3] = [
    ("task_a", "process_task_a", "A"),
    ("task_b", "process_task_b", "B"),
    ("task_c", "process_task_c", "C"),
];

/// Builds the fan-out/fan-in DAG.
pub fn dag() -> Result<Dag, DagError> {
    let mut dag = Dag::new(DAG_ID, Schedule::daily(), pipeline_start_date())
        .with_description("Example DAG with parallel tasks")
        .with_default_args(
            DefaultArgs::default()
                .with_retries(1)
                .with_retry_delay(Duration::from_secs(60)),
        )
        .with_catchup(false)
        .with_tags(["example", "parallel"]);

    dag.add_task(Task::callable("start", "announce_start"))?;
    for (task_id, callable, _) in BRANCHES {
        dag.add_task(Task::callable(task_id, callable))?;
    }
    dag.add_task(Task::callable("aggregate", "aggregate_results"))?;

    let branches: Vec<&str> = BRANCHES.iter().map(|(id, _, _)| *id).collect();
    dag.fan_out("start", &branches)?;
    dag.fan_in(&branches, "aggregate")?;
    Ok(dag)
}

/// Registers the callables with the default work delay.
pub fn register(registry: &mut CallableRegistry) {
    register_with_delay(registry, DEFAULT_WORK_DELAY);
}

/// Registers the callables; each branch sleeps for `delay`.
pub fn register_with_delay(registry: &mut CallableRegistry, delay: Duration) {
    registry.register("announce_start", |_ctx| {
        info!("Starting parallel tasks");
        Ok(Value::Null)
    });

    for (_, callable, result) in BRANCHES {
        registry.register(callable, move |ctx| process_branch(ctx, delay, result));
    }

    registry.register("aggregate_results", aggregate_results);
}

fn process_branch(ctx: &TaskContext, delay: Duration, result: &str) -> Result<Value, TaskError> {
    info!("Processing {}", ctx.task_id);
    thread::sleep(delay);
    info!("{} completed", ctx.task_id);
    Ok(json!(result))
}

fn aggregate_results(ctx: &TaskContext) -> Result<Value, TaskError> {
    let results = BRANCHES
        .iter()
        .map(|(task_id, _, _)| ctx.xcom_require(task_id))
        .collect::<Result<Vec<_>, _>>()?;

    info!("Aggregating results: {}", Value::Array(results.clone()));
    Ok(Value::Array(results))
}
