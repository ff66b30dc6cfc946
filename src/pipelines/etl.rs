//! Linear ETL Pipeline
//!
//! `start >> extract >> transform >> load >> end`
//!
//! `extract` produces a small record, `transform` marks it processed and
//! `load` reports it. Each stage reads its input from the run context.

use std::time::Duration;

use chrono::Utc;
use log::info;
use serde_json::{json, Value};

use super::pipeline_start_date;
use crate::error::{DagError, TaskError};
use crate::execution::{CallableRegistry, TaskContext};
use crate::workflow::{Dag, DefaultArgs, Schedule, Task};

pub const DAG_ID: &str = "example_etl_pipeline";

/// Builds the ETL DAG.
pub fn dag() -> Result<Dag, DagError> {
    let mut dag = Dag::new(
        DAG_ID,
        Schedule::every(Duration::from_secs(24 * 60 * 60)),
        pipeline_start_date(),
    )
    .with_description("Simple ETL pipeline example")
    .with_default_args(
        DefaultArgs::default()
            .with_retries(1)
            .with_retry_delay(Duration::from_secs(5 * 60)),
    )
    .with_catchup(false)
    .with_tags(["example", "etl"]);

    dag.add_task(Task::bash("start", "echo \"Starting ETL pipeline\""))?;
    dag.add_task(Task::callable("extract", "extract_data"))?;
    dag.add_task(Task::callable("transform", "transform_data"))?;
    dag.add_task(Task::callable("load", "load_data"))?;
    dag.add_task(Task::bash("end", "echo \"ETL pipeline finished\""))?;

    dag.chain(&["start", "extract", "transform", "load", "end"])?;
    Ok(dag)
}

/// Registers the ETL callables.
pub fn register(registry: &mut CallableRegistry) {
    registry.register("extract_data", extract_data);
    registry.register("transform_data", transform_data);
    registry.register("load_data", load_data);
}

fn extract_data(_ctx: &TaskContext) -> Result<Value, TaskError> {
    info!("Extracting data...");
    Ok(json!({
        "records": 100,
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

fn transform_data(ctx: &TaskContext) -> Result<Value, TaskError> {
    let mut data = ctx.xcom_require("extract")?;
    info!("Transforming data: {}", data);

    let record = data
        .as_object_mut()
        .ok_or_else(|| TaskError::failed("extract did not return a record"))?;
    record.insert("processed".to_string(), Value::Bool(true));
    Ok(data)
}

fn load_data(ctx: &TaskContext) -> Result<Value, TaskError> {
    let data = ctx.xcom_require("transform")?;
    info!("Loading data: {}", data);
    info!("Data loaded successfully!");
    Ok(data)
}
