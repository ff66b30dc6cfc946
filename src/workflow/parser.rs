//! DAG Parser
//!
//! Loads and saves DAG definitions as YAML. Edges may be declared on either
//! side (`upstream` or `downstream`); loading mirrors them before validation.

use std::collections::HashSet;
use std::error::Error;
use std::fs;
use std::path::Path;

use log::{debug, info};

use super::model::Dag;
use super::validator::validate_dag;
use crate::error::DagError;

/// Loads a DAG from a YAML file.
///
/// This function:
/// 1. Reads and parses the YAML file
/// 2. Mirrors `upstream`/`downstream` declarations
/// 3. Validates the structure and sorts tasks topologically
///
/// # Example
///
/// ```rust,no_run
/// use dagkit::workflow::load_dag;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let dag = load_dag("dags/example_etl_pipeline.yaml")?;
///     println!("Loaded {} tasks", dag.len());
///     Ok(())
/// }
/// ```
pub fn load_dag(path: impl AsRef<Path>) -> Result<Dag, Box<dyn Error>> {
    let path = path.as_ref();
    info!("Loading DAG from: {}", path.display());

    let yaml_content = fs::read_to_string(path).map_err(|e| {
        format!(
            "Failed to read DAG file '{}': {}. Check that the file exists and is readable.",
            path.display(),
            e
        )
    })?;

    debug!("YAML content loaded ({} bytes)", yaml_content.len());

    let mut dag = parse_dag(&yaml_content)?;
    info!("Parsed DAG '{}' with {} tasks", dag.dag_id, dag.len());

    validate_dag(&mut dag)?;
    Ok(dag)
}

/// Parses YAML text into a DAG with mirrored edges, without validating it.
pub fn parse_dag(yaml_content: &str) -> Result<Dag, Box<dyn Error>> {
    let mut dag: Dag = serde_yaml::from_str(yaml_content)
        .map_err(|e| format!("Failed to parse DAG YAML: {}. Check the file format.", e))?;

    link_dependencies(&mut dag)?;
    Ok(dag)
}

/// Makes `upstream` and `downstream` mirror each other.
///
/// Declaring an edge on either side is enough; the other side is filled in.
/// References to undeclared tasks are rejected.
pub fn link_dependencies(dag: &mut Dag) -> Result<(), DagError> {
    let task_ids: HashSet<String> = dag.tasks.iter().map(|t| t.task_id.clone()).collect();

    let mut edges: Vec<(String, String)> = Vec::new();
    for task in &dag.tasks {
        for up in &task.upstream {
            if !task_ids.contains(up) {
                return Err(DagError::InvalidReference {
                    task: task.task_id.clone(),
                    reference: up.clone(),
                });
            }
            edges.push((up.clone(), task.task_id.clone()));
        }
        for down in &task.downstream {
            if !task_ids.contains(down) {
                return Err(DagError::InvalidReference {
                    task: task.task_id.clone(),
                    reference: down.clone(),
                });
            }
            edges.push((task.task_id.clone(), down.clone()));
        }
    }

    for (up, down) in &edges {
        dag.set_downstream(up, down)?;
    }

    debug!("Linked {} edges in DAG '{}'", dag.edges().len(), dag.dag_id);
    Ok(())
}

/// Saves a DAG to a YAML file.
pub fn save_dag(dag: &Dag, path: impl AsRef<Path>) -> Result<(), Box<dyn Error>> {
    let path = path.as_ref();
    let yaml_content = serde_yaml::to_string(dag)?;
    fs::write(path, yaml_content)?;
    info!("DAG '{}' saved to: {}", dag.dag_id, path.display());
    Ok(())
}
