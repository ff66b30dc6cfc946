//! DAG Validation
//!
//! Structural checks applied before a DAG is run or exported:
//! - Task field validation
//! - Reference integrity (edges only name declared tasks)
//! - Cycle detection and topological sorting

use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, info, warn};
use thiserror::Error;

use super::model::{Dag, Operator, Task};

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("DAG has an empty or whitespace-only ID")]
    EmptyDagId,

    #[error("DAG '{0}' has no tasks")]
    EmptyDag(String),

    #[error("Duplicate task ID: '{0}'")]
    DuplicateTaskId(String),

    #[error("Task has empty or whitespace-only ID")]
    EmptyTaskId,

    #[error("Task '{0}' has no bash command")]
    EmptyCommand(String),

    #[error("Task '{0}' has no callable name")]
    EmptyCallable(String),

    #[error("Task '{task}' references unknown task '{reference}'")]
    InvalidReference { task: String, reference: String },

    #[error("Task '{0}' depends on itself")]
    SelfDependency(String),

    #[error("DAG contains cyclic dependencies between tasks: {}", .0.join(", "))]
    CyclicDependency(Vec<String>),

    #[error("{}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n"))]
    Multiple(Vec<ValidationError>),
}

impl ValidationError {
    /// Collapses a list of errors into one, keeping single errors unwrapped.
    fn from_list(mut errors: Vec<ValidationError>) -> Self {
        if errors.len() == 1 {
            errors.remove(0)
        } else {
            Self::Multiple(errors)
        }
    }
}

/// Validates a single task's fields.
fn validate_task(task: &Task) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if task.task_id.trim().is_empty() {
        errors.push(ValidationError::EmptyTaskId);
        return errors;
    }

    match &task.operator {
        Operator::Bash { bash_command } if bash_command.trim().is_empty() => {
            errors.push(ValidationError::EmptyCommand(task.task_id.clone()));
        }
        Operator::Callable { callable } if callable.trim().is_empty() => {
            errors.push(ValidationError::EmptyCallable(task.task_id.clone()));
        }
        _ => {}
    }

    if task.upstream.iter().any(|u| *u == task.task_id)
        || task.downstream.iter().any(|d| *d == task.task_id)
    {
        errors.push(ValidationError::SelfDependency(task.task_id.clone()));
    }

    if task.upstream.is_empty() {
        debug!("Task '{}' is a root task (no upstream)", task.task_id);
    }

    errors
}

/// Validates the entire DAG structure.
///
/// Performs the following checks:
/// 1. DAG has an ID and at least one task
/// 2. No duplicate task IDs
/// 3. All tasks have valid fields
/// 4. All edges point to declared tasks
/// 5. No cyclic dependencies
///
/// On success, the tasks are reordered topologically.
pub fn validate_dag(dag: &mut Dag) -> Result<(), ValidationError> {
    info!("Validating DAG '{}' with {} tasks", dag.dag_id, dag.tasks.len());

    if dag.dag_id.trim().is_empty() {
        return Err(ValidationError::EmptyDagId);
    }

    if dag.tasks.is_empty() {
        return Err(ValidationError::EmptyDag(dag.dag_id.clone()));
    }

    let mut seen_ids: HashSet<String> = HashSet::new();
    for task in &dag.tasks {
        if !seen_ids.insert(task.task_id.clone()) {
            return Err(ValidationError::DuplicateTaskId(task.task_id.clone()));
        }
    }

    let mut all_errors = Vec::new();
    for task in &dag.tasks {
        all_errors.extend(validate_task(task));

        for reference in task.upstream.iter().chain(task.downstream.iter()) {
            if !seen_ids.contains(reference) {
                all_errors.push(ValidationError::InvalidReference {
                    task: task.task_id.clone(),
                    reference: reference.clone(),
                });
            }
        }
    }

    if !all_errors.is_empty() {
        return Err(ValidationError::from_list(all_errors));
    }

    warn_on_mirror_mismatch(dag);

    let order = topological_order(dag)?;
    reorder_tasks(dag, &order);

    info!("DAG '{}' validated: {} tasks", dag.dag_id, dag.tasks.len());
    Ok(())
}

/// Reports edges that are declared on one side only.
fn warn_on_mirror_mismatch(dag: &Dag) {
    for task in &dag.tasks {
        for down in &task.downstream {
            let mirrored = dag
                .get_task(down)
                .map(|d| d.upstream.contains(&task.task_id))
                .unwrap_or(false);
            if !mirrored {
                warn!(
                    "Inconsistency: {} >> {} but {} doesn't list {} as upstream",
                    task.task_id, down, down, task.task_id
                );
            }
        }
    }
}

/// Computes a topological order using Kahn's algorithm.
///
/// Edges are read from each task's `upstream` list. Ties are broken by
/// declaration order, so the result is deterministic for a given DAG.
pub fn topological_order(dag: &Dag) -> Result<Vec<String>, ValidationError> {
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut successors: HashMap<&str, Vec<&str>> = HashMap::new();

    for task in &dag.tasks {
        let upstream: HashSet<&str> = task.upstream.iter().map(String::as_str).collect();
        in_degree.insert(task.task_id.as_str(), upstream.len());
        successors.entry(task.task_id.as_str()).or_default();
    }

    for task in &dag.tasks {
        let mut seen = HashSet::new();
        for up in &task.upstream {
            if seen.insert(up.as_str()) {
                successors
                    .entry(up.as_str())
                    .or_default()
                    .push(task.task_id.as_str());
            }
        }
    }

    let mut queue: VecDeque<&str> = dag
        .tasks
        .iter()
        .filter(|t| in_degree.get(t.task_id.as_str()) == Some(&0))
        .map(|t| t.task_id.as_str())
        .collect();

    let mut sorted: Vec<String> = Vec::with_capacity(dag.tasks.len());

    while let Some(current) = queue.pop_front() {
        sorted.push(current.to_string());

        for successor in successors.get(current).cloned().unwrap_or_default() {
            if let Some(degree) = in_degree.get_mut(successor) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(successor);
                }
            }
        }
    }

    if sorted.len() != dag.tasks.len() {
        let mut stuck: Vec<String> = dag
            .tasks
            .iter()
            .map(|t| t.task_id.clone())
            .filter(|id| !sorted.contains(id))
            .collect();
        stuck.sort();
        return Err(ValidationError::CyclicDependency(stuck));
    }

    debug!("Topological order: {:?}", sorted);
    Ok(sorted)
}

fn reorder_tasks(dag: &mut Dag, order: &[String]) {
    let mut by_id: HashMap<String, Task> = dag
        .tasks
        .drain(..)
        .map(|t| (t.task_id.clone(), t))
        .collect();

    dag.tasks = order.iter().filter_map(|id| by_id.remove(id)).collect();
}

/// Quick validation that returns a list of error messages without
/// touching the DAG.
pub fn quick_validate(dag: &Dag) -> Vec<String> {
    let mut errors = Vec::new();

    if dag.tasks.is_empty() {
        errors.push(format!("DAG '{}' has no tasks", dag.dag_id));
        return errors;
    }

    let task_ids: HashSet<_> = dag.tasks.iter().map(|t| t.task_id.as_str()).collect();
    if task_ids.len() != dag.tasks.len() {
        errors.push("DAG has duplicate task IDs".to_string());
    }

    for task in &dag.tasks {
        errors.extend(validate_task(task).iter().map(|e| e.to_string()));

        for reference in task.upstream.iter().chain(task.downstream.iter()) {
            if !task_ids.contains(reference.as_str()) {
                errors.push(format!(
                    "Task '{}': references unknown task '{}'",
                    task.task_id, reference
                ));
            }
        }
    }

    if errors.is_empty() {
        if let Err(e) = topological_order(dag) {
            errors.push(e.to_string());
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::Schedule;
    use chrono::{TimeZone, Utc};

    fn dag_with(ids: &[&str]) -> Dag {
        let mut dag = Dag::new(
            "test",
            Schedule::daily(),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        );
        for id in ids {
            dag.add_task(Task::bash(*id, format!("echo {}", id))).unwrap();
        }
        dag
    }

    #[test]
    fn test_valid_dag() {
        let mut dag = dag_with(&["a", "b"]);
        dag.chain(&["a", "b"]).unwrap();
        assert!(validate_dag(&mut dag).is_ok());
    }

    #[test]
    fn test_empty_dag() {
        let mut dag = dag_with(&[]);
        assert_eq!(
            validate_dag(&mut dag),
            Err(ValidationError::EmptyDag("test".to_string()))
        );
    }

    #[test]
    fn test_empty_dag_id() {
        let mut dag = dag_with(&["a"]);
        dag.dag_id = "  ".to_string();
        assert_eq!(validate_dag(&mut dag), Err(ValidationError::EmptyDagId));
    }

    #[test]
    fn test_duplicate_ids() {
        let mut dag = dag_with(&["same"]);
        dag.tasks.push(Task::bash("same", "echo 2"));
        assert_eq!(
            validate_dag(&mut dag),
            Err(ValidationError::DuplicateTaskId("same".to_string()))
        );
    }

    #[test]
    fn test_cyclic_dependency() {
        let mut dag = dag_with(&["a", "b", "c"]);
        dag.chain(&["a", "b", "c"]).unwrap();
        dag.set_downstream("c", "b").unwrap();

        match validate_dag(&mut dag) {
            Err(ValidationError::CyclicDependency(tasks)) => {
                assert_eq!(tasks, vec!["b", "c"]);
            }
            other => panic!("Expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_task_empty_command() {
        let task = Task::bash("t", "");
        let errors = validate_task(&task);
        assert!(errors.iter().any(|e| matches!(e, ValidationError::EmptyCommand(_))));
    }

    #[test]
    fn test_validate_task_empty_callable() {
        let task = Task::callable("t", "  ");
        let errors = validate_task(&task);
        assert!(errors.iter().any(|e| matches!(e, ValidationError::EmptyCallable(_))));
    }

    #[test]
    fn test_validate_task_empty_id() {
        let task = Task::bash("", "echo test");
        let errors = validate_task(&task);
        assert_eq!(errors, vec![ValidationError::EmptyTaskId]);
    }

    #[test]
    fn test_validate_invalid_reference() {
        let mut dag = dag_with(&["a"]);
        dag.tasks[0].upstream.push("ghost".to_string());

        let err = validate_dag(&mut dag).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidReference {
                task: "a".to_string(),
                reference: "ghost".to_string(),
            }
        );
        assert!(err.to_string().contains("unknown task"));
    }

    #[test]
    fn test_multiple_errors_reported_together() {
        let mut dag = dag_with(&["a"]);
        dag.tasks.push(Task::callable("b", ""));
        dag.tasks[0].downstream.push("ghost".to_string());

        match validate_dag(&mut dag) {
            Err(ValidationError::Multiple(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("Expected multiple errors, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut dag = dag_with(&["a"]);
        dag.tasks[0].upstream.push("a".to_string());
        assert_eq!(
            validate_dag(&mut dag),
            Err(ValidationError::SelfDependency("a".to_string()))
        );
    }

    #[test]
    fn test_validate_reorders_topologically() {
        let mut dag = dag_with(&["load", "extract", "transform"]);
        dag.chain(&["extract", "transform", "load"]).unwrap();

        validate_dag(&mut dag).unwrap();
        let ids: Vec<_> = dag.tasks.iter().map(|t| t.task_id.as_str()).collect();
        assert_eq!(ids, vec!["extract", "transform", "load"]);
    }

    #[test]
    fn test_topological_order_keeps_declaration_order_for_ties() {
        let mut dag = dag_with(&["start", "c", "a", "b", "join"]);
        dag.fan_out("start", &["c", "a", "b"]).unwrap();
        dag.fan_in(&["c", "a", "b"], "join").unwrap();

        let order = topological_order(&dag).unwrap();
        assert_eq!(order, vec!["start", "c", "a", "b", "join"]);
    }

    #[test]
    fn test_topological_order_from_upstream_only() {
        let mut dag = dag_with(&["b", "a"]);
        dag.tasks[0].upstream.push("a".to_string());

        let order = topological_order(&dag).unwrap();
        assert_eq!(order, vec!["a", "b"]);
    }

    #[test]
    fn test_quick_validate_empty() {
        let dag = dag_with(&[]);
        let errors = quick_validate(&dag);
        assert!(errors[0].contains("no tasks"));
    }

    #[test]
    fn test_quick_validate_unknown_reference() {
        let mut dag = dag_with(&["a"]);
        dag.tasks[0].upstream.push("nope".to_string());
        let errors = quick_validate(&dag);
        assert!(errors.iter().any(|e| e.contains("unknown task")));
    }

    #[test]
    fn test_quick_validate_reports_cycle() {
        let mut dag = dag_with(&["a", "b"]);
        dag.set_downstream("a", "b").unwrap();
        dag.set_downstream("b", "a").unwrap();
        let errors = quick_validate(&dag);
        assert!(errors.iter().any(|e| e.contains("cyclic")));
    }

    #[test]
    fn test_quick_validate_valid() {
        let mut dag = dag_with(&["a", "b"]);
        dag.chain(&["a", "b"]).unwrap();
        assert!(quick_validate(&dag).is_empty());
    }
}
