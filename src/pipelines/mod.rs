//! Built-in Example Pipelines
//!
//! Two reference DAGs shipped with the crate, plus the callables they use.
//!
//! - [`etl`]: `example_etl_pipeline`, five tasks in sequence
//! - [`parallel`]: `parallel_tasks_example`, fan-out to three tasks and fan-in

pub mod etl;
pub mod parallel;

use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;

use crate::error::DagError;
use crate::execution::CallableRegistry;
use crate::workflow::Dag;

/// A DAG constructor and the callables it needs.
pub struct BuiltinPipeline {
    pub dag_id: &'static str,
    pub description: &'static str,
    pub build: fn() -> Result<Dag, DagError>,
    pub register: fn(&mut CallableRegistry),
}

impl BuiltinPipeline {
    pub fn dag(&self) -> Result<Dag, DagError> {
        (self.build)()
    }
}

static CATALOG: Lazy<Vec<BuiltinPipeline>> = Lazy::new(|| {
    vec![
        BuiltinPipeline {
            dag_id: etl::DAG_ID,
            description: "Simple ETL pipeline example",
            build: etl::dag,
            register: etl::register,
        },
        BuiltinPipeline {
            dag_id: parallel::DAG_ID,
            description: "Example DAG with parallel tasks",
            build: parallel::dag,
            register: parallel::register,
        },
    ]
});

/// Start date shared by the example DAGs: 2024-01-01T00:00:00Z.
pub(crate) fn pipeline_start_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// All built-in pipelines.
pub fn list() -> &'static [BuiltinPipeline] {
    &CATALOG
}

/// Looks up a built-in pipeline by DAG id.
pub fn find(dag_id: &str) -> Option<&'static BuiltinPipeline> {
    CATALOG.iter().find(|p| p.dag_id == dag_id)
}

/// Builds the built-in DAG with this id.
pub fn builtin(dag_id: &str) -> Option<Result<Dag, DagError>> {
    find(dag_id).map(BuiltinPipeline::dag)
}

/// Registry holding the callables of every built-in pipeline.
pub fn builtin_registry() -> CallableRegistry {
    let mut registry = CallableRegistry::new();
    for pipeline in list() {
        (pipeline.register)(&mut registry);
    }
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::Engine;
    use crate::monitoring::EventType;
    use crate::workflow::{load_dag, validate_dag, TaskStatus};
    use serde_json::json;
    use std::path::PathBuf;
    use std::time::Duration;

    fn fast_registry() -> CallableRegistry {
        let mut registry = CallableRegistry::new();
        etl::register(&mut registry);
        parallel::register_with_delay(&mut registry, Duration::from_millis(50));
        registry
    }

    fn dags_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("dags")
    }

    #[test]
    fn test_catalog_lists_both_pipelines() {
        let ids: Vec<&str> = list().iter().map(|p| p.dag_id).collect();
        assert_eq!(ids, vec!["example_etl_pipeline", "parallel_tasks_example"]);
        assert!(builtin("example_etl_pipeline").is_some());
        assert!(builtin("nope").is_none());
    }

    #[test]
    fn test_builtin_registry_covers_all_dags() {
        let registry = builtin_registry();
        for pipeline in list() {
            let dag = pipeline.dag().unwrap();
            assert!(registry.missing(&dag.callable_names()).is_empty());
        }
    }

    #[test]
    fn test_builtin_dags_validate() {
        for pipeline in list() {
            let mut dag = pipeline.dag().unwrap();
            assert!(validate_dag(&mut dag).is_ok(), "{}", pipeline.dag_id);
        }
    }

    #[test]
    fn test_etl_run_end_to_end() {
        let mut engine = Engine::new(etl::dag().unwrap(), fast_registry());
        let report = engine.run().unwrap();

        assert!(report.is_success());
        let extracted = report.xcom("extract").unwrap().clone();
        let loaded = report.xcom("load").unwrap();
        assert_eq!(loaded["records"], json!(100));
        assert_eq!(loaded["processed"], json!(true));
        assert_eq!(loaded["timestamp"], extracted["timestamp"]);
        assert_eq!(report.xcom("end"), Some(&json!("ETL pipeline finished")));

        assert_eq!(
            report.timeline.start_order(),
            vec!["start", "extract", "transform", "load", "end"]
        );
        for task in &report.tasks {
            assert_eq!(task.status, TaskStatus::Success);
            assert_eq!(task.try_number, 1);
        }
    }

    #[test]
    fn test_parallel_run_waits_for_all_branches() {
        let mut engine = Engine::new(parallel::dag().unwrap(), fast_registry());
        engine.set_max_parallel(4);
        let report = engine.run().unwrap();

        let timeline = &report.timeline;
        let aggregate_start = timeline
            .event_index("aggregate", EventType::Started)
            .unwrap();
        for branch in ["task_a", "task_b", "task_c"] {
            let done = timeline.event_index(branch, EventType::Succeeded).unwrap();
            assert!(done < aggregate_start, "{} finished after aggregate started", branch);
        }
        assert_eq!(report.xcom("aggregate"), Some(&json!(["A", "B", "C"])));
        assert!(report.xcom("start").is_none());
    }

    #[test]
    fn test_parallel_branches_overlap() {
        let mut registry = CallableRegistry::new();
        parallel::register_with_delay(&mut registry, Duration::from_millis(300));

        let mut engine = Engine::new(parallel::dag().unwrap(), registry);
        engine.set_max_parallel(3);
        let report = engine.run().unwrap();

        // All three branches start before any of them finishes
        let timeline = &report.timeline;
        let last_start = ["task_a", "task_b", "task_c"]
            .iter()
            .filter_map(|id| timeline.event_index(id, EventType::Started))
            .max()
            .unwrap();
        let first_done = ["task_a", "task_b", "task_c"]
            .iter()
            .filter_map(|id| timeline.event_index(id, EventType::Succeeded))
            .min()
            .unwrap();
        assert!(last_start < first_done);
    }

    #[test]
    fn test_parallel_run_serialized_still_correct() {
        let mut engine = Engine::new(parallel::dag().unwrap(), fast_registry());
        engine.set_max_parallel(1);
        let report = engine.run().unwrap();

        assert_eq!(
            report.timeline.start_order(),
            vec!["start", "task_a", "task_b", "task_c", "aggregate"]
        );
        assert_eq!(report.xcom("aggregate"), Some(&json!(["A", "B", "C"])));
    }

    #[test]
    fn test_yaml_definitions_match_builtins() {
        for pipeline in list() {
            let path = dags_dir().join(format!("{}.yaml", pipeline.dag_id));
            let loaded = load_dag(&path).unwrap();

            let mut built = pipeline.dag().unwrap();
            validate_dag(&mut built).unwrap();
            assert_eq!(loaded, built, "{} differs from its YAML file", pipeline.dag_id);
        }
    }
}
