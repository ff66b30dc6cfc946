//! dagkit - Declarative Workflow DAGs
//!
//! Define workflows as directed acyclic graphs of tasks, connect them with
//! sequence and fan operators, and run them locally with a parallel,
//! retrying test runner. Tasks pass values to each other through a
//! per-run context keyed by task id.
//!
//! # Architecture
//!
//! The library is organized into five modules:
//!
//! - [`workflow`]: DAG data model, YAML parsing, validation and run planning
//! - [`execution`]: Local run engine, task execution and the run context
//! - [`monitoring`]: Execution timeline
//! - [`pipelines`]: Built-in example DAGs and their callables
//! - [`error`]: Error types
//!
//! # Example
//!
//! ```rust,no_run
//! use dagkit::execution::Engine;
//! use dagkit::pipelines;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Build a shipped DAG
//!     let dag = pipelines::etl::dag()?;
//!
//!     // Run it with the example callables
//!     let mut engine = Engine::new(dag, pipelines::builtin_registry());
//!     engine.set_max_parallel(4);
//!
//!     let report = engine.run()?;
//!     println!("loaded: {:?}", report.xcom("load"));
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod execution;
pub mod monitoring;
pub mod pipelines;
pub mod workflow;

// Re-export commonly used types
pub use error::{DagError, EngineError, TaskError, ValidationError, XComError};
pub use execution::{CallableRegistry, Engine, RunReport, TaskContext};
pub use workflow::model::{Dag, DefaultArgs, Operator, Schedule, Task};
pub use workflow::parser::{load_dag, save_dag};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "dagkit";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "dagkit");
    }

    #[test]
    fn test_module_exports_task() {
        let task = Task::bash("test", "echo test");
        assert_eq!(task.task_id, "test");
        assert_eq!(task.callable_name(), None);
    }

    #[test]
    fn test_module_exports_registry() {
        let registry = CallableRegistry::new();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_version_format() {
        let parts: Vec<&str> = VERSION.split('.').collect();
        assert!(parts.len() >= 2, "Version should have at least major.minor");
        for part in parts {
            assert!(part.parse::<u32>().is_ok(), "Version components should be numeric");
        }
    }
}
