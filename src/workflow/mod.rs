//! Workflow Definition Module
//!
//! Provides data structures and utilities for declaring, loading and
//! validating DAGs.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (Dag, Task, DefaultArgs, Schedule)
//! - [`parser`]: YAML loading and saving
//! - [`validator`]: Structural validation and topological sorting
//! - [`planner`]: Per-run task state and scheduling decisions

pub mod model;
pub mod parser;
pub mod planner;
pub mod validator;

pub use model::{Dag, DefaultArgs, Operator, Schedule, Task};
pub use parser::{load_dag, save_dag};
pub use planner::{ExecutionPlanner, TaskStatus};
pub use validator::{topological_order, validate_dag};
