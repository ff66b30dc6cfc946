//! DAG Execution Module
//!
//! Runs DAGs locally, one run at a time, with parallel task scheduling,
//! fixed-delay retries and a shared run context for passing values.
//!
//! # Architecture
//!
//! - [`engine`]: Drives a run and produces a [`RunReport`]
//! - [`task`]: Executes one try of a bash or callable task
//! - [`context`]: Run context and the per-task view of it
//! - [`registry`]: Named callables for callable tasks

pub mod context;
pub mod engine;
pub mod registry;
pub mod task;

pub use context::{RunContext, TaskContext};
pub use engine::{Engine, RunReport, RunState, TaskSummary};
pub use registry::{CallableRegistry, TaskCallable};
pub use task::execute_task;
