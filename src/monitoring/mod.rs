//! Run Monitoring Module
//!
//! Tracks what happened during a run.
//!
//! # Components
//!
//! - [`ExecutionTimeline`]: Task start/retry/end events for ordering checks and Gantt charts

pub mod timeline;

pub use timeline::{EventType, ExecutionTimeline, TimelineEvent};
