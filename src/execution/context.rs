//! Run Context
//!
//! The per-run cross-communication store. A task's return value is pushed
//! once, keyed by its task id, when the task succeeds; downstream tasks pull
//! it by id. Entries never change after they are created.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use log::debug;
use serde_json::Value;

use crate::error::{TaskError, XComError};

/// Shared, write-once-per-task value store for one run.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    values: Arc<RwLock<HashMap<String, Value>>>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the value produced by `task_id`.
    ///
    /// Fails if the task already pushed a value in this run.
    pub fn push(&self, task_id: &str, value: Value) -> Result<(), XComError> {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        if values.contains_key(task_id) {
            return Err(XComError::AlreadyPushed(task_id.to_string()));
        }
        debug!("XCom push: {} = {}", task_id, value);
        values.insert(task_id.to_string(), value);
        Ok(())
    }

    /// Returns a copy of the value produced by `task_id`, if any.
    pub fn pull(&self, task_id: &str) -> Option<Value> {
        self.values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(task_id)
            .cloned()
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(task_id)
    }

    /// Copy of every value pushed so far, ordered by task id.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.values
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Everything a task body can see about the run it belongs to.
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub dag_id: String,
    pub task_id: String,
    pub run_id: String,
    pub logical_date: DateTime<Utc>,
    /// 1 on the first try, 2 on the first retry, ...
    pub try_number: u32,
    xcom: RunContext,
}

impl TaskContext {
    pub fn new(
        dag_id: impl Into<String>,
        task_id: impl Into<String>,
        run_id: impl Into<String>,
        logical_date: DateTime<Utc>,
        try_number: u32,
        xcom: RunContext,
    ) -> Self {
        Self {
            dag_id: dag_id.into(),
            task_id: task_id.into(),
            run_id: run_id.into(),
            logical_date,
            try_number,
            xcom,
        }
    }

    /// Value returned by `task_id` earlier in this run.
    pub fn xcom_pull(&self, task_id: &str) -> Option<Value> {
        self.xcom.pull(task_id)
    }

    /// Like [`xcom_pull`](Self::xcom_pull), but a missing value is an error.
    pub fn xcom_require(&self, task_id: &str) -> Result<Value, TaskError> {
        self.xcom_pull(task_id)
            .ok_or_else(|| TaskError::MissingXCom(task_id.to_string()))
    }
}
