//! Callable Registry
//!
//! Maps the callable names used in DAG definitions to Rust functions.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use super::context::TaskContext;
use crate::error::TaskError;

/// A task body. Returning `Value::Null` pushes nothing to the run context.
pub type TaskCallable = Arc<dyn Fn(&TaskContext) -> Result<Value, TaskError> + Send + Sync>;

/// Named task bodies available to callable tasks.
#[derive(Clone, Default)]
pub struct CallableRegistry {
    callables: HashMap<String, TaskCallable>,
}

impl CallableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callable` under `name`, replacing any previous entry.
    pub fn register<F>(&mut self, name: impl Into<String>, callable: F)
    where
        F: Fn(&TaskContext) -> Result<Value, TaskError> + Send + Sync + 'static,
    {
        self.callables.insert(name.into(), Arc::new(callable));
    }

    pub fn get(&self, name: &str) -> Option<TaskCallable> {
        self.callables.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.callables.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.callables.keys().cloned().collect();
        names.sort();
        names
    }

    /// Names from `required` that have no registered callable.
    pub fn missing<'a>(&self, required: &'a [String]) -> Vec<&'a str> {
        required
            .iter()
            .filter(|name| !self.contains(name))
            .map(String::as_str)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.callables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callables.is_empty()
    }
}

impl fmt::Debug for CallableRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallableRegistry")
            .field("callables", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::context::RunContext;
    use chrono::Utc;
    use serde_json::json;

    #[test]
    fn test_register_and_call() {
        let mut registry = CallableRegistry::new();
        registry.register("answer", |_ctx| Ok(json!(42)));

        let ctx = TaskContext::new("dag", "t", "run", Utc::now(), 1, RunContext::new());
        let callable = registry.get("answer").unwrap();
        assert_eq!(callable(&ctx).unwrap(), json!(42));
    }

    #[test]
    fn test_missing_names() {
        let mut registry = CallableRegistry::new();
        registry.register("present", |_ctx| Ok(Value::Null));

        let required = vec!["present".to_string(), "absent".to_string()];
        assert_eq!(registry.missing(&required), vec!["absent"]);
    }

    #[test]
    fn test_names_sorted() {
        let mut registry = CallableRegistry::new();
        registry.register("b", |_ctx| Ok(Value::Null));
        registry.register("a", |_ctx| Ok(Value::Null));

        assert_eq!(registry.names(), vec!["a", "b"]);
        assert_eq!(registry.len(), 2);
        assert!(format!("{:?}", registry).contains("\"a\""));
    }
}
