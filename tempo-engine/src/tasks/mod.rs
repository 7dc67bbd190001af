//! Task registry
//!
//! A task is a named async function taking the job's parameters and,
//! optionally, the metadata produced by the previous job of a pipeline.

pub mod builtin;

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tempo_core::domain::job::TaskParams;
use thiserror::Error;

pub use builtin::register_builtin;

/// Future returned by a task invocation
pub type TaskFuture = Pin<Box<dyn Future<Output = anyhow::Result<Value>> + Send>>;

/// A registered task function
pub type TaskFn = Arc<dyn Fn(TaskParams, Option<Value>) -> TaskFuture + Send + Sync>;

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("task {0} is not registered")]
    NotRegistered(String),

    #[error("invalid task input: {0}")]
    InvalidInput(#[from] serde_json::Error),
}

/// Lookup of task functions by name
pub trait TaskRegistry: Send + Sync {
    fn get_task_func(&self, name: &str) -> Result<TaskFn, TaskError>;

    /// Registered task names, sorted
    fn get_task_names(&self) -> Vec<String>;
}

/// Registry populated once at process start
#[derive(Default)]
pub struct InMemoryTaskRegistry {
    tasks: HashMap<String, TaskFn>,
}

impl InMemoryTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an async function under `name`, replacing any previous one
    pub fn register<F, Fut>(&mut self, name: impl Into<String>, task: F) -> &mut Self
    where
        F: Fn(TaskParams, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
    {
        let func: TaskFn = Arc::new(move |params: TaskParams, previous: Option<Value>| -> TaskFuture {
            Box::pin(task(params, previous))
        });
        self.tasks.insert(name.into(), func);
        self
    }
}

impl TaskRegistry for InMemoryTaskRegistry {
    fn get_task_func(&self, name: &str) -> Result<TaskFn, TaskError> {
        self.tasks
            .get(name)
            .cloned()
            .ok_or_else(|| TaskError::NotRegistered(name.to_string()))
    }

    fn get_task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Decodes task parameters into a typed struct
pub fn decode_params<T: DeserializeOwned>(params: &TaskParams) -> Result<T, TaskError> {
    let object = params
        .iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect::<serde_json::Map<_, _>>();
    Ok(serde_json::from_value(Value::Object(object))?)
}

/// Decodes the metadata handed over by the previous pipeline job
pub fn decode_previous<T: DeserializeOwned>(previous: Option<&Value>) -> Result<Option<T>, TaskError> {
    previous
        .map(|value| serde_json::from_value(value.clone()))
        .transpose()
        .map_err(TaskError::from)
}
