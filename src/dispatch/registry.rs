use crate::{
    errors::{TaskError, TaskResult},
    tasks::TaskContext,
};
use async_trait::async_trait;
use serde::Deserialize;
use std::{sync::Arc, time::Duration};

pub type DynTask = Arc<dyn Task + Send + Sync + 'static>;

#[derive(Clone)]
pub struct TaskRegistry {
    tasks: Vec<(String, DynTask)>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        use crate::tasks::{
            clone::CloneAndCommit,
            convert::ConvertAndStore,
            fetch::{FetchAndStore, ScrapeAndStore},
            filter::FilterAndReturn,
            query::QueryAndStore,
            transcribe::Transcribe,
        };
        let tasks: Vec<DynTask> = vec![
            Arc::new(FetchAndStore),
            Arc::new(CloneAndCommit),
            Arc::new(QueryAndStore),
            Arc::new(ScrapeAndStore),
            Arc::new(ConvertAndStore),
            Arc::new(Transcribe),
            Arc::new(FilterAndReturn),
        ];
        Self::with_tasks(tasks)
    }

    pub fn with_tasks(tasks: Vec<DynTask>) -> Self {
        let mut tasks: Vec<(String, DynTask)> = tasks.into_iter().map(|t| (t.name().to_string(), t)).collect();
        tasks.sort_by(|a, b| a.0.cmp(&b.0));
        Self { tasks }
    }

    pub fn get(&self, name: &str) -> Option<DynTask> { self.tasks.iter().find(|(n, _)| n == name).map(|(_, t)| t.clone()) }
    pub fn list_names(&self) -> Vec<String> { self.tasks.iter().map(|(n, _)| n.clone()).collect() }

    /// Routes a request to its task. Path and existence checks belong to the task.
    pub async fn dispatch(&self, ctx: &TaskContext, req: TaskRequest) -> TaskResult {
        let Some(task) = self.get(&req.task) else {
            return Err(TaskError::UnknownTask(req.task));
        };
        task.run(ctx, req.args, ctx.timeout_for(req.timeout_s)).await
    }
}

impl Default for TaskRegistry {
    fn default() -> Self { Self::new() }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskRequest {
    pub task: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default)]
    pub timeout_s: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CallRequest {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub request: TaskRequest,
}

#[async_trait]
pub trait Task {
    fn name(&self) -> &'static str;
    fn capabilities(&self) -> serde_json::Value;
    /// Confine every path argument, check outputs are absent, then perform one effect.
    async fn run(&self, ctx: &TaskContext, args: serde_json::Value, timeout: Duration) -> TaskResult;
}
