use super::{bounded, parse_args, require_file, TaskContext};
use crate::{
    dispatch::registry::Task,
    errors::{TaskError, TaskResult},
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FilterParams {
    #[serde(alias = "csv_path")]
    input: String,
    #[serde(alias = "filter_column")]
    column: String,
    #[serde(alias = "filter_value")]
    value: Value,
}

/// Returns the rows of a CSV file whose `column` equals `value`. Nothing is persisted.
pub struct FilterAndReturn;

#[async_trait]
impl Task for FilterAndReturn {
    fn name(&self) -> &'static str { "filter-and-return" }
    fn capabilities(&self) -> Value {
        json!({"input": {"type":"object","required":["input","column","value"],"properties":{"input":{"type":"string"},"column":{"type":"string"},"value":{}}}, "output": {"type":"array","items":{"type":"object"}}})
    }
    async fn run(&self, ctx: &TaskContext, args: Value, timeout: Duration) -> TaskResult {
        let p: FilterParams = parse_args(args)?;
        let input = ctx.confine(&p.input)?;
        require_file(&input).await?;

        let tabular = ctx.collab.tabular.clone();
        let records = bounded(timeout, async move {
            tokio::task::spawn_blocking(move || tabular.filter(input.as_path(), &p.column, &p.value))
                .await
                .map_err(TaskError::internal)?
        })
        .await?;
        Ok(Value::Array(records.into_iter().map(Value::Object).collect()))
    }
}
