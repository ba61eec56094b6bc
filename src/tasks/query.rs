use super::{bounded, guard::ensure_absent, parse_args, require_file, write_new, TaskContext};
use crate::{
    collab::sql::Engine,
    dispatch::registry::Task,
    errors::{TaskError, TaskResult},
};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct QueryParams {
    #[serde(alias = "db_path")]
    db: String,
    query: String,
    #[serde(alias = "output_filename")]
    output: String,
}

/// Runs a query against a database under the root and stores the rows.
pub struct QueryAndStore;

#[async_trait]
impl Task for QueryAndStore {
    fn name(&self) -> &'static str { "query-and-store" }
    fn capabilities(&self) -> Value {
        json!({"input": {"type":"object","required":["db","query","output"],"properties":{"db":{"type":"string"},"query":{"type":"string"},"output":{"type":"string"}}}, "output": {"type":"object","properties":{"output":{"type":"string"},"columns":{"type":"array"},"rows":{"type":"array"},"row_count":{"type":"integer"}}}})
    }
    async fn run(&self, ctx: &TaskContext, args: Value, timeout: Duration) -> TaskResult {
        let p: QueryParams = parse_args(args)?;
        let db = ctx.confine(&p.db)?;
        let output = ctx.confine(&p.output)?;
        require_file(&db).await?;
        Engine::for_path(db.as_path())?;
        ensure_absent(&output)?;

        let rows = bounded(timeout, ctx.collab.query.query(db.as_path(), &p.query)).await?;
        let row_count = rows.rows.len();
        let mut doc = json!({"columns": rows.columns, "rows": rows.rows});
        let text = serde_json::to_string_pretty(&doc).map_err(TaskError::internal)?;
        write_new(&output, text.as_bytes()).await?;
        info!(db = %db, output = %output, rows = row_count, "query stored");
        doc["output"] = Value::String(output.to_string());
        doc["row_count"] = Value::from(row_count);
        Ok(doc)
    }
}
